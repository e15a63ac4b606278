//! Headless host bridge binary for stdin/stdout JSON communication.
//!
//! Reads `RequestEnvelope` messages as newline-delimited JSON from stdin and
//! writes one `ResponseEnvelope` per request to stdout. Every request first
//! runs a throttled due-scan; with `scheduler.background_tick_secs` set, a
//! ticker also scans while the bridge is idle.
//!
//! All tracing output goes to stderr (and optionally a daily log file) so
//! that stdout remains a clean JSON protocol channel.

use std::path::PathBuf;
use std::sync::Arc;

use almanac::host::{RequestHandler, run_stdio};
use almanac::{AlmanacConfig, Engine};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Almanac host bridge.
#[derive(Parser)]
#[command(name = "almanac-host", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config)?;
    let _log_guard = init_tracing(&config);

    tracing::info!(store = %config.store.path.display(), "almanac-host starting");

    let engine = Arc::new(Engine::from_config(config)?);
    let ticker = engine.background_ticker().map(|t| t.run());
    let handler = RequestHandler::new(engine);

    let result = run_stdio(&handler).await;
    if let Some(handle) = ticker {
        handle.abort();
    }
    result.map_err(|e| {
        tracing::error!(error = %e, "almanac-host exited with error");
        anyhow::anyhow!("almanac-host failed: {e}")
    })?;

    tracing::info!("almanac-host shut down cleanly");
    Ok(())
}

fn load_config(explicit: Option<PathBuf>) -> anyhow::Result<AlmanacConfig> {
    let config = match explicit {
        Some(path) => AlmanacConfig::from_file(&path)?,
        None => {
            let path = AlmanacConfig::default_config_path();
            if path.exists() {
                AlmanacConfig::from_file(&path)?
            } else {
                AlmanacConfig::default()
            }
        }
    };
    config.validate()?;
    Ok(config)
}

/// Stderr logging plus an optional daily-rolling file. The returned guard
/// flushes the file writer on drop.
fn init_tracing(config: &AlmanacConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match &config.logging.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "almanac.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(file)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

//! Stdin/stdout JSON bridge.
//!
//! Reads newline-delimited JSON `RequestEnvelope` messages, handles each one
//! and writes the `ResponseEnvelope` as one JSON line. Stdout is reserved for
//! the protocol; diagnostics go to stderr.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

use crate::error::{AlmanacError, Result};
use crate::host::contract::{RequestEnvelope, ResponseEnvelope};
use crate::host::handler::RequestHandler;

/// Run the bridge over the process's stdin and stdout until stdin closes.
pub async fn run_stdio(handler: &RequestHandler) -> Result<()> {
    let reader = BufReader::new(tokio::io::stdin());
    let writer = BufWriter::new(tokio::io::stdout());
    run_stdio_bridge(handler, reader, writer).await
}

/// Run the bridge over arbitrary streams until `reader` reaches EOF.
///
/// Requests are handled one at a time, in order.
pub async fn run_stdio_bridge<R, W>(handler: &RequestHandler, mut reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            tracing::info!("stdin closed (EOF); shutting down stdio bridge");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<RequestEnvelope>(trimmed) {
            Ok(envelope) => handler.handle(envelope).await,
            Err(e) => {
                tracing::warn!(error = %e, "failed to parse request envelope");
                ResponseEnvelope::error("parse-error", format!("failed to parse request envelope: {e}"))
            }
        };

        let json = serde_json::to_string(&response).map_err(|e| {
            AlmanacError::Scheduler(format!("failed to serialize response envelope: {e}"))
        })?;
        write_line(&mut writer, &json).await?;
    }
    Ok(())
}

/// Write a single JSON line and flush.
async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, json: &str) -> Result<()> {
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::config::AlmanacConfig;
    use crate::dispatch::{DispatchError, MessageId, PushGateway, PushMessage};
    use crate::engine::Engine;
    use crate::store::SqliteStore;

    struct Accepting;

    #[async_trait]
    impl PushGateway for Accepting {
        async fn send(&self, _: &str, _: &PushMessage) -> std::result::Result<MessageId, DispatchError> {
            Ok(MessageId("m".into()))
        }
    }

    fn handler() -> RequestHandler {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let engine = Engine::new(AlmanacConfig::default(), store, Arc::new(Accepting)).unwrap();
        RequestHandler::new(Arc::new(engine))
    }

    async fn run(input: &str) -> Vec<ResponseEnvelope> {
        let mut out = Vec::new();
        run_stdio_bridge(&handler(), input.as_bytes(), &mut out).await.unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn one_response_line_per_request() {
        let input = concat!(
            r#"{"v":1,"request_id":"a","command":"list_tasks","payload":{"user_id":"u1"}}"#,
            "\n\n",
            r#"{"v":1,"request_id":"b","command":"scan","payload":{"force":true}}"#,
            "\n",
        );
        let responses = run(input).await;
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].request_id, "a");
        assert!(responses[0].ok);
        assert_eq!(responses[1].request_id, "b");
        assert_eq!(responses[1].payload["scanned"], true);
    }

    #[tokio::test]
    async fn malformed_line_gets_parse_error_and_bridge_continues() {
        let input = concat!(
            "not json\n",
            r#"{"v":1,"request_id":"c","command":"list_tasks","payload":{"user_id":"u1"}}"#,
            "\n",
        );
        let responses = run(input).await;
        assert_eq!(responses[0].request_id, "parse-error");
        assert!(!responses[0].ok);
        assert!(responses[1].ok);
    }

    #[tokio::test]
    async fn unknown_command_is_parse_error() {
        let responses = run(r#"{"v":1,"request_id":"d","command":"force_check","payload":{}}"#).await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].request_id, "parse-error");
    }
}

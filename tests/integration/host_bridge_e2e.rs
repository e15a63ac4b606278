//! End-to-end tests for the `almanac-host` binary (stdin/stdout JSON bridge).
//!
//! Each test spawns the binary with a throwaway config and database, sends
//! request envelopes over stdin and reads one response line per request.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use almanac::alerts::WeatherAlertSource;
use almanac::host::{RequestHandler, run_stdio_bridge};
use almanac_weather::{CachedProvider, WeatherConfig};
use chrono::{TimeDelta, Utc};
use chrono_tz::Asia::Manila;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::helpers::{CountingProvider, RecordingGateway, engine};

// ---------------------------------------------------------------------------
// Test harness
// ---------------------------------------------------------------------------

struct HostBridgeHarness {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    reader: Lines<BufReader<ChildStdout>>,
    _dir: tempfile::TempDir,
}

impl HostBridgeHarness {
    async fn spawn() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_path = dir.path().join("config.toml");
        let db_path = dir.path().join("almanac.db");
        let config = format!(
            "[store]\npath = {db:?}\n\n[push]\nproject_id = \"demo\"\naccess_token = \"test-token\"\n\n[logging]\nlevel = \"warn\"\n",
            db = db_path.display().to_string(),
        );
        std::fs::write(&config_path, config).expect("write config");

        let mut child = Command::new(env!("CARGO_BIN_EXE_almanac-host"))
            .arg("--config")
            .arg(&config_path)
            .env_remove("ALMANAC_WEATHER_API_KEY")
            .env_remove("RUST_LOG")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .expect("failed to spawn almanac-host");

        let child_stdin = child.stdin.take().expect("no stdin on child process");
        let child_stdout = child.stdout.take().expect("no stdout on child process");

        Self {
            child,
            stdin: BufWriter::new(child_stdin),
            reader: BufReader::new(child_stdout).lines(),
            _dir: dir,
        }
    }

    async fn send_raw(&mut self, line: &str) -> Value {
        self.stdin.write_all(line.as_bytes()).await.unwrap();
        self.stdin.write_all(b"\n").await.unwrap();
        self.stdin.flush().await.unwrap();
        let line = tokio::time::timeout(Duration::from_secs(10), self.reader.next_line())
            .await
            .expect("timed out waiting for response")
            .expect("read error")
            .expect("stdout closed");
        serde_json::from_str(&line).expect("response is JSON")
    }

    async fn send(&mut self, request_id: &str, command: &str, payload: Value) -> Value {
        let envelope = json!({
            "v": 1,
            "request_id": request_id,
            "command": command,
            "payload": payload,
        });
        self.send_raw(&envelope.to_string()).await
    }

    async fn shutdown(mut self) {
        drop(self.stdin);
        let status = tokio::time::timeout(Duration::from_secs(10), self.child.wait())
            .await
            .expect("timed out waiting for exit")
            .expect("wait failed");
        assert!(status.success(), "almanac-host exited with {status}");
    }
}

// ---------------------------------------------------------------------------
// Subprocess tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn binary_handles_task_lifecycle() {
    let mut host = HostBridgeHarness::spawn().await;
    // Far enough from now that no scan picks the reminder up mid-test.
    let time = (Utc::now() + TimeDelta::hours(6))
        .with_timezone(&Manila)
        .format("%-I:%M %p")
        .to_string();

    let created = host
        .send(
            "req-1",
            "create_task",
            json!({"user_id": "u1", "name": "Water plants", "time": time, "recurrence": "Everyday"}),
        )
        .await;
    assert_eq!(created["request_id"], "req-1");
    assert_eq!(created["ok"], true, "{created}");
    let task_id = created["payload"]["task"]["id"].as_str().unwrap().to_owned();
    assert!(created["payload"]["next_reminder"]["trigger_at"].is_string());

    let listed = host.send("req-2", "list_tasks", json!({"user_id": "u1"})).await;
    assert_eq!(listed["payload"]["count"], 1);

    let deleted = host
        .send("req-3", "delete_task", json!({"user_id": "u1", "task_id": task_id}))
        .await;
    assert_eq!(deleted["payload"]["tasks"], 1);
    assert_eq!(deleted["payload"]["reminders"], 1);

    host.shutdown().await;
}

#[tokio::test]
async fn binary_reports_bad_input_and_keeps_running() {
    let mut host = HostBridgeHarness::spawn().await;

    let garbage = host.send_raw("{not json").await;
    assert_eq!(garbage["request_id"], "parse-error");
    assert_eq!(garbage["ok"], false);

    let bad_version = host
        .send_raw(r#"{"v":9,"request_id":"r","command":"list_tasks","payload":{"user_id":"u1"}}"#)
        .await;
    assert_eq!(bad_version["ok"], false);
    assert!(bad_version["error"].as_str().unwrap().contains("UnsupportedVersion"));

    let no_source = host
        .send("req-b", "broadcast", json!({"class": "weather", "force": true}))
        .await;
    assert_eq!(no_source["ok"], false);
    assert!(no_source["error"].as_str().unwrap().starts_with("config error"));

    let scan = host.send("req-s", "scan", json!({"force": true})).await;
    assert_eq!(scan["ok"], true);
    assert_eq!(scan["payload"]["due"], 0);

    host.shutdown().await;
}

// ---------------------------------------------------------------------------
// In-process bridge
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bridge_delivers_test_reminder_through_gateway() {
    let gateway = Arc::new(RecordingGateway::default());
    let handler = RequestHandler::new(Arc::new(engine(gateway.clone())));

    let register = json!({"v": 1, "request_id": "a", "command": "register_endpoint",
        "payload": {"user_id": "u1", "device_id": "phone", "token": "tok-1"}});
    let create = json!({"v": 1, "request_id": "b", "command": "create_task",
        "payload": {"user_id": "u1", "name": "Fertilize", "time": "6:30 PM"}});
    let input = format!("{register}\n{create}\n");

    let mut out = Vec::new();
    run_stdio_bridge(&handler, input.as_bytes(), &mut out)
        .await
        .unwrap();
    let responses: Vec<Value> = String::from_utf8(out)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(responses.len(), 2);
    assert!(responses.iter().all(|r| r["ok"] == true), "{responses:?}");
    assert_eq!(responses[1]["payload"]["task"]["recurrence"], "Once");

    let task_id = responses[1]["payload"]["task"]["id"].as_str().unwrap();
    let test = json!({"v": 1, "request_id": "c", "command": "test_reminder",
        "payload": {"user_id": "u1", "task_id": task_id}});
    let mut out = Vec::new();
    run_stdio_bridge(&handler, format!("{test}\n").as_bytes(), &mut out)
        .await
        .unwrap();
    let response: Value = serde_json::from_slice(out.trim_ascii_end()).unwrap();
    assert_eq!(response["payload"]["sent"], true);
    assert_eq!(gateway.sent()[0].1.title, "⏰ Task Reminder: Fertilize");
}

async fn bridge_round(handler: &RequestHandler, requests: &[Value]) -> Vec<Value> {
    let input: String = requests.iter().map(|r| format!("{r}\n")).collect();
    let mut out = Vec::new();
    run_stdio_bridge(handler, input.as_bytes(), &mut out)
        .await
        .unwrap();
    String::from_utf8(out)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

fn envelope(request_id: &str, command: &str, payload: Value) -> Value {
    json!({"v": 1, "request_id": request_id, "command": command, "payload": payload})
}

#[tokio::test]
async fn bridge_broadcast_reaches_users_who_signed_in_through_it() {
    let gateway = Arc::new(RecordingGateway::default());
    let provider = Arc::new(CountingProvider::default());
    let cached = CachedProvider::new(provider.clone(), &WeatherConfig::default());
    let engine = engine(gateway.clone())
        .with_alert_source(Arc::new(WeatherAlertSource::new(cached, Manila)));
    let handler = RequestHandler::new(Arc::new(engine));

    let before = bridge_round(
        &handler,
        &[
            envelope("a", "register_endpoint", json!({"user_id": "u1", "device_id": "phone", "token": "tok-1"})),
            envelope("b", "broadcast", json!({"class": "weather", "force": true})),
        ],
    )
    .await;
    assert_eq!(before[1]["payload"]["eligible"], 0, "{before:?}");

    let after = bridge_round(
        &handler,
        &[
            envelope("c", "user_login", json!({"user_id": "u1"})),
            envelope("d", "update_profile", json!({"user_id": "u1", "location": "Quezon City"})),
            envelope("e", "broadcast", json!({"class": "weather", "force": true})),
        ],
    )
    .await;
    assert!(after.iter().all(|r| r["ok"] == true), "{after:?}");
    assert_eq!(after[1]["payload"]["location"], "Quezon City");
    assert_eq!(after[2]["payload"]["eligible"], 1);
    assert_eq!(after[2]["payload"]["sent"], 1);
    assert_eq!(provider.calls(), 1);
    assert_eq!(gateway.sent()[0].1.title, "🌤️ Weather Update: Quezon City");

    let signed_out = bridge_round(
        &handler,
        &[
            envelope("f", "user_logout", json!({"user_id": "u1"})),
            envelope("g", "broadcast", json!({"class": "pest", "force": true})),
        ],
    )
    .await;
    assert!(signed_out[0]["payload"]["last_logout"].is_string());
    assert_eq!(signed_out[1]["payload"]["eligible"], 0);
}

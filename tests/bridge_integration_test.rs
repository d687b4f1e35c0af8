//! Bridge integration tests: real WebSocket clients against a bridge on
//! an ephemeral port, with `/bin/sh` behind the terminal endpoint and a
//! wiremock Ollama behind the assistant endpoint.

#![cfg(unix)]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use shellmate::bridge::Bridge;
use shellmate::Config;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

type ClientWs = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestBridge {
    addr: std::net::SocketAddr,
    ctx: std::sync::Arc<shellmate::bridge::BridgeContext>,
    shutdown: CancellationToken,
}

impl Drop for TestBridge {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn start_bridge(config: Config) -> TestBridge {
    let bridge = Bridge::bind(config).await.expect("bind bridge");
    let addr = bridge.local_addr().unwrap();
    let ctx = bridge.context();
    let shutdown = CancellationToken::new();
    let run_token = shutdown.clone();
    tokio::spawn(async move {
        let _ = bridge.run(run_token).await;
    });
    TestBridge {
        addr,
        ctx,
        shutdown,
    }
}

fn sh_test_config(ollama_url: &str) -> Config {
    Config {
        port: 0,
        shell: Some("/bin/sh".to_string()),
        // dash rejects the default `--login` long option.
        shell_args: Some(vec!["-i".to_string()]),
        cwd: Some("/tmp".to_string()),
        ollama_url: ollama_url.to_string(),
        model: "test-model".to_string(),
        ..Config::default()
    }
}

async fn connect(addr: std::net::SocketAddr, endpoint: &str) -> ClientWs {
    let (ws, _resp) = connect_async(format!("ws://{addr}{endpoint}"))
        .await
        .expect("connect WebSocket");
    ws
}

/// Read frames until the accumulated binary output contains `pattern`.
async fn wait_for_terminal_output(ws: &mut ClientWs, pattern: &str) -> String {
    let mut acc = String::new();
    let result = timeout(TEST_TIMEOUT, async {
        while let Some(msg) = ws.next().await {
            match msg.expect("read frame") {
                Message::Binary(bytes) => {
                    acc.push_str(&String::from_utf8_lossy(&bytes));
                    if acc.contains(pattern) {
                        return;
                    }
                }
                Message::Close(_) => return,
                _ => {}
            }
        }
    })
    .await;
    assert!(
        result.is_ok(),
        "timed out waiting for {pattern:?}; output so far: {acc:?}"
    );
    acc
}

/// Read assistant-channel JSON messages until `predicate` matches one.
async fn wait_for_assistant_message(
    ws: &mut ClientWs,
    predicate: impl Fn(&serde_json::Value) -> bool,
) -> serde_json::Value {
    let mut seen = Vec::new();
    let result = timeout(TEST_TIMEOUT, async {
        while let Some(msg) = ws.next().await {
            if let Message::Text(text) = msg.expect("read frame") {
                let value: serde_json::Value = serde_json::from_str(&text).expect("parse message");
                if predicate(&value) {
                    return value;
                }
                seen.push(value);
            }
        }
        panic!("assistant channel closed; saw {seen:?}");
    })
    .await;
    result.unwrap_or_else(|_| panic!("timed out; messages seen: {seen:?}"))
}

// =========================================================================
// Terminal endpoint
// =========================================================================

#[tokio::test]
async fn test_terminal_round_trip() {
    let bridge = start_bridge(sh_test_config("http://127.0.0.1:1")).await;
    let mut ws = connect(bridge.addr, "/terminal").await;

    wait_for_terminal_output(&mut ws, "Connected to terminal.").await;

    ws.send(Message::Binary(b"echo ws-round-trip\n".to_vec()))
        .await
        .unwrap();
    let output = wait_for_terminal_output(&mut ws, "ws-round-trip").await;
    assert!(output.contains("ws-round-trip"));
}

#[tokio::test]
async fn test_text_frame_falls_back_to_input() {
    let bridge = start_bridge(sh_test_config("http://127.0.0.1:1")).await;
    let mut ws = connect(bridge.addr, "/terminal").await;
    wait_for_terminal_output(&mut ws, "Connected to terminal.").await;

    // A non-envelope text frame must reach the shell as input.
    ws.send(Message::Text("echo text-fallback\n".to_string()))
        .await
        .unwrap();
    let output = wait_for_terminal_output(&mut ws, "text-fallback").await;
    assert!(output.contains("text-fallback"));
}

#[tokio::test]
async fn test_resize_control_frames_last_write_wins() {
    let bridge = start_bridge(sh_test_config("http://127.0.0.1:1")).await;
    let mut ws = connect(bridge.addr, "/terminal").await;
    wait_for_terminal_output(&mut ws, "Connected to terminal.").await;

    // Two geometry changes in quick succession: only the final one must
    // survive coalescing.
    ws.send(Message::Text(
        r#"{"type":"resize","dims":{"cols":100,"rows":40}}"#.to_string(),
    ))
    .await
    .unwrap();
    ws.send(Message::Text(
        r#"{"type":"resize","dims":{"cols":80,"rows":24}}"#.to_string(),
    ))
    .await
    .unwrap();

    // Let the debounce window pass, then ask the kernel.
    tokio::time::sleep(Duration::from_millis(300)).await;
    ws.send(Message::Binary(b"stty size\n".to_vec()))
        .await
        .unwrap();
    let output = wait_for_terminal_output(&mut ws, "24 80").await;
    assert!(output.contains("24 80"));
}

#[tokio::test]
async fn test_shell_exit_closes_channel() {
    let bridge = start_bridge(sh_test_config("http://127.0.0.1:1")).await;
    let mut ws = connect(bridge.addr, "/terminal").await;
    wait_for_terminal_output(&mut ws, "Connected to terminal.").await;

    ws.send(Message::Binary(b"exit\n".to_vec())).await.unwrap();

    let closed = timeout(TEST_TIMEOUT, async {
        while let Some(msg) = ws.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => return true,
                _ => {}
            }
        }
        true
    })
    .await;
    assert!(closed.unwrap_or(false), "channel did not close after exit");
}

#[tokio::test]
async fn test_client_close_tears_down_session() {
    let bridge = start_bridge(sh_test_config("http://127.0.0.1:1")).await;
    let mut ws = connect(bridge.addr, "/terminal").await;
    wait_for_terminal_output(&mut ws, "Connected to terminal.").await;
    assert!(bridge.ctx.screen_text().is_some());

    ws.close(None).await.unwrap();
    drop(ws);

    let detached = timeout(TEST_TIMEOUT, async {
        while bridge.ctx.screen_text().is_some() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    assert!(detached.is_ok(), "session not torn down after client close");
}

#[tokio::test]
async fn test_spawn_failure_renders_error_banner() {
    let mut config = sh_test_config("http://127.0.0.1:1");
    config.shell = Some("/definitely/not/a/shell".to_string());
    let bridge = start_bridge(config).await;
    let mut ws = connect(bridge.addr, "/terminal").await;

    let output = wait_for_terminal_output(&mut ws, "Error").await;
    assert!(output.contains("Error"));
}

// =========================================================================
// Assistant endpoint
// =========================================================================

fn ndjson(lines: &[&str]) -> String {
    let mut body = lines.join("\n");
    body.push('\n');
    body
}

#[tokio::test]
async fn test_assistant_ask_streams_to_client() {
    let ollama = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            ndjson(&[
                r#"{"response":"<think>reasoning</think>"}"#,
                r#"{"response":"visible "}"#,
                r#"{"response":"answer"}"#,
                r#"{"done":true}"#,
            ]),
            "application/x-ndjson",
        ))
        .mount(&ollama)
        .await;

    let bridge = start_bridge(sh_test_config(&ollama.uri())).await;
    let mut ws = connect(bridge.addr, "/assistant").await;

    ws.send(Message::Text(
        r#"{"type":"ask","prompt":"what is this?"}"#.to_string(),
    ))
    .await
    .unwrap();

    // User exchange then assistant placeholder arrive as appends.
    let user = wait_for_assistant_message(&mut ws, |v| v["type"] == "appended").await;
    assert_eq!(user["exchange"]["role"], "user");

    // The stream finalizes with the visible segment only.
    let final_tail = wait_for_assistant_message(&mut ws, |v| {
        v["type"] == "tail" && v["text"] == "visible answer"
    })
    .await;
    assert_eq!(final_tail["text"], "visible answer");
}

#[tokio::test]
async fn test_assistant_replays_timeline_on_connect() {
    let bridge = start_bridge(sh_test_config("http://127.0.0.1:1")).await;
    bridge.ctx.timeline().append(
        shellmate::timeline::Role::User,
        "earlier question",
        shellmate::timeline::ExchangeKind::Normal,
    );

    let mut ws = connect(bridge.addr, "/assistant").await;
    let replayed = wait_for_assistant_message(&mut ws, |v| v["type"] == "appended").await;
    assert_eq!(replayed["exchange"]["text"], "earlier question");
}

#[tokio::test]
async fn test_assistant_models_request() {
    let ollama = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{"models":[{"name":"llama3.2:latest","model":"llama3.2"}]}"#,
            "application/json",
        ))
        .mount(&ollama)
        .await;

    let bridge = start_bridge(sh_test_config(&ollama.uri())).await;
    let mut ws = connect(bridge.addr, "/assistant").await;

    ws.send(Message::Text(r#"{"type":"models"}"#.to_string()))
        .await
        .unwrap();
    let reply = wait_for_assistant_message(&mut ws, |v| v["type"] == "models").await;
    assert_eq!(reply["models"][0]["model"], "llama3.2");
}

#[tokio::test]
async fn test_assistant_explain_screen_without_terminal_errors() {
    let bridge = start_bridge(sh_test_config("http://127.0.0.1:1")).await;
    let mut ws = connect(bridge.addr, "/assistant").await;

    ws.send(Message::Text(r#"{"type":"explain_screen"}"#.to_string()))
        .await
        .unwrap();
    let reply = wait_for_assistant_message(&mut ws, |v| v["type"] == "error").await;
    assert!(reply["message"]
        .as_str()
        .unwrap()
        .contains("no terminal session attached"));
}

#[tokio::test]
async fn test_assistant_run_command_reaches_terminal() {
    let bridge = start_bridge(sh_test_config("http://127.0.0.1:1")).await;

    // Attach a terminal first.
    let mut term = connect(bridge.addr, "/terminal").await;
    wait_for_terminal_output(&mut term, "Connected to terminal.").await;

    let id = bridge.ctx.timeline().append(
        shellmate::timeline::Role::Assistant,
        "Try:\n```sh\necho from-assistant\n```",
        shellmate::timeline::ExchangeKind::Normal,
    );

    let mut assistant = connect(bridge.addr, "/assistant").await;
    assistant
        .send(Message::Text(format!(
            r#"{{"type":"run_command","id":{id}}}"#
        )))
        .await
        .unwrap();

    // The command re-enters the terminal path as ordinary input.
    let output = wait_for_terminal_output(&mut term, "from-assistant").await;
    assert!(output.contains("from-assistant"));
}

#[tokio::test]
async fn test_assistant_malformed_request_gets_error() {
    let bridge = start_bridge(sh_test_config("http://127.0.0.1:1")).await;
    let mut ws = connect(bridge.addr, "/assistant").await;

    ws.send(Message::Text(r#"{"type":"reboot"}"#.to_string()))
        .await
        .unwrap();
    let reply = wait_for_assistant_message(&mut ws, |v| v["type"] == "error").await;
    assert!(reply["message"]
        .as_str()
        .unwrap()
        .contains("unrecognized request"));
}

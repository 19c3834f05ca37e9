//! Disconnect teardown over a real TCP listener.
//!
//! `oneshot` cannot model a client hanging up mid-stream, so this suite
//! binds a real listener and drops the HTTP response while the server is
//! still producing events.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use streamgate::capability::{CapabilityFrame, CapabilityOutcome, ProcedureMap};
use streamgate::config::GateConfig;
use streamgate::transport::{GateServer, SessionRegistry};
use tokio_util::sync::CancellationToken;

const SESSION_HEADER: &str = "mcp-session-id";

/// Capability surface with a stream that produces until its consumer goes
/// away.
fn slow_stream_invoker() -> Arc<ProcedureMap> {
    let mut map = ProcedureMap::with_builtins();
    map.register_streaming("drip", |_args, tx| async move {
        let mut n = 0u64;
        loop {
            n += 1;
            let frame = CapabilityFrame::Progress {
                method: "notifications/progress".to_string(),
                params: Some(serde_json::json!({"n": n})),
            };
            if tx.send(frame).await.is_err() {
                // Consumer gone: the reply channel closed behind it.
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });
    map.register("echo", |args| async move {
        let value = args
            .map(|a| (*a).clone())
            .unwrap_or(serde_json::json!(null));
        Ok(CapabilityOutcome::Single(value))
    });
    Arc::new(map)
}

/// Start a gateway on an ephemeral port. Returns its base URL, registry
/// handle, and shutdown token.
async fn spawn_server() -> (String, Arc<SessionRegistry>, CancellationToken) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");

    let server = GateServer::new(GateConfig::default(), slow_stream_invoker());
    let registry = server.registry();
    let router = server.router();

    let shutdown = CancellationToken::new();
    let serve_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router)
            .with_graceful_shutdown(async move { serve_shutdown.cancelled().await })
            .await;
    });

    (format!("http://{}", addr), registry, shutdown)
}

async fn open_session(client: &reqwest::Client, base: &str) -> String {
    let response = client
        .post(format!("{}/mcp", base))
        .header("accept", "application/json, text/event-stream")
        .header("content-type", "application/json")
        .body(r#"{"jsonrpc":"2.0","id":0,"method":"initialize"}"#)
        .send()
        .await
        .expect("handshake request");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    response
        .headers()
        .get(SESSION_HEADER)
        .expect("session header")
        .to_str()
        .expect("ascii")
        .to_string()
}

/// Poll until the registry is empty, failing after the deadline.
async fn wait_for_empty(registry: &SessionRegistry, deadline: Duration) {
    let result = tokio::time::timeout(deadline, async {
        while !registry.is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(
        result.is_ok(),
        "session record not removed within {:?} of the disconnect",
        deadline
    );
}

#[tokio::test]
async fn dropped_reply_stream_tears_session_down() {
    let (base, registry, shutdown) = spawn_server().await;
    let client = reqwest::Client::new();

    let session_id = open_session(&client, &base).await;
    assert_eq!(registry.len(), 1);

    // Start a streaming reply and read just the first chunk so the stream
    // is known to be live, then hang up.
    let mut response = client
        .post(format!("{}/mcp", base))
        .header("accept", "application/json, text/event-stream")
        .header("content-type", "application/json")
        .header(SESSION_HEADER, &session_id)
        .body(r#"{"jsonrpc":"2.0","id":1,"method":"drip"}"#)
        .send()
        .await
        .expect("streaming request");
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let first = response.chunk().await.expect("first chunk");
    assert!(first.is_some(), "stream produced no data before disconnect");
    drop(response);

    wait_for_empty(&registry, Duration::from_secs(2)).await;
    shutdown.cancel();
}

#[tokio::test]
async fn dropped_standalone_stream_tears_session_down() {
    let (base, registry, shutdown) = spawn_server().await;
    let client = reqwest::Client::new();

    let session_id = open_session(&client, &base).await;

    let response = client
        .get(format!("{}/mcp", base))
        .header("accept", "text/event-stream")
        .header(SESSION_HEADER, &session_id)
        .send()
        .await
        .expect("standalone stream request");
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    // Give the stream a moment to attach, then hang up.
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(response);

    wait_for_empty(&registry, Duration::from_secs(2)).await;
    shutdown.cancel();
}

#[tokio::test]
async fn standalone_stream_is_exclusive_over_http() {
    let (base, registry, shutdown) = spawn_server().await;
    let client = reqwest::Client::new();

    let session_id = open_session(&client, &base).await;

    let first = client
        .get(format!("{}/mcp", base))
        .header("accept", "text/event-stream")
        .header(SESSION_HEADER, &session_id)
        .send()
        .await
        .expect("first stream");
    assert_eq!(first.status(), reqwest::StatusCode::OK);

    let second = client
        .get(format!("{}/mcp", base))
        .header("accept", "text/event-stream")
        .header(SESSION_HEADER, &session_id)
        .send()
        .await
        .expect("second stream");
    assert_eq!(second.status(), reqwest::StatusCode::CONFLICT);

    let body: Value = second.json().await.expect("error envelope");
    assert_eq!(body["error"]["code"], -32006);

    drop(first);
    wait_for_empty(&registry, Duration::from_secs(2)).await;
    shutdown.cancel();
}

#[tokio::test]
async fn completed_json_exchange_leaves_session_alive() {
    let (base, registry, shutdown) = spawn_server().await;
    let client = reqwest::Client::new();

    let session_id = open_session(&client, &base).await;

    let response = client
        .post(format!("{}/mcp", base))
        .header("accept", "application/json, text/event-stream")
        .header("content-type", "application/json")
        .header(SESSION_HEADER, &session_id)
        .body(r#"{"jsonrpc":"2.0","id":1,"method":"echo","params":"still here"}"#)
        .send()
        .await
        .expect("continuation");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.expect("reply");
    assert_eq!(body["result"], "still here");

    // Plain request/response exchanges never count as disconnects.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(registry.len(), 1);
    shutdown.cancel();
}

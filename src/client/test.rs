use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::client::{backoff_delay, Client, ConnectionState, MultiClient};
use crate::config::{ClientConfig, ServerConfig};
use crate::server::{McpServer, NotificationScheduler, NotificationTarget, ToolRegistration};
use crate::transport::channel::ChannelTransport;
use crate::transport::{ClientTransport, EventStream, Message};
use crate::types::{HealthStatus, NotificationType, ParamSpec};
use crate::{Error, ErrorCode, DESCRIBE_TOOLS};

/// Opt-in log output for debugging: `RUST_LOG=debug cargo test`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn test_server(name: &str) -> Arc<McpServer> {
    init_tracing();
    let config = ServerConfig {
        ping_interval: Duration::from_millis(50),
        ..ServerConfig::default()
    };
    let server = Arc::new(McpServer::with_config(name, config));
    server.register_tool(
        ToolRegistration::new("echo", |kwargs| async move {
            let text = kwargs["text"].as_str().unwrap_or_default().to_string();
            Ok(json!({ "response": format!("echoes: {text}") }))
        })
        .description("Echoes the provided text back")
        .param(ParamSpec::required("text", "string"))
        .returns("object"),
    );
    server.register_tool(
        ToolRegistration::new("delayed_echo", |kwargs| async move {
            let delay = kwargs["delay_ms"].as_u64().unwrap_or(0);
            let text = kwargs["text"].as_str().unwrap_or_default().to_string();
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(json!({ "response": text }))
        })
        .description("Echoes after a delay")
        .param(ParamSpec::required("text", "string"))
        .param(ParamSpec::optional("delay_ms", "integer", json!(0))),
    );
    server.register_tool(ToolRegistration::new("explode", |_| async {
        Err(Error::Other("boom".to_string()))
    }));
    server.register_tool(
        ToolRegistration::new("whoami", |kwargs| async move {
            Ok(json!({ "session": kwargs["server_session_id"] }))
        })
        .with_session_id(),
    );
    server
}

fn fast_config() -> ClientConfig {
    ClientConfig {
        reconnect_interval: Duration::from_millis(50),
        max_reconnect_attempts: Some(3),
        max_reconnect_delay: Duration::from_millis(400),
        connect_timeout: Duration::from_secs(2),
        init_timeout: Duration::from_secs(2),
        tool_call_timeout: Duration::from_secs(2),
        ..ClientConfig::default()
    }
}

async fn connected_client(server: &Arc<McpServer>) -> Client {
    let transport = Arc::new(ChannelTransport::new(server.clone()));
    let client = Client::new(transport, fast_config());
    client.connect().await.expect("connect failed");
    client.initialize().await.expect("initialize failed");
    client
}

/// A transport standing in for a server that is down.
struct DownTransport;

#[async_trait]
impl ClientTransport for DownTransport {
    async fn health_check(&self) -> Result<HealthStatus, Error> {
        Err(Error::Connection("connection refused".to_string()))
    }
    async fn open_event_stream(&self, _client_id: &str) -> Result<EventStream, Error> {
        Err(Error::Connection("connection refused".to_string()))
    }
    async fn submit(&self, _endpoint: &str, _message: Message) -> Result<(), Error> {
        Err(Error::Connection("connection refused".to_string()))
    }
    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[tokio::test]
async fn connect_and_initialize_reports_tools() {
    let server = test_server("s1");
    let client = connected_client(&server).await;

    assert_eq!(client.state().await, ConnectionState::Initialized);
    assert!(client.session_id().await.is_some());
    assert_eq!(server.health().active_sessions, 1);

    let tools = client.available_tools().await;
    assert!(tools.contains(&"echo".to_string()));
    assert!(tools.contains(&DESCRIBE_TOOLS.to_string()));

    client.close().await.unwrap();
}

#[tokio::test]
async fn echo_round_trip() {
    let server = test_server("s1");
    let client = connected_client(&server).await;

    let result = client.call_tool("echo", json!({ "text": "hi" })).await.unwrap();
    assert_eq!(result, json!({ "response": "echoes: hi" }));

    client.close().await.unwrap();
}

#[tokio::test]
async fn concurrent_calls_resolve_by_request_id() {
    let server = test_server("s1");
    let client = Arc::new(connected_client(&server).await);

    // Later submissions respond sooner; each call must still get its own
    // response.
    let mut handles = Vec::new();
    for (text, delay) in [("first", 300u64), ("second", 150), ("third", 10)] {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            client
                .call_tool("delayed_echo", json!({ "text": text, "delay_ms": delay }))
                .await
        }));
    }

    let expected = ["first", "second", "third"];
    for (handle, text) in handles.into_iter().zip(expected) {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result, json!({ "response": text }));
    }

    client.close().await.unwrap();
}

#[tokio::test]
async fn unknown_tool_is_tool_error() {
    let server = test_server("s1");
    let client = connected_client(&server).await;

    match client.call_tool("no_such_tool", json!({})).await {
        Err(Error::Tool { code, message }) => {
            assert_eq!(code, ErrorCode::ToolNotFound);
            assert!(message.contains("no_such_tool"));
        }
        other => panic!("expected tool-not-found error, got {other:?}"),
    }
    client.close().await.unwrap();
}

#[tokio::test]
async fn failing_tool_reports_execution_error() {
    let server = test_server("s1");
    let client = connected_client(&server).await;

    match client.call_tool("explode", json!({})).await {
        Err(Error::Tool { code, message }) => {
            assert_eq!(code, ErrorCode::ToolExecutionError);
            assert!(message.contains("boom"));
        }
        other => panic!("expected tool execution error, got {other:?}"),
    }
    client.close().await.unwrap();
}

#[tokio::test]
async fn tool_call_timeout_discards_late_response() {
    let server = test_server("s1");
    let transport = Arc::new(ChannelTransport::new(server.clone()));
    let mut config = fast_config();
    config.tool_call_timeout = Duration::from_millis(100);
    let client = Client::new(transport, config);
    client.connect().await.unwrap();
    client.initialize().await.unwrap();

    match client
        .call_tool("delayed_echo", json!({ "text": "late", "delay_ms": 500 }))
        .await
    {
        Err(Error::Tool { message, .. }) => assert!(message.contains("Timed out")),
        other => panic!("expected timeout error, got {other:?}"),
    }

    // The late response arrives with no matching pending entry and is
    // silently discarded; the connection keeps working.
    tokio::time::sleep(Duration::from_millis(600)).await;
    let result = client.call_tool("echo", json!({ "text": "still alive" })).await.unwrap();
    assert_eq!(result, json!({ "response": "echoes: still alive" }));

    client.close().await.unwrap();
}

#[tokio::test]
async fn call_tool_requires_initialization() {
    let server = test_server("s1");
    let transport = Arc::new(ChannelTransport::new(server.clone()));
    let client = Client::new(transport, fast_config());

    match client.call_tool("echo", json!({ "text": "hi" })).await {
        Err(Error::Connection(_)) => {}
        other => panic!("expected connection error, got {other:?}"),
    }

    client.connect().await.unwrap();
    match client.call_tool("echo", json!({ "text": "hi" })).await {
        Err(Error::Initialization(_)) => {}
        other => panic!("expected initialization error, got {other:?}"),
    }

    client.close().await.unwrap();
}

#[tokio::test]
async fn initialize_requires_connection() {
    let server = test_server("s1");
    let transport = Arc::new(ChannelTransport::new(server.clone()));
    let client = Client::new(transport, fast_config());
    match client.initialize().await {
        Err(Error::Connection(_)) => {}
        other => panic!("expected connection error, got {other:?}"),
    }
}

#[tokio::test]
async fn session_id_injection_matches_client_session() {
    let server = test_server("s1");
    let client = connected_client(&server).await;

    let result = client.call_tool("whoami", json!({})).await.unwrap();
    assert_eq!(result["session"], json!(client.session_id().await.unwrap()));

    client.close().await.unwrap();
}

#[tokio::test]
async fn describe_tools_lists_metadata() {
    let server = test_server("s1");
    let client = connected_client(&server).await;

    let result = client.call_tool(DESCRIBE_TOOLS, json!({})).await.unwrap();
    let described = result.as_object().unwrap();
    assert!(!described.contains_key(DESCRIBE_TOOLS));
    assert!(described.contains_key("echo"));
    assert_eq!(described["echo"]["parameters"]["text"]["type"], "string");
    assert_eq!(described["echo"]["parameters"]["text"]["required"], true);
    assert_eq!(
        described["delayed_echo"]["parameters"]["delay_ms"]["default"],
        0
    );

    client.close().await.unwrap();
}

#[tokio::test]
async fn notification_callbacks_receive_push() {
    let server = test_server("s1");
    let client = connected_client(&server).await;
    let session_id = client.session_id().await.unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let callback_id = client.add_notification_callback(move |params| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(params);
        }
    });

    server
        .push_notification(
            &session_id,
            NotificationType::Info,
            "hello there",
            Some(json!({ "n": 7 })),
        )
        .await
        .unwrap();

    let params = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no notification")
        .unwrap();
    assert_eq!(params.notification_type, NotificationType::Info);
    assert_eq!(params.message, "hello there");
    assert_eq!(params.data, Some(json!({ "n": 7 })));

    assert!(client.remove_notification_callback(callback_id));
    assert!(!client.remove_notification_callback(callback_id));

    client.close().await.unwrap();
}

#[tokio::test]
async fn scheduled_notification_arrives_and_cancel_suppresses() {
    let server = test_server("s1");
    let scheduler = NotificationScheduler::new(server.clone());
    let client = connected_client(&server).await;
    let session_id = client.session_id().await.unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    client.add_notification_callback(move |params| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(params.message);
        }
    });

    let cancelled = scheduler.schedule_notification(
        Duration::from_millis(100),
        NotificationType::Info,
        "should never arrive",
        None,
        NotificationTarget::Session(session_id.clone()),
    );
    assert!(scheduler.cancel_scheduled_notification(&cancelled));

    scheduler.schedule_notification(
        Duration::from_millis(150),
        NotificationType::Info,
        "one shot",
        None,
        NotificationTarget::Session(session_id),
    );

    let message = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no notification")
        .unwrap();
    assert_eq!(message, "one shot");

    // Exactly one delivery: the cancelled task never fired.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(rx.try_recv().is_err());

    client.close().await.unwrap();
}

#[tokio::test]
async fn session_reissue_fails_pending_and_reinitializes() {
    let server = test_server("s1");
    let client = connected_client(&server).await;
    let old_session = client.session_id().await.unwrap();

    // An in-flight call bound to the old session.
    let pending = {
        let server = server.clone();
        let old_session = old_session.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            server.close_session(&old_session);
        });
        client.call_tool("delayed_echo", json!({ "text": "stale", "delay_ms": 800 }))
    };

    match pending.await {
        Err(Error::Connection(message)) => {
            assert!(message.contains("Session reinitialized"), "got: {message}");
        }
        other => panic!("expected session-reinitialized failure, got {other:?}"),
    }

    // The listener reconnects, receives a fresh session id, and re-runs the
    // handshake on its own.
    let mut reinitialized = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if client.is_initialized().await {
            if let Some(session) = client.session_id().await {
                if session != old_session {
                    reinitialized = true;
                    break;
                }
            }
        }
    }
    assert!(reinitialized, "client never reinitialized");

    let result = client.call_tool("echo", json!({ "text": "back" })).await.unwrap();
    assert_eq!(result, json!({ "response": "echoes: back" }));

    client.close().await.unwrap();
}

#[tokio::test]
async fn close_is_idempotent_and_fails_pending() {
    let server = test_server("s1");
    let client = Arc::new(connected_client(&server).await);

    let pending = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .call_tool("delayed_echo", json!({ "text": "x", "delay_ms": 1500 }))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    client.close().await.unwrap();
    match pending.await.unwrap() {
        Err(Error::Connection(message)) => assert!(message.contains("closed")),
        other => panic!("expected closed error, got {other:?}"),
    }

    // Idempotent, and terminal.
    client.close().await.unwrap();
    assert_eq!(client.state().await, ConnectionState::Closed);
    assert!(client.connect().await.is_err());
    assert!(client.call_tool("echo", json!({})).await.is_err());
}

#[tokio::test]
async fn connect_fails_against_down_server() {
    let client = Client::new(Arc::new(DownTransport), fast_config());
    match client.connect().await {
        Err(Error::Connection(message)) => assert!(message.contains("health check")),
        other => panic!("expected connection error, got {other:?}"),
    }
    assert_eq!(client.state().await, ConnectionState::Disconnected);
}

#[tokio::test]
async fn multi_client_partial_success() {
    let server = test_server("alpha-server");
    let mut transports: HashMap<String, Arc<dyn ClientTransport>> = HashMap::new();
    transports.insert(
        "alpha".to_string(),
        Arc::new(ChannelTransport::new(server.clone())),
    );
    transports.insert("beta".to_string(), Arc::new(DownTransport));

    let multi = MultiClient::new(transports, fast_config());
    let results = multi.connect_all().await;

    assert!(results["alpha"].success);
    assert!(results["alpha"].error.is_none());
    assert!(!results["beta"].success);
    assert!(results["beta"].error.is_some());

    // Only the live alias is usable.
    let result = multi
        .call_tool("alpha", "echo", json!({ "text": "hi" }))
        .await
        .unwrap();
    assert_eq!(result, json!({ "response": "echoes: hi" }));
    match multi.call_tool("beta", "echo", json!({})).await {
        Err(Error::Connection(message)) => assert!(message.contains("beta")),
        other => panic!("expected unknown-alias error, got {other:?}"),
    }

    let info = multi.server_info().await;
    assert_eq!(info.len(), 1);
    assert_eq!(info["alpha"].status, "connected");
    assert!(info["alpha"].initialized);
    // describe_tools metadata was fetched automatically.
    assert!(info["alpha"].tool_details.contains_key("echo"));

    multi.close().await;
    assert_eq!(server.session_count(), 0);
}

#[tokio::test]
async fn repeated_connect_all_replaces_without_leaking_sessions() {
    let server = test_server("alpha-server");
    let mut transports: HashMap<String, Arc<dyn ClientTransport>> = HashMap::new();
    transports.insert(
        "alpha".to_string(),
        Arc::new(ChannelTransport::new(server.clone())),
    );
    let multi = MultiClient::new(transports, fast_config());

    let first = multi.connect_all().await;
    assert!(first["alpha"].success);
    assert_eq!(server.session_count(), 1);

    // The first client's session is released, not orphaned alongside the
    // replacement's.
    let second = multi.connect_all().await;
    assert!(second["alpha"].success);
    assert_eq!(server.session_count(), 1);

    let result = multi
        .call_tool("alpha", "echo", json!({ "text": "again" }))
        .await
        .unwrap();
    assert_eq!(result, json!({ "response": "echoes: again" }));

    multi.close().await;
    assert_eq!(server.session_count(), 0);
}

#[tokio::test]
async fn multi_client_notification_fanout_carries_alias() {
    let server = test_server("alpha-server");
    let mut transports: HashMap<String, Arc<dyn ClientTransport>> = HashMap::new();
    transports.insert(
        "alpha".to_string(),
        Arc::new(ChannelTransport::new(server.clone())),
    );

    let multi = MultiClient::new(transports, fast_config());
    multi.connect_all().await;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    multi
        .add_notification_callback(None, move |alias, params| {
            let tx = tx.clone();
            async move {
                let _ = tx.send((alias, params.message));
            }
        })
        .await;

    server
        .broadcast_notification(NotificationType::Data, "market update", None)
        .await;

    let (alias, message) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no notification")
        .unwrap();
    assert_eq!(alias, "alpha");
    assert_eq!(message, "market update");

    multi.close().await;
}

#[tokio::test]
async fn multi_client_unknown_alias_callback_warns_only() {
    let multi = MultiClient::new(HashMap::new(), fast_config());
    multi
        .add_notification_callback(Some("ghost"), |_alias, _params| async {})
        .await;
    assert!(multi.server_info().await.is_empty());
}

#[test]
fn backoff_sequence_matches_formula() {
    let initial = Duration::from_secs(1);
    let max = Duration::from_secs(60);
    for attempt in 1..=10u32 {
        let expected = std::cmp::min(
            Duration::from_secs(1 << (attempt - 1).min(6)),
            max,
        );
        assert_eq!(backoff_delay(initial, max, attempt), expected);
    }
}

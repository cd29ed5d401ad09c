//! Server side of the protocol: per-client session registry, JSON-RPC
//! dispatch, and push/broadcast delivery.
//!
//! An [`McpServer`] owns every live [`Session`]. A session is created when a
//! client opens its event stream ([`McpServer::open_session`]) and destroyed
//! only when that stream is torn down — either explicitly via
//! [`McpServer::close_session`] or because the consumer dropped the event
//! receiver. All responses and notifications travel through the owning
//! session's bounded outbound queue, strictly FIFO.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock as StdRwLock, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::protocol::{Notification, NotificationParams, RequestId, Response};
use crate::transport::{EndpointInfo, Message, ServerEvent};
use crate::types::{HealthStatus, NotificationType};
use crate::{
    Error, ErrorCode, DESCRIBE_TOOLS, JSONRPC_VERSION, METHOD_INITIALIZE, METHOD_TOOL_CALL,
};

pub mod notifications;
pub mod tools;

pub use notifications::{DataContent, MessageContent, NotificationScheduler, NotificationTarget};
pub use tools::{ToolRegistration, ToolRegistry};

#[derive(Debug, Default)]
struct SessionState {
    initialized: bool,
    protocol_version: Option<String>,
    client_info: Option<Value>,
}

/// Server-side record of one connected client's stream.
pub struct Session {
    pub session_id: String,
    pub client_id: String,
    pub created_at: chrono::DateTime<chrono::Local>,
    outbound: mpsc::Sender<ServerEvent>,
    state: StdRwLock<SessionState>,
    ping_task: StdRwLock<Option<JoinHandle<()>>>,
}

impl Session {
    fn new(client_id: String, session_id: String, outbound: mpsc::Sender<ServerEvent>) -> Self {
        tracing::info!(session_id = %session_id, client_id = %client_id, "Connection created");
        Self {
            session_id,
            client_id,
            created_at: chrono::Local::now(),
            outbound,
            state: StdRwLock::new(SessionState::default()),
            ping_task: StdRwLock::new(None),
        }
    }

    /// Queues an event for delivery on this session's stream. The queue is
    /// bounded: when a stalled consumer has filled it, the event is dropped
    /// with a warning instead of blocking the sender. A closed queue (the
    /// stream consumer is gone) is an error.
    pub fn send(&self, event: ServerEvent) -> Result<(), Error> {
        match self.outbound.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    "Outbound queue full, dropping event"
                );
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::Connection(format!(
                "Session {} outbound queue closed",
                self.session_id
            ))),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state.read().unwrap_or_else(|e| e.into_inner()).initialized
    }

    fn mark_initialized(&self, protocol_version: String, client_info: Value) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.initialized = true;
        tracing::info!(
            session_id = %self.session_id,
            protocol = %protocol_version,
            "Session initialized"
        );
        state.protocol_version = Some(protocol_version);
        state.client_info = Some(client_info);
    }

    fn stop_ping(&self) {
        let mut slot = self.ping_task.write().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = slot.take() {
            task.abort();
            tracing::debug!(session_id = %self.session_id, "Stopped keep-alive task");
        }
    }
}

/// Handle returned by [`McpServer::open_session`]: the new session's identity
/// and the receiving half of its event stream. The first event is always
/// `endpoint`.
pub struct SessionHandle {
    pub session_id: String,
    pub endpoint: String,
    pub events: mpsc::Receiver<ServerEvent>,
}

/// The per-server session registry and JSON-RPC dispatcher.
pub struct McpServer {
    server_name: String,
    config: ServerConfig,
    sessions: StdRwLock<HashMap<String, Arc<Session>>>,
    tools: ToolRegistry,
}

impl McpServer {
    pub fn new(server_name: &str) -> Self {
        Self::with_config(server_name, ServerConfig::default())
    }

    pub fn with_config(server_name: &str, config: ServerConfig) -> Self {
        tracing::info!(server = %server_name, "Initialized McpServer");
        Self {
            server_name: server_name.to_string(),
            config,
            sessions: StdRwLock::new(HashMap::new()),
            tools: ToolRegistry::new(),
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// The tool registry; register tools here before serving.
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Convenience for [`ToolRegistry::register`].
    pub fn register_tool(&self, registration: ToolRegistration) {
        self.tools.register(registration);
    }

    /// Liveness payload: service name and active-session count.
    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            status: "ok".to_string(),
            service: self.server_name.clone(),
            active_sessions: self.session_count(),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Allocates a session for a newly opened stream and starts its
    /// keep-alive emitter. The `endpoint` event is already queued on the
    /// returned receiver.
    pub async fn open_session(self: &Arc<Self>, client_id: Option<&str>) -> SessionHandle {
        let client_id = match client_id {
            Some(id) => id.to_string(),
            None => {
                let generated = Uuid::new_v4().to_string();
                tracing::info!(client_id = %generated, "Client connected without client_id, generated one");
                generated
            }
        };
        let session_id = Uuid::new_v4().to_string();
        let endpoint = format!("/messages?session_id={session_id}");

        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        let session = Arc::new(Session::new(client_id, session_id.clone(), tx));

        // Endpoint info is the first event on every stream. The queue is
        // empty here, so this cannot fail.
        let _ = session.send(ServerEvent::Endpoint(EndpointInfo {
            endpoint: endpoint.clone(),
            server_session_id: session_id.clone(),
        }));

        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session_id.clone(), session.clone());
        tracing::info!(
            session_id = %session_id,
            total = self.session_count(),
            "Client connected"
        );

        self.start_ping(&session);

        SessionHandle {
            session_id,
            endpoint,
            events: rx,
        }
    }

    fn start_ping(self: &Arc<Self>, session: &Arc<Session>) {
        let interval = self.config.ping_interval;
        let server: Weak<McpServer> = Arc::downgrade(self);
        let session_task = session.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // first tick completes immediately
            let mut ping_count: u64 = 0;
            loop {
                ticker.tick().await;
                ping_count += 1;
                if let Err(e) = session_task.send(ServerEvent::Ping(ping_count)) {
                    // Receiver gone: the stream consumer went away without an
                    // explicit close. Tear the session down.
                    tracing::warn!(
                        session_id = %session_task.session_id,
                        error = %e,
                        "Keep-alive send failed, closing session"
                    );
                    if let Some(server) = server.upgrade() {
                        server.close_session(&session_task.session_id);
                    }
                    break;
                }
                tracing::debug!(session_id = %session_task.session_id, ping_count, "Sent keep-alive");
            }
        });
        *session.ping_task.write().unwrap_or_else(|e| e.into_inner()) = Some(task);
    }

    /// Removes a session and stops its keep-alive. This is the only way
    /// session state is destroyed.
    pub fn close_session(&self, session_id: &str) {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id);
        if let Some(session) = removed {
            session.stop_ping();
            tracing::info!(
                session_id = %session_id,
                client_id = %session.client_id,
                total = self.session_count(),
                "Client disconnected"
            );
        }
    }

    fn get_session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .cloned()
    }

    /// Handles a submitted JSON-RPC request body.
    ///
    /// Structural problems and entirely unknown sessions are rejected
    /// synchronously with a [`Error::Protocol`]. Everything else returns
    /// `Ok(())` — "accepted" — and the actual response is delivered later
    /// through the session's outbound queue.
    pub async fn handle_request(
        self: &Arc<Self>,
        session_id: Option<&str>,
        body: Value,
    ) -> Result<(), Error> {
        let log_session = session_id.unwrap_or("NO_SESSION");
        tracing::debug!(session_id = %log_session, "Received request");

        let obj = match body.as_object() {
            Some(obj) => obj,
            None => {
                return Err(Error::protocol(
                    ErrorCode::InvalidRequest,
                    "Invalid request structure",
                ))
            }
        };
        if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION)
            || !obj.contains_key("method")
        {
            return Err(Error::protocol(
                ErrorCode::InvalidRequest,
                "Invalid request structure",
            ));
        }

        let method = obj
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let params = obj.get("params").cloned().unwrap_or_else(|| Value::Object(Default::default()));
        let request_id: Option<RequestId> = obj
            .get("id")
            .and_then(|id| serde_json::from_value(id.clone()).ok());

        let session = session_id.and_then(|id| self.get_session(id));

        if method == METHOD_INITIALIZE {
            let session = session.ok_or_else(|| {
                tracing::error!(session_id = %log_session, "Initialize received for unknown session");
                Error::protocol(ErrorCode::InvalidSession, "Invalid session ID")
            })?;

            if session.is_initialized() {
                tracing::warn!(session_id = %session.session_id, "Session already initialized");
            } else {
                let protocol_version = params
                    .get("protocolVersion")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                let client_info = params
                    .get("clientInfo")
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Default::default()));
                session.mark_initialized(protocol_version, client_info);
            }

            let result = serde_json::json!({
                "capabilities": { "tools": self.tools.names() }
            });
            self.deliver(&session, Response::success(result, request_id));
            return Ok(());
        }

        let session = match session {
            Some(session) => session,
            None => {
                tracing::warn!(session_id = %log_session, %method, "Request without valid session");
                return Err(Error::protocol(
                    ErrorCode::InvalidSession,
                    "Missing or invalid session ID",
                ));
            }
        };

        if !session.is_initialized() {
            tracing::warn!(session_id = %session.session_id, %method, "Request before initialization");
            self.deliver(
                &session,
                Response::error(
                    ErrorCode::ServerNotInitialized,
                    "Session not initialized",
                    request_id,
                ),
            );
            return Ok(());
        }

        if method == METHOD_TOOL_CALL {
            // Accepted: the response reaches the stream whenever the handler
            // finishes, without holding up request submission.
            let server = self.clone();
            tokio::spawn(async move {
                server.dispatch_tool_call(&session, params, request_id).await;
            });
            return Ok(());
        }

        tracing::warn!(session_id = %session.session_id, %method, "Unknown method");
        self.deliver(
            &session,
            Response::error(
                ErrorCode::MethodNotFound,
                format!("Method not found: {method}"),
                request_id,
            ),
        );
        Ok(())
    }

    async fn dispatch_tool_call(
        &self,
        session: &Arc<Session>,
        params: Value,
        request_id: Option<RequestId>,
    ) {
        let tool_name = params
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mut kwargs = params
            .get("kwargs")
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()));
        tracing::info!(
            session_id = %session.session_id,
            tool = %tool_name,
            "Processing tool call"
        );

        if tool_name == DESCRIBE_TOOLS {
            let described = self.tools.describe();
            let response = match serde_json::to_value(described) {
                Ok(result) => Response::success(result, request_id),
                Err(e) => Response::error(
                    ErrorCode::InternalError,
                    format!("Internal error: {e}"),
                    request_id,
                ),
            };
            self.deliver(session, response);
            return;
        }

        let registration = match self.tools.get(&tool_name) {
            Some(registration) => registration,
            None => {
                self.deliver(
                    session,
                    Response::error(
                        ErrorCode::ToolNotFound,
                        format!("Tool not found: {tool_name}"),
                        request_id,
                    ),
                );
                return;
            }
        };

        if registration.needs_session {
            if let Value::Object(ref mut map) = kwargs {
                map.insert(
                    "server_session_id".to_string(),
                    Value::String(session.session_id.clone()),
                );
            }
        }

        let response = match (registration.handler)(kwargs).await {
            Ok(result) => Response::success(result, request_id),
            Err(e) => {
                tracing::error!(
                    session_id = %session.session_id,
                    tool = %tool_name,
                    error = %e,
                    "Error executing tool"
                );
                Response::error(
                    ErrorCode::ToolExecutionError,
                    format!("Tool execution error: {e}"),
                    request_id,
                )
            }
        };
        self.deliver(session, response);
    }

    fn deliver(&self, session: &Arc<Session>, response: Response) {
        // The session may have been closed while a handler was running; its
        // stream is gone, so the response has nowhere to go.
        if self.get_session(&session.session_id).is_none() {
            tracing::warn!(session_id = %session.session_id, "Dropping response for closed session");
            return;
        }
        if let Err(e) = session.send(ServerEvent::Message(Message::Response(response))) {
            tracing::error!(session_id = %session.session_id, error = %e, "Failed to queue response");
        }
    }

    /// Sends a notification to one client. Unknown sessions are a logged
    /// no-op, not an error.
    pub async fn push_notification(
        &self,
        session_id: &str,
        notification_type: NotificationType,
        message: &str,
        data: Option<Value>,
    ) -> Result<(), Error> {
        let session = match self.get_session(session_id) {
            Some(session) => session,
            None => {
                tracing::warn!(session_id = %session_id, "Notification attempted for non-existent session");
                return Ok(());
            }
        };

        let params = NotificationParams::new(notification_type, message.to_string(), data);
        let notification = Notification::push(&params)?;
        session.send(ServerEvent::Message(Message::Notification(notification)))?;
        tracing::info!(
            session_id = %session_id,
            notification_type = %notification_type,
            "Sent notification"
        );
        Ok(())
    }

    /// Sends a notification to every active session, logging per-session
    /// failures.
    pub async fn broadcast_notification(
        &self,
        notification_type: NotificationType,
        message: &str,
        data: Option<Value>,
    ) {
        let session_ids: Vec<String> = self
            .sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        if session_ids.is_empty() {
            tracing::info!(%message, "No active connections for broadcast notification");
            return;
        }
        tracing::info!(
            clients = session_ids.len(),
            notification_type = %notification_type,
            "Broadcasting notification"
        );
        for session_id in session_ids {
            if let Err(e) = self
                .push_notification(&session_id, notification_type, message, data.clone())
                .await
            {
                tracing::error!(session_id = %session_id, error = %e, "Error sending notification");
            }
        }
    }

    /// Stops every session's keep-alive and clears the registry.
    pub fn shutdown(&self) {
        tracing::info!(server = %self.server_name, "Server shutting down");
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, session)| session)
            .collect();
        for session in sessions {
            session.stop_ping();
        }
    }
}

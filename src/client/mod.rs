//! Client side of the protocol: one connection per server.
//!
//! A [`Client`] owns a single server's session. It opens the event stream,
//! performs the initialize handshake, submits tool-call requests, and
//! correlates the responses that arrive asynchronously on the stream. A
//! background listener drives reconnection with exponential backoff and
//! recognizes server-side session reissue (an `endpoint` event carrying a new
//! session id), at which point every outstanding request fails and the
//! session is re-initialized.

use futures::future::BoxFuture;
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::protocol::{NotificationParams, Request, RequestId, Response};
use crate::transport::{ClientTransport, EndpointInfo, Message, ServerEvent};
use crate::types::{ClientInfo, InitializeResult, ToolDescription};
use crate::{Error, ErrorCode, METHOD_NOTIFICATION, PROTOCOL_VERSION};

mod multi;
pub use multi::{ConnectResult, MultiClient, ServerInfo};

#[cfg(test)]
mod test;

/// Lifecycle of a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Stream open, endpoint known, handshake not yet done.
    Connected,
    Initialized,
    /// Terminal; a closed client cannot reconnect.
    Closed,
}

/// Async callback invoked with the params of each push notification.
pub type NotificationCallback = Arc<dyn Fn(NotificationParams) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug)]
struct Shared {
    state: ConnectionState,
    message_endpoint: Option<String>,
    server_session_id: Option<String>,
    available_tools: Vec<String>,
    tool_details: HashMap<String, ToolDescription>,
}

struct ClientInner {
    transport: Arc<dyn ClientTransport>,
    config: ClientConfig,
    client_id: String,
    shared: RwLock<Shared>,
    /// Pending request table: the sole correlation point between submitted
    /// requests and streamed responses. Invalidated atomically on reconnect.
    pending: StdMutex<HashMap<RequestId, oneshot::Sender<Result<Response, Error>>>>,
    callbacks: StdMutex<HashMap<u64, NotificationCallback>>,
    callback_seq: AtomicU64,
}

impl ClientInner {
    async fn state(&self) -> ConnectionState {
        self.shared.read().await.state
    }

    async fn set_state(&self, state: ConnectionState) {
        let mut shared = self.shared.write().await;
        // Closed is terminal.
        if shared.state != ConnectionState::Closed {
            shared.state = state;
        }
    }

    /// Fails every outstanding request with an error built per entry, and
    /// clears the table.
    fn fail_pending(&self, make_error: impl Fn() -> Error) {
        let drained: Vec<_> = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.drain().collect()
        };
        for (request_id, sender) in drained {
            tracing::debug!(%request_id, "Failing pending request");
            let _ = sender.send(Err(make_error()));
        }
    }
}

/// Computes the reconnect delay for the given attempt (1-based):
/// `min(initial * 2^(attempt-1), max)`.
pub fn backoff_delay(initial: Duration, max: Duration, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(31);
    initial.saturating_mul(1u32 << exp).min(max)
}

/// A connection to a single MCP server over a [`ClientTransport`].
pub struct Client {
    inner: Arc<ClientInner>,
    listener: StdMutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Creates a client over the given transport. No connection is made
    /// until [`connect`](Self::connect).
    pub fn new(transport: Arc<dyn ClientTransport>, config: ClientConfig) -> Self {
        let client_id = Uuid::new_v4().to_string();
        tracing::info!(%client_id, "Created MCP client");
        Self {
            inner: Arc::new(ClientInner {
                transport,
                config,
                client_id,
                shared: RwLock::new(Shared {
                    state: ConnectionState::Disconnected,
                    message_endpoint: None,
                    server_session_id: None,
                    available_tools: Vec::new(),
                    tool_details: HashMap::new(),
                }),
                pending: StdMutex::new(HashMap::new()),
                callbacks: StdMutex::new(HashMap::new()),
                callback_seq: AtomicU64::new(0),
            }),
            listener: StdMutex::new(None),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    /// Probes the server, opens the event stream, and waits (bounded by the
    /// connect timeout) for the first `endpoint` event.
    pub async fn connect(&self) -> Result<(), Error> {
        match self.inner.state().await {
            ConnectionState::Closed => {
                return Err(Error::Connection("Client is closed".to_string()))
            }
            ConnectionState::Connected | ConnectionState::Initialized => {
                tracing::warn!("connect() called while already connected");
                return Ok(());
            }
            _ => {}
        }

        let health = self
            .inner
            .transport
            .health_check()
            .await
            .map_err(|e| Error::Connection(format!("Server health check failed: {e}")))?;
        tracing::info!(service = %health.service, "Server health check successful");

        self.inner.set_state(ConnectionState::Connecting).await;

        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let handle = tokio::spawn(run_listener(self.inner.clone(), endpoint_tx));
        *self.listener.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        match tokio::time::timeout(self.inner.config.connect_timeout, endpoint_rx).await {
            Ok(Ok(Ok(info))) => {
                self.inner.set_state(ConnectionState::Connected).await;
                tracing::info!(
                    endpoint = %info.endpoint,
                    session_id = %info.server_session_id,
                    "Connected"
                );
                Ok(())
            }
            Ok(Ok(Err(e))) => {
                self.abort_listener();
                self.inner.set_state(ConnectionState::Disconnected).await;
                Err(e)
            }
            Ok(Err(_)) => {
                self.abort_listener();
                self.inner.set_state(ConnectionState::Disconnected).await;
                Err(Error::Connection(
                    "Listener terminated before endpoint info arrived".to_string(),
                ))
            }
            Err(_) => {
                self.abort_listener();
                self.inner.set_state(ConnectionState::Disconnected).await;
                Err(Error::Connection(
                    "Timed out waiting for endpoint info".to_string(),
                ))
            }
        }
    }

    /// Performs the initialize handshake; on success the advertised tool
    /// names become available via [`available_tools`](Self::available_tools).
    pub async fn initialize(&self) -> Result<(), Error> {
        initialize_inner(&self.inner).await
    }

    /// Calls a tool by name with the given keyword arguments and returns the
    /// decoded result. Concurrent calls are independent.
    pub async fn call_tool(&self, name: &str, kwargs: Value) -> Result<Value, Error> {
        match self.inner.state().await {
            ConnectionState::Initialized => {}
            ConnectionState::Connected => {
                return Err(Error::Initialization(
                    "Cannot call tool: client session is not initialized".to_string(),
                ))
            }
            _ => {
                return Err(Error::Connection(
                    "Cannot call tool: client is not connected to the server".to_string(),
                ))
            }
        }

        tracing::info!(tool = %name, "Calling tool");
        let request = Request::tool_call(name, kwargs);
        match request_raw(&self.inner, request, self.inner.config.tool_call_timeout).await? {
            Some(response) => {
                if let Some(error) = response.error {
                    return Err(Error::Tool {
                        code: error.code.into(),
                        message: format!("Tool call failed: {}", error.message),
                    });
                }
                Ok(response.result.unwrap_or(Value::Null))
            }
            None => Err(Error::tool(
                ErrorCode::InternalError,
                format!("Timed out waiting for tool call response for '{name}'"),
            )),
        }
    }

    /// Registers a callback for push notifications; returns an id usable
    /// with [`remove_notification_callback`](Self::remove_notification_callback).
    pub fn add_notification_callback<F, Fut>(&self, callback: F) -> u64
    where
        F: Fn(NotificationParams) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let id = self.inner.callback_seq.fetch_add(1, Ordering::Relaxed);
        let callback: NotificationCallback = Arc::new(move |params| Box::pin(callback(params)));
        self.inner
            .callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, callback);
        tracing::debug!(callback_id = id, "Added notification callback");
        id
    }

    pub fn remove_notification_callback(&self, id: u64) -> bool {
        let removed = self
            .inner
            .callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
            .is_some();
        if removed {
            tracing::debug!(callback_id = id, "Removed notification callback");
        }
        removed
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.state().await
    }

    pub async fn is_connected(&self) -> bool {
        matches!(
            self.inner.state().await,
            ConnectionState::Connected | ConnectionState::Initialized
        )
    }

    pub async fn is_initialized(&self) -> bool {
        self.inner.state().await == ConnectionState::Initialized
    }

    pub async fn session_id(&self) -> Option<String> {
        self.inner.shared.read().await.server_session_id.clone()
    }

    /// Tool names advertised by the server during initialization.
    pub async fn available_tools(&self) -> Vec<String> {
        self.inner.shared.read().await.available_tools.clone()
    }

    /// Extended tool metadata, if fetched via `describe_tools`.
    pub async fn tool_details(&self) -> HashMap<String, ToolDescription> {
        self.inner.shared.read().await.tool_details.clone()
    }

    pub(crate) async fn set_tool_details(&self, details: HashMap<String, ToolDescription>) {
        self.inner.shared.write().await.tool_details = details;
    }

    fn abort_listener(&self) {
        if let Some(handle) = self
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }

    /// Closes the connection: cancels the listener, fails every pending
    /// request, and releases the transport. Idempotent.
    pub async fn close(&self) -> Result<(), Error> {
        {
            let mut shared = self.inner.shared.write().await;
            if shared.state == ConnectionState::Closed {
                return Ok(());
            }
            shared.state = ConnectionState::Closed;
            shared.message_endpoint = None;
            shared.server_session_id = None;
        }
        self.abort_listener();
        self.inner
            .fail_pending(|| Error::Connection("Client connection closed".to_string()));
        self.inner.transport.close().await?;
        tracing::info!(client_id = %self.inner.client_id, "Client connection closed");
        Ok(())
    }
}

/// Sends a request and waits for the correlated response. `Ok(None)` means
/// the bounded wait expired; the pending entry has been removed.
async fn request_raw(
    inner: &Arc<ClientInner>,
    request: Request,
    wait: Duration,
) -> Result<Option<Response>, Error> {
    let endpoint = inner
        .shared
        .read()
        .await
        .message_endpoint
        .clone()
        .ok_or_else(|| Error::Connection("No message endpoint available".to_string()))?;

    let request_id = request.id.clone();
    let (tx, rx) = oneshot::channel();
    inner
        .pending
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .insert(request_id.clone(), tx);

    tracing::debug!(%request_id, method = %request.method, "Sending request");
    if let Err(e) = inner
        .transport
        .submit(&endpoint, Message::Request(request))
        .await
    {
        inner
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&request_id);
        return Err(e);
    }

    match tokio::time::timeout(wait, rx).await {
        Ok(Ok(result)) => result.map(Some),
        // Sender dropped without resolution: the table was torn down.
        Ok(Err(_)) => Err(Error::Connection(
            "Connection closed while waiting for response".to_string(),
        )),
        Err(_) => {
            inner
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&request_id);
            Ok(None)
        }
    }
}

async fn initialize_inner(inner: &Arc<ClientInner>) -> Result<(), Error> {
    match inner.state().await {
        ConnectionState::Initialized => {
            tracing::warn!("Session already initialized");
            return Ok(());
        }
        ConnectionState::Connected => {}
        _ => {
            return Err(Error::Connection(
                "Cannot initialize: client is not connected to the server".to_string(),
            ))
        }
    }

    let client_info = ClientInfo {
        name: inner.config.client_name.clone(),
        version: inner.config.client_version.clone(),
    };
    let request = Request::initialize(&client_info, PROTOCOL_VERSION);
    tracing::info!("Sending initialize request");

    let response = request_raw(inner, request, inner.config.init_timeout)
        .await
        .map_err(|e| Error::Initialization(format!("Initialization failed: {e}")))?
        .ok_or_else(|| {
            Error::Initialization(
                "Timed out waiting for initialize response from server".to_string(),
            )
        })?;

    if let Some(error) = response.error {
        return Err(Error::Initialization(format!(
            "Initialize failed: {} (code: {})",
            error.message, error.code
        )));
    }

    let result: InitializeResult =
        serde_json::from_value(response.result.unwrap_or_else(|| Value::Object(Default::default())))
            .map_err(|e| Error::Initialization(format!("Malformed initialize response: {e}")))?;

    let mut shared = inner.shared.write().await;
    tracing::info!(tools = ?result.capabilities.tools, "Session initialized");
    shared.available_tools = result.capabilities.tools;
    if shared.state != ConnectionState::Closed {
        shared.state = ConnectionState::Initialized;
    }
    Ok(())
}

/// Runs for the connection's lifetime: consumes stream events and drives
/// reconnection with exponential backoff on stream failure.
async fn run_listener(
    inner: Arc<ClientInner>,
    endpoint_tx: oneshot::Sender<Result<EndpointInfo, Error>>,
) {
    let mut endpoint_tx = Some(endpoint_tx);
    let mut endpoint_received = false;
    let mut attempt: u32 = 0;

    loop {
        if inner.state().await == ConnectionState::Closed {
            break;
        }

        match inner.transport.open_event_stream(&inner.client_id).await {
            Ok(mut stream) => {
                tracing::info!("Event stream established");
                attempt = 0;
                while let Some(item) = stream.next().await {
                    if inner.state().await == ConnectionState::Closed {
                        tracing::info!("Client closed, exiting listener");
                        return;
                    }
                    match item {
                        Ok(event) => {
                            handle_event(&inner, event, &mut endpoint_received, &mut endpoint_tx)
                                .await
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Event stream error");
                            break;
                        }
                    }
                }
                tracing::info!("Event stream closed");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to open event stream");
            }
        }

        if inner.state().await == ConnectionState::Closed {
            break;
        }

        attempt += 1;
        if let Some(max) = inner.config.max_reconnect_attempts {
            if attempt >= max {
                tracing::error!("Max reconnection attempts reached, giving up");
                inner.set_state(ConnectionState::Disconnected).await;
                if let Some(tx) = endpoint_tx.take() {
                    let _ = tx.send(Err(Error::Connection(
                        "Failed to connect to event stream after multiple retries".to_string(),
                    )));
                }
                break;
            }
        }
        let delay = backoff_delay(
            inner.config.reconnect_interval,
            inner.config.max_reconnect_delay,
            attempt,
        );
        tracing::info!(attempt, ?delay, "Reconnecting after delay");
        tokio::time::sleep(delay).await;
    }
    tracing::info!("Event stream listener exiting");
}

async fn handle_event(
    inner: &Arc<ClientInner>,
    event: ServerEvent,
    endpoint_received: &mut bool,
    endpoint_tx: &mut Option<oneshot::Sender<Result<EndpointInfo, Error>>>,
) {
    match event {
        ServerEvent::Endpoint(info) => {
            let previous = inner.shared.read().await.server_session_id.clone();
            if *endpoint_received && previous.as_deref() != Some(info.server_session_id.as_str()) {
                tracing::info!(
                    new_session = %info.server_session_id,
                    old_session = ?previous,
                    "Received new session id after reconnection"
                );
                // Outstanding requests belong to the old session. They must
                // be failed before the new endpoint is published, so that a
                // concurrent call can never register against the old session
                // and then submit to the new one.
                inner.fail_pending(|| {
                    Error::Connection("Session reinitialized after reconnection".to_string())
                });
                {
                    let mut shared = inner.shared.write().await;
                    shared.message_endpoint = Some(info.endpoint.clone());
                    shared.server_session_id = Some(info.server_session_id.clone());
                    if shared.state == ConnectionState::Initialized {
                        shared.state = ConnectionState::Connected;
                    }
                }

                let inner = inner.clone();
                tokio::spawn(async move {
                    tracing::info!("Reinitializing session after reconnection");
                    if let Err(e) = initialize_inner(&inner).await {
                        tracing::error!(error = %e, "Failed to reinitialize session after reconnection");
                        inner.set_state(ConnectionState::Disconnected).await;
                    }
                });
            } else if !*endpoint_received {
                *endpoint_received = true;
                {
                    let mut shared = inner.shared.write().await;
                    shared.message_endpoint = Some(info.endpoint.clone());
                    shared.server_session_id = Some(info.server_session_id.clone());
                }
                if let Some(tx) = endpoint_tx.take() {
                    let _ = tx.send(Ok(info));
                }
            }
        }
        ServerEvent::Message(message) => handle_message(inner, message).await,
        ServerEvent::Ping(count) => {
            tracing::debug!(count, "Received ping");
        }
    }
}

async fn handle_message(inner: &Arc<ClientInner>, message: Message) {
    match message {
        Message::Response(response) => {
            let Some(request_id) = response.id.clone() else {
                tracing::warn!("Received response without id");
                return;
            };
            let sender = inner
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&request_id);
            match sender {
                // A dropped receiver (timed-out caller) makes this send a
                // no-op, which is the required duplicate/late-resolution
                // behavior.
                Some(tx) => {
                    tracing::debug!(%request_id, "Resolved pending request");
                    let _ = tx.send(Ok(response));
                }
                None => {
                    tracing::warn!(%request_id, "Response with no matching pending request");
                }
            }
        }
        Message::Notification(notification) if notification.method == METHOD_NOTIFICATION => {
            let params: NotificationParams = match notification
                .params
                .map(serde_json::from_value)
                .transpose()
            {
                Ok(Some(params)) => params,
                Ok(None) => {
                    tracing::warn!("Notification without params");
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Malformed notification params");
                    return;
                }
            };
            tracing::info!(
                notification_type = %params.notification_type,
                message = %params.message,
                "Received notification"
            );
            let callbacks: Vec<NotificationCallback> = inner
                .callbacks
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .values()
                .cloned()
                .collect();
            for callback in callbacks {
                callback(params.clone()).await;
            }
        }
        other => {
            tracing::warn!(?other, "Received unexpected message");
        }
    }
}

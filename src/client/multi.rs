//! Multi-server orchestration: one [`Client`] per configured alias.

use futures::future::{join_all, BoxFuture};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::client::Client;
use crate::config::{ClientConfig, Config, McpServerEntry};
use crate::protocol::NotificationParams;
use crate::transport::ClientTransport;
use crate::types::ToolDescription;
use crate::{Error, DESCRIBE_TOOLS};

/// Per-alias outcome of [`MultiClient::connect_all`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectResult {
    pub success: bool,
    pub error: Option<String>,
}

/// Per-alias status snapshot from [`MultiClient::server_info`].
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub status: String,
    pub initialized: bool,
    pub available_tools: Vec<String>,
    pub tool_details: HashMap<String, ToolDescription>,
}

/// Client for many independent MCP servers, addressed by alias.
pub struct MultiClient {
    transports: HashMap<String, Arc<dyn ClientTransport>>,
    config: ClientConfig,
    clients: RwLock<HashMap<String, Arc<Client>>>,
}

impl MultiClient {
    /// Creates a multi-client over the given alias → transport map.
    pub fn new(transports: HashMap<String, Arc<dyn ClientTransport>>, config: ClientConfig) -> Self {
        tracing::info!(servers = transports.len(), "Initialized MultiClient");
        Self {
            transports,
            config,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Builds a multi-client from a loaded [`Config`], mapping each
    /// configured server entry through a transport factory.
    pub fn from_config(
        config: &Config,
        client_config: ClientConfig,
        transport_for: impl Fn(&McpServerEntry) -> Arc<dyn ClientTransport>,
    ) -> Self {
        let transports = config
            .mcp_servers
            .iter()
            .map(|(alias, entry)| (alias.clone(), transport_for(entry)))
            .collect();
        Self::new(transports, client_config)
    }

    async fn connect_and_init_single(
        &self,
        alias: &str,
        transport: Arc<dyn ClientTransport>,
    ) -> Result<Arc<Client>, String> {
        // A repeated connect_all must not leak the alias's previous client:
        // its listener and server session are released before the new
        // connection is attempted.
        let previous = self.clients.write().await.remove(alias);
        if let Some(previous) = previous {
            tracing::info!(%alias, "Closing previous connection before reconnecting");
            if let Err(e) = previous.close().await {
                tracing::warn!(%alias, error = %e, "Error closing previous client");
            }
        }

        tracing::info!(%alias, "Attempting connection to server");
        let mut config = self.config.clone();
        config.client_name = format!("{}_{alias}", self.config.client_name);
        let client = Arc::new(Client::new(transport, config));

        if let Err(e) = client.connect().await {
            tracing::error!(%alias, error = %e, "Connection failed");
            let _ = client.close().await;
            return Err(e.to_string());
        }
        if let Err(e) = client.initialize().await {
            tracing::error!(%alias, error = %e, "Initialization failed after connection");
            let _ = client.close().await;
            return Err(e.to_string());
        }
        tracing::info!(%alias, "Successfully connected and initialized server");
        Ok(client)
    }

    /// Connects and initializes every configured alias concurrently.
    ///
    /// Failed aliases are closed and discarded; partial success is not an
    /// error. Afterwards, extended tool metadata is fetched from every alias
    /// that advertises `describe_tools` (failures degrade to empty metadata).
    pub async fn connect_all(&self) -> HashMap<String, ConnectResult> {
        let attempts = self.transports.iter().map(|(alias, transport)| {
            let alias = alias.clone();
            let transport = transport.clone();
            async move {
                let outcome = self.connect_and_init_single(&alias, transport).await;
                (alias, outcome)
            }
        });

        tracing::info!(
            servers = self.transports.len(),
            "Starting concurrent connection attempts"
        );
        let outcomes = join_all(attempts).await;

        let mut results = HashMap::new();
        let mut connected = 0usize;
        {
            let mut clients = self.clients.write().await;
            for (alias, outcome) in outcomes {
                match outcome {
                    Ok(client) => {
                        clients.insert(alias.clone(), client);
                        connected += 1;
                        results.insert(
                            alias,
                            ConnectResult {
                                success: true,
                                error: None,
                            },
                        );
                    }
                    Err(error) => {
                        results.insert(
                            alias,
                            ConnectResult {
                                success: false,
                                error: Some(error),
                            },
                        );
                    }
                }
            }
        }
        tracing::info!(
            connected,
            total = self.transports.len(),
            "Finished connection attempts"
        );

        self.fetch_tool_details().await;
        results
    }

    async fn fetch_tool_details(&self) {
        let clients: Vec<(String, Arc<Client>)> = self
            .clients
            .read()
            .await
            .iter()
            .map(|(alias, client)| (alias.clone(), client.clone()))
            .collect();

        for (alias, client) in clients {
            if !client
                .available_tools()
                .await
                .iter()
                .any(|name| name == DESCRIBE_TOOLS)
            {
                client.set_tool_details(HashMap::new()).await;
                continue;
            }
            tracing::info!(%alias, "Fetching detailed tool information");
            match client.call_tool(DESCRIBE_TOOLS, Value::Object(Default::default())).await {
                Ok(result) => match serde_json::from_value::<HashMap<String, ToolDescription>>(result)
                {
                    Ok(details) => {
                        tracing::info!(%alias, tools = details.len(), "Retrieved tool details");
                        client.set_tool_details(details).await;
                    }
                    Err(e) => {
                        tracing::warn!(%alias, error = %e, "Malformed describe_tools result");
                        client.set_tool_details(HashMap::new()).await;
                    }
                },
                Err(e) => {
                    tracing::warn!(%alias, error = %e, "Failed to fetch tool details");
                    client.set_tool_details(HashMap::new()).await;
                }
            }
        }
    }

    /// Calls a tool on the named alias. An unknown alias is an error, not a
    /// silent no-op.
    pub async fn call_tool(&self, alias: &str, name: &str, kwargs: Value) -> Result<Value, Error> {
        let client = self
            .clients
            .read()
            .await
            .get(alias)
            .cloned()
            .ok_or_else(|| Error::Connection(format!("Unknown server alias: {alias}")))?;
        tracing::info!(%alias, tool = %name, "Calling tool on server");
        client.call_tool(name, kwargs).await
    }

    /// Status snapshot of every connected alias.
    pub async fn server_info(&self) -> HashMap<String, ServerInfo> {
        let clients = self.clients.read().await;
        let mut info = HashMap::new();
        for (alias, client) in clients.iter() {
            let initialized = client.is_initialized().await;
            info.insert(
                alias.clone(),
                ServerInfo {
                    status: if client.is_connected().await {
                        "connected".to_string()
                    } else {
                        "disconnected".to_string()
                    },
                    initialized,
                    available_tools: if initialized {
                        client.available_tools().await
                    } else {
                        Vec::new()
                    },
                    tool_details: if initialized {
                        client.tool_details().await
                    } else {
                        HashMap::new()
                    },
                },
            );
        }
        info
    }

    /// Adds a notification callback for one alias, or for every currently
    /// connected alias when `alias` is `None`. The callback receives the
    /// originating alias alongside the notification params.
    pub async fn add_notification_callback<F, Fut>(&self, alias: Option<&str>, callback: F)
    where
        F: Fn(String, NotificationParams) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let callback: Arc<dyn Fn(String, NotificationParams) -> BoxFuture<'static, ()> + Send + Sync> =
            Arc::new(move |alias, params| Box::pin(callback(alias, params)));

        let clients = self.clients.read().await;
        match alias {
            None => {
                for (alias, client) in clients.iter() {
                    Self::add_wrapped_callback(alias, client, callback.clone());
                }
            }
            Some(alias) => match clients.get(alias) {
                Some(client) => Self::add_wrapped_callback(alias, client, callback),
                None => {
                    tracing::warn!(%alias, "Cannot add callback: unknown server alias");
                }
            },
        }
    }

    fn add_wrapped_callback(
        alias: &str,
        client: &Arc<Client>,
        callback: Arc<dyn Fn(String, NotificationParams) -> BoxFuture<'static, ()> + Send + Sync>,
    ) {
        let alias = alias.to_string();
        client.add_notification_callback(move |params| {
            let callback = callback.clone();
            let alias = alias.clone();
            async move { callback(alias, params).await }
        });
    }

    /// Closes every managed connection concurrently and clears the map.
    pub async fn close(&self) {
        tracing::info!("Closing all client connections");
        let clients: Vec<Arc<Client>> = {
            let mut map = self.clients.write().await;
            map.drain().map(|(_, client)| client).collect()
        };
        let closes = clients.iter().map(|client| async move {
            if let Err(e) = client.close().await {
                tracing::error!(error = %e, "Error closing client");
            }
        });
        join_all(closes).await;
        tracing::info!("All client connections closed");
    }
}

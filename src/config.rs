//! Configuration surface: tuning knobs with environment overrides, plus a
//! JSON config file mapping server aliases to URLs.

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Client tuning: timeouts and the reconnect budget.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Name announced in `clientInfo` during initialization.
    pub client_name: String,
    pub client_version: String,
    /// Initial delay between reconnection attempts; doubles per attempt.
    pub reconnect_interval: Duration,
    /// Maximum reconnection attempts; `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
    /// Cap on the backoff delay.
    pub max_reconnect_delay: Duration,
    /// Bound on waiting for the first `endpoint` event.
    pub connect_timeout: Duration,
    /// Bound on waiting for the initialize response.
    pub init_timeout: Duration,
    /// Bound on waiting for a tool-call response.
    pub tool_call_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_name: "mcp-sse-client".to_string(),
            client_version: "0.3.0".to_string(),
            reconnect_interval: Duration::from_secs(1),
            max_reconnect_attempts: Some(5),
            max_reconnect_delay: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            init_timeout: Duration::from_secs(10),
            tool_call_timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `MCP_*` environment variables. Unparsable
    /// values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(secs) = env_f64("MCP_RECONNECT_INTERVAL") {
            config.reconnect_interval = Duration::from_secs_f64(secs);
        }
        if let Some(attempts) = env_i64("MCP_MAX_RECONNECT_ATTEMPTS") {
            config.max_reconnect_attempts = if attempts < 0 {
                None
            } else {
                Some(attempts as u32)
            };
        }
        if let Some(secs) = env_f64("MCP_MAX_RECONNECT_DELAY") {
            config.max_reconnect_delay = Duration::from_secs_f64(secs);
        }
        if let Some(secs) = env_f64("MCP_CONNECT_TIMEOUT") {
            config.connect_timeout = Duration::from_secs_f64(secs);
        }
        if let Some(secs) = env_f64("MCP_INIT_TIMEOUT") {
            config.init_timeout = Duration::from_secs_f64(secs);
        }
        if let Some(secs) = env_f64("MCP_TOOL_CALL_TIMEOUT") {
            config.tool_call_timeout = Duration::from_secs_f64(secs);
        }
        config
    }
}

/// Server tuning: bind address, keep-alive interval, and the per-session
/// outbound queue bound.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Keep-alive emission interval.
    pub ping_interval: Duration,
    /// Bound on each session's outbound queue; events to a stalled client
    /// are dropped rather than queued without limit.
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            ping_interval: Duration::from_secs(30),
            queue_capacity: 256,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(host) = std::env::var("MCP_HOST") {
            config.host = host;
        }
        if let Some(port) = env_i64("MCP_PORT") {
            config.port = port as u16;
        }
        if let Some(secs) = env_f64("MCP_PING_INTERVAL") {
            config.ping_interval = Duration::from_secs_f64(secs);
        }
        config
    }
}

fn env_f64(key: &str) -> Option<f64> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(%key, %raw, "Ignoring unparsable environment override");
            None
        }
    }
}

fn env_i64(key: &str) -> Option<i64> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(%key, %raw, "Ignoring unparsable environment override");
            None
        }
    }
}

/// One configured server in the JSON config file.
#[derive(Debug, Deserialize)]
pub struct McpServerEntry {
    pub url: String,
    #[serde(default)]
    pub client_id: Option<String>,
}

/// JSON config document mapping server aliases to URLs.
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(rename = "mcpServers")]
    pub mcp_servers: HashMap<String, McpServerEntry>,
}

impl Config {
    pub fn load_config(path: &str) -> anyhow::Result<Config> {
        let data = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&data)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = ClientConfig::default();
        assert_eq!(config.reconnect_interval, Duration::from_secs(1));
        assert_eq!(config.max_reconnect_attempts, Some(5));
        assert_eq!(config.max_reconnect_delay, Duration::from_secs(60));
        assert_eq!(config.tool_call_timeout, Duration::from_secs(30));

        let server = ServerConfig::default();
        assert_eq!(server.ping_interval, Duration::from_secs(30));
        assert_eq!(server.port, 8000);
    }

    #[test]
    fn load_config_parses_server_map() {
        let dir = std::env::temp_dir().join(format!("mcp-sse-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        let json = r#"
        {
            "mcpServers": {
                "server1": { "url": "http://localhost:8101" },
                "server2": { "url": "http://localhost:8102", "client_id": "fixed-client" }
            }
        }
        "#;
        std::fs::write(&path, json).unwrap();

        let config = Config::load_config(path.to_str().unwrap()).unwrap();
        assert!(config.mcp_servers.contains_key("server1"));
        assert_eq!(config.mcp_servers["server2"].url, "http://localhost:8102");
        assert_eq!(
            config.mcp_servers["server2"].client_id.as_deref(),
            Some("fixed-client")
        );

        std::fs::remove_dir_all(&dir).ok();
    }
}

//! Common types shared by the client and server halves of the protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Client identity sent in the `clientInfo` member of an initialize request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    #[serde(default = "default_client_version")]
    pub version: String,
}

fn default_client_version() -> String {
    "1.0.0".to_string()
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "mcp-sse-client".to_string(),
            version: default_client_version(),
        }
    }
}

/// Capabilities advertised by a server in its initialize response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default)]
    pub tools: Vec<String>,
}

/// The result member of a successful initialize response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitializeResult {
    #[serde(default)]
    pub capabilities: ServerCapabilities,
}

/// Severity/kind of a push notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Info,
    Warning,
    Error,
    Data,
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NotificationType::Info => "info",
            NotificationType::Warning => "warning",
            NotificationType::Error => "error",
            NotificationType::Data => "data",
        };
        write!(f, "{name}")
    }
}

/// Declared metadata for one tool parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    /// Declared type hint, e.g. "string", "integer", "object".
    #[serde(rename = "type")]
    pub type_name: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn required(name: &str, type_name: &str) -> Self {
        Self {
            name: name.to_string(),
            type_name: type_name.to_string(),
            required: true,
            default: None,
        }
    }

    pub fn optional(name: &str, type_name: &str, default: Value) -> Self {
        Self {
            name: name.to_string(),
            type_name: type_name.to_string(),
            required: false,
            default: Some(default),
        }
    }
}

/// Introspection record for one tool, as returned by `describe_tools`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolDescription {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: HashMap<String, ParamDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<String>,
}

/// One parameter entry inside a [`ToolDescription`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDescription {
    #[serde(rename = "type")]
    pub type_name: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// Status payload returned by a server's liveness endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
    pub active_sessions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_type_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&NotificationType::Warning).unwrap(),
            "\"warning\""
        );
        let parsed: NotificationType = serde_json::from_str("\"data\"").unwrap();
        assert_eq!(parsed, NotificationType::Data);
    }

    #[test]
    fn initialize_result_tolerates_missing_capabilities() {
        let parsed: InitializeResult = serde_json::from_str("{}").unwrap();
        assert!(parsed.capabilities.tools.is_empty());
    }
}

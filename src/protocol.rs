//! JSON-RPC envelope types and request-id generation.
//!
//! Everything here maps 1:1 onto the wire format: field names such as
//! `protocolVersion`, `clientInfo`, and `kwargs` are part of the protocol and
//! must not be renamed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::{ClientInfo, NotificationType};
use crate::{ErrorCode, JSONRPC_VERSION, METHOD_INITIALIZE, METHOD_NOTIFICATION, METHOD_TOOL_CALL};

/// A JSON-RPC request id. The protocol generates string ids but accepts
/// numeric ids from peers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::String(s) => write!(f, "{s}"),
            RequestId::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

/// Generates a unique request id with the given prefix (`init` / `call`).
pub fn generate_request_id(prefix: &str) -> RequestId {
    RequestId::String(format!("{prefix}-{}", Uuid::new_v4()))
}

/// A JSON-RPC request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    pub id: RequestId,
}

impl Request {
    pub fn new(method: &str, params: Option<Value>, id: RequestId) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
            id,
        }
    }

    /// Builds an `initialize` request announcing the client's identity and
    /// the protocol version it speaks.
    pub fn initialize(client_info: &ClientInfo, protocol_version: &str) -> Self {
        Self::new(
            METHOD_INITIALIZE,
            Some(serde_json::json!({
                "protocolVersion": protocol_version,
                "capabilities": {},
                "clientInfo": client_info,
            })),
            generate_request_id("init"),
        )
    }

    /// Builds a `tools/call` request for the named tool with the given
    /// keyword arguments.
    pub fn tool_call(name: &str, kwargs: Value) -> Self {
        Self::new(
            METHOD_TOOL_CALL,
            Some(serde_json::json!({
                "name": name,
                "kwargs": kwargs,
            })),
            generate_request_id("call"),
        )
    }
}

/// The error member of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A JSON-RPC response envelope, success or error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
}

impl Response {
    /// Builds a success response carrying `result`.
    pub fn success(result: Value, id: Option<RequestId>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Builds an error response with the given code and message.
    pub fn error(code: ErrorCode, message: impl Into<String>, id: Option<RequestId>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(RpcError {
                code: code.code(),
                message: message.into(),
                data: None,
            }),
            id,
        }
    }
}

/// Parameters carried by a push notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationParams {
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub message: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl NotificationParams {
    /// Stamps the notification with the current time in ISO-8601 form.
    pub fn new(notification_type: NotificationType, message: String, data: Option<Value>) -> Self {
        Self {
            notification_type,
            message,
            timestamp: chrono::Local::now().to_rfc3339(),
            data,
        }
    }
}

/// A JSON-RPC notification envelope (no id, never answered).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
        }
    }

    /// Builds a push notification carrying [`NotificationParams`].
    pub fn push(params: &NotificationParams) -> Result<Self, crate::Error> {
        Ok(Self::new(
            METHOD_NOTIFICATION,
            Some(serde_json::to_value(params)?),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn initialize_request_has_wire_field_names() {
        let info = ClientInfo {
            name: "test-client".to_string(),
            version: "1.0.0".to_string(),
        };
        let request = Request::initialize(&info, "0.3.0");
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["method"], "initialize");
        assert_eq!(value["params"]["protocolVersion"], "0.3.0");
        assert_eq!(value["params"]["clientInfo"]["name"], "test-client");
        assert!(value["id"].as_str().unwrap().starts_with("init-"));
    }

    #[test]
    fn tool_call_request_carries_kwargs() {
        let request = Request::tool_call("echo", serde_json::json!({"text": "hi"}));
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["method"], "tools/call");
        assert_eq!(value["params"]["name"], "echo");
        assert_eq!(value["params"]["kwargs"]["text"], "hi");
        assert!(value["id"].as_str().unwrap().starts_with("call-"));
    }

    #[test]
    fn request_ids_are_unique() {
        let a = generate_request_id("call");
        let b = generate_request_id("call");
        assert_ne!(a, b);
    }

    #[test]
    fn request_id_accepts_numbers() {
        let id: RequestId = serde_json::from_str("17").unwrap();
        assert_eq!(id, RequestId::Number(17));
        let id: RequestId = serde_json::from_str("\"call-abc\"").unwrap();
        assert_eq!(id, RequestId::String("call-abc".to_string()));
    }

    #[test]
    fn error_response_serializes_code() {
        let response = Response::error(
            ErrorCode::ToolNotFound,
            "Tool not found: nope",
            Some(RequestId::from("call-1")),
        );
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["error"]["code"], -32051);
        assert!(value.get("result").is_none());
    }

    #[test]
    fn notification_has_no_id() {
        let params = NotificationParams::new(NotificationType::Info, "hello".to_string(), None);
        let notification = Notification::push(&params).unwrap();
        let value = serde_json::to_value(&notification).unwrap();
        assert_eq!(value["method"], "notification");
        assert_eq!(value["params"]["type"], "info");
        assert!(value.get("id").is_none());
    }
}

//! Transport seam between the protocol core and the HTTP/SSE plumbing.
//!
//! The core never opens sockets itself. A [`ClientTransport`] supplies three
//! primitives: a liveness probe, a (re)openable event stream, and a
//! fire-and-forget request submission that is acknowledged immediately (the
//! response arrives later on the stream). The in-process
//! [`channel::ChannelTransport`] implements the seam against a local
//! [`crate::server::McpServer`].

use async_trait::async_trait;
use futures::Stream;
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;

use crate::protocol::{Notification, Request, Response};
use crate::types::HealthStatus;
use crate::Error;

pub mod channel;

/// A JSON-RPC envelope that can travel over a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

// Classify an incoming JSON object per JSON-RPC 2.0: `id` + `method` is a
// request, `id` + `result`/`error` is a response, `method` alone is a
// notification.
struct MessageVisitor;

impl<'de> Visitor<'de> for MessageVisitor {
    type Value = Message;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a valid JSON-RPC 2.0 message")
    }

    fn visit_map<M>(self, mut map: M) -> Result<Self::Value, M::Error>
    where
        M: MapAccess<'de>,
    {
        let mut obj = serde_json::Map::new();
        while let Some(key) = map.next_key::<String>()? {
            let value = map.next_value()?;
            obj.insert(key, value);
        }
        let value = serde_json::Value::Object(obj);

        if value.get("id").is_some() {
            if value.get("method").is_some() {
                Ok(Message::Request(
                    Request::deserialize(value).map_err(de::Error::custom)?,
                ))
            } else if value.get("result").is_some() || value.get("error").is_some() {
                Ok(Message::Response(
                    Response::deserialize(value).map_err(de::Error::custom)?,
                ))
            } else {
                Err(de::Error::custom(
                    "invalid message: 'id' present without 'method' or 'result/error'",
                ))
            }
        } else if value.get("method").is_some() {
            Ok(Message::Notification(
                Notification::deserialize(value).map_err(de::Error::custom)?,
            ))
        } else {
            Err(de::Error::custom("invalid message: missing 'id' and 'method'"))
        }
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(MessageVisitor)
    }
}

impl Serialize for Message {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Message::Request(req) => req.serialize(serializer),
            Message::Response(resp) => resp.serialize(serializer),
            Message::Notification(notif) => notif.serialize(serializer),
        }
    }
}

/// Session (re)establishment payload carried by the `endpoint` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointInfo {
    /// Submission address for this session's requests.
    pub endpoint: String,
    pub server_session_id: String,
}

/// One event received on (or queued onto) a session's stream.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// First event of every stream; repeated with a new session id after a
    /// server-side reconnection.
    Endpoint(EndpointInfo),
    /// A JSON-RPC response or notification.
    Message(Message),
    /// Keep-alive counter; ignorable.
    Ping(u64),
}

/// A stream of events from a server, ending on disconnect.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<ServerEvent, Error>> + Send>>;

/// Client-side transport primitives the protocol core is built on.
#[async_trait]
pub trait ClientTransport: Send + Sync + 'static {
    /// Probes the server's liveness endpoint.
    async fn health_check(&self) -> Result<HealthStatus, Error>;

    /// Opens a fresh event stream, announcing the given client id. Called
    /// again after a stream failure to reconnect.
    async fn open_event_stream(&self, client_id: &str) -> Result<EventStream, Error>;

    /// Submits a request envelope to the session's endpoint. The transport
    /// only acknowledges receipt; the response arrives on the event stream.
    async fn submit(&self, endpoint: &str, message: Message) -> Result<(), Error>;

    /// Releases the transport. Streams opened earlier terminate.
    async fn close(&self) -> Result<(), Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RequestId;
    use pretty_assertions::assert_eq;

    #[test]
    fn classifies_response() {
        let json = r#"{"jsonrpc":"2.0","result":{"ok":true},"id":"call-1"}"#;
        match serde_json::from_str::<Message>(json).unwrap() {
            Message::Response(resp) => {
                assert_eq!(resp.id, Some(RequestId::from("call-1")));
                assert_eq!(resp.result.unwrap()["ok"], true);
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn classifies_request() {
        let json = r#"{"jsonrpc":"2.0","method":"tools/call","params":{"name":"echo","kwargs":{}},"id":"call-2"}"#;
        match serde_json::from_str::<Message>(json).unwrap() {
            Message::Request(req) => assert_eq!(req.method, "tools/call"),
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn classifies_notification() {
        let json = r#"{"jsonrpc":"2.0","method":"notification","params":{"type":"info","message":"hi","timestamp":"t"}}"#;
        match serde_json::from_str::<Message>(json).unwrap() {
            Message::Notification(notif) => assert_eq!(notif.method, "notification"),
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[test]
    fn rejects_bare_id() {
        let json = r#"{"jsonrpc":"2.0","id":"x"}"#;
        assert!(serde_json::from_str::<Message>(json).is_err());
    }

    #[test]
    fn serializes_without_wrapper() {
        let message = Message::Response(Response::success(
            serde_json::json!({"ok": true}),
            Some(RequestId::from("call-3")),
        ));
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["id"], "call-3");
        assert!(value.get("type").is_none());
    }
}

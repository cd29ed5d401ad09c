//! In-process transport pairing a [`Client`](crate::client::Client) with an
//! [`McpServer`](crate::server::McpServer) without any HTTP plumbing.
//!
//! Opening an event stream opens a real server session; submitting a request
//! runs the server's dispatcher directly. Dropping the stream (or closing the
//! transport) tears the session down, so reconnection and session-reissue
//! behavior is exercised exactly as over a network. `close` ends every live
//! session but leaves the transport usable, the way an HTTP client can
//! reconnect after its connections are dropped.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::server::McpServer;
use crate::transport::{ClientTransport, EventStream, Message};
use crate::types::HealthStatus;
use crate::Error;

pub struct ChannelTransport {
    server: Arc<McpServer>,
    /// Sessions with a live stream; an id is dropped when its stream ends.
    open_sessions: Arc<Mutex<Vec<String>>>,
}

impl ChannelTransport {
    pub fn new(server: Arc<McpServer>) -> Self {
        Self {
            server,
            open_sessions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn session_id_from_endpoint(endpoint: &str) -> Result<&str, Error> {
        endpoint
            .split("session_id=")
            .nth(1)
            .map(|rest| rest.split('&').next().unwrap_or(rest))
            .ok_or_else(|| {
                Error::Connection(format!("Endpoint missing session_id: {endpoint}"))
            })
    }

    #[cfg(test)]
    fn tracked_sessions(&self) -> usize {
        self.open_sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[async_trait]
impl ClientTransport for ChannelTransport {
    async fn health_check(&self) -> Result<HealthStatus, Error> {
        Ok(self.server.health())
    }

    async fn open_event_stream(&self, client_id: &str) -> Result<EventStream, Error> {
        let mut handle = self.server.open_session(Some(client_id)).await;
        self.open_sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle.session_id.clone());

        let session_id = handle.session_id.clone();
        let open_sessions = self.open_sessions.clone();
        let stream = async_stream::stream! {
            while let Some(event) = handle.events.recv().await {
                yield Ok(event);
            }
            // Sender gone: the session was closed. Stop tracking it.
            open_sessions
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .retain(|id| id != &session_id);
        };
        Ok(Box::pin(stream))
    }

    async fn submit(&self, endpoint: &str, message: Message) -> Result<(), Error> {
        let session_id = Self::session_id_from_endpoint(endpoint)?.to_string();
        let body = serde_json::to_value(&message)?;
        self.server.handle_request(Some(&session_id), body).await
    }

    async fn close(&self) -> Result<(), Error> {
        let sessions: Vec<String> = self
            .open_sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for session_id in sessions {
            self.server.close_session(&session_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ServerEvent;
    use futures::StreamExt;

    #[tokio::test]
    async fn stream_starts_with_endpoint_event() {
        let server = Arc::new(McpServer::new("channel-test"));
        let transport = ChannelTransport::new(server.clone());

        let mut stream = transport.open_event_stream("client-1").await.unwrap();
        match stream.next().await.unwrap().unwrap() {
            ServerEvent::Endpoint(info) => {
                assert!(info.endpoint.contains(&info.server_session_id));
            }
            other => panic!("expected endpoint event, got {other:?}"),
        }
        assert_eq!(server.session_count(), 1);
    }

    #[tokio::test]
    async fn close_tears_down_sessions_and_allows_reconnect() {
        let server = Arc::new(McpServer::new("channel-test"));
        let transport = ChannelTransport::new(server.clone());

        let _stream = transport.open_event_stream("client-1").await.unwrap();
        assert_eq!(server.session_count(), 1);

        transport.close().await.unwrap();
        assert_eq!(server.session_count(), 0);

        // A closed transport can open a fresh session, like an HTTP client
        // reconnecting.
        let _stream = transport.open_event_stream("client-1").await.unwrap();
        assert_eq!(server.session_count(), 1);
    }

    #[tokio::test]
    async fn ended_stream_is_forgotten() {
        let server = Arc::new(McpServer::new("channel-test"));
        let transport = ChannelTransport::new(server.clone());

        let mut stream = transport.open_event_stream("client-1").await.unwrap();
        assert_eq!(transport.tracked_sessions(), 1);

        let session_id = match stream.next().await.unwrap().unwrap() {
            ServerEvent::Endpoint(info) => info.server_session_id,
            other => panic!("expected endpoint event, got {other:?}"),
        };
        server.close_session(&session_id);
        while stream.next().await.is_some() {}

        assert_eq!(transport.tracked_sessions(), 0);
    }

    #[test]
    fn parses_session_id_from_endpoint() {
        let id = ChannelTransport::session_id_from_endpoint("/messages?session_id=abc-123").unwrap();
        assert_eq!(id, "abc-123");
        assert!(ChannelTransport::session_id_from_endpoint("/messages").is_err());
    }
}

//! # MCP over SSE for Rust
//!
//! This crate implements both sides of an MCP-style bidirectional RPC and
//! push-notification protocol over a long-lived streaming transport. A client
//! submits JSON-RPC requests over a short-lived request channel and receives
//! the matching responses, out-of-band notifications, and keep-alive pings on
//! a single persistent event stream; a server tracks one session per stream
//! and routes everything back through that session's outbound queue.
//!
//! ## Features
//!
//! - JSON-RPC 2.0 envelopes with type-safe message classification
//! - Client connection state machine with reconnect-and-backoff and
//!   request/response correlation across the event stream
//! - Server-side session registry with per-session keep-alive and FIFO
//!   outbound delivery
//! - Tool registry with declared parameter metadata and a built-in
//!   `describe_tools` introspection tool
//! - One-shot and periodic push-notification scheduling with cancellation
//! - Multi-server orchestration with per-alias tool routing and notification
//!   fan-out
//! - Async/await support using Tokio
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mcp_sse_rs::client::Client;
//! use mcp_sse_rs::config::ClientConfig;
//! use mcp_sse_rs::server::McpServer;
//! use mcp_sse_rs::transport::channel::ChannelTransport;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Arc::new(McpServer::new("example-server"));
//!     let transport = ChannelTransport::new(server.clone());
//!
//!     let client = Client::new(Arc::new(transport), ClientConfig::default());
//!     client.connect().await?;
//!     client.initialize().await?;
//!
//!     // Use the client...
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! The HTTP/SSE plumbing itself sits behind the [`transport::ClientTransport`]
//! trait; [`transport::channel::ChannelTransport`] wires a client directly to
//! an in-process [`server::McpServer`].

/// Client module provides the MCP client connection and multi-server client
pub mod client;
/// Configuration surface (JSON file + environment overrides)
pub mod config;
/// Error types and JSON-RPC error codes
pub mod error;
/// JSON-RPC envelope types and request-id generation
pub mod protocol;
/// Server module provides the session registry, dispatch, and notification scheduling
pub mod server;
/// Transport seam: message codec, event types, and the in-process channel transport
pub mod transport;
/// Common types used throughout the crate
pub mod types;

// Re-export commonly used types for convenience
pub use error::{Error, ErrorCode};
pub use protocol::{Notification, Request, RequestId, Response};
pub use types::*;

/// Protocol version announced during the initialize handshake.
pub const PROTOCOL_VERSION: &str = "0.3.0";

/// JSON-RPC version used by the protocol.
///
/// All envelopes carry this version string; anything else is rejected as an
/// invalid request.
pub const JSONRPC_VERSION: &str = "2.0";

/// Method name for the initialize handshake.
pub const METHOD_INITIALIZE: &str = "initialize";
/// Method name for invoking a registered tool.
pub const METHOD_TOOL_CALL: &str = "tools/call";
/// Method name carried by push notifications.
pub const METHOD_NOTIFICATION: &str = "notification";

/// Stream event announcing the submission endpoint and session id.
pub const EVENT_ENDPOINT: &str = "endpoint";
/// Stream event carrying a JSON-RPC envelope.
pub const EVENT_MESSAGE: &str = "message";
/// Keep-alive stream event.
pub const EVENT_PING: &str = "ping";

/// Name of the built-in tool-introspection tool.
pub const DESCRIBE_TOOLS: &str = "describe_tools";

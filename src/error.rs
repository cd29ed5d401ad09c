//! Error types for the crate, mirroring the protocol's error taxonomy.

use serde::{Deserialize, Serialize};

/// JSON-RPC error codes used on the wire.
///
/// The standard range comes from the JSON-RPC 2.0 specification; the
/// `-320xx` values are protocol-specific extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    ServerNotInitialized,
    ServerAlreadyInitialized,
    InvalidSession,
    ToolExecutionError,
    ToolNotFound,
    SessionExpired,
    /// Any code this crate does not recognise.
    Other(i64),
}

impl ErrorCode {
    pub fn code(&self) -> i64 {
        match self {
            ErrorCode::ParseError => -32700,
            ErrorCode::InvalidRequest => -32600,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::InternalError => -32603,
            ErrorCode::ServerNotInitialized => -32002,
            ErrorCode::ServerAlreadyInitialized => -32003,
            ErrorCode::InvalidSession => -32004,
            ErrorCode::ToolExecutionError => -32050,
            ErrorCode::ToolNotFound => -32051,
            ErrorCode::SessionExpired => -32060,
            ErrorCode::Other(code) => *code,
        }
    }
}

impl From<i64> for ErrorCode {
    fn from(code: i64) -> Self {
        match code {
            -32700 => ErrorCode::ParseError,
            -32600 => ErrorCode::InvalidRequest,
            -32601 => ErrorCode::MethodNotFound,
            -32602 => ErrorCode::InvalidParams,
            -32603 => ErrorCode::InternalError,
            -32002 => ErrorCode::ServerNotInitialized,
            -32003 => ErrorCode::ServerAlreadyInitialized,
            -32004 => ErrorCode::InvalidSession,
            -32050 => ErrorCode::ToolExecutionError,
            -32051 => ErrorCode::ToolNotFound,
            -32060 => ErrorCode::SessionExpired,
            other => ErrorCode::Other(other),
        }
    }
}

impl From<ErrorCode> for i64 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Errors raised by clients, servers, and the transport seam.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport unreachable, health probe failed, or the reconnect budget
    /// was exhausted.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The initialize handshake timed out or was rejected.
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// A tool call failed: remote tool missing, remote execution threw, or
    /// the call timed out.
    #[error("Tool error: {message} (code: {code})")]
    Tool { code: ErrorCode, message: String },

    /// Malformed envelope, unknown session, or a session used prematurely.
    #[error("Protocol error: {message} (code: {code})")]
    Protocol {
        code: ErrorCode,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a [`Error::Protocol`] without attached data.
    pub fn protocol(code: ErrorCode, message: impl Into<String>) -> Self {
        Error::Protocol {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Shorthand for a [`Error::Tool`].
    pub fn tool(code: ErrorCode, message: impl Into<String>) -> Self {
        Error::Tool {
            code,
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_round_trip() {
        for code in [
            -32700, -32600, -32601, -32602, -32603, -32002, -32003, -32004, -32050, -32051,
            -32060,
        ] {
            assert_eq!(ErrorCode::from(code).code(), code);
        }
        assert_eq!(ErrorCode::from(-1), ErrorCode::Other(-1));
    }

    #[test]
    fn tool_error_display_includes_code() {
        let err = Error::tool(ErrorCode::ToolNotFound, "Tool not found: frobnicate");
        assert_eq!(
            err.to_string(),
            "Tool error: Tool not found: frobnicate (code: -32051)"
        );
    }
}

//! Error types for guestbridge

use thiserror::Error;

/// JSON-RPC error codes used on the wire
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Main error type for bridge, relay and app operations
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The underlying message channel failed or is not usable
    #[error("transport error: {0}")]
    Transport(String),

    /// An inbound payload did not have the shape of a JSON-RPC message
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Request parameters could not be decoded
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// A message was sent out of sequence or without the required capability
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer has no handler for the method
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// The handshake failed; the connection is closed after reporting this
    #[error("initialization failed: {0}")]
    Initialization(String),

    /// Error response received from the peer
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// No response arrived in time
    #[error("request '{method}' timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    /// The connection was closed while the operation was pending
    #[error("connection closed")]
    Closed,

    /// The sandbox cannot be trusted; never retried
    #[error("security violation: {0}")]
    Security(String),

    /// Tool or resource `_meta` is inconsistent
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    /// Guest-side script evaluation failed
    #[error("script error: {0}")]
    Script(String),

    /// Layout computation failed while measuring content
    #[error("layout error: {0}")]
    Layout(String),

    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// JSON-RPC error code reported to the peer for this error
    pub fn code(&self) -> i64 {
        match self {
            Self::InvalidMessage(_) => codes::INVALID_REQUEST,
            Self::Json(_) | Self::InvalidParams(_) | Self::InvalidMetadata(_) => {
                codes::INVALID_PARAMS
            }
            Self::MethodNotFound(_) => codes::METHOD_NOT_FOUND,
            Self::Protocol(_) | Self::Initialization(_) => codes::INVALID_REQUEST,
            Self::Rpc { code, .. } => *code,
            _ => codes::INTERNAL_ERROR,
        }
    }

    /// Build an error from a JSON-RPC error object received from the peer
    pub fn from_rpc(code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        if code == codes::METHOD_NOT_FOUND {
            Self::MethodNotFound(message)
        } else {
            Self::Rpc { code, message }
        }
    }

    /// Whether the error means the connection is gone
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Closed | Self::Transport(_))
    }
}

/// Convenience Result type for guestbridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            BridgeError::MethodNotFound("x".into()).code(),
            codes::METHOD_NOT_FOUND
        );
        assert_eq!(
            BridgeError::InvalidParams("bad".into()).code(),
            codes::INVALID_PARAMS
        );
        assert_eq!(BridgeError::Closed.code(), codes::INTERNAL_ERROR);
        assert_eq!(
            BridgeError::Rpc {
                code: 42,
                message: "custom".into()
            }
            .code(),
            42
        );
    }

    #[test]
    fn test_from_rpc_maps_method_not_found() {
        let err = BridgeError::from_rpc(codes::METHOD_NOT_FOUND, "ui/resource-teardown");
        assert!(matches!(err, BridgeError::MethodNotFound(_)));

        let err = BridgeError::from_rpc(-1, "boom");
        assert_eq!(err.to_string(), "rpc error -1: boom");
    }
}

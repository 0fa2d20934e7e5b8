//! Error types for node connections.

use std::time::Duration;

use tokio_tungstenite::tungstenite;

/// Errors produced by the connection layer.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("request timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,

    #[error("provider not ready within {0:?}")]
    NotReady(Duration),

    #[error("chain id mismatch: expected {expected}, node reported {actual}")]
    ChainMismatch { expected: u64, actual: u64 },

    #[error("node error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("connection permanently terminated")]
    Terminated,
}

impl From<mintdrip_protocol::RpcError> for ConnectionError {
    fn from(err: mintdrip_protocol::RpcError) -> Self {
        Self::Rpc {
            code: err.code,
            message: err.message,
        }
    }
}

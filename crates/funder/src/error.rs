//! Error types for the funding pipeline.

use mintdrip_connection::ConnectionError;

/// Errors from decoding events, reading balances or sending funds.
#[derive(Debug, thiserror::Error)]
pub enum FunderError {
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("no live endpoint to query")]
    NoEndpoint,

    #[error("not a Transfer log: {0}")]
    NotTransfer(String),

    #[error("failed to decode Transfer log: {0}")]
    Decode(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid signing key: {0}")]
    InvalidKey(String),

    #[error("funding transaction failed: {0}")]
    Send(String),
}

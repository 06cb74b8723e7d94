//! Error types for graph helpers.
//!
//! Ingestion itself never fails: `GraphStore::consume` reports `false` for
//! every rejected event. These errors surface from the parsing and
//! verification helpers that the ingestion boundary calls.

use thiserror::Error;

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Error, Debug)]
pub enum GraphError {
    /// Identifier is not 32 bytes of lowercase hex.
    #[error("invalid hex key: {0}")]
    InvalidHex(String),

    /// Address tag is not `kind:pubkey:d-tag`.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// JSON payload could not be decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Event id or signature did not check out.
    #[error("verification failed: {0}")]
    Verification(String),

    /// Decrypted payload was missing or malformed.
    #[error("decryption failed: {0}")]
    Decryption(String),
}

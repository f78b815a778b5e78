//! Error types for the didcomm-agent-core crate.

use thiserror::Error;

use crate::envelope::EnvelopeError;
use crate::storage::StorageError;
use crate::wallet::WalletError;

/// Error type for the agent core library
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid format error
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
    /// Base64 decode error
    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
    /// Base58 decode error
    #[error("Base58 decode error: {0}")]
    Base58Decode(#[from] bs58::decode::Error),
    /// Invalid signature error
    #[error("Invalid signature")]
    InvalidSignature,
    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    /// Serialization error
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    /// Envelope codec error
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    /// Key material provider error
    #[error(transparent)]
    Wallet(#[from] WalletError),
    /// Storage error
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result type for the agent core library
pub type Result<T> = std::result::Result<T, Error>;

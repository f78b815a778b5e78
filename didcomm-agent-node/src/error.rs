//! Error types for the didcomm-agent-node crate.

use didcomm_agent_core::{StorageError, WalletError};
use thiserror::Error;

/// Failure to turn inbound JSON into a typed message.
#[derive(Error, Debug)]
pub enum MessageParseError {
    /// The message has no `@type` member.
    #[error("missing @type")]
    MissingType,

    /// No message class is registered for the type.
    #[error("unrecognized type: {0}")]
    UnrecognizedType(String),

    /// The payload does not match the registered message shape.
    #[error("malformed {message_type} message: {source}")]
    DeserializationFailed {
        /// The resolved type URI
        message_type: String,
        /// The underlying deserialization error
        source: serde_json::Error,
    },
}

/// A connection protocol violation.
///
/// The connection record is left in its last valid state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ConnectionManagerError(pub String);

impl ConnectionManagerError {
    /// Creates an error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Failure to deliver a handler's reply.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResponderError {
    /// Neither a return route nor a connection target is available.
    #[error("No active connection")]
    NoActiveConnection,
}

/// Failure to hand bytes to the network.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The endpoint answered with a non-success status.
    #[error("Failed to deliver message to {endpoint}: {status}")]
    Status {
        /// The target endpoint
        endpoint: String,
        /// The HTTP status code
        status: u16,
    },

    /// The endpoint is not a supported URL.
    #[error("Unsupported endpoint: {0}")]
    InvalidEndpoint(String),

    /// The outbound queue is full.
    #[error("Outbound queue is full")]
    QueueFull,

    /// The outbound queue worker has stopped.
    #[error("Outbound queue is closed")]
    QueueClosed,
}

/// The main error type for didcomm-agent-node operations.
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the core crate.
    #[error("Core error: {0}")]
    Core(#[from] didcomm_agent_core::Error),

    /// A wallet operation failed.
    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),

    /// A storage operation failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// An inbound message could not be parsed.
    #[error("Message parse error: {0}")]
    MessageParse(#[from] MessageParseError),

    /// The connection protocol was violated.
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionManagerError),

    /// A reply could not be routed.
    #[error("Responder error: {0}")]
    Responder(#[from] ResponderError),

    /// An outbound transport failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The agent configuration is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An error occurred during serialization or deserialization.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the error is a missing storage record.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Storage(StorageError::NotFound(_))
                | Error::Core(didcomm_agent_core::Error::Storage(StorageError::NotFound(_)))
                | Error::Wallet(WalletError::NotFound(_))
        )
    }
}

/// A specialized Result type for didcomm-agent-node operations.
pub type Result<T> = std::result::Result<T, Error>;

//! Error types for envelope packing and unpacking.
//!
//! Unpacking deliberately collapses every cryptographic failure (box open,
//! sealed box open, content decryption) into [`EnvelopeError::AuthenticationFailed`]
//! so that callers cannot distinguish a wrong key from a tampered envelope.

use std::error::Error as StdError;
use std::fmt;

/// Result type for envelope operations.
pub type Result<T> = std::result::Result<T, EnvelopeError>;

/// Errors that can occur while packing or unpacking an envelope.
///
/// # Examples
///
/// ```
/// use didcomm_agent_core::envelope::EnvelopeError;
///
/// let error = EnvelopeError::NoMatchingKey(vec!["kid1".into(), "kid2".into()]);
/// assert_eq!(
///     error.to_string(),
///     "No corresponding recipient key found in [kid1, kid2]"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// The envelope or its protected header is structurally invalid
    Malformed(String),

    /// None of the recipient entries could be resolved to a local key
    NoMatchingKey(Vec<String>),

    /// A box, sealed box or content decryption failed
    AuthenticationFailed,

    /// A key supplied to the codec is not usable
    InvalidKey(String),

    /// Encryption failed while packing
    Encryption(String),
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(msg) => write!(f, "Malformed envelope: {msg}"),
            Self::NoMatchingKey(kids) => write!(
                f,
                "No corresponding recipient key found in [{}]",
                kids.join(", ")
            ),
            Self::AuthenticationFailed => write!(f, "Envelope authentication failed"),
            Self::InvalidKey(msg) => write!(f, "Invalid key: {msg}"),
            Self::Encryption(msg) => write!(f, "Encryption error: {msg}"),
        }
    }
}

impl StdError for EnvelopeError {}

impl From<base64::DecodeError> for EnvelopeError {
    fn from(err: base64::DecodeError) -> Self {
        Self::Malformed(format!("invalid base64url: {err}"))
    }
}

impl From<serde_json::Error> for EnvelopeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(format!("invalid JSON: {err}"))
    }
}

//! Protected header of a packed envelope.

use serde::{Deserialize, Serialize};

use super::error::{EnvelopeError, Result};
use crate::encoding::{b64url_decode, b64url_encode};

/// Content encryption label carried in the `enc` field.
pub const ENVELOPE_ENC: &str = "xchacha20poly1305_ietf";

/// Envelope type label carried in the `typ` field.
pub const ENVELOPE_TYP: &str = "JWM/1.0";

/// Whether the sender is authenticated to the recipients.
///
/// The choice is made once per envelope; recipient entries never mix modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackAlgorithm {
    /// Sender verkey sealed per recipient, CEK boxed with the sender's key
    Authcrypt,
    /// CEK sealed anonymously per recipient
    Anoncrypt,
}

/// The decoded `protected` member of an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedHeader {
    /// Content encryption algorithm
    pub enc: String,
    /// Envelope type
    pub typ: String,
    /// Recipient key wrapping mode
    pub alg: PackAlgorithm,
    /// One entry per recipient key
    pub recipients: Vec<Recipient>,
}

/// A per-recipient entry holding the wrapped content encryption key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    /// The wrapped CEK (base64url)
    pub encrypted_key: String,
    /// Key identification and authcrypt parameters
    pub header: RecipientHeader,
}

/// Unprotected header of a recipient entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientHeader {
    /// The recipient verkey (base58)
    pub kid: String,
    /// The sender verkey sealed to the recipient (base64url), authcrypt only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// The nonce used to box the CEK (base64url), authcrypt only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
}

impl ProtectedHeader {
    /// Creates a header for the given mode and recipients.
    pub fn new(alg: PackAlgorithm, recipients: Vec<Recipient>) -> Self {
        Self {
            enc: ENVELOPE_ENC.to_string(),
            typ: ENVELOPE_TYP.to_string(),
            alg,
            recipients,
        }
    }

    /// Serializes the header to its base64url wire form.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(b64url_encode(json))
    }

    /// Decodes a header from its base64url wire form.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Malformed`] if the value is not base64url JSON
    /// with the expected members, or names an unsupported content cipher.
    pub fn decode(protected: &str) -> Result<Self> {
        let bytes = b64url_decode(protected)?;
        let header: Self = serde_json::from_slice(&bytes)?;
        if header.enc != ENVELOPE_ENC {
            return Err(EnvelopeError::Malformed(format!(
                "unsupported content encryption: {}",
                header.enc
            )));
        }
        if header.recipients.is_empty() {
            return Err(EnvelopeError::Malformed("no recipients".to_string()));
        }
        Ok(header)
    }

    /// The recipient key identifiers, in envelope order.
    pub fn kids(&self) -> Vec<String> {
        self.recipients
            .iter()
            .map(|recipient| recipient.header.kid.clone())
            .collect()
    }
}

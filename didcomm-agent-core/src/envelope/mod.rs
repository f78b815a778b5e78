//! Packed envelope codec.
//!
//! Packs a UTF-8 plaintext for one or more recipient verkeys and unpacks it
//! again for a holder of one of the matching signing keys.
//!
//! # Wire format
//!
//! ```json
//! {
//!   "protected": "<base64url JSON header>",
//!   "iv": "<base64url 24 byte nonce>",
//!   "ciphertext": "<base64url>",
//!   "tag": "<base64url 16 byte tag>"
//! }
//! ```
//!
//! The protected header lists one entry per recipient with the content
//! encryption key (CEK) wrapped for that recipient. Its base64url text is the
//! additional authenticated data of the content encryption.
//!
//! # Examples
//!
//! ```rust
//! use didcomm_agent_core::envelope::{pack_message, unpack_message};
//! use didcomm_agent_core::encoding::b58_encode;
//! use ed25519_dalek::SigningKey;
//! use rand_core::OsRng;
//!
//! let alice = SigningKey::generate(&mut OsRng);
//! let bob = SigningKey::generate(&mut OsRng);
//! let bob_verkey = b58_encode(bob.verifying_key().as_bytes());
//!
//! let packed = pack_message("hello", &[bob_verkey.clone()], Some(&alice)).unwrap();
//! let unpacked = unpack_message(packed.as_bytes(), |kid| (kid == bob_verkey).then(|| bob.clone())).unwrap();
//! assert_eq!(unpacked.message, "hello");
//! assert_eq!(unpacked.recipient_verkey, bob_verkey);
//! ```

use serde::{Deserialize, Serialize};
use tracing::debug;

pub mod algorithms;
pub mod error;
pub mod header;

pub use self::error::{EnvelopeError, Result};
pub use self::header::{PackAlgorithm, ProtectedHeader, Recipient, RecipientHeader};

use self::algorithms::{
    box_encrypt, box_open, decrypt_xchacha20poly1305, encrypt_xchacha20poly1305,
    generate_nonce, generate_random_key, parse_verkey, seal, signing_key_to_box_secret, unseal,
    verkey_to_box_public, CEK_SIZE,
};
use crate::encoding::{b58_encode, b64url_decode, b64url_encode};
use ed25519_dalek::SigningKey;
use zeroize::Zeroizing;

/// The outer JSON structure of a packed envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// The protected header (base64url-encoded JSON)
    pub protected: String,
    /// The content nonce (base64url-encoded)
    pub iv: String,
    /// The content ciphertext without tag (base64url-encoded)
    pub ciphertext: String,
    /// The content authentication tag (base64url-encoded)
    pub tag: String,
}

impl Envelope {
    /// Parses an envelope from its JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Malformed`] if a member is missing.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Serializes the envelope to JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Malformed`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes the protected header.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Malformed`] if the header is invalid.
    pub fn header(&self) -> Result<ProtectedHeader> {
        ProtectedHeader::decode(&self.protected)
    }
}

/// The result of unpacking an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpackedMessage {
    /// The decrypted plaintext
    pub message: String,
    /// The authenticated sender verkey, `None` for anoncrypt
    pub sender_verkey: Option<String>,
    /// The recipient verkey that opened the envelope
    pub recipient_verkey: String,
}

/// Packs `message` for every verkey in `to_verkeys`.
///
/// Authcrypt is used when `from_key` is supplied, anoncrypt otherwise.
///
/// # Errors
///
/// Returns [`EnvelopeError::InvalidKey`] if there are no recipients or a
/// recipient verkey is not a valid Ed25519 key, and
/// [`EnvelopeError::Encryption`] if a cipher fails.
pub fn pack_message(
    message: &str,
    to_verkeys: &[String],
    from_key: Option<&SigningKey>,
) -> Result<String> {
    if to_verkeys.is_empty() {
        return Err(EnvelopeError::InvalidKey("no recipient keys".to_string()));
    }

    let cek = generate_random_key(CEK_SIZE);
    let sender = from_key.map(|key| {
        (
            b58_encode(key.verifying_key().as_bytes()),
            signing_key_to_box_secret(key),
        )
    });

    let mut recipients = Vec::with_capacity(to_verkeys.len());
    for target_vk in to_verkeys {
        let target_pk = verkey_to_box_public(&parse_verkey(target_vk)?);

        let recipient = match &sender {
            Some((sender_vk, sender_sk)) => {
                let enc_sender = seal(&target_pk, sender_vk.as_bytes())?;
                let nonce = generate_nonce();
                let enc_cek = box_encrypt(&target_pk, sender_sk, &nonce, &cek)?;
                Recipient {
                    encrypted_key: b64url_encode(enc_cek),
                    header: RecipientHeader {
                        kid: target_vk.clone(),
                        sender: Some(b64url_encode(enc_sender)),
                        iv: Some(b64url_encode(nonce)),
                    },
                }
            }
            None => Recipient {
                encrypted_key: b64url_encode(seal(&target_pk, &cek)?),
                header: RecipientHeader {
                    kid: target_vk.clone(),
                    sender: None,
                    iv: None,
                },
            },
        };
        recipients.push(recipient);
    }

    let alg = if sender.is_some() {
        PackAlgorithm::Authcrypt
    } else {
        PackAlgorithm::Anoncrypt
    };
    let protected = ProtectedHeader::new(alg, recipients).encode()?;

    let nonce = generate_nonce();
    let (ciphertext, tag) =
        encrypt_xchacha20poly1305(&cek, &nonce, protected.as_bytes(), message.as_bytes())?;

    debug!(recipients = to_verkeys.len(), ?alg, "Packed envelope");

    Envelope {
        protected,
        iv: b64url_encode(nonce),
        ciphertext: b64url_encode(ciphertext),
        tag: b64url_encode(tag),
    }
    .to_json()
}

/// Unpacks an envelope using `find_key` to look up local signing keys by kid.
///
/// Recipient entries are tried in order; the first kid for which `find_key`
/// returns a key is used.
///
/// # Errors
///
/// - [`EnvelopeError::Malformed`] if the envelope structure is invalid
/// - [`EnvelopeError::NoMatchingKey`] if no kid resolves to a local key
/// - [`EnvelopeError::AuthenticationFailed`] if any decryption fails, or an
///   authcrypt envelope carries no recoverable sender
pub fn unpack_message<F>(envelope: &[u8], find_key: F) -> Result<UnpackedMessage>
where
    F: Fn(&str) -> Option<SigningKey>,
{
    let envelope = Envelope::from_json(envelope)?;
    let header = envelope.header()?;

    let mut tried = Vec::new();
    let found = header.recipients.iter().find_map(|recipient| {
        let key = find_key(&recipient.header.kid);
        if key.is_none() {
            tried.push(recipient.header.kid.clone());
        }
        key.map(|key| (recipient, key))
    });
    let Some((recipient, local_key)) = found else {
        return Err(EnvelopeError::NoMatchingKey(tried));
    };

    let (cek, sender_verkey) = unwrap_cek(recipient, &local_key)?;
    if header.alg == PackAlgorithm::Authcrypt && sender_verkey.is_none() {
        return Err(EnvelopeError::AuthenticationFailed);
    }

    let nonce = b64url_decode(&envelope.iv)?;
    let ciphertext = b64url_decode(&envelope.ciphertext)?;
    let tag = b64url_decode(&envelope.tag)?;
    let plaintext = decrypt_xchacha20poly1305(
        &cek,
        &nonce,
        envelope.protected.as_bytes(),
        &ciphertext,
        &tag,
    )?;

    let message = String::from_utf8(plaintext)
        .map_err(|_| EnvelopeError::Malformed("plaintext is not UTF-8".to_string()))?;

    Ok(UnpackedMessage {
        message,
        sender_verkey,
        recipient_verkey: recipient.header.kid.clone(),
    })
}

/// Recovers the CEK (and the sender verkey for authcrypt) from a recipient entry.
fn unwrap_cek(
    recipient: &Recipient,
    local_key: &SigningKey,
) -> Result<(Zeroizing<Vec<u8>>, Option<String>)> {
    let local_sk = signing_key_to_box_secret(local_key);
    let encrypted_key = b64url_decode(&recipient.encrypted_key)?;

    match (&recipient.header.iv, &recipient.header.sender) {
        (Some(iv), Some(sender)) => {
            let enc_sender = b64url_decode(sender)?;
            let sender_vk = String::from_utf8(unseal(&local_sk, &enc_sender)?)
                .map_err(|_| EnvelopeError::AuthenticationFailed)?;
            let sender_pk = verkey_to_box_public(
                &parse_verkey(&sender_vk).map_err(|_| EnvelopeError::AuthenticationFailed)?,
            );
            let nonce = b64url_decode(iv)?;
            let cek = box_open(&sender_pk, &local_sk, &nonce, &encrypted_key)?;
            Ok((Zeroizing::new(cek), Some(sender_vk)))
        }
        _ => {
            let cek = unseal(&local_sk, &encrypted_key)?;
            Ok((Zeroizing::new(cek), None))
        }
    }
}

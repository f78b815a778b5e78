//! Message decorators shared by every protocol.
//!
//! Decorators are the `~`-prefixed members of a protocol message: `~thread`
//! for correlation, `~transport` for return routing, and `<field>~sig` for
//! field signatures.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::encoding::{b64url_decode, b64url_encode};
use crate::error::{Error, Result};
use crate::wallet::Wallet;

/// Type URI of a single-signer Ed25519 field signature.
pub const SIGNATURE_TYPE: &str =
    "did:sov:BzCbsNYhMrjHiqZDTUASHg;spec/signature/1.0/ed25519Sha512_single";

/// The `~thread` decorator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadDecorator {
    /// Thread id, the `@id` of the first message of the exchange
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thid: Option<String>,
    /// Parent thread id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pthid: Option<String>,
}

impl ThreadDecorator {
    /// Creates a decorator for the given thread id.
    pub fn with_thid(thid: impl Into<String>) -> Self {
        Self {
            thid: Some(thid.into()),
            pthid: None,
        }
    }
}

/// Return route modes of the `~transport` decorator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnRoute {
    /// No replies on the inbound channel
    None,
    /// Every reply on the inbound channel
    All,
    /// Replies within the thread on the inbound channel
    Thread,
}

/// The `~transport` decorator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportDecorator {
    /// Requested return route
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_route: Option<ReturnRoute>,
}

impl TransportDecorator {
    /// Whether replies should travel back over the inbound channel.
    pub fn wants_direct_response(&self) -> bool {
        matches!(
            self.return_route,
            Some(ReturnRoute::All | ReturnRoute::Thread)
        )
    }
}

/// A field signature.
///
/// `sig_data` is an 8 byte big-endian timestamp followed by the JSON of the
/// signed value; `signature` is the Ed25519 signature over `sig_data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureDecorator {
    /// Signature scheme type URI
    #[serde(rename = "@type")]
    pub signature_type: String,
    /// Signature over `sig_data` (base64url)
    pub signature: String,
    /// Timestamp and signed value (base64url)
    pub sig_data: String,
    /// Verkey of the signer (base58)
    pub signer: String,
}

impl SignatureDecorator {
    /// Signs `value` with the wallet key for `signer`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized or the wallet does
    /// not hold the signer's key.
    pub async fn create<T: Serialize + Sync>(
        value: &T,
        signer: &str,
        wallet: &dyn Wallet,
        timestamp: Option<u64>,
    ) -> Result<Self> {
        let timestamp = match timestamp {
            Some(timestamp) => timestamp,
            None => u64::try_from(Utc::now().timestamp()).map_err(|_| {
                Error::InvalidFormat("system clock is before the Unix epoch".to_string())
            })?,
        };
        let mut sig_data = timestamp.to_be_bytes().to_vec();
        sig_data.extend(serde_json::to_vec(value)?);

        let signature = wallet.sign_message(&sig_data, signer).await?;
        Ok(Self {
            signature_type: SIGNATURE_TYPE.to_string(),
            signature: b64url_encode(signature),
            sig_data: b64url_encode(sig_data),
            signer: signer.to_string(),
        })
    }

    /// Decodes the signed value and its timestamp without verifying.
    ///
    /// # Errors
    ///
    /// Returns an error if `sig_data` is not base64url, is too short, or does
    /// not deserialize to `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<(T, u64)> {
        let sig_data = b64url_decode(&self.sig_data)?;
        if sig_data.len() < 8 {
            return Err(Error::InvalidFormat("signature data too short".to_string()));
        }
        let (stamp, json) = sig_data.split_at(8);
        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(stamp);
        Ok((serde_json::from_slice(json)?, u64::from_be_bytes(timestamp)))
    }

    /// Verifies the signature against the signer verkey.
    ///
    /// An unknown signature type verifies as `false`.
    ///
    /// # Errors
    ///
    /// Returns an error if the fields are not valid base64url or the signer
    /// is not an Ed25519 key.
    pub async fn verify(&self, wallet: &dyn Wallet) -> Result<bool> {
        if self.signature_type != SIGNATURE_TYPE {
            return Ok(false);
        }
        let sig_data = b64url_decode(&self.sig_data)?;
        let signature = b64url_decode(&self.signature)?;
        Ok(wallet
            .verify_message(&sig_data, &signature, &self.signer)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::wallet_with_key;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    #[test]
    fn test_thread_serialization() {
        let thread = ThreadDecorator::with_thid("abc");
        assert_eq!(serde_json::to_value(&thread).unwrap(), json!({"thid": "abc"}));
        let parsed: ThreadDecorator = serde_json::from_value(json!({})).unwrap();
        assert_eq!(parsed, ThreadDecorator::default());
    }

    #[test]
    fn test_return_route() {
        let parsed: TransportDecorator =
            serde_json::from_value(json!({"return_route": "all"})).unwrap();
        assert!(parsed.wants_direct_response());

        let parsed: TransportDecorator =
            serde_json::from_value(json!({"return_route": "none"})).unwrap();
        assert!(!parsed.wants_direct_response());
        assert!(!TransportDecorator::default().wants_direct_response());
    }

    #[tokio::test]
    async fn test_signature_round_trip() {
        let (wallet, key) = wallet_with_key().await;
        let value = json!({"DID": "did", "DIDDoc": {"id": "did:sov:did"}});

        let sig = SignatureDecorator::create(&value, &key.verkey, &wallet, Some(1_700_000_000))
            .await
            .unwrap();
        assert_eq!(sig.signature_type, SIGNATURE_TYPE);
        assert_eq!(sig.signer, key.verkey);
        assert!(sig.verify(&wallet).await.unwrap());

        let (decoded, timestamp): (Value, u64) = sig.decode().unwrap();
        assert_eq!(decoded, value);
        assert_eq!(timestamp, 1_700_000_000);
    }

    #[tokio::test]
    async fn test_signature_defaults_to_current_time() {
        let (wallet, key) = wallet_with_key().await;
        let before = u64::try_from(Utc::now().timestamp()).unwrap();
        let sig = SignatureDecorator::create(&json!({"a": 1}), &key.verkey, &wallet, None)
            .await
            .unwrap();
        let after = u64::try_from(Utc::now().timestamp()).unwrap();

        let (_, timestamp): (Value, u64) = sig.decode().unwrap();
        assert!((before..=after).contains(&timestamp));
    }

    #[tokio::test]
    async fn test_signature_rejects_tampering() {
        let (wallet, key) = wallet_with_key().await;
        let mut sig = SignatureDecorator::create(&json!({"a": 1}), &key.verkey, &wallet, None)
            .await
            .unwrap();

        let mut sig_data = b64url_decode(&sig.sig_data).unwrap();
        sig_data.push(b' ');
        sig.sig_data = b64url_encode(sig_data);
        assert!(!sig.verify(&wallet).await.unwrap());

        sig.signature_type = "unknown".to_string();
        assert!(!sig.verify(&wallet).await.unwrap());
    }

    #[test]
    fn test_decode_short_data() {
        let sig = SignatureDecorator {
            signature_type: SIGNATURE_TYPE.to_string(),
            signature: String::new(),
            sig_data: b64url_encode([1u8, 2, 3]),
            signer: String::new(),
        };
        assert!(matches!(
            sig.decode::<Value>(),
            Err(Error::InvalidFormat(_))
        ));
    }
}

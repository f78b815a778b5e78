//! Key material provider contract.
//!
//! The [`Wallet`] trait is the interface the protocol layer consumes for key
//! generation, local and pairwise DID bookkeeping, signing and the envelope
//! codec. [`BasicWallet`] keeps everything in memory.
//!
//! # Examples
//!
//! ```rust
//! use didcomm_agent_core::wallet::{BasicWallet, Wallet};
//!
//! # tokio_test::block_on(async {
//! let wallet = BasicWallet::new();
//! let alice = wallet.create_signing_key(None, None).await.unwrap();
//! let bob = wallet.create_signing_key(None, None).await.unwrap();
//!
//! let packed = wallet
//!     .pack_message("hello", &[bob.verkey.clone()], Some(&alice.verkey))
//!     .await
//!     .unwrap();
//! let unpacked = wallet.unpack_message(packed.as_bytes()).await.unwrap();
//! assert_eq!(unpacked.sender_verkey, Some(alice.verkey));
//! # });
//! ```

use async_trait::async_trait;
use ed25519_dalek::{Signature, Verifier};
use serde_json::Value;
use thiserror::Error;

use crate::envelope::{algorithms::parse_verkey, EnvelopeError, UnpackedMessage};
use crate::types::{DidInfo, KeyInfo, Metadata, PairwiseInfo};

mod basic;

pub use self::basic::BasicWallet;

/// Errors raised by a key material provider.
#[derive(Debug, Error)]
pub enum WalletError {
    /// The requested key, DID or relationship does not exist
    #[error("Not found: {0}")]
    NotFound(String),
    /// The key, DID or relationship already exists
    #[error("Duplicate: {0}")]
    Duplicate(String),
    /// The seed is not usable as key material
    #[error("Invalid seed: {0}")]
    InvalidSeed(String),
    /// A key could not be parsed
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    /// Packing or unpacking failed
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

/// Result type for wallet operations.
pub type Result<T> = std::result::Result<T, WalletError>;

/// Trait for key material providers.
///
/// Implementations must allow concurrent reads of the keyring and make key
/// creation atomic with respect to duplicate detection.
#[async_trait]
pub trait Wallet: Send + Sync {
    /// Creates a new signing key, derived from `seed` when one is supplied.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::Duplicate`] if the resulting verkey already exists
    /// and [`WalletError::InvalidSeed`] if the seed is not 32 bytes.
    async fn create_signing_key(
        &self,
        seed: Option<&[u8]>,
        metadata: Option<Metadata>,
    ) -> Result<KeyInfo>;

    /// Fetches a signing key by verkey.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::NotFound`] for an unknown verkey.
    async fn get_signing_key(&self, verkey: &str) -> Result<KeyInfo>;

    /// Replaces the metadata of a signing key.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::NotFound`] for an unknown verkey.
    async fn replace_signing_key_metadata(&self, verkey: &str, metadata: Metadata) -> Result<()>;

    /// Creates a local DID with its own signing key.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::Duplicate`] if the DID already exists.
    async fn create_local_did(
        &self,
        seed: Option<&[u8]>,
        did: Option<&str>,
        metadata: Option<Metadata>,
    ) -> Result<DidInfo>;

    /// Creates a local DID and makes it the public DID.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Wallet::create_local_did`].
    async fn create_public_did(
        &self,
        seed: Option<&[u8]>,
        did: Option<&str>,
        metadata: Option<Metadata>,
    ) -> Result<DidInfo> {
        let mut metadata = metadata.unwrap_or_default();
        metadata.insert("public".to_string(), Value::Bool(true));
        let info = self.create_local_did(seed, did, Some(metadata)).await?;
        self.set_public_did(&info.did).await
    }

    /// Returns the public DID, if one is set.
    async fn get_public_did(&self) -> Result<Option<DidInfo>>;

    /// Marks an existing local DID as the public DID.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::NotFound`] for an unknown DID.
    async fn set_public_did(&self, did: &str) -> Result<DidInfo>;

    /// Lists every local DID.
    async fn get_local_dids(&self) -> Result<Vec<DidInfo>>;

    /// Fetches a local DID.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::NotFound`] for an unknown DID.
    async fn get_local_did(&self, did: &str) -> Result<DidInfo>;

    /// Fetches the local DID bound to a verkey.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::NotFound`] if no local DID uses the verkey.
    async fn get_local_did_for_verkey(&self, verkey: &str) -> Result<DidInfo>;

    /// Replaces the metadata of a local DID.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::NotFound`] for an unknown DID.
    async fn replace_local_did_metadata(&self, did: &str, metadata: Metadata) -> Result<()>;

    /// Records a pairwise relationship, creating a local DID when `my_did` is absent.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::Duplicate`] if `their_did` is already paired.
    async fn create_pairwise(
        &self,
        their_did: &str,
        their_verkey: &str,
        my_did: Option<&str>,
        metadata: Option<Metadata>,
    ) -> Result<PairwiseInfo>;

    /// Fetches the pairwise relationship for a peer DID.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::NotFound`] if the DID is not paired.
    async fn get_pairwise_for_did(&self, their_did: &str) -> Result<PairwiseInfo>;

    /// Lists every pairwise relationship.
    async fn get_pairwise_list(&self) -> Result<Vec<PairwiseInfo>>;

    /// Signs `message` with the key for `from_verkey`.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::NotFound`] if the key is not held.
    async fn sign_message(&self, message: &[u8], from_verkey: &str) -> Result<Vec<u8>>;

    /// Verifies an Ed25519 signature.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::InvalidKey`] if `from_verkey` is not an Ed25519 key.
    async fn verify_message(
        &self,
        message: &[u8],
        signature: &[u8],
        from_verkey: &str,
    ) -> Result<bool> {
        let verkey = parse_verkey(from_verkey).map_err(|e| WalletError::InvalidKey(e.to_string()))?;
        let Ok(signature) = Signature::from_slice(signature) else {
            return Ok(false);
        };
        Ok(verkey.verify(message, &signature).is_ok())
    }

    /// Packs a message for the recipients, authcrypted when `from_verkey` is set.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::NotFound`] if the sender key is not held, or an
    /// envelope error if packing fails.
    async fn pack_message(
        &self,
        message: &str,
        to_verkeys: &[String],
        from_verkey: Option<&str>,
    ) -> Result<String>;

    /// Unpacks an envelope with any key held by the wallet.
    ///
    /// # Errors
    ///
    /// Returns the envelope error raised by the codec.
    async fn unpack_message(&self, envelope: &[u8]) -> Result<UnpackedMessage>;
}

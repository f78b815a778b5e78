//! In-memory wallet.

use std::collections::HashMap;

use async_trait::async_trait;
use ed25519_dalek::{Signer as _, SigningKey};
use rand_core::OsRng;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use super::{Result, Wallet, WalletError};
use crate::encoding::b58_encode;
use crate::envelope::{self, UnpackedMessage};
use crate::types::{DidInfo, KeyInfo, Metadata, PairwiseInfo};

struct KeyEntry {
    signing_key: SigningKey,
    metadata: Metadata,
}

struct DidEntry {
    verkey: String,
    metadata: Metadata,
}

struct PairwiseEntry {
    their_verkey: String,
    my_did: String,
    metadata: Metadata,
}

#[derive(Default)]
struct Keyring {
    keys: HashMap<String, KeyEntry>,
    local_dids: HashMap<String, DidEntry>,
    pair_dids: HashMap<String, PairwiseEntry>,
    public_did: Option<String>,
}

impl Keyring {
    fn did_info(&self, did: &str) -> Result<DidInfo> {
        let entry = self
            .local_dids
            .get(did)
            .ok_or_else(|| WalletError::NotFound(format!("Unknown DID: {did}")))?;
        Ok(DidInfo {
            did: did.to_string(),
            verkey: entry.verkey.clone(),
            metadata: entry.metadata.clone(),
        })
    }

    fn pairwise_info(&self, their_did: &str) -> Result<PairwiseInfo> {
        let entry = self
            .pair_dids
            .get(their_did)
            .ok_or_else(|| WalletError::NotFound(format!("Unknown target DID: {their_did}")))?;
        let mine = self.did_info(&entry.my_did)?;
        Ok(PairwiseInfo {
            their_did: their_did.to_string(),
            their_verkey: entry.their_verkey.clone(),
            my_did: mine.did,
            my_verkey: mine.verkey,
            metadata: entry.metadata.clone(),
        })
    }

    fn signing_key(&self, verkey: &str) -> Result<SigningKey> {
        self.keys
            .get(verkey)
            .map(|entry| entry.signing_key.clone())
            .ok_or_else(|| WalletError::NotFound(format!("Unknown key: {verkey}")))
    }
}

/// A wallet that keeps its keyring in process memory.
///
/// Lookups take a shared lock so concurrent unpacks never block each other;
/// creation checks for duplicates and inserts under one exclusive lock.
#[derive(Default)]
pub struct BasicWallet {
    keyring: RwLock<Keyring>,
}

impl BasicWallet {
    /// Creates an empty wallet.
    pub fn new() -> Self {
        Self::default()
    }
}

fn signing_key_from_seed(seed: Option<&[u8]>) -> Result<SigningKey> {
    match seed {
        Some(seed) => {
            let seed: [u8; 32] = seed.try_into().map_err(|_| {
                WalletError::InvalidSeed(format!("expected 32 bytes, got {}", seed.len()))
            })?;
            Ok(SigningKey::from_bytes(&seed))
        }
        None => Ok(SigningKey::generate(&mut OsRng)),
    }
}

fn verkey_of(key: &SigningKey) -> String {
    b58_encode(key.verifying_key().as_bytes())
}

#[async_trait]
impl Wallet for BasicWallet {
    async fn create_signing_key(
        &self,
        seed: Option<&[u8]>,
        metadata: Option<Metadata>,
    ) -> Result<KeyInfo> {
        let signing_key = signing_key_from_seed(seed)?;
        let verkey = verkey_of(&signing_key);
        let metadata = metadata.unwrap_or_default();

        let mut keyring = self.keyring.write().await;
        if keyring.keys.contains_key(&verkey) {
            return Err(WalletError::Duplicate(format!(
                "Verification key already present in wallet: {verkey}"
            )));
        }
        keyring.keys.insert(
            verkey.clone(),
            KeyEntry {
                signing_key,
                metadata: metadata.clone(),
            },
        );
        debug!(verkey = %verkey, "created signing key");
        Ok(KeyInfo { verkey, metadata })
    }

    async fn get_signing_key(&self, verkey: &str) -> Result<KeyInfo> {
        let keyring = self.keyring.read().await;
        let entry = keyring
            .keys
            .get(verkey)
            .ok_or_else(|| WalletError::NotFound(format!("Unknown key: {verkey}")))?;
        Ok(KeyInfo {
            verkey: verkey.to_string(),
            metadata: entry.metadata.clone(),
        })
    }

    async fn replace_signing_key_metadata(&self, verkey: &str, metadata: Metadata) -> Result<()> {
        let mut keyring = self.keyring.write().await;
        let entry = keyring
            .keys
            .get_mut(verkey)
            .ok_or_else(|| WalletError::NotFound(format!("Unknown key: {verkey}")))?;
        entry.metadata = metadata;
        Ok(())
    }

    async fn create_local_did(
        &self,
        seed: Option<&[u8]>,
        did: Option<&str>,
        metadata: Option<Metadata>,
    ) -> Result<DidInfo> {
        let signing_key = signing_key_from_seed(seed)?;
        let verkey = verkey_of(&signing_key);
        let did = match did {
            Some(did) => did.to_string(),
            None => b58_encode(&signing_key.verifying_key().as_bytes()[..16]),
        };
        let metadata = metadata.unwrap_or_default();

        let mut keyring = self.keyring.write().await;
        if keyring.local_dids.contains_key(&did) {
            return Err(WalletError::Duplicate(format!(
                "DID already present in wallet: {did}"
            )));
        }
        keyring
            .keys
            .entry(verkey.clone())
            .or_insert_with(|| KeyEntry {
                signing_key,
                metadata: Metadata::new(),
            });
        keyring.local_dids.insert(
            did.clone(),
            DidEntry {
                verkey: verkey.clone(),
                metadata: metadata.clone(),
            },
        );
        debug!(did = %did, "created local DID");
        Ok(DidInfo {
            did,
            verkey,
            metadata,
        })
    }

    async fn get_public_did(&self) -> Result<Option<DidInfo>> {
        let keyring = self.keyring.read().await;
        keyring
            .public_did
            .as_deref()
            .map(|did| keyring.did_info(did))
            .transpose()
    }

    async fn set_public_did(&self, did: &str) -> Result<DidInfo> {
        let mut keyring = self.keyring.write().await;
        if !keyring.local_dids.contains_key(did) {
            return Err(WalletError::NotFound(format!("Unknown DID: {did}")));
        }
        if let Some(previous) = keyring.public_did.take() {
            if let Some(entry) = keyring.local_dids.get_mut(&previous) {
                entry.metadata.insert("public".to_string(), Value::Bool(false));
            }
        }
        if let Some(entry) = keyring.local_dids.get_mut(did) {
            entry.metadata.insert("public".to_string(), Value::Bool(true));
        }
        keyring.public_did = Some(did.to_string());
        keyring.did_info(did)
    }

    async fn get_local_dids(&self) -> Result<Vec<DidInfo>> {
        let keyring = self.keyring.read().await;
        keyring
            .local_dids
            .keys()
            .map(|did| keyring.did_info(did))
            .collect()
    }

    async fn get_local_did(&self, did: &str) -> Result<DidInfo> {
        self.keyring.read().await.did_info(did)
    }

    async fn get_local_did_for_verkey(&self, verkey: &str) -> Result<DidInfo> {
        let keyring = self.keyring.read().await;
        let did = keyring
            .local_dids
            .iter()
            .find(|(_, entry)| entry.verkey == verkey)
            .map(|(did, _)| did.clone())
            .ok_or_else(|| WalletError::NotFound(format!("No DID defined for verkey: {verkey}")))?;
        keyring.did_info(&did)
    }

    async fn replace_local_did_metadata(&self, did: &str, metadata: Metadata) -> Result<()> {
        let mut keyring = self.keyring.write().await;
        let entry = keyring
            .local_dids
            .get_mut(did)
            .ok_or_else(|| WalletError::NotFound(format!("Unknown DID: {did}")))?;
        entry.metadata = metadata;
        Ok(())
    }

    async fn create_pairwise(
        &self,
        their_did: &str,
        their_verkey: &str,
        my_did: Option<&str>,
        metadata: Option<Metadata>,
    ) -> Result<PairwiseInfo> {
        let my_did = match my_did {
            Some(did) => self.get_local_did(did).await?.did,
            None => self.create_local_did(None, None, None).await?.did,
        };

        let mut keyring = self.keyring.write().await;
        if keyring.pair_dids.contains_key(their_did) {
            return Err(WalletError::Duplicate(format!(
                "Pairwise DID already present in wallet: {their_did}"
            )));
        }
        keyring.pair_dids.insert(
            their_did.to_string(),
            PairwiseEntry {
                their_verkey: their_verkey.to_string(),
                my_did,
                metadata: metadata.unwrap_or_default(),
            },
        );
        keyring.pairwise_info(their_did)
    }

    async fn get_pairwise_for_did(&self, their_did: &str) -> Result<PairwiseInfo> {
        self.keyring.read().await.pairwise_info(their_did)
    }

    async fn get_pairwise_list(&self) -> Result<Vec<PairwiseInfo>> {
        let keyring = self.keyring.read().await;
        keyring
            .pair_dids
            .keys()
            .map(|did| keyring.pairwise_info(did))
            .collect()
    }

    async fn sign_message(&self, message: &[u8], from_verkey: &str) -> Result<Vec<u8>> {
        let signing_key = self.keyring.read().await.signing_key(from_verkey)?;
        Ok(signing_key.sign(message).to_bytes().to_vec())
    }

    async fn pack_message(
        &self,
        message: &str,
        to_verkeys: &[String],
        from_verkey: Option<&str>,
    ) -> Result<String> {
        let from_key = match from_verkey {
            Some(verkey) => Some(self.keyring.read().await.signing_key(verkey)?),
            None => None,
        };
        Ok(envelope::pack_message(
            message,
            to_verkeys,
            from_key.as_ref(),
        )?)
    }

    async fn unpack_message(&self, envelope: &[u8]) -> Result<UnpackedMessage> {
        let keyring = self.keyring.read().await;
        Ok(envelope::unpack_message(envelope, |kid| {
            keyring.keys.get(kid).map(|entry| entry.signing_key.clone())
        })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use futures::future::join_all;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const SEED: &[u8; 32] = b"00000000000000000000000000000000";

    #[tokio::test]
    async fn test_seeded_key_is_deterministic() {
        let one = BasicWallet::new();
        let two = BasicWallet::new();
        let a = one.create_signing_key(Some(SEED), None).await.unwrap();
        let b = two.create_signing_key(Some(SEED), None).await.unwrap();
        assert_eq!(a.verkey, b.verkey);
    }

    #[tokio::test]
    async fn test_duplicate_signing_key() {
        let wallet = BasicWallet::new();
        wallet.create_signing_key(Some(SEED), None).await.unwrap();
        let result = wallet.create_signing_key(Some(SEED), None).await;
        assert!(matches!(result, Err(WalletError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_concurrent_creation_detects_duplicates() {
        let wallet = Arc::new(BasicWallet::new());
        let attempts = (0..8).map(|_| {
            let wallet = Arc::clone(&wallet);
            async move { wallet.create_signing_key(Some(SEED), None).await }
        });
        let results = join_all(attempts).await;

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, WalletError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_invalid_seed_length() {
        let wallet = BasicWallet::new();
        let result = wallet.create_signing_key(Some(b"short"), None).await;
        assert!(matches!(result, Err(WalletError::InvalidSeed(_))));
    }

    #[tokio::test]
    async fn test_local_did_derivation_and_lookup() {
        let wallet = BasicWallet::new();
        let info = wallet.create_local_did(Some(SEED), None, None).await.unwrap();

        let verkey_bytes = bs58::decode(&info.verkey).into_vec().unwrap();
        assert_eq!(info.did, b58_encode(&verkey_bytes[..16]));
        assert_eq!(wallet.get_local_did_for_verkey(&info.verkey).await.unwrap(), info);
        assert!(wallet.get_signing_key(&info.verkey).await.is_ok());

        let dup = wallet.create_local_did(None, Some(&info.did), None).await;
        assert!(matches!(dup, Err(WalletError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_public_did() {
        let wallet = BasicWallet::new();
        assert_eq!(wallet.get_public_did().await.unwrap(), None);

        let first = wallet.create_public_did(None, None, None).await.unwrap();
        assert!(first.is_public());

        let second = wallet.create_local_did(None, None, None).await.unwrap();
        wallet.set_public_did(&second.did).await.unwrap();

        let public = wallet.get_public_did().await.unwrap().unwrap();
        assert_eq!(public.did, second.did);
        assert!(!wallet.get_local_did(&first.did).await.unwrap().is_public());
    }

    #[tokio::test]
    async fn test_metadata_replacement() {
        let wallet = BasicWallet::new();
        let key = wallet.create_signing_key(None, None).await.unwrap();
        let mut metadata = Metadata::new();
        metadata.insert("label".to_string(), json!("invite"));
        wallet
            .replace_signing_key_metadata(&key.verkey, metadata.clone())
            .await
            .unwrap();
        assert_eq!(wallet.get_signing_key(&key.verkey).await.unwrap().metadata, metadata);

        let missing = wallet.replace_local_did_metadata("nope", Metadata::new()).await;
        assert!(matches!(missing, Err(WalletError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_pairwise() {
        let wallet = BasicWallet::new();
        let mine = wallet.create_local_did(None, None, None).await.unwrap();

        let pairwise = wallet
            .create_pairwise("their-did", "their-verkey", Some(&mine.did), None)
            .await
            .unwrap();
        assert_eq!(pairwise.my_verkey, mine.verkey);
        assert_eq!(wallet.get_pairwise_for_did("their-did").await.unwrap(), pairwise);
        assert_eq!(wallet.get_pairwise_list().await.unwrap().len(), 1);

        let dup = wallet
            .create_pairwise("their-did", "their-verkey", None, None)
            .await;
        assert!(matches!(dup, Err(WalletError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_sign_and_verify() {
        let wallet = BasicWallet::new();
        let key = wallet.create_signing_key(None, None).await.unwrap();

        let signature = wallet.sign_message(b"data", &key.verkey).await.unwrap();
        assert!(wallet.verify_message(b"data", &signature, &key.verkey).await.unwrap());
        assert!(!wallet.verify_message(b"other", &signature, &key.verkey).await.unwrap());
        assert!(!wallet.verify_message(b"data", b"short", &key.verkey).await.unwrap());

        let unknown = wallet.sign_message(b"data", "unknown").await;
        assert!(matches!(unknown, Err(WalletError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_pack_unpack_between_wallets() {
        let alice = BasicWallet::new();
        let bob = BasicWallet::new();
        let alice_key = alice.create_signing_key(None, None).await.unwrap();
        let bob_key = bob.create_signing_key(None, None).await.unwrap();

        let packed = alice
            .pack_message("hi bob", &[bob_key.verkey.clone()], Some(&alice_key.verkey))
            .await
            .unwrap();
        let unpacked = bob.unpack_message(packed.as_bytes()).await.unwrap();
        assert_eq!(unpacked.message, "hi bob");
        assert_eq!(unpacked.sender_verkey, Some(alice_key.verkey));
        assert_eq!(unpacked.recipient_verkey, bob_key.verkey);

        let result = alice.unpack_message(packed.as_bytes()).await;
        assert!(matches!(
            result,
            Err(WalletError::Envelope(envelope::EnvelopeError::NoMatchingKey(_)))
        ));
    }
}

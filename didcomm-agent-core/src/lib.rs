//! Core building blocks of a `DIDComm` agent.
//!
//! This crate provides the stateless and collaborator-level pieces the
//! protocol layer is built on: the packed envelope codec, the key material
//! provider contract, the record storage contract and the message decorators
//! every protocol shares.
//!
//! # Features
//!
//! - Envelope packing and unpacking in two modes:
//!   - Authcrypt: the recipients learn and authenticate the sender verkey
//!   - Anoncrypt: the sender stays anonymous
//! - [`Wallet`] contract with an in-memory [`BasicWallet`]
//! - [`Storage`] contract with scoped cursors and an in-memory [`BasicStorage`]
//! - `~thread`, `~transport` and field signature decorators
//!
//! # Architecture
//!
//! - `envelope`: the pack/unpack codec and its wire types
//! - `wallet`: keys, local and pairwise DIDs, signing
//! - `storage`: tagged record storage and searches
//! - `decorators`: decorators shared by protocol messages
//! - `types`: identity records returned by the wallet
//! - `encoding`: base64url and base58 helpers
//! - `error`: error types and handling
//!
//! # Examples
//!
//! ```rust
//! use didcomm_agent_core::{BasicWallet, Wallet};
//!
//! # tokio_test::block_on(async {
//! let alice = BasicWallet::new();
//! let bob = BasicWallet::new();
//! let bob_key = bob.create_signing_key(None, None).await?;
//!
//! // Anoncrypt: no sender key
//! let packed = alice.pack_message("hello", &[bob_key.verkey.clone()], None).await?;
//! let unpacked = bob.unpack_message(packed.as_bytes()).await?;
//! assert_eq!(unpacked.message, "hello");
//! assert_eq!(unpacked.sender_verkey, None);
//! # Ok::<(), didcomm_agent_core::wallet::WalletError>(())
//! # }).unwrap();
//! ```
//!
//! # Security Considerations
//!
//! - Every decryption failure surfaces as one opaque
//!   [`EnvelopeError::AuthenticationFailed`] kind
//! - Content encryption keys are zeroized when dropped
//! - Field signatures must be verified before the signed value is trusted

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod decorators;
pub mod encoding;
pub mod envelope;
pub mod error;
pub mod prelude;
pub mod storage;
pub mod types;
pub mod wallet;


pub use decorators::{ReturnRoute, SignatureDecorator, ThreadDecorator, TransportDecorator};
pub use envelope::{EnvelopeError, PackAlgorithm, UnpackedMessage};
pub use error::{Error, Result};
pub use storage::{BasicStorage, Storage, StorageError, StorageRecord, StorageSearch, TagFilter};
pub use types::{DidInfo, KeyInfo, Metadata, PairwiseInfo};
pub use wallet::{BasicWallet, Wallet, WalletError};

//! Prelude module for commonly used types and traits.
//!
//! Import everything from this module with
//! `use didcomm_agent_core::prelude::*`.
//!
//! # Example
//!
//! ```rust
//! use didcomm_agent_core::prelude::*;
//!
//! async fn example(wallet: &dyn Wallet, to: String) -> std::result::Result<String, WalletError> {
//!     wallet.pack_message("Hello DIDComm!", &[to], None).await
//! }
//! ```

// Re-export error types
pub use crate::error::{Error, Result};

// Re-export collaborator traits
pub use crate::storage::{Storage, StorageCursor, StorageError, StorageRecord, TagFilter};
pub use crate::wallet::{Wallet, WalletError};

// Re-export identity and message types
pub use crate::decorators::{SignatureDecorator, ThreadDecorator, TransportDecorator};
pub use crate::envelope::{EnvelopeError, UnpackedMessage};
pub use crate::types::{DidInfo, KeyInfo, Metadata, PairwiseInfo};

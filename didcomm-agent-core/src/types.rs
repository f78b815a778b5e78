//! Identity records handed out by the key material provider.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-form metadata attached to keys, DIDs and pairwise relationships.
pub type Metadata = serde_json::Map<String, Value>;

/// A signing key held by the wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyInfo {
    /// The public verification key (base58)
    pub verkey: String,
    /// Key metadata
    #[serde(default)]
    pub metadata: Metadata,
}

/// A local DID the agent controls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DidInfo {
    /// The DID, without method prefix
    pub did: String,
    /// The verification key bound to the DID (base58)
    pub verkey: String,
    /// DID metadata
    #[serde(default)]
    pub metadata: Metadata,
}

impl DidInfo {
    /// Whether the DID is flagged as the agent's public DID.
    pub fn is_public(&self) -> bool {
        self.metadata
            .get("public")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// A completed pairwise relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseInfo {
    /// The peer's DID
    pub their_did: String,
    /// The peer's verification key (base58)
    pub their_verkey: String,
    /// Our DID for this relationship
    pub my_did: String,
    /// Our verification key for this relationship (base58)
    pub my_verkey: String,
    /// Relationship metadata
    #[serde(default)]
    pub metadata: Metadata,
}

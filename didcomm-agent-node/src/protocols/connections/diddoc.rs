//! Legacy DID document exchanged inside connection requests and responses.

use serde::{Deserialize, Serialize};

/// JSON-LD context of the legacy document format.
pub const DID_DOC_CONTEXT: &str = "https://w3id.org/did/v1";

/// DID method prefix of pairwise DIDs.
pub const DID_PREFIX: &str = "did:sov:";

const KEY_TYPE: &str = "Ed25519VerificationKey2018";
const AUTHENTICATION_TYPE: &str = "Ed25519SignatureAuthentication2018";
const SERVICE_TYPE: &str = "IndyAgent";

fn default_context() -> String {
    DID_DOC_CONTEXT.to_string()
}

/// Strips the `did:sov:` prefix, if present.
pub fn canonical_did(did: &str) -> &str {
    did.strip_prefix(DID_PREFIX).unwrap_or(did)
}

/// A verification key entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    /// Key id, `<did>#<n>`
    pub id: String,
    /// Key type
    #[serde(rename = "type")]
    pub key_type: String,
    /// DID controlling the key
    pub controller: String,
    /// The verkey (base58)
    #[serde(rename = "publicKeyBase58")]
    pub public_key_base58: String,
}

/// An authentication reference to a verification key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authentication {
    /// Authentication type
    #[serde(rename = "type")]
    pub auth_type: String,
    /// Id of the referenced public key
    #[serde(rename = "publicKey")]
    pub public_key: String,
}

/// A service endpoint entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Service id, `<did>;<type>`
    pub id: String,
    /// Service type
    #[serde(rename = "type")]
    pub service_type: String,
    /// Selection priority, lowest first
    #[serde(default)]
    pub priority: u32,
    /// Keys messages to this service are packed for
    #[serde(rename = "recipientKeys", default)]
    pub recipient_keys: Vec<String>,
    /// Mediator keys, outermost last
    #[serde(rename = "routingKeys", default)]
    pub routing_keys: Vec<String>,
    /// Delivery endpoint
    #[serde(rename = "serviceEndpoint")]
    pub service_endpoint: String,
}

/// A DID document in the legacy connection protocol format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DidDoc {
    /// JSON-LD context
    #[serde(rename = "@context", default = "default_context")]
    pub context: String,
    /// The fully qualified DID
    pub id: String,
    /// Verification keys
    #[serde(rename = "publicKey", default)]
    pub public_key: Vec<PublicKey>,
    /// Authentication references
    #[serde(default)]
    pub authentication: Vec<Authentication>,
    /// Service endpoints
    #[serde(default)]
    pub service: Vec<Service>,
}

impl DidDoc {
    /// Builds a document for a pairwise DID with one key and one service.
    pub fn new(did: &str, verkey: &str, endpoint: &str, routing_keys: Vec<String>) -> Self {
        let qualified = format!("{DID_PREFIX}{}", canonical_did(did));
        let key_id = format!("{qualified}#1");
        Self {
            context: default_context(),
            id: qualified.clone(),
            public_key: vec![PublicKey {
                id: key_id.clone(),
                key_type: KEY_TYPE.to_string(),
                controller: qualified.clone(),
                public_key_base58: verkey.to_string(),
            }],
            authentication: vec![Authentication {
                auth_type: AUTHENTICATION_TYPE.to_string(),
                public_key: key_id,
            }],
            service: vec![Service {
                id: format!("{qualified};indy"),
                service_type: SERVICE_TYPE.to_string(),
                priority: 0,
                recipient_keys: vec![verkey.to_string()],
                routing_keys,
                service_endpoint: endpoint.to_string(),
            }],
        }
    }

    /// The DID without method prefix.
    pub fn did(&self) -> &str {
        canonical_did(&self.id)
    }

    /// Verkeys of the keys the DID controls.
    pub fn controlled_keys(&self) -> impl Iterator<Item = &str> {
        self.public_key
            .iter()
            .filter(|key| canonical_did(&key.controller) == self.did())
            .map(|key| key.public_key_base58.as_str())
    }

    /// The highest priority service that lists recipient keys.
    pub fn preferred_service(&self) -> Option<&Service> {
        self.service
            .iter()
            .filter(|service| !service.recipient_keys.is_empty())
            .min_by_key(|service| service.priority)
    }
}

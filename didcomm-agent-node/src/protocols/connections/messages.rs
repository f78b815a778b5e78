//! Connection protocol messages.

use didcomm_agent_core::encoding::{b64url_decode, b64url_encode};
use didcomm_agent_core::SignatureDecorator;
use serde::{Deserialize, Serialize};
use url::Url;

use super::diddoc::DidDoc;
use crate::error::{ConnectionManagerError, Result};
use crate::message::{message_type, AgentMessage, MessageHeader, ProtocolMessage};

/// Query parameter carrying an invitation in a URL.
pub const INVITATION_QUERY_PARAM: &str = "c_i";

/// The DID and DID document a party uses for the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDetail {
    /// The pairwise DID
    #[serde(rename = "DID")]
    pub did: String,
    /// The DID document
    #[serde(rename = "DIDDoc", default, skip_serializing_if = "Option::is_none")]
    pub did_doc: Option<DidDoc>,
}

/// An out-of-band invitation to connect.
///
/// Carries either a public `did` or `recipientKeys` with a
/// `serviceEndpoint`, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInvitation {
    /// Common header
    #[serde(flatten)]
    pub header: MessageHeader,
    /// Inviter label
    #[serde(default)]
    pub label: String,
    /// Public DID of the inviter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub did: Option<String>,
    /// Keys the request must be packed for
    #[serde(rename = "recipientKeys", default, skip_serializing_if = "Option::is_none")]
    pub recipient_keys: Option<Vec<String>>,
    /// Inviter endpoint
    #[serde(rename = "serviceEndpoint", default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Mediator keys
    #[serde(rename = "routingKeys", default, skip_serializing_if = "Option::is_none")]
    pub routing_keys: Option<Vec<String>>,
    /// Inviter image
    #[serde(rename = "imageUrl", default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl ProtocolMessage for ConnectionInvitation {
    const TYPE: &'static str = message_type!("connections/1.0/invitation");

    fn message_header(&self) -> &MessageHeader {
        &self.header
    }

    fn message_header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }
}

impl ConnectionInvitation {
    /// Creates a keyed invitation.
    pub fn new(
        label: impl Into<String>,
        recipient_keys: Vec<String>,
        endpoint: impl Into<String>,
        routing_keys: Vec<String>,
    ) -> Self {
        Self {
            header: MessageHeader::default(),
            label: label.into(),
            did: None,
            recipient_keys: Some(recipient_keys),
            endpoint: Some(endpoint.into()),
            routing_keys: (!routing_keys.is_empty()).then_some(routing_keys),
            image_url: None,
        }
    }

    /// Creates an invitation naming a public DID.
    pub fn for_public_did(label: impl Into<String>, did: impl Into<String>) -> Self {
        Self {
            header: MessageHeader::default(),
            label: label.into(),
            did: Some(did.into()),
            recipient_keys: None,
            endpoint: None,
            routing_keys: None,
            image_url: None,
        }
    }

    /// Checks that exactly one of `did` or `recipientKeys` + `serviceEndpoint` is present.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectionManagerError`] describing the violation.
    pub fn validate(&self) -> std::result::Result<(), ConnectionManagerError> {
        let has_keys = self
            .recipient_keys
            .as_ref()
            .is_some_and(|keys| !keys.is_empty());
        match (self.did.is_some(), has_keys, self.endpoint.is_some()) {
            (true, false, false) | (false, true, true) => Ok(()),
            (true, _, _) => Err(ConnectionManagerError::new(
                "Invitation must not contain both a DID and recipientKeys or serviceEndpoint",
            )),
            (false, false, _) => Err(ConnectionManagerError::new(
                "Invitation must contain either a DID or recipientKeys",
            )),
            (false, true, false) => Err(ConnectionManagerError::new(
                "Invitation with recipientKeys must contain a serviceEndpoint",
            )),
        }
    }

    /// The first recipient key, used to correlate the request.
    pub fn invitation_key(&self) -> Option<&str> {
        self.recipient_keys
            .as_ref()
            .and_then(|keys| keys.first())
            .map(String::as_str)
    }

    /// Encodes the invitation as a URL on `base_url`, or on its endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if no base URL is available or it does not parse.
    pub fn to_url(&self, base_url: Option<&str>) -> Result<String> {
        let base = base_url
            .or(self.endpoint.as_deref())
            .ok_or_else(|| ConnectionManagerError::new("No base URL for invitation"))?;
        let mut url = Url::parse(base)
            .map_err(|e| ConnectionManagerError::new(format!("Invalid invitation URL: {e}")))?;
        let json = serde_json::to_string(&self.to_json()?)?;
        url.query_pairs_mut()
            .append_pair(INVITATION_QUERY_PARAM, &b64url_encode(json));
        Ok(url.to_string())
    }

    /// Decodes an invitation from a URL produced by [`ConnectionInvitation::to_url`].
    ///
    /// # Errors
    ///
    /// Returns an error if the URL lacks the invitation parameter or the
    /// payload is not a valid invitation.
    pub fn from_url(invitation_url: &str) -> Result<Self> {
        let url = Url::parse(invitation_url)
            .map_err(|e| ConnectionManagerError::new(format!("Invalid invitation URL: {e}")))?;
        let encoded = url
            .query_pairs()
            .find(|(name, _)| name == INVITATION_QUERY_PARAM)
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| ConnectionManagerError::new("Invitation URL has no c_i parameter"))?;
        let json = b64url_decode(encoded)
            .map_err(|e| ConnectionManagerError::new(format!("Invalid invitation encoding: {e}")))?;
        let invitation: Self = serde_json::from_slice(&json)?;
        invitation.validate()?;
        Ok(invitation)
    }
}

/// A request to connect, answering an invitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRequest {
    /// Common header
    #[serde(flatten)]
    pub header: MessageHeader,
    /// Requester label
    #[serde(default)]
    pub label: String,
    /// Requester DID and DID document
    pub connection: ConnectionDetail,
    /// Requester image
    #[serde(rename = "imageUrl", default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl ProtocolMessage for ConnectionRequest {
    const TYPE: &'static str = message_type!("connections/1.0/request");

    fn message_header(&self) -> &MessageHeader {
        &self.header
    }

    fn message_header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }
}

/// The inviter's answer to a request.
///
/// The connection detail travels only as a field signature made with the
/// invitation key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionResponse {
    /// Common header, threaded on the request
    #[serde(flatten)]
    pub header: MessageHeader,
    /// Signed connection detail
    #[serde(rename = "connection~sig")]
    pub connection_sig: SignatureDecorator,
}

impl ProtocolMessage for ConnectionResponse {
    const TYPE: &'static str = message_type!("connections/1.0/response");

    fn message_header(&self) -> &MessageHeader {
        &self.header
    }

    fn message_header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }
}

//! Persisted connection state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use didcomm_agent_core::{StorageRecord, TagFilter};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::messages::ConnectionInvitation;
use crate::context::AgentContext;
use crate::error::{ConnectionManagerError, Result};

/// Storage type of connection records.
pub const RECORD_TYPE: &str = "connection";

/// Storage type of invitations attached to a connection.
pub const INVITATION_RECORD_TYPE: &str = "connection_invitation";

/// Admin event topic for connection changes.
pub const EVENT_TOPIC: &str = "connections";

/// Which side sent the invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Initiator {
    /// This agent created the invitation
    #[serde(rename = "self")]
    Local,
    /// The peer created the invitation
    #[serde(rename = "external")]
    External,
}

impl Initiator {
    /// The stored tag value.
    pub fn as_str(self) -> &'static str {
        match self {
            Initiator::Local => "self",
            Initiator::External => "external",
        }
    }
}

/// Connection protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Created, nothing exchanged
    Init,
    /// Invitation created or received
    Invitation,
    /// Request created or received
    Request,
    /// Response created or accepted
    Response,
    /// Traffic seen after the response
    Active,
    /// Protocol violation
    Error,
}

impl ConnectionState {
    /// The stored tag value.
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Init => "init",
            ConnectionState::Invitation => "invitation",
            ConnectionState::Request => "request",
            ConnectionState::Response => "response",
            ConnectionState::Active => "active",
            ConnectionState::Error => "error",
        }
    }
}

/// Whether a mediator must forward messages for the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingState {
    /// Direct delivery
    None,
    /// A route must be set up
    Required,
    /// Route setup in progress
    Pending,
    /// Messages are routed
    Active,
}

/// Whether protocol steps run without operator approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcceptMode {
    /// Respond automatically
    Auto,
    /// Wait for the operator
    Manual,
}

/// A pairwise connection and its protocol state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    /// Record id, assigned on first save
    #[serde(default)]
    pub connection_id: Option<String>,
    /// Which side sent the invitation
    pub initiator: Initiator,
    /// The key the invitation was issued for
    #[serde(default)]
    pub invitation_key: Option<String>,
    /// The `@id` of the connection request
    #[serde(default)]
    pub request_id: Option<String>,
    /// Our pairwise DID
    #[serde(default)]
    pub my_did: Option<String>,
    /// The peer's pairwise DID
    #[serde(default)]
    pub their_did: Option<String>,
    /// The peer's label
    #[serde(default)]
    pub their_label: Option<String>,
    /// The peer's role
    #[serde(default)]
    pub their_role: Option<String>,
    /// Protocol state
    pub state: ConnectionState,
    /// Mediation state
    pub routing_state: RoutingState,
    /// Approval mode
    pub accept: AcceptMode,
    /// Reason for the error state
    #[serde(default)]
    pub error_msg: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last save time
    pub updated_at: DateTime<Utc>,
}

impl ConnectionRecord {
    /// Creates an unsaved record.
    pub fn new(initiator: Initiator, state: ConnectionState) -> Self {
        let now = Utc::now();
        Self {
            connection_id: None,
            initiator,
            invitation_key: None,
            request_id: None,
            my_did: None,
            their_did: None,
            their_label: None,
            their_role: None,
            state,
            routing_state: RoutingState::None,
            accept: AcceptMode::Manual,
            error_msg: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The record id, empty before the first save.
    pub fn id(&self) -> &str {
        self.connection_id.as_deref().unwrap_or_default()
    }

    /// Whether messages can flow on the connection.
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Active
    }

    /// Moves to `next`, which must not precede the current state.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectionManagerError`] for a backward move or any move
    /// out of the error state.
    pub fn advance(&mut self, next: ConnectionState) -> std::result::Result<(), ConnectionManagerError> {
        if self.state == ConnectionState::Error || (next != ConnectionState::Error && next < self.state) {
            return Err(ConnectionManagerError::new(format!(
                "Invalid connection state transition: {} -> {}",
                self.state.as_str(),
                next.as_str()
            )));
        }
        if self.state != next {
            debug!(
                connection_id = %self.id(),
                from = self.state.as_str(),
                to = next.as_str(),
                "connection state change"
            );
        }
        self.state = next;
        Ok(())
    }

    /// Marks the record as failed.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.state = ConnectionState::Error;
        self.error_msg = Some(reason.into());
    }

    fn tags(&self) -> HashMap<String, String> {
        let mut tags = HashMap::from([
            ("state".to_string(), self.state.as_str().to_string()),
            ("initiator".to_string(), self.initiator.as_str().to_string()),
        ]);
        let optional = [
            ("my_did", &self.my_did),
            ("their_did", &self.their_did),
            ("request_id", &self.request_id),
            ("invitation_key", &self.invitation_key),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                tags.insert(name.to_string(), value.clone());
            }
        }
        tags
    }

    /// Persists the record, assigning an id on first save, and emits an
    /// admin event.
    ///
    /// # Errors
    ///
    /// Propagates storage and serialization errors.
    pub async fn save(&mut self, context: &AgentContext, reason: &str) -> Result<()> {
        self.updated_at = Utc::now();
        let storage = context.storage.as_ref();
        match &self.connection_id {
            Some(id) => {
                let record = storage.get_record(RECORD_TYPE, id).await?;
                storage
                    .update_record_value(&record, &serde_json::to_string(self)?)
                    .await?;
                storage.update_record_tags(&record, &self.tags()).await?;
            }
            None => {
                let id = Uuid::new_v4().to_string();
                self.connection_id = Some(id.clone());
                let record =
                    StorageRecord::new(RECORD_TYPE, serde_json::to_string(self)?, self.tags())
                        .with_id(id);
                storage.add_record(&record).await?;
            }
        }

        debug!(
            connection_id = %self.id(),
            state = self.state.as_str(),
            reason,
            "saved connection"
        );
        let mut payload = serde_json::to_value(&*self)?;
        if let serde_json::Value::Object(map) = &mut payload {
            map.insert("reason".to_string(), reason.into());
        }
        context.events.emit(EVENT_TOPIC, payload);
        Ok(())
    }

    fn from_storage(record: &StorageRecord) -> Result<Self> {
        Ok(serde_json::from_str(&record.value)?)
    }

    /// Fetches a record by id.
    ///
    /// # Errors
    ///
    /// Returns a storage not-found error for an unknown id.
    pub async fn retrieve_by_id(context: &AgentContext, connection_id: &str) -> Result<Self> {
        let record = context
            .storage
            .get_record(RECORD_TYPE, connection_id)
            .await?;
        Self::from_storage(&record)
    }

    /// Fetches the single record matching `tag_filter`.
    ///
    /// # Errors
    ///
    /// Returns a storage error when zero or several records match.
    pub async fn retrieve_by_tags(context: &AgentContext, tag_filter: TagFilter) -> Result<Self> {
        let record = context
            .storage
            .search_records(RECORD_TYPE, tag_filter)
            .fetch_single()
            .await?;
        Self::from_storage(&record)
    }

    /// Fetches the record for a peer DID, optionally scoped to our DID.
    ///
    /// # Errors
    ///
    /// Returns a storage error when zero or several records match.
    pub async fn retrieve_by_did(
        context: &AgentContext,
        their_did: &str,
        my_did: Option<&str>,
    ) -> Result<Self> {
        let mut filter = TagFilter::from([("their_did".to_string(), their_did.to_string())]);
        if let Some(my_did) = my_did {
            filter.insert("my_did".to_string(), my_did.to_string());
        }
        Self::retrieve_by_tags(context, filter).await
    }

    /// Fetches the record for an invitation key.
    ///
    /// # Errors
    ///
    /// Returns a storage error when zero or several records match.
    pub async fn retrieve_by_invitation_key(
        context: &AgentContext,
        invitation_key: &str,
        initiator: Option<Initiator>,
        state: Option<ConnectionState>,
    ) -> Result<Self> {
        let mut filter =
            TagFilter::from([("invitation_key".to_string(), invitation_key.to_string())]);
        if let Some(initiator) = initiator {
            filter.insert("initiator".to_string(), initiator.as_str().to_string());
        }
        if let Some(state) = state {
            filter.insert("state".to_string(), state.as_str().to_string());
        }
        Self::retrieve_by_tags(context, filter).await
    }

    /// Fetches the record for a connection request id.
    ///
    /// # Errors
    ///
    /// Returns a storage error when zero or several records match.
    pub async fn retrieve_by_request_id(context: &AgentContext, request_id: &str) -> Result<Self> {
        let filter = TagFilter::from([("request_id".to_string(), request_id.to_string())]);
        Self::retrieve_by_tags(context, filter).await
    }

    /// Lists every record matching `tag_filter`.
    ///
    /// # Errors
    ///
    /// Propagates storage and deserialization errors.
    pub async fn query(context: &AgentContext, tag_filter: TagFilter) -> Result<Vec<Self>> {
        let records = context
            .storage
            .search_records(RECORD_TYPE, tag_filter)
            .fetch_all()
            .await?;
        records.iter().map(Self::from_storage).collect()
    }

    /// Stores the invitation this connection was created from.
    ///
    /// # Errors
    ///
    /// Fails if the record has not been saved yet, or on storage errors.
    pub async fn attach_invitation(
        &self,
        context: &AgentContext,
        invitation: &ConnectionInvitation,
    ) -> Result<()> {
        let connection_id = self
            .connection_id
            .clone()
            .ok_or_else(|| ConnectionManagerError::new("Connection has not been saved"))?;
        let mut tags = HashMap::from([("connection_id".to_string(), connection_id)]);
        if let Some(key) = invitation.invitation_key() {
            tags.insert("invitation_key".to_string(), key.to_string());
        }
        let record = StorageRecord::new(
            INVITATION_RECORD_TYPE,
            serde_json::to_string(invitation)?,
            tags,
        );
        context.storage.add_record(&record).await?;
        Ok(())
    }

    /// Fetches the invitation attached to this connection.
    ///
    /// # Errors
    ///
    /// Returns a storage not-found error if none was attached.
    pub async fn retrieve_invitation(&self, context: &AgentContext) -> Result<ConnectionInvitation> {
        let filter = TagFilter::from([("connection_id".to_string(), self.id().to_string())]);
        let record = context
            .storage
            .search_records(INVITATION_RECORD_TYPE, filter)
            .fetch_single()
            .await?;
        Ok(serde_json::from_str(&record.value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::agent_context;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_advance_is_monotonic() {
        let mut record = ConnectionRecord::new(Initiator::Local, ConnectionState::Invitation);
        record.advance(ConnectionState::Request).unwrap();
        record.advance(ConnectionState::Request).unwrap();
        record.advance(ConnectionState::Response).unwrap();
        assert!(record.advance(ConnectionState::Invitation).is_err());
        assert_eq!(record.state, ConnectionState::Response);

        record.advance(ConnectionState::Error).unwrap();
        assert!(record.advance(ConnectionState::Active).is_err());
    }

    #[test]
    fn test_serialized_enums() {
        let record = ConnectionRecord::new(Initiator::Local, ConnectionState::Invitation);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["initiator"], "self");
        assert_eq!(value["state"], "invitation");
        assert_eq!(value["routing_state"], "none");
        assert_eq!(value["accept"], "manual");
    }

    #[tokio::test]
    async fn test_save_and_retrieve() {
        let (context, mut events) = agent_context();
        let mut record = ConnectionRecord::new(Initiator::Local, ConnectionState::Invitation);
        record.invitation_key = Some("inv-key".to_string());
        record.save(&context, "created").await.unwrap();

        let id = record.connection_id.clone().unwrap();
        assert_eq!(ConnectionRecord::retrieve_by_id(&context, &id).await.unwrap(), record);

        let event = events.recv().await.unwrap();
        assert_eq!(event.topic, EVENT_TOPIC);
        assert_eq!(event.payload["state"], "invitation");
        assert_eq!(event.payload["reason"], "created");

        record.their_did = Some("their".to_string());
        record.advance(ConnectionState::Request).unwrap();
        record.save(&context, "updated").await.unwrap();
        assert_eq!(record.connection_id.as_deref(), Some(id.as_str()));

        let found = ConnectionRecord::retrieve_by_did(&context, "their", None)
            .await
            .unwrap();
        assert_eq!(found.state, ConnectionState::Request);

        let by_key = ConnectionRecord::retrieve_by_invitation_key(
            &context,
            "inv-key",
            Some(Initiator::Local),
            Some(ConnectionState::Invitation),
        )
        .await;
        assert!(by_key.unwrap_err().is_not_found());

        let all = ConnectionRecord::query(&context, TagFilter::new()).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_attach_invitation() {
        let (context, _events) = agent_context();
        let mut record = ConnectionRecord::new(Initiator::External, ConnectionState::Invitation);
        let invitation = ConnectionInvitation::new(
            "Alice",
            vec!["key".to_string()],
            "https://alice.example",
            vec![],
        );
        assert!(record.attach_invitation(&context, &invitation).await.is_err());

        record.save(&context, "received").await.unwrap();
        record.attach_invitation(&context, &invitation).await.unwrap();
        assert_eq!(record.retrieve_invitation(&context).await.unwrap(), invitation);
    }
}

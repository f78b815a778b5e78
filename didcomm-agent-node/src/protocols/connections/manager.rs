//! Connection protocol state machine.
//!
//! [`ConnectionManager`] drives a [`ConnectionRecord`] through
//! `invitation -> request -> response -> active`. Every operation loads or
//! receives the record, checks the transition, mutates and saves it. An
//! operation that fails leaves the stored record in its last valid state.

use std::collections::HashMap;

use didcomm_agent_core::{SignatureDecorator, StorageError, StorageRecord, TagFilter, WalletError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::diddoc::{canonical_did, DidDoc};
use super::messages::{ConnectionDetail, ConnectionInvitation, ConnectionRequest, ConnectionResponse};
use super::record::{AcceptMode, ConnectionRecord, ConnectionState, Initiator, RoutingState};
use crate::context::{AgentContext, MessageDelivery};
use crate::error::{ConnectionManagerError, Result};
use crate::message::MessageHeader;

/// Storage type of peer DID documents.
pub const DID_DOC_RECORD_TYPE: &str = "did_doc";

/// Storage type of the key to DID index.
pub const DID_KEY_RECORD_TYPE: &str = "did_key";

/// Where and how to deliver messages on a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTarget {
    /// The peer DID, unknown before the response
    pub did: Option<String>,
    /// Delivery endpoint
    pub endpoint: String,
    /// Peer label
    pub label: String,
    /// Keys the message is packed for
    pub recipient_keys: Vec<String>,
    /// Mediator keys, innermost first
    pub routing_keys: Vec<String>,
    /// Our verkey; `None` packs anoncrypt
    pub sender_key: Option<String>,
}

/// Options for [`ConnectionManager::create_invitation`].
#[derive(Debug, Clone, Default)]
pub struct InvitationOptions {
    /// Label to present, defaults to the agent label
    pub label: Option<String>,
    /// Endpoint to advertise, defaults to the agent endpoint
    pub endpoint: Option<String>,
    /// Role expected of the invitee
    pub their_role: Option<String>,
    /// Approval mode for the incoming request
    pub accept: Option<AcceptMode>,
    /// DID of a router that must forward for this connection
    pub router_did: Option<String>,
    /// Mediator keys to advertise
    pub routing_keys: Vec<String>,
}

fn connection_error(message: impl Into<String>) -> crate::error::Error {
    ConnectionManagerError::new(message).into()
}

/// Checks that the detail carries a DID document for its own DID.
fn checked_did_doc(detail: &ConnectionDetail) -> Result<&DidDoc> {
    let doc = detail
        .did_doc
        .as_ref()
        .ok_or_else(|| connection_error("No DIDDoc provided; cannot connect to public DID"))?;
    if canonical_did(&detail.did) != doc.did() {
        return Err(connection_error(format!(
            "Connection DID {} does not match DID Doc id {}",
            detail.did, doc.id
        )));
    }
    Ok(doc)
}

/// Converts a storage miss into `None`.
fn found<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Runs the connection protocol for one agent.
#[derive(Clone)]
pub struct ConnectionManager {
    context: AgentContext,
}

impl ConnectionManager {
    /// Creates a manager over the agent's wallet and storage.
    pub fn new(context: AgentContext) -> Self {
        Self { context }
    }

    /// Creates an invitation with a fresh invitation key and saves its record.
    ///
    /// # Errors
    ///
    /// Propagates wallet and storage errors.
    pub async fn create_invitation(
        &self,
        options: InvitationOptions,
    ) -> Result<(ConnectionRecord, ConnectionInvitation)> {
        let config = &self.context.config;
        let invitation_key = self.context.wallet.create_signing_key(None, None).await?;

        let mut record = ConnectionRecord::new(Initiator::Local, ConnectionState::Invitation);
        record.invitation_key = Some(invitation_key.verkey.clone());
        record.their_role = options.their_role;
        record.accept = options.accept.unwrap_or(if config.auto_accept_requests {
            AcceptMode::Auto
        } else {
            AcceptMode::Manual
        });
        if options.router_did.is_some() {
            record.routing_state = RoutingState::Required;
        }
        record.save(&self.context, "Created new invitation").await?;

        let invitation = ConnectionInvitation::new(
            options.label.unwrap_or_else(|| config.label.clone()),
            vec![invitation_key.verkey],
            options.endpoint.unwrap_or_else(|| config.endpoint.clone()),
            options.routing_keys,
        );
        record.attach_invitation(&self.context, &invitation).await?;

        info!(connection_id = %record.id(), "created connection invitation");
        Ok((record, invitation))
    }

    /// Creates an invitation naming the agent's public DID.
    ///
    /// No record is created; each request on the public DID starts its own.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectionManagerError`] if no public DID is set.
    pub async fn create_public_invitation(&self, label: Option<&str>) -> Result<ConnectionInvitation> {
        let public = self
            .context
            .wallet
            .get_public_did()
            .await?
            .ok_or_else(|| connection_error("Cannot create public invitation with no public DID"))?;
        Ok(ConnectionInvitation::for_public_did(
            label.unwrap_or(&self.context.config.label),
            public.did,
        ))
    }

    /// Records an invitation received out of band.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectionManagerError`] for an invalid invitation, and
    /// propagates storage errors.
    pub async fn receive_invitation(
        &self,
        invitation: &ConnectionInvitation,
        their_role: Option<&str>,
        accept: Option<AcceptMode>,
    ) -> Result<ConnectionRecord> {
        invitation.validate()?;

        let mut record = ConnectionRecord::new(Initiator::External, ConnectionState::Invitation);
        record.invitation_key = invitation.invitation_key().map(str::to_string);
        record.their_label = Some(invitation.label.clone());
        record.their_role = their_role.map(str::to_string);
        record.accept = accept.unwrap_or(if self.context.config.auto_accept_invites {
            AcceptMode::Auto
        } else {
            AcceptMode::Manual
        });
        record.save(&self.context, "Created new connection record from invitation").await?;
        record.attach_invitation(&self.context, invitation).await?;

        info!(connection_id = %record.id(), label = %invitation.label, "received connection invitation");
        Ok(record)
    }

    /// Builds a request answering the record's invitation.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectionManagerError`] unless the record is in the
    /// invitation state, and propagates wallet and storage errors.
    pub async fn create_request(
        &self,
        record: &mut ConnectionRecord,
        label: Option<&str>,
        endpoint: Option<&str>,
    ) -> Result<ConnectionRequest> {
        if record.state != ConnectionState::Invitation {
            return Err(connection_error(format!(
                "Cannot create connection request in state {}",
                record.state.as_str()
            )));
        }

        let wallet = &self.context.wallet;
        let my_info = match &record.my_did {
            Some(did) => wallet.get_local_did(did).await?,
            None => wallet.create_local_did(None, None, None).await?,
        };
        let config = &self.context.config;
        let did_doc = DidDoc::new(
            &my_info.did,
            &my_info.verkey,
            endpoint.unwrap_or(&config.endpoint),
            vec![],
        );
        let request = ConnectionRequest {
            header: MessageHeader::default(),
            label: label.unwrap_or(&config.label).to_string(),
            connection: ConnectionDetail {
                did: my_info.did.clone(),
                did_doc: Some(did_doc),
            },
            image_url: None,
        };

        record.advance(ConnectionState::Request)?;
        record.my_did = Some(my_info.did);
        record.request_id = Some(request.header.id.clone());
        record.save(&self.context, "Created connection request").await?;
        Ok(request)
    }

    /// Correlates an inbound request with its invitation and records the
    /// requester's DID document.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectionManagerError`] for an inconsistent DID document,
    /// a record in the wrong state, or a missing invitation when invitations
    /// are required.
    pub async fn receive_request(
        &self,
        request: &ConnectionRequest,
        delivery: &MessageDelivery,
    ) -> Result<ConnectionRecord> {
        let did_doc = checked_did_doc(&request.connection)?;

        let (connection_key, existing) = match (&delivery.recipient_did, delivery.recipient_did_public) {
            (Some(public_did), true) => {
                let my_info = self.context.wallet.get_local_did(public_did).await?;
                (my_info.verkey, None)
            }
            _ => {
                let connection_key = delivery
                    .recipient_verkey
                    .clone()
                    .ok_or_else(|| connection_error("Connection request has no recipient key"))?;
                let existing = self
                    .find_request_target(&connection_key, canonical_did(&request.connection.did))
                    .await?;
                (connection_key, existing)
            }
        };

        let mut record = match existing {
            Some(mut record) => {
                match record.state {
                    ConnectionState::Invitation | ConnectionState::Request => {
                        record.advance(ConnectionState::Request)?;
                    }
                    ConnectionState::Response => {
                        debug!(connection_id = %record.id(), "connection request received again");
                    }
                    state => {
                        return Err(connection_error(format!(
                            "Connection request received in state {}",
                            state.as_str()
                        )))
                    }
                }
                record
            }
            None if self.context.config.require_invitation && !delivery.recipient_did_public => {
                return Err(connection_error("No invitation found for pairwise connection"));
            }
            None => {
                let mut record = ConnectionRecord::new(Initiator::External, ConnectionState::Request);
                record.invitation_key = Some(connection_key);
                if self.context.config.auto_accept_requests {
                    record.accept = AcceptMode::Auto;
                }
                record
            }
        };

        self.store_did_document(did_doc).await?;
        record.their_did = Some(canonical_did(&request.connection.did).to_string());
        record.their_label = Some(request.label.clone());
        record.request_id = Some(request.header.id.clone());
        record.save(&self.context, "Received connection request").await?;

        info!(connection_id = %record.id(), their_did = ?record.their_did, "received connection request");
        Ok(record)
    }

    /// The local record a request on `connection_key` from `their_did` belongs to.
    ///
    /// An open invitation matches any requester. A record already past the
    /// invitation only matches a retransmission from the same DID.
    async fn find_request_target(
        &self,
        connection_key: &str,
        their_did: &str,
    ) -> Result<Option<ConnectionRecord>> {
        let invited = found(
            ConnectionRecord::retrieve_by_invitation_key(
                &self.context,
                connection_key,
                Some(Initiator::Local),
                Some(ConnectionState::Invitation),
            )
            .await,
        )?;
        if invited.is_some() {
            return Ok(invited);
        }

        let tag_filter = TagFilter::from([
            ("invitation_key".to_string(), connection_key.to_string()),
            ("initiator".to_string(), Initiator::Local.as_str().to_string()),
            ("their_did".to_string(), their_did.to_string()),
        ]);
        let retransmitted = ConnectionRecord::query(&self.context, tag_filter)
            .await?
            .into_iter()
            .find(|record| {
                matches!(record.state, ConnectionState::Request | ConnectionState::Response)
            });
        if retransmitted.is_none() {
            debug!(their_did, "no open invitation for connection request");
        }
        Ok(retransmitted)
    }

    /// Builds a response whose connection detail is signed with the
    /// invitation key.
    ///
    /// May be called again in the response state to re-issue the response.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectionManagerError`] unless the record is in the
    /// request or response state, and propagates wallet and storage errors.
    pub async fn create_response(
        &self,
        record: &mut ConnectionRecord,
        endpoint: Option<&str>,
    ) -> Result<ConnectionResponse> {
        if !matches!(record.state, ConnectionState::Request | ConnectionState::Response) {
            return Err(connection_error(format!(
                "Cannot create connection response in state {}",
                record.state.as_str()
            )));
        }
        let request_id = record
            .request_id
            .clone()
            .ok_or_else(|| connection_error("Connection has no request id"))?;
        let invitation_key = record
            .invitation_key
            .clone()
            .ok_or_else(|| connection_error("Connection has no invitation key"))?;

        let wallet = &self.context.wallet;
        let my_info = match &record.my_did {
            Some(did) => wallet.get_local_did(did).await?,
            None => wallet.create_local_did(None, None, None).await?,
        };
        let did_doc = DidDoc::new(
            &my_info.did,
            &my_info.verkey,
            endpoint.unwrap_or(&self.context.config.endpoint),
            vec![],
        );
        let detail = ConnectionDetail {
            did: my_info.did.clone(),
            did_doc: Some(did_doc),
        };
        let connection_sig =
            SignatureDecorator::create(&detail, &invitation_key, wallet.as_ref(), None).await?;
        let response = ConnectionResponse {
            header: MessageHeader::reply_to(request_id),
            connection_sig,
        };

        record.advance(ConnectionState::Response)?;
        record.my_did = Some(my_info.did);
        record.save(&self.context, "Created connection response").await?;
        Ok(response)
    }

    /// Verifies a response and records the inviter's DID document.
    ///
    /// The signature is checked against the invitation key before the record
    /// is touched.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectionManagerError`] when no request matches, the
    /// record is in the wrong state, or the signature or DID document are
    /// invalid.
    pub async fn accept_response(
        &self,
        response: &ConnectionResponse,
        delivery: &MessageDelivery,
    ) -> Result<ConnectionRecord> {
        let mut record = None;
        if let Some(thid) = response.header.thread.as_ref().and_then(|t| t.thid.as_deref()) {
            record = found(ConnectionRecord::retrieve_by_request_id(&self.context, thid).await)?;
        }
        if record.is_none() {
            if let (Some(sender_did), Some(recipient_did)) =
                (&delivery.sender_did, &delivery.recipient_did)
            {
                record = found(
                    ConnectionRecord::retrieve_by_did(&self.context, sender_did, Some(recipient_did))
                        .await,
                )?;
            }
        }
        let mut record =
            record.ok_or_else(|| connection_error("No corresponding connection request found"))?;

        if !matches!(record.state, ConnectionState::Request | ConnectionState::Response) {
            return Err(connection_error(format!(
                "Cannot accept connection response in state {}",
                record.state.as_str()
            )));
        }

        let signature = &response.connection_sig;
        let invitation_key = record
            .invitation_key
            .as_deref()
            .ok_or_else(|| connection_error("Connection has no invitation key"))?;
        if signature.signer != invitation_key {
            return Err(connection_error(
                "Connection response was not signed by the invitation key",
            ));
        }
        if !matches!(signature.verify(self.context.wallet.as_ref()).await, Ok(true)) {
            warn!(connection_id = %record.id(), "connection response signature rejected");
            return Err(connection_error("Connection response signature is invalid"));
        }
        let (detail, _timestamp): (ConnectionDetail, u64) = signature.decode()?;
        let did_doc = checked_did_doc(&detail)?;

        self.store_did_document(did_doc).await?;
        record.advance(ConnectionState::Response)?;
        record.their_did = Some(canonical_did(&detail.did).to_string());
        record.save(&self.context, "Accepted connection response").await?;

        info!(connection_id = %record.id(), "accepted connection response");
        Ok(record)
    }

    /// Finds the connection an authenticated message belongs to.
    ///
    /// With `auto_complete`, a connection found in the response state is
    /// promoted to active and its pairwise relationship recorded in the
    /// wallet. Without a DID match, an invitation record issued for
    /// `my_verkey` is returned.
    ///
    /// # Errors
    ///
    /// Propagates storage errors other than not found.
    pub async fn find_connection(
        &self,
        their_did: Option<&str>,
        my_did: Option<&str>,
        my_verkey: Option<&str>,
        auto_complete: bool,
    ) -> Result<Option<ConnectionRecord>> {
        if let Some(their_did) = their_did {
            let record =
                found(ConnectionRecord::retrieve_by_did(&self.context, their_did, my_did).await)?;
            if let Some(mut record) = record {
                if record.state == ConnectionState::Response && auto_complete {
                    record.advance(ConnectionState::Active)?;
                    record.save(&self.context, "Connection promoted to active").await?;
                    self.record_pairwise(&record).await;
                    info!(connection_id = %record.id(), "connection active");
                }
                return Ok(Some(record));
            }
        }

        if let Some(my_verkey) = my_verkey {
            return found(
                ConnectionRecord::retrieve_by_invitation_key(
                    &self.context,
                    my_verkey,
                    Some(Initiator::Local),
                    Some(ConnectionState::Invitation),
                )
                .await,
            );
        }
        Ok(None)
    }

    async fn record_pairwise(&self, record: &ConnectionRecord) {
        let (Some(their_did), Some(my_did)) = (&record.their_did, &record.my_did) else {
            return;
        };
        let their_verkey = match self.fetch_did_document(their_did).await {
            Ok(doc) => doc.controlled_keys().next().map(str::to_string),
            Err(e) => {
                warn!(connection_id = %record.id(), error = %e, "no DID document for pairwise");
                return;
            }
        };
        let Some(their_verkey) = their_verkey else {
            return;
        };
        match self
            .context
            .wallet
            .create_pairwise(their_did, &their_verkey, Some(my_did), None)
            .await
        {
            Ok(_) | Err(WalletError::Duplicate(_)) => {}
            Err(e) => warn!(connection_id = %record.id(), error = %e, "failed to record pairwise"),
        }
    }

    /// Fills in the DIDs of an inbound delivery and resolves its connection.
    ///
    /// # Errors
    ///
    /// Propagates wallet and storage errors other than not found.
    pub async fn resolve_inbound_connection(
        &self,
        delivery: &mut MessageDelivery,
    ) -> Result<Option<ConnectionRecord>> {
        if let Some(sender_verkey) = &delivery.sender_verkey {
            delivery.sender_did = self.find_did_for_key(sender_verkey).await?;
        }
        if let Some(recipient_verkey) = &delivery.recipient_verkey {
            match self
                .context
                .wallet
                .get_local_did_for_verkey(recipient_verkey)
                .await
            {
                Ok(info) => {
                    delivery.recipient_did_public = info.is_public();
                    delivery.recipient_did = Some(info.did);
                }
                Err(WalletError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        self.find_connection(
            delivery.sender_did.as_deref(),
            delivery.recipient_did.as_deref(),
            delivery.recipient_verkey.as_deref(),
            true,
        )
        .await
    }

    /// Works out where messages on the connection go.
    ///
    /// Before the response an invitee delivers to the invitation; afterwards
    /// both sides use the peer DID document's preferred service.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectionManagerError`] when the record lacks a DID, the
    /// invitation names a public DID, or the DID document has no service.
    pub async fn get_connection_target(&self, record: &ConnectionRecord) -> Result<ConnectionTarget> {
        let my_did = record
            .my_did
            .as_deref()
            .ok_or_else(|| connection_error("No local DID associated with connection"))?;
        let my_info = self.context.wallet.get_local_did(my_did).await?;

        if record.initiator == Initiator::External
            && matches!(record.state, ConnectionState::Invitation | ConnectionState::Request)
        {
            let invitation = record.retrieve_invitation(&self.context).await?;
            if invitation.did.is_some() {
                return Err(connection_error(
                    "Public DID invitations require a ledger to resolve",
                ));
            }
            return Ok(ConnectionTarget {
                did: None,
                endpoint: invitation.endpoint.unwrap_or_default(),
                label: invitation.label,
                recipient_keys: invitation.recipient_keys.unwrap_or_default(),
                routing_keys: invitation.routing_keys.unwrap_or_default(),
                sender_key: Some(my_info.verkey),
            });
        }

        let their_did = record
            .their_did
            .as_deref()
            .ok_or_else(|| connection_error("No target DID associated with connection"))?;
        let did_doc = self.fetch_did_document(their_did).await?;
        let service = did_doc
            .preferred_service()
            .ok_or_else(|| connection_error("No services defined by DIDDoc"))?;
        Ok(ConnectionTarget {
            did: Some(their_did.to_string()),
            endpoint: service.service_endpoint.clone(),
            label: record.their_label.clone().unwrap_or_default(),
            recipient_keys: service.recipient_keys.clone(),
            routing_keys: service.routing_keys.clone(),
            sender_key: Some(my_info.verkey),
        })
    }

    /// Stores or replaces a peer DID document and indexes its keys.
    ///
    /// # Errors
    ///
    /// Propagates storage and serialization errors.
    pub async fn store_did_document(&self, did_doc: &DidDoc) -> Result<()> {
        let storage = self.context.storage.as_ref();
        let did = did_doc.did().to_string();
        let value = serde_json::to_string(did_doc)?;
        let tags = HashMap::from([("did".to_string(), did.clone())]);

        match storage
            .search_records(DID_DOC_RECORD_TYPE, tags.clone())
            .fetch_single()
            .await
        {
            Ok(existing) => storage.update_record_value(&existing, &value).await?,
            Err(StorageError::NotFound(_)) => {
                storage
                    .add_record(&StorageRecord::new(DID_DOC_RECORD_TYPE, value, tags))
                    .await?;
            }
            Err(e) => return Err(e.into()),
        }

        for key in did_doc.controlled_keys() {
            let tags = HashMap::from([
                ("did".to_string(), did.clone()),
                ("key".to_string(), key.to_string()),
            ]);
            let indexed = storage
                .search_records(DID_KEY_RECORD_TYPE, tags.clone())
                .fetch_all()
                .await?;
            if indexed.is_empty() {
                storage
                    .add_record(&StorageRecord::new(DID_KEY_RECORD_TYPE, key, tags))
                    .await?;
            }
        }
        debug!(did = %did, "stored DID document");
        Ok(())
    }

    /// Fetches a stored peer DID document.
    ///
    /// # Errors
    ///
    /// Returns a storage not-found error for an unknown DID.
    pub async fn fetch_did_document(&self, did: &str) -> Result<DidDoc> {
        let record = self
            .context
            .storage
            .search_records(
                DID_DOC_RECORD_TYPE,
                TagFilter::from([("did".to_string(), canonical_did(did).to_string())]),
            )
            .fetch_single()
            .await?;
        Ok(serde_json::from_str(&record.value)?)
    }

    /// The peer DID whose document lists `key`, if any.
    ///
    /// A key listed by more than one stored document identifies no one and
    /// resolves to `None`.
    ///
    /// # Errors
    ///
    /// Propagates storage errors.
    pub async fn find_did_for_key(&self, key: &str) -> Result<Option<String>> {
        let result = self
            .context
            .storage
            .search_records(
                DID_KEY_RECORD_TYPE,
                TagFilter::from([("key".to_string(), key.to_string())]),
            )
            .fetch_single()
            .await;
        match result {
            Ok(record) => Ok(record.tags.get("did").cloned()),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(StorageError::Duplicate(_)) => {
                warn!(key, "key listed by several DID documents, sender unresolved");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

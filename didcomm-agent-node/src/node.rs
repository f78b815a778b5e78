//! The agent node.
//!
//! [`AgentNode`] wires configuration, wallet, storage, registry and
//! transport into one handle. It is the entry point for inbound envelopes
//! and for the operator actions of the connection protocol.

use std::sync::Arc;

use didcomm_agent_core::{BasicStorage, BasicWallet, Storage, Wallet};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::AgentConfig;
use crate::context::AgentContext;
use crate::dispatch::{Dispatched, Dispatcher};
use crate::error::Result;
use crate::events::{AdminEvent, EventBus};
use crate::message::AgentMessage;
use crate::protocols::connections::{
    AcceptMode, ConnectionInvitation, ConnectionManager, ConnectionRecord, ConnectionTarget,
};
use crate::protocols::register_all;
use crate::protocols::routing::pack_for_target;
use crate::registry::ProtocolRegistry;
use crate::transport::{HttpTransport, OutboundTransport};

/// A DIDComm agent.
///
/// Cloning is cheap; clones share every component.
#[derive(Clone)]
pub struct AgentNode {
    context: AgentContext,
    transport: Arc<dyn OutboundTransport>,
    dispatcher: Dispatcher,
}

impl AgentNode {
    /// Creates a node with every built-in protocol registered.
    ///
    /// Returns the receiving half of the admin event channel alongside the
    /// node; drop it to discard events.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(
        config: AgentConfig,
        wallet: Arc<dyn Wallet>,
        storage: Arc<dyn Storage>,
        transport: Arc<dyn OutboundTransport>,
    ) -> Result<(Self, mpsc::Receiver<AdminEvent>)> {
        config.validate()?;

        let mut registry = ProtocolRegistry::new();
        register_all(&mut registry);
        let (events, receiver) = EventBus::new(config.event_channel_capacity);

        let context = AgentContext {
            config: Arc::new(config),
            wallet,
            storage,
            registry: Arc::new(registry),
            events,
        };
        let dispatcher = Dispatcher::new(context.clone(), Arc::clone(&transport));
        info!(label = %context.config.label, endpoint = %context.config.endpoint, "agent created");

        Ok((
            Self {
                context,
                transport,
                dispatcher,
            },
            receiver,
        ))
    }

    /// Creates a node with in-memory wallet and storage that sends over HTTP.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn in_memory(config: AgentConfig) -> Result<(Self, mpsc::Receiver<AdminEvent>)> {
        let transport = Arc::new(HttpTransport::new(&config.transport)?);
        Self::new(
            config,
            Arc::new(BasicWallet::new()),
            Arc::new(BasicStorage::new()),
            transport,
        )
    }

    /// The shared agent handles.
    #[must_use]
    pub fn context(&self) -> &AgentContext {
        &self.context
    }

    /// The agent configuration.
    #[must_use]
    pub fn config(&self) -> &AgentConfig {
        &self.context.config
    }

    /// A connection manager over this agent.
    #[must_use]
    pub fn connections(&self) -> ConnectionManager {
        ConnectionManager::new(self.context.clone())
    }

    /// The inbound dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Processes one inbound envelope and returns the packed replies for the
    /// inbound channel.
    ///
    /// Failures are logged and end processing of this envelope only.
    pub async fn receive(&self, envelope: &[u8], transport_type: &str) -> Vec<String> {
        let mut replies = Vec::new();
        if let Err(e) = self.dispatch(envelope, transport_type, &mut replies).await {
            warn!(transport = transport_type, error = %e, "failed to process inbound message");
        }
        replies
    }

    /// Processes one inbound envelope, reporting the outcome.
    ///
    /// # Errors
    ///
    /// Returns the error that ended processing; see [`Dispatcher::dispatch`].
    pub async fn dispatch(
        &self,
        envelope: &[u8],
        transport_type: &str,
        direct_replies: &mut Vec<String>,
    ) -> Result<Dispatched> {
        self.dispatcher
            .dispatch(envelope, transport_type, direct_replies)
            .await
    }

    /// Processes an envelope on its own task.
    ///
    /// Envelopes spawned this way are processed concurrently and in no
    /// particular order.
    pub fn spawn_receive(
        &self,
        envelope: Vec<u8>,
        transport_type: String,
    ) -> JoinHandle<Vec<String>> {
        let node = self.clone();
        tokio::spawn(async move { node.receive(&envelope, &transport_type).await })
    }

    /// Packs a message for `target` and hands it to the outbound transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be packed or the transport
    /// rejects it.
    pub async fn send_message(
        &self,
        message: &dyn AgentMessage,
        target: &ConnectionTarget,
    ) -> Result<()> {
        let plaintext = serde_json::to_string(&message.to_json()?)?;
        let packed = pack_for_target(self.context.wallet.as_ref(), &plaintext, target).await?;
        self.transport.send(packed.as_bytes(), &target.endpoint).await?;
        Ok(())
    }

    /// Records an invitation received out of band.
    ///
    /// With [`AcceptMode::Auto`], which `auto_accept_invites` selects by
    /// default, the connection request is created and sent immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the invitation is invalid, or if the request
    /// cannot be created or sent.
    pub async fn receive_invitation(
        &self,
        invitation: &ConnectionInvitation,
    ) -> Result<ConnectionRecord> {
        let manager = self.connections();
        let mut record = manager.receive_invitation(invitation, None, None).await?;
        if record.accept == AcceptMode::Auto {
            let request = manager.create_request(&mut record, None, None).await?;
            let target = manager.get_connection_target(&record).await?;
            self.send_message(&request, &target).await?;
            info!(connection_id = %record.id(), "sent connection request");
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::protocols::connections::{ConnectionState, InvitationOptions};
    use crate::tests::RecordingTransport;
    use futures::future::join_all;
    use pretty_assertions::assert_eq;
    use serde_json::Value;

    fn node_with(config: AgentConfig) -> (AgentNode, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        let (node, _) = AgentNode::new(
            config,
            Arc::new(BasicWallet::new()),
            Arc::new(BasicStorage::new()),
            transport.clone(),
        )
        .unwrap();
        (node, transport)
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = AgentConfig {
            endpoint: "not a url".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            AgentNode::in_memory(config),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_receive_drops_garbage() {
        let (node, transport) = node_with(AgentConfig::default());
        assert!(node.receive(b"garbage", "http").await.is_empty());

        let handles = (0..4).map(|i| node.spawn_receive(vec![i; 8], "http".to_string()));
        for replies in join_all(handles).await {
            assert!(replies.unwrap().is_empty());
        }
        assert!(transport.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_receive_invitation_manual() {
        let (alice, _) = node_with(AgentConfig::default());
        let (bob, transport) = node_with(AgentConfig::default());
        let (_, invitation) = alice
            .connections()
            .create_invitation(InvitationOptions::default())
            .await
            .unwrap();

        let record = bob.receive_invitation(&invitation).await.unwrap();
        assert_eq!(record.state, ConnectionState::Invitation);
        assert!(transport.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_receive_invitation_auto_sends_request() {
        let (alice, _) = node_with(AgentConfig {
            endpoint: "https://alice.example/".to_string(),
            ..Default::default()
        });
        let (bob, transport) = node_with(AgentConfig {
            auto_accept_invites: true,
            ..Default::default()
        });
        let (_, invitation) = alice
            .connections()
            .create_invitation(InvitationOptions::default())
            .await
            .unwrap();

        let record = bob.receive_invitation(&invitation).await.unwrap();
        assert_eq!(record.state, ConnectionState::Request);

        let sent = transport.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "https://alice.example/");
        let unpacked = alice.context().wallet.unpack_message(&sent[0].0).await.unwrap();
        let request: Value = serde_json::from_str(&unpacked.message).unwrap();
        assert_eq!(request["@id"].as_str(), record.request_id.as_deref());
    }
}

//! Outbound side of a handler.
//!
//! A handler never packs or sends messages itself. It passes them to the
//! [`Responder`] it was invoked with, which picks the channel: the inbound
//! connection's return route, the connection target, or an explicit target.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::context::AgentContext;
use crate::error::{ResponderError, Result};
use crate::message::AgentMessage;
use crate::protocols::connections::ConnectionTarget;
use crate::protocols::routing::pack_for_target;
use crate::transport::OutboundTransport;

/// Contract handlers use to emit messages.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Replies on the channel the inbound message arrived on.
    ///
    /// # Errors
    ///
    /// Returns [`ResponderError::NoActiveConnection`] when there is neither a
    /// return route nor a connection target.
    async fn send_reply(&self, message: &dyn AgentMessage) -> Result<()>;

    /// Sends a message to an explicit target.
    ///
    /// # Errors
    ///
    /// Returns an error if packing or enqueueing fails.
    async fn send_outbound(
        &self,
        message: &dyn AgentMessage,
        target: &ConnectionTarget,
    ) -> Result<()>;

    /// Emits an admin notification; never retried.
    ///
    /// # Errors
    ///
    /// The default channel never fails; other implementations may.
    async fn send_admin_message(&self, topic: &str, payload: Value) -> Result<()>;
}

/// The keys of an authenticated inbound envelope, used to answer on its
/// return route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectRoute {
    /// The peer's verkey; replies are packed for it
    pub their_verkey: String,
    /// Our verkey the envelope was packed for; replies are packed with it
    pub my_verkey: String,
}

/// Responder used by the dispatcher for one inbound message.
///
/// Replies on the return route are packed and collected; everything else is
/// packed and handed to the outbound transport.
pub struct DispatchResponder {
    agent: AgentContext,
    transport: Arc<dyn OutboundTransport>,
    target: Option<ConnectionTarget>,
    return_route: Option<DirectRoute>,
    direct_replies: Mutex<Vec<String>>,
}

impl DispatchResponder {
    /// Creates a responder.
    ///
    /// `target` is the resolved connection target, if the connection is
    /// ready; `return_route` is set when the sender asked for direct replies.
    pub fn new(
        agent: AgentContext,
        transport: Arc<dyn OutboundTransport>,
        target: Option<ConnectionTarget>,
        return_route: Option<DirectRoute>,
    ) -> Self {
        Self {
            agent,
            transport,
            target,
            return_route,
            direct_replies: Mutex::new(Vec::new()),
        }
    }

    /// The packed replies for the inbound channel.
    pub fn into_direct_replies(self) -> Vec<String> {
        self.direct_replies.into_inner()
    }
}

#[async_trait]
impl Responder for DispatchResponder {
    async fn send_reply(&self, message: &dyn AgentMessage) -> Result<()> {
        if let Some(route) = &self.return_route {
            let plaintext = serde_json::to_string(&message.to_json()?)?;
            let packed = self
                .agent
                .wallet
                .pack_message(
                    &plaintext,
                    std::slice::from_ref(&route.their_verkey),
                    Some(&route.my_verkey),
                )
                .await?;
            debug!(message_type = message.message_type(), "queued direct reply");
            self.direct_replies.lock().await.push(packed);
            return Ok(());
        }

        match &self.target {
            Some(target) => self.send_outbound(message, target).await,
            None => Err(ResponderError::NoActiveConnection.into()),
        }
    }

    async fn send_outbound(
        &self,
        message: &dyn AgentMessage,
        target: &ConnectionTarget,
    ) -> Result<()> {
        let plaintext = serde_json::to_string(&message.to_json()?)?;
        let packed = pack_for_target(self.agent.wallet.as_ref(), &plaintext, target).await?;
        debug!(
            message_type = message.message_type(),
            endpoint = %target.endpoint,
            "sending outbound message"
        );
        self.transport.send(packed.as_bytes(), &target.endpoint).await?;
        Ok(())
    }

    async fn send_admin_message(&self, topic: &str, payload: Value) -> Result<()> {
        self.agent.events.emit(topic, payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::trust_ping::Ping;
    use crate::tests::{agent_context, RecordingTransport};
    use didcomm_agent_core::{BasicWallet, Wallet};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn test_reply_without_route_fails() {
        let (agent, _) = agent_context();
        let transport = Arc::new(RecordingTransport::default());
        let responder = DispatchResponder::new(agent, transport, None, None);
        let err = responder.send_reply(&Ping::default()).await.unwrap_err();
        assert_eq!(err.to_string(), "Responder error: No active connection");
    }

    #[tokio::test]
    async fn test_reply_on_return_route() {
        let (agent, _) = agent_context();
        let peer = BasicWallet::new();
        let peer_key = peer.create_signing_key(None, None).await.unwrap();
        let my_key = agent.wallet.create_signing_key(None, None).await.unwrap();
        let transport = Arc::new(RecordingTransport::default());
        let responder = DispatchResponder::new(
            agent,
            transport.clone(),
            None,
            Some(DirectRoute {
                their_verkey: peer_key.verkey.clone(),
                my_verkey: my_key.verkey.clone(),
            }),
        );

        responder.send_reply(&Ping::default()).await.unwrap();
        assert!(transport.sent().await.is_empty());

        let replies = responder.into_direct_replies();
        assert_eq!(replies.len(), 1);
        let unpacked = peer.unpack_message(replies[0].as_bytes()).await.unwrap();
        assert_eq!(unpacked.sender_verkey, Some(my_key.verkey));
        let value: Value = serde_json::from_str(&unpacked.message).unwrap();
        assert_eq!(value["@type"], <Ping as crate::message::ProtocolMessage>::TYPE);
    }

    #[tokio::test]
    async fn test_reply_falls_back_to_target() {
        let (agent, _) = agent_context();
        let peer = BasicWallet::new();
        let peer_key = peer.create_signing_key(None, None).await.unwrap();
        let transport = Arc::new(RecordingTransport::default());
        let target = ConnectionTarget {
            endpoint: "https://peer.example".to_string(),
            recipient_keys: vec![peer_key.verkey],
            ..Default::default()
        };
        let responder = DispatchResponder::new(agent, transport.clone(), Some(target), None);

        responder.send_reply(&Ping::default()).await.unwrap();
        let sent = transport.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "https://peer.example");
        let unpacked = peer.unpack_message(&sent[0].0).await.unwrap();
        assert_eq!(unpacked.sender_verkey, None);
    }

    #[tokio::test]
    async fn test_admin_message_emitted() {
        let (agent, mut events) = agent_context();
        let transport = Arc::new(RecordingTransport::default());
        let responder = DispatchResponder::new(agent, transport, None, None);
        responder
            .send_admin_message("ping", json!({"state": "received"}))
            .await
            .unwrap();
        let event = events.recv().await.unwrap();
        assert_eq!(event.topic, "ping");
    }
}

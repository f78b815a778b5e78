//! Shared agent handles and the per-message request context.

use std::sync::Arc;

use didcomm_agent_core::{Storage, Wallet};

use crate::config::AgentConfig;
use crate::error::{MessageParseError, Result};
use crate::events::EventBus;
use crate::message::{AgentMessage, ProtocolMessage};
use crate::protocols::connections::ConnectionRecord;
use crate::registry::ProtocolRegistry;

/// Handles every component of the agent shares.
///
/// Cloning is cheap; all members are reference counted.
#[derive(Clone)]
pub struct AgentContext {
    /// Immutable agent configuration
    pub config: Arc<AgentConfig>,
    /// Key material provider
    pub wallet: Arc<dyn Wallet>,
    /// Record storage
    pub storage: Arc<dyn Storage>,
    /// Registered message types
    pub registry: Arc<ProtocolRegistry>,
    /// Admin event channel
    pub events: EventBus,
}

/// Transport-level facts about one inbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageDelivery {
    /// Authenticated sender verkey, `None` for anoncrypt
    pub sender_verkey: Option<String>,
    /// The local verkey the envelope was opened with
    pub recipient_verkey: Option<String>,
    /// The peer DID bound to the sender verkey, when known
    pub sender_did: Option<String>,
    /// The local DID bound to the recipient verkey, when known
    pub recipient_did: Option<String>,
    /// Whether the recipient DID is the agent's public DID
    pub recipient_did_public: bool,
    /// The inbound transport, e.g. `http`
    pub transport_type: String,
    /// Whether the sender asked for replies on the inbound channel
    pub direct_response_requested: bool,
}

/// Everything a handler sees while processing one message.
pub struct RequestContext {
    /// Shared agent handles
    pub agent: AgentContext,
    /// The typed inbound message
    pub message: Box<dyn AgentMessage>,
    /// Delivery metadata
    pub delivery: MessageDelivery,
    /// The connection the message arrived on, if resolved
    pub connection: Option<ConnectionRecord>,
}

impl RequestContext {
    /// The inbound message as `M`.
    ///
    /// # Errors
    ///
    /// Returns [`MessageParseError::UnrecognizedType`] if the message is of
    /// another type, which means the handler was registered for the wrong type.
    pub fn message<M: ProtocolMessage>(&self) -> Result<&M> {
        self.message.downcast_ref::<M>().ok_or_else(|| {
            MessageParseError::UnrecognizedType(self.message.message_type().to_string()).into()
        })
    }

    /// Whether the message arrived on an active connection.
    pub fn connection_ready(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(ConnectionRecord::is_ready)
    }
}

//! Forward wrapping for mediated delivery.
//!
//! Only the sending side is implemented: an outbound message for a target
//! with routing keys is wrapped in one [`Forward`] per mediator.

use didcomm_agent_core::Wallet;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::message::{message_type, AgentMessage, MessageHeader, ProtocolMessage};
use crate::protocols::connections::ConnectionTarget;

/// Asks a mediator to deliver `msg` to the holder of `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Forward {
    /// Common header
    #[serde(flatten)]
    pub header: MessageHeader,
    /// The next recipient key
    pub to: String,
    /// The packed envelope to forward
    pub msg: Value,
}

impl ProtocolMessage for Forward {
    const TYPE: &'static str = message_type!("routing/1.0/forward");

    fn message_header(&self) -> &MessageHeader {
        &self.header
    }

    fn message_header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }
}

/// Packs `message` for `target`, wrapping it for each routing key.
///
/// The inner envelope is authcrypted when the target has a sender key;
/// every forward layer is anoncrypted to its mediator.
///
/// # Errors
///
/// Returns an error if the target has no recipient keys or packing fails.
pub async fn pack_for_target(
    wallet: &dyn Wallet,
    message: &str,
    target: &ConnectionTarget,
) -> Result<String> {
    let mut packed = wallet
        .pack_message(message, &target.recipient_keys, target.sender_key.as_deref())
        .await?;

    let mut next_key = target.recipient_keys.first().cloned().unwrap_or_default();
    for routing_key in &target.routing_keys {
        let forward = Forward {
            header: MessageHeader::default(),
            to: next_key,
            msg: serde_json::from_str(&packed)?,
        };
        let forward = serde_json::to_string(&forward.to_json()?)?;
        packed = wallet
            .pack_message(&forward, std::slice::from_ref(routing_key), None)
            .await?;
        next_key = routing_key.clone();
    }
    Ok(packed)
}

//! Trust ping: checks that a connection works end to end.
//!
//! A ping on a connection in the response state is also what promotes it to
//! active, since it is the first authenticated message after the response.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::context::RequestContext;
use crate::error::Result;
use crate::message::{message_type, MessageHeader, ProtocolMessage};
use crate::registry::{Handler, ProtocolRegistry};
use crate::responder::Responder;

/// Admin event topic for pings.
pub const EVENT_TOPIC: &str = "ping";

fn default_response_requested() -> bool {
    true
}

/// A ping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    /// Common header
    #[serde(flatten)]
    pub header: MessageHeader,
    /// Whether the receiver should answer
    #[serde(default = "default_response_requested")]
    pub response_requested: bool,
    /// Free text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Default for Ping {
    fn default() -> Self {
        Self {
            header: MessageHeader::default(),
            response_requested: true,
            comment: None,
        }
    }
}

impl ProtocolMessage for Ping {
    const TYPE: &'static str = message_type!("trust_ping/1.0/ping");

    fn message_header(&self) -> &MessageHeader {
        &self.header
    }

    fn message_header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }
}

/// The answer to a [`Ping`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResponse {
    /// Common header, threaded on the ping
    #[serde(flatten)]
    pub header: MessageHeader,
    /// Free text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ProtocolMessage for PingResponse {
    const TYPE: &'static str = message_type!("trust_ping/1.0/ping_response");

    fn message_header(&self) -> &MessageHeader {
        &self.header
    }

    fn message_header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }
}

impl PingResponse {
    /// Creates the response to `ping`.
    pub fn answering(ping: &Ping) -> Self {
        Self {
            header: MessageHeader::reply_to(ping.header.thread_id()),
            comment: None,
        }
    }
}

/// Answers pings on active connections.
pub struct PingHandler;

#[async_trait]
impl Handler for PingHandler {
    async fn handle(&self, context: &RequestContext, responder: &dyn Responder) -> Result<()> {
        let ping = context.message::<Ping>()?;
        if !context.connection_ready() {
            info!(message_id = %ping.header.id, "ignoring ping on inactive connection");
            return Ok(());
        }

        if ping.response_requested {
            responder.send_reply(&PingResponse::answering(ping)).await?;
        }
        responder
            .send_admin_message(
                EVENT_TOPIC,
                json!({
                    "comment": ping.comment,
                    "connection_id": context.connection.as_ref().map(|c| c.id().to_string()),
                    "responded": ping.response_requested,
                    "state": "received",
                    "thread_id": ping.header.thread_id(),
                }),
            )
            .await
    }
}

/// Reports ping responses on the admin channel.
pub struct PingResponseHandler;

#[async_trait]
impl Handler for PingResponseHandler {
    async fn handle(&self, context: &RequestContext, responder: &dyn Responder) -> Result<()> {
        let response = context.message::<PingResponse>()?;
        debug!(thread_id = %response.header.thread_id(), "received ping response");
        responder
            .send_admin_message(
                EVENT_TOPIC,
                json!({
                    "comment": response.comment,
                    "connection_id": context.connection.as_ref().map(|c| c.id().to_string()),
                    "state": "response_received",
                    "thread_id": response.header.thread_id(),
                }),
            )
            .await
    }
}

/// Registers the trust ping messages.
pub fn register(registry: &mut ProtocolRegistry) {
    registry.register::<Ping>(Arc::new(PingHandler));
    registry.register::<PingResponse>(Arc::new(PingResponseHandler));
}

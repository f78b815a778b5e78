//! Inbound message dispatch.
//!
//! One [`Dispatcher::dispatch`] call processes one inbound envelope:
//!
//! 1. Unpack it with any key the wallet holds
//! 2. Build the typed message through the registry
//! 3. Resolve the connection it belongs to
//! 4. Run the message's handler with a [`DispatchResponder`]
//!
//! Failures end processing of that envelope only. Envelope failures are
//! never answered; later failures on an authenticated envelope may produce
//! a best-effort problem report.

use std::sync::Arc;

use didcomm_agent_core::TransportDecorator;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::context::{AgentContext, MessageDelivery, RequestContext};
use crate::error::{Error, Result};
use crate::message::AgentMessage;
use crate::protocols::connections::{ConnectionManager, ConnectionTarget};
use crate::protocols::problem_report::ProblemReport;
use crate::responder::{DirectRoute, DispatchResponder, Responder};
use crate::transport::OutboundTransport;

/// Outcome of a processed envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    /// The `@type` of the message
    pub message_type: String,
    /// The `@id` of the message
    pub message_id: String,
    /// The connection the message arrived on, if resolved
    pub connection_id: Option<String>,
}

/// Routes inbound envelopes to their handlers.
#[derive(Clone)]
pub struct Dispatcher {
    agent: AgentContext,
    transport: Arc<dyn OutboundTransport>,
}

fn requests_return_route(value: &Value) -> bool {
    value
        .get("~transport")
        .and_then(|transport| serde_json::from_value::<TransportDecorator>(transport.clone()).ok())
        .is_some_and(|transport| transport.wants_direct_response())
}

impl Dispatcher {
    /// Creates a dispatcher sending through `transport`.
    pub fn new(agent: AgentContext, transport: Arc<dyn OutboundTransport>) -> Self {
        Self { agent, transport }
    }

    /// Processes one inbound envelope.
    ///
    /// Packed replies for the inbound channel are appended to
    /// `direct_replies`, including a problem report produced on failure.
    ///
    /// # Errors
    ///
    /// Returns the envelope, parse, connection or handler error that ended
    /// processing.
    pub async fn dispatch(
        &self,
        envelope: &[u8],
        transport_type: &str,
        direct_replies: &mut Vec<String>,
    ) -> Result<Dispatched> {
        let unpacked = self.agent.wallet.unpack_message(envelope).await?;
        let value: Value = serde_json::from_str(&unpacked.message)?;

        let direct_response_requested = requests_return_route(&value);
        let return_route = match (&unpacked.sender_verkey, direct_response_requested) {
            (Some(their_verkey), true) => Some(DirectRoute {
                their_verkey: their_verkey.clone(),
                my_verkey: unpacked.recipient_verkey.clone(),
            }),
            _ => None,
        };
        let mut delivery = MessageDelivery {
            sender_verkey: unpacked.sender_verkey,
            recipient_verkey: Some(unpacked.recipient_verkey),
            transport_type: transport_type.to_string(),
            direct_response_requested,
            ..Default::default()
        };

        let message_id = value
            .get("@id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let message = match self.agent.registry.make_message(value) {
            Ok(message) => message,
            Err(e) => {
                warn!(message_id = %message_id, error = %e, "dropping unparseable message");
                if return_route.is_some() {
                    let responder = self.responder(None, return_route);
                    let report = ProblemReport::for_thread(message_id, e.to_string())
                        .with_code("message_parse_error");
                    if let Err(report_error) = responder.send_reply(&report).await {
                        debug!(error = %report_error, "could not report parse error");
                    }
                    direct_replies.extend(responder.into_direct_replies());
                }
                return Err(e.into());
            }
        };

        let manager = ConnectionManager::new(self.agent.clone());
        let connection = manager.resolve_inbound_connection(&mut delivery).await?;
        let target = match &connection {
            Some(record) if record.is_ready() => {
                Some(manager.get_connection_target(record).await?)
            }
            _ => None,
        };

        let dispatched = Dispatched {
            message_type: message.message_type().to_string(),
            message_id: message.id().to_string(),
            connection_id: connection.as_ref().map(|record| record.id().to_string()),
        };
        info!(
            message_type = %dispatched.message_type,
            message_id = %dispatched.message_id,
            connection_id = ?dispatched.connection_id,
            transport = transport_type,
            "dispatching message"
        );

        let Some(descriptor) = self.agent.registry.resolve_message_type(&dispatched.message_type)
        else {
            return Ok(dispatched);
        };
        let handler = descriptor.handler();
        let responder = self.responder(target, return_route);
        let context = RequestContext {
            agent: self.agent.clone(),
            message,
            delivery,
            connection,
        };

        let result = handler.handle(&context, &responder).await;
        if let Err(e) = &result {
            warn!(message_id = %dispatched.message_id, error = %e, "handler failed");
            if let Error::Connection(reason) = e {
                let report = ProblemReport::for_thread(
                    context.message.header().thread_id(),
                    reason.to_string(),
                )
                .with_code("connection_error");
                if let Err(report_error) = responder.send_reply(&report).await {
                    debug!(error = %report_error, "could not report connection error");
                }
            }
        }
        direct_replies.extend(responder.into_direct_replies());
        result.map(|()| dispatched)
    }

    fn responder(
        &self,
        target: Option<ConnectionTarget>,
        return_route: Option<DirectRoute>,
    ) -> DispatchResponder {
        DispatchResponder::new(
            self.agent.clone(),
            Arc::clone(&self.transport),
            target,
            return_route,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageHeader, ProtocolMessage};
    use crate::protocols::trust_ping::{Ping, PingResponse};
    use crate::tests::{agent_context, RecordingTransport};
    use didcomm_agent_core::{BasicWallet, ReturnRoute, Wallet};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Fixture {
        dispatcher: Dispatcher,
        transport: Arc<RecordingTransport>,
        my_key: String,
        peer: BasicWallet,
        peer_key: String,
    }

    async fn fixture() -> Fixture {
        let (agent, _) = agent_context();
        let my_key = agent.wallet.create_signing_key(None, None).await.unwrap().verkey;
        let peer = BasicWallet::new();
        let peer_key = peer.create_signing_key(None, None).await.unwrap().verkey;
        let transport = Arc::new(RecordingTransport::default());
        Fixture {
            dispatcher: Dispatcher::new(agent, transport.clone()),
            transport,
            my_key,
            peer,
            peer_key,
        }
    }

    impl Fixture {
        async fn pack(&self, value: &Value, authenticated: bool) -> Vec<u8> {
            let sender = authenticated.then_some(self.peer_key.as_str());
            self.peer
                .pack_message(&value.to_string(), &[self.my_key.clone()], sender)
                .await
                .unwrap()
                .into_bytes()
        }
    }

    fn ping_with_return_route() -> Ping {
        let mut ping = Ping::default();
        ping.header.transport = Some(TransportDecorator {
            return_route: Some(ReturnRoute::All),
        });
        ping
    }

    #[tokio::test]
    async fn test_garbage_dropped_without_reply() {
        let fixture = fixture().await;
        let mut replies = Vec::new();
        let result = fixture
            .dispatcher
            .dispatch(b"not an envelope", "http", &mut replies)
            .await;
        assert!(matches!(result, Err(Error::Wallet(_))));
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_type_without_return_route() {
        let fixture = fixture().await;
        let envelope = fixture.pack(&json!({"@type": "unknown", "@id": "1"}), true).await;
        let mut replies = Vec::new();
        let result = fixture.dispatcher.dispatch(&envelope, "http", &mut replies).await;
        assert!(matches!(result, Err(Error::MessageParse(_))));
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn test_parse_error_reported_on_return_route() {
        let fixture = fixture().await;
        let value = json!({
            "@type": "unknown",
            "@id": "bad-1",
            "~transport": {"return_route": "all"}
        });
        let envelope = fixture.pack(&value, true).await;
        let mut replies = Vec::new();
        let result = fixture.dispatcher.dispatch(&envelope, "http", &mut replies).await;
        assert!(result.is_err());

        assert_eq!(replies.len(), 1);
        let unpacked = fixture.peer.unpack_message(replies[0].as_bytes()).await.unwrap();
        let report: Value = serde_json::from_str(&unpacked.message).unwrap();
        assert_eq!(report["@type"], ProblemReport::TYPE);
        assert_eq!(report["~thread"]["thid"], "bad-1");
        assert_eq!(report["explain-ltxt"], "unrecognized type: unknown");
    }

    #[tokio::test]
    async fn test_parse_error_not_reported_to_anonymous_sender() {
        let fixture = fixture().await;
        let value = json!({"@id": "bad-2", "~transport": {"return_route": "all"}});
        let envelope = fixture.pack(&value, false).await;
        let mut replies = Vec::new();
        assert!(fixture
            .dispatcher
            .dispatch(&envelope, "http", &mut replies)
            .await
            .is_err());
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn test_handler_runs() {
        let fixture = fixture().await;
        let response = PingResponse {
            header: MessageHeader::reply_to("ping-1"),
            comment: None,
        };
        let envelope = fixture.pack(&response.to_json().unwrap(), true).await;
        let mut replies = Vec::new();
        let dispatched = fixture
            .dispatcher
            .dispatch(&envelope, "http", &mut replies)
            .await
            .unwrap();
        assert_eq!(dispatched.message_type, PingResponse::TYPE);
        assert_eq!(dispatched.message_id, response.header.id);
        assert_eq!(dispatched.connection_id, None);
    }

    #[tokio::test]
    async fn test_ping_without_connection_is_not_answered() {
        let fixture = fixture().await;
        let envelope = fixture
            .pack(&ping_with_return_route().to_json().unwrap(), true)
            .await;
        let mut replies = Vec::new();
        fixture
            .dispatcher
            .dispatch(&envelope, "http", &mut replies)
            .await
            .unwrap();
        assert!(replies.is_empty());
        assert!(fixture.transport.sent().await.is_empty());
    }

    #[test]
    fn test_return_route_detection() {
        assert!(requests_return_route(&json!({"~transport": {"return_route": "all"}})));
        assert!(requests_return_route(&json!({"~transport": {"return_route": "thread"}})));
        assert!(!requests_return_route(&json!({"~transport": {"return_route": "none"}})));
        assert!(!requests_return_route(&json!({"~transport": "bogus"})));
        assert!(!requests_return_route(&json!({})));
    }
}

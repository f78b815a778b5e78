//! Discover features: lets a peer ask which protocols the agent speaks.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::context::RequestContext;
use crate::error::Result;
use crate::message::{message_type, MessageHeader, ProtocolMessage};
use crate::registry::{Handler, ProtocolRegistry};
use crate::responder::Responder;

/// Admin event topic for disclosures received from peers.
pub const EVENT_TOPIC: &str = "discover_features";

/// Asks for the protocols matching `query`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    /// Common header
    #[serde(flatten)]
    pub header: MessageHeader,
    /// Protocol family, optionally ending in `*`
    pub query: String,
    /// Free text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ProtocolMessage for Query {
    const TYPE: &'static str = message_type!("discover-features/1.0/query");

    fn message_header(&self) -> &MessageHeader {
        &self.header
    }

    fn message_header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }
}

/// One supported protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolDescriptor {
    /// Protocol family URI
    pub pid: String,
    /// Roles the agent plays
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
}

/// Answers a [`Query`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disclose {
    /// Common header, threaded on the query
    #[serde(flatten)]
    pub header: MessageHeader,
    /// Matching protocols
    pub protocols: Vec<ProtocolDescriptor>,
}

impl ProtocolMessage for Disclose {
    const TYPE: &'static str = message_type!("discover-features/1.0/disclose");

    fn message_header(&self) -> &MessageHeader {
        &self.header
    }

    fn message_header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }
}

/// Discloses the registered protocol families matching a query.
pub struct QueryHandler;

#[async_trait]
impl Handler for QueryHandler {
    async fn handle(&self, context: &RequestContext, responder: &dyn Responder) -> Result<()> {
        let query = context.message::<Query>()?;
        let protocols = context
            .agent
            .registry
            .protocols_matching_query(&query.query)
            .into_iter()
            .map(|pid| ProtocolDescriptor { pid, roles: None })
            .collect();
        let disclose = Disclose {
            header: MessageHeader::reply_to(query.header.thread_id()),
            protocols,
        };
        responder.send_reply(&disclose).await
    }
}

/// Reports a peer's disclosure on the admin channel.
pub struct DiscloseHandler;

#[async_trait]
impl Handler for DiscloseHandler {
    async fn handle(&self, context: &RequestContext, responder: &dyn Responder) -> Result<()> {
        let disclose = context.message::<Disclose>()?;
        let pids: Vec<&str> = disclose.protocols.iter().map(|p| p.pid.as_str()).collect();
        responder
            .send_admin_message(
                EVENT_TOPIC,
                json!({
                    "connection_id": context.connection.as_ref().map(|c| c.id().to_string()),
                    "protocols": pids,
                    "thread_id": disclose.header.thread_id(),
                }),
            )
            .await
    }
}

/// Registers the discover features messages.
pub fn register(registry: &mut ProtocolRegistry) {
    registry.register::<Query>(Arc::new(QueryHandler));
    registry.register::<Disclose>(Arc::new(DiscloseHandler));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::register_all;
    use crate::registry::protocol_family;
    use crate::tests::{request_context, RecordingResponder};
    use pretty_assertions::assert_eq;

    fn query(text: &str) -> Query {
        Query {
            header: MessageHeader::default(),
            query: text.to_string(),
            comment: None,
        }
    }

    #[tokio::test]
    async fn test_query_all() {
        let context = request_context(Box::new(query("*")));
        let responder = RecordingResponder::default();
        QueryHandler.handle(&context, &responder).await.unwrap();

        let replies = responder.replies().await;
        let disclose: Disclose = serde_json::from_value(replies[0].clone()).unwrap();
        let mut registry = ProtocolRegistry::new();
        register_all(&mut registry);
        let expected: Vec<String> = registry.protocols();
        let pids: Vec<String> = disclose.protocols.into_iter().map(|p| p.pid).collect();
        assert_eq!(pids, expected);
        assert!(pids.contains(&protocol_family(Query::TYPE).to_string()));
    }

    #[tokio::test]
    async fn test_query_prefix_and_miss() {
        let responder = RecordingResponder::default();
        let prefix = format!("{}*", &protocol_family(Query::TYPE)[..40]);
        let context = request_context(Box::new(query(&prefix)));
        QueryHandler.handle(&context, &responder).await.unwrap();

        let context = request_context(Box::new(query("https://unknown.example/")));
        QueryHandler.handle(&context, &responder).await.unwrap();

        let replies = responder.replies().await;
        assert!(!replies[0]["protocols"].as_array().unwrap().is_empty());
        assert_eq!(replies[1]["protocols"], json!([]));
    }

    #[tokio::test]
    async fn test_disclose_reported() {
        let disclose = Disclose {
            header: MessageHeader::reply_to("q-1"),
            protocols: vec![ProtocolDescriptor {
                pid: "family/1.0".to_string(),
                roles: None,
            }],
        };
        let context = request_context(Box::new(disclose));
        let responder = RecordingResponder::default();
        DiscloseHandler.handle(&context, &responder).await.unwrap();

        let events = responder.admin_messages().await;
        assert_eq!(events[0].1["protocols"], json!(["family/1.0"]));
        assert_eq!(events[0].1["thread_id"], "q-1");
    }
}

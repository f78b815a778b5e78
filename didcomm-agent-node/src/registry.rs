//! Message type registry.
//!
//! Maps `@type` URIs to a parser for the concrete message and the handler
//! that processes it. Protocol modules register their types explicitly at
//! startup; later registrations of the same URI replace earlier ones.
//!
//! # Examples
//!
//! ```rust
//! use didcomm_agent_node::protocols::trust_ping;
//! use didcomm_agent_node::registry::ProtocolRegistry;
//! use serde_json::json;
//!
//! let mut registry = ProtocolRegistry::new();
//! trust_ping::register(&mut registry);
//!
//! assert_eq!(
//!     registry.protocols_matching_query("*"),
//!     vec!["did:sov:BzCbsNYhMrjHiqZDTUASHg;spec/trust_ping/1.0".to_string()]
//! );
//! assert!(registry.make_message(json!({"hello": "world"})).is_err());
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::context::RequestContext;
use crate::error::{MessageParseError, Result};
use crate::message::{AgentMessage, ProtocolMessage};
use crate::responder::Responder;

/// Processes one inbound message type.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handles the message in `context`, replying through `responder`.
    ///
    /// # Errors
    ///
    /// Returns an error if the message violates its protocol or a reply
    /// cannot be produced.
    async fn handle(&self, context: &RequestContext, responder: &dyn Responder) -> Result<()>;
}

/// Parses JSON into a boxed message.
pub type ParseFn = fn(Value) -> serde_json::Result<Box<dyn AgentMessage>>;

/// Registry entry for one message type.
#[derive(Clone)]
pub struct MessageDescriptor {
    parse: ParseFn,
    handler: Arc<dyn Handler>,
}

impl MessageDescriptor {
    /// Creates a descriptor for message type `M`.
    pub fn of<M: ProtocolMessage>(handler: Arc<dyn Handler>) -> Self {
        Self {
            parse: parse_boxed::<M>,
            handler,
        }
    }

    /// The handler for this type.
    pub fn handler(&self) -> Arc<dyn Handler> {
        Arc::clone(&self.handler)
    }
}

fn parse_boxed<M: ProtocolMessage>(value: Value) -> serde_json::Result<Box<dyn AgentMessage>> {
    let message: M = serde_json::from_value(value)?;
    Ok(Box::new(message))
}

/// The family of a type URI: everything before its last `/`.
pub fn protocol_family(message_type: &str) -> &str {
    message_type
        .rsplit_once('/')
        .map_or(message_type, |(family, _)| family)
}

/// Registry of the message types the agent understands.
#[derive(Default, Clone)]
pub struct ProtocolRegistry {
    types: HashMap<String, MessageDescriptor>,
}

impl ProtocolRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges descriptors into the registry; the last write for a URI wins.
    pub fn register_message_types(
        &mut self,
        types: impl IntoIterator<Item = (String, MessageDescriptor)>,
    ) {
        for (message_type, descriptor) in types {
            debug!(message_type = %message_type, "registered message type");
            self.types.insert(message_type, descriptor);
        }
    }

    /// Registers message type `M` with its handler.
    pub fn register<M: ProtocolMessage>(&mut self, handler: Arc<dyn Handler>) {
        self.register_message_types([(M::TYPE.to_string(), MessageDescriptor::of::<M>(handler))]);
    }

    /// Looks up the descriptor for a type URI.
    pub fn resolve_message_type(&self, message_type: &str) -> Option<&MessageDescriptor> {
        self.types.get(message_type)
    }

    /// Every registered message type URI, sorted.
    pub fn message_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.types.keys().cloned().collect();
        types.sort();
        types
    }

    /// The distinct protocol families of every registered type, sorted.
    pub fn protocols(&self) -> Vec<String> {
        self.types
            .keys()
            .map(|message_type| protocol_family(message_type).to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// The registered families matching `query`.
    ///
    /// `*` matches everything, a trailing `*` matches by prefix, anything else
    /// must equal a family exactly. No match yields an empty list.
    pub fn protocols_matching_query(&self, query: &str) -> Vec<String> {
        let protocols = self.protocols();
        match query.strip_suffix('*') {
            Some(prefix) => protocols
                .into_iter()
                .filter(|family| family.starts_with(prefix))
                .collect(),
            None => protocols
                .into_iter()
                .filter(|family| family == query)
                .collect(),
        }
    }

    /// Builds a typed message from inbound JSON.
    ///
    /// # Errors
    ///
    /// Returns [`MessageParseError::MissingType`] without a string `@type`,
    /// [`MessageParseError::UnrecognizedType`] for an unregistered type and
    /// [`MessageParseError::DeserializationFailed`] for a malformed payload.
    pub fn make_message(
        &self,
        value: Value,
    ) -> std::result::Result<Box<dyn AgentMessage>, MessageParseError> {
        let message_type = value
            .get("@type")
            .and_then(Value::as_str)
            .ok_or(MessageParseError::MissingType)?
            .to_string();
        let descriptor = self
            .resolve_message_type(&message_type)
            .ok_or_else(|| MessageParseError::UnrecognizedType(message_type.clone()))?;
        (descriptor.parse)(value).map_err(|source| MessageParseError::DeserializationFailed {
            message_type,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::tests::Note;
    use crate::message::{message_type, MessageHeader};
    use pretty_assertions::assert_eq;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    struct NoopHandler;

    #[async_trait]
    impl Handler for NoopHandler {
        async fn handle(&self, _context: &RequestContext, _responder: &dyn Responder) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Memo {
        #[serde(flatten)]
        header: MessageHeader,
    }

    impl ProtocolMessage for Memo {
        const TYPE: &'static str = message_type!("memo/2.0/memo");

        fn message_header(&self) -> &MessageHeader {
            &self.header
        }

        fn message_header_mut(&mut self) -> &mut MessageHeader {
            &mut self.header
        }
    }

    fn registry() -> ProtocolRegistry {
        let mut registry = ProtocolRegistry::new();
        registry.register::<Note>(Arc::new(NoopHandler));
        registry.register::<Memo>(Arc::new(NoopHandler));
        registry
    }

    #[test]
    fn test_protocol_family() {
        assert_eq!(
            protocol_family("did:sov:x;spec/connections/1.0/request"),
            "did:sov:x;spec/connections/1.0"
        );
        assert_eq!(protocol_family("bare"), "bare");
    }

    #[test]
    fn test_make_message() {
        let registry = registry();
        let message = registry
            .make_message(json!({"@type": Note::TYPE, "@id": "1", "text": "hi"}))
            .unwrap();
        assert_eq!(message.downcast_ref::<Note>().unwrap().text, "hi");
    }

    #[test]
    fn test_make_message_errors() {
        let registry = registry();
        assert!(matches!(
            registry.make_message(json!({"a": "b"})),
            Err(MessageParseError::MissingType)
        ));
        match registry.make_message(json!({"@type": "unknown"})) {
            Err(MessageParseError::UnrecognizedType(uri)) => assert_eq!(uri, "unknown"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(matches!(
            registry.make_message(json!({"@type": Note::TYPE, "@id": "1"})),
            Err(MessageParseError::DeserializationFailed { .. })
        ));
    }

    #[test]
    fn test_protocols_matching_query() {
        let registry = registry();
        let note_family = protocol_family(Note::TYPE).to_string();
        let memo_family = protocol_family(Memo::TYPE).to_string();

        let all = registry.protocols_matching_query("*");
        assert_eq!(all.len(), 2);
        assert!(all.contains(&note_family) && all.contains(&memo_family));

        assert_eq!(
            registry.protocols_matching_query(&format!("{}*", &memo_family[..memo_family.len() - 3])),
            vec![memo_family.clone()]
        );
        assert_eq!(registry.protocols_matching_query(&note_family), vec![note_family]);
        assert!(registry.protocols_matching_query("nothing").is_empty());
        assert!(registry.protocols_matching_query("nothing*").is_empty());
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = registry();
        registry.register::<Memo>(Arc::new(NoopHandler));
        registry.register_message_types([(
            Note::TYPE.to_string(),
            MessageDescriptor::of::<Memo>(Arc::new(NoopHandler)),
        )]);

        assert_eq!(registry.message_types().len(), 2);
        let message = registry
            .make_message(json!({"@type": Note::TYPE, "@id": "1"}))
            .unwrap();
        assert!(message.downcast_ref::<Memo>().is_some());
    }
}

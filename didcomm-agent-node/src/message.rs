//! Typed agent messages.
//!
//! Every protocol message embeds a [`MessageHeader`] carrying `@id` and the
//! shared decorators, and implements [`ProtocolMessage`] to name its type
//! URI. The dispatcher handles messages as `Box<dyn AgentMessage>`; handlers
//! downcast back to the concrete type.

use std::any::Any;
use std::fmt::Debug;

use didcomm_agent_core::{ThreadDecorator, TransportDecorator};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Prefix shared by the message families this agent speaks.
pub const MESSAGE_TYPE_PREFIX: &str = "did:sov:BzCbsNYhMrjHiqZDTUASHg;spec";

/// Expands to the full type URI of a family path such as `"trust_ping/1.0/ping"`.
macro_rules! message_type {
    ($path:literal) => {
        concat!("did:sov:BzCbsNYhMrjHiqZDTUASHg;spec/", $path)
    };
}

pub(crate) use message_type;

/// The `@id` and decorators common to every message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Message id
    #[serde(rename = "@id")]
    pub id: String,
    /// Thread correlation
    #[serde(rename = "~thread", default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<ThreadDecorator>,
    /// Transport options
    #[serde(
        rename = "~transport",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub transport: Option<TransportDecorator>,
}

impl Default for MessageHeader {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            thread: None,
            transport: None,
        }
    }
}

impl MessageHeader {
    /// Creates a header threaded on `thid`.
    pub fn reply_to(thid: impl Into<String>) -> Self {
        Self {
            thread: Some(ThreadDecorator::with_thid(thid)),
            ..Self::default()
        }
    }

    /// The thread id, falling back to the message id.
    pub fn thread_id(&self) -> &str {
        self.thread
            .as_ref()
            .and_then(|thread| thread.thid.as_deref())
            .unwrap_or(&self.id)
    }
}

/// A concrete protocol message with a fixed type URI.
pub trait ProtocolMessage: Serialize + DeserializeOwned + Debug + Send + Sync + 'static {
    /// The `@type` URI of the message.
    const TYPE: &'static str;

    /// The common header.
    fn message_header(&self) -> &MessageHeader;

    /// The common header, mutably.
    fn message_header_mut(&mut self) -> &mut MessageHeader;
}

/// A message as seen by the dispatcher and the responder.
pub trait AgentMessage: Debug + Send + Sync {
    /// The `@type` URI of the message.
    fn message_type(&self) -> &'static str;

    /// The common header.
    fn header(&self) -> &MessageHeader;

    /// Serializes the message, including `@type`.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be serialized.
    fn to_json(&self) -> serde_json::Result<Value>;

    /// Upcast used for downcasting to the concrete type.
    fn as_any(&self) -> &dyn Any;
}

impl<M: ProtocolMessage> AgentMessage for M {
    fn message_type(&self) -> &'static str {
        M::TYPE
    }

    fn header(&self) -> &MessageHeader {
        self.message_header()
    }

    fn to_json(&self) -> serde_json::Result<Value> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.insert("@type".to_string(), Value::String(M::TYPE.to_string()));
        }
        Ok(value)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl dyn AgentMessage {
    /// Returns the message as `M` if that is its concrete type.
    pub fn downcast_ref<M: ProtocolMessage>(&self) -> Option<&M> {
        self.as_any().downcast_ref::<M>()
    }

    /// The message id.
    pub fn id(&self) -> &str {
        &self.header().id
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize)]
    pub(crate) struct Note {
        #[serde(flatten)]
        pub header: MessageHeader,
        pub text: String,
    }

    impl ProtocolMessage for Note {
        const TYPE: &'static str = message_type!("test/1.0/note");

        fn message_header(&self) -> &MessageHeader {
            &self.header
        }

        fn message_header_mut(&mut self) -> &mut MessageHeader {
            &mut self.header
        }
    }

    #[test]
    fn test_to_json_adds_type() {
        let note = Note {
            header: MessageHeader::reply_to("thread-1"),
            text: "hi".to_string(),
        };
        let value = note.to_json().unwrap();
        assert_eq!(value["@type"], Note::TYPE);
        assert_eq!(value["@id"], json!(note.header.id));
        assert_eq!(value["~thread"], json!({"thid": "thread-1"}));
        assert!(value.get("~transport").is_none());
    }

    #[test]
    fn test_downcast() {
        let note: Box<dyn AgentMessage> = Box::new(Note {
            header: MessageHeader::default(),
            text: "hi".to_string(),
        });
        assert_eq!(note.downcast_ref::<Note>().unwrap().text, "hi");
        assert_eq!(note.message_type(), Note::TYPE);
    }

    #[test]
    fn test_thread_id_falls_back_to_id() {
        let header = MessageHeader::default();
        assert_eq!(header.thread_id(), header.id);
        assert_eq!(MessageHeader::reply_to("abc").thread_id(), "abc");
    }

    #[test]
    fn test_message_type_prefix() {
        assert!(Note::TYPE.starts_with(MESSAGE_TYPE_PREFIX));
        assert!(Note::TYPE.ends_with("/test/1.0/note"));
    }
}

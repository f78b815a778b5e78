//! DIDComm agent: connection protocol, message dispatch and outbound delivery.
//!
//! This crate builds an agent on top of the envelope, wallet and storage
//! primitives of `didcomm-agent-core`. It can:
//! - Establish pairwise connections (invitation, request, response)
//! - Unpack inbound envelopes and dispatch them to protocol handlers
//! - Answer on the inbound channel or through an outbound transport
//! - Answer trust pings and feature discovery queries
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//! - `node`: The [`AgentNode`] facade wiring everything together
//! - `dispatch`: Per-envelope processing pipeline
//! - `registry`: Message type URIs mapped to parsers and handlers
//! - `responder`: The outbound contract handlers reply through
//! - `transport`: HTTP delivery and the retrying outbound queue
//! - `protocols`: Connections, trust ping, discover features, problem
//!   reports and forward wrapping
//! - `events`: Admin event channel
//! - `error`: Error types and handling
//!
//! # Examples
//!
//! ```rust,no_run
//! use didcomm_agent_node::{AgentConfig, AgentNode};
//!
//! # async fn run(envelope: Vec<u8>) -> didcomm_agent_node::Result<()> {
//! let config = AgentConfig {
//!     label: "Alice".to_string(),
//!     endpoint: "https://alice.example/didcomm".to_string(),
//!     auto_accept_requests: true,
//!     ..Default::default()
//! };
//! let (node, events) = AgentNode::in_memory(config)?;
//! didcomm_agent_node::events::spawn_logger(events);
//!
//! // Process an inbound envelope; replies for the inbound channel come back
//! let replies = node.receive(&envelope, "http").await;
//! # let _ = replies;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod message;
pub mod node;
pub mod protocols;
pub mod registry;
pub mod responder;
pub mod transport;


// Re-export main types for convenience
pub use config::{AgentConfig, TransportConfig};
pub use context::{AgentContext, MessageDelivery, RequestContext};
pub use dispatch::{Dispatched, Dispatcher};
pub use error::{Error, Result};
pub use events::{AdminEvent, EventBus};
pub use message::{AgentMessage, MessageHeader, ProtocolMessage};
pub use node::AgentNode;
pub use registry::{Handler, ProtocolRegistry};
pub use responder::Responder;
pub use transport::{HttpTransport, OutboundTransport, QueuedTransport};

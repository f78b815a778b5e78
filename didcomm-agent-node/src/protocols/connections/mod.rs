//! Connection establishment.
//!
//! Two agents build a pairwise channel in three messages: the inviter shares
//! a [`ConnectionInvitation`] out of band, the invitee answers with a
//! [`ConnectionRequest`] carrying its DID document, and the inviter replies
//! with a [`ConnectionResponse`] whose DID document is signed with the
//! invitation key. The first authenticated message after the response makes
//! the connection active.
//!
//! # Examples
//!
//! ```rust
//! use didcomm_agent_node::protocols::connections::{ConnectionState, InvitationOptions};
//! use didcomm_agent_node::AgentNode;
//!
//! # tokio_test::block_on(async {
//! let (alice, _events) = AgentNode::in_memory(Default::default())?;
//! let (record, invitation) = alice
//!     .connections()
//!     .create_invitation(InvitationOptions::default())
//!     .await?;
//! assert_eq!(record.state, ConnectionState::Invitation);
//!
//! let url = invitation.to_url(None)?;
//! assert!(url.contains("?c_i="));
//! # Ok::<(), didcomm_agent_node::Error>(())
//! # }).unwrap();
//! ```

mod diddoc;
mod handlers;
mod manager;
mod messages;
mod record;

use std::sync::Arc;

pub use diddoc::{canonical_did, Authentication, DidDoc, PublicKey, Service};
pub use handlers::{InvitationHandler, RequestHandler, ResponseHandler};
pub use manager::{ConnectionManager, ConnectionTarget, InvitationOptions};
pub use messages::{
    ConnectionDetail, ConnectionInvitation, ConnectionRequest, ConnectionResponse,
    INVITATION_QUERY_PARAM,
};
pub use record::{AcceptMode, ConnectionRecord, ConnectionState, Initiator, RoutingState};

use crate::registry::ProtocolRegistry;

/// Registers the connection protocol messages.
pub fn register(registry: &mut ProtocolRegistry) {
    registry.register::<ConnectionInvitation>(Arc::new(InvitationHandler));
    registry.register::<ConnectionRequest>(Arc::new(RequestHandler));
    registry.register::<ConnectionResponse>(Arc::new(ResponseHandler));
}

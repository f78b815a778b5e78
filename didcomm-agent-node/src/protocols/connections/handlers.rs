//! Handlers driving the connection state machine from inbound messages.

use async_trait::async_trait;
use tracing::{info, warn};

use super::manager::ConnectionManager;
use super::messages::{ConnectionInvitation, ConnectionRequest, ConnectionResponse};
use super::record::AcceptMode;
use crate::context::RequestContext;
use crate::error::Result;
use crate::protocols::problem_report::ProblemReport;
use crate::protocols::trust_ping::Ping;
use crate::registry::Handler;
use crate::responder::Responder;

/// Rejects invitations sent as agent messages.
pub struct InvitationHandler;

#[async_trait]
impl Handler for InvitationHandler {
    async fn handle(&self, context: &RequestContext, responder: &dyn Responder) -> Result<()> {
        let invitation = context.message::<ConnectionInvitation>()?;
        let report = ProblemReport::for_thread(
            invitation.header.id.clone(),
            "Connection invitations cannot be submitted via agent messaging",
        );
        if let Err(e) = responder.send_reply(&report).await {
            warn!(error = %e, "could not report rejected invitation");
        }
        Ok(())
    }
}

/// Records a request and, when accepting automatically, answers it.
pub struct RequestHandler;

#[async_trait]
impl Handler for RequestHandler {
    async fn handle(&self, context: &RequestContext, responder: &dyn Responder) -> Result<()> {
        let request = context.message::<ConnectionRequest>()?;
        let manager = ConnectionManager::new(context.agent.clone());
        let mut record = manager.receive_request(request, &context.delivery).await?;

        if !(context.agent.config.auto_accept_requests || record.accept == AcceptMode::Auto) {
            info!(connection_id = %record.id(), "connection request awaiting approval");
            return Ok(());
        }

        let response = manager.create_response(&mut record, None).await?;
        if context.delivery.direct_response_requested {
            responder.send_reply(&response).await
        } else {
            let target = manager.get_connection_target(&record).await?;
            responder.send_outbound(&response, &target).await
        }
    }
}

/// Accepts a response and optionally pings the new connection.
pub struct ResponseHandler;

#[async_trait]
impl Handler for ResponseHandler {
    async fn handle(&self, context: &RequestContext, responder: &dyn Responder) -> Result<()> {
        let response = context.message::<ConnectionResponse>()?;
        let manager = ConnectionManager::new(context.agent.clone());
        let record = manager.accept_response(response, &context.delivery).await?;

        if context.agent.config.auto_ping_connection {
            let target = manager.get_connection_target(&record).await?;
            responder.send_outbound(&Ping::default(), &target).await?;
        }
        Ok(())
    }
}

//! Problem reports.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::context::RequestContext;
use crate::error::Result;
use crate::message::{message_type, MessageHeader, ProtocolMessage};
use crate::registry::{Handler, ProtocolRegistry};
use crate::responder::Responder;

/// Admin event topic for received problem reports.
pub const EVENT_TOPIC: &str = "problem_report";

/// Tells the peer an exchange cannot proceed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemReport {
    /// Common header, threaded on the failed message
    #[serde(flatten)]
    pub header: MessageHeader,
    /// Human readable explanation
    #[serde(rename = "explain-ltxt")]
    pub explain_ltxt: String,
    /// Machine readable code
    #[serde(rename = "problem-code", default, skip_serializing_if = "Option::is_none")]
    pub problem_code: Option<String>,
}

impl ProtocolMessage for ProblemReport {
    const TYPE: &'static str = message_type!("notification/1.0/problem-report");

    fn message_header(&self) -> &MessageHeader {
        &self.header
    }

    fn message_header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }
}

impl ProblemReport {
    /// Creates a report about the message with id `thid`.
    pub fn for_thread(thid: impl Into<String>, explain: impl Into<String>) -> Self {
        Self {
            header: MessageHeader::reply_to(thid),
            explain_ltxt: explain.into(),
            problem_code: None,
        }
    }

    /// Sets the problem code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.problem_code = Some(code.into());
        self
    }
}

/// Logs reports and forwards them to the admin channel.
pub struct ProblemReportHandler;

#[async_trait]
impl Handler for ProblemReportHandler {
    async fn handle(&self, context: &RequestContext, responder: &dyn Responder) -> Result<()> {
        let report = context.message::<ProblemReport>()?;
        warn!(
            thread_id = %report.header.thread_id(),
            code = ?report.problem_code,
            explain = %report.explain_ltxt,
            "received problem report"
        );
        responder
            .send_admin_message(
                EVENT_TOPIC,
                json!({
                    "connection_id": context.connection.as_ref().map(|c| c.id().to_string()),
                    "thread_id": report.header.thread_id(),
                    "explain_ltxt": report.explain_ltxt,
                    "problem_code": report.problem_code,
                }),
            )
            .await
    }
}

/// Registers the problem report message.
pub fn register(registry: &mut ProtocolRegistry) {
    registry.register::<ProblemReport>(Arc::new(ProblemReportHandler));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::AgentMessage;
    use crate::tests::{request_context, RecordingResponder};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_wire_shape() {
        let report = ProblemReport::for_thread("thread-1", "bad things").with_code("E1");
        let value = report.to_json().unwrap();
        assert_eq!(value["explain-ltxt"], "bad things");
        assert_eq!(value["problem-code"], "E1");
        assert_eq!(value["~thread"]["thid"], "thread-1");
    }

    #[tokio::test]
    async fn test_handler_emits_admin_event() {
        let report = ProblemReport::for_thread("thread-1", "bad things");
        let context = request_context(Box::new(report));
        let responder = RecordingResponder::default();

        ProblemReportHandler.handle(&context, &responder).await.unwrap();

        let events = responder.admin_messages().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, EVENT_TOPIC);
        assert_eq!(events[0].1["explain_ltxt"], "bad things");
        assert!(responder.replies().await.is_empty());
    }
}

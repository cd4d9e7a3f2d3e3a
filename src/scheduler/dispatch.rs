//! Remote Dispatch
//!
//! Outbound half of remote execution: TASK_ASSIGNMENT to the chosen node, and
//! TASK_RESULT from the hosting node back to the origin. Each exchange uses a fresh
//! connection bounded by the dispatch timeout.

use crate::error::{ClusterError, Result};
use crate::executor::types::Task;
use crate::membership::types::NodeRecord;
use crate::protocol::messages::{
    AssignmentReply, AssignmentStatus, ErrorReply, Origin, ResultAck, TaskAssignment,
    TaskResultReport,
};
use crate::protocol::{Frame, MessageType, client};

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RemoteDispatcher {
    timeout: Duration,
}

impl RemoteDispatcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Hands `task` to `node`. `Ok` means the node accepted it.
    pub async fn dispatch(&self, task: &Task, node: &NodeRecord, origin: Origin) -> Result<()> {
        let assignment = TaskAssignment::from_task(task, origin);
        let frame = Frame::from_message(MessageType::TaskAssignment, &assignment)?;

        let reply = client::request(&node.endpoint(), &frame, self.timeout).await?;
        let answer: AssignmentReply = expect_reply(&reply, MessageType::TaskAssignment)?;

        match answer.status {
            AssignmentStatus::Accepted => Ok(()),
            AssignmentStatus::Rejected => Err(ClusterError::Dispatch(format!(
                "node {} rejected task {}: {}",
                node.id,
                task.id,
                answer.reason.as_deref().unwrap_or("no reason given")
            ))),
        }
    }

    /// Sends the outcome of a hosted task back to the node that assigned it.
    pub async fn report(&self, origin: &Origin, report: &TaskResultReport) -> Result<ResultAck> {
        let frame = Frame::from_message(MessageType::TaskResult, report)?;
        let reply = client::request(&origin.endpoint(), &frame, self.timeout).await?;
        expect_reply(&reply, MessageType::TaskResult)
    }
}

/// Parses a reply of the expected type, turning ERROR frames into dispatch errors.
fn expect_reply<T: serde::de::DeserializeOwned>(reply: &Frame, expected: MessageType) -> Result<T> {
    match reply.message_type {
        t if t == expected => reply.parse(),
        MessageType::Error => {
            let error: ErrorReply = reply.parse()?;
            Err(ClusterError::Dispatch(format!("peer answered with error: {}", error.error)))
        }
        other => Err(ClusterError::Dispatch(format!(
            "expected {expected} reply, got {other}"
        ))),
    }
}

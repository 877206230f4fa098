use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::flow::NodeId;
use crate::domain::request::RequestId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Approved,
    Rejected,
    Timeout,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "timeout" => Some(Self::Timeout),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

/// One approver's unit of work at one node within one request.
///
/// `approver_id` is the delegation-resolved identity that is allowed to
/// decide; `original_approver_id` preserves the nominal approver for audit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalTask {
    pub id: TaskId,
    pub tenant_id: String,
    pub request_id: RequestId,
    pub node_id: NodeId,
    pub approver_id: String,
    pub original_approver_id: String,
    pub status: TaskStatus,
    pub is_dynamic: bool,
    pub parent_task_id: Option<TaskId>,
    pub due_at: Option<DateTime<Utc>>,
    pub decided_at: Option<DateTime<Utc>>,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ApprovalTask {
    pub fn is_delegated(&self) -> bool {
        self.approver_id != self.original_approver_id
    }
}

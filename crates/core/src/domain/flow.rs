use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

/// Completion rule for a node with more than one approver task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApproverMode {
    /// First approval completes the node; a single rejection fails the request.
    Any,
    /// Every task must be approved; a single rejection fails the request.
    All,
    /// `ceil(total / 2)` approvals complete the node; the same count of
    /// rejections fails the request.
    Majority,
}

impl ApproverMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::All => "all",
            Self::Majority => "majority",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "any" => Some(Self::Any),
            "all" => Some(Self::All),
            "majority" => Some(Self::Majority),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    /// Creates one task per resolved approver and waits for decisions.
    Approval,
    /// Notifies the resolved recipients and advances without waiting.
    Notify,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approval => "approval",
            Self::Notify => "notify",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "approval" => Some(Self::Approval),
            "notify" => Some(Self::Notify),
            _ => None,
        }
    }
}

/// One step of a flow. Approvers come from either a role lookup against the
/// tenant directory or an explicit user-id list; exactly one of the two must
/// be configured.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub flow_id: FlowId,
    pub name: String,
    pub sort_order: i64,
    pub node_type: NodeType,
    pub approver_mode: ApproverMode,
    pub approver_role: Option<String>,
    pub approver_user_ids: Vec<String>,
    pub timeout_hours: Option<i64>,
}

impl Node {
    /// Checks that the approver source is well-formed: a role or a non-empty
    /// explicit list, never both and never neither.
    pub fn has_valid_approver_source(&self) -> bool {
        match (&self.approver_role, self.approver_user_ids.is_empty()) {
            (Some(role), true) => !role.trim().is_empty(),
            (None, false) => true,
            _ => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub id: FlowId,
    pub tenant_id: String,
    pub code: String,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

use crate::domain::flow::Node;
use crate::domain::task::ApprovalTask;

/// What the sweeper does with a task it has just marked TIMEOUT.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimeoutAction {
    /// Notify the approver and the requester; no further state change.
    Remind,
    /// Create a replacement pending task for a fallback approver at the
    /// same node.
    Escalate { fallback_approver_id: String },
    /// Treat the timeout as a rejection of the whole request.
    AutoReject,
}

/// Pluggable timeout strategy. Invoked once per timed-out task, after the
/// sweeper has claimed it; the returned action is applied in the same
/// transaction as the claim.
pub trait TimeoutPolicy: Send + Sync {
    fn action_for(&self, task: &ApprovalTask, node: &Node) -> TimeoutAction;
}

/// Default policy: notify-only.
#[derive(Clone, Copy, Debug, Default)]
pub struct RemindPolicy;

impl TimeoutPolicy for RemindPolicy {
    fn action_for(&self, _task: &ApprovalTask, _node: &Node) -> TimeoutAction {
        TimeoutAction::Remind
    }
}

/// Escalates every timed-out task to a fixed fallback approver.
#[derive(Clone, Debug)]
pub struct EscalationPolicy {
    pub fallback_approver_id: String,
}

impl EscalationPolicy {
    pub fn new(fallback_approver_id: impl Into<String>) -> Self {
        Self { fallback_approver_id: fallback_approver_id.into() }
    }
}

impl TimeoutPolicy for EscalationPolicy {
    fn action_for(&self, _task: &ApprovalTask, _node: &Node) -> TimeoutAction {
        TimeoutAction::Escalate { fallback_approver_id: self.fallback_approver_id.clone() }
    }
}

/// Rejects the owning request when any task times out.
#[derive(Clone, Copy, Debug, Default)]
pub struct AutoRejectPolicy;

impl TimeoutPolicy for AutoRejectPolicy {
    fn action_for(&self, _task: &ApprovalTask, _node: &Node) -> TimeoutAction {
        TimeoutAction::AutoReject
    }
}

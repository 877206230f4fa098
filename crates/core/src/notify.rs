use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationTemplate {
    TaskAssigned,
    TaskTimedOut,
    TaskEscalated,
    NodeActivated,
    RequestApproved,
    RequestRejected,
    RequestCancelled,
}

impl NotificationTemplate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskAssigned => "task_assigned",
            Self::TaskTimedOut => "task_timed_out",
            Self::TaskEscalated => "task_escalated",
            Self::NodeActivated => "node_activated",
            Self::RequestApproved => "request_approved",
            Self::RequestRejected => "request_rejected",
            Self::RequestCancelled => "request_cancelled",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: String,
    pub template: NotificationTemplate,
    pub payload: Value,
}

impl Notification {
    pub fn new(user_id: impl Into<String>, template: NotificationTemplate, payload: Value) -> Self {
        Self { user_id: user_id.into(), template, payload }
    }
}

/// Fire-and-forget delivery seam. Implementations swallow their own failures;
/// a lost notification never fails the decision that produced it.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Discards everything. Default wiring when no delivery channel is set up.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _notification: Notification) {}
}

#[derive(Clone, Default)]
pub struct InMemoryNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl InMemoryNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Notifier for InMemoryNotifier {
    fn notify(&self, notification: Notification) {
        match self.sent.lock() {
            Ok(mut sent) => sent.push(notification),
            Err(poisoned) => poisoned.into_inner().push(notification),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{InMemoryNotifier, Notification, NotificationTemplate, Notifier};

    #[test]
    fn in_memory_notifier_records_sends() {
        let notifier = InMemoryNotifier::default();
        notifier.notify(Notification::new(
            "u-1",
            NotificationTemplate::TaskAssigned,
            json!({"task_id": "tsk-1"}),
        ));

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].user_id, "u-1");
        assert_eq!(sent[0].template, NotificationTemplate::TaskAssigned);
    }
}

//! Approval workflow orchestration.
//!
//! Components layer bottom-up: delegation resolution feeds task dispatch,
//! dispatch feeds decision processing, and the request manager and timeout
//! sweeper sit on top. Every mutation of a request and its tasks happens in
//! one transaction; audit entries and notifications are collected during the
//! transaction and emitted only after commit.

pub mod decision;
pub mod delegation;
pub mod dispatcher;
pub mod manager;
pub mod registry;
pub mod sweeper;

use std::sync::Arc;

use signoff_core::audit::{AuditEntry, AuditRecorder};
use signoff_core::directory::Directory;
use signoff_core::notify::{Notification, Notifier};
use signoff_core::timeout::TimeoutPolicy;
use signoff_db::DbPool;

pub use decision::{DecisionOutcome, DecisionProcessor};
pub use delegation::{DelegationService, NewDelegation};
pub use dispatcher::{TaskDispatcher, MAX_AUTO_APPROVE_DEPTH};
pub use manager::{ApprovalRequestManager, CreatedRequest, RequestStatusView};
pub use registry::FlowRegistry;
pub use sweeper::{SweepReport, TimeoutSweeper};

/// Post-commit side effects accumulated during a transaction. Both sinks are
/// best-effort; emission never fails the operation that produced them.
#[derive(Default)]
pub struct SideEffects {
    audits: Vec<AuditEntry>,
    notifications: Vec<Notification>,
}

impl SideEffects {
    pub fn audit(&mut self, entry: AuditEntry) {
        self.audits.push(entry);
    }

    pub fn notify(&mut self, notification: Notification) {
        self.notifications.push(notification);
    }

    pub fn emit(self, audit: &dyn AuditRecorder, notifier: &dyn Notifier) {
        for entry in self.audits {
            audit.record(entry);
        }
        for notification in self.notifications {
            notifier.notify(notification);
        }
    }
}

/// Wires the workflow components onto one pool and one set of collaborators.
#[derive(Clone)]
pub struct Engine {
    pool: DbPool,
    directory: Arc<dyn Directory>,
    audit: Arc<dyn AuditRecorder>,
    notifier: Arc<dyn Notifier>,
    timeout_policy: Arc<dyn TimeoutPolicy>,
}

impl Engine {
    pub fn new(
        pool: DbPool,
        directory: Arc<dyn Directory>,
        audit: Arc<dyn AuditRecorder>,
        notifier: Arc<dyn Notifier>,
        timeout_policy: Arc<dyn TimeoutPolicy>,
    ) -> Self {
        Self { pool, directory, audit, notifier, timeout_policy }
    }

    pub fn registry(&self) -> FlowRegistry {
        FlowRegistry::new(self.pool.clone())
    }

    pub fn delegations(&self) -> DelegationService {
        DelegationService::new(self.pool.clone(), self.directory.clone(), self.audit.clone())
    }

    pub fn requests(&self) -> ApprovalRequestManager {
        ApprovalRequestManager::new(
            self.pool.clone(),
            self.directory.clone(),
            self.audit.clone(),
            self.notifier.clone(),
        )
    }

    pub fn decisions(&self) -> DecisionProcessor {
        DecisionProcessor::new(
            self.pool.clone(),
            self.directory.clone(),
            self.audit.clone(),
            self.notifier.clone(),
        )
    }

    pub fn sweeper(&self) -> TimeoutSweeper {
        TimeoutSweeper::new(
            self.pool.clone(),
            self.directory.clone(),
            self.timeout_policy.clone(),
            self.audit.clone(),
            self.notifier.clone(),
        )
    }
}

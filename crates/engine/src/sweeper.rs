use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use signoff_core::audit::{AuditEntry, AuditRecorder};
use signoff_core::directory::Directory;
use signoff_core::domain::request::{ApprovalRequest, RequestStatus};
use signoff_core::domain::task::{ApprovalTask, TaskId, TaskStatus};
use signoff_core::errors::WorkflowError;
use signoff_core::notify::{Notification, NotificationTemplate, Notifier};
use signoff_core::timeout::{TimeoutAction, TimeoutPolicy};
use signoff_db::repositories::flow::load_nodes;
use signoff_db::repositories::request::{finalize_request, load_request};
use signoff_db::repositories::task::{
    cancel_pending_tasks, cancel_pending_tasks_at_node, claim_overdue_task, insert_task,
    tasks_for_node,
};
use signoff_db::repositories::{SqlTaskRepository, TaskRepository};
use signoff_db::DbPool;

use crate::decision::{evaluate_node, NodeResolution};
use crate::dispatcher::TaskDispatcher;

/// Tallies of one sweep pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub timed_out: usize,
    pub reminded: usize,
    pub escalated: usize,
    pub auto_rejected: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum SweepAction {
    Skipped,
    Reminded,
    Escalated,
    AutoRejected,
}

/// Periodic, idempotent scan of overdue pending tasks.
///
/// Each task is claimed and processed in its own transaction, so one failing
/// task cannot abort the rest of the batch, and a concurrently running sweep
/// loses the claim instead of double-processing.
pub struct TimeoutSweeper {
    pool: DbPool,
    directory: Arc<dyn Directory>,
    dispatcher: TaskDispatcher,
    policy: Arc<dyn TimeoutPolicy>,
    audit: Arc<dyn AuditRecorder>,
    notifier: Arc<dyn Notifier>,
}

impl TimeoutSweeper {
    pub fn new(
        pool: DbPool,
        directory: Arc<dyn Directory>,
        policy: Arc<dyn TimeoutPolicy>,
        audit: Arc<dyn AuditRecorder>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let dispatcher = TaskDispatcher::new(directory.clone());
        Self { pool, directory, dispatcher, policy, audit, notifier }
    }

    pub async fn sweep(
        &self,
        now: DateTime<Utc>,
        batch_size: u32,
    ) -> Result<SweepReport, WorkflowError> {
        let overdue =
            SqlTaskRepository::new(self.pool.clone()).list_overdue(now, batch_size).await?;

        let mut report = SweepReport { scanned: overdue.len(), ..SweepReport::default() };

        for task in overdue {
            match self.sweep_one(&task, now).await {
                Ok(SweepAction::Skipped) => report.skipped += 1,
                Ok(SweepAction::Reminded) => {
                    report.timed_out += 1;
                    report.reminded += 1;
                }
                Ok(SweepAction::Escalated) => {
                    report.timed_out += 1;
                    report.escalated += 1;
                }
                Ok(SweepAction::AutoRejected) => {
                    report.timed_out += 1;
                    report.auto_rejected += 1;
                }
                Err(error) => {
                    warn!(task_id = %task.id.0, %error, "timeout sweep failed for task");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    async fn sweep_one(
        &self,
        task: &ApprovalTask,
        now: DateTime<Utc>,
    ) -> Result<SweepAction, WorkflowError> {
        let mut effects = crate::SideEffects::default();
        let mut tx = self.pool.begin().await.map_err(WorkflowError::persistence)?;

        let claimed = claim_overdue_task(tx.as_mut(), &task.id, now).await?;
        if claimed == 0 {
            return Ok(SweepAction::Skipped);
        }

        let request = load_request(tx.as_mut(), &task.request_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("request", task.request_id.0.clone()))?;
        let nodes = load_nodes(tx.as_mut(), &request.flow_id).await?;
        let node_index = nodes
            .iter()
            .position(|n| n.id == task.node_id)
            .ok_or_else(|| WorkflowError::not_found("node", task.node_id.0.clone()))?;
        let node = &nodes[node_index];

        effects.audit(
            AuditEntry::new(
                task.tenant_id.clone(),
                None,
                "approval_task",
                task.id.0.clone(),
                "task_timed_out",
            )
            .with_old_values(json!({"status": "pending"}))
            .with_new_values(json!({
                "status": "timeout",
                "request_id": request.id.0,
                "node_id": node.id.0,
            })),
        );

        let action = match self.policy.action_for(task, node) {
            TimeoutAction::Remind => {
                for user_id in [&task.approver_id, &request.requester_id] {
                    effects.notify(Notification::new(
                        user_id.clone(),
                        NotificationTemplate::TaskTimedOut,
                        json!({
                            "task_id": task.id.0,
                            "request_id": request.id.0,
                            "node_name": node.name,
                            "entity_type": request.entity_type,
                            "entity_id": request.entity_id,
                        }),
                    ));
                }

                // The claim may have removed the node's last pending task, so
                // the tally is re-run here the same way a decision runs it.
                // Nothing else re-visits a node whose approvers all lapsed.
                let node_tasks = tasks_for_node(tx.as_mut(), &request.id, &node.id).await?;
                match evaluate_node(node.approver_mode, &node_tasks) {
                    NodeResolution::Waiting => {}
                    NodeResolution::Completed => {
                        cancel_pending_tasks_at_node(tx.as_mut(), &request.id, &node.id, now)
                            .await?;
                        self.dispatcher
                            .advance_request(
                                tx.as_mut(),
                                &request,
                                &nodes,
                                node_index + 1,
                                None,
                                now,
                                &mut effects,
                            )
                            .await?;
                    }
                    NodeResolution::Rejected | NodeResolution::Stalled => {
                        self.fail_request(tx.as_mut(), &request, &task.id, now, &mut effects)
                            .await?;
                    }
                }

                SweepAction::Reminded
            }
            TimeoutAction::Escalate { fallback_approver_id } => {
                let active = self
                    .directory
                    .is_active_user(&task.tenant_id, &fallback_approver_id)
                    .await
                    .map_err(WorkflowError::persistence)?;
                if !active {
                    return Err(WorkflowError::configuration(format!(
                        "escalation fallback {fallback_approver_id} is not an active user"
                    )));
                }

                let replacement = ApprovalTask {
                    id: TaskId(Uuid::new_v4().to_string()),
                    tenant_id: task.tenant_id.clone(),
                    request_id: task.request_id.clone(),
                    node_id: task.node_id.clone(),
                    approver_id: fallback_approver_id.clone(),
                    original_approver_id: task.original_approver_id.clone(),
                    status: TaskStatus::Pending,
                    is_dynamic: true,
                    parent_task_id: Some(task.id.clone()),
                    due_at: node.timeout_hours.map(|hours| now + Duration::hours(hours)),
                    decided_at: None,
                    comment: None,
                    created_at: now,
                };
                insert_task(tx.as_mut(), &replacement).await?;

                effects.audit(
                    AuditEntry::new(
                        task.tenant_id.clone(),
                        None,
                        "approval_task",
                        replacement.id.0.clone(),
                        "task_escalated",
                    )
                    .with_new_values(json!({
                        "request_id": request.id.0,
                        "node_id": node.id.0,
                        "timed_out_task_id": task.id.0,
                        "approver_id": fallback_approver_id,
                    })),
                );
                effects.notify(Notification::new(
                    fallback_approver_id,
                    NotificationTemplate::TaskEscalated,
                    json!({
                        "task_id": replacement.id.0,
                        "request_id": request.id.0,
                        "node_name": node.name,
                        "entity_type": request.entity_type,
                        "entity_id": request.entity_id,
                        "due_at": replacement.due_at.map(|dt| dt.to_rfc3339()),
                    }),
                ));

                SweepAction::Escalated
            }
            TimeoutAction::AutoReject => {
                self.fail_request(tx.as_mut(), &request, &task.id, now, &mut effects).await?;
                SweepAction::AutoRejected
            }
        };

        tx.commit().await.map_err(WorkflowError::persistence)?;
        effects.emit(self.audit.as_ref(), self.notifier.as_ref());

        Ok(action)
    }

    /// Cancels whatever is still pending and finalizes the request as
    /// rejected with an SLA-timeout reason. A concurrent finalization makes
    /// this a no-op.
    async fn fail_request(
        &self,
        conn: &mut sqlx::SqliteConnection,
        request: &ApprovalRequest,
        timed_out_task_id: &TaskId,
        now: DateTime<Utc>,
        effects: &mut crate::SideEffects,
    ) -> Result<(), WorkflowError> {
        cancel_pending_tasks(conn, &request.id, now).await?;
        let finalized = finalize_request(conn, &request.id, RequestStatus::Rejected, now).await?;
        if finalized > 0 {
            effects.audit(
                AuditEntry::new(
                    request.tenant_id.clone(),
                    None,
                    "approval_request",
                    request.id.0.clone(),
                    "request_rejected",
                )
                .with_old_values(json!({"status": "pending"}))
                .with_new_values(json!({
                    "status": "rejected",
                    "reason": "sla_timeout",
                    "task_id": timed_out_task_id.0,
                })),
            );
            effects.notify(Notification::new(
                request.requester_id.clone(),
                NotificationTemplate::RequestRejected,
                json!({
                    "request_id": request.id.0,
                    "entity_type": request.entity_type,
                    "entity_id": request.entity_id,
                    "reason": "sla_timeout",
                }),
            ));
        }
        Ok(())
    }
}

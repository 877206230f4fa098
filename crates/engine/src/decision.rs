use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use signoff_core::audit::{AuditEntry, AuditRecorder};
use signoff_core::directory::Directory;
use signoff_core::domain::flow::{ApproverMode, NodeId};
use signoff_core::domain::request::{RequestId, RequestStatus};
use signoff_core::domain::task::{ApprovalTask, Decision, TaskId, TaskStatus};
use signoff_core::errors::WorkflowError;
use signoff_core::notify::{Notification, NotificationTemplate, Notifier};
use signoff_db::repositories::flow::load_nodes;
use signoff_db::repositories::request::{finalize_request, load_request};
use signoff_db::repositories::task::{
    cancel_pending_tasks, cancel_pending_tasks_at_node, decide_task, load_task, tasks_for_node,
};
use signoff_db::DbPool;

use crate::dispatcher::TaskDispatcher;
use crate::SideEffects;

/// Result of one recorded decision, after any node completion and advancement
/// it triggered.
#[derive(Debug)]
pub struct DecisionOutcome {
    pub task_id: TaskId,
    pub request_id: RequestId,
    pub request_status: RequestStatus,
    pub current_node_id: Option<NodeId>,
    pub node_completed: bool,
}

/// How a node stands after the latest change to its tasks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum NodeResolution {
    Waiting,
    Completed,
    Rejected,
    /// No pending task remains and the completion rule can no longer be met.
    Stalled,
}

/// Applies the node-completion rule over the node's tasks.
///
/// ANY and ALL treat a timed-out or superseded approver as an abstention: ANY
/// completes on the first approval, ALL completes once nothing is pending and
/// at least one approval landed. MAJORITY counts its thresholds against every
/// sibling task ever created at the node, so abstentions make a majority
/// harder to reach, never easier. A node left with no pending task and no met
/// rule is stalled; the caller must terminate the request rather than leave
/// it waiting on nobody.
pub(crate) fn evaluate_node(mode: ApproverMode, tasks: &[ApprovalTask]) -> NodeResolution {
    let total = tasks.len();
    let pending = tasks.iter().filter(|t| t.status == TaskStatus::Pending).count();
    let approved = tasks.iter().filter(|t| t.status == TaskStatus::Approved).count();
    let rejected = tasks.iter().filter(|t| t.status == TaskStatus::Rejected).count();

    if total == 0 {
        return NodeResolution::Stalled;
    }

    let majority = total.div_ceil(2);
    match mode {
        ApproverMode::Any if rejected >= 1 => NodeResolution::Rejected,
        ApproverMode::Any if approved >= 1 => NodeResolution::Completed,
        ApproverMode::All if rejected >= 1 => NodeResolution::Rejected,
        ApproverMode::All if approved >= 1 && pending == 0 => NodeResolution::Completed,
        ApproverMode::Majority if rejected >= majority => NodeResolution::Rejected,
        ApproverMode::Majority if approved >= majority => NodeResolution::Completed,
        _ if pending == 0 => NodeResolution::Stalled,
        _ => NodeResolution::Waiting,
    }
}

/// Records approver decisions and drives node completion.
pub struct DecisionProcessor {
    pool: DbPool,
    dispatcher: TaskDispatcher,
    audit: Arc<dyn AuditRecorder>,
    notifier: Arc<dyn Notifier>,
}

impl DecisionProcessor {
    pub fn new(
        pool: DbPool,
        directory: Arc<dyn Directory>,
        audit: Arc<dyn AuditRecorder>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self { pool, dispatcher: TaskDispatcher::new(directory), audit, notifier }
    }

    /// Records `actor_id`'s decision on a task.
    ///
    /// The guarded update on the task row is the concurrency gate: of two
    /// simultaneous decisions on the same task, the loser observes Conflict
    /// and mutates nothing.
    pub async fn record_decision(
        &self,
        tenant_id: &str,
        task_id: &TaskId,
        actor_id: &str,
        decision: Decision,
        comment: Option<String>,
    ) -> Result<DecisionOutcome, WorkflowError> {
        let comment = comment.map(|c| c.trim().to_string()).filter(|c| !c.is_empty());
        if decision == Decision::Reject && comment.is_none() {
            return Err(WorkflowError::validation("a rejection requires a comment"));
        }

        let now = Utc::now();
        let mut effects = SideEffects::default();
        let mut tx = self.pool.begin().await.map_err(WorkflowError::persistence)?;

        let task = load_task(tx.as_mut(), task_id)
            .await?
            .filter(|t| t.tenant_id == tenant_id)
            .ok_or_else(|| WorkflowError::not_found("task", task_id.0.clone()))?;

        if task.approver_id != actor_id {
            return Err(WorkflowError::forbidden(
                "the decision must come from the task's resolved approver",
            ));
        }
        if task.status != TaskStatus::Pending {
            return Err(WorkflowError::conflict("task is already decided"));
        }

        let request = load_request(tx.as_mut(), &task.request_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("request", task.request_id.0.clone()))?;
        if request.status != RequestStatus::Pending {
            return Err(WorkflowError::conflict("request is already finalized"));
        }

        let new_status = match decision {
            Decision::Approve => TaskStatus::Approved,
            Decision::Reject => TaskStatus::Rejected,
        };
        let updated = decide_task(tx.as_mut(), task_id, new_status, now, comment.as_deref()).await?;
        if updated == 0 {
            return Err(WorkflowError::conflict("task was decided concurrently"));
        }

        effects.audit(
            AuditEntry::new(
                tenant_id.to_string(),
                Some(actor_id.to_string()),
                "approval_task",
                task_id.0.clone(),
                match decision {
                    Decision::Approve => "task_approved",
                    Decision::Reject => "task_rejected",
                },
            )
            .with_old_values(json!({"status": "pending"}))
            .with_new_values(json!({
                "status": new_status.as_str(),
                "comment": comment,
                "request_id": request.id.0,
            })),
        );

        let nodes = load_nodes(tx.as_mut(), &request.flow_id).await?;
        let node_index = nodes
            .iter()
            .position(|n| n.id == task.node_id)
            .ok_or_else(|| WorkflowError::not_found("node", task.node_id.0.clone()))?;
        let node = &nodes[node_index];

        let node_tasks = tasks_for_node(tx.as_mut(), &request.id, &node.id).await?;
        let outcome = match evaluate_node(node.approver_mode, &node_tasks) {
            NodeResolution::Waiting => DecisionOutcome {
                task_id: task_id.clone(),
                request_id: request.id.clone(),
                request_status: RequestStatus::Pending,
                current_node_id: request.current_node_id.clone(),
                node_completed: false,
            },
            NodeResolution::Rejected => {
                cancel_pending_tasks(tx.as_mut(), &request.id, now).await?;
                let finalized =
                    finalize_request(tx.as_mut(), &request.id, RequestStatus::Rejected, now)
                        .await?;
                if finalized == 0 {
                    return Err(WorkflowError::conflict(
                        "request was finalized by a concurrent decision",
                    ));
                }

                effects.audit(
                    AuditEntry::new(
                        tenant_id.to_string(),
                        Some(actor_id.to_string()),
                        "approval_request",
                        request.id.0.clone(),
                        "request_rejected",
                    )
                    .with_old_values(json!({"status": "pending"}))
                    .with_new_values(json!({"status": "rejected", "node_id": node.id.0})),
                );
                effects.notify(Notification::new(
                    request.requester_id.clone(),
                    NotificationTemplate::RequestRejected,
                    json!({
                        "request_id": request.id.0,
                        "entity_type": request.entity_type,
                        "entity_id": request.entity_id,
                        "comment": comment,
                    }),
                ));

                DecisionOutcome {
                    task_id: task_id.clone(),
                    request_id: request.id.clone(),
                    request_status: RequestStatus::Rejected,
                    current_node_id: None,
                    node_completed: true,
                }
            }
            NodeResolution::Stalled => {
                let finalized =
                    finalize_request(tx.as_mut(), &request.id, RequestStatus::Rejected, now)
                        .await?;
                if finalized == 0 {
                    return Err(WorkflowError::conflict(
                        "request was finalized by a concurrent decision",
                    ));
                }

                effects.audit(
                    AuditEntry::new(
                        tenant_id.to_string(),
                        Some(actor_id.to_string()),
                        "approval_request",
                        request.id.0.clone(),
                        "request_rejected",
                    )
                    .with_old_values(json!({"status": "pending"}))
                    .with_new_values(json!({
                        "status": "rejected",
                        "node_id": node.id.0,
                        "reason": "approvals_exhausted",
                    })),
                );
                effects.notify(Notification::new(
                    request.requester_id.clone(),
                    NotificationTemplate::RequestRejected,
                    json!({
                        "request_id": request.id.0,
                        "entity_type": request.entity_type,
                        "entity_id": request.entity_id,
                        "reason": "approvals_exhausted",
                    }),
                ));

                DecisionOutcome {
                    task_id: task_id.clone(),
                    request_id: request.id.clone(),
                    request_status: RequestStatus::Rejected,
                    current_node_id: None,
                    node_completed: true,
                }
            }
            NodeResolution::Completed => {
                cancel_pending_tasks_at_node(tx.as_mut(), &request.id, &node.id, now).await?;

                let advance = self
                    .dispatcher
                    .advance_request(
                        tx.as_mut(),
                        &request,
                        &nodes,
                        node_index + 1,
                        Some(actor_id),
                        now,
                        &mut effects,
                    )
                    .await?;

                DecisionOutcome {
                    task_id: task_id.clone(),
                    request_id: request.id.clone(),
                    request_status: advance.status,
                    current_node_id: advance.current_node_id,
                    node_completed: true,
                }
            }
        };

        tx.commit().await.map_err(WorkflowError::persistence)?;
        effects.emit(self.audit.as_ref(), self.notifier.as_ref());

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use signoff_core::audit::InMemoryAuditRecorder;
    use signoff_core::directory::{DirectoryUser, InMemoryDirectory};
    use signoff_core::domain::flow::{
        ApproverMode, FlowDefinition, FlowId, Node, NodeId, NodeType,
    };
    use signoff_core::domain::request::{ApprovalRequest, RequestId, RequestStatus};
    use signoff_core::domain::task::{ApprovalTask, Decision, TaskId, TaskStatus};
    use signoff_core::errors::WorkflowError;
    use signoff_core::notify::InMemoryNotifier;
    use signoff_db::connect_with_settings;
    use signoff_db::migrations::run_pending;
    use signoff_db::repositories::request::insert_request;
    use signoff_db::repositories::{
        FlowRepository, RequestRepository, SqlFlowRepository, SqlRequestRepository,
        SqlTaskRepository, TaskRepository,
    };
    use signoff_db::DbPool;

    use super::{evaluate_node, DecisionProcessor, NodeResolution};
    use crate::dispatcher::TaskDispatcher;
    use crate::SideEffects;

    fn user(id: &str, roles: &[&str]) -> DirectoryUser {
        DirectoryUser {
            user_id: id.to_string(),
            tenant_id: "t-1".to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            is_active: true,
        }
    }

    fn node(id: &str, sort_order: i64, mode: ApproverMode, role: &str) -> Node {
        Node {
            id: NodeId(id.to_string()),
            flow_id: FlowId("f-1".to_string()),
            name: format!("step {sort_order}"),
            sort_order,
            node_type: NodeType::Approval,
            approver_mode: mode,
            approver_role: Some(role.to_string()),
            approver_user_ids: vec![],
            timeout_hours: Some(24),
        }
    }

    struct Harness {
        pool: DbPool,
        processor: DecisionProcessor,
        notifier: InMemoryNotifier,
        request_id: RequestId,
    }

    /// Seeds a flow with the given nodes, creates a request, and activates
    /// the first node.
    async fn harness(nodes: Vec<Node>, users: Vec<DirectoryUser>) -> Harness {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrations");

        let flows = SqlFlowRepository::new(pool.clone());
        flows
            .save_flow(FlowDefinition {
                id: FlowId("f-1".to_string()),
                tenant_id: "t-1".to_string(),
                code: "DISCOUNT".to_string(),
                name: "Discount approval".to_string(),
                is_active: true,
                created_at: Utc::now(),
            })
            .await
            .expect("save flow");
        for n in &nodes {
            flows.save_node(n.clone()).await.expect("save node");
        }

        let directory = Arc::new(InMemoryDirectory::with_users(users));
        let request = ApprovalRequest {
            id: RequestId("req-1".to_string()),
            tenant_id: "t-1".to_string(),
            flow_id: FlowId("f-1".to_string()),
            entity_type: "quote".to_string(),
            entity_id: "q-1".to_string(),
            requester_id: "u-req".to_string(),
            current_node_id: None,
            status: RequestStatus::Pending,
            created_at: Utc::now(),
            decided_at: None,
        };

        let dispatcher = TaskDispatcher::new(directory.clone());
        let mut tx = pool.begin().await.expect("begin");
        insert_request(tx.as_mut(), &request).await.expect("insert request");
        let mut effects = SideEffects::default();
        dispatcher
            .advance_request(tx.as_mut(), &request, &nodes, 0, Some("u-req"), Utc::now(), &mut effects)
            .await
            .expect("activate first node");
        tx.commit().await.expect("commit");

        let notifier = InMemoryNotifier::default();
        let processor = DecisionProcessor::new(
            pool.clone(),
            directory,
            Arc::new(InMemoryAuditRecorder::default()),
            Arc::new(notifier.clone()),
        );

        Harness { pool, processor, notifier, request_id: request.id }
    }

    async fn pending_task_for(harness: &Harness, approver: &str) -> ApprovalTask {
        SqlTaskRepository::new(harness.pool.clone())
            .list_pending_for_approver("t-1", approver)
            .await
            .expect("list")
            .into_iter()
            .next()
            .unwrap_or_else(|| panic!("no pending task for {approver}"))
    }

    #[tokio::test]
    async fn any_mode_completion_cancels_siblings_and_advances() {
        let h = harness(
            vec![
                node("n-1", 1, ApproverMode::Any, "MANAGER"),
                node("n-2", 2, ApproverMode::All, "FINANCE"),
            ],
            vec![
                user("u-m1", &["MANAGER"]),
                user("u-m2", &["MANAGER"]),
                user("u-fin", &["FINANCE"]),
            ],
        )
        .await;

        let task = pending_task_for(&h, "u-m1").await;
        let outcome = h
            .processor
            .record_decision("t-1", &task.id, "u-m1", Decision::Approve, None)
            .await
            .expect("decide");

        assert!(outcome.node_completed);
        assert_eq!(outcome.request_status, RequestStatus::Pending);
        assert_eq!(outcome.current_node_id, Some(NodeId("n-2".to_string())));

        let tasks = SqlTaskRepository::new(h.pool.clone())
            .list_for_request(&h.request_id)
            .await
            .expect("tasks");
        let sibling = tasks.iter().find(|t| t.approver_id == "u-m2").expect("sibling");
        assert_eq!(sibling.status, TaskStatus::Cancelled);
        assert!(tasks.iter().any(|t| t.approver_id == "u-fin" && t.status == TaskStatus::Pending));
    }

    #[tokio::test]
    async fn all_mode_waits_for_every_approver_then_approves() {
        let h = harness(
            vec![node("n-1", 1, ApproverMode::All, "FINANCE")],
            vec![user("u-f1", &["FINANCE"]), user("u-f2", &["FINANCE"])],
        )
        .await;

        let first = pending_task_for(&h, "u-f1").await;
        let outcome = h
            .processor
            .record_decision("t-1", &first.id, "u-f1", Decision::Approve, None)
            .await
            .expect("decide");
        assert!(!outcome.node_completed);
        assert_eq!(outcome.request_status, RequestStatus::Pending);

        let second = pending_task_for(&h, "u-f2").await;
        let outcome = h
            .processor
            .record_decision("t-1", &second.id, "u-f2", Decision::Approve, None)
            .await
            .expect("decide");
        assert!(outcome.node_completed);
        assert_eq!(outcome.request_status, RequestStatus::Approved);

        let request = SqlRequestRepository::new(h.pool.clone())
            .find_by_id(&h.request_id)
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(request.status, RequestStatus::Approved);
        assert!(request.decided_at.is_some());
    }

    #[tokio::test]
    async fn rejection_without_comment_is_invalid() {
        let h = harness(
            vec![node("n-1", 1, ApproverMode::Any, "MANAGER")],
            vec![user("u-m1", &["MANAGER"])],
        )
        .await;

        let task = pending_task_for(&h, "u-m1").await;
        let result = h
            .processor
            .record_decision("t-1", &task.id, "u-m1", Decision::Reject, Some("  ".to_string()))
            .await;
        assert!(matches!(result, Err(WorkflowError::Validation(_))));
    }

    #[tokio::test]
    async fn rejection_finalizes_request_and_cancels_open_tasks() {
        let h = harness(
            vec![
                node("n-1", 1, ApproverMode::All, "FINANCE"),
                node("n-2", 2, ApproverMode::Any, "MANAGER"),
            ],
            vec![
                user("u-f1", &["FINANCE"]),
                user("u-f2", &["FINANCE"]),
                user("u-m1", &["MANAGER"]),
            ],
        )
        .await;

        let task = pending_task_for(&h, "u-f1").await;
        let outcome = h
            .processor
            .record_decision("t-1", &task.id, "u-f1", Decision::Reject, Some("over budget".into()))
            .await
            .expect("decide");

        assert_eq!(outcome.request_status, RequestStatus::Rejected);

        let tasks = SqlTaskRepository::new(h.pool.clone())
            .list_for_request(&h.request_id)
            .await
            .expect("tasks");
        let open = tasks.iter().find(|t| t.approver_id == "u-f2").expect("second approver");
        assert_eq!(open.status, TaskStatus::Cancelled);

        let rejected_notice = h.notifier.sent().iter().any(|n| n.user_id == "u-req");
        assert!(rejected_notice, "requester should be notified of the rejection");
    }

    #[tokio::test]
    async fn second_decision_on_decided_task_is_a_conflict() {
        let h = harness(
            vec![node("n-1", 1, ApproverMode::All, "FINANCE")],
            vec![user("u-f1", &["FINANCE"]), user("u-f2", &["FINANCE"])],
        )
        .await;

        let task = pending_task_for(&h, "u-f1").await;
        h.processor
            .record_decision("t-1", &task.id, "u-f1", Decision::Approve, None)
            .await
            .expect("first decision");

        let again = h
            .processor
            .record_decision("t-1", &task.id, "u-f1", Decision::Approve, None)
            .await;
        assert!(matches!(again, Err(WorkflowError::Conflict(_))));
    }

    #[tokio::test]
    async fn non_matching_approver_is_forbidden_and_cross_tenant_is_not_found() {
        let h = harness(
            vec![node("n-1", 1, ApproverMode::Any, "MANAGER")],
            vec![user("u-m1", &["MANAGER"]), user("u-intruder", &[])],
        )
        .await;

        let task = pending_task_for(&h, "u-m1").await;

        let forbidden = h
            .processor
            .record_decision("t-1", &task.id, "u-intruder", Decision::Approve, None)
            .await;
        assert!(matches!(forbidden, Err(WorkflowError::Forbidden(_))));

        let cross_tenant = h
            .processor
            .record_decision("t-other", &task.id, "u-m1", Decision::Approve, None)
            .await;
        assert!(matches!(cross_tenant, Err(WorkflowError::NotFound { .. })));
    }

    #[tokio::test]
    async fn majority_mode_completes_at_half_rounded_up() {
        let h = harness(
            vec![node("n-1", 1, ApproverMode::Majority, "BOARD")],
            vec![
                user("u-b1", &["BOARD"]),
                user("u-b2", &["BOARD"]),
                user("u-b3", &["BOARD"]),
            ],
        )
        .await;

        let first = pending_task_for(&h, "u-b1").await;
        let outcome = h
            .processor
            .record_decision("t-1", &first.id, "u-b1", Decision::Approve, None)
            .await
            .expect("decide");
        assert!(!outcome.node_completed, "1 of 3 is not a majority");

        let second = pending_task_for(&h, "u-b2").await;
        let outcome = h
            .processor
            .record_decision("t-1", &second.id, "u-b2", Decision::Approve, None)
            .await
            .expect("decide");
        assert!(outcome.node_completed, "2 of 3 is a majority");
        assert_eq!(outcome.request_status, RequestStatus::Approved);
    }

    fn tally_task(id: &str, status: TaskStatus) -> ApprovalTask {
        ApprovalTask {
            id: TaskId(id.to_string()),
            tenant_id: "t-1".to_string(),
            request_id: RequestId("req-1".to_string()),
            node_id: NodeId("n-1".to_string()),
            approver_id: id.to_string(),
            original_approver_id: id.to_string(),
            status,
            is_dynamic: false,
            parent_task_id: None,
            due_at: None,
            decided_at: None,
            comment: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn all_mode_treats_timeouts_and_cancellations_as_abstentions() {
        let tasks = vec![
            tally_task("a", TaskStatus::Approved),
            tally_task("b", TaskStatus::Timeout),
            tally_task("c", TaskStatus::Cancelled),
        ];
        assert_eq!(evaluate_node(ApproverMode::All, &tasks), NodeResolution::Completed);

        // with a sibling still pending the node keeps waiting
        let tasks = vec![
            tally_task("a", TaskStatus::Approved),
            tally_task("b", TaskStatus::Timeout),
            tally_task("c", TaskStatus::Pending),
        ];
        assert_eq!(evaluate_node(ApproverMode::All, &tasks), NodeResolution::Waiting);
    }

    #[test]
    fn fully_lapsed_node_stalls_instead_of_waiting() {
        let tasks = vec![tally_task("a", TaskStatus::Timeout)];
        assert_eq!(evaluate_node(ApproverMode::Any, &tasks), NodeResolution::Stalled);
        assert_eq!(evaluate_node(ApproverMode::All, &tasks), NodeResolution::Stalled);
        assert_eq!(evaluate_node(ApproverMode::Majority, &tasks), NodeResolution::Stalled);
    }

    #[test]
    fn majority_rejection_threshold_matches_approval_threshold() {
        let tasks = vec![
            tally_task("a", TaskStatus::Rejected),
            tally_task("b", TaskStatus::Rejected),
            tally_task("c", TaskStatus::Pending),
        ];
        assert_eq!(evaluate_node(ApproverMode::Majority, &tasks), NodeResolution::Rejected);
    }

    #[test]
    fn majority_denominator_counts_every_sibling() {
        // one approval of three siblings is not a majority, even though one
        // sibling abstained by timing out
        let tasks = vec![
            tally_task("a", TaskStatus::Approved),
            tally_task("b", TaskStatus::Timeout),
            tally_task("c", TaskStatus::Pending),
        ];
        assert_eq!(evaluate_node(ApproverMode::Majority, &tasks), NodeResolution::Waiting);

        let tasks = vec![
            tally_task("a", TaskStatus::Approved),
            tally_task("b", TaskStatus::Timeout),
            tally_task("c", TaskStatus::Approved),
        ];
        assert_eq!(evaluate_node(ApproverMode::Majority, &tasks), NodeResolution::Completed);
    }

    #[test]
    fn majority_with_no_reachable_threshold_stalls() {
        let tasks = vec![
            tally_task("a", TaskStatus::Approved),
            tally_task("b", TaskStatus::Timeout),
            tally_task("c", TaskStatus::Timeout),
            tally_task("d", TaskStatus::Rejected),
        ];
        assert_eq!(evaluate_node(ApproverMode::Majority, &tasks), NodeResolution::Stalled);
    }

    #[tokio::test]
    async fn exhausted_majority_node_fails_the_request() {
        let h = harness(
            vec![node("n-1", 1, ApproverMode::Majority, "BOARD")],
            vec![
                user("u-b1", &["BOARD"]),
                user("u-b2", &["BOARD"]),
                user("u-b3", &["BOARD"]),
            ],
        )
        .await;

        // one of the three board members lapses into timeout
        let tasks = SqlTaskRepository::new(h.pool.clone());
        let mut lapsed = pending_task_for(&h, "u-b2").await;
        lapsed.status = TaskStatus::Timeout;
        tasks.save(lapsed).await.expect("mark timeout");

        let first = pending_task_for(&h, "u-b1").await;
        let outcome = h
            .processor
            .record_decision("t-1", &first.id, "u-b1", Decision::Reject, Some("no".into()))
            .await
            .expect("reject");
        assert_eq!(outcome.request_status, RequestStatus::Pending, "1 of 3 rejections");

        // the last decision leaves neither threshold reachable: 1 approval
        // and 1 rejection against a required 2 of 3, with nothing pending
        let last = pending_task_for(&h, "u-b3").await;
        let outcome = h
            .processor
            .record_decision("t-1", &last.id, "u-b3", Decision::Approve, None)
            .await
            .expect("approve");
        assert_eq!(outcome.request_status, RequestStatus::Rejected);
        assert_eq!(outcome.current_node_id, None);

        let request = SqlRequestRepository::new(h.pool.clone())
            .find_by_id(&h.request_id)
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(request.status, RequestStatus::Rejected);
        assert!(h.notifier.sent().iter().any(|n| n.user_id == "u-req"));
    }
}

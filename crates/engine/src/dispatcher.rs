use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use signoff_core::audit::AuditEntry;
use signoff_core::delegation::effective_approver;
use signoff_core::directory::Directory;
use signoff_core::domain::flow::{FlowId, Node, NodeId, NodeType};
use signoff_core::domain::request::{ApprovalRequest, RequestStatus};
use signoff_core::domain::task::{ApprovalTask, TaskId, TaskStatus};
use signoff_core::errors::WorkflowError;
use signoff_core::notify::{Notification, NotificationTemplate};
use signoff_db::repositories::delegation::active_delegations_for;
use signoff_db::repositories::request::{advance_request_node, finalize_request};
use signoff_db::repositories::task::insert_task;

use crate::SideEffects;

/// Upper bound on consecutive nodes auto-approved because the chain actor is
/// the sole resolved approver. Past this depth the node is dispatched
/// normally and waits for an explicit decision.
pub const MAX_AUTO_APPROVE_DEPTH: u32 = 10;

/// An approver after delegation resolution. `nominal` is the identity the
/// node configuration named; `effective` is who actually decides.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedApprover {
    pub nominal: String,
    pub effective: String,
}

/// Where an advance pass landed.
#[derive(Debug)]
pub struct AdvanceOutcome {
    pub status: RequestStatus,
    pub current_node_id: Option<NodeId>,
    pub created_tasks: Vec<ApprovalTask>,
    pub auto_approved_nodes: u32,
}

/// Resolves approver sets and materializes tasks for activating nodes.
pub struct TaskDispatcher {
    directory: Arc<dyn Directory>,
}

impl TaskDispatcher {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self { directory }
    }

    async fn nominal_approvers(
        &self,
        tenant_id: &str,
        node: &Node,
    ) -> Result<Vec<String>, WorkflowError> {
        let nominal = match &node.approver_role {
            Some(role) => self
                .directory
                .users_with_role(tenant_id, role)
                .await
                .map_err(WorkflowError::persistence)?,
            None => node.approver_user_ids.clone(),
        };

        if nominal.is_empty() {
            return Err(WorkflowError::configuration(format!(
                "node {} ({}) resolved an empty approver set; the request cannot progress",
                node.id.0, node.name
            )));
        }

        Ok(nominal)
    }

    /// The delegation-resolved approver set for a node, deduplicated by
    /// effective identity so one person never holds two tasks at the same
    /// node.
    pub async fn resolve_approvers(
        &self,
        conn: &mut sqlx::SqliteConnection,
        tenant_id: &str,
        flow_id: &FlowId,
        node: &Node,
        now: DateTime<Utc>,
    ) -> Result<Vec<ResolvedApprover>, WorkflowError> {
        let nominal = self.nominal_approvers(tenant_id, node).await?;

        let mut resolved: Vec<ResolvedApprover> = Vec::with_capacity(nominal.len());
        for approver in nominal {
            let delegations = active_delegations_for(conn, tenant_id, &approver, now).await?;
            let effective = effective_approver(&approver, Some(flow_id), &delegations, now);
            if !resolved.iter().any(|r| r.effective == effective) {
                resolved.push(ResolvedApprover { nominal: approver, effective });
            }
        }

        Ok(resolved)
    }

    /// Creates the pending tasks for an activating approval node.
    pub async fn activate_node(
        &self,
        conn: &mut sqlx::SqliteConnection,
        request: &ApprovalRequest,
        node: &Node,
        now: DateTime<Utc>,
        effects: &mut SideEffects,
    ) -> Result<Vec<ApprovalTask>, WorkflowError> {
        let approvers =
            self.resolve_approvers(conn, &request.tenant_id, &request.flow_id, node, now).await?;

        let due_at = node.timeout_hours.map(|hours| now + Duration::hours(hours));
        let mut tasks = Vec::with_capacity(approvers.len());

        for approver in approvers {
            let task = ApprovalTask {
                id: TaskId(Uuid::new_v4().to_string()),
                tenant_id: request.tenant_id.clone(),
                request_id: request.id.clone(),
                node_id: node.id.clone(),
                approver_id: approver.effective.clone(),
                original_approver_id: approver.nominal.clone(),
                status: TaskStatus::Pending,
                is_dynamic: false,
                parent_task_id: None,
                due_at,
                decided_at: None,
                comment: None,
                created_at: now,
            };
            insert_task(conn, &task).await?;

            effects.notify(Notification::new(
                task.approver_id.clone(),
                NotificationTemplate::TaskAssigned,
                json!({
                    "task_id": task.id.0,
                    "request_id": request.id.0,
                    "node_name": node.name,
                    "entity_type": request.entity_type,
                    "entity_id": request.entity_id,
                    "due_at": due_at.map(|dt| dt.to_rfc3339()),
                }),
            ));
            tasks.push(task);
        }

        effects.audit(
            AuditEntry::new(
                request.tenant_id.clone(),
                None,
                "approval_request",
                request.id.0.clone(),
                "node_activated",
            )
            .with_new_values(json!({
                "node_id": node.id.0,
                "node_name": node.name,
                "task_count": tasks.len(),
            })),
        );

        Ok(tasks)
    }

    /// Walks the node list from `start_index` until a node genuinely waits on
    /// someone, or the request completes.
    ///
    /// Notify nodes fan out notifications and fall through. Approval nodes
    /// whose sole resolved approver is `chain_actor` are auto-approved up to
    /// [`MAX_AUTO_APPROVE_DEPTH`]; anything else creates pending tasks and
    /// parks the request at that node. A `None` chain actor (a timeout-driven
    /// advance) never auto-approves.
    pub async fn advance_request(
        &self,
        conn: &mut sqlx::SqliteConnection,
        request: &ApprovalRequest,
        nodes: &[Node],
        start_index: usize,
        chain_actor: Option<&str>,
        now: DateTime<Utc>,
        effects: &mut SideEffects,
    ) -> Result<AdvanceOutcome, WorkflowError> {
        let mut auto_approved_nodes = 0u32;
        let mut index = start_index;

        while let Some(node) = nodes.get(index) {
            match node.node_type {
                NodeType::Notify => {
                    let recipients = self
                        .resolve_approvers(conn, &request.tenant_id, &request.flow_id, node, now)
                        .await?;
                    for recipient in &recipients {
                        effects.notify(Notification::new(
                            recipient.effective.clone(),
                            NotificationTemplate::NodeActivated,
                            json!({
                                "request_id": request.id.0,
                                "node_name": node.name,
                                "entity_type": request.entity_type,
                                "entity_id": request.entity_id,
                            }),
                        ));
                    }
                    index += 1;
                }
                NodeType::Approval => {
                    let approvers = self
                        .resolve_approvers(conn, &request.tenant_id, &request.flow_id, node, now)
                        .await?;

                    let sole_actor = approvers.len() == 1
                        && chain_actor.is_some_and(|actor| approvers[0].effective == actor);
                    if sole_actor && auto_approved_nodes < MAX_AUTO_APPROVE_DEPTH {
                        let task = ApprovalTask {
                            id: TaskId(Uuid::new_v4().to_string()),
                            tenant_id: request.tenant_id.clone(),
                            request_id: request.id.clone(),
                            node_id: node.id.clone(),
                            approver_id: approvers[0].effective.clone(),
                            original_approver_id: approvers[0].nominal.clone(),
                            status: TaskStatus::Approved,
                            is_dynamic: false,
                            parent_task_id: None,
                            due_at: None,
                            decided_at: Some(now),
                            comment: None,
                            created_at: now,
                        };
                        insert_task(conn, &task).await?;

                        effects.audit(
                            AuditEntry::new(
                                request.tenant_id.clone(),
                                chain_actor.map(str::to_string),
                                "approval_task",
                                task.id.0.clone(),
                                "task_auto_approved",
                            )
                            .with_new_values(json!({
                                "request_id": request.id.0,
                                "node_id": node.id.0,
                            })),
                        );

                        auto_approved_nodes += 1;
                        index += 1;
                        continue;
                    }

                    let created_tasks =
                        self.activate_node(conn, request, node, now, effects).await?;

                    let updated = advance_request_node(conn, &request.id, Some(&node.id)).await?;
                    if updated == 0 {
                        return Err(WorkflowError::conflict(
                            "request was finalized by a concurrent decision",
                        ));
                    }

                    return Ok(AdvanceOutcome {
                        status: RequestStatus::Pending,
                        current_node_id: Some(node.id.clone()),
                        created_tasks,
                        auto_approved_nodes,
                    });
                }
            }
        }

        let updated = finalize_request(conn, &request.id, RequestStatus::Approved, now).await?;
        if updated == 0 {
            return Err(WorkflowError::conflict(
                "request was finalized by a concurrent decision",
            ));
        }

        effects.audit(
            AuditEntry::new(
                request.tenant_id.clone(),
                None,
                "approval_request",
                request.id.0.clone(),
                "request_approved",
            )
            .with_old_values(json!({"status": "pending"}))
            .with_new_values(json!({"status": "approved"})),
        );
        effects.notify(Notification::new(
            request.requester_id.clone(),
            NotificationTemplate::RequestApproved,
            json!({
                "request_id": request.id.0,
                "entity_type": request.entity_type,
                "entity_id": request.entity_id,
            }),
        ));

        Ok(AdvanceOutcome {
            status: RequestStatus::Approved,
            current_node_id: None,
            created_tasks: Vec::new(),
            auto_approved_nodes,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use signoff_core::directory::{DirectoryUser, InMemoryDirectory};
    use signoff_core::domain::delegation::{Delegation, DelegationId, DelegationType};
    use signoff_core::domain::flow::{ApproverMode, FlowDefinition, FlowId, Node, NodeId, NodeType};
    use signoff_core::domain::request::{ApprovalRequest, RequestId, RequestStatus};
    use signoff_core::domain::task::TaskStatus;
    use signoff_core::errors::WorkflowError;
    use signoff_core::notify::NotificationTemplate;
    use signoff_db::connect_with_settings;
    use signoff_db::migrations::run_pending;
    use signoff_db::repositories::request::insert_request;
    use signoff_db::repositories::{
        DelegationRepository, FlowRepository, SqlDelegationRepository, SqlFlowRepository,
        SqlRequestRepository, SqlTaskRepository, TaskRepository,
    };
    use signoff_db::DbPool;

    use super::TaskDispatcher;
    use crate::SideEffects;

    fn user(id: &str, roles: &[&str]) -> DirectoryUser {
        DirectoryUser {
            user_id: id.to_string(),
            tenant_id: "t-1".to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            is_active: true,
        }
    }

    fn node(id: &str, sort_order: i64, node_type: NodeType, role: &str) -> Node {
        Node {
            id: NodeId(id.to_string()),
            flow_id: FlowId("f-1".to_string()),
            name: format!("step {sort_order}"),
            sort_order,
            node_type,
            approver_mode: ApproverMode::Any,
            approver_role: Some(role.to_string()),
            approver_user_ids: vec![],
            timeout_hours: Some(24),
        }
    }

    async fn seeded_pool(nodes: &[Node]) -> DbPool {
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
        for node in nodes {
            flows.save_node(node.clone()).await.expect("save node");
        }
        pool
    }

    fn request(requester: &str) -> ApprovalRequest {
        ApprovalRequest {
            id: RequestId("req-1".to_string()),
            tenant_id: "t-1".to_string(),
            flow_id: FlowId("f-1".to_string()),
            entity_type: "quote".to_string(),
            entity_id: "q-1".to_string(),
            requester_id: requester.to_string(),
            current_node_id: None,
            status: RequestStatus::Pending,
            created_at: Utc::now(),
            decided_at: None,
        }
    }

    #[tokio::test]
    async fn delegation_collapses_duplicate_effective_approvers() {
        let nodes = vec![node("n-1", 1, NodeType::Approval, "FINANCE")];
        let pool = seeded_pool(&nodes).await;

        // u-1 delegates to u-2, who also holds the role directly
        let delegations = SqlDelegationRepository::new(pool.clone());
        let now = Utc::now();
        delegations
            .save(Delegation {
                id: DelegationId("d-1".to_string()),
                tenant_id: "t-1".to_string(),
                delegator_id: "u-1".to_string(),
                delegatee_id: "u-2".to_string(),
                delegation_type: DelegationType::Global,
                flow_id: None,
                starts_at: now - Duration::hours(1),
                ends_at: now + Duration::hours(1),
                is_active: true,
                created_at: now,
            })
            .await
            .expect("save delegation");

        let directory = Arc::new(InMemoryDirectory::with_users(vec![
            user("u-1", &["FINANCE"]),
            user("u-2", &["FINANCE"]),
        ]));
        let dispatcher = TaskDispatcher::new(directory);

        let req = request("u-req");
        let mut tx = pool.begin().await.expect("begin");
        insert_request(tx.as_mut(), &req).await.expect("insert request");
        let mut effects = SideEffects::default();
        let tasks = dispatcher
            .activate_node(tx.as_mut(), &req, &nodes[0], now, &mut effects)
            .await
            .expect("activate");
        tx.commit().await.expect("commit");

        assert_eq!(tasks.len(), 1, "both nominals resolve to u-2; one task expected");
        assert_eq!(tasks[0].approver_id, "u-2");
        assert_eq!(tasks[0].original_approver_id, "u-1");
        assert!(tasks[0].due_at.is_some());
    }

    #[tokio::test]
    async fn empty_approver_set_is_a_configuration_error() {
        let nodes = vec![node("n-1", 1, NodeType::Approval, "NOBODY_HAS_THIS")];
        let pool = seeded_pool(&nodes).await;
        let dispatcher =
            TaskDispatcher::new(Arc::new(InMemoryDirectory::with_users(vec![user(
                "u-1",
                &["FINANCE"],
            )])));

        let req = request("u-req");
        let mut tx = pool.begin().await.expect("begin");
        insert_request(tx.as_mut(), &req).await.expect("insert request");
        let mut effects = SideEffects::default();
        let result = dispatcher
            .activate_node(tx.as_mut(), &req, &nodes[0], Utc::now(), &mut effects)
            .await;

        assert!(matches!(result, Err(WorkflowError::Configuration(_))));
    }

    #[tokio::test]
    async fn notify_nodes_fall_through_to_the_next_approval_node() {
        let nodes = vec![
            node("n-1", 1, NodeType::Notify, "SALES"),
            node("n-2", 2, NodeType::Approval, "FINANCE"),
        ];
        let pool = seeded_pool(&nodes).await;
        let dispatcher = TaskDispatcher::new(Arc::new(InMemoryDirectory::with_users(vec![
            user("u-sales", &["SALES"]),
            user("u-fin", &["FINANCE"]),
        ])));

        let req = request("u-req");
        let mut tx = pool.begin().await.expect("begin");
        insert_request(tx.as_mut(), &req).await.expect("insert request");
        let mut effects = SideEffects::default();
        let outcome = dispatcher
            .advance_request(tx.as_mut(), &req, &nodes, 0, Some("u-req"), Utc::now(), &mut effects)
            .await
            .expect("advance");
        tx.commit().await.expect("commit");

        assert_eq!(outcome.status, RequestStatus::Pending);
        assert_eq!(outcome.current_node_id, Some(NodeId("n-2".to_string())));
        assert_eq!(outcome.created_tasks.len(), 1);
        assert_eq!(outcome.created_tasks[0].approver_id, "u-fin");
    }

    #[tokio::test]
    async fn sole_actor_nodes_auto_approve_until_a_real_approver() {
        let nodes = vec![
            node("n-1", 1, NodeType::Approval, "SELF"),
            node("n-2", 2, NodeType::Approval, "FINANCE"),
        ];
        let pool = seeded_pool(&nodes).await;
        let dispatcher = TaskDispatcher::new(Arc::new(InMemoryDirectory::with_users(vec![
            user("u-req", &["SELF"]),
            user("u-fin", &["FINANCE"]),
        ])));

        let req = request("u-req");
        let mut tx = pool.begin().await.expect("begin");
        insert_request(tx.as_mut(), &req).await.expect("insert request");
        let mut effects = SideEffects::default();
        let outcome = dispatcher
            .advance_request(tx.as_mut(), &req, &nodes, 0, Some("u-req"), Utc::now(), &mut effects)
            .await
            .expect("advance");
        tx.commit().await.expect("commit");

        assert_eq!(outcome.auto_approved_nodes, 1);
        assert_eq!(outcome.current_node_id, Some(NodeId("n-2".to_string())));

        let tasks = SqlTaskRepository::new(pool)
            .list_for_request(&req.id)
            .await
            .expect("tasks");
        assert_eq!(tasks.len(), 2);
        let auto = tasks.iter().find(|t| t.node_id.0 == "n-1").expect("auto task");
        assert_eq!(auto.status, TaskStatus::Approved);
        assert!(auto.decided_at.is_some());
    }

    #[tokio::test]
    async fn walking_off_the_last_node_approves_the_request() {
        let nodes = vec![node("n-1", 1, NodeType::Approval, "SELF")];
        let pool = seeded_pool(&nodes).await;
        let dispatcher = TaskDispatcher::new(Arc::new(InMemoryDirectory::with_users(vec![
            user("u-req", &["SELF"]),
        ])));

        let req = request("u-req");
        let mut tx = pool.begin().await.expect("begin");
        insert_request(tx.as_mut(), &req).await.expect("insert request");
        let mut effects = SideEffects::default();
        let outcome = dispatcher
            .advance_request(tx.as_mut(), &req, &nodes, 0, Some("u-req"), Utc::now(), &mut effects)
            .await
            .expect("advance");
        tx.commit().await.expect("commit");

        assert_eq!(outcome.status, RequestStatus::Approved);

        let loaded = SqlRequestRepository::new(pool.clone());
        use signoff_db::repositories::RequestRepository;
        let persisted = loaded.find_by_id(&req.id).await.expect("find").expect("exists");
        assert_eq!(persisted.status, RequestStatus::Approved);

        let audit = signoff_core::audit::InMemoryAuditRecorder::default();
        let notifier = signoff_core::notify::InMemoryNotifier::default();
        effects.emit(&audit, &notifier);
        assert!(
            notifier.sent().iter().any(|n| {
                n.template == NotificationTemplate::RequestApproved && n.user_id == "u-req"
            }),
            "requester should be told the request was approved",
        );
    }
}

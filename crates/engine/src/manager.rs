use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use signoff_core::audit::{AuditEntry, AuditRecorder};
use signoff_core::delegation::effective_approver;
use signoff_core::directory::Directory;
use signoff_core::domain::request::{ApprovalRequest, RequestId, RequestStatus};
use signoff_core::domain::task::{ApprovalTask, TaskId, TaskStatus};
use signoff_core::errors::WorkflowError;
use signoff_core::notify::{Notification, NotificationTemplate, Notifier};
use signoff_db::repositories::delegation::active_delegations_for;
use signoff_db::repositories::flow::load_node;
use signoff_db::repositories::request::{finalize_request, insert_request, load_request};
use signoff_db::repositories::task::{cancel_pending_tasks, insert_task, tasks_for_node};
use signoff_db::repositories::{
    FlowRepository, RequestRepository, SqlFlowRepository, SqlRequestRepository,
    SqlTaskRepository, TaskRepository,
};
use signoff_db::DbPool;

use crate::dispatcher::TaskDispatcher;
use crate::registry::validate_nodes;
use crate::SideEffects;

/// A freshly created request and where its first dispatch landed.
#[derive(Debug)]
pub struct CreatedRequest {
    pub request: ApprovalRequest,
    pub created_tasks: Vec<ApprovalTask>,
    pub auto_approved_nodes: u32,
}

/// A request together with all of its tasks, for status display.
#[derive(Debug)]
pub struct RequestStatusView {
    pub request: ApprovalRequest,
    pub tasks: Vec<ApprovalTask>,
}

/// Entry point for the request lifecycle: creation, cancellation, status.
pub struct ApprovalRequestManager {
    pool: DbPool,
    dispatcher: TaskDispatcher,
    directory: Arc<dyn Directory>,
    audit: Arc<dyn AuditRecorder>,
    notifier: Arc<dyn Notifier>,
}

impl ApprovalRequestManager {
    pub fn new(
        pool: DbPool,
        directory: Arc<dyn Directory>,
        audit: Arc<dyn AuditRecorder>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            pool,
            dispatcher: TaskDispatcher::new(directory.clone()),
            directory,
            audit,
            notifier,
        }
    }

    /// Creates a request for the flow named by `flow_code` and dispatches its
    /// first node. Fails Conflict when the business entity already has an
    /// active request.
    pub async fn create_request(
        &self,
        tenant_id: &str,
        flow_code: &str,
        entity_type: &str,
        entity_id: &str,
        requester_id: &str,
    ) -> Result<CreatedRequest, WorkflowError> {
        if entity_type.trim().is_empty() || entity_id.trim().is_empty() {
            return Err(WorkflowError::validation(
                "entity_type and entity_id must be non-empty",
            ));
        }

        let flows = SqlFlowRepository::new(self.pool.clone());
        let flow = flows
            .find_by_code(tenant_id, flow_code)
            .await?
            .ok_or_else(|| WorkflowError::not_found("flow", flow_code))?;
        if !flow.is_active {
            return Err(WorkflowError::validation(format!(
                "flow {flow_code} is not active"
            )));
        }

        let nodes = flows.nodes_for_flow(&flow.id).await?;
        validate_nodes(&nodes)
            .map_err(|e| WorkflowError::configuration(format!("flow {flow_code}: {e}")))?;

        let requests = SqlRequestRepository::new(self.pool.clone());
        if requests.find_active_for_entity(tenant_id, entity_type, entity_id).await?.is_some() {
            return Err(WorkflowError::conflict(format!(
                "an active request already exists for {entity_type}/{entity_id}"
            )));
        }

        let now = Utc::now();
        let mut request = ApprovalRequest {
            id: RequestId(Uuid::new_v4().to_string()),
            tenant_id: tenant_id.to_string(),
            flow_id: flow.id.clone(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            requester_id: requester_id.to_string(),
            current_node_id: None,
            status: RequestStatus::Pending,
            created_at: now,
            decided_at: None,
        };

        let mut effects = SideEffects::default();
        let mut tx = self.pool.begin().await.map_err(WorkflowError::persistence)?;

        // The partial unique index backstops the pre-check against a racing
        // creator; the violation surfaces as Conflict.
        insert_request(tx.as_mut(), &request).await?;

        effects.audit(
            AuditEntry::new(
                tenant_id.to_string(),
                Some(requester_id.to_string()),
                "approval_request",
                request.id.0.clone(),
                "request_created",
            )
            .with_new_values(json!({
                "flow_code": flow_code,
                "entity_type": entity_type,
                "entity_id": entity_id,
            })),
        );

        let advance = self
            .dispatcher
            .advance_request(tx.as_mut(), &request, &nodes, 0, Some(requester_id), now, &mut effects)
            .await?;

        tx.commit().await.map_err(WorkflowError::persistence)?;
        effects.emit(self.audit.as_ref(), self.notifier.as_ref());

        request.status = advance.status;
        request.current_node_id = advance.current_node_id;
        if request.status.is_terminal() {
            request.decided_at = Some(now);
        }

        Ok(CreatedRequest {
            request,
            created_tasks: advance.created_tasks,
            auto_approved_nodes: advance.auto_approved_nodes,
        })
    }

    /// Cancels a pending request. Only the requester may cancel.
    pub async fn cancel_request(
        &self,
        tenant_id: &str,
        request_id: &RequestId,
        actor_id: &str,
    ) -> Result<(), WorkflowError> {
        let now = Utc::now();
        let mut effects = SideEffects::default();
        let mut tx = self.pool.begin().await.map_err(WorkflowError::persistence)?;

        let request = load_request(tx.as_mut(), request_id)
            .await?
            .filter(|r| r.tenant_id == tenant_id)
            .ok_or_else(|| WorkflowError::not_found("request", request_id.0.clone()))?;

        if request.requester_id != actor_id {
            return Err(WorkflowError::forbidden("only the requester may cancel a request"));
        }
        if request.status != RequestStatus::Pending {
            return Err(WorkflowError::conflict("request is already finalized"));
        }

        let cancelled = cancel_pending_tasks(tx.as_mut(), request_id, now).await?;
        let finalized =
            finalize_request(tx.as_mut(), request_id, RequestStatus::Cancelled, now).await?;
        if finalized == 0 {
            return Err(WorkflowError::conflict("request was finalized concurrently"));
        }

        effects.audit(
            AuditEntry::new(
                tenant_id.to_string(),
                Some(actor_id.to_string()),
                "approval_request",
                request_id.0.clone(),
                "request_cancelled",
            )
            .with_old_values(json!({"status": "pending"}))
            .with_new_values(json!({
                "status": "cancelled",
                "cancelled_task_count": cancelled.len(),
            })),
        );
        effects.notify(Notification::new(
            request.requester_id.clone(),
            NotificationTemplate::RequestCancelled,
            json!({
                "request_id": request_id.0,
                "entity_type": request.entity_type,
                "entity_id": request.entity_id,
            }),
        ));

        tx.commit().await.map_err(WorkflowError::persistence)?;
        effects.emit(self.audit.as_ref(), self.notifier.as_ref());

        Ok(())
    }

    /// The request and its full task history.
    pub async fn get_request_status(
        &self,
        tenant_id: &str,
        request_id: &RequestId,
    ) -> Result<RequestStatusView, WorkflowError> {
        let request = SqlRequestRepository::new(self.pool.clone())
            .find_by_id(request_id)
            .await?
            .filter(|r| r.tenant_id == tenant_id)
            .ok_or_else(|| WorkflowError::not_found("request", request_id.0.clone()))?;

        let tasks =
            SqlTaskRepository::new(self.pool.clone()).list_for_request(request_id).await?;

        Ok(RequestStatusView { request, tasks })
    }

    /// The approver's open inbox within the tenant.
    pub async fn list_pending_tasks(
        &self,
        tenant_id: &str,
        approver_id: &str,
    ) -> Result<Vec<ApprovalTask>, WorkflowError> {
        Ok(SqlTaskRepository::new(self.pool.clone())
            .list_pending_for_approver(tenant_id, approver_id)
            .await?)
    }

    /// Adds an extra approver to the request's current node.
    ///
    /// Only a user holding a pending task at that node may pull someone else
    /// in. The added task is marked dynamic and linked to the actor's task.
    pub async fn add_approver(
        &self,
        tenant_id: &str,
        request_id: &RequestId,
        actor_id: &str,
        new_approver_id: &str,
    ) -> Result<ApprovalTask, WorkflowError> {
        let is_active = self
            .directory
            .is_active_user(tenant_id, new_approver_id)
            .await
            .map_err(WorkflowError::persistence)?;
        if !is_active {
            return Err(WorkflowError::validation(format!(
                "{new_approver_id} is not an active user of the tenant"
            )));
        }

        let now = Utc::now();
        let mut effects = SideEffects::default();
        let mut tx = self.pool.begin().await.map_err(WorkflowError::persistence)?;

        let request = load_request(tx.as_mut(), request_id)
            .await?
            .filter(|r| r.tenant_id == tenant_id)
            .ok_or_else(|| WorkflowError::not_found("request", request_id.0.clone()))?;
        if request.status != RequestStatus::Pending {
            return Err(WorkflowError::conflict("request is already finalized"));
        }
        let node_id = request
            .current_node_id
            .clone()
            .ok_or_else(|| WorkflowError::conflict("request has no active node"))?;
        let node = load_node(tx.as_mut(), &node_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("node", node_id.0.clone()))?;

        let node_tasks = tasks_for_node(tx.as_mut(), request_id, &node_id).await?;
        let actor_task = node_tasks
            .iter()
            .find(|t| t.approver_id == actor_id && t.status == TaskStatus::Pending)
            .ok_or_else(|| {
                WorkflowError::forbidden(
                    "only a pending approver at the current node may add approvers",
                )
            })?;

        let delegations =
            active_delegations_for(tx.as_mut(), tenant_id, new_approver_id, now).await?;
        let effective =
            effective_approver(new_approver_id, Some(&request.flow_id), &delegations, now);

        if node_tasks
            .iter()
            .any(|t| t.approver_id == effective && t.status != TaskStatus::Cancelled)
        {
            return Err(WorkflowError::conflict(format!(
                "{effective} already holds a task at this node"
            )));
        }

        let task = ApprovalTask {
            id: TaskId(Uuid::new_v4().to_string()),
            tenant_id: tenant_id.to_string(),
            request_id: request_id.clone(),
            node_id: node_id.clone(),
            approver_id: effective.clone(),
            original_approver_id: new_approver_id.to_string(),
            status: TaskStatus::Pending,
            is_dynamic: true,
            parent_task_id: Some(actor_task.id.clone()),
            due_at: node.timeout_hours.map(|hours| now + chrono::Duration::hours(hours)),
            decided_at: None,
            comment: None,
            created_at: now,
        };
        insert_task(tx.as_mut(), &task).await?;

        effects.audit(
            AuditEntry::new(
                tenant_id.to_string(),
                Some(actor_id.to_string()),
                "approval_task",
                task.id.0.clone(),
                "approver_added",
            )
            .with_new_values(json!({
                "request_id": request_id.0,
                "node_id": node_id.0,
                "approver_id": effective,
                "original_approver_id": new_approver_id,
            })),
        );
        effects.notify(Notification::new(
            effective,
            NotificationTemplate::TaskAssigned,
            json!({
                "task_id": task.id.0,
                "request_id": request_id.0,
                "node_name": node.name,
                "entity_type": request.entity_type,
                "entity_id": request.entity_id,
                "added_by": actor_id,
            }),
        ));

        tx.commit().await.map_err(WorkflowError::persistence)?;
        effects.emit(self.audit.as_ref(), self.notifier.as_ref());

        Ok(task)
    }
}

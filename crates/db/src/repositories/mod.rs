use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use signoff_core::domain::delegation::{Delegation, DelegationId};
use signoff_core::domain::flow::{FlowDefinition, FlowId, Node, NodeId};
use signoff_core::domain::request::{ApprovalRequest, RequestId, RequestStatus};
use signoff_core::domain::task::{ApprovalTask, TaskId};
use signoff_core::errors::WorkflowError;

pub mod delegation;
pub mod flow;
pub mod request;
pub mod task;

pub use delegation::SqlDelegationRepository;
pub use flow::SqlFlowRepository;
pub use request::SqlRequestRepository;
pub use task::SqlTaskRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for WorkflowError {
    fn from(error: RepositoryError) -> Self {
        match &error {
            RepositoryError::Database(sqlx::Error::Database(db_error))
                if db_error.is_unique_violation() =>
            {
                WorkflowError::conflict("a conflicting record already exists")
            }
            _ => WorkflowError::persistence(error),
        }
    }
}

#[async_trait]
pub trait FlowRepository: Send + Sync {
    async fn find_by_id(&self, id: &FlowId) -> Result<Option<FlowDefinition>, RepositoryError>;

    async fn find_by_code(
        &self,
        tenant_id: &str,
        code: &str,
    ) -> Result<Option<FlowDefinition>, RepositoryError>;

    async fn list_for_tenant(&self, tenant_id: &str)
        -> Result<Vec<FlowDefinition>, RepositoryError>;

    async fn save_flow(&self, flow: FlowDefinition) -> Result<(), RepositoryError>;

    async fn save_node(&self, node: Node) -> Result<(), RepositoryError>;

    /// Nodes of the flow in `sort_order` ascending.
    async fn nodes_for_flow(&self, flow_id: &FlowId) -> Result<Vec<Node>, RepositoryError>;

    async fn find_node(&self, node_id: &NodeId) -> Result<Option<Node>, RepositoryError>;
}

#[async_trait]
pub trait RequestRepository: Send + Sync {
    async fn find_by_id(&self, id: &RequestId)
        -> Result<Option<ApprovalRequest>, RepositoryError>;

    async fn find_active_for_entity(
        &self,
        tenant_id: &str,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<ApprovalRequest>, RepositoryError>;

    async fn save(&self, request: ApprovalRequest) -> Result<(), RepositoryError>;

    async fn list_for_tenant(
        &self,
        tenant_id: &str,
        status: Option<RequestStatus>,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError>;
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn find_by_id(&self, id: &TaskId) -> Result<Option<ApprovalTask>, RepositoryError>;

    async fn save(&self, task: ApprovalTask) -> Result<(), RepositoryError>;

    async fn list_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<ApprovalTask>, RepositoryError>;

    async fn list_pending_for_approver(
        &self,
        tenant_id: &str,
        approver_id: &str,
    ) -> Result<Vec<ApprovalTask>, RepositoryError>;

    /// Pending tasks whose deadline has passed, oldest deadline first.
    async fn list_overdue(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ApprovalTask>, RepositoryError>;
}

#[async_trait]
pub trait DelegationRepository: Send + Sync {
    async fn find_by_id(&self, id: &DelegationId)
        -> Result<Option<Delegation>, RepositoryError>;

    async fn save(&self, delegation: Delegation) -> Result<(), RepositoryError>;

    /// Active delegations whose window covers `now` where the user is the
    /// delegator. Used for forward resolution.
    async fn active_from_delegator(
        &self,
        tenant_id: &str,
        delegator_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Delegation>, RepositoryError>;

    /// Active delegations naming the user as delegatee, regardless of window
    /// position. Used for cycle detection on create.
    async fn naming_delegatee(
        &self,
        tenant_id: &str,
        delegatee_id: &str,
    ) -> Result<Vec<Delegation>, RepositoryError>;

    async fn list_for_tenant(&self, tenant_id: &str)
        -> Result<Vec<Delegation>, RepositoryError>;
}

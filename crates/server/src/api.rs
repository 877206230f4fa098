//! JSON API for the approval workflow engine.
//!
//! Endpoints:
//! - `POST /api/v1/requests`                    — submit an entity for approval
//! - `GET  /api/v1/requests/{id}`               — request status with its tasks
//! - `POST /api/v1/requests/{id}/cancel`        — requester withdraws a request
//! - `POST /api/v1/requests/{id}/approvers`     — pull an extra approver into the current node
//! - `POST /api/v1/tasks/{id}/decision`         — approve or reject a task
//! - `GET  /api/v1/tasks?approver_id=…`         — pending inbox for an approver
//! - `GET  /api/v1/flows`                       — list flow definitions
//! - `POST /api/v1/flows`                       — register a flow with its nodes
//! - `GET  /api/v1/flows/{code}`                — flow definition with nodes
//! - `GET  /api/v1/delegations`                 — list delegations
//! - `POST /api/v1/delegations`                 — open a delegation window
//! - `POST /api/v1/delegations/{id}/revoke`     — deactivate a delegation
//!
//! Every route is tenant scoped through the `x-signoff-tenant` header.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use signoff_core::domain::delegation::{Delegation, DelegationId, DelegationType};
use signoff_core::domain::flow::{ApproverMode, FlowDefinition, FlowId, Node, NodeId, NodeType};
use signoff_core::domain::request::{ApprovalRequest, RequestId};
use signoff_core::domain::task::{ApprovalTask, Decision, TaskId};
use signoff_core::errors::WorkflowError;
use signoff_engine::{DecisionOutcome, Engine, NewDelegation};

const TENANT_HEADER: &str = "x-signoff-tenant";

#[derive(Clone)]
pub struct ApiState {
    engine: Engine,
}

pub fn router(engine: Engine) -> Router {
    Router::new()
        .route("/api/v1/requests", post(create_request))
        .route("/api/v1/requests/{request_id}", get(get_request_status))
        .route("/api/v1/requests/{request_id}/cancel", post(cancel_request))
        .route("/api/v1/requests/{request_id}/approvers", post(add_approver))
        .route("/api/v1/tasks", get(list_pending_tasks))
        .route("/api/v1/tasks/{task_id}/decision", post(record_decision))
        .route("/api/v1/flows", get(list_flows).post(register_flow))
        .route("/api/v1/flows/{code}", get(get_flow))
        .route("/api/v1/delegations", get(list_delegations).post(create_delegation))
        .route("/api/v1/delegations/{delegation_id}/revoke", post(revoke_delegation))
        .with_state(ApiState { engine })
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateRequestBody {
    pub flow_code: String,
    pub entity_type: String,
    pub entity_id: String,
    pub requester_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequestBody {
    pub actor_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AddApproverBody {
    pub actor_id: String,
    pub approver_id: String,
}

#[derive(Debug, Deserialize)]
pub struct DecisionBody {
    pub actor_id: String,
    pub decision: Decision,
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InboxQuery {
    pub approver_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterFlowBody {
    pub code: String,
    pub name: String,
    pub nodes: Vec<RegisterNodeBody>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterNodeBody {
    pub name: String,
    pub node_type: String,
    pub approver_mode: String,
    pub approver_role: Option<String>,
    #[serde(default)]
    pub approver_user_ids: Vec<String>,
    pub timeout_hours: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateDelegationBody {
    pub delegator_id: String,
    pub delegatee_id: String,
    pub delegation_type: String,
    pub flow_id: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct RevokeDelegationBody {
    pub actor_id: String,
}

#[derive(Debug, Serialize)]
pub struct RequestView {
    pub id: String,
    pub flow_id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub requester_id: String,
    pub current_node_id: Option<String>,
    pub status: &'static str,
    pub created_at: String,
    pub decided_at: Option<String>,
}

impl From<&ApprovalRequest> for RequestView {
    fn from(request: &ApprovalRequest) -> Self {
        Self {
            id: request.id.0.clone(),
            flow_id: request.flow_id.0.clone(),
            entity_type: request.entity_type.clone(),
            entity_id: request.entity_id.clone(),
            requester_id: request.requester_id.clone(),
            current_node_id: request.current_node_id.as_ref().map(|n| n.0.clone()),
            status: request.status.as_str(),
            created_at: request.created_at.to_rfc3339(),
            decided_at: request.decided_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TaskView {
    pub id: String,
    pub request_id: String,
    pub node_id: String,
    pub approver_id: String,
    pub original_approver_id: String,
    pub status: &'static str,
    pub is_dynamic: bool,
    pub parent_task_id: Option<String>,
    pub due_at: Option<String>,
    pub decided_at: Option<String>,
    pub comment: Option<String>,
    pub created_at: String,
}

impl From<&ApprovalTask> for TaskView {
    fn from(task: &ApprovalTask) -> Self {
        Self {
            id: task.id.0.clone(),
            request_id: task.request_id.0.clone(),
            node_id: task.node_id.0.clone(),
            approver_id: task.approver_id.clone(),
            original_approver_id: task.original_approver_id.clone(),
            status: task.status.as_str(),
            is_dynamic: task.is_dynamic,
            parent_task_id: task.parent_task_id.as_ref().map(|t| t.0.clone()),
            due_at: task.due_at.map(|t| t.to_rfc3339()),
            decided_at: task.decided_at.map(|t| t.to_rfc3339()),
            comment: task.comment.clone(),
            created_at: task.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreatedRequestResponse {
    pub request: RequestView,
    pub tasks: Vec<TaskView>,
    pub auto_approved_nodes: u32,
}

#[derive(Debug, Serialize)]
pub struct RequestStatusResponse {
    pub request: RequestView,
    pub tasks: Vec<TaskView>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct DecisionResponse {
    pub task_id: String,
    pub request_id: String,
    pub request_status: &'static str,
    pub current_node_id: Option<String>,
    pub node_completed: bool,
}

impl From<DecisionOutcome> for DecisionResponse {
    fn from(outcome: DecisionOutcome) -> Self {
        Self {
            task_id: outcome.task_id.0,
            request_id: outcome.request_id.0,
            request_status: outcome.request_status.as_str(),
            current_node_id: outcome.current_node_id.map(|n| n.0),
            node_completed: outcome.node_completed,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NodeView {
    pub id: String,
    pub name: String,
    pub sort_order: i64,
    pub node_type: &'static str,
    pub approver_mode: &'static str,
    pub approver_role: Option<String>,
    pub approver_user_ids: Vec<String>,
    pub timeout_hours: Option<i64>,
}

impl From<&Node> for NodeView {
    fn from(node: &Node) -> Self {
        Self {
            id: node.id.0.clone(),
            name: node.name.clone(),
            sort_order: node.sort_order,
            node_type: node.node_type.as_str(),
            approver_mode: node.approver_mode.as_str(),
            approver_role: node.approver_role.clone(),
            approver_user_ids: node.approver_user_ids.clone(),
            timeout_hours: node.timeout_hours,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FlowView {
    pub id: String,
    pub code: String,
    pub name: String,
    pub is_active: bool,
    pub created_at: String,
}

impl From<&FlowDefinition> for FlowView {
    fn from(flow: &FlowDefinition) -> Self {
        Self {
            id: flow.id.0.clone(),
            code: flow.code.clone(),
            name: flow.name.clone(),
            is_active: flow.is_active,
            created_at: flow.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FlowDetailResponse {
    pub flow: FlowView,
    pub nodes: Vec<NodeView>,
}

#[derive(Debug, Serialize)]
pub struct DelegationView {
    pub id: String,
    pub delegator_id: String,
    pub delegatee_id: String,
    pub delegation_type: &'static str,
    pub flow_id: Option<String>,
    pub starts_at: String,
    pub ends_at: String,
    pub is_active: bool,
    pub created_at: String,
}

impl From<&Delegation> for DelegationView {
    fn from(delegation: &Delegation) -> Self {
        Self {
            id: delegation.id.0.clone(),
            delegator_id: delegation.delegator_id.clone(),
            delegatee_id: delegation.delegatee_id.clone(),
            delegation_type: delegation.delegation_type.as_str(),
            flow_id: delegation.flow_id.as_ref().map(|f| f.0.clone()),
            starts_at: delegation.starts_at.to_rfc3339(),
            ends_at: delegation.ends_at.to_rfc3339(),
            is_active: delegation.is_active,
            created_at: delegation.created_at.to_rfc3339(),
        }
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

fn error_response(error: WorkflowError) -> (StatusCode, Json<ApiError>) {
    let (status, message) = match &error {
        WorkflowError::NotFound { .. } => (StatusCode::NOT_FOUND, error.to_string()),
        WorkflowError::Conflict(_) => (StatusCode::CONFLICT, error.to_string()),
        WorkflowError::Forbidden(_) => (StatusCode::FORBIDDEN, error.to_string()),
        WorkflowError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, error.to_string()),
        WorkflowError::Configuration(_) | WorkflowError::Persistence(_) => {
            error!(error = %error, "internal workflow failure");
            (StatusCode::INTERNAL_SERVER_ERROR, error.user_message().to_string())
        }
    };
    (status, Json(ApiError { error: message }))
}

fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (StatusCode::BAD_REQUEST, Json(ApiError { error: message.into() }))
}

fn tenant_id(headers: &HeaderMap) -> ApiResult<String> {
    headers
        .get(TENANT_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| bad_request(format!("missing `{TENANT_HEADER}` header")))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn create_request(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<CreateRequestBody>,
) -> ApiResult<(StatusCode, Json<CreatedRequestResponse>)> {
    let tenant = tenant_id(&headers)?;

    let created = state
        .engine
        .requests()
        .create_request(&tenant, &body.flow_code, &body.entity_type, &body.entity_id, &body.requester_id)
        .await
        .map_err(error_response)?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedRequestResponse {
            request: RequestView::from(&created.request),
            tasks: created.created_tasks.iter().map(TaskView::from).collect(),
            auto_approved_nodes: created.auto_approved_nodes,
        }),
    ))
}

async fn get_request_status(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
) -> ApiResult<Json<RequestStatusResponse>> {
    let tenant = tenant_id(&headers)?;

    let view = state
        .engine
        .requests()
        .get_request_status(&tenant, &RequestId(request_id))
        .await
        .map_err(error_response)?;

    Ok(Json(RequestStatusResponse {
        request: RequestView::from(&view.request),
        tasks: view.tasks.iter().map(TaskView::from).collect(),
    }))
}

async fn cancel_request(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
    Json(body): Json<CancelRequestBody>,
) -> ApiResult<Json<CancelResponse>> {
    let tenant = tenant_id(&headers)?;

    state
        .engine
        .requests()
        .cancel_request(&tenant, &RequestId(request_id), &body.actor_id)
        .await
        .map_err(error_response)?;

    Ok(Json(CancelResponse { status: "cancelled" }))
}

async fn add_approver(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
    Json(body): Json<AddApproverBody>,
) -> ApiResult<(StatusCode, Json<TaskView>)> {
    let tenant = tenant_id(&headers)?;

    let task = state
        .engine
        .requests()
        .add_approver(&tenant, &RequestId(request_id), &body.actor_id, &body.approver_id)
        .await
        .map_err(error_response)?;

    Ok((StatusCode::CREATED, Json(TaskView::from(&task))))
}

async fn list_pending_tasks(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<InboxQuery>,
) -> ApiResult<Json<Vec<TaskView>>> {
    let tenant = tenant_id(&headers)?;

    let tasks = state
        .engine
        .requests()
        .list_pending_tasks(&tenant, &query.approver_id)
        .await
        .map_err(error_response)?;

    Ok(Json(tasks.iter().map(TaskView::from).collect()))
}

async fn record_decision(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
    Json(body): Json<DecisionBody>,
) -> ApiResult<Json<DecisionResponse>> {
    let tenant = tenant_id(&headers)?;

    let outcome = state
        .engine
        .decisions()
        .record_decision(&tenant, &TaskId(task_id), &body.actor_id, body.decision, body.comment)
        .await
        .map_err(error_response)?;

    Ok(Json(DecisionResponse::from(outcome)))
}

async fn list_flows(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<FlowView>>> {
    let tenant = tenant_id(&headers)?;

    let flows = state.engine.registry().list_flows(&tenant).await.map_err(error_response)?;

    Ok(Json(flows.iter().map(FlowView::from).collect()))
}

async fn register_flow(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<RegisterFlowBody>,
) -> ApiResult<(StatusCode, Json<FlowDetailResponse>)> {
    let tenant = tenant_id(&headers)?;

    let flow = FlowDefinition {
        id: FlowId(Uuid::new_v4().to_string()),
        tenant_id: tenant,
        code: body.code,
        name: body.name,
        is_active: true,
        created_at: Utc::now(),
    };

    let mut nodes = Vec::with_capacity(body.nodes.len());
    for (index, node) in body.nodes.into_iter().enumerate() {
        let node_type = NodeType::parse(&node.node_type)
            .ok_or_else(|| bad_request(format!("unknown node_type `{}`", node.node_type)))?;
        let approver_mode = ApproverMode::parse(&node.approver_mode).ok_or_else(|| {
            bad_request(format!("unknown approver_mode `{}`", node.approver_mode))
        })?;

        nodes.push(Node {
            id: NodeId(Uuid::new_v4().to_string()),
            flow_id: flow.id.clone(),
            name: node.name,
            sort_order: (index as i64) + 1,
            node_type,
            approver_mode,
            approver_role: node.approver_role,
            approver_user_ids: node.approver_user_ids,
            timeout_hours: node.timeout_hours,
        });
    }

    state
        .engine
        .registry()
        .register_flow(flow.clone(), nodes.clone())
        .await
        .map_err(error_response)?;

    Ok((
        StatusCode::CREATED,
        Json(FlowDetailResponse {
            flow: FlowView::from(&flow),
            nodes: nodes.iter().map(NodeView::from).collect(),
        }),
    ))
}

async fn get_flow(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> ApiResult<Json<FlowDetailResponse>> {
    let tenant = tenant_id(&headers)?;

    let registry = state.engine.registry();
    let flow = registry.get_flow(&tenant, &code).await.map_err(error_response)?;
    let nodes = registry.get_nodes(&flow.id).await.map_err(error_response)?;

    Ok(Json(FlowDetailResponse {
        flow: FlowView::from(&flow),
        nodes: nodes.iter().map(NodeView::from).collect(),
    }))
}

async fn list_delegations(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<DelegationView>>> {
    let tenant = tenant_id(&headers)?;

    let delegations =
        state.engine.delegations().list_delegations(&tenant).await.map_err(error_response)?;

    Ok(Json(delegations.iter().map(DelegationView::from).collect()))
}

async fn create_delegation(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<CreateDelegationBody>,
) -> ApiResult<(StatusCode, Json<DelegationView>)> {
    let tenant = tenant_id(&headers)?;

    let delegation_type = DelegationType::parse(&body.delegation_type)
        .ok_or_else(|| bad_request(format!("unknown delegation_type `{}`", body.delegation_type)))?;

    let created = state
        .engine
        .delegations()
        .create_delegation(NewDelegation {
            tenant_id: tenant,
            delegator_id: body.delegator_id,
            delegatee_id: body.delegatee_id,
            delegation_type,
            flow_id: body.flow_id.map(FlowId),
            starts_at: body.starts_at,
            ends_at: body.ends_at,
        })
        .await
        .map_err(error_response)?;

    Ok((StatusCode::CREATED, Json(DelegationView::from(&created))))
}

async fn revoke_delegation(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(delegation_id): Path<String>,
    Json(body): Json<RevokeDelegationBody>,
) -> ApiResult<Json<CancelResponse>> {
    let tenant = tenant_id(&headers)?;

    state
        .engine
        .delegations()
        .revoke_delegation(&tenant, &DelegationId(delegation_id), &body.actor_id)
        .await
        .map_err(error_response)?;

    Ok(Json(CancelResponse { status: "revoked" }))
}

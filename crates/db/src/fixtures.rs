use chrono::Utc;

use signoff_core::domain::flow::{ApproverMode, FlowDefinition, FlowId, Node, NodeId, NodeType};

use crate::repositories::{FlowRepository, RepositoryError, SqlFlowRepository};
use crate::DbPool;

pub const DEMO_TENANT: &str = "demo";
pub const DEMO_FLOW_CODE: &str = "DISCOUNT_APPROVAL";

/// Identifiers of the demo flow seeded by [`seed_demo_workflow`].
#[derive(Clone, Debug)]
pub struct DemoSeed {
    pub tenant_id: String,
    pub flow_id: FlowId,
    pub node_ids: Vec<NodeId>,
}

/// Seeds a three-step discount approval flow for the demo tenant: manager
/// review (any), finance review (all), then a notify step for the sales team.
/// Idempotent; re-running updates the same rows.
pub async fn seed_demo_workflow(pool: &DbPool) -> Result<DemoSeed, RepositoryError> {
    let repo = SqlFlowRepository::new(pool.clone());

    let flow_id = FlowId("flow-demo-discount".to_string());
    repo.save_flow(FlowDefinition {
        id: flow_id.clone(),
        tenant_id: DEMO_TENANT.to_string(),
        code: DEMO_FLOW_CODE.to_string(),
        name: "Discount approval".to_string(),
        is_active: true,
        created_at: Utc::now(),
    })
    .await?;

    let nodes = vec![
        Node {
            id: NodeId("node-demo-manager".to_string()),
            flow_id: flow_id.clone(),
            name: "Manager review".to_string(),
            sort_order: 1,
            node_type: NodeType::Approval,
            approver_mode: ApproverMode::Any,
            approver_role: Some("STORE_MANAGER".to_string()),
            approver_user_ids: vec![],
            timeout_hours: Some(24),
        },
        Node {
            id: NodeId("node-demo-finance".to_string()),
            flow_id: flow_id.clone(),
            name: "Finance review".to_string(),
            sort_order: 2,
            node_type: NodeType::Approval,
            approver_mode: ApproverMode::All,
            approver_role: Some("FINANCE".to_string()),
            approver_user_ids: vec![],
            timeout_hours: Some(48),
        },
        Node {
            id: NodeId("node-demo-announce".to_string()),
            flow_id: flow_id.clone(),
            name: "Announce to sales".to_string(),
            sort_order: 3,
            node_type: NodeType::Notify,
            approver_mode: ApproverMode::Any,
            approver_role: Some("SALES".to_string()),
            approver_user_ids: vec![],
            timeout_hours: None,
        },
    ];

    let mut node_ids = Vec::with_capacity(nodes.len());
    for node in nodes {
        node_ids.push(node.id.clone());
        repo.save_node(node).await?;
    }

    Ok(DemoSeed { tenant_id: DEMO_TENANT.to_string(), flow_id, node_ids })
}

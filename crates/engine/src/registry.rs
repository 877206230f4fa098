use signoff_core::domain::flow::{FlowDefinition, FlowId, Node, NodeId, NodeType};
use signoff_core::errors::WorkflowError;
use signoff_db::repositories::{FlowRepository, SqlFlowRepository};
use signoff_db::DbPool;

/// Read-mostly access to flow definitions and their ordered nodes.
///
/// Node lists are treated as immutable snapshots once a request references
/// them; `register_flow` exists for the configuration surface and seeding,
/// not for editing in-flight flows.
pub struct FlowRegistry {
    repo: SqlFlowRepository,
}

impl FlowRegistry {
    pub fn new(pool: DbPool) -> Self {
        Self { repo: SqlFlowRepository::new(pool) }
    }

    pub async fn get_flow(
        &self,
        tenant_id: &str,
        code: &str,
    ) -> Result<FlowDefinition, WorkflowError> {
        let flow = self.repo.find_by_code(tenant_id, code).await?;
        flow.ok_or_else(|| WorkflowError::not_found("flow", code))
    }

    /// Nodes of the flow ordered by `sort_order`.
    pub async fn get_nodes(&self, flow_id: &FlowId) -> Result<Vec<Node>, WorkflowError> {
        Ok(self.repo.nodes_for_flow(flow_id).await?)
    }

    pub async fn get_node(&self, node_id: &NodeId) -> Result<Node, WorkflowError> {
        let node = self.repo.find_node(node_id).await?;
        node.ok_or_else(|| WorkflowError::not_found("node", node_id.0.clone()))
    }

    pub async fn list_flows(&self, tenant_id: &str) -> Result<Vec<FlowDefinition>, WorkflowError> {
        Ok(self.repo.list_for_tenant(tenant_id).await?)
    }

    /// Persists a flow and its nodes after validating the node invariants.
    pub async fn register_flow(
        &self,
        flow: FlowDefinition,
        nodes: Vec<Node>,
    ) -> Result<(), WorkflowError> {
        for node in &nodes {
            if node.flow_id != flow.id {
                return Err(WorkflowError::validation(format!(
                    "node {} does not belong to flow {}",
                    node.id.0, flow.id.0
                )));
            }
        }
        validate_nodes(&nodes)?;

        self.repo.save_flow(flow).await?;
        for node in nodes {
            self.repo.save_node(node).await?;
        }
        Ok(())
    }
}

/// Checks the structural invariants of a flow's node list: non-empty,
/// strictly increasing sort order, well-formed approver sources, and at
/// least one approval step.
pub fn validate_nodes(nodes: &[Node]) -> Result<(), WorkflowError> {
    if nodes.is_empty() {
        return Err(WorkflowError::validation("a flow must define at least one node"));
    }

    let mut previous: Option<i64> = None;
    for node in nodes {
        if let Some(prev) = previous {
            if node.sort_order <= prev {
                return Err(WorkflowError::validation(format!(
                    "node sort_order must be strictly increasing; {} repeats or regresses at node {}",
                    node.sort_order, node.id.0
                )));
            }
        }
        previous = Some(node.sort_order);

        if !node.has_valid_approver_source() {
            return Err(WorkflowError::validation(format!(
                "node {} must configure either an approver role or a non-empty user list",
                node.id.0
            )));
        }
    }

    if !nodes.iter().any(|n| n.node_type == NodeType::Approval) {
        return Err(WorkflowError::validation(
            "a flow must contain at least one approval node",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use signoff_core::domain::flow::{ApproverMode, FlowDefinition, FlowId, Node, NodeId, NodeType};
    use signoff_core::errors::WorkflowError;
    use signoff_db::migrations::run_pending;
    use signoff_db::connect_with_settings;

    use super::{validate_nodes, FlowRegistry};

    fn flow(id: &str) -> FlowDefinition {
        FlowDefinition {
            id: FlowId(id.to_string()),
            tenant_id: "t-1".to_string(),
            code: "DISCOUNT".to_string(),
            name: "Discount approval".to_string(),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn node(id: &str, flow_id: &str, sort_order: i64, node_type: NodeType) -> Node {
        Node {
            id: NodeId(id.to_string()),
            flow_id: FlowId(flow_id.to_string()),
            name: format!("step {sort_order}"),
            sort_order,
            node_type,
            approver_mode: ApproverMode::Any,
            approver_role: Some("STORE_MANAGER".to_string()),
            approver_user_ids: vec![],
            timeout_hours: None,
        }
    }

    #[test]
    fn duplicate_sort_order_is_rejected() {
        let nodes = vec![
            node("n-1", "f-1", 1, NodeType::Approval),
            node("n-2", "f-1", 1, NodeType::Approval),
        ];
        assert!(matches!(validate_nodes(&nodes), Err(WorkflowError::Validation(_))));
    }

    #[test]
    fn notify_only_flow_is_rejected() {
        let nodes = vec![node("n-1", "f-1", 1, NodeType::Notify)];
        assert!(matches!(validate_nodes(&nodes), Err(WorkflowError::Validation(_))));
    }

    #[test]
    fn ordered_mixed_flow_passes() {
        let nodes = vec![
            node("n-1", "f-1", 1, NodeType::Approval),
            node("n-2", "f-1", 5, NodeType::Notify),
        ];
        assert!(validate_nodes(&nodes).is_ok());
    }

    #[tokio::test]
    async fn registered_flow_is_retrievable_by_code() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrations");
        let registry = FlowRegistry::new(pool);

        registry
            .register_flow(flow("f-1"), vec![node("n-1", "f-1", 1, NodeType::Approval)])
            .await
            .expect("register");

        let loaded = registry.get_flow("t-1", "DISCOUNT").await.expect("get");
        assert_eq!(loaded.id.0, "f-1");

        let missing = registry.get_flow("t-1", "UNKNOWN").await;
        assert!(matches!(missing, Err(WorkflowError::NotFound { .. })));
    }

    #[tokio::test]
    async fn foreign_node_is_rejected_at_registration() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrations");
        let registry = FlowRegistry::new(pool);

        let result = registry
            .register_flow(flow("f-1"), vec![node("n-1", "f-other", 1, NodeType::Approval)])
            .await;
        assert!(matches!(result, Err(WorkflowError::Validation(_))));
    }
}

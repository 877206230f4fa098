use chrono::{DateTime, Utc};
use sqlx::Row;

use signoff_core::domain::flow::{ApproverMode, FlowDefinition, FlowId, Node, NodeId, NodeType};

use super::{FlowRepository, RepositoryError};
use crate::DbPool;

pub struct SqlFlowRepository {
    pool: DbPool,
}

impl SqlFlowRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub fn row_to_flow(row: &sqlx::sqlite::SqliteRow) -> Result<FlowDefinition, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let tenant_id: String =
        row.try_get("tenant_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let code: String = row.try_get("code").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let name: String = row.try_get("name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let is_active: i64 =
        row.try_get("is_active").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at_str: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(FlowDefinition {
        id: FlowId(id),
        tenant_id,
        code,
        name,
        is_active: is_active != 0,
        created_at: parse_timestamp(&created_at_str),
    })
}

pub fn row_to_node(row: &sqlx::sqlite::SqliteRow) -> Result<Node, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let flow_id: String =
        row.try_get("flow_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let name: String = row.try_get("name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let sort_order: i64 =
        row.try_get("sort_order").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let node_type_str: String =
        row.try_get("node_type").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let approver_mode_str: String =
        row.try_get("approver_mode").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let approver_role: Option<String> =
        row.try_get("approver_role").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let approver_user_ids_json: String =
        row.try_get("approver_user_ids").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let timeout_hours: Option<i64> =
        row.try_get("timeout_hours").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let node_type = NodeType::parse(&node_type_str).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown node_type `{node_type_str}` for node {id}"))
    })?;
    let approver_mode = ApproverMode::parse(&approver_mode_str).ok_or_else(|| {
        RepositoryError::Decode(format!(
            "unknown approver_mode `{approver_mode_str}` for node {id}"
        ))
    })?;
    let approver_user_ids: Vec<String> = serde_json::from_str(&approver_user_ids_json)
        .map_err(|e| RepositoryError::Decode(format!("approver_user_ids for node {id}: {e}")))?;

    Ok(Node {
        id: NodeId(id),
        flow_id: FlowId(flow_id),
        name,
        sort_order,
        node_type,
        approver_mode,
        approver_role,
        approver_user_ids,
        timeout_hours,
    })
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

const FLOW_COLUMNS: &str = "id, tenant_id, code, name, is_active, created_at";
const NODE_COLUMNS: &str = "id, flow_id, name, sort_order, node_type, approver_mode, \
                            approver_role, approver_user_ids, timeout_hours";

/// Node list for a flow, read through an open transaction.
pub async fn load_nodes(
    conn: &mut sqlx::SqliteConnection,
    flow_id: &FlowId,
) -> Result<Vec<Node>, RepositoryError> {
    let rows = sqlx::query(&format!(
        "SELECT {NODE_COLUMNS} FROM approval_node WHERE flow_id = ? ORDER BY sort_order"
    ))
    .bind(&flow_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(row_to_node).collect()
}

pub async fn load_node(
    conn: &mut sqlx::SqliteConnection,
    node_id: &NodeId,
) -> Result<Option<Node>, RepositoryError> {
    let row = sqlx::query(&format!("SELECT {NODE_COLUMNS} FROM approval_node WHERE id = ?"))
        .bind(&node_id.0)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(ref r) => Ok(Some(row_to_node(r)?)),
        None => Ok(None),
    }
}

#[async_trait::async_trait]
impl FlowRepository for SqlFlowRepository {
    async fn find_by_id(&self, id: &FlowId) -> Result<Option<FlowDefinition>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {FLOW_COLUMNS} FROM approval_flow WHERE id = ?"))
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_flow(r)?)),
            None => Ok(None),
        }
    }

    async fn find_by_code(
        &self,
        tenant_id: &str,
        code: &str,
    ) -> Result<Option<FlowDefinition>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {FLOW_COLUMNS} FROM approval_flow WHERE tenant_id = ? AND code = ?"
        ))
        .bind(tenant_id)
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_flow(r)?)),
            None => Ok(None),
        }
    }

    async fn list_for_tenant(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<FlowDefinition>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {FLOW_COLUMNS} FROM approval_flow WHERE tenant_id = ? ORDER BY code"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_flow).collect()
    }

    async fn save_flow(&self, flow: FlowDefinition) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO approval_flow (id, tenant_id, code, name, is_active, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 is_active = excluded.is_active",
        )
        .bind(&flow.id.0)
        .bind(&flow.tenant_id)
        .bind(&flow.code)
        .bind(&flow.name)
        .bind(flow.is_active as i64)
        .bind(flow.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_node(&self, node: Node) -> Result<(), RepositoryError> {
        let approver_user_ids = serde_json::to_string(&node.approver_user_ids)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;

        sqlx::query(
            "INSERT INTO approval_node (id, flow_id, name, sort_order, node_type, approver_mode,
                                        approver_role, approver_user_ids, timeout_hours)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 sort_order = excluded.sort_order,
                 node_type = excluded.node_type,
                 approver_mode = excluded.approver_mode,
                 approver_role = excluded.approver_role,
                 approver_user_ids = excluded.approver_user_ids,
                 timeout_hours = excluded.timeout_hours",
        )
        .bind(&node.id.0)
        .bind(&node.flow_id.0)
        .bind(&node.name)
        .bind(node.sort_order)
        .bind(node.node_type.as_str())
        .bind(node.approver_mode.as_str())
        .bind(&node.approver_role)
        .bind(approver_user_ids)
        .bind(node.timeout_hours)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn nodes_for_flow(&self, flow_id: &FlowId) -> Result<Vec<Node>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {NODE_COLUMNS} FROM approval_node WHERE flow_id = ? ORDER BY sort_order"
        ))
        .bind(&flow_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_node).collect()
    }

    async fn find_node(&self, node_id: &NodeId) -> Result<Option<Node>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {NODE_COLUMNS} FROM approval_node WHERE id = ?"))
                .bind(&node_id.0)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_node(r)?)),
            None => Ok(None),
        }
    }
}

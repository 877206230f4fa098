use chrono::{DateTime, Utc};
use sqlx::Row;

use signoff_core::domain::flow::{FlowId, NodeId};
use signoff_core::domain::request::{ApprovalRequest, RequestId, RequestStatus};

use super::{RepositoryError, RequestRepository};
use crate::DbPool;

pub struct SqlRequestRepository {
    pool: DbPool,
}

impl SqlRequestRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub fn row_to_request(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalRequest, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let tenant_id: String =
        row.try_get("tenant_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let flow_id: String =
        row.try_get("flow_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let entity_type: String =
        row.try_get("entity_type").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let entity_id: String =
        row.try_get("entity_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let requester_id: String =
        row.try_get("requester_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let current_node_id: Option<String> =
        row.try_get("current_node_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let status_str: String =
        row.try_get("status").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at_str: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let decided_at_str: Option<String> =
        row.try_get("decided_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let status = RequestStatus::parse(&status_str).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown request status `{status_str}` for {id}"))
    })?;

    Ok(ApprovalRequest {
        id: RequestId(id),
        tenant_id,
        flow_id: FlowId(flow_id),
        entity_type,
        entity_id,
        requester_id,
        current_node_id: current_node_id.map(NodeId),
        status,
        created_at: parse_timestamp(&created_at_str),
        decided_at: decided_at_str.as_deref().map(parse_timestamp),
    })
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

const REQUEST_COLUMNS: &str = "id, tenant_id, flow_id, entity_type, entity_id, requester_id, \
                               current_node_id, status, created_at, decided_at";

/// Inserts the request row inside an open transaction. A duplicate pending
/// request for the same entity trips the partial unique index.
pub async fn insert_request(
    conn: &mut sqlx::SqliteConnection,
    request: &ApprovalRequest,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO approval_request
             (id, tenant_id, flow_id, entity_type, entity_id, requester_id,
              current_node_id, status, created_at, decided_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&request.id.0)
    .bind(&request.tenant_id)
    .bind(&request.flow_id.0)
    .bind(&request.entity_type)
    .bind(&request.entity_id)
    .bind(&request.requester_id)
    .bind(request.current_node_id.as_ref().map(|n| n.0.clone()))
    .bind(request.status.as_str())
    .bind(request.created_at.to_rfc3339())
    .bind(request.decided_at.map(|dt| dt.to_rfc3339()))
    .execute(conn)
    .await?;

    Ok(())
}

/// Request row read through an open transaction.
pub async fn load_request(
    conn: &mut sqlx::SqliteConnection,
    request_id: &RequestId,
) -> Result<Option<ApprovalRequest>, RepositoryError> {
    let row = sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM approval_request WHERE id = ?"))
        .bind(&request_id.0)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(ref r) => Ok(Some(row_to_request(r)?)),
        None => Ok(None),
    }
}

/// Moves a pending request to a new current node. Returns the number of rows
/// updated; zero means the request was concurrently finalized.
pub async fn advance_request_node(
    conn: &mut sqlx::SqliteConnection,
    request_id: &RequestId,
    node_id: Option<&NodeId>,
) -> Result<u64, RepositoryError> {
    let result = sqlx::query(
        "UPDATE approval_request SET current_node_id = ? WHERE id = ? AND status = 'pending'",
    )
    .bind(node_id.map(|n| n.0.clone()))
    .bind(&request_id.0)
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

/// Finalizes a pending request. The status guard makes the transition
/// idempotent under concurrent deciders; zero rows means someone else won.
pub async fn finalize_request(
    conn: &mut sqlx::SqliteConnection,
    request_id: &RequestId,
    status: RequestStatus,
    decided_at: DateTime<Utc>,
) -> Result<u64, RepositoryError> {
    let result = sqlx::query(
        "UPDATE approval_request
         SET status = ?, decided_at = ?, current_node_id = NULL
         WHERE id = ? AND status = 'pending'",
    )
    .bind(status.as_str())
    .bind(decided_at.to_rfc3339())
    .bind(&request_id.0)
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

#[async_trait::async_trait]
impl RequestRepository for SqlRequestRepository {
    async fn find_by_id(
        &self,
        id: &RequestId,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM approval_request WHERE id = ?"))
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_request(r)?)),
            None => Ok(None),
        }
    }

    async fn find_active_for_entity(
        &self,
        tenant_id: &str,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM approval_request
             WHERE tenant_id = ? AND entity_type = ? AND entity_id = ? AND status = 'pending'"
        ))
        .bind(tenant_id)
        .bind(entity_type)
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_request(r)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, request: ApprovalRequest) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO approval_request
                 (id, tenant_id, flow_id, entity_type, entity_id, requester_id,
                  current_node_id, status, created_at, decided_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 current_node_id = excluded.current_node_id,
                 status = excluded.status,
                 decided_at = excluded.decided_at",
        )
        .bind(&request.id.0)
        .bind(&request.tenant_id)
        .bind(&request.flow_id.0)
        .bind(&request.entity_type)
        .bind(&request.entity_id)
        .bind(&request.requester_id)
        .bind(request.current_node_id.as_ref().map(|n| n.0.clone()))
        .bind(request.status.as_str())
        .bind(request.created_at.to_rfc3339())
        .bind(request.decided_at.map(|dt| dt.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_tenant(
        &self,
        tenant_id: &str,
        status: Option<RequestStatus>,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {REQUEST_COLUMNS} FROM approval_request
                     WHERE tenant_id = ? AND status = ? ORDER BY created_at DESC"
                ))
                .bind(tenant_id)
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {REQUEST_COLUMNS} FROM approval_request
                     WHERE tenant_id = ? ORDER BY created_at DESC"
                ))
                .bind(tenant_id)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(row_to_request).collect()
    }
}

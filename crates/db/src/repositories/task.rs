use chrono::{DateTime, Utc};
use sqlx::Row;

use signoff_core::domain::flow::NodeId;
use signoff_core::domain::request::RequestId;
use signoff_core::domain::task::{ApprovalTask, TaskId, TaskStatus};

use super::{RepositoryError, TaskRepository};
use crate::DbPool;

pub struct SqlTaskRepository {
    pool: DbPool,
}

impl SqlTaskRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalTask, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let tenant_id: String =
        row.try_get("tenant_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let request_id: String =
        row.try_get("request_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let node_id: String =
        row.try_get("node_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let approver_id: String =
        row.try_get("approver_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let original_approver_id: String = row
        .try_get("original_approver_id")
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let status_str: String =
        row.try_get("status").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let is_dynamic: i64 =
        row.try_get("is_dynamic").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let parent_task_id: Option<String> =
        row.try_get("parent_task_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let due_at_str: Option<String> =
        row.try_get("due_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let decided_at_str: Option<String> =
        row.try_get("decided_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let comment: Option<String> =
        row.try_get("comment").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at_str: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let status = TaskStatus::parse(&status_str).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown task status `{status_str}` for {id}"))
    })?;

    Ok(ApprovalTask {
        id: TaskId(id),
        tenant_id,
        request_id: RequestId(request_id),
        node_id: NodeId(node_id),
        approver_id,
        original_approver_id,
        status,
        is_dynamic: is_dynamic != 0,
        parent_task_id: parent_task_id.map(TaskId),
        due_at: due_at_str.as_deref().map(parse_timestamp),
        decided_at: decided_at_str.as_deref().map(parse_timestamp),
        comment,
        created_at: parse_timestamp(&created_at_str),
    })
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

const TASK_COLUMNS: &str = "id, tenant_id, request_id, node_id, approver_id, \
                            original_approver_id, status, is_dynamic, parent_task_id, \
                            due_at, decided_at, comment, created_at";

/// Inserts a task row inside an open transaction.
pub async fn insert_task(
    conn: &mut sqlx::SqliteConnection,
    task: &ApprovalTask,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO approval_task
             (id, tenant_id, request_id, node_id, approver_id, original_approver_id,
              status, is_dynamic, parent_task_id, due_at, decided_at, comment, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&task.id.0)
    .bind(&task.tenant_id)
    .bind(&task.request_id.0)
    .bind(&task.node_id.0)
    .bind(&task.approver_id)
    .bind(&task.original_approver_id)
    .bind(task.status.as_str())
    .bind(task.is_dynamic as i64)
    .bind(task.parent_task_id.as_ref().map(|t| t.0.clone()))
    .bind(task.due_at.map(|dt| dt.to_rfc3339()))
    .bind(task.decided_at.map(|dt| dt.to_rfc3339()))
    .bind(&task.comment)
    .bind(task.created_at.to_rfc3339())
    .execute(conn)
    .await?;

    Ok(())
}

/// Task row read through an open transaction.
pub async fn load_task(
    conn: &mut sqlx::SqliteConnection,
    task_id: &TaskId,
) -> Result<Option<ApprovalTask>, RepositoryError> {
    let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM approval_task WHERE id = ?"))
        .bind(&task_id.0)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(ref r) => Ok(Some(row_to_task(r)?)),
        None => Ok(None),
    }
}

/// Records a decision against a pending task. Returns updated row count;
/// zero means the task was already decided, timed out, or cancelled.
pub async fn decide_task(
    conn: &mut sqlx::SqliteConnection,
    task_id: &TaskId,
    status: TaskStatus,
    decided_at: DateTime<Utc>,
    comment: Option<&str>,
) -> Result<u64, RepositoryError> {
    let result = sqlx::query(
        "UPDATE approval_task
         SET status = ?, decided_at = ?, comment = ?
         WHERE id = ? AND status = 'pending'",
    )
    .bind(status.as_str())
    .bind(decided_at.to_rfc3339())
    .bind(comment)
    .bind(&task_id.0)
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

/// Claims an overdue pending task for the sweeper. The status guard makes a
/// re-delivered sweep trigger a no-op for already-claimed tasks.
pub async fn claim_overdue_task(
    conn: &mut sqlx::SqliteConnection,
    task_id: &TaskId,
    now: DateTime<Utc>,
) -> Result<u64, RepositoryError> {
    let result = sqlx::query(
        "UPDATE approval_task
         SET status = 'timeout', decided_at = ?
         WHERE id = ? AND status = 'pending' AND due_at IS NOT NULL AND due_at <= ?",
    )
    .bind(now.to_rfc3339())
    .bind(&task_id.0)
    .bind(now.to_rfc3339())
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

/// Cancels every still-pending task of a request, returning the ids of the
/// tasks that were actually cancelled.
pub async fn cancel_pending_tasks(
    conn: &mut sqlx::SqliteConnection,
    request_id: &RequestId,
    now: DateTime<Utc>,
) -> Result<Vec<TaskId>, RepositoryError> {
    let rows = sqlx::query(
        "UPDATE approval_task
         SET status = 'cancelled', decided_at = ?
         WHERE request_id = ? AND status = 'pending'
         RETURNING id",
    )
    .bind(now.to_rfc3339())
    .bind(&request_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| {
            row.try_get::<String, _>("id")
                .map(TaskId)
                .map_err(|e| RepositoryError::Decode(e.to_string()))
        })
        .collect()
}

/// Cancels the still-pending sibling tasks at one node after the node's
/// completion rule has been met.
pub async fn cancel_pending_tasks_at_node(
    conn: &mut sqlx::SqliteConnection,
    request_id: &RequestId,
    node_id: &NodeId,
    now: DateTime<Utc>,
) -> Result<Vec<TaskId>, RepositoryError> {
    let rows = sqlx::query(
        "UPDATE approval_task
         SET status = 'cancelled', decided_at = ?
         WHERE request_id = ? AND node_id = ? AND status = 'pending'
         RETURNING id",
    )
    .bind(now.to_rfc3339())
    .bind(&request_id.0)
    .bind(&node_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| {
            row.try_get::<String, _>("id")
                .map(TaskId)
                .map_err(|e| RepositoryError::Decode(e.to_string()))
        })
        .collect()
}

/// Tasks of the request at one node, inside an open transaction. The decision
/// tally must see rows written earlier in the same transaction.
pub async fn tasks_for_node(
    conn: &mut sqlx::SqliteConnection,
    request_id: &RequestId,
    node_id: &NodeId,
) -> Result<Vec<ApprovalTask>, RepositoryError> {
    let rows = sqlx::query(&format!(
        "SELECT {TASK_COLUMNS} FROM approval_task
         WHERE request_id = ? AND node_id = ? ORDER BY created_at, id"
    ))
    .bind(&request_id.0)
    .bind(&node_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(row_to_task).collect()
}

#[async_trait::async_trait]
impl TaskRepository for SqlTaskRepository {
    async fn find_by_id(&self, id: &TaskId) -> Result<Option<ApprovalTask>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM approval_task WHERE id = ?"))
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_task(r)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, task: ApprovalTask) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO approval_task
                 (id, tenant_id, request_id, node_id, approver_id, original_approver_id,
                  status, is_dynamic, parent_task_id, due_at, decided_at, comment, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 approver_id = excluded.approver_id,
                 status = excluded.status,
                 due_at = excluded.due_at,
                 decided_at = excluded.decided_at,
                 comment = excluded.comment",
        )
        .bind(&task.id.0)
        .bind(&task.tenant_id)
        .bind(&task.request_id.0)
        .bind(&task.node_id.0)
        .bind(&task.approver_id)
        .bind(&task.original_approver_id)
        .bind(task.status.as_str())
        .bind(task.is_dynamic as i64)
        .bind(task.parent_task_id.as_ref().map(|t| t.0.clone()))
        .bind(task.due_at.map(|dt| dt.to_rfc3339()))
        .bind(task.decided_at.map(|dt| dt.to_rfc3339()))
        .bind(&task.comment)
        .bind(task.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<ApprovalTask>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM approval_task
             WHERE request_id = ? ORDER BY created_at, id"
        ))
        .bind(&request_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_task).collect()
    }

    async fn list_pending_for_approver(
        &self,
        tenant_id: &str,
        approver_id: &str,
    ) -> Result<Vec<ApprovalTask>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM approval_task
             WHERE tenant_id = ? AND approver_id = ? AND status = 'pending'
             ORDER BY created_at, id"
        ))
        .bind(tenant_id)
        .bind(approver_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_task).collect()
    }

    async fn list_overdue(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ApprovalTask>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM approval_task
             WHERE status = 'pending' AND due_at IS NOT NULL AND due_at <= ?
             ORDER BY due_at, id
             LIMIT ?"
        ))
        .bind(now.to_rfc3339())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_task).collect()
    }
}

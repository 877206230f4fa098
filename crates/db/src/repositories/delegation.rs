use chrono::{DateTime, Utc};
use sqlx::Row;

use signoff_core::domain::delegation::{Delegation, DelegationId, DelegationType};
use signoff_core::domain::flow::FlowId;

use super::{DelegationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlDelegationRepository {
    pool: DbPool,
}

impl SqlDelegationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub fn row_to_delegation(row: &sqlx::sqlite::SqliteRow) -> Result<Delegation, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let tenant_id: String =
        row.try_get("tenant_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let delegator_id: String =
        row.try_get("delegator_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let delegatee_id: String =
        row.try_get("delegatee_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let delegation_type_str: String =
        row.try_get("delegation_type").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let flow_id: Option<String> =
        row.try_get("flow_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let starts_at_str: String =
        row.try_get("starts_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let ends_at_str: String =
        row.try_get("ends_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let is_active: i64 =
        row.try_get("is_active").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at_str: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let delegation_type = DelegationType::parse(&delegation_type_str).ok_or_else(|| {
        RepositoryError::Decode(format!(
            "unknown delegation_type `{delegation_type_str}` for {id}"
        ))
    })?;

    Ok(Delegation {
        id: DelegationId(id),
        tenant_id,
        delegator_id,
        delegatee_id,
        delegation_type,
        flow_id: flow_id.map(FlowId),
        starts_at: parse_timestamp(&starts_at_str),
        ends_at: parse_timestamp(&ends_at_str),
        is_active: is_active != 0,
        created_at: parse_timestamp(&created_at_str),
    })
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

const DELEGATION_COLUMNS: &str = "id, tenant_id, delegator_id, delegatee_id, delegation_type, \
                                  flow_id, starts_at, ends_at, is_active, created_at";

/// Delegations covering `now` for the delegator, read through an open
/// transaction so task creation sees a consistent snapshot.
pub async fn active_delegations_for(
    conn: &mut sqlx::SqliteConnection,
    tenant_id: &str,
    delegator_id: &str,
    now: DateTime<Utc>,
) -> Result<Vec<Delegation>, RepositoryError> {
    let now_str = now.to_rfc3339();
    let rows = sqlx::query(&format!(
        "SELECT {DELEGATION_COLUMNS} FROM approval_delegation
         WHERE tenant_id = ? AND delegator_id = ? AND is_active = 1
           AND starts_at <= ? AND ends_at >= ?
         ORDER BY created_at"
    ))
    .bind(tenant_id)
    .bind(delegator_id)
    .bind(&now_str)
    .bind(&now_str)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(row_to_delegation).collect()
}

#[async_trait::async_trait]
impl DelegationRepository for SqlDelegationRepository {
    async fn find_by_id(
        &self,
        id: &DelegationId,
    ) -> Result<Option<Delegation>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {DELEGATION_COLUMNS} FROM approval_delegation WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_delegation(r)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, delegation: Delegation) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO approval_delegation
                 (id, tenant_id, delegator_id, delegatee_id, delegation_type,
                  flow_id, starts_at, ends_at, is_active, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 starts_at = excluded.starts_at,
                 ends_at = excluded.ends_at,
                 is_active = excluded.is_active",
        )
        .bind(&delegation.id.0)
        .bind(&delegation.tenant_id)
        .bind(&delegation.delegator_id)
        .bind(&delegation.delegatee_id)
        .bind(delegation.delegation_type.as_str())
        .bind(delegation.flow_id.as_ref().map(|f| f.0.clone()))
        .bind(delegation.starts_at.to_rfc3339())
        .bind(delegation.ends_at.to_rfc3339())
        .bind(delegation.is_active as i64)
        .bind(delegation.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn active_from_delegator(
        &self,
        tenant_id: &str,
        delegator_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Delegation>, RepositoryError> {
        let now_str = now.to_rfc3339();
        let rows = sqlx::query(&format!(
            "SELECT {DELEGATION_COLUMNS} FROM approval_delegation
             WHERE tenant_id = ? AND delegator_id = ? AND is_active = 1
               AND starts_at <= ? AND ends_at >= ?
             ORDER BY created_at"
        ))
        .bind(tenant_id)
        .bind(delegator_id)
        .bind(&now_str)
        .bind(&now_str)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_delegation).collect()
    }

    async fn naming_delegatee(
        &self,
        tenant_id: &str,
        delegatee_id: &str,
    ) -> Result<Vec<Delegation>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {DELEGATION_COLUMNS} FROM approval_delegation
             WHERE tenant_id = ? AND delegatee_id = ? AND is_active = 1
             ORDER BY created_at"
        ))
        .bind(tenant_id)
        .bind(delegatee_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_delegation).collect()
    }

    async fn list_for_tenant(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<Delegation>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {DELEGATION_COLUMNS} FROM approval_delegation
             WHERE tenant_id = ? ORDER BY created_at DESC"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_delegation).collect()
    }
}

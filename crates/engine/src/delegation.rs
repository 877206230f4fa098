use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use signoff_core::audit::{AuditEntry, AuditRecorder};
use signoff_core::delegation::{effective_approver, would_cycle};
use signoff_core::directory::Directory;
use signoff_core::domain::delegation::{Delegation, DelegationId, DelegationType};
use signoff_core::domain::flow::FlowId;
use signoff_core::errors::WorkflowError;
use signoff_db::repositories::{DelegationRepository, SqlDelegationRepository};
use signoff_db::DbPool;

/// Input for creating a delegation window.
#[derive(Clone, Debug)]
pub struct NewDelegation {
    pub tenant_id: String,
    pub delegator_id: String,
    pub delegatee_id: String,
    pub delegation_type: DelegationType,
    pub flow_id: Option<FlowId>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

/// Delegation lookup and lifecycle. Resolution itself is the pure function in
/// the core crate; this service supplies it with freshly queried rows, so a
/// window expiring never needs cache invalidation.
pub struct DelegationService {
    repo: SqlDelegationRepository,
    directory: Arc<dyn Directory>,
    audit: Arc<dyn AuditRecorder>,
}

impl DelegationService {
    pub fn new(pool: DbPool, directory: Arc<dyn Directory>, audit: Arc<dyn AuditRecorder>) -> Self {
        Self { repo: SqlDelegationRepository::new(pool), directory, audit }
    }

    /// The identity that actually decides for `approver_id` at this instant.
    pub async fn effective_approver(
        &self,
        tenant_id: &str,
        approver_id: &str,
        flow_id: Option<&FlowId>,
        now: DateTime<Utc>,
    ) -> Result<String, WorkflowError> {
        let rows = self.repo.active_from_delegator(tenant_id, approver_id, now).await?;
        Ok(effective_approver(approver_id, flow_id, &rows, now))
    }

    pub async fn create_delegation(
        &self,
        input: NewDelegation,
    ) -> Result<Delegation, WorkflowError> {
        if input.delegator_id == input.delegatee_id {
            return Err(WorkflowError::validation("cannot delegate to oneself"));
        }
        if input.ends_at <= input.starts_at {
            return Err(WorkflowError::validation("delegation window must end after it starts"));
        }
        match (input.delegation_type, &input.flow_id) {
            (DelegationType::Flow, None) => {
                return Err(WorkflowError::validation(
                    "a flow-scoped delegation must name a flow",
                ));
            }
            (DelegationType::Global, Some(_)) => {
                return Err(WorkflowError::validation(
                    "a global delegation must not name a flow",
                ));
            }
            _ => {}
        }

        let delegatee_active = self
            .directory
            .is_active_user(&input.tenant_id, &input.delegatee_id)
            .await
            .map_err(WorkflowError::persistence)?;
        if !delegatee_active {
            return Err(WorkflowError::validation(format!(
                "delegatee {} is not an active user of the tenant",
                input.delegatee_id
            )));
        }

        let candidate = Delegation {
            id: DelegationId(Uuid::new_v4().to_string()),
            tenant_id: input.tenant_id,
            delegator_id: input.delegator_id,
            delegatee_id: input.delegatee_id,
            delegation_type: input.delegation_type,
            flow_id: input.flow_id,
            starts_at: input.starts_at,
            ends_at: input.ends_at,
            is_active: true,
            created_at: Utc::now(),
        };

        // Rows where the delegator is already someone's delegatee are the only
        // ones that can close a loop with this candidate.
        let reverse =
            self.repo.naming_delegatee(&candidate.tenant_id, &candidate.delegator_id).await?;
        if would_cycle(&candidate, &reverse) {
            return Err(WorkflowError::validation(format!(
                "delegation from {} to {} would create a resolution cycle",
                candidate.delegator_id, candidate.delegatee_id
            )));
        }

        self.repo.save(candidate.clone()).await?;

        self.audit.record(
            AuditEntry::new(
                candidate.tenant_id.clone(),
                Some(candidate.delegator_id.clone()),
                "approval_delegation",
                candidate.id.0.clone(),
                "delegation_created",
            )
            .with_new_values(json!({
                "delegatee_id": candidate.delegatee_id,
                "delegation_type": candidate.delegation_type.as_str(),
                "flow_id": candidate.flow_id.as_ref().map(|f| f.0.clone()),
                "starts_at": candidate.starts_at.to_rfc3339(),
                "ends_at": candidate.ends_at.to_rfc3339(),
            })),
        );

        Ok(candidate)
    }

    /// Deactivates a delegation. Idempotent; revoking twice is a no-op.
    pub async fn revoke_delegation(
        &self,
        tenant_id: &str,
        delegation_id: &DelegationId,
        actor_id: &str,
    ) -> Result<(), WorkflowError> {
        let mut delegation = self
            .repo
            .find_by_id(delegation_id)
            .await?
            .filter(|d| d.tenant_id == tenant_id)
            .ok_or_else(|| WorkflowError::not_found("delegation", delegation_id.0.clone()))?;

        if delegation.delegator_id != actor_id {
            return Err(WorkflowError::forbidden(
                "only the delegator may revoke a delegation",
            ));
        }

        if delegation.is_active {
            delegation.is_active = false;
            self.repo.save(delegation.clone()).await?;
            self.audit.record(AuditEntry::new(
                tenant_id.to_string(),
                Some(actor_id.to_string()),
                "approval_delegation",
                delegation.id.0.clone(),
                "delegation_revoked",
            ));
        }

        Ok(())
    }

    pub async fn list_delegations(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<Delegation>, WorkflowError> {
        Ok(self.repo.list_for_tenant(tenant_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use signoff_core::audit::InMemoryAuditRecorder;
    use signoff_core::directory::{DirectoryUser, InMemoryDirectory};
    use signoff_core::domain::delegation::DelegationType;
    use signoff_core::errors::WorkflowError;
    use signoff_db::connect_with_settings;
    use signoff_db::migrations::run_pending;

    use super::{DelegationService, NewDelegation};

    fn user(id: &str) -> DirectoryUser {
        DirectoryUser {
            user_id: id.to_string(),
            tenant_id: "t-1".to_string(),
            roles: vec![],
            is_active: true,
        }
    }

    async fn service() -> DelegationService {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrations");
        let directory =
            InMemoryDirectory::with_users(vec![user("u-a"), user("u-b"), user("u-c")]);
        DelegationService::new(
            pool,
            Arc::new(directory),
            Arc::new(InMemoryAuditRecorder::default()),
        )
    }

    fn global(delegator: &str, delegatee: &str) -> NewDelegation {
        let now = Utc::now();
        NewDelegation {
            tenant_id: "t-1".to_string(),
            delegator_id: delegator.to_string(),
            delegatee_id: delegatee.to_string(),
            delegation_type: DelegationType::Global,
            flow_id: None,
            starts_at: now - Duration::hours(1),
            ends_at: now + Duration::hours(24),
        }
    }

    #[tokio::test]
    async fn created_delegation_redirects_resolution() {
        let service = service().await;
        service.create_delegation(global("u-a", "u-b")).await.expect("create");

        let effective = service
            .effective_approver("t-1", "u-a", None, Utc::now())
            .await
            .expect("resolve");
        assert_eq!(effective, "u-b");

        // resolution is single-hop
        let unrelated = service
            .effective_approver("t-1", "u-b", None, Utc::now())
            .await
            .expect("resolve");
        assert_eq!(unrelated, "u-b");
    }

    #[tokio::test]
    async fn direct_cycle_is_rejected_at_creation() {
        let service = service().await;
        service.create_delegation(global("u-a", "u-b")).await.expect("create forward");

        let reverse = service.create_delegation(global("u-b", "u-a")).await;
        assert!(matches!(reverse, Err(WorkflowError::Validation(_))));
    }

    #[tokio::test]
    async fn unknown_delegatee_is_rejected() {
        let service = service().await;
        let result = service.create_delegation(global("u-a", "u-ghost")).await;
        assert!(matches!(result, Err(WorkflowError::Validation(_))));
    }

    #[tokio::test]
    async fn self_delegation_is_rejected() {
        let service = service().await;
        let result = service.create_delegation(global("u-a", "u-a")).await;
        assert!(matches!(result, Err(WorkflowError::Validation(_))));
    }

    #[tokio::test]
    async fn revoked_delegation_stops_resolving() {
        let service = service().await;
        let created = service.create_delegation(global("u-a", "u-b")).await.expect("create");

        let wrong_actor = service.revoke_delegation("t-1", &created.id, "u-b").await;
        assert!(matches!(wrong_actor, Err(WorkflowError::Forbidden(_))));

        service.revoke_delegation("t-1", &created.id, "u-a").await.expect("revoke");
        let effective = service
            .effective_approver("t-1", "u-a", None, Utc::now())
            .await
            .expect("resolve");
        assert_eq!(effective, "u-a");
    }
}

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("directory lookup failed: {0}")]
    Lookup(String),
}

/// Read-only seam onto the external user/role directory. Every query is
/// tenant scoped; the directory never leaks users across tenants.
#[async_trait::async_trait]
pub trait Directory: Send + Sync {
    /// Ids of active users currently holding `role` within the tenant.
    async fn users_with_role(
        &self,
        tenant_id: &str,
        role: &str,
    ) -> Result<Vec<String>, DirectoryError>;

    /// Whether the user exists, is active, and belongs to the tenant.
    async fn is_active_user(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<bool, DirectoryError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectoryUser {
    pub user_id: String,
    pub tenant_id: String,
    pub roles: Vec<String>,
    pub is_active: bool,
}

/// Static directory used in tests and small single-box deployments where the
/// approver roster is defined in configuration.
#[derive(Clone, Default)]
pub struct InMemoryDirectory {
    users: Arc<RwLock<HashMap<String, DirectoryUser>>>,
}

impl InMemoryDirectory {
    pub fn with_users(users: Vec<DirectoryUser>) -> Self {
        let map = users.into_iter().map(|user| (user.user_id.clone(), user)).collect();
        Self { users: Arc::new(RwLock::new(map)) }
    }

    pub fn upsert(&self, user: DirectoryUser) {
        let mut users = match self.users.write() {
            Ok(users) => users,
            Err(poisoned) => poisoned.into_inner(),
        };
        users.insert(user.user_id.clone(), user);
    }
}

#[async_trait::async_trait]
impl Directory for InMemoryDirectory {
    async fn users_with_role(
        &self,
        tenant_id: &str,
        role: &str,
    ) -> Result<Vec<String>, DirectoryError> {
        let users = match self.users.read() {
            Ok(users) => users,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut matched: Vec<String> = users
            .values()
            .filter(|user| {
                user.tenant_id == tenant_id
                    && user.is_active
                    && user.roles.iter().any(|r| r == role)
            })
            .map(|user| user.user_id.clone())
            .collect();
        matched.sort();
        Ok(matched)
    }

    async fn is_active_user(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<bool, DirectoryError> {
        let users = match self.users.read() {
            Ok(users) => users,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(users
            .get(user_id)
            .map(|user| user.tenant_id == tenant_id && user.is_active)
            .unwrap_or(false))
    }
}

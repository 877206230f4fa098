use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One audit record. `actor_id` is `None` for system-initiated mutations
/// (timeout sweeps, auto-approvals).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: String,
    pub tenant_id: String,
    pub actor_id: Option<String>,
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        tenant_id: impl Into<String>,
        actor_id: Option<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            entry_id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            actor_id,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            action: action.into(),
            old_values: None,
            new_values: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_old_values(mut self, values: Value) -> Self {
        self.old_values = Some(values);
        self
    }

    pub fn with_new_values(mut self, values: Value) -> Self {
        self.new_values = Some(values);
        self
    }
}

/// Best-effort audit sink. Implementations must not fail the caller; a
/// failing backend logs and drops the entry.
pub trait AuditRecorder: Send + Sync {
    fn record(&self, entry: AuditEntry);
}

#[derive(Clone, Default)]
pub struct InMemoryAuditRecorder {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl InMemoryAuditRecorder {
    pub fn entries(&self) -> Vec<AuditEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditRecorder for InMemoryAuditRecorder {
    fn record(&self, entry: AuditEntry) {
        match self.entries.lock() {
            Ok(mut entries) => entries.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}

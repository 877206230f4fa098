use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::flow::FlowId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DelegationId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DelegationType {
    Global,
    Flow,
}

impl DelegationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Flow => "flow",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "global" => Some(Self::Global),
            "flow" => Some(Self::Flow),
            _ => None,
        }
    }
}

/// A time-bounded reassignment of one user's decision authority to another,
/// either globally or for a specific flow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub id: DelegationId,
    pub tenant_id: String,
    pub delegator_id: String,
    pub delegatee_id: String,
    pub delegation_type: DelegationType,
    pub flow_id: Option<FlowId>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Delegation {
    /// Whether this delegation resolves at the given instant.
    pub fn covers(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.starts_at <= now && now <= self.ends_at
    }

    /// Whether the validity windows of two delegations overlap.
    pub fn window_overlaps(&self, other: &Delegation) -> bool {
        self.starts_at <= other.ends_at && other.starts_at <= self.ends_at
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{Delegation, DelegationId, DelegationType};

    fn delegation(offset_start_hours: i64, offset_end_hours: i64) -> Delegation {
        let now = Utc::now();
        Delegation {
            id: DelegationId("d-1".to_string()),
            tenant_id: "t-1".to_string(),
            delegator_id: "u-a".to_string(),
            delegatee_id: "u-b".to_string(),
            delegation_type: DelegationType::Global,
            flow_id: None,
            starts_at: now + Duration::hours(offset_start_hours),
            ends_at: now + Duration::hours(offset_end_hours),
            is_active: true,
            created_at: now,
        }
    }

    #[test]
    fn covers_only_inside_window() {
        let now = Utc::now();
        assert!(delegation(-1, 1).covers(now));
        assert!(!delegation(1, 2).covers(now));
        assert!(!delegation(-2, -1).covers(now));
    }

    #[test]
    fn inactive_delegation_never_covers() {
        let now = Utc::now();
        let mut d = delegation(-1, 1);
        d.is_active = false;
        assert!(!d.covers(now));
    }

    #[test]
    fn window_overlap_detection() {
        assert!(delegation(-1, 1).window_overlaps(&delegation(0, 2)));
        assert!(!delegation(-3, -2).window_overlaps(&delegation(-1, 1)));
    }
}

//! Pure delegation resolution.
//!
//! Delegation is a cross-cutting override of *who decides*: the nominal
//! approver is never mutated, only the resolved identity on the task. The
//! functions here are pure over the stored delegation rows and a caller
//! supplied instant, so they can be exercised without a database.

use chrono::{DateTime, Utc};

use crate::domain::delegation::{Delegation, DelegationType};
use crate::domain::flow::FlowId;

/// Resolves the effective approver after applying active delegations.
///
/// Precedence: an active FLOW-scoped delegation matching `flow_id` wins over
/// an active GLOBAL one; among several matches of the same scope the most
/// recently created wins. Returns `approver_id` unchanged when nothing
/// applies. Resolution is single-hop: a delegatee's own delegations are not
/// chased.
pub fn effective_approver(
    approver_id: &str,
    flow_id: Option<&FlowId>,
    delegations: &[Delegation],
    now: DateTime<Utc>,
) -> String {
    let candidates =
        delegations.iter().filter(|d| d.delegator_id == approver_id && d.covers(now));

    let flow_scoped = candidates
        .clone()
        .filter(|d| {
            d.delegation_type == DelegationType::Flow && d.flow_id.as_ref() == flow_id
        })
        .max_by_key(|d| d.created_at);
    if let Some(delegation) = flow_scoped {
        return delegation.delegatee_id.clone();
    }

    let global = candidates
        .filter(|d| d.delegation_type == DelegationType::Global)
        .max_by_key(|d| d.created_at);
    match global {
        Some(delegation) => delegation.delegatee_id.clone(),
        None => approver_id.to_string(),
    }
}

/// Whether two delegation scopes can apply to the same decision point.
fn scopes_collide(a: &Delegation, b: &Delegation) -> bool {
    match (a.delegation_type, b.delegation_type) {
        (DelegationType::Global, _) | (_, DelegationType::Global) => true,
        (DelegationType::Flow, DelegationType::Flow) => a.flow_id == b.flow_id,
    }
}

/// Detects a direct cycle: the candidate's delegatee already delegates back
/// to the candidate's delegator in an overlapping window and colliding scope.
/// Used at delegation-creation time; stored rows can then never loop the
/// single-hop resolver.
pub fn would_cycle(candidate: &Delegation, reverse_delegations: &[Delegation]) -> bool {
    reverse_delegations.iter().any(|existing| {
        existing.is_active
            && existing.delegator_id == candidate.delegatee_id
            && existing.delegatee_id == candidate.delegator_id
            && existing.window_overlaps(candidate)
            && scopes_collide(existing, candidate)
    })
}

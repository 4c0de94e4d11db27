//! Agent selection policies.
//!
//! Selection itself is pure: callers hand in a candidate snapshot (available
//! agents with derived workloads) and get back a choice. Side effects of a
//! successful pick - bumping `last_assigned_at`, appending the `assignment`
//! history event - belong to the engine's apply step, and the round-robin
//! cursor is persisted state advanced atomically by the store so that
//! concurrent engine instances cannot pick the same slot twice.

use uuid::Uuid;

use crate::models::{AssignmentMethod, Candidate};

/// Pick the least-loaded candidate.
///
/// Ties on open-complaint count are broken by the earliest
/// `last_assigned_at` (never-assigned agents sort first), then by id so the
/// choice is deterministic for a given snapshot.
pub fn select_workload(candidates: &[Candidate]) -> Option<Uuid> {
    candidates
        .iter()
        .min_by_key(|c| (c.open_complaints, c.last_assigned_at, c.id))
        .map(|c| c.id)
}

/// Pick the next candidate after `cursor` in ascending-id order, wrapping
/// around the pool. A cursor pointing at a departed agent still works: the
/// next id above it is chosen. `None` cursor starts at the first agent.
pub fn next_in_rotation(cursor: Option<Uuid>, ordered_ids: &[Uuid]) -> Option<Uuid> {
    if ordered_ids.is_empty() {
        return None;
    }
    let next = match cursor {
        Some(last) => ordered_ids.iter().find(|id| **id > last),
        None => None,
    };
    Some(*next.unwrap_or(&ordered_ids[0]))
}

/// Whether `method` ever yields an automatic pick. Manual assignment always
/// declines so the complaint waits for a human.
pub fn is_automatic(method: AssignmentMethod) -> bool {
    !matches!(method, AssignmentMethod::Manual)
}

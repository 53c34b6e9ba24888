//! Read-side projection of the measurement history.
//!
//! Sorting happens on a private snapshot, never on the shared store, so
//! readers do not contend with the runner and can never observe a
//! half-sorted history.

use crate::store::{MeasurementGroup, MeasurementStore};

/// Default number of groups exposed to presentation.
pub const DEFAULT_VIEW_LIMIT: usize = 24;

/// Return the `limit` most recent groups, newest first.
///
/// Ties on the cycle timestamp keep their original insertion order (the
/// sort is stable). Returns fewer than `limit` groups when the store holds
/// fewer. Never mutates the store.
pub fn recent(store: &MeasurementStore, limit: usize) -> Vec<MeasurementGroup> {
    let mut groups = store.snapshot();
    groups.sort_by(|a, b| b.date.cmp(&a.date));
    groups.truncate(limit);
    groups
}

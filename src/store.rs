//! In-memory measurement history.
//!
//! [`MeasurementStore`] is the single piece of shared mutable state in the
//! process. It holds the full ordered history of measurement cycles behind
//! one reader/writer lock. Writers (the runner's append, the startup load)
//! take the lock exclusively; readers take an independent copy via
//! [`MeasurementStore::snapshot`] and release the lock before doing any
//! sorting or encoding.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One target's parsed speedtest outcome.
///
/// Numeric metrics are non-negative by construction: the runner rejects
/// payloads carrying negative values before a `Measurement` is built.
/// `server` and `client` carry the probe's provenance metadata (sponsor,
/// location, ISP, ...) as opaque JSON passed through to presentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Identifier of the speedtest server this result came from.
    pub server_id: String,
    /// Timestamp reported by the probe (UTC).
    pub timestamp: DateTime<Utc>,
    /// Round-trip latency in milliseconds.
    pub ping_ms: f64,
    /// Download throughput in bits per second.
    pub download_bps: f64,
    /// Upload throughput in bits per second.
    pub upload_bps: f64,
    /// Raw bytes received during the download phase.
    pub bytes_received: u64,
    /// Raw bytes sent during the upload phase.
    pub bytes_sent: u64,
    /// Result share URL, when the probe produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_url: Option<String>,
    /// Remote server metadata, passed through untouched.
    #[serde(default)]
    pub server: serde_json::Value,
    /// Local client metadata, passed through untouched.
    #[serde(default)]
    pub client: serde_json::Value,
}

/// One completed measurement cycle across all configured targets.
///
/// Contains one [`Measurement`] per target that succeeded; failed targets
/// are simply absent. A group with zero results is degenerate but valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementGroup {
    /// Cycle start time (UTC).
    pub date: DateTime<Utc>,
    /// Results in target order, successes only.
    pub results: Vec<Measurement>,
}

impl MeasurementGroup {
    /// Create an empty group timestamped at `date`.
    pub fn new(date: DateTime<Utc>) -> Self {
        Self {
            date,
            results: Vec::new(),
        }
    }
}

/// Thread-safe, append-only store of measurement groups.
///
/// Cheap to clone; all clones share the same underlying history. Append
/// order is insertion order, and the only wholesale replacement is
/// [`MeasurementStore::replace_all`], used once at startup by the
/// persistence load.
#[derive(Debug, Clone, Default)]
pub struct MeasurementStore {
    inner: Arc<RwLock<Vec<MeasurementGroup>>>,
}

impl MeasurementStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one completed group at the end of the history.
    pub fn append(&self, group: MeasurementGroup) {
        let mut groups = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        groups.push(group);
    }

    /// Take an independent copy of the current history.
    ///
    /// The lock is released before this returns; the copy can be sorted or
    /// serialized without contending with writers.
    pub fn snapshot(&self) -> Vec<MeasurementGroup> {
        let groups = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        groups.clone()
    }

    /// Atomically discard the current content and install `groups`.
    ///
    /// Used only by the startup load; normal operation is append-only.
    pub fn replace_all(&self, groups: Vec<MeasurementGroup>) {
        let mut current = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *current = groups;
    }

    /// Number of groups currently held.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the store holds no groups.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Durable snapshot persistence.
//!
//! The full measurement history is checkpointed to a single versioned JSON
//! file. Writes go to a temporary file in the same directory, are fsynced,
//! and then atomically renamed over the committed snapshot, so a crash
//! mid-write never corrupts the previous checkpoint. A missing, corrupt or
//! mismatched snapshot at startup is a warning, not an error: the process
//! starts with an empty history.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::store::{MeasurementGroup, MeasurementStore};

/// Current snapshot file format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Default interval between periodic checkpoints (5 minutes).
pub const DEFAULT_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Errors that can occur while reading or writing the snapshot file.
#[derive(Debug, Error)]
pub enum PersistError {
    /// File I/O failure.
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode failure.
    #[error("snapshot json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Snapshot was written by an incompatible format version.
    #[error("snapshot version mismatch: found {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },
}

/// On-disk snapshot envelope.
///
/// Unknown fields are ignored on load so the format can grow without
/// breaking older snapshots.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    saved_at: DateTime<Utc>,
    groups: Vec<MeasurementGroup>,
}

/// Loads the store at startup and checkpoints it on a timer and at shutdown.
#[derive(Debug, Clone)]
pub struct Persistence {
    path: PathBuf,
    interval: Duration,
    store: MeasurementStore,
}

impl Persistence {
    /// Create a persistence manager for the snapshot at `path`.
    pub fn new(path: impl Into<PathBuf>, interval: Duration, store: MeasurementStore) -> Self {
        Self {
            path: path.into(),
            interval,
            store,
        }
    }

    /// Snapshot file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the durable snapshot into the store, if one exists.
    ///
    /// Missing file, undecodable content and version mismatches all leave
    /// the store untouched; only a warning is logged. Called once during
    /// startup, before any background task runs.
    pub async fn load(&self) {
        match self.try_load().await {
            Ok(Some(groups)) => {
                tracing::info!(
                    path = %self.path.display(),
                    groups = groups.len(),
                    "Loaded measurement history"
                );
                self.store.replace_all(groups);
            }
            Ok(None) => {
                tracing::info!(
                    path = %self.path.display(),
                    "No snapshot file, starting with empty history"
                );
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to load snapshot, starting with empty history"
                );
            }
        }
    }

    async fn try_load(&self) -> Result<Option<Vec<MeasurementGroup>>, PersistError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let snapshot: SnapshotFile = serde_json::from_slice(&bytes)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(PersistError::VersionMismatch {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        Ok(Some(snapshot.groups))
    }

    /// Write the current store content durably.
    ///
    /// Takes a store snapshot (brief lock), then serializes and writes with
    /// no lock held. The write is crash-safe: temp file in the same
    /// directory, fsync, atomic rename over the committed snapshot.
    pub async fn checkpoint(&self) -> Result<(), PersistError> {
        let groups = self.store.snapshot();
        let snapshot = SnapshotFile {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            groups,
        };
        let bytes = serde_json::to_vec(&snapshot)?;

        let tmp_path = tmp_path_for(&self.path);
        {
            use tokio::io::AsyncWriteExt;
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(&tmp_path, &self.path).await?;

        tracing::debug!(
            path = %self.path.display(),
            groups = snapshot.groups.len(),
            bytes = bytes.len(),
            "Checkpoint written"
        );
        Ok(())
    }

    /// Periodic checkpoint loop.
    ///
    /// Runs until `cancel` is triggered, then performs one final checkpoint
    /// before returning. Checkpoint failures are logged and retried on the
    /// next tick; they never terminate the loop.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            path = %self.path.display(),
            interval_secs = self.interval.as_secs(),
            "Checkpoint task started"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of tokio's interval fires immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Checkpoint task stopping, writing final snapshot");
                    if let Err(e) = self.checkpoint().await {
                        tracing::error!(error = %e, "Final checkpoint failed");
                    }
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.checkpoint().await {
                        tracing::warn!(error = %e, "Checkpoint failed, will retry next tick");
                    }
                }
            }
        }
    }
}

/// Temp file path next to the snapshot, so the rename stays on one filesystem.
fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_owned()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

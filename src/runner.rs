//! Periodic measurement runner.
//!
//! Drives one measurement cycle per interval tick: every configured server
//! id is probed in order with a bounded timeout, successes are collected
//! into one [`MeasurementGroup`], failures are logged and omitted, and the
//! group is appended to the store even when every target failed.
//!
//! The external invocation sits behind the [`Prober`] trait so tests can
//! substitute a scripted prober; production uses [`SpeedtestCli`], which
//! shells out to `speedtest-cli --json`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::store::{Measurement, MeasurementGroup, MeasurementStore};

/// Default interval between measurement cycles (60 minutes).
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default per-target probe timeout (2 minutes).
///
/// Must stay shorter than the cycle interval; config validation enforces it.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(120);

/// Default external measurement command.
pub const DEFAULT_COMMAND: &str = "speedtest-cli";

fn default_interval() -> Duration {
    DEFAULT_INTERVAL
}

fn default_probe_timeout() -> Duration {
    DEFAULT_PROBE_TIMEOUT
}

fn default_command() -> String {
    DEFAULT_COMMAND.to_string()
}

/// Errors for a single target's probe.
///
/// All variants are per-target and non-fatal: the runner logs them and
/// continues with the next target.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Failed to spawn or communicate with the external command.
    #[error("probe io error: {0}")]
    Io(#[from] std::io::Error),

    /// Probe did not complete within the configured timeout.
    #[error("probe timed out")]
    Timeout,

    /// External command terminated abnormally.
    #[error("probe exited with status {status}")]
    ExitStatus { status: std::process::ExitStatus },

    /// Output was not the expected JSON payload.
    #[error("probe output decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Decoded payload carried out-of-range metrics.
    #[error("probe reported invalid metrics: {0}")]
    InvalidMetrics(String),
}

/// Measurement runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Speedtest server ids, probed in this order each cycle.
    pub server_ids: Vec<String>,

    /// Interval between cycle starts (default: 60m).
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Per-target probe timeout (default: 2m).
    #[serde(default = "default_probe_timeout", with = "humantime_serde")]
    pub probe_timeout: Duration,

    /// External measurement command (default: "speedtest-cli").
    #[serde(default = "default_command")]
    pub command: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            server_ids: Vec::new(),
            interval: DEFAULT_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            command: DEFAULT_COMMAND.to_string(),
        }
    }
}

/// One measurement probe against a single target.
#[async_trait::async_trait]
pub trait Prober: Send + Sync + 'static {
    /// Measure `server_id`, completing within `timeout`.
    async fn probe(&self, server_id: &str, timeout: Duration) -> Result<Measurement, ProbeError>;
}

/// Wire format of `speedtest-cli --json` output.
///
/// Only the metrics we chart are typed; `server` and `client` pass through
/// as-is. Unknown top-level keys are ignored.
#[derive(Debug, Deserialize)]
struct CliReport {
    timestamp: DateTime<Utc>,
    ping: f64,
    download: f64,
    upload: f64,
    #[serde(default)]
    bytes_received: u64,
    #[serde(default)]
    bytes_sent: u64,
    #[serde(default)]
    share: Option<String>,
    #[serde(default)]
    server: serde_json::Value,
    #[serde(default)]
    client: serde_json::Value,
}

/// Decode one probe payload into a [`Measurement`].
fn parse_report(server_id: &str, payload: &[u8]) -> Result<Measurement, ProbeError> {
    let report: CliReport = serde_json::from_slice(payload)?;

    for (name, value) in [
        ("ping", report.ping),
        ("download", report.download),
        ("upload", report.upload),
    ] {
        if value < 0.0 || !value.is_finite() {
            return Err(ProbeError::InvalidMetrics(format!("{name} = {value}")));
        }
    }

    Ok(Measurement {
        server_id: server_id.to_string(),
        timestamp: report.timestamp,
        ping_ms: report.ping,
        download_bps: report.download,
        upload_bps: report.upload,
        bytes_received: report.bytes_received,
        bytes_sent: report.bytes_sent,
        share_url: report.share,
        server: report.server,
        client: report.client,
    })
}

/// Throughput figure shown in logs, in Mbps as the dashboard computes it.
fn mbps(bits_per_sec: f64) -> f64 {
    bits_per_sec / 131_072.0 / 8.0
}

/// Prober that shells out to the speedtest CLI.
#[derive(Debug, Clone)]
pub struct SpeedtestCli {
    command: String,
}

impl SpeedtestCli {
    /// Create a prober invoking `command` (e.g. "speedtest-cli").
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait::async_trait]
impl Prober for SpeedtestCli {
    async fn probe(&self, server_id: &str, timeout: Duration) -> Result<Measurement, ProbeError> {
        let output = tokio::time::timeout(
            timeout,
            tokio::process::Command::new(&self.command)
                .args(["--json", "--share", "--server", server_id])
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| ProbeError::Timeout)??;

        if !output.status.success() {
            return Err(ProbeError::ExitStatus {
                status: output.status,
            });
        }

        parse_report(server_id, &output.stdout)
    }
}

/// Periodic measurement scheduler.
///
/// Owns the prober and a store handle; appends exactly one group per cycle.
pub struct Runner<P> {
    config: RunnerConfig,
    prober: P,
    store: MeasurementStore,
}

impl<P: Prober> Runner<P> {
    /// Create a runner over the given targets, prober and store.
    pub fn new(config: RunnerConfig, prober: P, store: MeasurementStore) -> Self {
        Self {
            config,
            prober,
            store,
        }
    }

    /// Run one full measurement cycle and append its group.
    ///
    /// Targets are probed in configured order; each failure is logged and
    /// the target omitted. If `cancel` fires mid-cycle the remaining
    /// targets are skipped, but whatever was gathered is still appended.
    /// Returns the number of successful results.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> usize {
        let started = Utc::now();
        let mut group = MeasurementGroup::new(started);

        for server_id in &self.config.server_ids {
            if cancel.is_cancelled() {
                tracing::info!(server_id = %server_id, "Shutdown requested, skipping remaining targets");
                break;
            }

            tracing::info!(server_id = %server_id, "Running speedtest");
            match self
                .prober
                .probe(server_id, self.config.probe_timeout)
                .await
            {
                Ok(result) => {
                    let sponsor = result
                        .server
                        .get("sponsor")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown");
                    tracing::info!(
                        server_id = %server_id,
                        sponsor = %sponsor,
                        ping_ms = result.ping_ms,
                        download_mbps = mbps(result.download_bps),
                        upload_mbps = mbps(result.upload_bps),
                        "Speedtest complete"
                    );
                    group.results.push(result);
                }
                Err(e) => {
                    tracing::warn!(
                        server_id = %server_id,
                        error = %e,
                        "Speedtest failed, omitting target from this cycle"
                    );
                }
            }
        }

        let successes = group.results.len();
        tracing::debug!(
            date = %group.date,
            successes,
            targets = self.config.server_ids.len(),
            "Measurement cycle appended"
        );
        self.store.append(group);
        successes
    }

    /// Periodic measurement loop.
    ///
    /// The first cycle starts immediately; afterwards one cycle runs per
    /// interval tick. Cancellation is observed between waits and between
    /// targets, never mid-probe.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            targets = self.config.server_ids.len(),
            interval_secs = self.config.interval.as_secs(),
            command = %self.config.command,
            "Measurement task started"
        );

        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Measurement task stopping");
                    break;
                }
                _ = interval.tick() => {
                    self.run_cycle(&cancel).await;
                }
            }
        }
    }
}

impl Runner<SpeedtestCli> {
    /// Runner wired to the external speedtest CLI from its own config.
    pub fn from_config(config: RunnerConfig, store: MeasurementStore) -> Self {
        let prober = SpeedtestCli::new(config.command.clone());
        Self::new(config, prober, store)
    }
}

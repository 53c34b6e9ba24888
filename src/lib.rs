//! Speedwatch - periodic speedtest runner with a persistent history.
//!
//! The system measures network performance against a fixed set of speedtest
//! servers on a timer, retains the full history in memory, checkpoints it
//! durably across restarts, and exposes a bounded, sorted view over HTTP.
//!
//! # Architecture
//!
//! - **Store**: thread-safe, append-only history of measurement cycles
//! - **Runner**: periodic measurement cycles via the external speedtest CLI
//! - **Persistence**: versioned JSON snapshot with atomic checkpoint writes
//! - **View**: sorted, size-bounded read projection for presentation
//! - **Server**: thin axum read API over the view

pub mod config;
pub mod persist;
pub mod runner;
pub mod server;
pub mod store;
pub mod view;

pub use config::{AppConfig, ConfigError};
pub use persist::{PersistError, Persistence};
pub use runner::{ProbeError, Prober, Runner, RunnerConfig, SpeedtestCli};
pub use store::{Measurement, MeasurementGroup, MeasurementStore};
pub use view::{DEFAULT_VIEW_LIMIT, recent};

//! # Restic Exporter
//!
//! A Prometheus metrics exporter for restic backup repositories.
//!
//! ## Overview
//!
//! The exporter periodically runs read-only restic commands against one
//! repository and publishes, per backup source:
//!
//! - Timestamp, size and file count of the latest snapshot
//! - Number of snapshots kept for the source
//! - File and byte deltas and the duration of the last backup
//!
//! plus repository-wide check status, lock count and snapshot count.
//!
//! Backup sources are identified by a hash of hostname, username and the
//! backed up paths, so every run of the same backup job maps to one label set.
//!
//! ## Quick Start
//!
//! ```no_run
//! use restic_exporter::{
//!     aggregator::{Aggregator, AggregatorOptions},
//!     client::{ResticClient, ResticConfig},
//!     config::Settings,
//!     metrics::ExporterMetrics,
//!     scheduler::Scheduler,
//!     server::{start_server, AppState},
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (settings, _notices) = Settings::load(None)?;
//!
//!     let client = ResticClient::new(ResticConfig::from_settings(&settings));
//!     let aggregator = Aggregator::new(Arc::new(client), AggregatorOptions::from_settings(&settings)?);
//!     let metrics = Arc::new(ExporterMetrics::new()?);
//!
//!     let scheduler =
//!         Scheduler::start(aggregator, metrics.clone(), settings.refresh_every(), false).await?;
//!
//!     tokio::spawn(scheduler.run());
//!     start_server(&settings.socket_address(), AppState::new(metrics)).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! The exporter is configured through environment variables
//! (`RESTIC_REPOSITORY`, `RESTIC_PASSWORD_FILE`, `REFRESH_INTERVAL`, ...)
//! and optionally a configuration file. See [`config::Settings`] for details.
//!
//! ## Modules
//!
//! - [`aggregator`] - Turns snapshot listings into per-client records
//! - [`cache`] - Per-snapshot stats memoization
//! - [`client`] - restic command-line client
//! - [`config`] - Configuration management
//! - [`error`] - Error types and handling
//! - [`identity`] - Backup source identity hashing
//! - [`metrics`] - Metric projection, collector and exposition
//! - [`scheduler`] - Periodic refresh loop
//! - [`server`] - HTTP server for exposing metrics
//! - [`state`] - Atomically published metrics snapshot

pub mod aggregator;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod scheduler;
pub mod server;
pub mod state;

pub use error::{ExporterError, Result};

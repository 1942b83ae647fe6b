//! Periodic refresh of the published metrics.

use crate::aggregator::Aggregator;
use crate::error::Result;
use crate::metrics::ExporterMetrics;
use crate::state::SharedSnapshot;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Drives [`Aggregator::refresh`] on a fixed interval.
///
/// Refreshes run one after another from a single task, so a refresh never
/// overlaps with itself.
pub struct Scheduler {
    aggregator: Aggregator,
    state: SharedSnapshot,
    metrics: Arc<ExporterMetrics>,
    interval: Duration,
    exit_on_error: bool,
}

impl Scheduler {
    /// Run the initial refresh and expose its result through `metrics`.
    ///
    /// Failing here is fatal: there is nothing to serve yet.
    pub async fn start(
        mut aggregator: Aggregator,
        metrics: Arc<ExporterMetrics>,
        interval: Duration,
        exit_on_error: bool,
    ) -> Result<Self> {
        let snapshot = aggregator.refresh().await.inspect_err(|e| {
            error!("Unable to collect metrics from restic. {}", e);
        })?;

        let state = SharedSnapshot::new(snapshot);
        metrics.register_snapshot(state.clone())?;
        metrics.record_success(now_seconds());

        Ok(Self {
            aggregator,
            state,
            metrics,
            interval,
            exit_on_error,
        })
    }

    /// Handle to the published snapshot.
    pub fn snapshot(&self) -> SharedSnapshot {
        self.state.clone()
    }

    /// Refresh once and publish the result.
    ///
    /// On failure the previous snapshot stays published; the error is only
    /// returned when the exporter is configured to exit on error.
    pub async fn refresh_once(&mut self) -> Result<()> {
        match self.aggregator.refresh().await {
            Ok(snapshot) => {
                self.state.publish(snapshot);
                self.metrics.record_success(now_seconds());
                Ok(())
            }
            Err(e) => {
                error!("Unable to collect metrics from restic. {}", e);
                self.metrics.record_failure();
                if self.exit_on_error {
                    Err(e)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Refresh forever. Returns only when a refresh fails with exit-on-error set.
    pub async fn run(mut self) -> Result<()> {
        loop {
            info!(
                "Refreshing stats every {} seconds",
                self.interval.as_secs()
            );
            tokio::time::sleep(self.interval).await;
            self.refresh_once().await?;
        }
    }
}

fn now_seconds() -> f64 {
    chrono::Utc::now().timestamp() as f64
}

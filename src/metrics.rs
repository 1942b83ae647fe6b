//! Prometheus metrics definitions and exposition.
//!
//! Repository metrics are built from the published [`MetricsSnapshot`] on
//! every scrape by [`SnapshotCollector`], which is registered next to the
//! exporter's own health metrics in a single [`Registry`]. Values are copied
//! into the metric families as they are, so counters keep the `-1`
//! "not collected" value.

use crate::aggregator::{ClientRecord, MetricsSnapshot};
use crate::error::{ExporterError, Result};
use crate::state::SharedSnapshot;
use prometheus::core::{Collector, Desc};
use prometheus::proto::{self, LabelPair, MetricType};
use prometheus::{Encoder, Gauge, IntCounter, Opts, Registry, TextEncoder};
use std::collections::HashMap;

/// Label names shared by every per-client sample.
pub const CLIENT_LABELS: [&str; 7] = [
    "client_hostname",
    "client_username",
    "client_version",
    "snapshot_hash",
    "snapshot_tag",
    "snapshot_tags",
    "snapshot_paths",
];

struct RepositoryMetric {
    name: &'static str,
    help: &'static str,
    kind: MetricType,
    value: fn(&MetricsSnapshot) -> f64,
}

static REPOSITORY_METRICS: [RepositoryMetric; 4] = [
    RepositoryMetric {
        name: "restic_check_success",
        help: "Result of restic check operation in the repository",
        kind: MetricType::GAUGE,
        value: |s: &MetricsSnapshot| s.check_status.value(),
    },
    RepositoryMetric {
        name: "restic_locks_total",
        help: "Total number of locks in the repository",
        kind: MetricType::GAUGE,
        value: |s: &MetricsSnapshot| s.locks_total as f64,
    },
    RepositoryMetric {
        name: "restic_snapshots_total",
        help: "Total number of snapshots in the repository",
        kind: MetricType::COUNTER,
        value: |s: &MetricsSnapshot| s.total_snapshot_count as f64,
    },
    RepositoryMetric {
        name: "restic_scrape_duration_seconds",
        help: "Amount of time each scrape takes",
        kind: MetricType::GAUGE,
        value: |s: &MetricsSnapshot| s.scrape_duration.as_secs_f64(),
    },
];

struct ClientMetric {
    name: &'static str,
    help: &'static str,
    kind: MetricType,
    value: fn(&ClientRecord) -> f64,
}

static CLIENT_METRICS: [ClientMetric; 11] = [
    ClientMetric {
        name: "restic_backup_timestamp",
        help: "Timestamp of the last backup",
        kind: MetricType::GAUGE,
        value: |c: &ClientRecord| c.timestamp,
    },
    ClientMetric {
        name: "restic_backup_files_total",
        help: "Number of files in the backup",
        kind: MetricType::COUNTER,
        value: |c: &ClientRecord| c.files_total as f64,
    },
    ClientMetric {
        name: "restic_backup_size_total",
        help: "Total size of backup in bytes",
        kind: MetricType::COUNTER,
        value: |c: &ClientRecord| c.size_total as f64,
    },
    ClientMetric {
        name: "restic_backup_snapshots_total",
        help: "Total number of snapshots",
        kind: MetricType::COUNTER,
        value: |c: &ClientRecord| c.snapshots_total as f64,
    },
    ClientMetric {
        name: "restic_backup_duration_seconds",
        help: "Amount of time each backup takes",
        kind: MetricType::GAUGE,
        value: |c: &ClientRecord| c.duration_seconds,
    },
    ClientMetric {
        name: "restic_backup_files_new",
        help: "Number of new files in the backup",
        kind: MetricType::GAUGE,
        value: |c: &ClientRecord| c.files_new as f64,
    },
    ClientMetric {
        name: "restic_backup_files_changed",
        help: "Number of changed files in the backup",
        kind: MetricType::GAUGE,
        value: |c: &ClientRecord| c.files_changed as f64,
    },
    ClientMetric {
        name: "restic_backup_files_unmodified",
        help: "Number of unmodified files in the backup",
        kind: MetricType::GAUGE,
        value: |c: &ClientRecord| c.files_unmodified as f64,
    },
    ClientMetric {
        name: "restic_backup_files_processed",
        help: "Number of files processed in the last backup",
        kind: MetricType::GAUGE,
        value: |c: &ClientRecord| c.files_processed as f64,
    },
    ClientMetric {
        name: "restic_backup_bytes_processed",
        help: "Number of bytes processed in the last backup",
        kind: MetricType::GAUGE,
        value: |c: &ClientRecord| c.bytes_processed as f64,
    },
    ClientMetric {
        name: "restic_backup_bytes_added",
        help: "Number of bytes added in the last backup",
        kind: MetricType::GAUGE,
        value: |c: &ClientRecord| c.bytes_added as f64,
    },
];

fn client_labels(client: &ClientRecord) -> Vec<LabelPair> {
    let values = [
        client.hostname.as_str(),
        client.username.as_str(),
        client.version.as_str(),
        client.identity.as_str(),
        client.first_tag.as_str(),
        client.all_tags.as_str(),
        client.paths.as_str(),
    ];

    CLIENT_LABELS
        .iter()
        .zip(values)
        .map(|(name, value)| {
            let mut label = LabelPair::default();
            label.set_name(name.to_string());
            label.set_value(value.to_string());
            label
        })
        .collect()
}

fn sample(kind: MetricType, labels: Vec<LabelPair>, value: f64) -> proto::Metric {
    let mut metric = proto::Metric::from_label(labels);
    if kind == MetricType::COUNTER {
        let mut counter = proto::Counter::default();
        counter.set_value(value);
        metric.set_counter(counter);
    } else {
        let mut gauge = proto::Gauge::default();
        gauge.set_value(value);
        metric.set_gauge(gauge);
    }
    metric
}

fn family(
    name: &str,
    help: &str,
    kind: MetricType,
    metrics: Vec<proto::Metric>,
) -> proto::MetricFamily {
    let mut family = proto::MetricFamily::default();
    family.set_name(name.to_string());
    family.set_help(help.to_string());
    family.set_field_type(kind);
    family.set_metric(metrics);
    family
}

/// Map a metrics snapshot to metric families. Pure; called on every scrape.
///
/// Per-client families have one sample per client and are empty when the
/// repository has no snapshots.
pub fn project(snapshot: &MetricsSnapshot) -> Vec<proto::MetricFamily> {
    let mut families: Vec<_> = REPOSITORY_METRICS
        .iter()
        .map(|metric| {
            let value = (metric.value)(snapshot);
            family(
                metric.name,
                metric.help,
                metric.kind,
                vec![sample(metric.kind, Vec::new(), value)],
            )
        })
        .collect();

    let labels: Vec<_> = snapshot.clients.iter().map(client_labels).collect();
    for metric in &CLIENT_METRICS {
        let samples = snapshot
            .clients
            .iter()
            .zip(&labels)
            .map(|(client, labels)| sample(metric.kind, labels.clone(), (metric.value)(client)))
            .collect();
        families.push(family(metric.name, metric.help, metric.kind, samples));
    }

    families
}

/// Collector exposing whichever snapshot is currently published.
pub struct SnapshotCollector {
    snapshot: SharedSnapshot,
    descs: Vec<Desc>,
}

impl SnapshotCollector {
    pub fn new(snapshot: SharedSnapshot) -> Result<Self> {
        let client_labels: Vec<String> = CLIENT_LABELS.iter().map(|l| l.to_string()).collect();

        let repository = REPOSITORY_METRICS
            .iter()
            .map(|m| (m.name, m.help, Vec::new()));
        let clients = CLIENT_METRICS
            .iter()
            .map(|m| (m.name, m.help, client_labels.clone()));

        let descs = repository
            .chain(clients)
            .map(|(name, help, labels)| {
                Desc::new(name.to_string(), help.to_string(), labels, HashMap::new())
                    .map_err(|e| ExporterError::Metrics(e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { snapshot, descs })
    }
}

impl Collector for SnapshotCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<proto::MetricFamily> {
        // One load per scrape, so all families come from the same refresh.
        project(&self.snapshot.load())
    }
}

/// Registry holding the exporter's health metrics and, once the first
/// refresh succeeded, the repository metrics.
#[derive(Clone)]
pub struct ExporterMetrics {
    registry: Registry,
    up: Gauge,
    refresh_failures: IntCounter,
    last_refresh_timestamp: Gauge,
}

impl ExporterMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let up = Gauge::with_opts(Opts::new(
            "restic_exporter_up",
            "Whether the last refresh of restic data was successful (1 = success, 0 = failure)",
        ))
        .map_err(|e| ExporterError::Metrics(e.to_string()))?;
        registry
            .register(Box::new(up.clone()))
            .map_err(|e| ExporterError::Metrics(e.to_string()))?;

        let refresh_failures = IntCounter::with_opts(Opts::new(
            "restic_exporter_refresh_failures_total",
            "Number of refreshes that failed since the exporter started",
        ))
        .map_err(|e| ExporterError::Metrics(e.to_string()))?;
        registry
            .register(Box::new(refresh_failures.clone()))
            .map_err(|e| ExporterError::Metrics(e.to_string()))?;

        let last_refresh_timestamp = Gauge::with_opts(Opts::new(
            "restic_exporter_last_refresh_timestamp_seconds",
            "Unix timestamp of the last successful refresh",
        ))
        .map_err(|e| ExporterError::Metrics(e.to_string()))?;
        registry
            .register(Box::new(last_refresh_timestamp.clone()))
            .map_err(|e| ExporterError::Metrics(e.to_string()))?;

        #[cfg(target_os = "linux")]
        registry
            .register(Box::new(
                prometheus::process_collector::ProcessCollector::for_self(),
            ))
            .map_err(|e| ExporterError::Metrics(e.to_string()))?;

        Ok(Self {
            registry,
            up,
            refresh_failures,
            last_refresh_timestamp,
        })
    }

    /// Expose the repository metrics of `snapshot` on every scrape.
    pub fn register_snapshot(&self, snapshot: SharedSnapshot) -> Result<()> {
        self.registry
            .register(Box::new(SnapshotCollector::new(snapshot)?))
            .map_err(|e| ExporterError::Metrics(e.to_string()))
    }

    pub fn record_success(&self, timestamp: f64) {
        self.up.set(1.0);
        self.last_refresh_timestamp.set(timestamp);
    }

    pub fn record_failure(&self) {
        self.up.set(0.0);
        self.refresh_failures.inc();
    }

    /// Encode metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::with_capacity(8192);
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| ExporterError::Metrics(e.to_string()))?;

        String::from_utf8(buffer).map_err(|e| ExporterError::Metrics(e.to_string()))
    }
}

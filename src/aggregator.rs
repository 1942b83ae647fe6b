//! Repository-wide aggregation of snapshot data into per-client records.
//!
//! One [`Aggregator::refresh`] runs the restic queries, groups snapshots by
//! [`Identity`], keeps the newest snapshot of every identity and produces a
//! complete [`MetricsSnapshot`]. Nothing is carried over between refreshes
//! except the stats cache.

use crate::cache::StatsCache;
use crate::client::{RawSnapshot, Repository, SnapshotSummary, StatsResult};
use crate::config::{Settings, DEFAULT_LOCK_ID_PATTERN};
use crate::error::{ExporterError, Result};
use crate::identity::Identity;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Outcome of the repository check as exposed in `restic_check_success`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Failed,
    Passed,
    /// Check disabled by configuration
    Skipped,
}

impl CheckStatus {
    pub fn value(self) -> f64 {
        match self {
            CheckStatus::Failed => 0.0,
            CheckStatus::Passed => 1.0,
            CheckStatus::Skipped => 2.0,
        }
    }
}

/// Latest state of one backup source.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientRecord {
    pub identity: Identity,
    pub hostname: String,
    pub username: String,
    pub version: String,
    pub first_tag: String,
    pub all_tags: String,
    /// Comma-joined paths, empty unless paths are included
    pub paths: String,
    /// Creation time of the latest snapshot, seconds since the epoch
    pub timestamp: f64,
    pub size_total: i64,
    pub files_total: i64,
    pub files_new: u64,
    pub files_changed: u64,
    pub files_unmodified: u64,
    pub files_processed: u64,
    pub bytes_processed: u64,
    pub bytes_added: u64,
    pub snapshots_total: u64,
    pub duration_seconds: f64,
}

/// Everything a scrape exposes, produced by one refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub check_status: CheckStatus,
    pub locks_total: u64,
    pub total_snapshot_count: u64,
    pub clients: Vec<ClientRecord>,
    pub scrape_duration: Duration,
}

/// Feature switches of the aggregator.
#[derive(Debug, Clone)]
pub struct AggregatorOptions {
    pub disable_check: bool,
    pub disable_stats: bool,
    pub disable_locks: bool,
    pub include_paths: bool,
    pub lock_pattern: Regex,
}

impl AggregatorOptions {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self {
            disable_check: settings.no_check,
            disable_stats: settings.no_stats,
            disable_locks: settings.no_locks,
            include_paths: settings.include_paths,
            lock_pattern: settings.lock_pattern()?,
        })
    }
}

static DEFAULT_LOCK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(DEFAULT_LOCK_ID_PATTERN).expect("DEFAULT_LOCK_ID_PATTERN is a valid regex")
});

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            disable_check: false,
            disable_stats: false,
            disable_locks: false,
            include_paths: false,
            lock_pattern: DEFAULT_LOCK_PATTERN.clone(),
        }
    }
}

/// Newest snapshot of an identity with its parsed creation time.
#[derive(Debug, Clone)]
pub struct LatestSnapshot {
    pub identity: Identity,
    pub time: DateTime<FixedOffset>,
    pub snapshot: RawSnapshot,
}

pub struct Aggregator {
    repository: Arc<dyn Repository>,
    options: AggregatorOptions,
    stats_cache: StatsCache,
}

impl Aggregator {
    pub fn new(repository: Arc<dyn Repository>, options: AggregatorOptions) -> Self {
        Self {
            repository,
            options,
            stats_cache: StatsCache::new(),
        }
    }

    pub fn stats_cache(&self) -> &StatsCache {
        &self.stats_cache
    }

    /// Query the repository and build a fresh metrics snapshot.
    ///
    /// Failing to list snapshots, compute stats or list locks aborts the
    /// refresh. A failing check is reported as [`CheckStatus::Failed`].
    pub async fn refresh(&mut self) -> Result<MetricsSnapshot> {
        let started = Instant::now();

        let all_snapshots = self.repository.list_snapshots(false).await?;
        let counts = count_by_identity(&all_snapshots);
        debug!(
            "Found {} snapshots from {} sources",
            all_snapshots.len(),
            counts.len()
        );

        let latest = latest_per_identity(self.repository.list_snapshots(true).await?)?;

        let mut clients = Vec::with_capacity(latest.len());
        for entry in &latest {
            let stats = if self.options.disable_stats {
                StatsResult::NOT_COLLECTED
            } else {
                self.stats_cache
                    .get_stats(self.repository.as_ref(), &entry.snapshot.id)
                    .await?
            };
            let snapshots_total = counts.get(&entry.identity).copied().unwrap_or(0);
            clients.push(client_record(
                entry,
                stats,
                snapshots_total,
                self.options.include_paths,
            ));
        }

        let check_status = self.check_status().await;
        let locks_total = self.locks_total().await?;

        let snapshot = MetricsSnapshot {
            check_status,
            locks_total,
            total_snapshot_count: all_snapshots.len() as u64,
            clients,
            scrape_duration: started.elapsed(),
        };

        info!(
            "Collected metrics for {} clients in {:.2}s",
            snapshot.clients.len(),
            snapshot.scrape_duration.as_secs_f64()
        );
        Ok(snapshot)
    }

    async fn check_status(&self) -> CheckStatus {
        if self.options.disable_check {
            return CheckStatus::Skipped;
        }

        match self.repository.check_repository().await {
            Ok(true) => CheckStatus::Passed,
            Ok(false) => CheckStatus::Failed,
            Err(e) => {
                warn!("Error checking the repository health. {}", e);
                CheckStatus::Failed
            }
        }
    }

    async fn locks_total(&self) -> Result<u64> {
        if self.options.disable_locks {
            return Ok(0);
        }

        let listing = self.repository.list_locks().await?;
        Ok(count_locks(&listing, &self.options.lock_pattern))
    }
}

/// Number of snapshots per identity.
pub fn count_by_identity(snapshots: &[RawSnapshot]) -> HashMap<Identity, u64> {
    let mut counts = HashMap::new();
    for snapshot in snapshots {
        *counts.entry(snapshot.identity()).or_insert(0) += 1;
    }
    counts
}

/// Reduce to the newest snapshot of every identity.
///
/// On equal creation times the snapshot seen first wins. The result keeps
/// first-seen order of identities.
pub fn latest_per_identity(snapshots: Vec<RawSnapshot>) -> Result<Vec<LatestSnapshot>> {
    let mut latest: Vec<LatestSnapshot> = Vec::new();
    let mut index: HashMap<Identity, usize> = HashMap::new();

    for snapshot in snapshots {
        let time = parse_timestamp(&snapshot.creation_time).ok_or_else(|| {
            ExporterError::ParseError(format!(
                "Invalid time {:?} on snapshot {}",
                snapshot.creation_time, snapshot.id
            ))
        })?;
        let identity = snapshot.identity();

        match index.get(&identity) {
            Some(&i) => {
                if time > latest[i].time {
                    latest[i] = LatestSnapshot {
                        identity,
                        time,
                        snapshot,
                    };
                }
            }
            None => {
                index.insert(identity.clone(), latest.len());
                latest.push(LatestSnapshot {
                    identity,
                    time,
                    snapshot,
                });
            }
        }
    }

    Ok(latest)
}

fn client_record(
    entry: &LatestSnapshot,
    stats: StatsResult,
    snapshots_total: u64,
    include_paths: bool,
) -> ClientRecord {
    let snapshot = &entry.snapshot;
    let summary = snapshot.summary.clone().unwrap_or_default();

    ClientRecord {
        identity: entry.identity.clone(),
        hostname: snapshot.hostname.clone(),
        username: snapshot.username.clone(),
        version: snapshot.program_version.clone().unwrap_or_default(),
        first_tag: snapshot.tags.first().cloned().unwrap_or_default(),
        all_tags: snapshot.tags.join(","),
        paths: if include_paths {
            snapshot.paths.join(",")
        } else {
            String::new()
        },
        timestamp: entry.time.timestamp() as f64,
        size_total: stats.total_size,
        files_total: stats.total_file_count,
        files_new: summary.files_new,
        files_changed: summary.files_changed,
        files_unmodified: summary.files_unmodified,
        files_processed: summary.total_files_processed,
        bytes_processed: summary.total_bytes_processed,
        bytes_added: summary.data_added,
        snapshots_total,
        duration_seconds: backup_duration(snapshot.summary.as_ref()),
    }
}

/// Seconds between `backup_start` and `backup_end`, 0.0 when unknown.
pub fn backup_duration(summary: Option<&SnapshotSummary>) -> f64 {
    let Some(summary) = summary else {
        return 0.0;
    };
    let (Some(start), Some(end)) = (
        summary.backup_start.as_deref().filter(|s| !s.is_empty()),
        summary.backup_end.as_deref().filter(|s| !s.is_empty()),
    ) else {
        return 0.0;
    };

    match (parse_timestamp(start), parse_timestamp(end)) {
        (Some(start), Some(end)) => {
            let elapsed = end - start;
            elapsed
                .num_microseconds()
                .map(|us| us as f64 / 1_000_000.0)
                .unwrap_or_else(|| elapsed.num_seconds() as f64)
        }
        _ => {
            warn!(
                "Could not parse backup_start {:?} or backup_end {:?}",
                start, end
            );
            0.0
        }
    }
}

/// Parse an ISO-8601 timestamp. Values without an offset are taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Some(time);
    }

    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Some(FixedOffset::east_opt(0)?.from_utc_datetime(&naive))
}

/// Count the lines of a lock listing that look like lock ids.
pub fn count_locks(listing: &str, pattern: &Regex) -> u64 {
    listing.lines().filter(|line| pattern.is_match(line)).count() as u64
}

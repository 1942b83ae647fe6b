//! In-memory repository used by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use restic_exporter::client::{RawSnapshot, Repository, SnapshotSummary, StatsResult};
use restic_exporter::error::{ExporterError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Repository whose answers are set up by the test.
#[derive(Default)]
pub struct FakeRepository {
    pub snapshots: Mutex<Vec<RawSnapshot>>,
    /// Answer to `--latest 1`; falls back to `snapshots` when unset
    pub latest: Mutex<Option<Vec<RawSnapshot>>>,
    pub stats: Mutex<HashMap<String, StatsResult>>,
    pub check_result: Mutex<Option<bool>>,
    pub locks: Mutex<String>,
    pub fail_snapshots: AtomicBool,
    pub fail_locks: AtomicBool,
    pub snapshot_calls: AtomicUsize,
    pub stats_calls: AtomicUsize,
    pub check_calls: AtomicUsize,
    pub lock_calls: AtomicUsize,
}

impl FakeRepository {
    pub fn with_snapshots(snapshots: Vec<RawSnapshot>) -> Self {
        let repo = Self::default();
        *repo.snapshots.lock().unwrap() = snapshots;
        *repo.check_result.lock().unwrap() = Some(true);
        repo
    }

    pub fn set_latest(&self, latest: Vec<RawSnapshot>) {
        *self.latest.lock().unwrap() = Some(latest);
    }

    pub fn set_stats(&self, id: &str, total_size: i64, total_file_count: i64) {
        self.stats.lock().unwrap().insert(
            id.to_string(),
            StatsResult {
                total_size,
                total_file_count,
            },
        );
    }

    pub fn set_locks(&self, listing: &str) {
        *self.locks.lock().unwrap() = listing.to_string();
    }

    fn failure(command: &str) -> ExporterError {
        ExporterError::Command {
            command: command.to_string(),
            stderr: "Fatal: unable to open repository".to_string(),
            code: 1,
        }
    }
}

#[async_trait]
impl Repository for FakeRepository {
    async fn list_snapshots(&self, latest_only: bool) -> Result<Vec<RawSnapshot>> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_snapshots.load(Ordering::SeqCst) {
            return Err(Self::failure("snapshots"));
        }
        if latest_only {
            if let Some(latest) = self.latest.lock().unwrap().clone() {
                return Ok(latest);
            }
        }
        Ok(self.snapshots.lock().unwrap().clone())
    }

    async fn compute_stats(&self, snapshot_id: Option<&str>) -> Result<StatsResult> {
        self.stats_calls.fetch_add(1, Ordering::SeqCst);
        let id = snapshot_id.unwrap_or_default();
        self.stats
            .lock()
            .unwrap()
            .get(id)
            .copied()
            .ok_or_else(|| Self::failure("stats"))
    }

    async fn check_repository(&self) -> Result<bool> {
        self.check_calls.fetch_add(1, Ordering::SeqCst);
        self.check_result
            .lock()
            .unwrap()
            .ok_or_else(|| Self::failure("check"))
    }

    async fn list_locks(&self) -> Result<String> {
        self.lock_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_locks.load(Ordering::SeqCst) {
            return Err(Self::failure("list locks"));
        }
        Ok(self.locks.lock().unwrap().clone())
    }
}

pub fn snapshot(id: &str, time: &str, hostname: &str, paths: &[&str]) -> RawSnapshot {
    RawSnapshot {
        id: id.to_string(),
        creation_time: time.to_string(),
        hostname: hostname.to_string(),
        username: "backup".to_string(),
        paths: paths.iter().map(|p| p.to_string()).collect(),
        tags: Vec::new(),
        program_version: Some("restic 0.17.0".to_string()),
        summary: None,
    }
}

pub fn with_summary(mut snap: RawSnapshot, start: &str, end: &str, files_new: u64) -> RawSnapshot {
    snap.summary = Some(SnapshotSummary {
        backup_start: Some(start.to_string()),
        backup_end: Some(end.to_string()),
        files_new,
        files_changed: 2,
        files_unmodified: 50,
        total_files_processed: 52 + files_new,
        total_bytes_processed: 1_048_576,
        data_added: 4096,
    });
    snap
}

//! Memoized per-snapshot statistics.
//!
//! `restic stats` takes seconds per snapshot, while the result for a given
//! snapshot id never changes. Entries are kept for the lifetime of the
//! process; there is no eviction, so the map grows by one entry per new
//! snapshot that becomes the latest of its identity.

use crate::client::{Repository, StatsResult};
use crate::error::Result;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Default)]
pub struct StatsCache {
    entries: HashMap<String, StatsResult>,
}

impl StatsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stats for `snapshot_id`, querying the repository only on a miss.
    pub async fn get_stats(
        &mut self,
        repository: &dyn Repository,
        snapshot_id: &str,
    ) -> Result<StatsResult> {
        if let Some(stats) = self.entries.get(snapshot_id) {
            debug!("Stats cache hit for snapshot {}", snapshot_id);
            return Ok(*stats);
        }

        let stats = repository.compute_stats(Some(snapshot_id)).await?;
        if stats.is_collected() {
            self.entries.insert(snapshot_id.to_string(), stats);
        }
        Ok(stats)
    }

    pub fn contains(&self, snapshot_id: &str) -> bool {
        self.entries.contains_key(snapshot_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

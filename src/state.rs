//! Process-wide published metrics.
//!
//! The refresh loop replaces the whole [`MetricsSnapshot`] at once; scrapes
//! load whichever complete snapshot is current. A reader never observes a
//! mix of two refreshes.

use crate::aggregator::MetricsSnapshot;
use arc_swap::ArcSwap;
use std::sync::Arc;

#[derive(Clone)]
pub struct SharedSnapshot {
    inner: Arc<ArcSwap<MetricsSnapshot>>,
}

impl SharedSnapshot {
    pub fn new(initial: MetricsSnapshot) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(initial)),
        }
    }

    /// Current snapshot. Stays valid even if a newer one is published meanwhile.
    pub fn load(&self) -> Arc<MetricsSnapshot> {
        self.inner.load_full()
    }

    pub fn publish(&self, snapshot: MetricsSnapshot) {
        self.inner.store(Arc::new(snapshot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{CheckStatus, ClientRecord};
    use crate::identity::Identity;
    use std::time::Duration;

    fn snapshot_with(clients: usize) -> MetricsSnapshot {
        let clients = (0..clients)
            .map(|i| ClientRecord {
                identity: Identity::derive(&format!("host-{}", i), "", &[]),
                hostname: format!("host-{}", i),
                username: String::new(),
                version: String::new(),
                first_tag: String::new(),
                all_tags: String::new(),
                paths: String::new(),
                timestamp: 0.0,
                size_total: 0,
                files_total: 0,
                files_new: 0,
                files_changed: 0,
                files_unmodified: 0,
                files_processed: 0,
                bytes_processed: 0,
                bytes_added: 0,
                snapshots_total: 1,
                duration_seconds: 0.0,
            })
            .collect::<Vec<_>>();

        MetricsSnapshot {
            check_status: CheckStatus::Passed,
            locks_total: clients.len() as u64,
            total_snapshot_count: clients.len() as u64,
            clients,
            scrape_duration: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_loaded_snapshot_survives_publish() {
        let shared = SharedSnapshot::new(snapshot_with(1));
        let before = shared.load();

        shared.publish(snapshot_with(3));

        assert_eq!(before.clients.len(), 1);
        assert_eq!(shared.load().clients.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_readers_never_see_partial_snapshots() {
        let shared = SharedSnapshot::new(snapshot_with(0));

        let writer = {
            let shared = shared.clone();
            tokio::spawn(async move {
                for n in 1..200 {
                    shared.publish(snapshot_with(n % 17));
                    tokio::task::yield_now().await;
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let shared = shared.clone();
                tokio::spawn(async move {
                    for _ in 0..500 {
                        let current = shared.load();
                        assert_eq!(current.total_snapshot_count, current.clients.len() as u64);
                        assert_eq!(current.locks_total, current.clients.len() as u64);
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
    }
}

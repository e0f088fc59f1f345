//! Test database fixtures

#![allow(dead_code)]

use bamboo_tasks::task_store::{CheckpointStore, Crawl, CrawlState, CrawlStore, SqliteTaskStore};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// A task store in a temporary directory, removed on drop.
pub struct TestEnv {
    pub store: SqliteTaskStore,
    _temp_dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = SqliteTaskStore::new(temp_dir.path().join("tasks.db"))
            .expect("Failed to open task store");
        Self {
            store,
            _temp_dir: temp_dir,
        }
    }

    /// Archived crawl holding `count` warcs. Returns the warc ids.
    pub fn archived_warcs(&self, count: usize) -> Vec<i64> {
        let crawl_id = self
            .store
            .create_crawl("seed-crawl", CrawlState::Archived)
            .expect("Failed to create crawl");
        (0..count)
            .map(|i| {
                self.store
                    .add_warc(crawl_id, &format!("seed-{:05}.warc.gz", i))
                    .expect("Failed to add warc")
            })
            .collect()
    }

    pub fn pending_crawls(&self) -> Vec<Crawl> {
        self.store
            .find_crawls_by_state(CrawlState::Importing)
            .expect("Failed to query crawls")
    }

    pub fn state_of(&self, crawl_id: i64) -> CrawlState {
        self.store
            .get_crawl(crawl_id)
            .expect("Failed to get crawl")
            .expect("Crawl not found")
            .state
    }

    pub fn checkpoint(&self, partition_key: u32) -> Option<i64> {
        self.store
            .get_checkpoint(partition_key)
            .expect("Failed to read checkpoint")
    }

    pub fn ledger_ids(&self) -> Vec<i64> {
        self.store
            .list_failures()
            .expect("Failed to list failures")
            .iter()
            .map(|r| r.record_id)
            .collect()
    }
}

/// Polls `condition` until it holds or `timeout` passes. Returns whether it held.
pub async fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

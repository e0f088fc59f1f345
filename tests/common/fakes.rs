//! Hand-written collaborators standing in for the external import and
//! indexing programs.

#![allow(dead_code)]

use super::constants::WARCS_PER_CRAWL;
use bamboo_tasks::importer::ImportExecutor;
use bamboo_tasks::indexer::RecordIndexer;
use bamboo_tasks::task_store::{CrawlState, CrawlStore, SqliteTaskStore};
use std::collections::HashSet;
use std::sync::Mutex;

/// Imports a crawl by writing its warcs to the store, then archiving it.
pub struct WarcWritingExecutor {
    store: SqliteTaskStore,
    failing: Mutex<HashSet<i64>>,
    imported: Mutex<Vec<i64>>,
}

impl WarcWritingExecutor {
    pub fn new(store: SqliteTaskStore) -> Self {
        Self {
            store,
            failing: Mutex::new(HashSet::new()),
            imported: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_crawl(&self, crawl_id: i64) {
        self.failing.lock().unwrap().insert(crawl_id);
    }

    pub fn imported(&self) -> Vec<i64> {
        self.imported.lock().unwrap().clone()
    }
}

impl ImportExecutor for WarcWritingExecutor {
    fn import(&self, crawl_id: i64) -> anyhow::Result<()> {
        if self.failing.lock().unwrap().contains(&crawl_id) {
            anyhow::bail!("crawl {} has no readable warcs", crawl_id);
        }
        for i in 0..WARCS_PER_CRAWL {
            self.store
                .add_warc(crawl_id, &format!("crawl-{}-{:05}.warc.gz", crawl_id, i))?;
        }
        self.store.set_crawl_state(crawl_id, CrawlState::Archived)?;
        self.imported.lock().unwrap().push(crawl_id);
        Ok(())
    }
}

/// Imports a crawl whose warcs are already staged by archiving it.
pub struct ArchivingExecutor {
    store: SqliteTaskStore,
    imported: Mutex<Vec<i64>>,
}

impl ArchivingExecutor {
    pub fn new(store: SqliteTaskStore) -> Self {
        Self {
            store,
            imported: Mutex::new(Vec::new()),
        }
    }

    pub fn imported(&self) -> Vec<i64> {
        self.imported.lock().unwrap().clone()
    }
}

impl ImportExecutor for ArchivingExecutor {
    fn import(&self, crawl_id: i64) -> anyhow::Result<()> {
        self.store.set_crawl_state(crawl_id, CrawlState::Archived)?;
        self.imported.lock().unwrap().push(crawl_id);
        Ok(())
    }
}

/// Records every attempt; fails the records marked poison until healed.
#[derive(Default)]
pub struct RecordingIndexer {
    poison: Mutex<HashSet<i64>>,
    attempts: Mutex<Vec<i64>>,
}

impl RecordingIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn poison(&self, record_id: i64) {
        self.poison.lock().unwrap().insert(record_id);
    }

    pub fn heal(&self, record_id: i64) {
        self.poison.lock().unwrap().remove(&record_id);
    }

    pub fn attempts(&self) -> Vec<i64> {
        self.attempts.lock().unwrap().clone()
    }

    /// Distinct records indexed successfully at least once.
    pub fn indexed(&self) -> HashSet<i64> {
        let poison = self.poison.lock().unwrap();
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|id| !poison.contains(id))
            .copied()
            .collect()
    }
}

impl RecordIndexer for RecordingIndexer {
    fn index(&self, record_id: i64) -> anyhow::Result<()> {
        self.attempts.lock().unwrap().push(record_id);
        if self.poison.lock().unwrap().contains(&record_id) {
            anyhow::bail!("record {} is malformed", record_id);
        }
        Ok(())
    }
}

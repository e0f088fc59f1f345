mod models;
mod schema;
mod sqlite_task_store;

pub use models::*;
pub use schema::TASK_VERSIONED_SCHEMAS;
pub use sqlite_task_store::SqliteTaskStore;

use crate::indexer::Partition;
use anyhow::Result;

/// Crawl lookups and state transitions.
pub trait CrawlStore: Send + Sync {
    /// Creates a crawl in the given state and returns its id.
    fn create_crawl(&self, name: &str, state: CrawlState) -> Result<i64>;
    fn get_crawl(&self, id: i64) -> Result<Option<Crawl>>;
    /// All crawls currently in `state`. No ordering is guaranteed.
    fn find_crawls_by_state(&self, state: CrawlState) -> Result<Vec<Crawl>>;
    fn set_crawl_state(&self, id: i64, state: CrawlState) -> Result<()>;
}

/// Per-partition high-water marks and the poison-record ledger.
///
/// Implementations keep no in-process state; every call goes to the shared
/// store, and the only primitive relied on is an atomic upsert.
pub trait CheckpointStore: Send + Sync {
    /// Upserts the checkpoint of a partition. Does not check ordering:
    /// callers must only ever move a partition forward.
    fn set_checkpoint(&self, partition_key: u32, last_id: i64) -> Result<()>;
    /// Returns `None` for a partition that never wrote a checkpoint.
    fn get_checkpoint(&self, partition_key: u32) -> Result<Option<i64>>;

    /// Creates the ledger row with a retry count of 1, or increments the
    /// count of an existing row. Refreshes the error time either way.
    fn record_failure(&self, record_id: i64) -> Result<()>;
    /// Removes the ledger row. Absent rows are not an error.
    fn clear_failure(&self, record_id: i64) -> Result<()>;
    fn get_failure(&self, record_id: i64) -> Result<Option<PoisonRecord>>;
    /// Every ledger row, highest record id first.
    fn list_failures(&self) -> Result<Vec<PoisonRecord>>;

    /// Pins the partition count checkpoints are keyed under. The first call
    /// records `count`; later calls succeed only with the same count, since
    /// a checkpoint written for one modulo layout is meaningless in another.
    fn claim_partition_count(&self, count: u32) -> Result<()>;
}

/// Registration of warc files found on disk.
pub trait WarcStore: Send + Sync {
    /// Adds the filenames not yet registered under the newest crawl named
    /// `crawl_name`, creating that crawl if needed, and moves the crawl to
    /// `importing`. All in one transaction. Returns `None` and changes
    /// nothing when every filename is already registered.
    fn stage_warcs(&self, crawl_name: &str, filenames: &[String]) -> Result<Option<StagedWarcs>>;
}

/// The ordered record stream partitioned indexers scan.
pub trait RecordSource: Send + Sync {
    /// Ids owned by `partition`, strictly greater than `after_id` (or from
    /// the start when `None`), ascending, at most `limit` of them.
    fn records_after(
        &self,
        partition: Partition,
        after_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<i64>>;
}

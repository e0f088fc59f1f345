//! Bamboo background tasks
//!
//! Crawl import work-loop, a watch importer for dropped warc files,
//! partitioned indexing with a poison-record ledger,
//! and the taskmaster that runs them. Exposed as a library for the binary and
//! for the end-to-end tests.

pub mod command;
pub mod config;
pub mod importer;
pub mod indexer;
pub mod sqlite_persistence;
pub mod task_store;
pub mod taskmaster;

// Re-export commonly used types for convenience
pub use importer::{CompletionHook, ImportExecutor, Importer, WatchDir, WatchImporter};
pub use indexer::{Partition, PartitionedIndexer, RecordIndexer, RetryPolicy};
pub use task_store::{CheckpointStore, CrawlStore, RecordSource, SqliteTaskStore, WarcStore};
pub use taskmaster::{Taskmaster, WakeSignal, Worker, WorkerContext, WorkerError};

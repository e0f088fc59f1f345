//! Partitioned indexing over the warc stream.
//!
//! Each [`PartitionedIndexer`] owns one modulo [`Partition`] of record ids and
//! tracks its own checkpoint, so partitions make progress independently and
//! without coordination beyond the shared store.

mod command;
mod partition;
mod partitioned_indexer;
mod retry_policy;

pub use command::CommandRecordIndexer;
pub use partition::Partition;
pub use partitioned_indexer::{IndexPassSummary, PartitionedIndexer, RecordIndexer};
pub use retry_policy::RetryPolicy;

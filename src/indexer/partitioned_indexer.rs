use super::partition::Partition;
use super::retry_policy::RetryPolicy;
use crate::task_store::{CheckpointStore, PoisonRecord, RecordSource};
use crate::taskmaster::{
    catch_panic, PassOutcome, WakeSignal, Worker, WorkerContext, WorkerError, WorkerSchedule,
};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Indexes a single record. Implemented outside this crate's core (CDX, Solr).
pub trait RecordIndexer: Send + Sync {
    fn index(&self, record_id: i64) -> anyhow::Result<()>;
}

/// Counters for one pass over a partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexPassSummary {
    /// Records from the scan indexed successfully.
    pub indexed: usize,
    /// Records from the scan that failed and were parked.
    pub poisoned: usize,
    /// Parked records indexed successfully by the sweep.
    pub recovered: usize,
    /// Parked records that failed again in the sweep.
    pub failed_retries: usize,
    /// Checkpoint after the pass.
    pub checkpoint: Option<i64>,
    /// The scan filled a whole batch, so more records may be waiting.
    pub more_pending: bool,
}

/// Scans one partition of the record stream in id order.
///
/// Progress is a checkpoint per partition; records that fail are parked in
/// the poison ledger so they never hold the checkpoint back, and are swept
/// again under the [`RetryPolicy`].
pub struct PartitionedIndexer {
    id: String,
    partition: Partition,
    source: Arc<dyn RecordSource>,
    checkpoints: Arc<dyn CheckpointStore>,
    indexer: Arc<dyn RecordIndexer>,
    retry_policy: RetryPolicy,
    batch_size: usize,
    signal: WakeSignal,
    poll_interval: Duration,
}

impl PartitionedIndexer {
    pub fn new(
        partition: Partition,
        source: Arc<dyn RecordSource>,
        checkpoints: Arc<dyn CheckpointStore>,
        indexer: Arc<dyn RecordIndexer>,
    ) -> Self {
        Self {
            id: format!("indexer-{}-of-{}", partition.key(), partition.count()),
            partition,
            source,
            checkpoints,
            indexer,
            retry_policy: RetryPolicy::default(),
            batch_size: 1000,
            signal: WakeSignal::new(),
            poll_interval: Duration::from_secs(60),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn partition(&self) -> Partition {
        self.partition
    }

    /// Signal that makes an idle indexer scan again.
    pub fn wake_signal(&self) -> WakeSignal {
        self.signal.clone()
    }

    /// Scan forward from the checkpoint, then sweep parked records.
    pub fn index_pass(&self, ctx: &WorkerContext) -> Result<IndexPassSummary, WorkerError> {
        let key = self.partition.key();
        let mut summary = IndexPassSummary::default();

        let stored = self
            .checkpoints
            .get_checkpoint(key)
            .map_err(WorkerError::Store)?;
        let mut parked: HashSet<i64> = self
            .parked_records()?
            .into_iter()
            .map(|r| r.record_id)
            .collect();

        let batch = self
            .source
            .records_after(self.partition, stored, self.batch_size)
            .map_err(WorkerError::Store)?;
        summary.more_pending = batch.len() >= self.batch_size;

        let mut position = stored;
        for record_id in batch {
            if ctx.is_cancelled() {
                summary.more_pending = false;
                break;
            }
            if !self.partition.owns(record_id) {
                warn!(
                    "Partition {} skipping foreign record {} from source",
                    self.partition, record_id
                );
                continue;
            }

            match self.index_record(record_id) {
                Ok(()) => {
                    // A row left behind by an interrupted earlier pass.
                    if parked.remove(&record_id) {
                        self.checkpoints
                            .clear_failure(record_id)
                            .map_err(WorkerError::Store)?;
                    }
                    summary.indexed += 1;
                }
                Err(e) => {
                    warn!(
                        "Partition {} failed to index record {}: {:#}",
                        self.partition, record_id, e
                    );
                    self.checkpoints
                        .record_failure(record_id)
                        .map_err(WorkerError::Store)?;
                    summary.poisoned += 1;
                }
            }
            position = Some(record_id);
        }

        if position != stored {
            if let Some(last_id) = position {
                self.commit_checkpoint(stored, last_id)?;
            }
        }
        summary.checkpoint = position;

        if !ctx.is_cancelled() {
            self.sweep(ctx, position, &mut summary)?;
        }

        if summary.indexed + summary.poisoned + summary.recovered > 0 {
            info!(
                "Partition {} pass: {} indexed, {} poisoned, {} recovered, checkpoint {:?}",
                self.partition,
                summary.indexed,
                summary.poisoned,
                summary.recovered,
                summary.checkpoint
            );
        }
        Ok(summary)
    }

    /// A panicking indexer counts as a failed record.
    fn index_record(&self, record_id: i64) -> anyhow::Result<()> {
        catch_panic(|| self.indexer.index(record_id))
    }

    fn commit_checkpoint(&self, stored: Option<i64>, last_id: i64) -> Result<(), WorkerError> {
        if let Some(stored) = stored {
            if last_id < stored {
                return Err(WorkerError::CheckpointRegression {
                    partition_key: self.partition.key(),
                    stored,
                    attempted: last_id,
                });
            }
        }
        self.checkpoints
            .set_checkpoint(self.partition.key(), last_id)
            .map_err(WorkerError::Store)
    }

    /// Ledger rows belonging to this partition.
    fn parked_records(&self) -> Result<Vec<PoisonRecord>, WorkerError> {
        let records = self
            .checkpoints
            .list_failures()
            .map_err(WorkerError::Store)?;
        Ok(records
            .into_iter()
            .filter(|r| self.partition.owns(r.record_id))
            .collect())
    }

    /// Retry parked records at or below the checkpoint whose backoff elapsed.
    fn sweep(
        &self,
        ctx: &WorkerContext,
        checkpoint: Option<i64>,
        summary: &mut IndexPassSummary,
    ) -> Result<(), WorkerError> {
        let Some(checkpoint) = checkpoint else {
            return Ok(());
        };
        let now = Utc::now();

        for record in self.parked_records()? {
            if ctx.is_cancelled() {
                break;
            }
            if record.record_id > checkpoint {
                continue;
            }
            if !self.retry_policy.should_retry(record.retry_count) {
                debug!(
                    "Record {} exhausted its retries ({}), leaving it parked",
                    record.record_id, record.retry_count
                );
                continue;
            }
            if !self.retry_policy.is_due(&record, now) {
                continue;
            }

            match self.index_record(record.record_id) {
                Ok(()) => {
                    self.checkpoints
                        .clear_failure(record.record_id)
                        .map_err(WorkerError::Store)?;
                    info!(
                        "Partition {} recovered record {} after {} failures",
                        self.partition, record.record_id, record.retry_count
                    );
                    summary.recovered += 1;
                }
                Err(e) => {
                    warn!(
                        "Partition {} retry of record {} failed: {:#}",
                        self.partition, record.record_id, e
                    );
                    self.checkpoints
                        .record_failure(record.record_id)
                        .map_err(WorkerError::Store)?;
                    summary.failed_retries += 1;
                }
            }
        }
        Ok(())
    }
}

impl Worker for PartitionedIndexer {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        "Indexes one modulo partition of the warc stream"
    }

    fn schedule(&self) -> WorkerSchedule {
        WorkerSchedule::OnSignal {
            signal: self.signal.clone(),
            fallback: self.poll_interval,
        }
    }

    fn run_pass(&self, ctx: &WorkerContext) -> Result<PassOutcome, WorkerError> {
        let summary = self.index_pass(ctx)?;
        Ok(if summary.more_pending {
            PassOutcome::MorePending
        } else {
            PassOutcome::Idle
        })
    }
}

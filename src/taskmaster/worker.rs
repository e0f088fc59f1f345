use super::context::WorkerContext;
use super::wake::WakeSignal;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use thiserror::Error;

/// When a worker's next pass should run.
#[derive(Debug, Clone)]
pub enum WorkerSchedule {
    /// Run at fixed intervals
    Interval(Duration),
    /// Run when the signal fires, and at the latest after `fallback`
    OnSignal {
        signal: WakeSignal,
        fallback: Duration,
    },
}

/// Result of a single worker pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Nothing left to do until the next trigger.
    Idle,
    /// More work is known to be waiting; run again right away.
    MorePending,
}

/// Errors that abort a worker pass.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The shared store could not be read or written. Distinct from an empty
    /// result: no progress is recorded when this happens.
    #[error("store unavailable: {0:#}")]
    Store(anyhow::Error),

    #[error(
        "checkpoint regression on partition {partition_key}: stored {stored}, attempted {attempted}"
    )]
    CheckpointRegression {
        partition_key: u32,
        stored: i64,
        attempted: i64,
    },

    #[error("worker was cancelled")]
    Cancelled,
}

/// A long-running unit owned by the [`Taskmaster`](super::Taskmaster).
///
/// Passes run on a blocking thread. A pass must return between units of work
/// once `ctx.is_cancelled()` is set, but never abandons a unit midway.
pub trait Worker: Send + Sync {
    /// Unique identifier for this worker.
    fn id(&self) -> &str;

    /// Description of what this worker does.
    fn description(&self) -> &str;

    /// When passes should be re-run.
    fn schedule(&self) -> WorkerSchedule;

    /// Run one pass.
    fn run_pass(&self, ctx: &WorkerContext) -> Result<PassOutcome, WorkerError>;
}

/// Runs one unit of work, turning a panic into an error so that a single
/// bad item is handled like any other failure.
pub fn catch_panic<T>(work: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
    match catch_unwind(AssertUnwindSafe(work)) {
        Ok(result) => result,
        Err(payload) => Err(anyhow::anyhow!(
            "panicked: {}",
            panic_message(payload.as_ref())
        )),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

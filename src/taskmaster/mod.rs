//! Long-running worker registry.
//!
//! The [`Taskmaster`] owns every registered [`Worker`], runs each one on its
//! own task, and re-runs worker passes on the worker's [`WorkerSchedule`]
//! until shutdown.

mod context;
mod registry;
mod wake;
mod worker;

pub use context::WorkerContext;
pub use registry::{ShutdownReport, Taskmaster};
pub use wake::WakeSignal;
pub use worker::{catch_panic, PassOutcome, Worker, WorkerError, WorkerSchedule};

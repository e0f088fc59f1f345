use super::context::WorkerContext;
use super::worker::{PassOutcome, Worker, WorkerError, WorkerSchedule};
use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of [`Taskmaster::shutdown`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers that observed the stop signal in time.
    pub stopped: Vec<String>,
    /// Workers still busy when the shutdown deadline passed.
    pub timed_out: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.timed_out.is_empty()
    }
}

/// Owns the long-running workers and their lifecycle.
pub struct Taskmaster {
    workers: Vec<Arc<dyn Worker>>,

    /// Task handles of spawned workers, in registration order.
    running_handles: Vec<(String, JoinHandle<()>)>,

    /// Token to signal every worker to stop.
    shutdown_token: CancellationToken,

    /// Upper bound on how long shutdown waits for all workers together.
    shutdown_timeout: Duration,

    started: bool,
}

impl Taskmaster {
    pub fn new(shutdown_timeout: Duration) -> Self {
        Self {
            workers: Vec::new(),
            running_handles: Vec::new(),
            shutdown_token: CancellationToken::new(),
            shutdown_timeout,
            started: false,
        }
    }

    /// Register a worker. Once started, the worker is spawned immediately.
    ///
    /// Must be called from within a Tokio runtime when the taskmaster has
    /// already been started.
    pub fn add(&mut self, worker: Arc<dyn Worker>) -> Result<()> {
        if self.workers.iter().any(|w| w.id() == worker.id()) {
            bail!("Worker {} is already registered", worker.id());
        }
        info!("Registering worker: {} - {}", worker.id(), worker.description());
        if self.started {
            self.spawn_worker(Arc::clone(&worker));
        }
        self.workers.push(worker);
        Ok(())
    }

    /// Spawn every registered worker. Must be called from within a Tokio runtime.
    pub fn start(&mut self) {
        if self.started {
            warn!("Taskmaster already started");
            return;
        }
        info!("Starting taskmaster with {} workers", self.workers.len());
        self.started = true;
        let workers: Vec<_> = self.workers.iter().map(Arc::clone).collect();
        for worker in workers {
            self.spawn_worker(worker);
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn worker_ids(&self) -> Vec<String> {
        self.workers.iter().map(|w| w.id().to_string()).collect()
    }

    fn spawn_worker(&mut self, worker: Arc<dyn Worker>) {
        let ctx = WorkerContext::new(self.shutdown_token.child_token());
        let id = worker.id().to_string();
        let handle = tokio::spawn(run_worker(worker, ctx));
        self.running_handles.push((id, handle));
    }

    /// Signal every worker to stop and wait for them, bounded by the
    /// shutdown timeout. Workers still running at the deadline are reported
    /// and detached.
    pub async fn shutdown(self) -> ShutdownReport {
        info!(
            "Shutting down taskmaster ({} running workers)...",
            self.running_handles.len()
        );
        self.shutdown_token.cancel();

        let deadline = tokio::time::Instant::now() + self.shutdown_timeout;
        let mut report = ShutdownReport::default();

        for (id, mut handle) in self.running_handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => report.stopped.push(id),
                Ok(Err(e)) => {
                    error!("Worker {} task ended abnormally: {}", id, e);
                    report.stopped.push(id);
                }
                Err(_) => {
                    warn!(
                        "Worker {} did not stop within {:?}",
                        id, self.shutdown_timeout
                    );
                    handle.abort();
                    report.timed_out.push(id);
                }
            }
        }

        info!(
            "Taskmaster shutdown complete ({} stopped, {} timed out)",
            report.stopped.len(),
            report.timed_out.len()
        );
        report
    }
}

/// Runs passes of one worker until its context is cancelled.
async fn run_worker(worker: Arc<dyn Worker>, ctx: WorkerContext) {
    let worker_id = worker.id().to_string();
    info!("Worker {} started", worker_id);

    while !ctx.is_cancelled() {
        let pass_worker = Arc::clone(&worker);
        let pass_ctx = ctx.clone();
        let start_time = Instant::now();
        let result = tokio::task::spawn_blocking(move || pass_worker.run_pass(&pass_ctx)).await;
        let elapsed = start_time.elapsed();

        let outcome = match result {
            Ok(Ok(outcome)) => {
                debug!("Worker {} pass finished in {:?}: {:?}", worker_id, elapsed, outcome);
                outcome
            }
            Ok(Err(WorkerError::Cancelled)) => break,
            Ok(Err(e)) => {
                error!("Worker {} pass failed after {:?}: {}", worker_id, elapsed, e);
                PassOutcome::Idle
            }
            Err(e) => {
                error!("Worker {} pass panicked after {:?}: {}", worker_id, elapsed, e);
                PassOutcome::Idle
            }
        };

        if outcome == PassOutcome::MorePending {
            continue;
        }

        match worker.schedule() {
            WorkerSchedule::Interval(interval) => {
                tokio::select! {
                    _ = ctx.cancellation_token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            WorkerSchedule::OnSignal { signal, fallback } => {
                tokio::select! {
                    _ = ctx.cancellation_token.cancelled() => break,
                    _ = signal.notified() => {
                        debug!("Worker {} woken by signal", worker_id);
                    }
                    _ = tokio::time::sleep(fallback) => {}
                }
            }
        }
    }

    info!("Worker {} stopped", worker_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taskmaster::WakeSignal;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    // Test worker implementation
    struct TestWorker {
        id: &'static str,
        passes: Arc<AtomicUsize>,
        should_fail: Arc<AtomicBool>,
        schedule: WorkerSchedule,
        /// Time each pass blocks for, ignoring cancellation
        pass_duration: Duration,
    }

    impl TestWorker {
        fn new(id: &'static str, schedule: WorkerSchedule) -> Self {
            Self {
                id,
                passes: Arc::new(AtomicUsize::new(0)),
                should_fail: Arc::new(AtomicBool::new(false)),
                schedule,
                pass_duration: Duration::ZERO,
            }
        }
    }

    impl Worker for TestWorker {
        fn id(&self) -> &str {
            self.id
        }

        fn description(&self) -> &str {
            "A test worker for unit tests"
        }

        fn schedule(&self) -> WorkerSchedule {
            self.schedule.clone()
        }

        fn run_pass(&self, _ctx: &WorkerContext) -> Result<PassOutcome, WorkerError> {
            self.passes.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.pass_duration);
            if self.should_fail.load(Ordering::SeqCst) {
                Err(WorkerError::Store(anyhow::anyhow!("database is locked")))
            } else {
                Ok(PassOutcome::Idle)
            }
        }
    }

    async fn wait_for(counter: &AtomicUsize, at_least: usize) {
        for _ in 0..200 {
            if counter.load(Ordering::SeqCst) >= at_least {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "counter stayed at {} (expected >= {})",
            counter.load(Ordering::SeqCst),
            at_least
        );
    }

    #[tokio::test]
    async fn test_start_runs_first_pass() {
        let mut taskmaster = Taskmaster::new(Duration::from_secs(5));
        let worker = TestWorker::new("w", WorkerSchedule::Interval(Duration::from_secs(3600)));
        let passes = Arc::clone(&worker.passes);
        taskmaster.add(Arc::new(worker)).unwrap();

        assert_eq!(passes.load(Ordering::SeqCst), 0);
        taskmaster.start();
        assert!(taskmaster.is_started());
        wait_for(&passes, 1).await;

        let report = taskmaster.shutdown().await;
        assert!(report.is_clean());
        assert_eq!(report.stopped, vec!["w".to_string()]);
    }

    #[tokio::test]
    async fn test_add_after_start_spawns_immediately() {
        let mut taskmaster = Taskmaster::new(Duration::from_secs(5));
        taskmaster.start();

        let worker = TestWorker::new("late", WorkerSchedule::Interval(Duration::from_secs(3600)));
        let passes = Arc::clone(&worker.passes);
        taskmaster.add(Arc::new(worker)).unwrap();
        wait_for(&passes, 1).await;

        assert_eq!(taskmaster.worker_ids(), vec!["late".to_string()]);
        assert!(taskmaster.shutdown().await.is_clean());
    }

    #[tokio::test]
    async fn test_duplicate_worker_id_rejected() {
        let mut taskmaster = Taskmaster::new(Duration::from_secs(5));
        let interval = WorkerSchedule::Interval(Duration::from_secs(1));
        taskmaster
            .add(Arc::new(TestWorker::new("dup", interval.clone())))
            .unwrap();
        let result = taskmaster.add(Arc::new(TestWorker::new("dup", interval)));
        assert!(result.is_err());
        assert_eq!(taskmaster.len(), 1);
    }

    #[tokio::test]
    async fn test_interval_reruns_passes() {
        let mut taskmaster = Taskmaster::new(Duration::from_secs(5));
        let worker = TestWorker::new("tick", WorkerSchedule::Interval(Duration::from_millis(10)));
        let passes = Arc::clone(&worker.passes);
        taskmaster.add(Arc::new(worker)).unwrap();
        taskmaster.start();

        wait_for(&passes, 3).await;
        assert!(taskmaster.shutdown().await.is_clean());
    }

    #[tokio::test]
    async fn test_signal_wakes_idle_worker() {
        let signal = WakeSignal::new();
        let mut taskmaster = Taskmaster::new(Duration::from_secs(5));
        let worker = TestWorker::new(
            "signalled",
            WorkerSchedule::OnSignal {
                signal: signal.clone(),
                fallback: Duration::from_secs(3600),
            },
        );
        let passes = Arc::clone(&worker.passes);
        taskmaster.add(Arc::new(worker)).unwrap();
        taskmaster.start();
        wait_for(&passes, 1).await;

        signal.notify();
        wait_for(&passes, 2).await;

        assert!(taskmaster.shutdown().await.is_clean());
    }

    #[tokio::test]
    async fn test_failed_pass_keeps_worker_alive() {
        let mut taskmaster = Taskmaster::new(Duration::from_secs(5));
        let worker = TestWorker::new("flaky", WorkerSchedule::Interval(Duration::from_millis(10)));
        worker.should_fail.store(true, Ordering::SeqCst);
        let passes = Arc::clone(&worker.passes);
        taskmaster.add(Arc::new(worker)).unwrap();
        taskmaster.start();

        wait_for(&passes, 3).await;
        assert!(taskmaster.shutdown().await.is_clean());
    }

    #[tokio::test]
    async fn test_shutdown_reports_stuck_worker() {
        let mut taskmaster = Taskmaster::new(Duration::from_millis(100));

        let mut stuck = TestWorker::new("stuck", WorkerSchedule::Interval(Duration::from_secs(3600)));
        stuck.pass_duration = Duration::from_secs(1);
        let stuck_passes = Arc::clone(&stuck.passes);
        let idle = TestWorker::new("idle", WorkerSchedule::Interval(Duration::from_secs(3600)));
        let idle_passes = Arc::clone(&idle.passes);

        taskmaster.add(Arc::new(stuck)).unwrap();
        taskmaster.add(Arc::new(idle)).unwrap();
        taskmaster.start();
        wait_for(&stuck_passes, 1).await;
        wait_for(&idle_passes, 1).await;

        let started = Instant::now();
        let report = taskmaster.shutdown().await;
        assert!(started.elapsed() < Duration::from_millis(900));
        assert!(!report.is_clean());
        assert_eq!(report.timed_out, vec!["stuck".to_string()]);
        assert_eq!(report.stopped, vec!["idle".to_string()]);
    }

    #[tokio::test]
    async fn test_shutdown_without_start() {
        let mut taskmaster = Taskmaster::new(Duration::from_secs(1));
        taskmaster
            .add(Arc::new(TestWorker::new(
                "never",
                WorkerSchedule::Interval(Duration::from_secs(1)),
            )))
            .unwrap();

        let report = taskmaster.shutdown().await;
        assert!(report.is_clean());
        assert!(report.stopped.is_empty());
    }
}

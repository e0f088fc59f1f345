//! Crawl import work-loop.
//!
//! The [`Importer`] drains every crawl in the `importing` state, hands each to
//! an [`ImportExecutor`] and fires the completion hook after each success.
//! It re-queries until a query comes back empty, then goes idle until its
//! [`WakeSignal`] fires or the fallback poll interval passes.

mod command;
mod watch;

pub use command::CommandImportExecutor;
pub use watch::{WatchDir, WatchImporter};

use crate::task_store::{CrawlState, CrawlStore};
use crate::taskmaster::{
    catch_panic, PassOutcome, WakeSignal, Worker, WorkerContext, WorkerError, WorkerSchedule,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Runs the import of one crawl. Expected to move the crawl out of
/// `importing` when it succeeds.
pub trait ImportExecutor: Send + Sync {
    fn import(&self, crawl_id: i64) -> anyhow::Result<()>;
}

/// Called after each successful import, on the importer's thread.
pub type CompletionHook = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Counters for one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Crawls imported, in execution order.
    pub imported: Vec<i64>,
    /// Crawls whose import failed. They stay `importing`.
    pub failed: Vec<i64>,
    /// Queries issued, including the final empty one.
    pub queries: usize,
}

pub struct Importer {
    crawls: Arc<dyn CrawlStore>,
    executor: Arc<dyn ImportExecutor>,
    completion_hook: Option<CompletionHook>,
    waker: WakeSignal,
    poll_interval: Duration,
}

impl Importer {
    pub fn new(crawls: Arc<dyn CrawlStore>, executor: Arc<dyn ImportExecutor>) -> Self {
        Self {
            crawls,
            executor,
            completion_hook: None,
            waker: WakeSignal::new(),
            poll_interval: Duration::from_secs(60),
        }
    }

    pub fn with_completion_hook(mut self, hook: CompletionHook) -> Self {
        self.completion_hook = Some(hook);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Signal that re-arms an idle importer.
    pub fn waker(&self) -> WakeSignal {
        self.waker.clone()
    }

    /// Creates a crawl in the pending-import state and wakes the importer.
    pub fn submit(&self, name: &str) -> anyhow::Result<i64> {
        let id = self.crawls.create_crawl(name, CrawlState::Importing)?;
        info!("Queued crawl {} ({}) for import", id, name);
        self.waker.notify();
        Ok(id)
    }

    /// Imports pending crawls until a query finds none left.
    ///
    /// A crawl that fails is not retried within the same drain, so a
    /// permanently failing crawl cannot keep the loop busy.
    pub fn drain(&self, ctx: &WorkerContext) -> Result<DrainSummary, WorkerError> {
        let mut summary = DrainSummary::default();
        let mut failed: HashSet<i64> = HashSet::new();

        loop {
            let mut pending = self
                .crawls
                .find_crawls_by_state(CrawlState::Importing)
                .map_err(|e| {
                    error!("Failed to query pending crawls: {:#}", e);
                    WorkerError::Store(e)
                })?;
            summary.queries += 1;

            pending.retain(|crawl| !failed.contains(&crawl.id));
            if pending.is_empty() {
                debug!("No pending crawls, importer going idle");
                break;
            }
            pending.sort_by_key(|crawl| crawl.id);

            for crawl in pending {
                if ctx.is_cancelled() {
                    info!("Importer stopping before crawl {}", crawl.id);
                    return Ok(summary);
                }

                info!("Importing crawl {} ({})", crawl.id, crawl.name);
                match catch_panic(|| self.executor.import(crawl.id)) {
                    Ok(()) => {
                        summary.imported.push(crawl.id);
                        self.fire_completion_hook(crawl.id);
                    }
                    Err(e) => {
                        warn!("Import of crawl {} failed: {:#}", crawl.id, e);
                        failed.insert(crawl.id);
                        summary.failed.push(crawl.id);
                    }
                }
            }
        }

        if !summary.imported.is_empty() || !summary.failed.is_empty() {
            info!(
                "Import drain finished: {} imported, {} failed",
                summary.imported.len(),
                summary.failed.len()
            );
        }
        Ok(summary)
    }

    fn fire_completion_hook(&self, crawl_id: i64) {
        let Some(hook) = &self.completion_hook else {
            return;
        };
        if let Err(e) = catch_panic(|| hook()) {
            warn!("Completion hook after crawl {} failed: {:#}", crawl_id, e);
        }
    }
}

impl Worker for Importer {
    fn id(&self) -> &str {
        "importer"
    }

    fn description(&self) -> &str {
        "Imports crawls waiting in the importing state"
    }

    fn schedule(&self) -> WorkerSchedule {
        WorkerSchedule::OnSignal {
            signal: self.waker.clone(),
            fallback: self.poll_interval,
        }
    }

    fn run_pass(&self, ctx: &WorkerContext) -> Result<PassOutcome, WorkerError> {
        self.drain(ctx)?;
        Ok(PassOutcome::Idle)
    }
}

//! Watch importer: picks up warc files dropped into watched directories.
//!
//! Each pass lists every watched directory, stages the `.warc.gz` files not
//! registered yet under that directory's crawl, and wakes the importer when
//! anything was added. Files modified within `min_file_age` are left for a
//! later pass, since a crawler may still be writing them.

use crate::task_store::WarcStore;
use crate::taskmaster::{
    PassOutcome, WakeSignal, Worker, WorkerContext, WorkerError, WorkerSchedule,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

const WARC_SUFFIX: &str = ".warc.gz";

/// A directory whose warcs belong to the crawl named `crawl_name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchDir {
    pub crawl_name: String,
    pub dir: PathBuf,
}

pub struct WatchImporter {
    warcs: Arc<dyn WarcStore>,
    watches: Vec<WatchDir>,
    importer_waker: WakeSignal,
    interval: Duration,
    min_file_age: Duration,
}

impl WatchImporter {
    pub fn new(warcs: Arc<dyn WarcStore>, watches: Vec<WatchDir>, importer_waker: WakeSignal) -> Self {
        Self {
            warcs,
            watches,
            importer_waker,
            interval: Duration::from_secs(60),
            min_file_age: Duration::from_secs(60),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_min_file_age(mut self, min_file_age: Duration) -> Self {
        self.min_file_age = min_file_age;
        self
    }

    /// Stages new files from every watched directory and returns how many
    /// warcs were added.
    pub fn watch_pass(&self, ctx: &WorkerContext) -> Result<usize, WorkerError> {
        let now = SystemTime::now();
        let mut total = 0;

        for watch in &self.watches {
            if ctx.is_cancelled() {
                return Err(WorkerError::Cancelled);
            }

            let files = match list_warc_files(&watch.dir, self.min_file_age, now) {
                Ok(files) => files,
                Err(e) => {
                    warn!("Failed to read watch directory {:?}: {}", watch.dir, e);
                    continue;
                }
            };
            if files.is_empty() {
                continue;
            }

            let staged = self
                .warcs
                .stage_warcs(&watch.crawl_name, &files)
                .map_err(WorkerError::Store)?;
            match staged {
                Some(staged) => {
                    info!(
                        "Staged {} new warcs from {:?} into crawl {} ({})",
                        staged.added.len(),
                        watch.dir,
                        staged.crawl_id,
                        watch.crawl_name
                    );
                    total += staged.added.len();
                    self.importer_waker.notify();
                }
                None => debug!("No new warcs in {:?}", watch.dir),
            }
        }
        Ok(total)
    }
}

/// Paths of the settled `.warc.gz` files directly inside `dir`, sorted.
fn list_warc_files(dir: &Path, min_age: Duration, now: SystemTime) -> std::io::Result<Vec<String>> {
    let mut files = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Failed to read directory entry in {:?}: {}", dir, e);
                continue;
            }
        };

        let path = entry.path();
        let is_warc = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(WARC_SUFFIX));
        if !is_warc || !path.is_file() {
            continue;
        }

        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(e) => {
                warn!("Failed to get modified time for {:?}: {}", path, e);
                continue;
            }
        };
        // A modification time in the future counts as still being written
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age < min_age {
            debug!("Skipping {:?}, modified {:?} ago", path, age);
            continue;
        }

        match path.to_str() {
            Some(p) => files.push(p.to_string()),
            None => warn!("Skipping non UTF-8 path {:?}", path),
        }
    }

    files.sort();
    Ok(files)
}

impl Worker for WatchImporter {
    fn id(&self) -> &str {
        "watch-importer"
    }

    fn description(&self) -> &str {
        "Stages warcs found in watched directories for import"
    }

    fn schedule(&self) -> WorkerSchedule {
        WorkerSchedule::Interval(self.interval)
    }

    fn run_pass(&self, ctx: &WorkerContext) -> Result<PassOutcome, WorkerError> {
        self.watch_pass(ctx)?;
        Ok(PassOutcome::Idle)
    }
}

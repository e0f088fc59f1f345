//! Warc files dropped into a watched directory flowing through import and
//! indexing

mod common;

use bamboo_tasks::importer::{CompletionHook, Importer, WatchDir, WatchImporter};
use bamboo_tasks::indexer::{Partition, PartitionedIndexer, RecordIndexer};
use bamboo_tasks::task_store::{CrawlState, CrawlStore};
use bamboo_tasks::taskmaster::Taskmaster;
use common::{
    wait_until, ArchivingExecutor, RecordingIndexer, TestEnv, NEVER_POLL, SETTLE_TIMEOUT,
    SHUTDOWN_TIMEOUT,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const WATCH_INTERVAL: Duration = Duration::from_millis(20);

fn drop_warc(dir: &Path, name: &str) {
    std::fs::write(dir.join(name), b"WARC/1.0\r\n").unwrap();
}

fn build_watch_pipeline(
    env: &TestEnv,
    watched: &Path,
    executor: &Arc<ArchivingExecutor>,
    records: &Arc<RecordingIndexer>,
) -> Taskmaster {
    let mut taskmaster = Taskmaster::new(SHUTDOWN_TIMEOUT);

    let indexer = PartitionedIndexer::new(
        Partition::new(0, 1).unwrap(),
        Arc::new(env.store.clone()),
        Arc::new(env.store.clone()),
        Arc::clone(records) as Arc<dyn RecordIndexer>,
    )
    .with_poll_interval(NEVER_POLL);
    let signal = indexer.wake_signal();
    taskmaster.add(Arc::new(indexer)).unwrap();

    let hook: CompletionHook = Arc::new(move || {
        signal.notify();
        Ok(())
    });
    let importer = Importer::new(Arc::new(env.store.clone()), executor.clone())
        .with_completion_hook(hook)
        .with_poll_interval(NEVER_POLL);

    let watcher = WatchImporter::new(
        Arc::new(env.store.clone()),
        vec![WatchDir {
            crawl_name: "nightly".to_string(),
            dir: watched.to_path_buf(),
        }],
        importer.waker(),
    )
    .with_interval(WATCH_INTERVAL)
    .with_min_file_age(Duration::ZERO);

    taskmaster.add(Arc::new(importer)).unwrap();
    taskmaster.add(Arc::new(watcher)).unwrap();
    taskmaster
}

#[tokio::test]
async fn test_dropped_warcs_are_imported_and_indexed() {
    let env = TestEnv::new();
    let watched = TempDir::new().unwrap();
    drop_warc(watched.path(), "nightly-00000.warc.gz");
    drop_warc(watched.path(), "nightly-00001.warc.gz");

    let executor = Arc::new(ArchivingExecutor::new(env.store.clone()));
    let records = Arc::new(RecordingIndexer::new());
    let mut taskmaster = build_watch_pipeline(&env, watched.path(), &executor, &records);
    taskmaster.start();

    assert!(wait_until(SETTLE_TIMEOUT, || records.attempts() == vec![1, 2]).await);
    assert!(wait_until(SETTLE_TIMEOUT, || env.checkpoint(0) == Some(2)).await);
    assert!(wait_until(SETTLE_TIMEOUT, || executor.imported().len() == 1).await);
    let crawl_id = executor.imported()[0];
    assert!(wait_until(SETTLE_TIMEOUT, || env.state_of(crawl_id) == CrawlState::Archived).await);

    // A later file reopens the same crawl
    drop_warc(watched.path(), "nightly-00002.warc.gz");
    assert!(wait_until(SETTLE_TIMEOUT, || executor.imported() == vec![crawl_id, crawl_id]).await);
    assert!(wait_until(SETTLE_TIMEOUT, || records.attempts() == vec![1, 2, 3]).await);
    assert!(wait_until(SETTLE_TIMEOUT, || env.state_of(crawl_id) == CrawlState::Archived).await);

    let report = taskmaster.shutdown().await;
    assert!(report.is_clean(), "timed out: {:?}", report.timed_out);
    assert_eq!(report.stopped.len(), 3);
}

#[tokio::test]
async fn test_watch_keeps_scanning_after_empty_passes() {
    let env = TestEnv::new();
    let watched = TempDir::new().unwrap();

    let executor = Arc::new(ArchivingExecutor::new(env.store.clone()));
    let records = Arc::new(RecordingIndexer::new());
    let mut taskmaster = build_watch_pipeline(&env, watched.path(), &executor, &records);
    taskmaster.start();

    tokio::time::sleep(WATCH_INTERVAL * 5).await;
    assert!(executor.imported().is_empty());
    assert!(env.store.find_crawls_by_state(CrawlState::Importing).unwrap().is_empty());

    drop_warc(watched.path(), "late.warc.gz");
    assert!(wait_until(SETTLE_TIMEOUT, || records.attempts() == vec![1]).await);

    assert!(taskmaster.shutdown().await.is_clean());
}

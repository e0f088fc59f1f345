use anyhow::{anyhow, Context, Result};
use bamboo_tasks::command::ExternalCommand;
use bamboo_tasks::config::{self, AppConfig};
use bamboo_tasks::importer::{CommandImportExecutor, CompletionHook, Importer, WatchImporter};
use bamboo_tasks::indexer::{CommandRecordIndexer, Partition, PartitionedIndexer, RetryPolicy};
use bamboo_tasks::task_store::{CheckpointStore, SqliteTaskStore};
use bamboo_tasks::taskmaster::{Taskmaster, WakeSignal};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => path_buf,
        Err(e) => return Err(format!("Error resolving path {}: {}", s, e)),
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

fn parse_dir(s: &str) -> Result<PathBuf, String> {
    let path = parse_path(s)?;
    if !path.exists() {
        return Err(format!("Directory does not exist: {}", s));
    }
    if !path.is_dir() {
        return Err(format!("Path is not a directory: {}", s));
    }
    Ok(path)
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding tasks.db. Can also be specified in config file.
    #[clap(long, value_parser = parse_dir)]
    pub db_dir: Option<PathBuf>,

    /// Command run once per crawl waiting for import, with the crawl id appended.
    #[clap(long)]
    pub import_command: Option<String>,

    /// Command run once per warc record, with the record id appended.
    #[clap(long)]
    pub index_command: Option<String>,

    /// Number of modulo partitions the warc stream is split into.
    #[clap(long, default_value_t = 1)]
    pub partitions: u32,

    /// Partition keys this process drives. Repeatable; defaults to all.
    #[clap(long = "partition")]
    pub owned_partitions: Vec<u32>,

    /// Records fetched per indexing batch.
    #[clap(long, default_value_t = 1000)]
    pub batch_size: usize,

    /// Seconds an idle worker waits before polling again without a wake.
    #[clap(long, default_value_t = 60)]
    pub poll_interval_secs: u64,

    /// Seconds shutdown waits for workers to finish their current item.
    #[clap(long, default_value_t = 30)]
    pub shutdown_timeout_secs: u64,

    /// Directory whose .warc.gz files are staged under a crawl, as CRAWL=DIR. Repeatable.
    #[clap(long = "watch")]
    pub watches: Vec<String>,

    /// Seconds between scans of the watched directories.
    #[clap(long, default_value_t = 60)]
    pub watch_interval_secs: u64,

    /// Seconds a watched file must stay unmodified before it is staged.
    #[clap(long, default_value_t = 60)]
    pub watch_min_file_age_secs: u64,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_dir: args.db_dir.clone(),
            import_command: args.import_command.clone(),
            index_command: args.index_command.clone(),
            partitions: args.partitions,
            owned_partitions: args.owned_partitions.clone(),
            batch_size: args.batch_size,
            poll_interval_secs: args.poll_interval_secs,
            shutdown_timeout_secs: args.shutdown_timeout_secs,
            watches: args.watches.clone(),
            watch_interval_secs: args.watch_interval_secs,
            watch_min_file_age_secs: args.watch_min_file_age_secs,
        }
    }
}

/// Builds one indexer per owned partition. Returns them with their wake signals.
fn build_indexers(
    app_config: &AppConfig,
    store: &SqliteTaskStore,
    command: ExternalCommand,
) -> Result<Vec<(Arc<PartitionedIndexer>, WakeSignal)>> {
    let settings = &app_config.indexer;
    store
        .claim_partition_count(settings.partitions)
        .context("Partition count does not match the stored checkpoints")?;
    let record_indexer = Arc::new(CommandRecordIndexer::new(command));
    let retry_policy = RetryPolicy::new(&settings.retry);

    settings
        .owned_partitions
        .iter()
        .map(|key| -> Result<(Arc<PartitionedIndexer>, WakeSignal)> {
            let partition = Partition::new(*key, settings.partitions)?;
            let indexer = PartitionedIndexer::new(
                partition,
                Arc::new(store.clone()),
                Arc::new(store.clone()),
                record_indexer.clone(),
            )
            .with_retry_policy(retry_policy.clone())
            .with_batch_size(settings.batch_size)
            .with_poll_interval(Duration::from_secs(settings.poll_interval_secs));
            let signal = indexer.wake_signal();
            Ok((Arc::new(indexer), signal))
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration:");
    info!("  db_dir: {:?}", app_config.db_dir);
    info!(
        "  partitions: {:?} of {}",
        app_config.indexer.owned_partitions, app_config.indexer.partitions
    );
    info!("  shutdown_timeout: {:?}", app_config.shutdown_timeout());

    info!("Opening task database at {:?}...", app_config.task_db_path());
    let store = SqliteTaskStore::new(app_config.task_db_path())
        .context("Failed to open task database")?;

    let mut taskmaster = Taskmaster::new(app_config.shutdown_timeout());

    let indexers = match app_config.indexer.command.clone() {
        Some(command) => build_indexers(&app_config, &store, command)?,
        None => {
            info!("No index command configured, indexing disabled");
            Vec::new()
        }
    };
    let indexer_signals: Vec<WakeSignal> =
        indexers.iter().map(|(_, signal)| signal.clone()).collect();

    if let Some(command) = app_config.importer.command.clone() {
        let executor = Arc::new(CommandImportExecutor::new(command, Arc::new(store.clone())));
        // A finished import makes new warcs visible to every partition
        let hook: CompletionHook = Arc::new(move || {
            for signal in &indexer_signals {
                signal.notify();
            }
            Ok(())
        });
        let importer = Importer::new(Arc::new(store.clone()), executor)
            .with_completion_hook(hook)
            .with_poll_interval(Duration::from_secs(app_config.importer.poll_interval_secs));

        let watches = app_config.importer.watches.clone();
        if !watches.is_empty() {
            info!("Watching {} directories for new warcs", watches.len());
            let watcher = WatchImporter::new(Arc::new(store.clone()), watches, importer.waker())
                .with_interval(Duration::from_secs(app_config.importer.watch_interval_secs))
                .with_min_file_age(Duration::from_secs(
                    app_config.importer.watch_min_file_age_secs,
                ));
            taskmaster.add(Arc::new(watcher))?;
        }
        taskmaster.add(Arc::new(importer))?;
    } else {
        info!("No import command configured, importer disabled");
    }

    for (indexer, _) in indexers {
        taskmaster.add(indexer)?;
    }

    taskmaster.start();
    info!("Running {} workers: {:?}", taskmaster.len(), taskmaster.worker_ids());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C, initiating graceful shutdown");

    let report = taskmaster.shutdown().await;
    if !report.is_clean() {
        warn!(
            "Workers still busy at shutdown deadline: {:?}",
            report.timed_out
        );
        std::process::exit(1);
    }
    Ok(())
}

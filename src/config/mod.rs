mod file_config;

pub use file_config::{FileConfig, ImporterConfig, IndexerConfig, WatchConfig};

use crate::command::ExternalCommand;
use crate::importer::WatchDir;
use anyhow::{bail, Result};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub import_command: Option<String>,
    pub index_command: Option<String>,
    pub partitions: u32,
    pub owned_partitions: Vec<u32>,
    pub batch_size: usize,
    pub poll_interval_secs: u64,
    pub shutdown_timeout_secs: u64,
    /// `CRAWL=DIR` pairs.
    pub watches: Vec<String>,
    pub watch_interval_secs: u64,
    pub watch_min_file_age_secs: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub shutdown_timeout_secs: u64,

    pub importer: ImporterSettings,
    pub indexer: IndexerSettings,
}

#[derive(Debug, Clone)]
pub struct ImporterSettings {
    /// `None` disables the importer.
    pub command: Option<ExternalCommand>,
    pub poll_interval_secs: u64,
    /// Empty disables the watch importer.
    pub watches: Vec<WatchDir>,
    pub watch_interval_secs: u64,
    /// Files younger than this are assumed to still be written.
    pub watch_min_file_age_secs: u64,
}

impl Default for ImporterSettings {
    fn default() -> Self {
        Self {
            command: None,
            poll_interval_secs: 60,
            watches: Vec::new(),
            watch_interval_secs: 60,
            watch_min_file_age_secs: 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexerSettings {
    /// `None` disables indexing.
    pub command: Option<ExternalCommand>,
    /// Number of modulo partitions the record stream is split into.
    pub partitions: u32,
    /// Partitions this process drives. Sorted, without duplicates.
    pub owned_partitions: Vec<u32>,
    pub batch_size: usize,
    pub poll_interval_secs: u64,
    pub retry: RetrySettings,
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self {
            command: None,
            partitions: 1,
            owned_partitions: vec![0],
            batch_size: 1000,
            poll_interval_secs: 60,
            retry: RetrySettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 8,
            initial_backoff_secs: 60,
            max_backoff_secs: 86400, // 24 hours
            backoff_multiplier: 2.5,
        }
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        // Validate db_dir exists
        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let shutdown_timeout_secs = file
            .shutdown_timeout_secs
            .unwrap_or(cli.shutdown_timeout_secs);

        let importer_file = file.importer.unwrap_or_default();
        let watches = match importer_file.watch {
            Some(watches) => watches
                .into_iter()
                .map(|w| WatchDir {
                    crawl_name: w.crawl,
                    dir: PathBuf::from(w.dir),
                })
                .collect(),
            None => cli
                .watches
                .iter()
                .map(|arg| parse_watch_arg(arg))
                .collect::<Result<Vec<_>>>()?,
        };
        validate_watches(&watches)?;
        let importer = ImporterSettings {
            command: parse_command(importer_file.command.or_else(|| cli.import_command.clone()))?,
            poll_interval_secs: importer_file
                .poll_interval_secs
                .unwrap_or(cli.poll_interval_secs),
            watches,
            watch_interval_secs: importer_file
                .watch_interval_secs
                .unwrap_or(cli.watch_interval_secs),
            watch_min_file_age_secs: importer_file
                .watch_min_file_age_secs
                .unwrap_or(cli.watch_min_file_age_secs),
        };

        let indexer_file = file.indexer.unwrap_or_default();
        let partitions = indexer_file.partitions.unwrap_or(cli.partitions);
        if partitions == 0 {
            bail!("partitions must be at least 1");
        }
        let owned_partitions = resolve_owned_partitions(
            partitions,
            indexer_file
                .owned_partitions
                .unwrap_or_else(|| cli.owned_partitions.clone()),
        )?;

        let batch_size = indexer_file.batch_size.unwrap_or(cli.batch_size);
        if batch_size == 0 {
            bail!("batch_size must be at least 1");
        }

        let retry_defaults = RetrySettings::default();
        let retry = RetrySettings {
            max_retries: indexer_file
                .max_retries
                .unwrap_or(retry_defaults.max_retries),
            initial_backoff_secs: indexer_file
                .initial_backoff_secs
                .unwrap_or(retry_defaults.initial_backoff_secs),
            max_backoff_secs: indexer_file
                .max_backoff_secs
                .unwrap_or(retry_defaults.max_backoff_secs),
            backoff_multiplier: indexer_file
                .backoff_multiplier
                .unwrap_or(retry_defaults.backoff_multiplier),
        };
        if retry.backoff_multiplier.is_nan() || retry.backoff_multiplier < 1.0 {
            bail!(
                "backoff_multiplier must be at least 1.0, got {}",
                retry.backoff_multiplier
            );
        }
        if retry.max_backoff_secs < retry.initial_backoff_secs {
            bail!("max_backoff_secs must not be lower than initial_backoff_secs");
        }

        let indexer = IndexerSettings {
            command: parse_command(indexer_file.command.or_else(|| cli.index_command.clone()))?,
            partitions,
            owned_partitions,
            batch_size,
            poll_interval_secs: indexer_file
                .poll_interval_secs
                .unwrap_or(cli.poll_interval_secs),
            retry,
        };

        if importer.command.is_none() && indexer.command.is_none() {
            bail!("Nothing to run: set an import command, an index command, or both");
        }
        if importer.command.is_none() && !importer.watches.is_empty() {
            bail!("Watched directories need an import command to import their crawls");
        }

        Ok(Self {
            db_dir,
            shutdown_timeout_secs,
            importer,
            indexer,
        })
    }

    pub fn task_db_path(&self) -> PathBuf {
        self.db_dir.join("tasks.db")
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Blank means not configured.
fn parse_command(command_line: Option<String>) -> Result<Option<ExternalCommand>> {
    match command_line {
        Some(line) if !line.trim().is_empty() => Ok(Some(ExternalCommand::parse(&line)?)),
        _ => Ok(None),
    }
}

/// Parses a `CRAWL=DIR` watch argument.
fn parse_watch_arg(arg: &str) -> Result<WatchDir> {
    match arg.split_once('=') {
        Some((crawl, dir)) if !crawl.trim().is_empty() && !dir.trim().is_empty() => Ok(WatchDir {
            crawl_name: crawl.trim().to_string(),
            dir: PathBuf::from(dir.trim()),
        }),
        _ => bail!("Invalid watch '{}', expected CRAWL=DIR", arg),
    }
}

fn validate_watches(watches: &[WatchDir]) -> Result<()> {
    let mut seen = HashSet::new();
    for watch in watches {
        if watch.crawl_name.trim().is_empty() {
            bail!("Watch directory {:?} has an empty crawl name", watch.dir);
        }
        if !watch.dir.is_dir() {
            bail!("Watch directory does not exist: {:?}", watch.dir);
        }
        if !seen.insert(&watch.dir) {
            bail!("Watch directory {:?} listed more than once", watch.dir);
        }
    }
    Ok(())
}

/// Empty means every partition.
fn resolve_owned_partitions(partitions: u32, owned: Vec<u32>) -> Result<Vec<u32>> {
    if owned.is_empty() {
        return Ok((0..partitions).collect());
    }
    let mut seen = HashSet::new();
    for key in &owned {
        if *key >= partitions {
            bail!(
                "Owned partition {} out of range for {} partitions",
                key,
                partitions
            );
        }
        if !seen.insert(*key) {
            bail!("Partition {} listed more than once", key);
        }
    }
    let mut owned = owned;
    owned.sort_unstable();
    Ok(owned)
}

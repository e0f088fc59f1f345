use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub shutdown_timeout_secs: Option<u64>,

    // Worker configs
    pub importer: Option<ImporterConfig>,
    pub indexer: Option<IndexerConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ImporterConfig {
    /// Program run once per crawl, with the crawl id appended.
    pub command: Option<String>,
    pub poll_interval_secs: Option<u64>,
    // Watched warc directories
    pub watch: Option<Vec<WatchConfig>>,
    pub watch_interval_secs: Option<u64>,
    pub watch_min_file_age_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct WatchConfig {
    /// Crawl the directory's warcs are staged under.
    pub crawl: String,
    pub dir: String,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct IndexerConfig {
    /// Program run once per record, with the record id appended.
    pub command: Option<String>,
    pub partitions: Option<u32>,
    pub owned_partitions: Option<Vec<u32>>,
    pub batch_size: Option<usize>,
    pub poll_interval_secs: Option<u64>,
    // Poison record retries
    pub max_retries: Option<u32>,
    pub initial_backoff_secs: Option<u64>,
    pub max_backoff_secs: Option<u64>,
    pub backoff_multiplier: Option<f64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

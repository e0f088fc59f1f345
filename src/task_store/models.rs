use chrono::{DateTime, Utc};

// =============================================================================
// Crawls
// =============================================================================

/// Lifecycle state of a crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrawlState {
    /// Imported and available to indexers.
    Archived,
    /// Waiting for the importer to pick it up.
    Importing,
    /// An operator gave up on importing it.
    ImportFailed,
}

impl CrawlState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlState::Archived => "archived",
            CrawlState::Importing => "importing",
            CrawlState::ImportFailed => "import_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "archived" => Some(CrawlState::Archived),
            "importing" => Some(CrawlState::Importing),
            "import_failed" => Some(CrawlState::ImportFailed),
            _ => None,
        }
    }
}

impl std::fmt::Display for CrawlState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Crawl {
    pub id: i64,
    pub name: String,
    pub state: CrawlState,
    pub created_at: DateTime<Utc>,
}

/// Warcs newly registered under a crawl by [`super::WarcStore::stage_warcs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedWarcs {
    pub crawl_id: i64,
    /// Ids of the inserted warcs, in the order their filenames were given.
    pub added: Vec<i64>,
}

// =============================================================================
// Indexing progress
// =============================================================================

/// Entry in the poison-record ledger.
///
/// Present while a record has been scanned past but not yet indexed
/// successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoisonRecord {
    pub record_id: i64,
    /// Number of failed attempts so far. The first failure stores 1.
    pub retry_count: u32,
    pub last_error_time: DateTime<Utc>,
}

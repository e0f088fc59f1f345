use super::ImportExecutor;
use crate::command::ExternalCommand;
use crate::task_store::{CrawlState, CrawlStore};
use anyhow::Context;
use std::sync::Arc;
use tracing::info;

/// Imports a crawl by running an external program with the crawl id, then
/// marks the crawl archived.
pub struct CommandImportExecutor {
    command: ExternalCommand,
    crawls: Arc<dyn CrawlStore>,
}

impl CommandImportExecutor {
    pub fn new(command: ExternalCommand, crawls: Arc<dyn CrawlStore>) -> Self {
        Self { command, crawls }
    }
}

impl ImportExecutor for CommandImportExecutor {
    fn import(&self, crawl_id: i64) -> anyhow::Result<()> {
        self.command.run_for(crawl_id)?;
        self.crawls
            .set_crawl_state(crawl_id, CrawlState::Archived)
            .with_context(|| format!("Failed to archive crawl {}", crawl_id))?;
        info!("Crawl {} archived", crawl_id);
        Ok(())
    }
}

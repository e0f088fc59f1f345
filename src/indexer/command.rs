use super::partitioned_indexer::RecordIndexer;
use crate::command::ExternalCommand;

/// Indexes each record by running an external program with the record id.
#[derive(Debug, Clone)]
pub struct CommandRecordIndexer {
    command: ExternalCommand,
}

impl CommandRecordIndexer {
    pub fn new(command: ExternalCommand) -> Self {
        Self { command }
    }
}

impl RecordIndexer for CommandRecordIndexer {
    fn index(&self, record_id: i64) -> anyhow::Result<()> {
        self.command.run_for(record_id)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status_decides_outcome() {
        let ok = CommandRecordIndexer::new(ExternalCommand::new("true", vec![]));
        let failing = CommandRecordIndexer::new(ExternalCommand::new("false", vec![]));

        assert!(ok.index(1).is_ok());
        assert!(failing.index(1).is_err());
    }
}

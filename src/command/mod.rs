//! External programs that carry the per-item business logic.
//!
//! The import and indexing workers hand each crawl or record id to a
//! configured command line; the program's exit status decides success.

use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::debug;

/// Errors from running an external executor.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
}

/// A program plus fixed leading arguments. The item id is appended last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ExternalCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Splits a command line with shell quoting rules.
    pub fn parse(command_line: &str) -> anyhow::Result<Self> {
        let parts = shlex::split(command_line)
            .ok_or_else(|| anyhow::anyhow!("Unbalanced quotes in command: {}", command_line))?;
        let Some((program, args)) = parts.split_first() else {
            anyhow::bail!("Command line is empty");
        };
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    /// Runs the command with `id` as its final argument and waits for it.
    pub fn run_for(&self, id: i64) -> Result<(), ExecutorError> {
        debug!("Running {} {:?} {}", self.program, self.args, id);
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(id.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| ExecutorError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExecutorError::Failed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}

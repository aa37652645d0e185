//! Run shell commands inside a destination directory.
//!
//! The only thing added to the caller's command is a change into the
//! directory. Non-zero exit codes are returned to the caller unless strict
//! mode is on.

use super::{CommandOutput, Connection, OutputChunk};
use crate::sync::apply::shell_quote;
use crate::utils::errors::Result;

#[derive(Debug, Clone)]
pub struct RemoteCommandRunner {
    connection: Connection,
    directory: String,
    strict: bool,
}

impl RemoteCommandRunner {
    pub fn new(connection: Connection, directory: impl Into<String>) -> Self {
        Self {
            connection,
            directory: directory.into(),
            strict: false,
        }
    }

    /// Fail with `SyncError::RemoteCommand` on a non-zero exit code.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn directory(&self) -> &str {
        &self.directory
    }

    /// The full command text sent to the remote shell.
    pub fn command_text(&self, user_command: &str) -> String {
        format!("cd {} || exit 1; {}", shell_quote(&self.directory), user_command)
    }

    pub async fn run(&self, user_command: &str) -> Result<CommandOutput> {
        let command = self.command_text(user_command);
        tracing::debug!("Running remote command: {}", command);

        let output = self.connection.exec(command).await?;
        self.finish(output)
    }

    /// Like `run`, relaying output chunks to `sink` while the command runs.
    pub async fn run_streaming<S>(&self, user_command: &str, sink: S) -> Result<CommandOutput>
    where
        S: Fn(OutputChunk) + Send + 'static,
    {
        let command = self.command_text(user_command);
        tracing::debug!("Running remote command (streaming): {}", command);

        let output = self.connection.exec_streaming(command, sink).await?;
        self.finish(output)
    }

    fn finish(&self, output: CommandOutput) -> Result<CommandOutput> {
        if !output.success() {
            tracing::warn!(
                "Remote command exited with {}: {}",
                output.exit_code,
                output.stderr.trim()
            );
        }

        if self.strict {
            output.check()
        } else {
            Ok(output)
        }
    }
}

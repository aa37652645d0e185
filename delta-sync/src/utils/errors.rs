//! Error types for the sync engine.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Source directory not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("Cannot connect to {target}: {message}")]
    Connectivity { target: String, message: String },

    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("Remote manifest unavailable: {0}")]
    ManifestUnavailable(String),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Remote command failed with exit code {exit_code}: {command}\n{stderr}")]
    RemoteCommand {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("{source}\n\nExecuted steps:\n{}", .steps.join("\n"))]
    Aborted {
        steps: Vec<String>,
        #[source]
        source: Box<SyncError>,
    },
}

impl SyncError {
    /// Steps recorded before the failure, empty unless the error is `Aborted`.
    pub fn steps(&self) -> &[String] {
        match self {
            SyncError::Aborted { steps, .. } => steps,
            _ => &[],
        }
    }

    /// The underlying error with any `Aborted` wrapping removed.
    pub fn root(&self) -> &SyncError {
        match self {
            SyncError::Aborted { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aborted_lists_executed_steps() {
        let err = SyncError::Aborted {
            steps: vec!["Connect".to_string(), "Upload archive".to_string()],
            source: Box::new(SyncError::Transfer("broken pipe".to_string())),
        };

        let text = err.to_string();
        assert!(text.starts_with("Transfer error: broken pipe"));
        assert!(text.contains("Executed steps:\nConnect\nUpload archive"));
        assert_eq!(err.steps().len(), 2);
        assert!(matches!(err.root(), SyncError::Transfer(_)));
    }

    #[test]
    fn test_remote_command_display() {
        let err = SyncError::RemoteCommand {
            command: "tar -xzf x".to_string(),
            exit_code: 2,
            stdout: String::new(),
            stderr: "not in gzip format".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Remote command failed with exit code 2: tar -xzf x\nnot in gzip format"
        );
        assert!(err.steps().is_empty());
    }
}

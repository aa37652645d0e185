//! Remote sessions: command execution and bulk file transfer.
//!
//! A session is any backend implementing [`RemoteSession`]: SSH (with SFTP
//! or SCP transfer) or a local directory. Sessions are blocking; the
//! [`Connection`] handle serializes access and moves every call onto the
//! blocking thread pool.

pub mod local;
pub mod manager;
pub mod runner;
pub mod ssh;

pub use local::LocalSession;
pub use manager::{ConnectionManager, Connector, LocalConnector, SshConnector};
pub use runner::RemoteCommandRunner;
pub use ssh::SshSession;

use crate::utils::errors::{Result, SyncError};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// How to authenticate
#[derive(Clone, PartialEq, Eq)]
pub enum Auth {
    Password(String),
    KeyFile {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::Password(_) => f.write_str("Password(***)"),
            Auth::KeyFile { path, .. } => f.debug_struct("KeyFile").field("path", path).finish(),
        }
    }
}

/// Where and as whom to connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: Auth,
}

impl ConnectionTarget {
    pub fn key(&self) -> ConnectionKey {
        ConnectionKey {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
        }
    }
}

/// Sessions are cached per (host, port, username)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub host: String,
    pub port: u16,
    pub username: String,
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

/// Bulk transfer mechanism of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransferProtocol {
    Sftp,
    Scp,
    Local,
}

impl fmt::Display for TransferProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferProtocol::Sftp => "SFTP",
            TransferProtocol::Scp => "SCP",
            TransferProtocol::Local => "local copy",
        };
        f.write_str(name)
    }
}

/// Which stream a chunk of command output came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Output relayed while a command is still running
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: OutputStream,
    pub text: String,
}

/// Result of a finished remote command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit status into `SyncError::RemoteCommand`.
    pub fn check(self) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(SyncError::RemoteCommand {
                command: self.command,
                exit_code: self.exit_code,
                stdout: self.stdout,
                stderr: self.stderr,
            })
        }
    }
}

/// Moves whole files to and from the remote side
pub trait FileTransfer: Send {
    fn protocol(&self) -> TransferProtocol;

    fn download(&mut self, remote_path: &str) -> Result<Vec<u8>>;

    fn upload(&mut self, remote_path: &str, data: &[u8]) -> Result<()>;
}

/// An authenticated session able to run commands and transfer files
pub trait RemoteSession: Send {
    /// `user@host:port` or similar, for messages
    fn describe(&self) -> String;

    /// Run `command`, calling `on_output` for output as it arrives.
    fn exec_streaming(&mut self, command: &str, on_output: &mut dyn FnMut(OutputChunk)) -> Result<CommandOutput>;

    /// Run `command` and collect its output.
    fn exec(&mut self, command: &str) -> Result<CommandOutput> {
        self.exec_streaming(command, &mut |_| {})
    }

    fn transfer(&mut self) -> &mut dyn FileTransfer;
}

/// Shared handle to one session
///
/// Clones refer to the same session; calls are serialized.
#[derive(Clone)]
pub struct Connection {
    key: ConnectionKey,
    protocol: TransferProtocol,
    description: String,
    session: Arc<Mutex<Box<dyn RemoteSession>>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("key", &self.key)
            .field("protocol", &self.protocol)
            .finish()
    }
}

impl Connection {
    pub fn new(key: ConnectionKey, mut session: Box<dyn RemoteSession>) -> Self {
        let protocol = session.transfer().protocol();
        let description = session.describe();
        Self {
            key,
            protocol,
            description,
            session: Arc::new(Mutex::new(session)),
        }
    }

    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    pub fn protocol(&self) -> TransferProtocol {
        self.protocol
    }

    pub fn describe(&self) -> &str {
        &self.description
    }

    /// Run `f` with exclusive access to the session on a blocking thread.
    pub async fn with_session<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn RemoteSession) -> Result<T> + Send + 'static,
    {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || {
            let mut guard = session
                .lock()
                .map_err(|_| SyncError::Session("session poisoned by an earlier panic".to_string()))?;
            f(&mut **guard)
        })
        .await?
    }

    pub async fn exec(&self, command: String) -> Result<CommandOutput> {
        self.with_session(move |session| session.exec(&command)).await
    }

    pub async fn exec_streaming<S>(&self, command: String, sink: S) -> Result<CommandOutput>
    where
        S: Fn(OutputChunk) + Send + 'static,
    {
        self.with_session(move |session| session.exec_streaming(&command, &mut |chunk| sink(chunk)))
            .await
    }

    pub async fn download(&self, remote_path: String) -> Result<Vec<u8>> {
        self.with_session(move |session| session.transfer().download(&remote_path)).await
    }

    pub async fn upload(&self, remote_path: String, data: Vec<u8>) -> Result<()> {
        self.with_session(move |session| session.transfer().upload(&remote_path, &data)).await
    }
}

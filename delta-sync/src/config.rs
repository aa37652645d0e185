//! Configuration management for delta-sync.
//!
//! Loads configuration from a TOML file; the password may be overridden from
//! the environment. Batch files use the `host;port;user;password;source;destination`
//! line format and are grouped by connection.

use crate::remote::{Auth, ConnectionKey, ConnectionTarget};
use crate::utils::errors::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Environment variable overriding `connection.password`.
pub const PASSWORD_ENV: &str = "DELTA_SYNC_PASSWORD";

pub const DEFAULT_PORT: u16 = 22;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub log: LogConfig,

    /// Directories to deploy, in order
    #[serde(default)]
    pub targets: Vec<TargetConfig>,

    #[serde(default)]
    pub scripts: ScriptConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub username: String,

    #[serde(default)]
    pub password: Option<String>,

    /// Private key used instead of the password when set
    #[serde(default)]
    pub private_key_file: Option<PathBuf>,

    #[serde(default)]
    pub passphrase: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Delete remote files that no longer exist locally
    #[serde(default = "default_true")]
    pub remove_old_files: bool,

    /// Prefix output lines with elapsed times
    #[serde(default = "default_true")]
    pub print_timings: bool,

    /// Remove the uploaded archive and deletion list after applying them
    #[serde(default = "default_true")]
    pub remove_temp_files: bool,

    /// Concurrent metadata lookups while building the local manifest
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Prefix of the bookkeeping file names in the destination directory
    #[serde(default)]
    pub cache_prefix: String,

    /// Names to leave out of the local manifest (substring match)
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Local directory to deploy
    pub source: PathBuf,

    /// Remote directory receiving the files
    pub destination: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// Run before deploying, e.g. to stop a previous instance; failures are only logged
    #[serde(default)]
    pub pre_run: Option<String>,

    /// Run after deploying with output streamed back
    #[serde(default)]
    pub launch: Option<String>,

    /// Directory the scripts run in (defaults to the first target's destination)
    #[serde(default)]
    pub working_directory: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    crate::sync::local::DEFAULT_CONCURRENCY
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            remove_old_files: true,
            print_timings: true,
            remove_temp_files: true,
            concurrency: default_concurrency(),
            cache_prefix: String::new(),
            exclude: Vec::new(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            username: String::new(),
            password: None,
            private_key_file: None,
            passphrase: None,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("private_key_file", &self.private_key_file)
            .finish()
    }
}

impl ConnectionConfig {
    /// Resolve the authentication method, preferring the key file.
    pub fn target(&self) -> Result<ConnectionTarget> {
        if self.host.trim().is_empty() {
            return Err(SyncError::Config("connection.host is empty".to_string()));
        }
        if self.username.trim().is_empty() {
            return Err(SyncError::Config("connection.username is empty".to_string()));
        }

        let auth = match (&self.private_key_file, &self.password) {
            (Some(key_file), _) => Auth::KeyFile {
                path: key_file.clone(),
                passphrase: self.passphrase.clone(),
            },
            (None, Some(password)) => Auth::Password(password.clone()),
            (None, None) => {
                return Err(SyncError::Config(
                    "either connection.password or connection.private_key_file is required".to_string(),
                ))
            }
        };

        Ok(ConnectionTarget {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            auth,
        })
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| SyncError::Config(e.to_string()))
    }

    /// Replace the password with `DELTA_SYNC_PASSWORD` when it is set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            self.connection.password = Some(password);
        }
    }

    /// Directory scripts run in.
    pub fn script_directory(&self) -> Option<&str> {
        self.scripts
            .working_directory
            .as_deref()
            .or_else(|| self.targets.first().map(|t| t.destination.as_str()))
    }
}

/// One line of a batch file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub target: ConnectionTarget,
    pub deploy: TargetConfig,
}

/// Parse `host;port;user;password;source;destination`.
///
/// Lines with fewer than six fields yield `None`. An unparsable port falls
/// back to 22.
pub fn parse_batch_line(line: &str, separator: char) -> Option<BatchEntry> {
    let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split(separator).collect();
    if fields.len() < 6 {
        return None;
    }

    let port = fields[1].trim().parse().unwrap_or(DEFAULT_PORT);

    Some(BatchEntry {
        target: ConnectionTarget {
            host: fields[0].trim().to_string(),
            port,
            username: fields[2].trim().to_string(),
            auth: Auth::Password(fields[3].to_string()),
        },
        deploy: TargetConfig {
            source: PathBuf::from(fields[4].trim()),
            destination: fields[5].trim().to_string(),
        },
    })
}

/// Group batch lines by connection key, keeping first-seen order.
///
/// The first line of a group provides the credentials for the whole group.
pub fn group_batch<'a, I>(lines: I) -> Vec<(ConnectionTarget, Vec<TargetConfig>)>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut groups: Vec<(ConnectionKey, ConnectionTarget, Vec<TargetConfig>)> = Vec::new();

    for entry in lines.into_iter().filter_map(|line| parse_batch_line(line, ';')) {
        let key = entry.target.key();
        match groups.iter_mut().find(|(k, _, _)| *k == key) {
            Some((_, _, deploys)) => deploys.push(entry.deploy),
            None => groups.push((key, entry.target, vec![entry.deploy])),
        }
    }

    groups
        .into_iter()
        .map(|(_, target, deploys)| (target, deploys))
        .collect()
}

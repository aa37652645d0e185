//! Delta Sync Library
//!
//! Manifest-based delta synchronization of a local directory to a remote
//! target over SSH: fingerprint, diff, upload one compressed archive, then
//! apply the change set with a single fail-fast remote command.

pub mod config;
pub mod executor;
pub mod fs;
pub mod remote;
pub mod sync;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use executor::{DeltaSync, SyncOutcome, SyncPhase, SyncReport};
pub use remote::{Connection, ConnectionManager, ConnectionTarget};
pub use utils::errors::SyncError;
pub type Result<T> = std::result::Result<T, SyncError>;

//! Utility modules for delta-sync.

pub mod errors;
pub mod logger;
pub mod output;

pub use errors::{Result, SyncError};
pub use output::{LineSink, SyncLog};

//! File system operations: directory walking and file fingerprints.

pub mod metadata;
pub mod walker;

pub use metadata::FileFingerprint;
pub use walker::{walk_directory, WalkOptions, WalkedFile};

//! File fingerprints used for change detection.
//!
//! A fingerprint is the pair (last write time, size) keyed by the file's
//! relative path. Timestamps are stored as ticks: 100 ns intervals since
//! 0001-01-01T00:00:00Z, which is what the on-disk manifest format carries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, Metadata};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Ticks at 1970-01-01T00:00:00Z.
pub const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

/// Metadata of one file, as recorded in a manifest
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileFingerprint {
    /// Path relative to the synced root, forward slashes, no leading slash
    pub relative_path: String,

    /// Last write time in ticks (UTC)
    pub last_modified: i64,

    /// File size in bytes
    pub size: u64,
}

impl FileFingerprint {
    pub fn new(relative_path: impl Into<String>, last_modified: i64, size: u64) -> Self {
        Self {
            relative_path: relative_path.into(),
            last_modified,
            size,
        }
    }

    /// Capture the fingerprint from already loaded metadata
    pub fn from_metadata(relative_path: impl Into<String>, metadata: &Metadata) -> std::io::Result<Self> {
        Ok(Self::new(
            relative_path,
            ticks_from_system_time(metadata.modified()?),
            metadata.len(),
        ))
    }

    /// Capture the fingerprint of a file on disk (symlinks are followed)
    pub fn from_path(relative_path: impl Into<String>, path: &Path) -> std::io::Result<Self> {
        let metadata = fs::metadata(path)?;
        Self::from_metadata(relative_path, &metadata)
    }

    /// True when both timestamp and size match exactly.
    pub fn is_unchanged(&self, other: &FileFingerprint) -> bool {
        self.last_modified == other.last_modified && self.size == other.size
    }

    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        ticks_to_datetime(self.last_modified)
    }
}

/// Convert a system time to ticks, keeping 100 ns precision.
pub fn ticks_from_system_time(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => UNIX_EPOCH_TICKS.saturating_add(duration_ticks(after)),
        Err(before) => UNIX_EPOCH_TICKS.saturating_sub(duration_ticks(before.duration())),
    }
}

fn duration_ticks(duration: std::time::Duration) -> i64 {
    let secs = i64::try_from(duration.as_secs()).unwrap_or(i64::MAX);
    secs.saturating_mul(TICKS_PER_SECOND)
        .saturating_add(i64::from(duration.subsec_nanos() / 100))
}

pub fn ticks_to_datetime(ticks: i64) -> Option<DateTime<Utc>> {
    let since_epoch = ticks.checked_sub(UNIX_EPOCH_TICKS)?;
    let secs = since_epoch.div_euclid(TICKS_PER_SECOND);
    let nanos = since_epoch.rem_euclid(TICKS_PER_SECOND) * 100;
    DateTime::from_timestamp(secs, nanos as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    #[test]
    fn test_unix_epoch_ticks() {
        assert_eq!(ticks_from_system_time(UNIX_EPOCH), UNIX_EPOCH_TICKS);

        let later = UNIX_EPOCH + Duration::new(1, 250);
        // 250 ns is truncated to 2 ticks
        assert_eq!(ticks_from_system_time(later), UNIX_EPOCH_TICKS + TICKS_PER_SECOND + 2);

        let earlier = UNIX_EPOCH - Duration::from_secs(1);
        assert_eq!(ticks_from_system_time(earlier), UNIX_EPOCH_TICKS - TICKS_PER_SECOND);
    }

    #[test]
    fn test_ticks_to_datetime() {
        let dt = ticks_to_datetime(UNIX_EPOCH_TICKS + 15 * TICKS_PER_SECOND + 5).unwrap();
        assert_eq!(dt.timestamp(), 15);
        assert_eq!(dt.timestamp_subsec_nanos(), 500);

        let before_epoch = ticks_to_datetime(UNIX_EPOCH_TICKS - 5).unwrap();
        assert_eq!(before_epoch.timestamp(), -1);
    }

    #[test]
    fn test_fingerprint_from_file() -> std::io::Result<()> {
        let mut temp_file = NamedTempFile::new()?;
        temp_file.write_all(b"test content")?;
        temp_file.flush()?;

        let fingerprint = FileFingerprint::from_path("dir/file.bin", temp_file.path())?;

        assert_eq!(fingerprint.relative_path, "dir/file.bin");
        assert_eq!(fingerprint.size, 12);
        assert!(fingerprint.last_modified > UNIX_EPOCH_TICKS);
        assert!(fingerprint.modified_at().is_some());

        Ok(())
    }

    #[test]
    fn test_unchanged_requires_both_fields() {
        let base = FileFingerprint::new("a.txt", 100, 10);

        assert!(base.is_unchanged(&FileFingerprint::new("a.txt", 100, 10)));
        assert!(!base.is_unchanged(&FileFingerprint::new("a.txt", 101, 10)));
        assert!(!base.is_unchanged(&FileFingerprint::new("a.txt", 100, 11)));
    }
}

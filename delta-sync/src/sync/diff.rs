//! Diff between the local manifest and the manifest of the previous sync.

use crate::executor::manifest::{LocalManifest, RemoteManifest};
use crate::fs::walker::is_safe_relative_path;
use crate::fs::FileFingerprint;
use serde::Serialize;

/// Remote files that no longer exist locally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionList {
    paths: Vec<String>,
}

impl DeletionList {
    pub fn push(&mut self, relative_path: impl Into<String>) {
        self.paths.push(relative_path.into());
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// UTF-8 text, one path per line, every line terminated by `\n`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for path in &self.paths {
            out.extend_from_slice(path.as_bytes());
            out.push(b'\n');
        }
        out
    }
}

/// Counters describing a diff, used for the progress output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffStats {
    pub remote_files: usize,
    pub remote_bytes: u64,
    pub delete_files: usize,
    pub delete_bytes: u64,
    pub up_to_date_files: usize,
    pub up_to_date_bytes: u64,
    pub changed_files: usize,
    pub changed_bytes: u64,
    pub local_files: usize,
    pub local_bytes: u64,
}

/// Result of comparing local and remote manifests
#[derive(Debug, Clone, Default)]
pub struct SyncDiff {
    /// Local files that are new or whose fingerprint differs, in path order
    pub change_set: Vec<FileFingerprint>,
    /// Remote files without a local counterpart
    pub deletion_list: DeletionList,
    pub stats: DiffStats,
}

impl SyncDiff {
    /// Nothing to upload and nothing to delete
    pub fn is_empty(&self) -> bool {
        self.change_set.is_empty() && self.deletion_list.is_empty()
    }
}

/// Compare the local manifest with the previous remote manifest.
///
/// Sync equality is exact on both last write time and size; any difference
/// forces a re-upload.
pub fn diff_manifests(local: &LocalManifest, remote: &RemoteManifest) -> SyncDiff {
    let mut diff = SyncDiff::default();

    for remote_entry in remote {
        diff.stats.remote_files += 1;
        diff.stats.remote_bytes += remote_entry.size;

        match local.get(&remote_entry.relative_path) {
            None if !is_safe_relative_path(&remote_entry.relative_path) => {
                tracing::warn!(
                    "Not deleting {:?}: path from the remote manifest leaves the destination or breaks the deletion list",
                    remote_entry.relative_path
                );
            }
            None => {
                diff.stats.delete_files += 1;
                diff.stats.delete_bytes += remote_entry.size;
                diff.deletion_list.push(remote_entry.relative_path.clone());
            }
            Some(local_entry) if local_entry.is_unchanged(remote_entry) => {
                diff.stats.up_to_date_files += 1;
                diff.stats.up_to_date_bytes += remote_entry.size;
            }
            Some(_) => {}
        }
    }

    for local_entry in local {
        diff.stats.local_files += 1;
        diff.stats.local_bytes += local_entry.size;

        let up_to_date = remote
            .get(&local_entry.relative_path)
            .is_some_and(|remote_entry| remote_entry.is_unchanged(local_entry));
        if !up_to_date {
            diff.stats.changed_files += 1;
            diff.stats.changed_bytes += local_entry.size;
            diff.change_set.push(local_entry.clone());
        }
    }

    diff
}

//! The delta sync pipeline.
//!
//! - `local`: fingerprint the source tree
//! - `diff`: compare against the remote manifest
//! - `archive`: pack the change set and plan the uploads
//! - `apply`: build the single remote command that applies everything

pub mod apply;
pub mod archive;
pub mod diff;
pub mod local;

pub use apply::{apply_script, RemoteScript, RemoteStep};
pub use archive::{build_archive, next_manifest, plan_uploads, ApplyPlan, ArchiveBuild, PendingUpload, SkippedFile, UploadPlan};
pub use diff::{diff_manifests, DeletionList, DiffStats, SyncDiff};
pub use local::build_local_manifest;

/// File names used inside the destination directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteNames {
    prefix: String,
}

impl RemoteNames {
    pub const ARCHIVE: &'static str = "compressedUploadDiffContent.tar.gz";

    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn deletion_list(&self) -> String {
        format!("{}.deletedFilesList.cache", self.prefix)
    }

    pub fn manifest(&self) -> String {
        format!("{}.uploadCache.cache", self.prefix)
    }

    pub fn manifest_tmp(&self) -> String {
        format!("{}.uploadCache.cache.tmp", self.prefix)
    }

    pub fn archive(&self) -> String {
        Self::ARCHIVE.to_string()
    }

    /// True for the bookkeeping files the sync itself places in the destination.
    pub fn is_internal(&self, relative_path: &str) -> bool {
        relative_path == self.deletion_list()
            || relative_path == self.manifest()
            || relative_path == self.manifest_tmp()
            || relative_path == Self::ARCHIVE
    }
}

/// Join a destination directory and a file name with a forward slash.
pub fn remote_path(directory: &str, name: &str) -> String {
    let directory = directory.trim_end_matches('/');
    if directory.is_empty() {
        name.to_string()
    } else {
        format!("{directory}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_names() {
        let names = RemoteNames::default();
        assert_eq!(names.deletion_list(), ".deletedFilesList.cache");
        assert_eq!(names.manifest(), ".uploadCache.cache");
        assert_eq!(names.manifest_tmp(), ".uploadCache.cache.tmp");
        assert_eq!(names.archive(), "compressedUploadDiffContent.tar.gz");
    }

    #[test]
    fn test_prefixed_names() {
        let names = RemoteNames::new("app");
        assert_eq!(names.manifest(), "app.uploadCache.cache");
        assert!(names.is_internal("app.uploadCache.cache.tmp"));
        assert!(!names.is_internal(".uploadCache.cache"));
    }

    #[test]
    fn test_remote_path() {
        assert_eq!(remote_path("/opt/app/", "x"), "/opt/app/x");
        assert_eq!(remote_path("/opt/app", "x"), "/opt/app/x");
        assert_eq!(remote_path("", "x"), "x");
    }
}

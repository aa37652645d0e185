//! Archive building and upload planning.
//!
//! The change set is packed into one in-memory tar.gz. Nothing touches the
//! remote working manifest here: the new manifest is uploaded under its
//! temporary name and only renamed into place by the apply step.

use super::diff::SyncDiff;
use super::RemoteNames;
use crate::executor::manifest::{LocalManifest, Manifest, RemoteManifest};
use crate::fs::FileFingerprint;
use crate::utils::errors::Result;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use std::fs::File;
use std::path::Path;

/// A change set file that could not be read and was left out of the archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub relative_path: String,
    pub error: String,
}

/// Output of `build_archive`
#[derive(Debug, Default)]
pub struct ArchiveBuild {
    /// Compressed tar bytes
    pub archive: Vec<u8>,
    pub archived_files: usize,
    pub archived_bytes: u64,
    pub skipped: Vec<SkippedFile>,
}

/// Remote actions the apply step has to perform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplyPlan {
    /// Extract the uploaded archive
    pub extract: bool,
    /// Process the uploaded deletion list
    pub delete: bool,
    /// Rename the temporary manifest into place
    pub replace_manifest: bool,
}

impl ApplyPlan {
    pub fn is_noop(&self) -> bool {
        !self.extract && !self.delete && !self.replace_manifest
    }
}

/// One file to upload into the destination directory
#[derive(Debug, Clone)]
pub struct PendingUpload {
    pub name: String,
    pub data: Vec<u8>,
    pub description: &'static str,
}

/// Ordered uploads plus the flags handed to the apply step
#[derive(Debug, Clone, Default)]
pub struct UploadPlan {
    pub uploads: Vec<PendingUpload>,
    pub apply: ApplyPlan,
}

/// Pack every change set file into a gzip compressed tar archive.
///
/// Entries are stored at their relative paths. A file that cannot be opened
/// is skipped and reported; it does not fail the build.
pub fn build_archive(root: &Path, change_set: &[FileFingerprint]) -> Result<ArchiveBuild> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    let mut build = ArchiveBuild::default();

    for entry in change_set {
        let path = root.join(&entry.relative_path);
        let appended = File::open(&path)
            .and_then(|mut file| builder.append_file(&entry.relative_path, &mut file));

        match appended {
            Ok(()) => {
                build.archived_files += 1;
                build.archived_bytes += entry.size;
            }
            Err(e) => {
                tracing::warn!("Skipping {}: {}", path.display(), e);
                build.skipped.push(SkippedFile {
                    relative_path: entry.relative_path.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    build.archive = builder.into_inner()?.finish()?;
    Ok(build)
}

/// The manifest to persist remotely after this run.
///
/// Skipped files keep whatever entry the previous manifest had (or none), so
/// the next run retries them instead of believing they are up to date.
pub fn next_manifest(local: &LocalManifest, remote: &RemoteManifest, skipped: &[SkippedFile]) -> Manifest {
    let mut manifest = local.clone();
    for skip in skipped {
        manifest.remove(&skip.relative_path);
        if let Some(previous) = remote.get(&skip.relative_path) {
            manifest.insert(previous.clone());
        }
    }
    manifest
}

/// Decide what to upload and which remote actions follow.
///
/// 1. a non-empty deletion list is uploaded first
/// 2. with changes, the new manifest goes up under its temporary name, then the archive
/// 3. with neither, nothing is uploaded
///
/// A deletion-only run also uploads the new manifest so that the deleted
/// paths drop out of it.
pub fn plan_uploads(
    diff: &SyncDiff,
    manifest: &Manifest,
    archive: Option<ArchiveBuild>,
    names: &RemoteNames,
) -> UploadPlan {
    let mut plan = UploadPlan::default();

    if !diff.deletion_list.is_empty() {
        plan.uploads.push(PendingUpload {
            name: names.deletion_list(),
            data: diff.deletion_list.to_bytes(),
            description: "Deleted file list",
        });
        plan.apply.delete = true;
    }

    if diff.is_empty() {
        return plan;
    }

    plan.uploads.push(PendingUpload {
        name: names.manifest_tmp(),
        data: manifest.encode(),
        description: "New remote file cache",
    });
    plan.apply.replace_manifest = true;

    if let Some(build) = archive.filter(|_| !diff.change_set.is_empty()) {
        plan.uploads.push(PendingUpload {
            name: names.archive(),
            data: build.archive,
            description: "Compressed file diff",
        });
        plan.apply.extract = true;
    }

    plan
}

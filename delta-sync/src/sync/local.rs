//! Local manifest construction.
//!
//! The tree is enumerated on a blocking thread, then each file is
//! fingerprinted by its own task. A semaphore bounds how many metadata calls
//! are in flight; results accumulate in a concurrent map keyed by path.

use crate::executor::manifest::LocalManifest;
use crate::fs::walker::{walk_directory, WalkOptions};
use crate::fs::FileFingerprint;
use crate::utils::errors::{Result, SyncError};
use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Default number of concurrent metadata lookups.
pub const DEFAULT_CONCURRENCY: usize = 16;

/// Fingerprint every regular file below `root`.
///
/// Fails with `SourceNotFound` if `root` does not exist or is not a
/// directory. Files that vanish between enumeration and fingerprinting are
/// left out with a warning.
pub async fn build_local_manifest(
    root: &Path,
    options: &WalkOptions,
    concurrency: usize,
) -> Result<LocalManifest> {
    if !root.is_dir() {
        return Err(SyncError::SourceNotFound(root.to_path_buf()));
    }

    let root_owned = root.to_path_buf();
    let walk_options = options.clone();
    let files = tokio::task::spawn_blocking(move || walk_directory(&root_owned, &walk_options))
        .await?
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SyncError::SourceNotFound(root.to_path_buf()),
            _ => SyncError::Io(e),
        })?;

    let fingerprints: Arc<DashMap<String, FileFingerprint>> = Arc::new(DashMap::with_capacity(files.len()));
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for file in files {
        let sem = Arc::clone(&semaphore);
        let map = Arc::clone(&fingerprints);

        tasks.spawn(async move {
            let Ok(_permit) = sem.acquire_owned().await else {
                return;
            };

            match tokio::fs::metadata(&file.path).await {
                Ok(metadata) => match FileFingerprint::from_metadata(file.relative_path.clone(), &metadata) {
                    Ok(fingerprint) => {
                        map.insert(file.relative_path, fingerprint);
                    }
                    Err(e) => tracing::warn!("No modification time for {}: {}", file.path.display(), e),
                },
                Err(e) => tracing::warn!("Skipping {}: {}", file.path.display(), e),
            }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        joined?;
    }

    let manifest: LocalManifest = fingerprints.iter().map(|entry| entry.value().clone()).collect();

    tracing::debug!(
        "Local manifest for {}: {} files, {} bytes",
        root.display(),
        manifest.len(),
        manifest.total_bytes()
    );

    Ok(manifest)
}

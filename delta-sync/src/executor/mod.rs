//! Sync executor - Orchestrates one directory deployment.
//!
//! Ties the pipeline together:
//! - Local manifest (fingerprints of the source tree)
//! - Remote manifest download and diff
//! - Archive build and ordered uploads
//! - A single fail-fast remote apply command

pub mod manifest;

pub use manifest::{LocalManifest, Manifest, RemoteManifest};

use crate::config::SyncSettings;
use crate::fs::WalkOptions;
use crate::remote::{Connection, RemoteCommandRunner};
use crate::sync::apply::shell_quote;
use crate::sync::{
    apply_script, build_archive, build_local_manifest, diff_manifests, next_manifest, plan_uploads, remote_path,
    DiffStats, RemoteNames, SkippedFile,
};
use crate::utils::errors::{Result, SyncError};
use crate::utils::output::{LineSink, SyncLog};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Where a sync currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    BuildingLocalManifest,
    DownloadingRemoteManifest,
    Diffing,
    Uploading,
    Applying,
    Done,
    Failed,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Idle => "idle",
            SyncPhase::BuildingLocalManifest => "building local manifest",
            SyncPhase::DownloadingRemoteManifest => "downloading remote manifest",
            SyncPhase::Diffing => "diffing",
            SyncPhase::Uploading => "uploading",
            SyncPhase::Applying => "applying",
            SyncPhase::Done => "done",
            SyncPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    NoChanges,
    DeleteOnly,
    Updated,
}

/// Summary of a finished sync
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub source: PathBuf,
    pub destination: String,
    pub outcome: SyncOutcome,
    pub stats: DiffStats,
    pub changed_paths: Vec<String>,
    pub deleted_paths: Vec<String>,
    pub skipped: Vec<SkippedFile>,
    pub archived_files: usize,
    pub archive_bytes: usize,
    pub uploaded_bytes: usize,
    pub duration_ms: u64,
}

/// Deploys local directories to one remote connection
///
/// Sequential deployments reuse the same connection. Each call to
/// [`DeltaSync::deploy_directory`] starts a fresh step trace.
pub struct DeltaSync {
    connection: Connection,
    settings: SyncSettings,
    names: RemoteNames,
    log: SyncLog,
    phase: SyncPhase,
}

impl fmt::Debug for DeltaSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeltaSync")
            .field("connection", &self.connection)
            .field("settings", &self.settings)
            .field("phase", &self.phase)
            .finish()
    }
}

impl DeltaSync {
    pub fn new(connection: Connection, settings: SyncSettings, sink: Option<LineSink>) -> Self {
        let names = RemoteNames::new(settings.cache_prefix.clone());
        let log = SyncLog::new(sink, settings.print_timings);
        Self {
            connection,
            settings,
            names,
            log,
            phase: SyncPhase::Idle,
        }
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Print a line through the sync output (timed when timings are on).
    pub fn print(&mut self, text: &str) {
        self.log.print(text);
    }

    /// Command runner rooted at `destination` on the same connection.
    pub fn runner(&self, destination: &str) -> RemoteCommandRunner {
        RemoteCommandRunner::new(self.connection.clone(), destination)
    }

    /// Bring `destination` in line with `source`.
    ///
    /// Fatal errors come back as `SyncError::Aborted` carrying the steps
    /// executed so far.
    pub async fn deploy_directory(&mut self, source: &Path, destination: &str) -> Result<SyncReport> {
        self.log.restart();
        self.phase = SyncPhase::Idle;

        match self.run(source, destination).await {
            Ok(report) => {
                self.set_phase(SyncPhase::Done);
                Ok(report)
            }
            Err(e) => {
                self.set_phase(SyncPhase::Failed);
                Err(self.log.abort(e))
            }
        }
    }

    async fn run(&mut self, source: &Path, destination: &str) -> Result<SyncReport> {
        let started = Instant::now();
        info!(
            "Starting sync of {} to {}:{} ({})",
            source.display(),
            self.connection.key(),
            destination,
            self.connection.protocol()
        );

        self.set_phase(SyncPhase::BuildingLocalManifest);
        let walk_options = WalkOptions {
            exclude_patterns: self.settings.exclude.clone(),
            ..WalkOptions::default()
        };
        let mut local = build_local_manifest(source, &walk_options, self.settings.concurrency).await?;

        let internal: Vec<String> = local
            .iter()
            .filter(|f| self.names.is_internal(&f.relative_path))
            .map(|f| f.relative_path.clone())
            .collect();
        for path in internal {
            warn!("Ignoring {} in source: the name is reserved for sync bookkeeping", path);
            local.remove(&path);
        }

        self.log.step(format!(
            "Local file cache built: {} files, {} bytes",
            local.len(),
            local.total_bytes()
        ));

        self.set_phase(SyncPhase::DownloadingRemoteManifest);
        self.connection
            .exec(format!("mkdir -p {}", shell_quote(destination)))
            .await?
            .check()?;
        self.log.step(format!("Connected to {} using {}", self.connection.describe(), self.connection.protocol()));

        let remote = fetch_remote_manifest(&self.connection, &remote_path(destination, &self.names.manifest())).await;
        self.log.step(format!("Remote file cache: {} files", remote.len()));

        self.set_phase(SyncPhase::Diffing);
        let diff = diff_manifests(&local, &remote);
        self.log.step(format!(
            "Diff: {} changed ({} bytes), {} deleted, {} up to date",
            diff.stats.changed_files, diff.stats.changed_bytes, diff.stats.delete_files, diff.stats.up_to_date_files
        ));

        self.set_phase(SyncPhase::Uploading);
        let archive = if diff.change_set.is_empty() {
            None
        } else {
            let root = source.to_path_buf();
            let change_set = diff.change_set.clone();
            let build = tokio::task::spawn_blocking(move || build_archive(&root, &change_set)).await??;

            for skipped in &build.skipped {
                self.log.print(&format!("Skipped {}: {}", skipped.relative_path, skipped.error));
            }
            self.log.step(format!(
                "Compressed {} files ({} bytes) into {} bytes",
                build.archived_files,
                build.archived_bytes,
                build.archive.len()
            ));
            Some(build)
        };

        let skipped = archive.as_ref().map(|b| b.skipped.clone()).unwrap_or_default();
        let archived_files = archive.as_ref().map_or(0, |b| b.archived_files);
        let archive_bytes = archive.as_ref().map_or(0, |b| b.archive.len());

        let manifest = next_manifest(&local, &remote, &skipped);
        let plan = plan_uploads(&diff, &manifest, archive, &self.names);

        let mut uploaded_bytes = 0;
        for upload in plan.uploads {
            let size = upload.data.len();
            self.connection
                .upload(remote_path(destination, &upload.name), upload.data)
                .await?;
            uploaded_bytes += size;
            self.log.step(format!("{} uploaded ({} bytes)", upload.description, size));
        }

        self.set_phase(SyncPhase::Applying);
        match apply_script(&plan.apply, &self.names, &self.settings) {
            Some(script) => {
                let output = self.runner(destination).strict(true).run(&script.render()).await?;
                if !output.stderr.trim().is_empty() {
                    warn!("Apply step wrote to stderr: {}", output.stderr.trim());
                }
                self.log.step("Remote changes applied");
            }
            None => self.log.step("No changes"),
        }

        let outcome = if !diff.change_set.is_empty() {
            SyncOutcome::Updated
        } else if !diff.deletion_list.is_empty() {
            SyncOutcome::DeleteOnly
        } else {
            SyncOutcome::NoChanges
        };

        let report = SyncReport {
            source: source.to_path_buf(),
            destination: destination.to_string(),
            outcome,
            stats: diff.stats,
            changed_paths: diff.change_set.iter().map(|f| f.relative_path.clone()).collect(),
            deleted_paths: diff.deletion_list.paths().to_vec(),
            skipped,
            archived_files,
            archive_bytes,
            uploaded_bytes,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            "Sync completed: {:?}, {} changed, {} deleted, {} skipped in {} ms",
            report.outcome,
            report.changed_paths.len(),
            report.deleted_paths.len(),
            report.skipped.len(),
            report.duration_ms
        );

        Ok(report)
    }

    fn set_phase(&mut self, phase: SyncPhase) {
        debug!("Sync phase: {} -> {}", self.phase, phase);
        self.phase = phase;
    }
}

/// Download and decode the manifest of the previous sync.
pub async fn try_fetch_remote_manifest(connection: &Connection, path: &str) -> Result<RemoteManifest> {
    let bytes = connection
        .download(path.to_string())
        .await
        .map_err(|e| SyncError::ManifestUnavailable(format!("{path}: {e}")))?;
    Manifest::decode(&bytes)
}

/// Like [`try_fetch_remote_manifest`], but a missing or unreadable manifest
/// yields an empty one so that everything is uploaded again.
pub async fn fetch_remote_manifest(connection: &Connection, path: &str) -> RemoteManifest {
    match try_fetch_remote_manifest(connection, path).await {
        Ok(manifest) => {
            info!("Fetched remote manifest: {} files, {} bytes", manifest.len(), manifest.total_bytes());
            manifest
        }
        Err(e @ SyncError::ManifestUnavailable(_)) => {
            info!("{}, will upload everything", e);
            Manifest::new()
        }
        Err(e) => {
            warn!("Ignoring remote manifest {}: {}", path, e);
            Manifest::new()
        }
    }
}

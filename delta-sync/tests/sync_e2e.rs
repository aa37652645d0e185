//! Full syncs against the local session backend.
//!
//! The "remote" side is a temporary directory driven through `sh`, `tar`
//! and plain file copies, so these tests only run on Unix.

#![cfg(unix)]

use delta_sync::config::SyncSettings;
use delta_sync::executor::Manifest;
use delta_sync::fs::FileFingerprint;
use delta_sync::remote::{
    CommandOutput, Connection, ConnectionKey, FileTransfer, LocalSession, OutputChunk, RemoteSession,
    TransferProtocol,
};
use delta_sync::{DeltaSync, Result, SyncError, SyncOutcome, SyncReport};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

const ARCHIVE: &str = "compressedUploadDiffContent.tar.gz";
const MANIFEST: &str = ".uploadCache.cache";

struct Fixture {
    _source_dir: TempDir,
    _remote_dir: TempDir,
    source: PathBuf,
    destination: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let source_dir = TempDir::new().unwrap();
        let remote_dir = TempDir::new().unwrap();
        let source = source_dir.path().to_path_buf();
        let destination = remote_dir.path().join("deploy");
        Self {
            _source_dir: source_dir,
            _remote_dir: remote_dir,
            source,
            destination,
        }
    }

    fn write(&self, name: &str, size: usize) {
        let path = self.source.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, vec![b'x'; size]).unwrap();
    }

    fn remove(&self, name: &str) {
        fs::remove_file(self.source.join(name)).unwrap();
    }

    fn remote(&self, name: &str) -> PathBuf {
        self.destination.join(name)
    }

    fn remote_manifest(&self) -> Manifest {
        Manifest::decode(&fs::read(self.remote(MANIFEST)).unwrap()).unwrap()
    }

    async fn sync(&self, connection: Connection, settings: SyncSettings) -> Result<SyncReport> {
        let mut sync = DeltaSync::new(connection, settings, None);
        sync.deploy_directory(&self.source, self.destination.to_str().unwrap()).await
    }
}

fn key() -> ConnectionKey {
    ConnectionKey {
        host: "localhost".to_string(),
        port: 22,
        username: "test".to_string(),
    }
}

fn local_connection() -> Connection {
    Connection::new(key(), Box::new(LocalSession::new()))
}

fn settings() -> SyncSettings {
    SyncSettings {
        print_timings: false,
        ..SyncSettings::default()
    }
}

fn sorted(mut paths: Vec<String>) -> Vec<String> {
    paths.sort();
    paths
}

/// Session whose transfer misbehaves in a configurable way
struct FaultySession {
    inner: LocalSession,
    transfer: FaultyTransfer,
}

struct FaultyTransfer {
    fail_downloads: bool,
    corrupt_archive: bool,
}

impl FaultySession {
    fn connection(fail_downloads: bool, corrupt_archive: bool) -> Connection {
        let session = FaultySession {
            inner: LocalSession::new(),
            transfer: FaultyTransfer {
                fail_downloads,
                corrupt_archive,
            },
        };
        Connection::new(key(), Box::new(session))
    }
}

impl RemoteSession for FaultySession {
    fn describe(&self) -> String {
        "faulty localhost".to_string()
    }

    fn exec_streaming(&mut self, command: &str, on_output: &mut dyn FnMut(OutputChunk)) -> Result<CommandOutput> {
        self.inner.exec_streaming(command, on_output)
    }

    fn transfer(&mut self) -> &mut dyn FileTransfer {
        &mut self.transfer
    }
}

impl FileTransfer for FaultyTransfer {
    fn protocol(&self) -> TransferProtocol {
        TransferProtocol::Local
    }

    fn download(&mut self, remote_path: &str) -> Result<Vec<u8>> {
        if self.fail_downloads {
            return Err(SyncError::Transfer(format!("download of {remote_path} refused")));
        }
        Ok(fs::read(remote_path)?)
    }

    fn upload(&mut self, remote_path: &str, data: &[u8]) -> Result<()> {
        if self.corrupt_archive && remote_path.ends_with(ARCHIVE) {
            fs::write(remote_path, b"definitely not a gzip stream")?;
            return Ok(());
        }
        Ok(fs::write(remote_path, data)?)
    }
}

fn assert_first_sync(fixture: &Fixture, report: &SyncReport) {
    assert_eq!(report.outcome, SyncOutcome::Updated);
    assert_eq!(sorted(report.changed_paths.clone()), vec!["a.txt", "b.txt"]);
    assert!(report.deleted_paths.is_empty());

    assert_eq!(fs::read(fixture.remote("a.txt")).unwrap().len(), 10);
    assert_eq!(fs::read(fixture.remote("b.txt")).unwrap().len(), 20);
    assert_eq!(fixture.remote_manifest().len(), 2);

    assert!(!fixture.remote(ARCHIVE).exists());
    assert!(!fixture.remote(".uploadCache.cache.tmp").exists());
}

#[tokio::test]
async fn first_sync_uploads_everything() {
    let fixture = Fixture::new();
    fixture.write("a.txt", 10);
    fixture.write("b.txt", 20);

    let report = fixture.sync(local_connection(), settings()).await.unwrap();

    assert_first_sync(&fixture, &report);
}

#[tokio::test]
async fn modified_and_deleted_files_are_applied() {
    let fixture = Fixture::new();
    fixture.write("a.txt", 10);
    fixture.write("b.txt", 20);
    fixture.sync(local_connection(), settings()).await.unwrap();

    fixture.write("a.txt", 15);
    fixture.remove("b.txt");
    let report = fixture.sync(local_connection(), settings()).await.unwrap();

    assert_eq!(report.outcome, SyncOutcome::Updated);
    assert_eq!(report.changed_paths, vec!["a.txt"]);
    assert_eq!(report.deleted_paths, vec!["b.txt"]);
    assert_eq!(fs::read(fixture.remote("a.txt")).unwrap().len(), 15);
    assert!(!fixture.remote("b.txt").exists());
    assert!(!fixture.remote(".deletedFilesList.cache").exists());

    let manifest = fixture.remote_manifest();
    assert_eq!(manifest.len(), 1);
    assert_eq!(manifest.get("a.txt").map(|f| f.size), Some(15));
}

#[tokio::test]
async fn unavailable_remote_manifest_falls_back_to_full_upload() {
    let fixture = Fixture::new();
    fixture.write("a.txt", 10);
    fixture.write("b.txt", 20);

    let report = fixture.sync(FaultySession::connection(true, false), settings()).await.unwrap();

    assert_first_sync(&fixture, &report);
}

#[tokio::test]
async fn second_sync_without_changes_does_nothing() {
    let fixture = Fixture::new();
    fixture.write("a.txt", 10);
    fixture.write("nested/deeper/c.bin", 3);
    let connection = local_connection();

    fixture.sync(connection.clone(), settings()).await.unwrap();
    let report = fixture.sync(connection, settings()).await.unwrap();

    assert_eq!(report.outcome, SyncOutcome::NoChanges);
    assert!(report.changed_paths.is_empty());
    assert!(report.deleted_paths.is_empty());
    assert_eq!(report.uploaded_bytes, 0);
}

#[tokio::test]
async fn remote_manifest_matches_local_fingerprints() {
    let fixture = Fixture::new();
    fixture.write("a.txt", 10);
    fixture.write("lib/b.dll", 2048);
    fixture.write("lib/x64/c.so", 0);

    fixture.sync(local_connection(), settings()).await.unwrap();

    let manifest = fixture.remote_manifest();
    for name in ["a.txt", "lib/b.dll", "lib/x64/c.so"] {
        let local = FileFingerprint::from_path(name, &fixture.source.join(name)).unwrap();
        assert_eq!(manifest.get(name), Some(&local), "{name}");
        assert!(fixture.remote(name).exists(), "{name}");
    }
}

#[tokio::test]
async fn deletion_only_sync_removes_files_and_updates_manifest() {
    let fixture = Fixture::new();
    fixture.write("a.txt", 10);
    fixture.write("b.txt", 20);
    let connection = local_connection();
    fixture.sync(connection.clone(), settings()).await.unwrap();

    fixture.remove("b.txt");
    let report = fixture.sync(connection.clone(), settings()).await.unwrap();

    assert_eq!(report.outcome, SyncOutcome::DeleteOnly);
    assert_eq!(report.deleted_paths, vec!["b.txt"]);
    assert!(!fixture.remote("b.txt").exists());
    assert!(fixture.remote("a.txt").exists());
    assert!(!fixture.remote_manifest().contains("b.txt"));

    let report = fixture.sync(connection, settings()).await.unwrap();
    assert_eq!(report.outcome, SyncOutcome::NoChanges);
}

#[tokio::test]
async fn keeping_old_files_leaves_them_on_the_remote() {
    let fixture = Fixture::new();
    fixture.write("a.txt", 10);
    fixture.write("b.txt", 20);
    fixture.sync(local_connection(), settings()).await.unwrap();

    fixture.remove("b.txt");
    let keep = SyncSettings {
        remove_old_files: false,
        ..settings()
    };
    fixture.sync(local_connection(), keep).await.unwrap();

    assert!(fixture.remote("b.txt").exists());
    assert!(!fixture.remote_manifest().contains("b.txt"));
}

#[tokio::test]
async fn keeping_temp_files_leaves_archive_and_list() {
    let fixture = Fixture::new();
    fixture.write("a.txt", 10);
    fixture.write("b.txt", 20);
    fixture.sync(local_connection(), settings()).await.unwrap();

    fixture.write("a.txt", 11);
    fixture.remove("b.txt");
    let keep = SyncSettings {
        remove_temp_files: false,
        ..settings()
    };
    fixture.sync(local_connection(), keep).await.unwrap();

    assert!(fixture.remote(ARCHIVE).exists());
    let list = fs::read_to_string(fixture.remote(".deletedFilesList.cache")).unwrap();
    assert_eq!(list, "b.txt\n");
}

#[tokio::test]
async fn changed_timestamp_with_same_size_is_uploaded() {
    let fixture = Fixture::new();
    fixture.write("a.txt", 10);
    fixture.write("b.txt", 20);
    let connection = local_connection();
    fixture.sync(connection.clone(), settings()).await.unwrap();

    let earlier = SystemTime::now() - Duration::from_secs(3600);
    fs::OpenOptions::new()
        .write(true)
        .open(fixture.source.join("a.txt"))
        .unwrap()
        .set_modified(earlier)
        .unwrap();

    let report = fixture.sync(connection, settings()).await.unwrap();

    assert_eq!(report.outcome, SyncOutcome::Updated);
    assert_eq!(report.changed_paths, vec!["a.txt"]);
    let local = FileFingerprint::from_path("a.txt", &fixture.source.join("a.txt")).unwrap();
    assert_eq!(fixture.remote_manifest().get("a.txt"), Some(&local));
}

#[tokio::test]
async fn failed_apply_leaves_previous_manifest_in_place() {
    let fixture = Fixture::new();
    fixture.write("a.txt", 10);
    fixture.write("b.txt", 20);
    fixture.sync(local_connection(), settings()).await.unwrap();
    let before = fs::read(fixture.remote(MANIFEST)).unwrap();

    fixture.write("a.txt", 30);
    fixture.write("c.txt", 5);
    let err = fixture
        .sync(FaultySession::connection(false, true), settings())
        .await
        .unwrap_err();

    assert!(matches!(err.root(), SyncError::RemoteCommand { .. }));
    assert!(!err.steps().is_empty());
    assert!(err.to_string().contains("Executed steps:"));

    assert_eq!(fs::read(fixture.remote(MANIFEST)).unwrap(), before);
    assert_eq!(fs::read(fixture.remote("a.txt")).unwrap().len(), 10);
    assert!(!fixture.remote("c.txt").exists());
}

#[tokio::test]
async fn missing_source_is_reported() {
    let fixture = Fixture::new();
    let mut sync = DeltaSync::new(local_connection(), settings(), None);

    let err = sync
        .deploy_directory(Path::new("/definitely/not/here"), fixture.destination.to_str().unwrap())
        .await
        .unwrap_err();

    assert!(matches!(err.root(), SyncError::SourceNotFound(_)));
    assert!(!fixture.destination.exists());
}

#[tokio::test]
async fn names_with_line_breaks_never_reach_the_deletion_list() {
    let fixture = Fixture::new();
    fixture.write("keep.txt", 10);
    fixture.write("old\nkeep.txt", 5);
    let connection = local_connection();

    let report = fixture.sync(connection.clone(), settings()).await.unwrap();
    assert_eq!(report.changed_paths, vec!["keep.txt"]);
    assert!(!fixture.remote_manifest().contains("old\nkeep.txt"));

    fixture.remove("old\nkeep.txt");
    let report = fixture.sync(connection.clone(), settings()).await.unwrap();
    assert_eq!(report.outcome, SyncOutcome::NoChanges);
    assert!(fixture.remote("keep.txt").exists());

    let report = fixture.sync(connection, settings()).await.unwrap();
    assert_eq!(report.outcome, SyncOutcome::NoChanges);
    assert_eq!(fs::read(fixture.remote("keep.txt")).unwrap().len(), 10);
}

#[tokio::test]
async fn tampered_manifest_cannot_delete_outside_the_destination() {
    let fixture = Fixture::new();
    fixture.write("keep.txt", 10);
    fs::create_dir_all(&fixture.destination).unwrap();
    let outside = fixture.destination.parent().unwrap().join("outside.txt");
    fs::write(&outside, b"precious").unwrap();
    fs::write(fixture.remote("keep.txt"), b"live").unwrap();

    let tampered: Manifest = [
        FileFingerprint::new("../outside.txt", 1, 8),
        FileFingerprint::new("old\nkeep.txt", 1, 4),
        FileFingerprint::new("stale.txt", 1, 3),
    ]
    .into_iter()
    .collect();
    fs::write(fixture.remote(MANIFEST), tampered.encode()).unwrap();
    fs::write(fixture.remote("stale.txt"), b"old").unwrap();

    let report = fixture.sync(local_connection(), settings()).await.unwrap();

    assert_eq!(report.deleted_paths, vec!["stale.txt"]);
    assert!(!fixture.remote("stale.txt").exists());
    assert_eq!(fs::read(&outside).unwrap(), b"precious");
    assert_eq!(fs::read(fixture.remote("keep.txt")).unwrap().len(), 10);

    let manifest = fixture.remote_manifest();
    assert_eq!(manifest.len(), 1);
    assert!(manifest.contains("keep.txt"));
}

#[tokio::test]
async fn failed_deletion_keeps_entry_for_the_next_run() {
    let fixture = Fixture::new();
    fixture.write("a.txt", 10);
    fixture.write("b.txt", 20);
    let connection = local_connection();
    fixture.sync(connection.clone(), settings()).await.unwrap();

    // A directory in place of the file makes `rm -f` fail
    fs::remove_file(fixture.remote("b.txt")).unwrap();
    fs::create_dir(fixture.remote("b.txt")).unwrap();
    fs::write(fixture.remote("b.txt/inner"), b"x").unwrap();
    fixture.remove("b.txt");

    let err = fixture.sync(connection.clone(), settings()).await.unwrap_err();
    assert!(matches!(err.root(), SyncError::RemoteCommand { .. }));
    assert!(fixture.remote_manifest().contains("b.txt"));

    fs::remove_dir_all(fixture.remote("b.txt")).unwrap();
    fs::write(fixture.remote("b.txt"), b"stale").unwrap();
    let report = fixture.sync(connection, settings()).await.unwrap();

    assert_eq!(report.outcome, SyncOutcome::DeleteOnly);
    assert_eq!(report.deleted_paths, vec!["b.txt"]);
    assert!(!fixture.remote("b.txt").exists());
    assert!(!fixture.remote_manifest().contains("b.txt"));
}

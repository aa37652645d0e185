//! Manifest types and their binary encoding.
//!
//! A manifest records every synced file with its size and last write time,
//! allowing the next run to diff against it and only transfer changed files.
//!
//! Layout (little-endian):
//!
//! ```text
//! i32 entry_count
//! entry_count x {
//!     7-bit encoded length, UTF-8 bytes   relative path
//!     i64                                 last write time (ticks)
//!     i64                                 size in bytes
//! }
//! ```

use crate::fs::FileFingerprint;
use crate::utils::errors::{Result, SyncError};
use std::collections::btree_map::{self, BTreeMap};
use std::io::{Cursor, Read};

/// Manifest of files keyed by relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    files: BTreeMap<String, FileFingerprint>,
}

/// Manifest built from the local source directory.
pub type LocalManifest = Manifest;

/// Manifest persisted next to the deployed files on the remote side.
pub type RemoteManifest = Manifest;

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fingerprint, replacing any entry with the same path.
    pub fn insert(&mut self, fingerprint: FileFingerprint) -> Option<FileFingerprint> {
        self.files.insert(fingerprint.relative_path.clone(), fingerprint)
    }

    pub fn get(&self, relative_path: &str) -> Option<&FileFingerprint> {
        self.files.get(relative_path)
    }

    pub fn remove(&mut self, relative_path: &str) -> Option<FileFingerprint> {
        self.files.remove(relative_path)
    }

    pub fn contains(&self, relative_path: &str) -> bool {
        self.files.contains_key(relative_path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Entries in path order.
    pub fn iter(&self) -> btree_map::Values<'_, String, FileFingerprint> {
        self.files.values()
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.values().map(|f| f.size).sum()
    }

    /// Serialize to the binary manifest format.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.files.len() * 48);
        out.extend_from_slice(&(self.files.len() as i32).to_le_bytes());

        for entry in self.files.values() {
            write_string(&mut out, &entry.relative_path);
            out.extend_from_slice(&entry.last_modified.to_le_bytes());
            out.extend_from_slice(&(entry.size as i64).to_le_bytes());
        }

        out
    }

    /// Parse the binary manifest format.
    ///
    /// Later duplicates of a path replace earlier ones. Bytes after the last
    /// record are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(bytes);

        let count = read_i32(&mut reader)?;
        if count < 0 {
            return Err(SyncError::InvalidManifest(format!(
                "negative entry count {count}"
            )));
        }

        let mut manifest = Manifest::new();
        for index in 0..count {
            let relative_path = read_string(&mut reader)
                .map_err(|e| truncated(index, e))?;
            let last_modified = read_i64(&mut reader).map_err(|e| truncated(index, e))?;
            let size = read_i64(&mut reader).map_err(|e| truncated(index, e))?;
            if size < 0 {
                return Err(SyncError::InvalidManifest(format!(
                    "entry {index} ({relative_path}) has negative size {size}"
                )));
            }
            manifest.insert(FileFingerprint::new(relative_path, last_modified, size as u64));
        }

        Ok(manifest)
    }
}

impl FromIterator<FileFingerprint> for Manifest {
    fn from_iter<I: IntoIterator<Item = FileFingerprint>>(iter: I) -> Self {
        let mut manifest = Manifest::new();
        for fingerprint in iter {
            manifest.insert(fingerprint);
        }
        manifest
    }
}

impl<'a> IntoIterator for &'a Manifest {
    type Item = &'a FileFingerprint;
    type IntoIter = btree_map::Values<'a, String, FileFingerprint>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

fn truncated(index: i32, error: SyncError) -> SyncError {
    match error {
        SyncError::InvalidManifest(msg) => {
            SyncError::InvalidManifest(format!("entry {index}: {msg}"))
        }
        other => other,
    }
}

fn write_string(out: &mut Vec<u8>, value: &str) {
    let mut len = value.len() as u32;
    while len >= 0x80 {
        out.push((len as u8) | 0x80);
        len >>= 7;
    }
    out.push(len as u8);
    out.extend_from_slice(value.as_bytes());
}

fn read_exact<const N: usize>(reader: &mut Cursor<&[u8]>) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader
        .read_exact(&mut buf)
        .map_err(|_| SyncError::InvalidManifest("unexpected end of data".to_string()))?;
    Ok(buf)
}

fn read_i32(reader: &mut Cursor<&[u8]>) -> Result<i32> {
    Ok(i32::from_le_bytes(read_exact::<4>(reader)?))
}

fn read_i64(reader: &mut Cursor<&[u8]>) -> Result<i64> {
    Ok(i64::from_le_bytes(read_exact::<8>(reader)?))
}

fn read_string(reader: &mut Cursor<&[u8]>) -> Result<String> {
    let mut len: u32 = 0;
    let mut shift = 0;
    loop {
        let [byte] = read_exact::<1>(reader)?;
        if shift == 28 && byte > 0x0f {
            return Err(SyncError::InvalidManifest("string length overflows".to_string()));
        }
        len |= u32::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }

    let remaining = reader.get_ref().len() as u64 - reader.position();
    if u64::from(len) > remaining {
        return Err(SyncError::InvalidManifest("unexpected end of data".to_string()));
    }

    let mut buf = vec![0u8; len as usize];
    reader
        .read_exact(&mut buf)
        .map_err(|_| SyncError::InvalidManifest("unexpected end of data".to_string()))?;
    String::from_utf8(buf)
        .map_err(|e| SyncError::InvalidManifest(format!("path is not UTF-8: {e}")))
}

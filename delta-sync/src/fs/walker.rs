//! Directory traversal for building the local manifest.
//!
//! Only regular files are reported. Symlinks that resolve to files are treated
//! as regular files; links to directories and dangling links are skipped.
//! Directories that cannot be read are skipped with a warning.

use std::path::{Component, Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// File or directory names to leave out (substring match)
    pub exclude_patterns: Vec<String>,
}

/// A regular file discovered during walking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkedFile {
    /// Full path to the file
    pub path: PathBuf,

    /// Path relative to the root, forward slashes, no leading slash
    pub relative_path: String,
}

impl WalkedFile {
    fn from_entry(entry: &DirEntry, root: &Path) -> Option<Self> {
        let path = entry.path().to_path_buf();

        if entry.path_is_symlink() {
            match std::fs::metadata(&path) {
                Ok(resolved) if resolved.is_file() => {}
                // Link to a directory or broken link
                _ => return None,
            }
        } else if !entry.file_type().is_file() {
            return None;
        }

        let relative_path = normalize_relative_path(root, &path)?;
        if !is_safe_relative_path(&relative_path) {
            tracing::warn!("Skipping {:?}: line breaks are not supported in file names", relative_path);
            return None;
        }
        Some(Self { path, relative_path })
    }
}

/// Relative path from `root` to `path` using forward slashes.
///
/// Returns `None` when `path` is not below `root` or a component is not
/// valid UTF-8.
pub fn normalize_relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// True for a relative path that stays inside the synced root and fits on
/// one line of the deletion list.
///
/// Rejects line breaks, absolute paths and empty, `.` or `..` components.
pub fn is_safe_relative_path(path: &str) -> bool {
    !path.is_empty()
        && !path.contains(['\n', '\r'])
        && path
            .split('/')
            .all(|part| !part.is_empty() && part != "." && part != "..")
}

/// Walk a directory tree and collect all regular files
///
/// # Returns
/// * `Ok(Vec<WalkedFile>)` - Files found, in traversal order
/// * `Err(io::Error)` - If `root` is missing or not a directory
///
/// # Example
/// ```no_run
/// use delta_sync::fs::walker::{walk_directory, WalkOptions};
/// use std::path::Path;
///
/// let files = walk_directory(Path::new("bin/Debug"), &WalkOptions::default()).unwrap();
/// println!("Found {} files", files.len());
/// ```
pub fn walk_directory(root: &Path, options: &WalkOptions) -> std::io::Result<Vec<WalkedFile>> {
    let root_metadata = std::fs::metadata(root)?;
    if !root_metadata.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} is not a directory", root.display()),
        ));
    }

    let mut files = Vec::new();
    let mut iter = WalkDir::new(root).into_iter();

    while let Some(next) = iter.next() {
        let entry = match next {
            Ok(entry) => entry,
            Err(e) => {
                let location = e
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| root.display().to_string());
                tracing::warn!("Skipping unreadable entry {}: {}", location, e);
                continue;
            }
        };

        if should_exclude(&entry, &options.exclude_patterns) {
            if entry.file_type().is_dir() {
                iter.skip_current_dir();
            }
            continue;
        }

        if let Some(file) = WalkedFile::from_entry(&entry, root) {
            files.push(file);
        }
    }

    Ok(files)
}

/// Check if a directory entry should be excluded based on patterns
fn should_exclude(entry: &DirEntry, patterns: &[String]) -> bool {
    if entry.depth() == 0 {
        return false;
    }

    let file_name = entry.file_name().to_string_lossy();
    patterns.iter().any(|pattern| file_name.contains(pattern.as_str()))
}

use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};

use crate::{
    error::{Error, Result},
    ignore::IgnoreMatcher,
    types::FileType,
};

/// A discovered document file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Fully resolved absolute path.
    pub path: PathBuf,
    /// Last modification time as nanoseconds since the Unix epoch.
    pub mtime: u64,
    pub size_bytes: u64,
}

/// Result of walking a directory tree.
#[derive(Debug, Default)]
pub struct Walk {
    /// Eligible files, sorted by path.
    pub files: Vec<DiscoveredFile>,
    /// Files (or whole directories) excluded by an ignore pattern.
    pub ignored: usize,
    /// Files skipped because their type is not indexable.
    pub unsupported: usize,
}

/// Recursively walk a directory and discover eligible document files.
///
/// Directories matched by the ignore rules are pruned without being read.
/// Only files with a supported [`FileType`] are returned.
pub fn discover_files(root: &Path, matcher: &IgnoreMatcher) -> Result<Walk> {
    let canonical_root = root.canonicalize()?;
    let mut walk = Walk::default();
    walk_dir(&canonical_root, &canonical_root, matcher, &mut walk)?;
    walk.files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(walk)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    matcher: &IgnoreMatcher,
    walk: &mut Walk,
) -> Result<()> {
    let entries = match std::fs::read_dir(current) {
        Ok(entries) => entries,
        Err(e) if current != root => {
            tracing::warn!(
                path = %current.display(),
                error = %e,
                "skipping unreadable directory"
            );
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            if matcher.is_dir_ignored(&path) {
                walk.ignored += 1;
                continue;
            }
            walk_dir(root, &path, matcher, walk)?;
        } else if file_type.is_symlink() {
            // Resolve symlink and check for cycles.
            let resolved = match path.canonicalize() {
                Ok(p) => p,
                Err(_) => continue, // Skip broken symlinks
            };
            if resolved.is_dir() {
                // Linked directories are not followed.
                continue;
            }
            if resolved.is_file() {
                consider_file(&path, &resolved, matcher, walk)?;
            }
        } else if file_type.is_file() {
            consider_file(&path, &path, matcher, walk)?;
        }
    }

    Ok(())
}

fn consider_file(
    original_path: &Path,
    resolved_path: &Path,
    matcher: &IgnoreMatcher,
    walk: &mut Walk,
) -> Result<()> {
    if matcher.is_ignored(original_path) {
        walk.ignored += 1;
        return Ok(());
    }
    if !FileType::from_path(original_path).is_supported() {
        walk.unsupported += 1;
        return Ok(());
    }
    match stat_file(original_path, resolved_path) {
        Ok(file) => walk.files.push(file),
        // Deleted between listing and stat.
        Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %original_path.display(), "file vanished during walk");
        }
        Err(e) => return Err(e),
    }
    Ok(())
}

/// Stat a single file into a [`DiscoveredFile`], keeping `path` as the
/// recorded location and reading metadata through `resolved`.
pub fn stat_file(path: &Path, resolved: &Path) -> Result<DiscoveredFile> {
    let meta = std::fs::metadata(resolved)?;
    Ok(DiscoveredFile {
        path: path.to_path_buf(),
        mtime: mtime_nanos(&meta),
        size_bytes: meta.len(),
    })
}

pub fn mtime_nanos(meta: &std::fs::Metadata) -> u64 {
    let since_epoch = meta
        .modified()
        .unwrap_or(SystemTime::UNIX_EPOCH)
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    u64::try_from(since_epoch.as_nanos()).unwrap_or(u64::MAX)
}

//! The staging set: the user-controlled list of files eligible for
//! incremental indexing.
//!
//! The state is an explicit value: callers [`StagingState::load`] it, mutate
//! it and [`StagingState::save`] it back. Nothing is cached between calls, so
//! each operation sees what is on disk.

use std::{
    collections::BTreeMap,
    path::{Component, Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    ignore::IgnoreMatcher,
    types::{FileType, unix_now},
    walker,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedEntry {
    pub path: PathBuf,
    /// Seconds since the Unix epoch.
    pub staged_at: u64,
}

/// Counts reported by [`StagingState::add`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AddOutcome {
    pub added: usize,
    pub already_staged: usize,
    pub ignored: usize,
    pub unsupported: usize,
}

/// Persisted staging set, keyed by normalized absolute path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagingState {
    #[serde(default)]
    entries: BTreeMap<String, StagedEntry>,
    #[serde(default)]
    last_updated: u64,
}

impl StagingState {
    /// Load the staging set. A missing file is an empty set.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write the staging set, replacing the previous file atomically.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.last_updated = unix_now();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Stage a file, or every eligible file below a directory.
    pub fn add(
        &mut self,
        path: &Path,
        matcher: &IgnoreMatcher,
    ) -> Result<AddOutcome> {
        let target = normalize_path(path)?;
        let meta = std::fs::metadata(&target)
            .map_err(|e| Error::from_io(&target, e))?;

        let mut outcome = AddOutcome::default();
        let now = unix_now();

        if meta.is_dir() {
            let walk = walker::discover_files(&target, matcher)?;
            outcome.ignored = walk.ignored;
            outcome.unsupported = walk.unsupported;
            for file in walk.files {
                self.insert(file.path, now, &mut outcome);
            }
        } else if matcher.is_ignored(&target) {
            outcome.ignored = 1;
        } else if !FileType::from_path(&target).is_supported() {
            outcome.unsupported = 1;
        } else {
            self.insert(target, now, &mut outcome);
        }

        tracing::debug!(
            path = %path.display(),
            added = outcome.added,
            ignored = outcome.ignored,
            unsupported = outcome.unsupported,
            "staged path"
        );
        Ok(outcome)
    }

    fn insert(&mut self, path: PathBuf, now: u64, outcome: &mut AddOutcome) {
        let key = path.to_string_lossy().into_owned();
        if self.entries.contains_key(&key) {
            outcome.already_staged += 1;
        } else {
            self.entries.insert(
                key,
                StagedEntry {
                    path,
                    staged_at: now,
                },
            );
            outcome.added += 1;
        }
    }

    /// Unstage a path and everything staged below it. Removing something
    /// that is not staged is a no-op.
    pub fn remove(&mut self, path: &Path) -> Result<usize> {
        let target = normalize_path(path)?;
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| !entry.path.starts_with(&target));
        Ok(before - self.entries.len())
    }

    /// All staged entries in lexicographic path order.
    pub fn status(&self) -> Vec<StagedEntry> {
        self.entries.values().cloned().collect()
    }

    /// Staged entries whose file no longer exists.
    pub fn missing(&self) -> Vec<StagedEntry> {
        self.entries
            .values()
            .filter(|e| !e.path.exists())
            .cloned()
            .collect()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.entries.values().map(|e| e.path.clone()).collect()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path.to_string_lossy().as_ref())
    }

    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Absolute, symlink-resolved path for existing files; lexically cleaned
/// absolute path for paths that do not exist (yet or anymore).
pub fn normalize_path(path: &Path) -> Result<PathBuf> {
    if let Ok(canonical) = path.canonicalize() {
        return Ok(canonical);
    }
    let absolute = std::path::absolute(path)?;
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        _tmp: tempfile::TempDir,
        docs: PathBuf,
        state_file: PathBuf,
        matcher: IgnoreMatcher,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("docs")).unwrap();
        let docs = tmp.path().join("docs").canonicalize().unwrap();
        std::fs::write(docs.join("a.pdf"), "Q4 revenue $5M").unwrap();
        std::fs::write(docs.join("b.txt"), "grocery list").unwrap();
        std::fs::write(docs.join("id.key"), "-----BEGIN KEY-----").unwrap();
        let secrets = docs.join("secrets");
        std::fs::create_dir(&secrets).unwrap();
        std::fs::write(secrets.join("passwords.txt"), "hunter2").unwrap();

        let matcher =
            IgnoreMatcher::new(Some(&docs), ["*.key", ".git/"]).unwrap();
        let state_file = tmp.path().join("state").join("staging.json");
        Fixture {
            _tmp: tmp,
            docs,
            state_file,
            matcher,
        }
    }

    #[test]
    fn add_directory_stages_eligible_files() {
        let fx = fixture();
        let mut state = StagingState::default();

        let outcome = state.add(&fx.docs, &fx.matcher).unwrap();
        assert_eq!(outcome.added, 3);
        assert_eq!(outcome.ignored, 1);

        let paths = state.paths();
        assert!(paths.contains(&fx.docs.join("a.pdf")));
        assert!(paths.contains(&fx.docs.join("secrets/passwords.txt")));
        assert!(!paths.contains(&fx.docs.join("id.key")));
    }

    #[test]
    fn add_twice_reports_already_staged() {
        let fx = fixture();
        let mut state = StagingState::default();
        state.add(&fx.docs.join("a.pdf"), &fx.matcher).unwrap();

        let outcome = state.add(&fx.docs.join("a.pdf"), &fx.matcher).unwrap();
        assert_eq!(outcome.added, 0);
        assert_eq!(outcome.already_staged, 1);
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn add_ignored_file_directly_is_skipped() {
        let fx = fixture();
        let mut state = StagingState::default();
        let outcome = state.add(&fx.docs.join("id.key"), &fx.matcher).unwrap();
        assert_eq!(outcome.ignored, 1);
        assert!(state.is_empty());
    }

    #[test]
    fn add_missing_path_is_not_found() {
        let fx = fixture();
        let mut state = StagingState::default();
        let err = state
            .add(&fx.docs.join("nope.pdf"), &fx.matcher)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn remove_directory_removes_contained_entries() {
        let fx = fixture();
        let mut state = StagingState::default();
        state.add(&fx.docs, &fx.matcher).unwrap();

        let removed = state.remove(&fx.docs.join("secrets")).unwrap();
        assert_eq!(removed, 1);
        assert!(
            state
                .status()
                .iter()
                .all(|e| !e.path.starts_with(fx.docs.join("secrets")))
        );
    }

    #[test]
    fn remove_unstaged_is_noop() {
        let fx = fixture();
        let mut state = StagingState::default();
        state.add(&fx.docs.join("a.pdf"), &fx.matcher).unwrap();
        assert_eq!(state.remove(&fx.docs.join("b.txt")).unwrap(), 0);
        assert_eq!(state.remove(Path::new("/no/such/place")).unwrap(), 0);
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn remove_works_after_file_is_deleted() {
        let fx = fixture();
        let mut state = StagingState::default();
        state.add(&fx.docs.join("b.txt"), &fx.matcher).unwrap();
        std::fs::remove_file(fx.docs.join("b.txt")).unwrap();

        assert_eq!(state.missing().len(), 1);
        assert_eq!(state.remove(&fx.docs.join("b.txt")).unwrap(), 1);
    }

    #[test]
    fn status_is_sorted_and_stable() {
        let fx = fixture();
        let mut state = StagingState::default();
        state.add(&fx.docs.join("b.txt"), &fx.matcher).unwrap();
        state.add(&fx.docs.join("a.pdf"), &fx.matcher).unwrap();

        let first = state.status();
        assert_eq!(first[0].path, fx.docs.join("a.pdf"));
        assert_eq!(first, state.status());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let fx = fixture();
        let mut state = StagingState::default();
        state.add(&fx.docs, &fx.matcher).unwrap();
        state.save(&fx.state_file).unwrap();

        let restored = StagingState::load(&fx.state_file).unwrap();
        assert_eq!(restored.status(), state.status());
    }

    #[test]
    fn load_missing_file_is_empty() {
        let fx = fixture();
        let state = StagingState::load(&fx.state_file).unwrap();
        assert!(state.is_empty());
    }

    #[test]
    fn normalize_cleans_dot_segments() {
        let p = normalize_path(Path::new("/no/such/./dir/../file.txt")).unwrap();
        assert_eq!(p, PathBuf::from("/no/such/file.txt"));
    }
}

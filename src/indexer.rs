//! Index runs: decide which files to look at, classify them, and bring the
//! store pair up to date one file at a time.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use rayon::prelude::*;
use serde::Serialize;

use crate::{
    change::{self, Change, FileStat},
    chunking::chunk_text,
    config::IndexConfig,
    embedding::Embedder,
    error::{Error, Result},
    extract::ExtractorRegistry,
    ignore::IgnoreMatcher,
    staging::normalize_path,
    store_pair::{EmbeddedChunk, StorePair},
    types::{FileRecord, FileType},
    walker,
};

/// Which files an index run considers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexMode {
    /// Every file under the configured scan roots, plus deletion of
    /// records under those roots whose file is gone.
    Full,
    /// Only the staged files.
    Incremental,
    /// Only the given files, or files below the given directories.
    Targeted(Vec<PathBuf>),
}

/// Shared flag that stops a run at the next file boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Receives `(files_done, files_total)` after each file.
pub type ProgressFn = dyn Fn(usize, usize) + Send + Sync;

/// A file that was skipped or failed, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileIssue {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub files_indexed: usize,
    pub files_unchanged: usize,
    pub files_deleted: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub chunks_added: usize,
    pub chunks_removed: usize,
    pub duration: Duration,
    pub skipped: Vec<FileIssue>,
    pub failures: Vec<FileIssue>,
    /// The run was cancelled before every file was processed.
    pub cancelled: bool,
}

/// Per-call overrides of the stored index configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexOptions {
    pub max_file_size_mb: Option<u64>,
    pub chunk_size: Option<usize>,
}

#[derive(Debug)]
struct Task {
    path: PathBuf,
    record: Option<FileRecord>,
}

#[derive(Debug)]
enum Outcome {
    Indexed { added: usize, removed: usize },
    Unchanged,
    Deleted { removed: usize },
    Skipped(String),
    Failed(String),
    Cancelled,
}

pub struct Indexer<'a> {
    stores: &'a StorePair,
    extractors: &'a ExtractorRegistry,
    embedder: &'a dyn Embedder,
    config: IndexConfig,
    cancel: CancelToken,
    progress: Option<&'a ProgressFn>,
}

impl<'a> Indexer<'a> {
    pub fn new(
        stores: &'a StorePair,
        extractors: &'a ExtractorRegistry,
        embedder: &'a dyn Embedder,
        config: IndexConfig,
    ) -> Self {
        Self {
            stores,
            extractors,
            embedder,
            config,
            cancel: CancelToken::new(),
            progress: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: &'a ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Run an index pass. `staged` is the staging set, used by
    /// [`IndexMode::Incremental`].
    ///
    /// Per-file problems are recorded in the summary; only structural
    /// errors (storage, corruption) abort the run.
    pub fn run(&self, mode: &IndexMode, staged: &[PathBuf]) -> Result<RunSummary> {
        let start = Instant::now();
        let mut summary = RunSummary::default();

        let tasks = self.plan(mode, staged, &mut summary)?;
        let total = tasks.len();
        tracing::info!(mode = ?mode, files = total, "starting index run");

        let done = AtomicUsize::new(0);
        let process = || -> Result<Vec<(PathBuf, Outcome)>> {
            tasks
                .par_iter()
                .map(|task| {
                    let outcome = self.process(task)?;
                    let n = done.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(progress) = self.progress {
                        progress(n, total);
                    }
                    Ok((task.path.clone(), outcome))
                })
                .collect()
        };

        let outcomes = if self.config.workers > 0 {
            rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.workers)
                .build()
                .map_err(|e| Error::Config(format!("worker pool: {e}")))?
                .install(process)?
        } else {
            process()?
        };

        for (path, outcome) in outcomes {
            match outcome {
                Outcome::Indexed { added, removed } => {
                    summary.files_indexed += 1;
                    summary.chunks_added += added;
                    summary.chunks_removed += removed;
                }
                Outcome::Unchanged => summary.files_unchanged += 1,
                Outcome::Deleted { removed } => {
                    summary.files_deleted += 1;
                    summary.chunks_removed += removed;
                }
                Outcome::Skipped(reason) => {
                    summary.skipped.push(FileIssue { path, reason });
                }
                Outcome::Failed(reason) => {
                    summary.failures.push(FileIssue { path, reason });
                }
                Outcome::Cancelled => summary.cancelled = true,
            }
        }
        summary.files_skipped = summary.skipped.len();
        summary.files_failed = summary.failures.len();
        summary.duration = start.elapsed();

        tracing::info!(
            indexed = summary.files_indexed,
            unchanged = summary.files_unchanged,
            deleted = summary.files_deleted,
            skipped = summary.files_skipped,
            failed = summary.files_failed,
            cancelled = summary.cancelled,
            elapsed_ms = summary.duration.as_millis() as u64,
            "index run finished"
        );
        Ok(summary)
    }

    /// Resolve the mode into a deduplicated, path-ordered task list.
    /// Paths that cannot be planned at all are recorded as failures.
    fn plan(
        &self,
        mode: &IndexMode,
        staged: &[PathBuf],
        summary: &mut RunSummary,
    ) -> Result<Vec<Task>> {
        let mut paths: BTreeMap<PathBuf, ()> = BTreeMap::new();
        let metadata = self.stores.metadata();

        match mode {
            IndexMode::Full => {
                for root in &self.config.scan_roots {
                    let root = normalize_path(root)?;
                    if !root.is_dir() {
                        tracing::warn!(root = %root.display(), "scan root is not a directory");
                        continue;
                    }
                    let matcher = IgnoreMatcher::load(&root)?;
                    for file in walker::discover_files(&root, &matcher)?.files {
                        paths.insert(file.path, ());
                    }
                    // Records under this root whose file disappeared.
                    for record in metadata.list_files()? {
                        if record.path.starts_with(&root) && !record.path.exists() {
                            paths.insert(record.path, ());
                        }
                    }
                }
            }
            IndexMode::Incremental => {
                for path in staged {
                    paths.insert(path.clone(), ());
                }
            }
            IndexMode::Targeted(targets) => {
                for target in targets {
                    let target = normalize_path(target)?;
                    if target.is_dir() {
                        let matcher = IgnoreMatcher::load(&target)?;
                        for file in walker::discover_files(&target, &matcher)?.files {
                            paths.insert(file.path, ());
                        }
                    } else {
                        paths.insert(target, ());
                    }
                }
            }
        }

        let mut tasks = Vec::with_capacity(paths.len());
        for path in paths.into_keys() {
            let record = metadata.get_file_by_path(&path)?;
            if record.is_none() && !path.exists() {
                summary.failures.push(FileIssue {
                    reason: Error::NotFound {
                        kind: "file",
                        name: path.display().to_string(),
                    }
                    .to_string(),
                    path,
                });
                continue;
            }
            tasks.push(Task { path, record });
        }
        Ok(tasks)
    }

    fn process(&self, task: &Task) -> Result<Outcome> {
        if self.cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }
        match self.process_file(task) {
            Ok(outcome) => Ok(outcome),
            Err(e @ Error::FileTooLarge { .. }) => {
                tracing::warn!(path = %task.path.display(), error = %e, "skipping file");
                Ok(Outcome::Skipped(e.to_string()))
            }
            Err(e) if e.is_per_file() => {
                tracing::warn!(path = %task.path.display(), error = %e, "failed to index file");
                Ok(Outcome::Failed(e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    fn process_file(&self, task: &Task) -> Result<Outcome> {
        let path = &task.path;

        if let Some(stat) = FileStat::read(path)? {
            let limit = self.config.max_file_size_bytes();
            if stat.size_bytes > limit {
                return Err(Error::FileTooLarge {
                    path: path.clone(),
                    size_bytes: stat.size_bytes,
                    limit_bytes: limit,
                });
            }
        }

        let classification = change::classify(task.record.as_ref(), path)?;
        match (classification.change, classification.fingerprint) {
            (Change::Unchanged { touched }, fingerprint) => {
                if touched
                    && let (Some(record), Some(fingerprint)) = (&task.record, fingerprint)
                {
                    self.stores.touch_file(record.file_id, &fingerprint)?;
                }
                tracing::debug!(path = %path.display(), "unchanged");
                Ok(Outcome::Unchanged)
            }
            (Change::Deleted, _) => {
                let removed = self
                    .stores
                    .delete_file(path)?
                    .map(|d| d.chunks)
                    .unwrap_or(0);
                tracing::debug!(path = %path.display(), removed, "deleted");
                Ok(Outcome::Deleted { removed })
            }
            (change @ (Change::New | Change::Modified), Some(fingerprint)) => {
                let chunks = self.embed_file(path)?;
                let added = chunks.len();
                let displaced = self.stores.replace_file(
                    path,
                    fingerprint,
                    FileType::from_path(path),
                    chunks,
                )?;
                tracing::debug!(
                    path = %path.display(),
                    change = ?change,
                    added,
                    removed = displaced.chunks,
                    "indexed"
                );
                Ok(Outcome::Indexed {
                    added,
                    removed: displaced.chunks,
                })
            }
            (change, None) => Err(Error::CorruptIndex(format!(
                "{} classified {change:?} without a fingerprint",
                path.display()
            ))),
        }
    }

    /// Extract, chunk and embed a file. A file with no text yields no
    /// chunks.
    fn embed_file(&self, path: &Path) -> Result<Vec<EmbeddedChunk>> {
        let text = self.extractors.extract(path)?;
        let texts: Vec<String> = chunk_text(&text, self.config.chunk)
            .into_iter()
            .map(|c| c.text)
            .collect();
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let vectors = self.embedder.embed_documents(&texts)?;
        if vectors.len() != texts.len() {
            return Err(Error::EmbeddingProvider(format!(
                "expected {} vectors, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(texts
            .into_iter()
            .zip(vectors)
            .map(|(text, vector)| EmbeddedChunk { text, vector })
            .collect())
    }
}

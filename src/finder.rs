//! The operation surface used by the CLI: staging, indexing, search and
//! maintenance over one data directory.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::{
    chunking::ChunkOptions,
    colbert::ColbertEmbedder,
    config::{self, EmbedderConfig, EmbedderKind, IndexConfig, SearchConfig, SettingValue},
    data_dir::DataDir,
    embedding::{Embedder, HashEmbedder},
    error::{Error, Result},
    extract::ExtractorRegistry,
    ignore::IgnoreMatcher,
    indexer::{CancelToken, IndexMode, IndexOptions, Indexer, ProgressFn, RunSummary},
    metadata_store::Displaced,
    search::{Ranker, SearchFilters, SearchResult},
    staging::{AddOutcome, StagedEntry, StagingState, normalize_path},
    store_pair::{ConsistencyReport, RepairReport, StorePair},
    text_util,
    types::IndexStats,
};

/// Result of [`Finder::stage_status`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageStatus {
    pub entries: Vec<StagedEntry>,
    /// Staged paths that no longer exist on disk.
    pub missing: Vec<StagedEntry>,
}

/// Build the embedding provider selected by the settings.
pub fn build_embedder(config: &EmbedderConfig) -> Box<dyn Embedder> {
    match config.kind {
        EmbedderKind::Colbert => Box::new(ColbertEmbedder::new(config.model.as_deref())),
        EmbedderKind::Hash => Box::new(HashEmbedder::default()),
    }
}

pub struct Finder {
    data_dir: DataDir,
    stores: StorePair,
    extractors: ExtractorRegistry,
    embedder: Box<dyn Embedder>,
    ignore_root: PathBuf,
}

impl Finder {
    /// Open the index in `data_dir` with the configured embedder and the
    /// built-in extractors.
    pub fn open(data_dir: DataDir) -> Result<Self> {
        let stores = StorePair::open(&data_dir)?;
        let embedder = build_embedder(&EmbedderConfig::load(stores.metadata())?);
        Self::assemble(data_dir, stores, embedder, ExtractorRegistry::default())
    }

    /// Open with an explicit embedder and extractor set.
    pub fn open_with(
        data_dir: DataDir,
        embedder: Box<dyn Embedder>,
        extractors: ExtractorRegistry,
    ) -> Result<Self> {
        let stores = StorePair::open(&data_dir)?;
        Self::assemble(data_dir, stores, embedder, extractors)
    }

    /// Open without verifying the cross-store invariant, so that
    /// [`Finder::verify`] and [`Finder::repair`] can run on a damaged index.
    pub fn open_for_repair(data_dir: DataDir) -> Result<Self> {
        let stores = StorePair::open_unverified(&data_dir)?;
        let embedder = build_embedder(&EmbedderConfig::load(stores.metadata())?);
        Self::assemble(data_dir, stores, embedder, ExtractorRegistry::default())
    }

    fn assemble(
        data_dir: DataDir,
        stores: StorePair,
        embedder: Box<dyn Embedder>,
        extractors: ExtractorRegistry,
    ) -> Result<Self> {
        tracing::debug!(
            data_dir = %data_dir.root().display(),
            embedder = embedder.name(),
            "opened index"
        );
        Ok(Self {
            data_dir,
            stores,
            extractors,
            embedder,
            ignore_root: std::env::current_dir()?,
        })
    }

    /// Directory whose `.finderignore` applies to staging. Defaults to the
    /// working directory.
    pub fn with_ignore_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.ignore_root = root.into();
        self
    }

    pub fn data_dir(&self) -> &DataDir {
        &self.data_dir
    }

    pub fn stores(&self) -> &StorePair {
        &self.stores
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    // -- Staging --

    fn with_staging<T>(&self, f: impl FnOnce(&mut StagingState) -> Result<T>) -> Result<T> {
        let path = self.data_dir.staging_file();
        let mut state = StagingState::load(&path)?;
        let out = f(&mut state)?;
        state.save(&path)?;
        Ok(out)
    }

    /// Stage a file or directory. Fails with `NotFound` for a missing path.
    pub fn stage_add(&self, path: &Path) -> Result<AddOutcome> {
        let matcher = IgnoreMatcher::load(&self.ignore_root)?;
        self.with_staging(|state| state.add(path, &matcher))
    }

    /// Unstage a path and everything below it. Returns how many entries
    /// were removed.
    pub fn stage_remove(&self, path: &Path) -> Result<usize> {
        self.with_staging(|state| state.remove(path))
    }

    pub fn stage_status(&self) -> Result<StageStatus> {
        let state = StagingState::load(&self.data_dir.staging_file())?;
        Ok(StageStatus {
            entries: state.status(),
            missing: state.missing(),
        })
    }

    pub fn stage_clear(&self) -> Result<usize> {
        self.with_staging(|state| Ok(state.clear()))
    }

    // -- Indexing --

    fn index_config(&self, options: IndexOptions) -> Result<IndexConfig> {
        let mut config = IndexConfig::load(self.stores.metadata())?;
        if let Some(mb) = options.max_file_size_mb {
            config.max_file_size_mb = mb;
        }
        if let Some(size) = options.chunk_size {
            let overlap = if config.chunk.overlap < size {
                config.chunk.overlap
            } else {
                size / 5
            };
            config.chunk = ChunkOptions::new(size, overlap)?;
        }
        Ok(config)
    }

    pub fn index_run(&self, mode: &IndexMode, options: IndexOptions) -> Result<RunSummary> {
        self.index_run_with(mode, options, CancelToken::new(), None)
    }

    /// Index run with cancellation and progress reporting.
    pub fn index_run_with(
        &self,
        mode: &IndexMode,
        options: IndexOptions,
        cancel: CancelToken,
        progress: Option<&ProgressFn>,
    ) -> Result<RunSummary> {
        let config = self.index_config(options)?;
        let staged = match mode {
            IndexMode::Incremental => {
                StagingState::load(&self.data_dir.staging_file())?.paths()
            }
            _ => Vec::new(),
        };

        let mut indexer =
            Indexer::new(&self.stores, &self.extractors, self.embedder.as_ref(), config)
                .with_cancel(cancel);
        if let Some(progress) = progress {
            indexer = indexer.with_progress(progress);
        }
        indexer.run(mode, &staged)
    }

    // -- Search --

    /// Search with the configured threshold. `max_results` defaults to the
    /// configured value.
    pub fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        max_results: Option<usize>,
    ) -> Result<Vec<SearchResult>> {
        self.search_with_threshold(query, filters, max_results, None)
    }

    pub fn search_with_threshold(
        &self,
        query: &str,
        filters: &SearchFilters,
        max_results: Option<usize>,
        threshold: Option<f32>,
    ) -> Result<Vec<SearchResult>> {
        let config = SearchConfig::load(self.stores.metadata())?;
        let max_results = max_results.unwrap_or(config.max_results);
        Ranker::new(&self.stores, self.embedder.as_ref(), &config).search(
            query,
            filters,
            max_results,
            threshold,
        )
    }

    // -- Maintenance --

    pub fn stats(&self) -> Result<IndexStats> {
        let _guard = self.stores.read()?;
        let metadata = self.stores.metadata();
        let files = metadata.list_files()?;
        let mut stats = IndexStats {
            files: files.len(),
            chunks: metadata.chunk_count()?,
            vectors: self.stores.vectors().len()?,
            storage_bytes: self.data_dir.storage_bytes(),
            ..IndexStats::default()
        };
        for file in files {
            *stats
                .by_file_type
                .entry(file.file_type.to_string())
                .or_default() += 1;
        }
        Ok(stats)
    }

    /// Drop every indexed file. Staging and settings are kept.
    pub fn clear_index(&self) -> Result<()> {
        self.stores.clear()?;
        tracing::info!("index cleared");
        Ok(())
    }

    /// Remove one file from the index. Fails with `NotFound` if it is not
    /// indexed.
    pub fn remove_file(&self, path: &Path) -> Result<Displaced> {
        let target = normalize_path(path)?;
        self.stores
            .delete_file(&target)?
            .ok_or_else(|| Error::NotFound {
                kind: "indexed file",
                name: target.display().to_string(),
            })
    }

    /// Extracted text of a file, optionally sliced by 1-based line range.
    pub fn get_file_content(
        &self,
        path: &Path,
        start_line: usize,
        max_lines: Option<usize>,
    ) -> Result<String> {
        let target = normalize_path(path)?;
        let text = self.extractors.extract(&target)?;
        Ok(text_util::apply_line_limits(&text, start_line.max(1), max_lines))
    }

    pub fn verify(&self) -> Result<ConsistencyReport> {
        self.stores.verify()
    }

    pub fn repair(&self) -> Result<RepairReport> {
        self.stores.repair()
    }

    // -- Settings --

    pub fn config_get(&self, key: &str) -> Result<String> {
        config::get(self.stores.metadata(), key)
    }

    pub fn config_set(&self, key: &str, value: &str) -> Result<()> {
        config::set(self.stores.metadata(), key, value)
    }

    pub fn config_unset(&self, key: &str) -> Result<bool> {
        config::unset(self.stores.metadata(), key)
    }

    pub fn config_list(&self) -> Result<Vec<SettingValue>> {
        config::list(self.stores.metadata())
    }
}

impl std::fmt::Debug for Finder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Finder")
            .field("data_dir", &self.data_dir)
            .field("embedder", &self.embedder.name())
            .finish_non_exhaustive()
    }
}

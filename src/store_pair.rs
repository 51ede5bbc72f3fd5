//! The metadata store and the vector index, kept mutually consistent.
//!
//! Neither store can join the other's transaction, so every per-file
//! mutation goes through a write-ahead marker in the metadata store:
//!
//! 1. `begin_update` allocates vector ids and records a *pending* marker.
//! 2. The new vectors are written to the vector index.
//! 3. `commit_update` replaces the chunk and file rows and flips the marker
//!    to *committed*, in one metadata transaction.
//! 4. The displaced vectors are removed and the marker is cleared.
//!
//! A crash between steps leaves a marker behind. On open, pending markers
//! are rolled back (their new vectors removed) and committed markers are
//! rolled forward (their old vectors removed). All of this happens under an
//! exclusive gate that searchers share, so no reader sees a half-updated
//! file.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use serde::Serialize;

use crate::{
    data_dir::DataDir,
    error::{Error, Result},
    metadata_store::{Displaced, FileUpdate, MarkerState, MetadataStore, NewChunk},
    types::{FileType, Fingerprint, unix_now},
    vector_index::VectorIndex,
};

/// Result of comparing the two stores.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    /// Vectors with no owning chunk.
    pub orphan_vectors: Vec<u64>,
    /// Vector ids referenced by a chunk but absent from the vector index.
    pub missing_vectors: Vec<u64>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.orphan_vectors.is_empty() && self.missing_vectors.is_empty()
    }

    fn describe(&self) -> String {
        format!(
            "{} orphan vector(s), {} chunk(s) without a vector",
            self.orphan_vectors.len(),
            self.missing_vectors.len()
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub markers_recovered: usize,
    pub orphan_vectors_removed: usize,
    /// Files dropped because some of their chunks lost their vectors. They
    /// are indexed again as new files on the next run.
    pub files_dropped: Vec<PathBuf>,
}

/// A chunk's text and embedding, ready to be stored.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub text: String,
    pub vector: Vec<f32>,
}

pub struct StorePair {
    metadata: MetadataStore,
    vectors: VectorIndex,
    gate: RwLock<()>,
}

impl StorePair {
    /// Open both stores, replay interrupted updates and verify the
    /// cross-store invariant. An inconsistent pair is reported as
    /// [`Error::CorruptIndex`].
    pub fn open(data_dir: &DataDir) -> Result<Self> {
        let pair = Self::open_unverified(data_dir)?;
        let report = pair.verify()?;
        if !report.is_consistent() {
            return Err(Error::CorruptIndex(report.describe()));
        }
        Ok(pair)
    }

    /// Open both stores and replay interrupted updates without verifying.
    /// Used to reach [`StorePair::repair`] on a corrupt pair.
    pub fn open_unverified(data_dir: &DataDir) -> Result<Self> {
        let pair = Self {
            metadata: MetadataStore::open(&data_dir.metadata_db())?,
            vectors: VectorIndex::open(&data_dir.vectors_db())?,
            gate: RwLock::new(()),
        };
        pair.recover()?;
        Ok(pair)
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    pub fn vectors(&self) -> &VectorIndex {
        &self.vectors
    }

    /// Shared access for readers. Held for the duration of a search.
    pub fn read(&self) -> Result<RwLockReadGuard<'_, ()>> {
        self.gate.read().map_err(|_| Error::Poisoned("store"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, ()>> {
        self.gate.write().map_err(|_| Error::Poisoned("store"))
    }

    /// Atomically replace everything stored for `path`.
    pub fn replace_file(
        &self,
        path: &Path,
        fingerprint: Fingerprint,
        file_type: FileType,
        chunks: Vec<EmbeddedChunk>,
    ) -> Result<Displaced> {
        let _guard = self.write()?;

        let marker = self.metadata.begin_update(path, chunks.len())?;
        let ids = marker.new_vector_ids.clone();

        let mut entries = Vec::with_capacity(chunks.len());
        let mut new_chunks = Vec::with_capacity(chunks.len());
        for (chunk, id) in chunks.into_iter().zip(&ids) {
            entries.push((*id, chunk.vector));
            new_chunks.push(NewChunk {
                text: chunk.text,
                vector_id: *id,
            });
        }

        let update = FileUpdate {
            path: path.to_path_buf(),
            fingerprint,
            file_type,
            chunks: new_chunks,
            indexed_at: unix_now(),
        };

        let committed = self
            .vectors
            .add_batch(&entries)
            .and_then(|()| self.metadata.commit_update(&update));
        let displaced = match committed {
            Ok(displaced) => displaced,
            Err(e) => {
                self.roll_back(path, &ids);
                return Err(e);
            }
        };

        self.vectors.remove_batch(&displaced.vector_ids)?;
        self.metadata.clear_marker(path)?;
        Ok(displaced)
    }

    fn roll_back(&self, path: &Path, new_ids: &[u64]) {
        let result = self
            .vectors
            .remove_batch(new_ids)
            .and_then(|_| self.metadata.clear_marker(path));
        if let Err(e) = result {
            // The marker stays behind and is rolled back on the next open.
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "could not roll back failed update"
            );
        }
    }

    /// Remove a file, its chunks and their vectors. Returns `None` if the
    /// path is not indexed.
    pub fn delete_file(&self, path: &Path) -> Result<Option<Displaced>> {
        let _guard = self.write()?;
        self.delete_file_locked(path)
    }

    fn delete_file_locked(&self, path: &Path) -> Result<Option<Displaced>> {
        let Some(displaced) = self.metadata.delete_file(path)? else {
            return Ok(None);
        };
        self.vectors.remove_batch(&displaced.vector_ids)?;
        self.metadata.clear_marker(path)?;
        Ok(Some(displaced))
    }

    /// Refresh a file's stat fields after a content-neutral touch.
    pub fn touch_file(&self, file_id: u64, fingerprint: &Fingerprint) -> Result<()> {
        let _guard = self.write()?;
        self.metadata.touch_file(file_id, fingerprint)
    }

    /// Drop every file, chunk and vector.
    pub fn clear(&self) -> Result<()> {
        let _guard = self.write()?;
        self.metadata.clear()?;
        self.vectors.clear()?;
        Ok(())
    }

    /// Replay write-ahead markers left by an interrupted update.
    pub fn recover(&self) -> Result<usize> {
        let _guard = self.write()?;
        self.recover_locked()
    }

    fn recover_locked(&self) -> Result<usize> {
        let markers = self.metadata.markers()?;
        for marker in &markers {
            let stale = match marker.state {
                MarkerState::Pending => &marker.new_vector_ids,
                MarkerState::Committed => &marker.old_vector_ids,
            };
            let removed = self.vectors.remove_batch(stale)?;
            self.metadata.clear_marker(&marker.path)?;
            tracing::warn!(
                path = %marker.path.display(),
                state = ?marker.state,
                removed,
                "recovered interrupted update"
            );
        }
        Ok(markers.len())
    }

    /// Compare the vector ids the metadata references with those the vector
    /// index holds.
    pub fn verify(&self) -> Result<ConsistencyReport> {
        let _guard = self.read()?;
        self.verify_locked()
    }

    fn verify_locked(&self) -> Result<ConsistencyReport> {
        let referenced: BTreeSet<u64> =
            self.metadata.vector_ids()?.into_iter().collect();
        let stored: BTreeSet<u64> = self.vectors.ids()?.into_iter().collect();
        Ok(ConsistencyReport {
            orphan_vectors: stored.difference(&referenced).copied().collect(),
            missing_vectors: referenced.difference(&stored).copied().collect(),
        })
    }

    /// Restore the cross-store invariant: remove orphan vectors and drop
    /// files whose chunks lost their vectors.
    pub fn repair(&self) -> Result<RepairReport> {
        let _guard = self.write()?;
        let mut report = RepairReport {
            markers_recovered: self.recover_locked()?,
            ..RepairReport::default()
        };

        let consistency = self.verify_locked()?;
        report.orphan_vectors_removed =
            self.vectors.remove_batch(&consistency.orphan_vectors)?;

        let damaged: BTreeSet<u64> = self
            .metadata
            .chunks_for_vectors(&consistency.missing_vectors)?
            .into_iter()
            .filter_map(|(_, chunk)| chunk.map(|c| c.file_id))
            .collect();
        for file_id in damaged {
            if let Some(file) = self.metadata.get_file(file_id)? {
                self.delete_file_locked(&file.path)?;
                tracing::warn!(path = %file.path.display(), "dropped damaged file");
                report.files_dropped.push(file.path);
            }
        }

        tracing::info!(
            orphans = report.orphan_vectors_removed,
            dropped = report.files_dropped.len(),
            "repair finished"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for StorePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorePair").finish_non_exhaustive()
    }
}

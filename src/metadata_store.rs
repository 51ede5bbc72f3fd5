use std::path::{Path, PathBuf};

use redb::{
    Database,
    ReadableDatabase,
    ReadableTable,
    ReadableTableMetadata,
    TableDefinition,
    WriteTransaction,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    file_id::FileId,
    types::{ChunkRecord, FileRecord, FileType, Fingerprint},
};

const FILES: TableDefinition<u64, &[u8]> = TableDefinition::new("files");
const FILE_PATHS: TableDefinition<&str, u64> =
    TableDefinition::new("file_paths");
const CHUNKS: TableDefinition<u64, &[u8]> = TableDefinition::new("chunks");
/// (file_id, sequence_index) → chunk_id, so a file's chunks are one range.
const FILE_CHUNKS: TableDefinition<(u64, u32), u64> =
    TableDefinition::new("file_chunks");
const VECTOR_CHUNKS: TableDefinition<u64, u64> =
    TableDefinition::new("vector_chunks");
/// Write-ahead markers keyed by file path.
const MARKERS: TableDefinition<&str, &[u8]> = TableDefinition::new("markers");
const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");
const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

const CHUNK_COUNTER: &str = "chunk_id";
const VECTOR_COUNTER: &str = "vector_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerState {
    /// New vectors may have been written; metadata is untouched.
    Pending,
    /// Metadata is committed; the old vectors may still exist.
    Committed,
}

/// Per-file write-ahead record bridging the metadata and vector stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteMarker {
    pub path: PathBuf,
    pub state: MarkerState,
    pub new_vector_ids: Vec<u64>,
    pub old_vector_ids: Vec<u64>,
}

/// A chunk about to be committed for a file.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub text: String,
    pub vector_id: u64,
}

/// Everything needed to replace a file's metadata.
#[derive(Debug, Clone)]
pub struct FileUpdate {
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
    pub file_type: FileType,
    pub chunks: Vec<NewChunk>,
    pub indexed_at: u64,
}

/// What a commit or delete displaced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Displaced {
    pub file_id: u64,
    pub vector_ids: Vec<u64>,
    pub chunks: usize,
}

/// Relational store of files, chunks and their vector linkage.
pub struct MetadataStore {
    db: Database,
}

impl MetadataStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        // Ensure all tables exist by opening them in a write transaction.
        let txn = db.begin_write()?;
        txn.open_table(FILES)?;
        txn.open_table(FILE_PATHS)?;
        txn.open_table(CHUNKS)?;
        txn.open_table(FILE_CHUNKS)?;
        txn.open_table(VECTOR_CHUNKS)?;
        txn.open_table(MARKERS)?;
        txn.open_table(COUNTERS)?;
        txn.open_table(SETTINGS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    // -- Write-ahead protocol --

    /// Allocate `count` fresh vector ids for `path` and record them, together
    /// with the file's current vector ids, in a pending marker.
    pub fn begin_update(&self, path: &Path, count: usize) -> Result<WriteMarker> {
        let key = path_key(path);
        let txn = self.db.begin_write()?;
        let marker = {
            let start = next_ids(&txn, VECTOR_COUNTER, count as u64)?;
            let old_vector_ids = match lookup_file_id(&txn, &key)? {
                Some(file_id) => vector_ids_of(&txn, file_id)?,
                None => Vec::new(),
            };
            let marker = WriteMarker {
                path: path.to_path_buf(),
                state: MarkerState::Pending,
                new_vector_ids: (start..start + count as u64).collect(),
                old_vector_ids,
            };
            let mut markers = txn.open_table(MARKERS)?;
            markers.insert(key.as_str(), serde_json::to_vec(&marker)?.as_slice())?;
            marker
        };
        txn.commit()?;
        Ok(marker)
    }

    /// Replace a file's record and chunks, and flip its marker to
    /// committed, in one transaction.
    pub fn commit_update(&self, update: &FileUpdate) -> Result<Displaced> {
        let key = path_key(&update.path);
        let txn = self.db.begin_write()?;
        let displaced = {
            let file_id = match lookup_file_id(&txn, &key)? {
                Some(id) => id,
                None => allocate_file_id(&txn, &update.path)?,
            };
            let displaced = remove_chunks(&txn, file_id)?;

            let start = next_ids(&txn, CHUNK_COUNTER, update.chunks.len() as u64)?;
            {
                let mut chunks = txn.open_table(CHUNKS)?;
                let mut file_chunks = txn.open_table(FILE_CHUNKS)?;
                let mut vector_chunks = txn.open_table(VECTOR_CHUNKS)?;
                for (seq, chunk) in update.chunks.iter().enumerate() {
                    let record = ChunkRecord {
                        chunk_id: start + seq as u64,
                        file_id,
                        sequence_index: seq as u32,
                        text: chunk.text.clone(),
                        vector_id: chunk.vector_id,
                    };
                    chunks.insert(
                        record.chunk_id,
                        serde_json::to_vec(&record)?.as_slice(),
                    )?;
                    file_chunks.insert((file_id, seq as u32), record.chunk_id)?;
                    vector_chunks.insert(record.vector_id, record.chunk_id)?;
                }
            }

            let record = FileRecord {
                file_id,
                path: update.path.clone(),
                fingerprint: update.fingerprint.clone(),
                last_indexed_at: update.indexed_at,
                file_type: update.file_type,
                chunk_count: update.chunks.len() as u32,
            };
            {
                let mut files = txn.open_table(FILES)?;
                files.insert(file_id, serde_json::to_vec(&record)?.as_slice())?;
                let mut paths = txn.open_table(FILE_PATHS)?;
                paths.insert(key.as_str(), file_id)?;
            }

            let marker = WriteMarker {
                path: update.path.clone(),
                state: MarkerState::Committed,
                new_vector_ids: update.chunks.iter().map(|c| c.vector_id).collect(),
                old_vector_ids: displaced.vector_ids.clone(),
            };
            let mut markers = txn.open_table(MARKERS)?;
            markers.insert(key.as_str(), serde_json::to_vec(&marker)?.as_slice())?;

            displaced
        };
        txn.commit()?;
        Ok(displaced)
    }

    /// Remove a file with all its chunks, leaving a committed marker that
    /// lists the vectors still to be removed. Returns `None` if the path is
    /// not indexed.
    pub fn delete_file(&self, path: &Path) -> Result<Option<Displaced>> {
        let key = path_key(path);
        let txn = self.db.begin_write()?;
        let displaced = {
            let Some(file_id) = lookup_file_id(&txn, &key)? else {
                return Ok(None);
            };
            let displaced = remove_chunks(&txn, file_id)?;
            {
                let mut files = txn.open_table(FILES)?;
                files.remove(file_id)?;
                let mut paths = txn.open_table(FILE_PATHS)?;
                paths.remove(key.as_str())?;
            }

            let marker = WriteMarker {
                path: path.to_path_buf(),
                state: MarkerState::Committed,
                new_vector_ids: Vec::new(),
                old_vector_ids: displaced.vector_ids.clone(),
            };
            let mut markers = txn.open_table(MARKERS)?;
            markers.insert(key.as_str(), serde_json::to_vec(&marker)?.as_slice())?;

            displaced
        };
        txn.commit()?;
        Ok(Some(displaced))
    }

    pub fn clear_marker(&self, path: &Path) -> Result<()> {
        let key = path_key(path);
        let txn = self.db.begin_write()?;
        {
            let mut markers = txn.open_table(MARKERS)?;
            markers.remove(key.as_str())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn markers(&self) -> Result<Vec<WriteMarker>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(MARKERS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (_, v) = entry?;
            result.push(serde_json::from_slice(v.value())?);
        }
        Ok(result)
    }

    /// Refresh a file's stored fingerprint without touching its chunks.
    pub fn touch_file(&self, file_id: u64, fingerprint: &Fingerprint) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut files = txn.open_table(FILES)?;
            let existing = files.get(file_id)?.map(|v| v.value().to_vec());
            let Some(bytes) = existing else {
                return Err(Error::NotFound {
                    kind: "file id",
                    name: file_id.to_string(),
                });
            };
            let mut record: FileRecord = serde_json::from_slice(&bytes)?;
            record.fingerprint = fingerprint.clone();
            files.insert(file_id, serde_json::to_vec(&record)?.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Drop every file and chunk. Settings and id counters survive.
    pub fn clear(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        txn.delete_table(FILES)?;
        txn.delete_table(FILE_PATHS)?;
        txn.delete_table(CHUNKS)?;
        txn.delete_table(FILE_CHUNKS)?;
        txn.delete_table(VECTOR_CHUNKS)?;
        txn.delete_table(MARKERS)?;
        txn.open_table(FILES)?;
        txn.open_table(FILE_PATHS)?;
        txn.open_table(CHUNKS)?;
        txn.open_table(FILE_CHUNKS)?;
        txn.open_table(VECTOR_CHUNKS)?;
        txn.open_table(MARKERS)?;
        txn.commit()?;
        Ok(())
    }

    // -- Lookups --

    pub fn get_file(&self, file_id: u64) -> Result<Option<FileRecord>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(FILES)?;
        match table.get(file_id)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    pub fn get_file_by_path(&self, path: &Path) -> Result<Option<FileRecord>> {
        let txn = self.db.begin_read()?;
        let paths = txn.open_table(FILE_PATHS)?;
        let Some(file_id) = paths.get(path_key(path).as_str())?.map(|v| v.value())
        else {
            return Ok(None);
        };
        let files = txn.open_table(FILES)?;
        match files.get(file_id)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    /// All file records in path order.
    pub fn list_files(&self) -> Result<Vec<FileRecord>> {
        let txn = self.db.begin_read()?;
        let paths = txn.open_table(FILE_PATHS)?;
        let files = txn.open_table(FILES)?;
        let mut result = Vec::new();
        for entry in paths.iter()? {
            let (k, v) = entry?;
            match files.get(v.value())? {
                Some(bytes) => result.push(serde_json::from_slice(bytes.value())?),
                None => {
                    return Err(Error::CorruptIndex(format!(
                        "path {} points at missing file id {}",
                        k.value(),
                        v.value()
                    )));
                }
            }
        }
        Ok(result)
    }

    /// A file's chunks in sequence order.
    pub fn chunks_for_file(&self, file_id: u64) -> Result<Vec<ChunkRecord>> {
        let txn = self.db.begin_read()?;
        let file_chunks = txn.open_table(FILE_CHUNKS)?;
        let chunks = txn.open_table(CHUNKS)?;
        let mut result = Vec::new();
        for entry in file_chunks.range((file_id, 0u32)..=(file_id, u32::MAX))? {
            let (_, chunk_id) = entry?;
            if let Some(bytes) = chunks.get(chunk_id.value())? {
                result.push(serde_json::from_slice(bytes.value())?);
            }
        }
        Ok(result)
    }

    /// Resolve vector ids to their chunks in a single transaction,
    /// preserving input order. Unknown ids resolve to `None`.
    pub fn chunks_for_vectors(
        &self,
        vector_ids: &[u64],
    ) -> Result<Vec<(u64, Option<ChunkRecord>)>> {
        let txn = self.db.begin_read()?;
        let vector_chunks = txn.open_table(VECTOR_CHUNKS)?;
        let chunks = txn.open_table(CHUNKS)?;
        let mut result = Vec::with_capacity(vector_ids.len());
        for &vector_id in vector_ids {
            let chunk = match vector_chunks.get(vector_id)? {
                Some(chunk_id) => match chunks.get(chunk_id.value())? {
                    Some(bytes) => Some(serde_json::from_slice(bytes.value())?),
                    None => None,
                },
                None => None,
            };
            result.push((vector_id, chunk));
        }
        Ok(result)
    }

    /// Every chunk in chunk id order.
    pub fn all_chunks(&self) -> Result<Vec<ChunkRecord>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHUNKS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (_, v) = entry?;
            result.push(serde_json::from_slice(v.value())?);
        }
        Ok(result)
    }

    /// Every vector id referenced by a chunk, ascending.
    pub fn vector_ids(&self) -> Result<Vec<u64>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VECTOR_CHUNKS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, _) = entry?;
            result.push(k.value());
        }
        Ok(result)
    }

    pub fn file_count(&self) -> Result<usize> {
        let txn = self.db.begin_read()?;
        Ok(txn.open_table(FILES)?.len()? as usize)
    }

    pub fn chunk_count(&self) -> Result<usize> {
        let txn = self.db.begin_read()?;
        Ok(txn.open_table(CHUNKS)?.len()? as usize)
    }

    // -- Settings --

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    /// Get a setting, returning the default if not set.
    pub fn get_setting_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .get_setting(key)?
            .unwrap_or_else(|| default.to_string()))
    }

    pub fn remove_setting(&self, key: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(SETTINGS)?;
            table.remove(key)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    pub fn list_settings(&self) -> Result<Vec<(String, String)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            result.push((k.value().to_string(), v.value().to_string()));
        }
        Ok(result)
    }
}

impl std::fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore").finish_non_exhaustive()
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn lookup_file_id(txn: &WriteTransaction, key: &str) -> Result<Option<u64>> {
    let paths = txn.open_table(FILE_PATHS)?;
    Ok(paths.get(key)?.map(|v| v.value()))
}

/// Pick the path's preferred id, probing past ids held by other files.
fn allocate_file_id(txn: &WriteTransaction, path: &Path) -> Result<u64> {
    let files = txn.open_table(FILES)?;
    let mut candidate = FileId::for_path(path);
    while files.get(candidate.0)?.is_some() {
        candidate = candidate.next_candidate();
    }
    Ok(candidate.0)
}

/// Reserve `count` consecutive ids from a monotonic counter; returns the
/// first one. Ids start at 1.
fn next_ids(txn: &WriteTransaction, counter: &str, count: u64) -> Result<u64> {
    let mut table = txn.open_table(COUNTERS)?;
    let start = table.get(counter)?.map(|v| v.value()).unwrap_or(1);
    table.insert(counter, start + count)?;
    Ok(start)
}

fn vector_ids_of(txn: &WriteTransaction, file_id: u64) -> Result<Vec<u64>> {
    let file_chunks = txn.open_table(FILE_CHUNKS)?;
    let chunks = txn.open_table(CHUNKS)?;
    let mut ids = Vec::new();
    for entry in file_chunks.range((file_id, 0u32)..=(file_id, u32::MAX))? {
        let (_, chunk_id) = entry?;
        if let Some(bytes) = chunks.get(chunk_id.value())? {
            let chunk: ChunkRecord = serde_json::from_slice(bytes.value())?;
            ids.push(chunk.vector_id);
        }
    }
    Ok(ids)
}

/// Delete all chunk rows of a file, returning the vector ids they held.
fn remove_chunks(txn: &WriteTransaction, file_id: u64) -> Result<Displaced> {
    let mut file_chunks = txn.open_table(FILE_CHUNKS)?;
    let mut chunks = txn.open_table(CHUNKS)?;
    let mut vector_chunks = txn.open_table(VECTOR_CHUNKS)?;

    let mut keys = Vec::new();
    for entry in file_chunks.range((file_id, 0u32)..=(file_id, u32::MAX))? {
        let (k, chunk_id) = entry?;
        keys.push((k.value(), chunk_id.value()));
    }

    let mut displaced = Displaced {
        file_id,
        ..Displaced::default()
    };
    for (key, chunk_id) in keys {
        file_chunks.remove(key)?;
        let bytes = chunks.remove(chunk_id)?.map(|v| v.value().to_vec());
        if let Some(bytes) = bytes {
            let chunk: ChunkRecord = serde_json::from_slice(&bytes)?;
            vector_chunks.remove(chunk.vector_id)?;
            displaced.vector_ids.push(chunk.vector_id);
        }
        displaced.chunks += 1;
    }
    Ok(displaced)
}

use std::{collections::BTreeMap, path::Path, sync::RwLock};

use rayon::prelude::*;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::error::{Error, Result};

const VECTORS: TableDefinition<u64, &[u8]> = TableDefinition::new("vectors");

/// Header size: 4 bytes dimension.
const HEADER_SIZE: usize = 4;

/// Exact cosine-similarity index over chunk embeddings.
///
/// Vectors are L2-normalized on insert and persisted in a redb table keyed
/// by vector id. Binary format per entry:
/// - 4 bytes: dimension D (u32 LE)
/// - D * 4 bytes: f32 LE values
///
/// All vectors are mirrored in memory so that a search is a single parallel
/// scan. Removal is immediate; a removed id is never returned.
pub struct VectorIndex {
    db: Database,
    vectors: RwLock<BTreeMap<u64, Vec<f32>>>,
}

impl VectorIndex {
    /// Open or create a vector index at the given path and load it.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(VECTORS)?;
        txn.commit()?;

        let mut vectors = BTreeMap::new();
        {
            let txn = db.begin_read()?;
            let table = txn.open_table(VECTORS)?;
            for entry in table.iter()? {
                let (k, v) = entry?;
                match decode(v.value()) {
                    Some(vector) => {
                        vectors.insert(k.value(), vector);
                    }
                    None => {
                        return Err(Error::CorruptIndex(format!(
                            "vector {} has a malformed entry",
                            k.value()
                        )));
                    }
                }
            }
        }

        tracing::debug!(count = vectors.len(), "loaded vector index");
        Ok(Self {
            db,
            vectors: RwLock::new(vectors),
        })
    }

    /// Dimension of the stored vectors, or `None` while the index is empty.
    pub fn dimension(&self) -> Result<Option<usize>> {
        Ok(self.read()?.values().next().map(Vec::len))
    }

    /// Store multiple vectors in a single transaction. Existing ids are
    /// overwritten.
    pub fn add_batch(&self, entries: &[(u64, Vec<f32>)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let expected = match self.dimension()? {
            Some(d) => d,
            None => entries[0].1.len(),
        };
        for (_, vector) in entries {
            if vector.len() != expected || vector.is_empty() {
                return Err(Error::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
        }

        let normalized: Vec<(u64, Vec<f32>)> = entries
            .iter()
            .map(|(id, v)| (*id, normalize(v)))
            .collect();

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(VECTORS)?;
            for (id, vector) in &normalized {
                let byte_len = HEADER_SIZE + std::mem::size_of_val(vector.as_slice());
                let mut guard = table.insert_reserve(*id, byte_len)?;
                let dest = guard.as_mut();
                dest[0..HEADER_SIZE]
                    .copy_from_slice(&(vector.len() as u32).to_le_bytes());
                dest[HEADER_SIZE..].copy_from_slice(bytemuck::cast_slice(vector));
            }
        }
        txn.commit()?;

        let mut vectors = self.write()?;
        vectors.extend(normalized);
        Ok(())
    }

    /// Remove multiple vectors in a single transaction. Returns how many
    /// ids were present.
    pub fn remove_batch(&self, ids: &[u64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(VECTORS)?;
            for &id in ids {
                table.remove(id)?;
            }
        }
        txn.commit()?;

        let mut vectors = self.write()?;
        Ok(ids.iter().filter(|id| vectors.remove(id).is_some()).count())
    }

    /// Top-`k` vectors by cosine similarity to `query`, highest first. Ties
    /// are broken by ascending id.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u64, f32)>> {
        self.search_where(query, k, |_| true)
    }

    /// Like [`search`](Self::search), restricted to ids accepted by `keep`.
    /// The `k` best are taken among the accepted ids only.
    pub fn search_where(
        &self,
        query: &[f32],
        k: usize,
        keep: impl Fn(u64) -> bool + Sync,
    ) -> Result<Vec<(u64, f32)>> {
        let vectors = self.read()?;
        let Some(dimension) = vectors.values().next().map(Vec::len) else {
            return Ok(Vec::new());
        };
        if query.len() != dimension {
            return Err(Error::DimensionMismatch {
                expected: dimension,
                actual: query.len(),
            });
        }
        let query = normalize(query);

        let mut scored: Vec<(u64, f32)> = vectors
            .par_iter()
            .filter(|(id, _)| keep(**id))
            .map(|(id, v)| (*id, dot(&query, v)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        Ok(scored)
    }

    pub fn contains(&self, id: u64) -> Result<bool> {
        Ok(self.read()?.contains_key(&id))
    }

    /// All stored ids in ascending order.
    pub fn ids(&self) -> Result<Vec<u64>> {
        Ok(self.read()?.keys().copied().collect())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.is_empty())
    }

    /// Remove every vector.
    pub fn clear(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        txn.delete_table(VECTORS)?;
        txn.open_table(VECTORS)?;
        txn.commit()?;
        self.write()?.clear();
        Ok(())
    }

    fn read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<u64, Vec<f32>>>> {
        self.vectors.read().map_err(|_| Error::Poisoned("vector index"))
    }

    fn write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<u64, Vec<f32>>>> {
        self.vectors.write().map_err(|_| Error::Poisoned("vector index"))
    }
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex").finish_non_exhaustive()
    }
}

fn decode(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() < HEADER_SIZE {
        return None;
    }
    let dimension = u32::from_le_bytes(bytes[0..HEADER_SIZE].try_into().ok()?);
    let body = &bytes[HEADER_SIZE..];
    if body.len() != dimension as usize * 4 {
        return None;
    }
    // Stored values carry no alignment guarantee.
    Some(bytemuck::pod_collect_to_vec(body))
}

/// Scale a vector to unit length. The zero vector is returned unchanged.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

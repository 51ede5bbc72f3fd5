use std::path::Path;

use crate::{
    error::{Error, Result},
    types::{FileRecord, Fingerprint},
    walker::mtime_nanos,
};

/// How a file differs from its last indexed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    New,
    Modified,
    /// Content is identical to the indexed version. `touched` is set when
    /// the stat fields moved anyway (touch-without-edit) and the stored
    /// fingerprint should be refreshed.
    Unchanged { touched: bool },
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub change: Change,
    /// Fingerprint of the file as it is now. `None` for deleted files.
    pub fingerprint: Option<Fingerprint>,
}

/// Stat fields of a file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size_bytes: u64,
    /// Nanoseconds since the Unix epoch.
    pub mtime: u64,
}

impl FileStat {
    /// Stat `path`, returning `None` if it does not exist.
    pub fn read(path: &Path) -> Result<Option<Self>> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_dir() => Err(Error::from_io(
                path,
                std::io::Error::from(std::io::ErrorKind::IsADirectory),
            )),
            Ok(meta) => Ok(Some(Self {
                size_bytes: meta.len(),
                mtime: mtime_nanos(&meta),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::from_io(path, e)),
        }
    }
}

/// Hex-encoded blake3 hash of a file's content.
pub fn content_hash(path: &Path) -> Result<String> {
    let file = std::fs::File::open(path).map_err(|e| Error::from_io(path, e))?;
    let mut hasher = blake3::Hasher::new();
    hasher
        .update_reader(file)
        .map_err(|e| Error::from_io(path, e))?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// Classify the file at `path` against its stored record.
pub fn classify(record: Option<&FileRecord>, path: &Path) -> Result<Classification> {
    let stat = FileStat::read(path)?;
    classify_with(record, stat, || content_hash(path)).map_err(|e| match e {
        Error::NotFound { .. } => Error::NotFound {
            kind: "file",
            name: path.display().to_string(),
        },
        other => other,
    })
}

/// Classification core. `hash` is only called when the stat pre-check
/// cannot prove the content unchanged.
///
/// A file modified in the same second it was last indexed is racy: a
/// same-size rewrite within that second leaves the stat fields unchanged,
/// so such files are always hashed.
pub fn classify_with(
    record: Option<&FileRecord>,
    stat: Option<FileStat>,
    hash: impl FnOnce() -> Result<String>,
) -> Result<Classification> {
    let Some(stat) = stat else {
        return match record {
            Some(_) => Ok(Classification {
                change: Change::Deleted,
                fingerprint: None,
            }),
            None => Err(Error::NotFound {
                kind: "file",
                name: String::new(),
            }),
        };
    };

    let stat_matches = record.is_some_and(|r| {
        r.fingerprint.mtime == stat.mtime && r.fingerprint.size_bytes == stat.size_bytes
    });
    if let Some(record) = record
        && stat_matches
        && !is_racy(record)
    {
        return Ok(Classification {
            change: Change::Unchanged { touched: false },
            fingerprint: Some(record.fingerprint.clone()),
        });
    }

    let fingerprint = Fingerprint {
        content_hash: hash()?,
        size_bytes: stat.size_bytes,
        mtime: stat.mtime,
    };
    let change = match record {
        None => Change::New,
        Some(r) if r.fingerprint.content_hash == fingerprint.content_hash => {
            Change::Unchanged {
                touched: !stat_matches,
            }
        }
        Some(_) => Change::Modified,
    };
    Ok(Classification {
        change,
        fingerprint: Some(fingerprint),
    })
}

fn is_racy(record: &FileRecord) -> bool {
    record.fingerprint.mtime / NANOS_PER_SEC >= record.last_indexed_at
}

const NANOS_PER_SEC: u64 = 1_000_000_000;

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    #[error("no extractor for {file_type} file: {}", path.display())]
    UnsupportedFormat { path: PathBuf, file_type: String },

    #[error(
        "file too large: {} ({size_bytes} bytes, limit {limit_bytes} bytes)",
        path.display()
    )]
    FileTooLarge {
        path: PathBuf,
        size_bytes: u64,
        limit_bytes: u64,
    },

    #[error("cannot read {}: {source}", path.display())]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to extract {}: {reason}", path.display())]
    Extraction { path: PathBuf, reason: String },

    #[error("index is corrupt: {0} (run `docfinder repair` or rebuild)")]
    CorruptIndex(String),

    #[error("embedding provider error: {0}")]
    EmbeddingProvider(String),

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid ignore pattern: {0}")]
    InvalidPattern(String),

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),

    #[error("{0} lock poisoned")]
    Poisoned(&'static str),
}

impl Error {
    /// Errors that only affect a single file during an index run. These are
    /// recorded in the run summary and the run moves on to the next file.
    pub fn is_per_file(&self) -> bool {
        matches!(
            self,
            Error::NotFound { .. }
                | Error::PermissionDenied(_)
                | Error::FileIo { .. }
                | Error::UnsupportedFormat { .. }
                | Error::FileTooLarge { .. }
                | Error::Extraction { .. }
                | Error::EmbeddingProvider(_)
                | Error::DimensionMismatch { .. }
        )
    }

    /// Map an I/O error on the source file `path` to the matching per-file
    /// error. Store and data directory I/O stays [`Error::Io`].
    pub fn from_io(path: &std::path::Path, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound {
                kind: "file",
                name: path.display().to_string(),
            },
            std::io::ErrorKind::PermissionDenied => {
                Error::PermissionDenied(path.to_path_buf())
            }
            _ => Error::FileIo {
                path: path.to_path_buf(),
                source: err,
            },
        }
    }
}

//! Records shared between the staging set, the index stores and the ranker.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Coarse document category derived from the file extension.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Excel,
    Word,
    Csv,
    Text,
    Code,
    Data,
    Other,
}

impl FileType {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("pdf") => FileType::Pdf,
            Some("xlsx" | "xls") => FileType::Excel,
            Some("docx" | "doc") => FileType::Word,
            Some("csv") => FileType::Csv,
            Some("txt" | "md") => FileType::Text,
            Some("py" | "js" | "ts" | "html" | "css") => FileType::Code,
            Some("json" | "xml" | "yaml" | "yml" | "toml" | "ini") => {
                FileType::Data
            }
            _ => FileType::Other,
        }
    }

    pub fn is_supported(self) -> bool {
        self != FileType::Other
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileType::Pdf => "pdf",
            FileType::Excel => "excel",
            FileType::Word => "word",
            FileType::Csv => "csv",
            FileType::Text => "text",
            FileType::Code => "code",
            FileType::Data => "data",
            FileType::Other => "other",
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FileType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pdf" => Ok(FileType::Pdf),
            "excel" | "xlsx" | "xls" => Ok(FileType::Excel),
            "word" | "docx" | "doc" => Ok(FileType::Word),
            "csv" => Ok(FileType::Csv),
            "text" | "txt" | "md" => Ok(FileType::Text),
            "code" => Ok(FileType::Code),
            "data" => Ok(FileType::Data),
            other => Err(crate::Error::Config(format!(
                "unknown file type: {other}"
            ))),
        }
    }
}

/// Content fingerprint: content hash plus the stat fields used as a fast
/// pre-check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Hex-encoded blake3 hash of the file content.
    pub content_hash: String,
    pub size_bytes: u64,
    /// Modification time in nanoseconds since the Unix epoch.
    pub mtime: u64,
}

/// One indexed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_id: u64,
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
    /// Seconds since the Unix epoch.
    pub last_indexed_at: u64,
    pub file_type: FileType,
    pub chunk_count: u32,
}

impl FileRecord {
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }
}

/// One embedded span of a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: u64,
    pub file_id: u64,
    pub sequence_index: u32,
    pub text: String,
    pub vector_id: u64,
}

/// Aggregate view over the index, recomputed on demand.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexStats {
    pub files: usize,
    pub chunks: usize,
    pub vectors: usize,
    pub storage_bytes: u64,
    pub by_file_type: std::collections::BTreeMap<String, usize>,
}

pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

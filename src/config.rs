//! Typed configuration resolved from the settings table.
//!
//! Settings are free-form strings in the metadata store; this module owns
//! the list of known keys, their defaults, and how they parse.

use std::{path::PathBuf, str::FromStr};

use serde::Serialize;

use crate::{
    chunking::ChunkOptions,
    colbert::DEFAULT_MODEL_ID,
    error::{Error, Result},
    metadata_store::MetadataStore,
};

/// A setting the store accepts, with its default and a short description.
#[derive(Debug, Clone, Copy)]
pub struct SettingSpec {
    pub key: &'static str,
    pub default: &'static str,
    pub description: &'static str,
    parse: fn(&str) -> Result<()>,
}

fn parse_as<T: FromStr>(value: &str) -> Result<()> {
    value
        .trim()
        .parse::<T>()
        .map(|_| ())
        .map_err(|_| Error::Config(format!("invalid value: {value:?}")))
}

fn parse_fraction(value: &str) -> Result<()> {
    match value.trim().parse::<f32>() {
        Ok(v) if (0.0..=1.0).contains(&v) => Ok(()),
        _ => Err(Error::Config(format!(
            "expected a number between 0 and 1, got {value:?}"
        ))),
    }
}

fn parse_weight(value: &str) -> Result<()> {
    match value.trim().parse::<f32>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Ok(()),
        _ => Err(Error::Config(format!(
            "expected a non-negative number, got {value:?}"
        ))),
    }
}

fn parse_embedder(value: &str) -> Result<()> {
    EmbedderKind::from_str(value).map(|_| ())
}

fn parse_any(_: &str) -> Result<()> {
    Ok(())
}

/// Every accepted setting. `scan_roots` has a computed default, see
/// [`default_scan_roots`].
pub const SETTINGS: &[SettingSpec] = &[
    SettingSpec {
        key: "scan_roots",
        default: "",
        description: "Directories walked by a full index run (path-list separated)",
        parse: parse_any,
    },
    SettingSpec {
        key: "max_file_size_mb",
        default: "100",
        description: "Files larger than this are skipped",
        parse: parse_as::<u64>,
    },
    SettingSpec {
        key: "chunk_size",
        default: "1000",
        description: "Chunk size in characters",
        parse: parse_as::<usize>,
    },
    SettingSpec {
        key: "chunk_overlap",
        default: "200",
        description: "Characters shared by adjacent chunks",
        parse: parse_as::<usize>,
    },
    SettingSpec {
        key: "workers",
        default: "0",
        description: "Parallel indexing workers (0 = one per core)",
        parse: parse_as::<usize>,
    },
    SettingSpec {
        key: "max_results",
        default: "20",
        description: "Default number of search results",
        parse: parse_as::<usize>,
    },
    SettingSpec {
        key: "similarity_threshold",
        default: "0.7",
        description: "Minimum cosine similarity for semantic matches",
        parse: parse_fraction,
    },
    SettingSpec {
        key: "weight_semantic",
        default: "1.0",
        description: "Fusion weight of the semantic channel",
        parse: parse_weight,
    },
    SettingSpec {
        key: "weight_keyword",
        default: "0.8",
        description: "Fusion weight of the keyword channel",
        parse: parse_weight,
    },
    SettingSpec {
        key: "weight_filename",
        default: "0.7",
        description: "Fusion weight of the filename channel",
        parse: parse_weight,
    },
    SettingSpec {
        key: "filename_min_score",
        default: "0.6",
        description: "Minimum filename similarity to count as a match",
        parse: parse_fraction,
    },
    SettingSpec {
        key: "min_candidate_pool",
        default: "50",
        description: "Minimum number of vector candidates per query",
        parse: parse_as::<usize>,
    },
    SettingSpec {
        key: "embedder",
        default: "colbert",
        description: "Embedding provider: colbert or hash",
        parse: parse_embedder,
    },
    SettingSpec {
        key: "model",
        default: DEFAULT_MODEL_ID,
        description: "ColBERT model id or local path",
        parse: parse_any,
    },
];

pub fn spec(key: &str) -> Result<&'static SettingSpec> {
    SETTINGS
        .iter()
        .find(|s| s.key == key)
        .ok_or_else(|| Error::Config(format!("unknown setting: {key}")))
}

/// Validate and store a setting.
pub fn set(store: &MetadataStore, key: &str, value: &str) -> Result<()> {
    let spec = spec(key)?;
    (spec.parse)(value).map_err(|e| match e {
        Error::Config(msg) => Error::Config(format!("{key}: {msg}")),
        other => other,
    })?;
    store.set_setting(key, value.trim())
}

/// Remove a stored value so the default applies again.
pub fn unset(store: &MetadataStore, key: &str) -> Result<bool> {
    spec(key)?;
    store.remove_setting(key)
}

/// Current value of a setting, or its default.
pub fn get(store: &MetadataStore, key: &str) -> Result<String> {
    let spec = spec(key)?;
    match store.get_setting(key)? {
        Some(value) => Ok(value),
        None if spec.key == "scan_roots" => Ok(join_paths(&default_scan_roots())),
        None => Ok(spec.default.to_string()),
    }
}

/// One row of `config list`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingValue {
    pub key: &'static str,
    pub value: String,
    pub is_default: bool,
    pub description: &'static str,
}

pub fn list(store: &MetadataStore) -> Result<Vec<SettingValue>> {
    SETTINGS
        .iter()
        .map(|spec| {
            Ok(SettingValue {
                key: spec.key,
                value: get(store, spec.key)?,
                is_default: store.get_setting(spec.key)?.is_none(),
                description: spec.description,
            })
        })
        .collect()
}

fn typed<T: FromStr>(store: &MetadataStore, key: &str) -> Result<T> {
    let raw = get(store, key)?;
    raw.trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key}: invalid stored value {raw:?}")))
}

/// `~/Documents`, `~/Desktop` and `~/Downloads`, where they exist.
pub fn default_scan_roots() -> Vec<PathBuf> {
    let Some(home) = std::env::var_os("HOME").map(PathBuf::from) else {
        return Vec::new();
    };
    ["Documents", "Desktop", "Downloads"]
        .iter()
        .map(|d| home.join(d))
        .filter(|p| p.is_dir())
        .collect()
}

fn join_paths(paths: &[PathBuf]) -> String {
    std::env::join_paths(paths)
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    Colbert,
    Hash,
}

impl FromStr for EmbedderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "colbert" => Ok(Self::Colbert),
            "hash" => Ok(Self::Hash),
            other => Err(Error::Config(format!("unknown embedder: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexConfig {
    pub scan_roots: Vec<PathBuf>,
    pub max_file_size_mb: u64,
    pub chunk: ChunkOptions,
    /// Worker threads; 0 lets rayon decide.
    pub workers: usize,
}

impl IndexConfig {
    pub fn load(store: &MetadataStore) -> Result<Self> {
        let roots = get(store, "scan_roots")?;
        Ok(Self {
            scan_roots: std::env::split_paths(&roots)
                .filter(|p| !p.as_os_str().is_empty())
                .collect(),
            max_file_size_mb: typed(store, "max_file_size_mb")?,
            chunk: ChunkOptions::new(
                typed(store, "chunk_size")?,
                typed(store, "chunk_overlap")?,
            )?,
            workers: typed(store, "workers")?,
        })
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            scan_roots: Vec::new(),
            max_file_size_mb: 100,
            chunk: ChunkOptions::default(),
            workers: 0,
        }
    }
}

/// Per-channel fusion weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChannelWeights {
    pub semantic: f32,
    pub keyword: f32,
    pub filename: f32,
}

impl Default for ChannelWeights {
    fn default() -> Self {
        Self {
            semantic: 1.0,
            keyword: 0.8,
            filename: 0.7,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    pub max_results: usize,
    pub similarity_threshold: f32,
    pub weights: ChannelWeights,
    pub filename_min_score: f32,
    pub min_candidate_pool: usize,
}

impl SearchConfig {
    pub fn load(store: &MetadataStore) -> Result<Self> {
        Ok(Self {
            max_results: typed(store, "max_results")?,
            similarity_threshold: typed(store, "similarity_threshold")?,
            weights: ChannelWeights {
                semantic: typed(store, "weight_semantic")?,
                keyword: typed(store, "weight_keyword")?,
                filename: typed(store, "weight_filename")?,
            },
            filename_min_score: typed(store, "filename_min_score")?,
            min_candidate_pool: typed(store, "min_candidate_pool")?,
        })
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: 20,
            similarity_threshold: 0.7,
            weights: ChannelWeights::default(),
            filename_min_score: 0.6,
            min_candidate_pool: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedderConfig {
    pub kind: EmbedderKind,
    /// Explicitly configured model. `None` defers to `DOCFINDER_MODEL`
    /// and then the default model.
    pub model: Option<String>,
}

impl EmbedderConfig {
    pub fn load(store: &MetadataStore) -> Result<Self> {
        Ok(Self {
            kind: get(store, "embedder")?.parse()?,
            model: store.get_setting("model")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (tempfile::TempDir, MetadataStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(&tmp.path().join("metadata.redb")).unwrap();
        (tmp, store)
    }

    #[test]
    fn defaults_match_typed_defaults() {
        let (_tmp, store) = test_store();
        assert_eq!(SearchConfig::load(&store).unwrap(), SearchConfig::default());

        let index = IndexConfig::load(&store).unwrap();
        let expected = IndexConfig::default();
        assert_eq!(index.max_file_size_mb, expected.max_file_size_mb);
        assert_eq!(index.chunk, expected.chunk);
        assert_eq!(index.workers, expected.workers);
    }

    #[test]
    fn set_and_load_overrides() {
        let (_tmp, store) = test_store();
        set(&store, "max_results", "5").unwrap();
        set(&store, "weight_keyword", " 0.25 ").unwrap();
        set(&store, "scan_roots", "/a:/b").unwrap();

        let search = SearchConfig::load(&store).unwrap();
        assert_eq!(search.max_results, 5);
        assert_eq!(search.weights.keyword, 0.25);

        let index = IndexConfig::load(&store).unwrap();
        assert_eq!(
            index.scan_roots,
            vec![PathBuf::from("/a"), PathBuf::from("/b")]
        );
    }

    #[test]
    fn unknown_key_is_rejected() {
        let (_tmp, store) = test_store();
        assert!(matches!(set(&store, "colour", "blue"), Err(Error::Config(_))));
        assert!(get(&store, "colour").is_err());
    }

    #[test]
    fn malformed_values_are_rejected() {
        let (_tmp, store) = test_store();
        assert!(set(&store, "max_results", "many").is_err());
        assert!(set(&store, "similarity_threshold", "1.5").is_err());
        assert!(set(&store, "weight_semantic", "-1").is_err());
        assert!(set(&store, "embedder", "word2vec").is_err());
        assert_eq!(store.get_setting("max_results").unwrap(), None);
    }

    #[test]
    fn overlap_must_be_below_chunk_size() {
        let (_tmp, store) = test_store();
        set(&store, "chunk_size", "100").unwrap();
        set(&store, "chunk_overlap", "100").unwrap();
        assert!(IndexConfig::load(&store).is_err());
    }

    #[test]
    fn unset_restores_default() {
        let (_tmp, store) = test_store();
        set(&store, "embedder", "hash").unwrap();
        assert_eq!(
            EmbedderConfig::load(&store).unwrap().kind,
            EmbedderKind::Hash
        );
        assert!(unset(&store, "embedder").unwrap());
        assert_eq!(get(&store, "embedder").unwrap(), "colbert");
    }

    #[test]
    fn list_marks_defaults() {
        let (_tmp, store) = test_store();
        set(&store, "workers", "2").unwrap();
        let rows = list(&store).unwrap();
        assert_eq!(rows.len(), SETTINGS.len());
        let workers = rows.iter().find(|r| r.key == "workers").unwrap();
        assert!(!workers.is_default);
        assert_eq!(workers.value, "2");
        assert!(rows.iter().find(|r| r.key == "model").unwrap().is_default);
    }
}

//! docfinder - a staging-aware incremental document index with hybrid
//! search.
//!
//! Files are staged explicitly (or discovered under scan roots), split into
//! chunks, embedded and stored in a pair of [redb] databases: one for file
//! and chunk metadata, one for vectors. Index runs only re-embed files whose
//! content changed. Queries are answered by fusing semantic similarity,
//! keyword overlap and fuzzy filename matching.
//!
//! # Quick start
//!
//! ```no_run
//! use docfinder::{DataDir, Finder, IndexMode, IndexOptions, SearchFilters};
//!
//! let finder = Finder::open(DataDir::resolve(None)?)?;
//! finder.stage_add("reports".as_ref())?;
//!
//! let summary = finder.index_run(&IndexMode::Incremental, IndexOptions::default())?;
//! println!("indexed {} file(s)", summary.files_indexed);
//!
//! for r in finder.search("quarterly revenue", &SearchFilters::default(), Some(10))? {
//!     println!("{:.3} {}", r.score, r.path.display());
//! }
//! # Ok::<(), docfinder::Error>(())
//! ```
//!
//! [redb]: https://github.com/cberner/redb

pub mod change;
pub mod chunking;
pub mod colbert;
pub mod config;
pub mod data_dir;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod file_id;
pub mod finder;
pub mod ignore;
pub mod indexer;
pub mod metadata_store;
pub mod search;
pub mod staging;
pub mod store_pair;
pub mod text_util;
pub mod types;
pub mod vector_index;
pub mod walker;

pub use data_dir::DataDir;
pub use embedding::{Embedder, HashEmbedder};
pub use error::{Error, Result};
pub use extract::{Extractor, ExtractorRegistry};
pub use finder::Finder;
pub use indexer::{CancelToken, IndexMode, IndexOptions, RunSummary};
pub use search::{SearchFilters, SearchResult};
pub use types::{FileType, IndexStats};

//! Hybrid ranking over the store pair.
//!
//! Three channels produce per-file scores independently:
//!
//! 1. semantic: cosine similarity of the query embedding against chunk
//!    vectors, kept when at or above the similarity threshold
//! 2. keyword: share of the query's stemmed terms found in a chunk, or a
//!    full score when the chunk contains the query verbatim
//! 3. filename: edit-distance similarity of the query against file names
//!
//! Each file keeps its best score per channel; the fused score is the
//! largest weighted channel score, so many weak chunk hits never outrank
//! one strong hit.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet, HashSet},
    path::PathBuf,
};

use rayon::prelude::*;
use serde::Serialize;

use crate::{
    config::{ChannelWeights, SearchConfig},
    embedding::Embedder,
    error::Result,
    store_pair::StorePair,
    text_util,
    types::{ChunkRecord, FileRecord, FileType},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Semantic,
    Keyword,
    Filename,
}

/// Hard filters applied before fusion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    pub file_type: Option<FileType>,
}

impl SearchFilters {
    fn is_restrictive(&self) -> bool {
        self.file_type.is_some()
    }

    fn accepts(&self, record: &FileRecord) -> bool {
        self.file_type.is_none_or(|t| t == record.file_type)
    }
}

/// Best raw score of a file in each channel, before weighting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ChannelScores {
    pub semantic: Option<f32>,
    pub keyword: Option<f32>,
    pub filename: Option<f32>,
}

impl ChannelScores {
    fn weighted(&self, weights: &ChannelWeights) -> [(Channel, Option<f32>); 3] {
        [
            (Channel::Semantic, self.semantic.map(|s| s * weights.semantic)),
            (Channel::Keyword, self.keyword.map(|s| s * weights.keyword)),
            (Channel::Filename, self.filename.map(|s| s * weights.filename)),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    /// 1-based position in the result list.
    pub rank: usize,
    pub path: PathBuf,
    pub file_type: FileType,
    /// Snippet of the best matching chunk, if the file has any text.
    pub excerpt: Option<String>,
    pub score: f32,
    /// Channels that matched, strongest weighted contribution first.
    pub channels: Vec<Channel>,
    pub channel_scores: ChannelScores,
    #[serde(skip)]
    pub last_indexed_at: u64,
}

/// Per-file accumulator.
#[derive(Debug, Default)]
struct Candidate {
    scores: ChannelScores,
    semantic_chunk: Option<ChunkRecord>,
    keyword_chunk: Option<ChunkRecord>,
}

impl Candidate {
    fn offer_semantic(&mut self, score: f32, chunk: ChunkRecord) {
        if self.scores.semantic.is_none_or(|best| score > best) {
            self.scores.semantic = Some(score);
            self.semantic_chunk = Some(chunk);
        }
    }

    fn offer_keyword(&mut self, score: f32, chunk: ChunkRecord) {
        if self.scores.keyword.is_none_or(|best| score > best) {
            self.scores.keyword = Some(score);
            self.keyword_chunk = Some(chunk);
        }
    }
}

pub struct Ranker<'a> {
    stores: &'a StorePair,
    embedder: &'a dyn Embedder,
    config: &'a SearchConfig,
}

impl<'a> Ranker<'a> {
    pub fn new(
        stores: &'a StorePair,
        embedder: &'a dyn Embedder,
        config: &'a SearchConfig,
    ) -> Self {
        Self {
            stores,
            embedder,
            config,
        }
    }

    /// Rank indexed files against `query`.
    ///
    /// `threshold` overrides the configured semantic similarity threshold.
    /// No match is not an error: the result is simply empty.
    pub fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        max_results: usize,
        threshold: Option<f32>,
    ) -> Result<Vec<SearchResult>> {
        let query = query.trim();
        if query.is_empty() || max_results == 0 {
            return Ok(Vec::new());
        }
        let threshold = threshold.unwrap_or(self.config.similarity_threshold);

        // Hold off writers so every file is seen either before or after
        // its update.
        let _guard = self.stores.read()?;

        let files: BTreeMap<u64, FileRecord> = self
            .stores
            .metadata()
            .list_files()?
            .into_iter()
            .filter(|f| filters.accepts(f))
            .map(|f| (f.file_id, f))
            .collect();
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidates: BTreeMap<u64, Candidate> = BTreeMap::new();
        self.semantic_channel(
            query,
            threshold,
            max_results,
            filters.is_restrictive().then_some(&files),
            &mut candidates,
        )?;
        self.keyword_channel(query, &files, &mut candidates)?;
        self.filename_channel(query, &files, &mut candidates);

        let mut results: Vec<(SearchResult, Option<ChunkRecord>)> = candidates
            .into_iter()
            .filter_map(|(file_id, candidate)| {
                let record = files.get(&file_id)?;
                Some(self.fuse(record, candidate))
            })
            .collect();

        results.sort_by(|(a, _), (b, _)| compare_results(a, b));
        results.truncate(max_results);

        let mut out = Vec::with_capacity(results.len());
        for (rank, (mut result, chunk)) in results.into_iter().enumerate() {
            result.rank = rank + 1;
            result.excerpt = match chunk {
                Some(chunk) => text_util::extract_snippet(&chunk.text, query),
                None => self.first_chunk_excerpt(&result, &files, query)?,
            };
            out.push(result);
        }

        tracing::debug!(query, results = out.len(), "search finished");
        Ok(out)
    }

    fn semantic_channel(
        &self,
        query: &str,
        threshold: f32,
        max_results: usize,
        accepted: Option<&BTreeMap<u64, FileRecord>>,
        candidates: &mut BTreeMap<u64, Candidate>,
    ) -> Result<()> {
        let vectors = self.stores.vectors();
        if vectors.is_empty()? {
            return Ok(());
        }

        let query_vector = self.embedder.embed_query(query)?;
        let pool = max_results
            .saturating_mul(4)
            .max(self.config.min_candidate_pool);
        // Under a filter the pool is drawn from the accepted files' vectors
        // only, so rejected types cannot crowd out matches.
        let scored = match accepted {
            Some(files) => {
                let mut allowed = HashSet::new();
                for file_id in files.keys() {
                    for chunk in self.stores.metadata().chunks_for_file(*file_id)? {
                        allowed.insert(chunk.vector_id);
                    }
                }
                vectors.search_where(&query_vector, pool, |id| allowed.contains(&id))?
            }
            None => vectors.search(&query_vector, pool)?,
        };
        let hits: BTreeMap<u64, f32> = scored
            .into_iter()
            .filter(|(_, score)| *score >= threshold)
            .collect();
        if hits.is_empty() {
            return Ok(());
        }

        let ids: Vec<u64> = hits.keys().copied().collect();
        for (vector_id, chunk) in self.stores.metadata().chunks_for_vectors(&ids)? {
            let (Some(chunk), Some(&score)) = (chunk, hits.get(&vector_id)) else {
                continue;
            };
            if accepted.is_none_or(|files| files.contains_key(&chunk.file_id)) {
                candidates
                    .entry(chunk.file_id)
                    .or_default()
                    .offer_semantic(score, chunk);
            }
        }
        Ok(())
    }

    fn keyword_channel(
        &self,
        query: &str,
        files: &BTreeMap<u64, FileRecord>,
        candidates: &mut BTreeMap<u64, Candidate>,
    ) -> Result<()> {
        let terms: BTreeSet<String> = text_util::tokenize(query).into_iter().collect();
        let phrase = query.to_lowercase();

        let chunks: Vec<ChunkRecord> = self
            .stores
            .metadata()
            .all_chunks()?
            .into_iter()
            .filter(|c| files.contains_key(&c.file_id))
            .collect();

        let scored: Vec<(usize, f32)> = chunks
            .par_iter()
            .enumerate()
            .filter_map(|(i, chunk)| {
                let score = keyword_score(&terms, &phrase, &chunk.text);
                (score > 0.0).then_some((i, score))
            })
            .collect();

        for (i, score) in scored {
            let chunk = chunks[i].clone();
            candidates
                .entry(chunk.file_id)
                .or_default()
                .offer_keyword(score, chunk);
        }
        Ok(())
    }

    fn filename_channel(
        &self,
        query: &str,
        files: &BTreeMap<u64, FileRecord>,
        candidates: &mut BTreeMap<u64, Candidate>,
    ) {
        for (file_id, record) in files {
            let score = filename_score(query, record);
            if score >= self.config.filename_min_score {
                candidates.entry(*file_id).or_default().scores.filename = Some(score);
            }
        }
    }

    /// Weighted maximum across channels. The excerpt comes from the chunk
    /// of the strongest content channel.
    fn fuse(
        &self,
        record: &FileRecord,
        candidate: Candidate,
    ) -> (SearchResult, Option<ChunkRecord>) {
        let mut contributions: Vec<(Channel, f32)> = candidate
            .scores
            .weighted(&self.config.weights)
            .into_iter()
            .filter_map(|(channel, score)| score.map(|s| (channel, s)))
            .collect();
        contributions.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let score = contributions.first().map(|(_, s)| *s).unwrap_or(0.0);
        let channels: Vec<Channel> = contributions.iter().map(|(c, _)| *c).collect();

        let semantic_first = channels
            .iter()
            .find(|c| **c != Channel::Filename)
            .is_none_or(|c| *c == Channel::Semantic);
        let chunk = if semantic_first {
            candidate.semantic_chunk.or(candidate.keyword_chunk)
        } else {
            candidate.keyword_chunk.or(candidate.semantic_chunk)
        };

        let result = SearchResult {
            rank: 0,
            path: record.path.clone(),
            file_type: record.file_type,
            excerpt: None,
            score,
            channels,
            channel_scores: candidate.scores,
            last_indexed_at: record.last_indexed_at,
        };
        (result, chunk)
    }

    /// Excerpt for a file matched by name only.
    fn first_chunk_excerpt(
        &self,
        result: &SearchResult,
        files: &BTreeMap<u64, FileRecord>,
        query: &str,
    ) -> Result<Option<String>> {
        let Some(record) = files.values().find(|f| f.path == result.path) else {
            return Ok(None);
        };
        let chunks = self.stores.metadata().chunks_for_file(record.file_id)?;
        Ok(chunks
            .first()
            .and_then(|c| text_util::extract_snippet(&c.text, query)))
    }
}

/// Score descending, then most recently indexed, then path.
fn compare_results(a: &SearchResult, b: &SearchResult) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then(b.last_indexed_at.cmp(&a.last_indexed_at))
        .then_with(|| a.path.cmp(&b.path))
}

/// Share of `terms` present in `text`; 1.0 if `text` contains `phrase`
/// verbatim (case-insensitive).
fn keyword_score(terms: &BTreeSet<String>, phrase: &str, text: &str) -> f32 {
    if phrase.is_empty() {
        return 0.0;
    }
    if text.to_lowercase().contains(phrase) {
        return 1.0;
    }
    if terms.is_empty() {
        return 0.0;
    }
    let tokens: HashSet<String> = text_util::tokenize(text).into_iter().collect();
    let hits = terms.iter().filter(|t| tokens.contains(*t)).count();
    hits as f32 / terms.len() as f32
}

/// Similarity of the query to a file's name, in `[0, 1]`.
///
/// A query contained in the name scores 1.0; otherwise the better of the
/// normalized Levenshtein similarity against the full name and against the
/// name without extension.
fn filename_score(query: &str, record: &FileRecord) -> f32 {
    let query = query.to_lowercase();
    let name = record.file_name().to_lowercase();
    if name.is_empty() {
        return 0.0;
    }
    if name.contains(&query) {
        return 1.0;
    }
    let stem = record
        .path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_lowercase();
    let by_name = strsim::normalized_levenshtein(&query, &name);
    let by_stem = if stem.is_empty() {
        0.0
    } else {
        strsim::normalized_levenshtein(&query, &stem)
    };
    by_name.max(by_stem) as f32
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use proptest::{prelude::*, test_runner::TestRunner};

    use super::*;
    use crate::{
        data_dir::DataDir,
        embedding::HashEmbedder,
        store_pair::EmbeddedChunk,
        types::Fingerprint,
    };

    struct Fixture {
        _tmp: tempfile::TempDir,
        stores: StorePair,
        embedder: HashEmbedder,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let data = DataDir::resolve(Some(&tmp.path().join("data"))).unwrap();
        Fixture {
            stores: StorePair::open(&data).unwrap(),
            _tmp: tmp,
            embedder: HashEmbedder::default(),
        }
    }

    impl Fixture {
        fn add(&self, path: &str, chunks: &[&str]) {
            let texts: Vec<String> = chunks.iter().map(|s| s.to_string()).collect();
            let vectors = self.embedder.embed_documents(&texts).unwrap();
            let chunks = texts
                .into_iter()
                .zip(vectors)
                .map(|(text, vector)| EmbeddedChunk { text, vector })
                .collect();
            let path = Path::new(path);
            self.stores
                .replace_file(
                    path,
                    Fingerprint {
                        content_hash: path.display().to_string(),
                        size_bytes: 1,
                        mtime: 1,
                    },
                    FileType::from_path(path),
                    chunks,
                )
                .unwrap();
        }

        fn search(&self, query: &str, filters: &SearchFilters, n: usize) -> Vec<SearchResult> {
            let config = SearchConfig::default();
            Ranker::new(&self.stores, &self.embedder, &config)
                .search(query, filters, n, None)
                .unwrap()
        }

        fn search_with_threshold(&self, query: &str, threshold: f32) -> Vec<SearchResult> {
            let config = SearchConfig::default();
            Ranker::new(&self.stores, &self.embedder, &config)
                .search(query, &SearchFilters::default(), 100, Some(threshold))
                .unwrap()
        }
    }

    fn corpus() -> Fixture {
        let fx = fixture();
        fx.add("/docs/a.pdf", &["Q4 revenue $5M"]);
        fx.add("/docs/b.txt", &["grocery list"]);
        fx.add("/docs/budget.xlsx", &["budget report for march"]);
        fx.add("/docs/notes.md", &["annual budget report", "meeting notes"]);
        fx.add("/docs/plan.xlsx", &["sales plan", "grocery budget"]);
        fx.add("/docs/scan.pdf", &[]);
        fx
    }

    #[test]
    fn empty_index_returns_nothing() {
        let fx = fixture();
        assert!(fx.search("anything", &SearchFilters::default(), 10).is_empty());
    }

    #[test]
    fn blank_query_returns_nothing() {
        let fx = corpus();
        assert!(fx.search("   ", &SearchFilters::default(), 10).is_empty());
    }

    #[test]
    fn keyword_match_ranks_first() {
        let fx = corpus();
        let results = fx.search("revenue", &SearchFilters::default(), 5);
        assert_eq!(results[0].path, Path::new("/docs/a.pdf"));
        assert!(results[0].channels.contains(&Channel::Keyword));
        assert!(results.iter().all(|r| r.path != Path::new("/docs/b.txt")));
        assert_eq!(results[0].excerpt.as_deref(), Some("Q4 revenue $5M"));
    }

    #[test]
    fn filename_channel_finds_empty_files() {
        let fx = corpus();
        let results = fx.search("scan", &SearchFilters::default(), 5);
        let scan = results
            .iter()
            .find(|r| r.path == Path::new("/docs/scan.pdf"))
            .unwrap();
        assert_eq!(scan.channels, vec![Channel::Filename]);
        assert_eq!(scan.channel_scores.filename, Some(1.0));
        assert!(scan.excerpt.is_none());
    }

    #[test]
    fn fused_score_is_weighted_max() {
        let fx = corpus();
        let results = fx.search("budget report", &SearchFilters::default(), 10);
        let weights = ChannelWeights::default();
        for r in &results {
            let best = r
                .channel_scores
                .weighted(&weights)
                .iter()
                .filter_map(|(_, s)| *s)
                .fold(f32::MIN, f32::max);
            assert_eq!(r.score, best);
        }
    }

    #[test]
    fn filtered_search_is_not_crowded_out_by_other_types() {
        let fx = fixture();
        for i in 0..10 {
            fx.add(&format!("/docs/memo{i}.pdf"), &["quarterly budget forecast"]);
        }
        fx.add("/docs/sales.xlsx", &["quarterly budget forecast for sales"]);

        let config = SearchConfig {
            min_candidate_pool: 1,
            ..SearchConfig::default()
        };
        let filters = SearchFilters {
            file_type: Some(FileType::Excel),
        };
        let results = Ranker::new(&fx.stores, &fx.embedder, &config)
            .search("quarterly budget forecast", &filters, 1, Some(0.0))
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].path, Path::new("/docs/sales.xlsx"));
        assert!(results[0].channel_scores.semantic.is_some());
    }

    #[test]
    fn concurrent_search_never_sees_a_half_replaced_file() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let fx = fixture();
        let path = Path::new("/docs/a.txt");
        let versions = [
            ["alpha budget one", "alpha budget two", "alpha budget three"],
            ["beta budget one", "beta budget two", "beta budget three"],
        ];
        let write = |round: usize| {
            let texts: Vec<String> =
                versions[round % 2].iter().map(|s| s.to_string()).collect();
            let vectors = fx.embedder.embed_documents(&texts).unwrap();
            let chunks = texts
                .into_iter()
                .zip(vectors)
                .map(|(text, vector)| EmbeddedChunk { text, vector })
                .collect();
            fx.stores
                .replace_file(
                    path,
                    Fingerprint {
                        content_hash: round.to_string(),
                        size_bytes: 1,
                        mtime: 1,
                    },
                    FileType::Text,
                    chunks,
                )
                .unwrap();
        };
        write(0);

        let version_of = |text: &str| text.split(' ').next().unwrap().to_string();
        let query = fx.embedder.embed_query("budget").unwrap();
        let done = AtomicBool::new(false);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for round in 1..60 {
                    write(round);
                }
                done.store(true, Ordering::SeqCst);
            });

            let config = SearchConfig::default();
            let ranker = Ranker::new(&fx.stores, &fx.embedder, &config);
            while !done.load(Ordering::SeqCst) {
                {
                    let _guard = fx.stores.read().unwrap();
                    let ids: Vec<u64> = fx
                        .stores
                        .vectors()
                        .search(&query, 100)
                        .unwrap()
                        .into_iter()
                        .map(|(id, _)| id)
                        .collect();
                    assert_eq!(ids.len(), 3);
                    let chunks = fx.stores.metadata().chunks_for_vectors(&ids).unwrap();
                    let seen: BTreeSet<String> = chunks
                        .iter()
                        .map(|(id, chunk)| {
                            let chunk = chunk.as_ref().unwrap_or_else(|| {
                                panic!("vector {id} has no chunk")
                            });
                            version_of(&chunk.text)
                        })
                        .collect();
                    assert_eq!(seen.len(), 1, "mixed versions: {seen:?}");
                }

                let results = ranker
                    .search("budget", &SearchFilters::default(), 5, Some(0.0))
                    .unwrap();
                assert_eq!(results.len(), 1);
                assert!(results[0].excerpt.is_some());
            }
        });

        assert!(fx.stores.verify().unwrap().is_consistent());
    }

    #[test]
    fn many_weak_chunks_do_not_beat_one_strong() {
        let fx = fixture();
        fx.add("/docs/weak.txt", &["budget one", "budget two", "budget three"]);
        fx.add("/docs/strong.txt", &["budget report"]);
        let results = fx.search("budget report", &SearchFilters::default(), 5);
        assert_eq!(results[0].path, Path::new("/docs/strong.txt"));
    }

    #[test]
    fn ties_break_by_path() {
        let fx = fixture();
        fx.add("/docs/z.txt", &["same words"]);
        fx.add("/docs/y.txt", &["same words"]);
        let results = fx.search("same words", &SearchFilters::default(), 5);
        // Same score; identical index timestamps within a second fall back
        // to path order.
        if results[0].last_indexed_at == results[1].last_indexed_at {
            assert_eq!(results[0].path, Path::new("/docs/y.txt"));
        }
        assert_eq!(results[0].rank, 1);
        assert_eq!(results[1].rank, 2);
    }

    #[test]
    fn results_are_truncated() {
        let fx = corpus();
        assert!(fx.search("budget", &SearchFilters::default(), 2).len() <= 2);
        assert!(fx.search("budget", &SearchFilters::default(), 0).is_empty());
    }

    #[test]
    fn lowering_threshold_keeps_semantic_matches() {
        let fx = corpus();
        for query in ["budget report", "grocery", "annual budget report"] {
            let strict: BTreeSet<PathBuf> = fx
                .search_with_threshold(query, 0.9)
                .into_iter()
                .filter(|r| r.channel_scores.semantic.is_some())
                .map(|r| r.path)
                .collect();
            let loose: BTreeSet<PathBuf> = fx
                .search_with_threshold(query, 0.2)
                .into_iter()
                .filter(|r| r.channel_scores.semantic.is_some())
                .map(|r| r.path)
                .collect();
            assert!(strict.is_subset(&loose), "{query}: {strict:?} vs {loose:?}");
        }
    }

    #[test]
    fn keyword_score_is_overlap_ratio() {
        let terms: BTreeSet<String> = text_util::tokenize("budget report").into_iter().collect();
        assert_eq!(keyword_score(&terms, "budget report", "the budget"), 0.5);
        assert_eq!(keyword_score(&terms, "budget report", "Budget Report 2024"), 1.0);
        assert_eq!(keyword_score(&terms, "budget report", "grocery list"), 0.0);
    }

    #[test]
    fn filename_score_prefers_close_names() {
        let record = |path: &str| FileRecord {
            file_id: 1,
            path: PathBuf::from(path),
            fingerprint: Fingerprint {
                content_hash: String::new(),
                size_bytes: 0,
                mtime: 0,
            },
            last_indexed_at: 0,
            file_type: FileType::from_path(Path::new(path)),
            chunk_count: 0,
        };
        assert_eq!(filename_score("Budget", &record("/x/budget.xlsx")), 1.0);
        assert!(filename_score("budgte", &record("/x/budget.xlsx")) >= 0.6);
        assert!(filename_score("budget", &record("/x/groceries.txt")) < 0.6);
    }

    #[test]
    fn search_is_deterministic_and_filtered() {
        let fx = corpus();
        let words = prop::sample::select(vec![
            "budget", "report", "grocery", "revenue", "plan", "notes", "scan", "march",
        ]);
        let query = prop::collection::vec(words, 1..4).prop_map(|w| w.join(" "));
        let file_type = prop::option::of(prop::sample::select(vec![
            FileType::Pdf,
            FileType::Excel,
            FileType::Text,
        ]));

        let mut runner = TestRunner::new(ProptestConfig::with_cases(48));
        runner
            .run(&(query, file_type, 1usize..10), |(query, file_type, n)| {
                let filters = SearchFilters { file_type };
                let first = fx.search(&query, &filters, n);
                let second = fx.search(&query, &filters, n);
                prop_assert_eq!(&first, &second);
                prop_assert!(first.len() <= n);
                if let Some(t) = file_type {
                    prop_assert!(first.iter().all(|r| r.file_type == t));
                }
                for pair in first.windows(2) {
                    prop_assert!(pair[0].score >= pair[1].score);
                }
                Ok(())
            })
            .unwrap();
    }
}

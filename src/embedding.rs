//! Text-to-vector providers.
//!
//! The index only needs one fixed-length vector per chunk and per query.
//! [`HashEmbedder`] is deterministic and offline; the ColBERT-backed
//! provider lives in [`crate::colbert`].

use crate::{error::Result, text_util, vector_index::normalize};

/// Default dimension of [`HashEmbedder`] vectors.
pub const DEFAULT_HASH_DIMENSION: usize = 384;

pub trait Embedder: Send + Sync {
    /// Identifier recorded alongside the index, e.g. a model id.
    fn name(&self) -> &str;

    /// One vector per input text, in input order.
    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed_query(&self, query: &str) -> Result<Vec<f32>>;
}

/// Feature-hashing embedder over stemmed tokens.
///
/// Each token is hashed into one of `dimension` buckets with a hash-derived
/// sign; the bag is then L2-normalized. Texts sharing vocabulary land close
/// together, which is enough for tests and for running without a model.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text_util::tokenize(text) {
            let hash = blake3::hash(token.as_bytes());
            let bytes = hash.as_bytes();
            let mut word = [0u8; 8];
            word.copy_from_slice(&bytes[..8]);
            let bucket = (u64::from_le_bytes(word) % self.dimension as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        normalize(&vector)
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_DIMENSION)
    }
}

impl Embedder for HashEmbedder {
    fn name(&self) -> &str {
        "hash"
    }

    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }

    fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        Ok(self.embed(query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn deterministic() {
        let e = HashEmbedder::default();
        assert_eq!(
            e.embed_query("quarterly revenue").unwrap(),
            e.embed_query("quarterly revenue").unwrap()
        );
    }

    #[test]
    fn vectors_are_unit_length() {
        let e = HashEmbedder::new(64);
        let v = e.embed_query("budget report for march").unwrap();
        assert_eq!(v.len(), 64);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn shared_stems_score_higher() {
        let e = HashEmbedder::default();
        let query = e.embed_query("revenue").unwrap();
        let docs = e
            .embed_documents(&[
                "Q4 revenues grew".to_string(),
                "grocery list".to_string(),
            ])
            .unwrap();
        assert!(cosine(&query, &docs[0]) > cosine(&query, &docs[1]));
    }

    #[test]
    fn identical_text_scores_one() {
        let e = HashEmbedder::default();
        let a = e.embed_query("annual budget report").unwrap();
        let b = e.embed_documents(&["Annual Budget Reports".to_string()]).unwrap();
        assert!((cosine(&a, &b[0]) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let e = HashEmbedder::new(8);
        assert_eq!(e.embed_query("").unwrap(), vec![0.0; 8]);
    }
}

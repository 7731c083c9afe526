//! Retrieval index over a document's chunks.
//!
//! Two implementations of [`SearchIndex`] are provided:
//!
//! - **[`VectorIndex`]**: embeds every chunk once through an [`Embedder`]
//!   and answers queries by brute-force cosine similarity.
//! - **[`KeywordIndex`]**: ranks chunks by query-term overlap; needs no
//!   embedding service.
//!
//! Indexes are read-only after construction and may be shared between
//! discussions over the same document.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::Chunk;

/// Trait for embedding providers.
///
/// Concrete providers (OpenAI, Ollama, local models) live in the
/// `roundtable` app crate.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// A chunk with its similarity to a query.
#[derive(Debug, Clone)]
pub struct Hit {
    pub chunk: Chunk,
    pub score: f64,
}

/// Ranked chunk search.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Up to `k` chunks, best first.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Hit>>;
    /// Number of indexed chunks.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Embedding-backed index with exhaustive cosine search.
pub struct VectorIndex {
    embedder: Arc<dyn Embedder>,
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
}

impl VectorIndex {
    /// Embed all chunks in batches of `batch_size`.
    ///
    /// # Errors
    ///
    /// Fails if the embedder fails, returns the wrong number of vectors, or
    /// returns vectors whose length differs from [`Embedder::dims`].
    pub async fn build(embedder: Arc<dyn Embedder>, chunks: Vec<Chunk>, batch_size: usize) -> Result<Self> {
        let batch_size = batch_size.max(1);
        let mut vectors = Vec::with_capacity(chunks.len());

        for batch in chunks.chunks(batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embedded = embedder.embed(&texts).await?;
            if embedded.len() != texts.len() {
                bail!(
                    "embedder returned {} vectors for {} texts",
                    embedded.len(),
                    texts.len()
                );
            }
            for v in &embedded {
                if v.len() != embedder.dims() {
                    bail!(
                        "embedding has {} dims, model {} declares {}",
                        v.len(),
                        embedder.model_name(),
                        embedder.dims()
                    );
                }
            }
            vectors.extend(embedded);
        }

        tracing::info!(
            chunks = chunks.len(),
            model = embedder.model_name(),
            "built vector index"
        );
        Ok(Self {
            embedder,
            chunks,
            vectors,
        })
    }
}

#[async_trait]
impl SearchIndex for VectorIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Hit>> {
        if query.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let query_vec = self
            .embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))?;

        let mut hits: Vec<Hit> = self
            .chunks
            .iter()
            .zip(&self.vectors)
            .map(|(chunk, v)| Hit {
                chunk: chunk.clone(),
                score: cosine_similarity(&query_vec, v) as f64,
            })
            .collect();
        sort_hits(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }

    fn len(&self) -> usize {
        self.chunks.len()
    }
}

/// Term-overlap index, used when no embedding service is configured.
///
/// Query terms are the lowercase whitespace-separated words; terms written
/// in dense scripts are also broken into character bigrams so unsegmented
/// text still matches.
pub struct KeywordIndex {
    chunks: Vec<Chunk>,
    lowered: Vec<String>,
}

impl KeywordIndex {
    pub fn new(chunks: Vec<Chunk>) -> Self {
        let lowered = chunks.iter().map(|c| c.text.to_lowercase()).collect();
        Self { chunks, lowered }
    }
}

fn query_terms(query: &str) -> Vec<String> {
    let lower = query.to_lowercase();
    let mut terms = Vec::new();
    for word in lower.split_whitespace() {
        terms.push(word.to_string());
        let chars: Vec<char> = word.chars().collect();
        if chars.len() > 2 && !word.is_ascii() {
            terms.extend(chars.windows(2).map(|w| w.iter().collect::<String>()));
        }
    }
    terms.sort();
    terms.dedup();
    terms
}

#[async_trait]
impl SearchIndex for KeywordIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Hit>> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let mut hits: Vec<Hit> = self
            .chunks
            .iter()
            .zip(&self.lowered)
            .filter_map(|(chunk, text)| {
                let matches = terms.iter().filter(|t| text.contains(t.as_str())).count();
                (matches > 0).then(|| Hit {
                    chunk: chunk.clone(),
                    score: matches as f64,
                })
            })
            .collect();
        sort_hits(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }

    fn len(&self) -> usize {
        self.chunks.len()
    }
}

/// Score descending, then document order.
fn sort_hits(hits: &mut [Hit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
    });
}

/// Build a [`VectorIndex`], or `None` when embedding fails.
///
/// A missing index is a degraded mode: discussions proceed without
/// grounding.
pub async fn build_vector_index(
    embedder: Arc<dyn Embedder>,
    chunks: Vec<Chunk>,
    batch_size: usize,
) -> Option<VectorIndex> {
    match VectorIndex::build(embedder, chunks, batch_size).await {
        Ok(index) => Some(index),
        Err(e) => {
            tracing::warn!("index build failed, continuing without grounding: {e:#}");
            None
        }
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`; `0.0` for empty vectors or vectors of
/// different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::build_chunks;

    /// Embeds text as counts of a few marker words.
    struct MarkerEmbedder;

    #[async_trait]
    impl Embedder for MarkerEmbedder {
        fn model_name(&self) -> &str {
            "marker"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    ["budget", "hiring", "risk"]
                        .iter()
                        .map(|w| t.matches(w).count() as f32)
                        .collect()
                })
                .collect())
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            bail!("401 Unauthorized")
        }
    }

    fn chunks() -> Vec<Chunk> {
        ["The budget grows.", "Hiring is frozen.", "Risk is rising, risk everywhere."]
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let mut c = build_chunks(text, 100, 0).remove(0);
                c.chunk_index = i;
                c
            })
            .collect()
    }

    #[tokio::test]
    async fn test_vector_search_ranks_by_similarity() {
        let index = VectorIndex::build(Arc::new(MarkerEmbedder), chunks(), 2).await.unwrap();
        assert_eq!(index.len(), 3);
        let hits = index.search("what about risk", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].chunk.text.starts_with("Risk"));
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_build_failure_yields_none() {
        let index = build_vector_index(Arc::new(FailingEmbedder), chunks(), 8).await;
        assert!(index.is_none());
    }

    #[tokio::test]
    async fn test_keyword_search() {
        let index = KeywordIndex::new(chunks());
        let hits = index.search("hiring budget", 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        // equal scores fall back to document order
        assert!(hits[0].chunk.text.starts_with("The budget"));
        assert!(index.search("   ", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_keyword_search_dense_script_bigrams() {
        let index = KeywordIndex::new(build_chunks("来期の予算を削減する。", 100, 0));
        let hits = index.search("予算削減", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }
}

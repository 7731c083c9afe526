//! Document preparation: load → chunk → index.
//!
//! Index construction is non-fatal: when the embedding provider cannot be
//! created or fails while embedding, the document is still usable and
//! discussions run without grounding.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use roundtable_core::chunk::build_chunks;
use roundtable_core::index::{build_vector_index, KeywordIndex, SearchIndex};
use roundtable_core::models::{Chunk, Document};

use crate::config::{ChunkingConfig, Config, EmbeddingConfig};
use crate::embedding::create_embedder;

/// A loaded document with its chunks and (optional) retrieval index.
pub struct PreparedDocument {
    pub document: Document,
    pub chunks: Vec<Chunk>,
    pub index: Option<Arc<dyn SearchIndex>>,
}

/// Read a UTF-8 text file into a [`Document`].
pub fn load_document(path: &Path) -> Result<Document> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read document: {}", path.display()))?;
    let document = Document::new(text);
    tracing::info!(
        path = %path.display(),
        bytes = document.byte_len,
        tokens = document.estimated_tokens,
        "loaded document"
    );
    Ok(document)
}

pub fn chunk_document(document: &Document, config: &ChunkingConfig) -> Vec<Chunk> {
    let chunks = build_chunks(&document.text, config.max_tokens, config.overlap_tokens);
    tracing::info!(chunks = chunks.len(), max_tokens = config.max_tokens, "chunked document");
    chunks
}

/// Build the retrieval index selected by `embedding.provider`.
///
/// | Provider | Index |
/// |----------|-------|
/// | `disabled` | none |
/// | `keyword` | [`KeywordIndex`] |
/// | `openai` / `ollama` / `local` | `VectorIndex`, or none if embedding fails |
pub async fn build_index(chunks: Vec<Chunk>, config: &EmbeddingConfig) -> Option<Arc<dyn SearchIndex>> {
    if !config.uses_embeddings() {
        if config.provider == "keyword" {
            return Some(Arc::new(KeywordIndex::new(chunks)));
        }
        tracing::info!("embedding provider disabled, discussions run without grounding");
        return None;
    }

    let embedder = match create_embedder(config) {
        Ok(embedder) => embedder,
        Err(e) => {
            tracing::warn!("embedding provider unavailable, continuing without grounding: {e:#}");
            return None;
        }
    };
    build_vector_index(embedder, chunks, config.batch_size)
        .await
        .map(|index| Arc::new(index) as Arc<dyn SearchIndex>)
}

/// Load, chunk and index the document at `path`.
pub async fn prepare_document(path: &Path, config: &Config) -> Result<PreparedDocument> {
    let document = load_document(path)?;
    let chunks = chunk_document(&document, &config.chunking);
    let index = build_index(chunks.clone(), &config.embedding).await;
    Ok(PreparedDocument {
        document,
        chunks,
        index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &str = "Revenue grew 12% in the third quarter.\n\nCosts were flat year over year.";

    fn write_doc(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("report.txt");
        std::fs::write(&path, TEXT).unwrap();
        path
    }

    #[tokio::test]
    async fn test_keyword_index_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let prepared = prepare_document(&write_doc(&dir), &Config::minimal()).await.unwrap();
        assert_eq!(prepared.document.text, TEXT);
        assert!(!prepared.chunks.is_empty());
        let index = prepared.index.expect("keyword index");
        assert_eq!(index.len(), prepared.chunks.len());
        let hits = index.search("revenue", 3).await.unwrap();
        assert!(hits[0].chunk.text.contains("Revenue"));
    }

    #[tokio::test]
    async fn test_disabled_provider_has_no_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::minimal();
        config.embedding.provider = "disabled".into();
        let prepared = prepare_document(&write_doc(&dir), &config).await.unwrap();
        assert!(prepared.index.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_embedder_degrades() {
        let mut config = EmbeddingConfig {
            provider: "ollama".into(),
            model: Some("nomic-embed-text".into()),
            dims: Some(768),
            url: Some("http://127.0.0.1:9".into()),
            timeout_secs: 1,
            ..EmbeddingConfig::default()
        };
        config.max_retries = 0;
        let chunks = build_chunks(TEXT, 100, 0);
        assert!(build_index(chunks, &config).await.is_none());
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = load_document(Path::new("/definitely/not/here.txt")).unwrap_err();
        assert!(err.to_string().contains("Failed to read document"));
    }
}

//! The passage index itself: chunk storage plus cosine top-k search.

use std::sync::Arc;

use docpilot_core::document::DocumentChunk;
use docpilot_core::error::IndexError;
use tracing::{debug, info};

use crate::embedder::Embedder;

/// A retrieved chunk with its similarity score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    pub score: f32,
}

/// A searchable embedding index over a fixed chunk set.
///
/// Owns the chunks and their embeddings for the session lifetime (or until
/// the document set changes, at which point a fresh index replaces this
/// one entirely — a half-built index is never served).
pub struct PassageIndex {
    chunks: Vec<DocumentChunk>,
    embeddings: Vec<Vec<f32>>,
    embedder: Arc<dyn Embedder>,
}

impl std::fmt::Debug for PassageIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassageIndex")
            .field("chunks", &self.chunks.len())
            .field("embeddings", &self.embeddings.len())
            .finish_non_exhaustive()
    }
}

impl PassageIndex {
    /// Build an index over the given chunks.
    ///
    /// Fails with [`IndexError::NoChunks`] when there is nothing to index;
    /// callers degrade that to a diagnostic message rather than a fault.
    pub async fn build(
        chunks: Vec<DocumentChunk>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, IndexError> {
        if chunks.is_empty() {
            return Err(IndexError::NoChunks);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = embedder.embed(&texts).await?;

        if embeddings.len() != chunks.len() {
            return Err(IndexError::EmbeddingFailed(format!(
                "chunk/embedding count mismatch: {} vs {}",
                chunks.len(),
                embeddings.len()
            )));
        }

        info!(chunks = chunks.len(), "Passage index built");

        Ok(Self {
            chunks,
            embeddings,
            embedder,
        })
    }

    /// Top-k chunks by cosine similarity to the query.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        let query_embeddings = self.embedder.embed(&[query.to_string()]).await?;
        let query_embedding = query_embeddings
            .first()
            .ok_or_else(|| IndexError::QueryFailed("embedder returned no vector".into()))?;

        let mut scored: Vec<ScoredChunk> = self
            .chunks
            .iter()
            .zip(self.embeddings.iter())
            .map(|(chunk, embedding)| ScoredChunk {
                chunk: chunk.clone(),
                score: cosine_similarity(embedding, query_embedding),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);

        debug!(query_len = query.len(), results = scored.len(), "Passage search");

        Ok(scored)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 =
/// opposite. Returns 0.0 if either vector is zero-length or empty.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashEmbedder;

    fn chunk(content: &str, source: &str) -> DocumentChunk {
        DocumentChunk::new(content, source)
    }

    fn embedder() -> Arc<dyn Embedder> {
        Arc::new(HashEmbedder::default())
    }

    #[test]
    fn cosine_identical_vectors() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_vectors() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn cosine_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn empty_chunk_set_fails_to_build() {
        let err = PassageIndex::build(vec![], embedder()).await.unwrap_err();
        assert!(matches!(err, IndexError::NoChunks));
    }

    #[tokio::test]
    async fn search_ranks_relevant_chunk_first() {
        let index = PassageIndex::build(
            vec![
                chunk("Students can take rulers to the exam.", "doc2"),
                chunk("Sensor xyz was designed in 1999 and built in 2002.", "doc1"),
                chunk("The cafeteria opens at nine in the morning.", "doc3"),
            ],
            embedder(),
        )
        .await
        .unwrap();

        let results = index.search("when was sensor xyz built", 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.source, "doc1");
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn search_respects_k() {
        let chunks: Vec<_> = (0..20)
            .map(|i| chunk(&format!("chunk number {i}"), "doc"))
            .collect();
        let index = PassageIndex::build(chunks, embedder()).await.unwrap();

        let results = index.search("chunk number", 5).await.unwrap();
        assert_eq!(results.len(), 5);
    }

    #[tokio::test]
    async fn index_reports_size() {
        let index = PassageIndex::build(vec![chunk("a", "s")], embedder())
            .await
            .unwrap();
        assert_eq!(index.len(), 1);
        assert!(!index.is_empty());
    }
}

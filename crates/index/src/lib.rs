//! Passage index — embedding-based similarity search over document chunks.
//!
//! The index is an external capability from the agent's point of view: it
//! is built once from the current chunk set and answers top-k similarity
//! queries. Rebuilds are wholesale — a document change produces a fresh
//! index, never an in-place patch.

pub mod embedder;
pub mod passage_index;

pub use embedder::{Embedder, HashEmbedder, ProviderEmbedder};
pub use passage_index::{PassageIndex, ScoredChunk, cosine_similarity};

//! Embedding seam
//!
//! Computing vectors is an external concern: the synchronizer only needs an
//! opaque text-to-vector function so the Qdrant adapter can build points.
//! Callers plug in whatever backend they use.

use crate::error::Result;
use async_trait::async_trait;

/// Trait for embedding providers
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

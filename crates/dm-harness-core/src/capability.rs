//! Capability traits for the external model collaborators.
//!
//! The retrieval core does not run models; it talks to three capabilities
//! through these traits. Concrete implementations (HTTP providers, disabled
//! stand-ins) live in the application crate and are selected by explicit
//! configuration, never by structural typing.
//!
//! Implementations must be `Send + Sync`; queries may run concurrently
//! against a ready index, so a capability has to be reentrant. Failures are
//! returned as `anyhow::Error` and are never retried or degraded here —
//! propagation is the caller's contract.

use anyhow::Result;
use async_trait::async_trait;

/// Text generation: used only for answer synthesis and agent turns, never
/// for indexing.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a completion for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Text embedding: called once per leaf chunk at build time and once per
/// query at query time. Vectors must be stable for a fixed model; mixing
/// models between build and query is a caller error the index cannot detect.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier, recorded in the index manifest.
    fn model_name(&self) -> &str;

    /// Embedding vector dimensionality.
    fn dims(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text (e.g. a search query).
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let mut vectors = self.embed_batch(&texts).await?;
        anyhow::ensure!(!vectors.is_empty(), "embedder returned no vector");
        Ok(vectors.remove(0))
    }
}

/// Cross-encoder relevance scoring of (query, candidate) pairs.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// One relevance score per text, in input order; higher is more relevant.
    async fn score_batch(&self, query: &str, texts: &[String]) -> Result<Vec<f32>>;
}

//! Typed failures of index construction, persistence, and retrieval.
//!
//! Capability failures (embedding, generation, reranking) are not modeled
//! here; they propagate as `anyhow::Error` with context from the call site.
//! The variants below are the conditions the lifecycle logic and the tests
//! branch on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    /// Source directory missing or unreadable.
    #[error("failed to load source documents: {0}")]
    Load(String),

    /// The scan finished but produced no usable documents.
    #[error("no usable documents found under {0}")]
    EmptyCorpus(String),

    /// A persisted index is present but unreadable or inconsistent.
    #[error("index cache is corrupt: {0}")]
    CacheCorrupt(String),

    /// The merged candidate set contains overlapping spans.
    ///
    /// Indicates a bug in chunking or merging, not a user error.
    #[error("auto-merge invariant violated: {0}")]
    MergeInvariant(String),
}

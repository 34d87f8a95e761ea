//! # DM Harness Core
//!
//! Shared retrieval logic for DM Harness: data models, the hierarchical
//! chunker, the chunk store, the leaf vector index, auto-merging retrieval,
//! reranking, tree synthesis, and the capability traits through which the
//! external model collaborators are reached.
//!
//! This crate performs no filesystem or network I/O of its own. Documents
//! arrive as values, and every model invocation (generation, embedding,
//! relevance scoring) goes through a trait in [`capability`].

pub mod capability;
pub mod chunker;
pub mod engine;
pub mod error;
pub mod index;
pub mod models;
pub mod rerank;
pub mod retriever;
pub mod store;
pub mod synthesis;

//! Core data models used throughout DM Harness.
//!
//! These types represent the documents, chunk nodes, and retrieval
//! candidates that flow through the indexing and query pipeline.

use serde::{Deserialize, Serialize};

/// A source rules document, produced once by the loader and consumed by the
/// chunker. Immutable after creation.
#[derive(Debug, Clone)]
pub struct Document {
    /// Stable identifier: the file path relative to the corpus root.
    pub id: String,
    /// Absolute path of the source file, kept for diagnostics.
    pub source_path: String,
    /// Flattened text content.
    pub text: String,
}

/// A contiguous span of document text at one granularity level.
///
/// Level 0 is the coarsest granularity. Leaves carry no children and are the
/// only nodes that get embedded. Nodes are created by the chunker and never
/// mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkNode {
    pub id: String,
    pub document_id: String,
    pub level: usize,
    pub text: String,
    /// Absent only for root-level (level 0) nodes.
    pub parent_id: Option<String>,
    /// Children in text order; empty for leaves.
    pub child_ids: Vec<String>,
}

impl ChunkNode {
    pub fn is_leaf(&self) -> bool {
        self.child_ids.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Deterministic node id: `<document>#<level>.<ordinal>`.
///
/// The ordinal counts nodes of that level within the document in text order,
/// so ids are stable across rebuilds of an unchanged corpus and give ties a
/// reproducible order.
pub fn node_id(document_id: &str, level: usize, ordinal: usize) -> String {
    format!("{}#{}.{}", document_id, level, ordinal)
}

/// A transient per-query result record, discarded after the query completes.
///
/// `score` starts as cosine similarity out of the vector index and is
/// replaced by the rerank score once the reranker has run.
#[derive(Debug, Clone)]
pub struct RetrievalCandidate {
    pub node_id: String,
    pub text: String,
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_format() {
        assert_eq!(node_id("srd/weapons.json", 2, 17), "srd/weapons.json#2.17");
    }

    #[test]
    fn test_leaf_and_root_flags() {
        let node = ChunkNode {
            id: node_id("d", 0, 0),
            document_id: "d".to_string(),
            level: 0,
            text: "spans".to_string(),
            parent_id: None,
            child_ids: vec![node_id("d", 1, 0)],
        };
        assert!(node.is_root());
        assert!(!node.is_leaf());
    }
}

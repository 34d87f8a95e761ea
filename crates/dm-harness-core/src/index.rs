//! Leaf vector index: brute-force cosine nearest-neighbour search over the
//! finest-granularity chunks.
//!
//! Only leaves are embedded; coarser nodes enter a result set exclusively
//! through auto-merging. The index is built once, persisted next to the
//! chunk store, and treated as immutable afterwards. Every entry must
//! resolve to a leaf in the accompanying store — loading one without the
//! matching other is an integrity error checked by
//! [`VectorIndex::check_consistent`].

use std::collections::HashSet;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capability::Embedder;
use crate::models::{ChunkNode, RetrievalCandidate};
use crate::store::ChunkStore;

/// Association between a leaf node and its embedding vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeafIndexEntry {
    pub node_id: String,
    pub vector: Vec<f32>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct VectorIndex {
    dims: usize,
    entries: Vec<LeafIndexEntry>,
}

impl VectorIndex {
    /// Embed every leaf and record its vector, batching calls to the
    /// embedding capability.
    pub async fn build(
        leaves: &[&ChunkNode],
        embedder: &dyn Embedder,
        batch_size: usize,
    ) -> Result<Self> {
        let mut entries = Vec::with_capacity(leaves.len());
        for batch in leaves.chunks(batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|n| n.text.clone()).collect();
            let vectors = embedder
                .embed_batch(&texts)
                .await
                .context("embedding capability failed during index build")?;
            anyhow::ensure!(
                vectors.len() == texts.len(),
                "embedder returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            );
            for (node, vector) in batch.iter().zip(vectors) {
                entries.push(LeafIndexEntry {
                    node_id: node.id.clone(),
                    vector,
                });
            }
        }
        debug!(leaves = entries.len(), dims = embedder.dims(), "vector index built");
        Ok(Self {
            dims: embedder.dims(),
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn entries(&self) -> &[LeafIndexEntry] {
        &self.entries
    }

    /// Verify that every indexed vector corresponds to exactly one existing
    /// leaf in `store`.
    pub fn check_consistent(&self, store: &ChunkStore) -> Result<()> {
        let mut seen: HashSet<&str> = HashSet::with_capacity(self.entries.len());
        for entry in &self.entries {
            anyhow::ensure!(
                seen.insert(entry.node_id.as_str()),
                "duplicate index entry for node {}",
                entry.node_id
            );
            let node = store.get(&entry.node_id).ok_or_else(|| {
                anyhow::anyhow!("index entry {} does not resolve in the chunk store", entry.node_id)
            })?;
            anyhow::ensure!(
                node.is_leaf(),
                "index entry {} is not a leaf node",
                entry.node_id
            );
        }
        Ok(())
    }

    /// Embed the query and return the `k` most similar leaves as
    /// [`RetrievalCandidate`]s, ordered by score descending with ties broken
    /// by node id. Leaves with non-positive similarity are not hits and are
    /// dropped before the cut.
    pub async fn search(
        &self,
        store: &ChunkStore,
        embedder: &dyn Embedder,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievalCandidate>> {
        let query_vec = embedder
            .embed(query)
            .await
            .context("embedding capability failed for query")?;

        let mut hits: Vec<RetrievalCandidate> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let score = cosine_similarity(&query_vec, &entry.vector);
                if score <= 0.0 {
                    return None;
                }
                let text = store.get(&entry.node_id).map(|n| n.text.clone())?;
                Some(RetrievalCandidate {
                    node_id: entry.node_id.clone(),
                    text,
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.node_id.cmp(&b.node_id))
        });
        hits.truncate(k);
        Ok(hits)
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

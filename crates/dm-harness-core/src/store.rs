//! Durable record of the chunk forest.
//!
//! The [`ChunkStore`] maps node id to [`ChunkNode`] across *all* granularity
//! levels; the vector index only knows leaves, and parent lookups during
//! auto-merging go through the store. It is populated once at build time,
//! persisted alongside the vector index, and replaced wholesale on rebuild —
//! never partially updated.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::ChunkNode;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ChunkStore {
    nodes: HashMap<String, ChunkNode>,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_nodes(nodes: Vec<ChunkNode>) -> Self {
        let mut store = Self::new();
        for node in nodes {
            store.nodes.insert(node.id.clone(), node);
        }
        store
    }

    pub fn get(&self, id: &str) -> Option<&ChunkNode> {
        self.nodes.get(id)
    }

    pub fn parent_of(&self, node: &ChunkNode) -> Option<&ChunkNode> {
        node.parent_id.as_deref().and_then(|id| self.nodes.get(id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChunkNode> {
        self.nodes.values()
    }

    /// All leaf nodes, ordered by id for deterministic downstream processing.
    pub fn leaf_nodes(&self) -> Vec<&ChunkNode> {
        let mut leaves: Vec<&ChunkNode> = self.nodes.values().filter(|n| n.is_leaf()).collect();
        leaves.sort_by(|a, b| a.id.cmp(&b.id));
        leaves
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.values().filter(|n| n.is_leaf()).count()
    }

    /// True when `node_id` sits strictly below `ancestor_id` in the forest.
    pub fn is_descendant(&self, node_id: &str, ancestor_id: &str) -> bool {
        let mut current = self.nodes.get(node_id).and_then(|n| n.parent_id.as_deref());
        let mut hops = 0usize;
        while let Some(parent_id) = current {
            if parent_id == ancestor_id {
                return true;
            }
            // Defensive bound; real forests are only a few levels deep.
            hops += 1;
            if hops > 64 {
                return false;
            }
            current = self.nodes.get(parent_id).and_then(|n| n.parent_id.as_deref());
        }
        false
    }

    /// Check the structural invariants of the forest: every parent link
    /// resolves, every non-root node appears exactly once in its parent's
    /// children, children are exactly one level finer, and every child link
    /// points back at its parent.
    ///
    /// Run after every load from disk; a violation there means the persisted
    /// state is corrupt.
    pub fn validate(&self) -> anyhow::Result<()> {
        for node in self.nodes.values() {
            match &node.parent_id {
                Some(parent_id) => {
                    let parent = self.nodes.get(parent_id).ok_or_else(|| {
                        anyhow::anyhow!("node {} references missing parent {}", node.id, parent_id)
                    })?;
                    anyhow::ensure!(
                        parent.level + 1 == node.level,
                        "node {} at level {} has parent {} at level {}",
                        node.id,
                        node.level,
                        parent.id,
                        parent.level
                    );
                    let occurrences =
                        parent.child_ids.iter().filter(|c| *c == &node.id).count();
                    anyhow::ensure!(
                        occurrences == 1,
                        "node {} appears {} times in children of {}",
                        node.id,
                        occurrences,
                        parent.id
                    );
                }
                None => anyhow::ensure!(
                    node.level == 0,
                    "node {} at level {} has no parent",
                    node.id,
                    node.level
                ),
            }

            for child_id in &node.child_ids {
                let child = self.nodes.get(child_id).ok_or_else(|| {
                    anyhow::anyhow!("node {} references missing child {}", node.id, child_id)
                })?;
                anyhow::ensure!(
                    child.parent_id.as_deref() == Some(node.id.as_str()),
                    "child {} does not link back to {}",
                    child_id,
                    node.id
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::HierarchicalChunker;
    use crate::models::Document;

    fn sample_store() -> ChunkStore {
        let text = (0..60)
            .map(|i| format!("Paragraph {} of the spellcasting chapter.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let doc = Document {
            id: "spells.json".to_string(),
            source_path: "/srd/spells.json".to_string(),
            text,
        };
        let chunker = HierarchicalChunker::new(vec![128, 32, 8]).unwrap();
        ChunkStore::from_nodes(chunker.chunk_document(&doc))
    }

    #[test]
    fn test_validate_accepts_chunker_output() {
        let store = sample_store();
        assert!(!store.is_empty());
        store.validate().unwrap();
    }

    #[test]
    fn test_leaf_nodes_sorted_and_leafy() {
        let store = sample_store();
        let leaves = store.leaf_nodes();
        assert_eq!(leaves.len(), store.leaf_count());
        assert!(leaves.iter().all(|n| n.is_leaf()));
        for pair in leaves.windows(2) {
            assert!(pair[0].id < pair[1].id);
        }
    }

    #[test]
    fn test_is_descendant_walks_ancestry() {
        let store = sample_store();
        let leaf = store.leaf_nodes()[0].clone();
        let parent = store.parent_of(&leaf).unwrap().clone();
        let root = store.parent_of(&parent).unwrap().clone();

        assert!(store.is_descendant(&leaf.id, &parent.id));
        assert!(store.is_descendant(&leaf.id, &root.id));
        assert!(!store.is_descendant(&root.id, &leaf.id));
        assert!(!store.is_descendant(&leaf.id, &leaf.id));
    }

    #[test]
    fn test_validate_rejects_missing_parent() {
        let mut nodes: Vec<ChunkNode> = sample_store().iter().cloned().collect();
        // Point one leaf at a parent that does not exist.
        let leaf = nodes.iter_mut().find(|n| n.is_leaf()).unwrap();
        leaf.parent_id = Some("missing#1.0".to_string());
        let store = ChunkStore::from_nodes(nodes);
        assert!(store.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_orphaned_child_link() {
        let mut nodes: Vec<ChunkNode> = sample_store().iter().cloned().collect();
        let parent = nodes.iter_mut().find(|n| !n.is_leaf()).unwrap();
        parent.child_ids.push("missing#2.99".to_string());
        let store = ChunkStore::from_nodes(nodes);
        assert!(store.validate().is_err());
    }
}

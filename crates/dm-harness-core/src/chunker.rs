//! Hierarchical text chunker.
//!
//! Splits each document into a forest of nested [`ChunkNode`]s at multiple
//! granularities: the document is cut into coarsest-level spans, each span is
//! recursively cut into the next-finer size, and parent/child links are
//! attached, down to the finest level.
//!
//! # Algorithm
//!
//! 1. Convert each level's token budget to characters using a 4 chars/token
//!    ratio.
//! 2. Walk the text left to right, ending each span at the last whitespace
//!    inside the character window (hard split at a UTF-8 boundary only when
//!    a window contains no whitespace), so sibling spans partition the
//!    parent text with no gaps or overlaps.
//! 3. Store each node's text trimmed; trimming is the only whitespace
//!    normalization applied, which keeps splitting lossless at the text
//!    level (concatenating a node's children reconstructs the parent modulo
//!    whitespace).
//! 4. A document yielding no nodes (empty or whitespace-only) is skipped
//!    with a warning, never a fatal error.

use tracing::warn;

use crate::models::{node_id, ChunkNode, Document};

/// Approximate characters-per-token ratio (4 chars ≈ 1 token).
const CHARS_PER_TOKEN: usize = 4;

/// Splits documents into a multi-level chunk forest.
pub struct HierarchicalChunker {
    /// Token budgets, coarsest first, strictly decreasing.
    chunk_sizes: Vec<usize>,
}

impl HierarchicalChunker {
    /// Create a chunker from token budgets ordered coarsest to finest.
    ///
    /// # Errors
    ///
    /// Fails when `chunk_sizes` is empty, contains a zero, or is not
    /// strictly decreasing.
    pub fn new(chunk_sizes: Vec<usize>) -> anyhow::Result<Self> {
        anyhow::ensure!(!chunk_sizes.is_empty(), "chunk_sizes must not be empty");
        anyhow::ensure!(
            chunk_sizes.iter().all(|&s| s > 0),
            "chunk_sizes must all be > 0"
        );
        anyhow::ensure!(
            chunk_sizes.windows(2).all(|w| w[0] > w[1]),
            "chunk_sizes must be strictly decreasing (coarsest first)"
        );
        Ok(Self { chunk_sizes })
    }

    /// Number of granularity levels.
    pub fn levels(&self) -> usize {
        self.chunk_sizes.len()
    }

    /// Chunk a batch of documents into one combined forest.
    pub fn chunk_documents(&self, documents: &[Document]) -> Vec<ChunkNode> {
        let mut nodes = Vec::new();
        for doc in documents {
            nodes.extend(self.chunk_document(doc));
        }
        nodes
    }

    /// Chunk a single document. Returns an empty forest (with a logged
    /// warning) for documents without usable text.
    pub fn chunk_document(&self, doc: &Document) -> Vec<ChunkNode> {
        let text = doc.text.trim();
        if text.is_empty() {
            warn!(document = %doc.id, "document produced no chunks, skipping");
            return Vec::new();
        }

        let mut nodes = Vec::new();
        let mut ordinals = vec![0usize; self.levels()];
        self.split_level(&mut nodes, &mut ordinals, doc, text, 0, None);
        nodes
    }

    /// Split `text` into nodes at `level`, recursing into finer levels.
    /// Returns the ids of the nodes created at this level, in text order.
    fn split_level(
        &self,
        nodes: &mut Vec<ChunkNode>,
        ordinals: &mut [usize],
        doc: &Document,
        text: &str,
        level: usize,
        parent_id: Option<&str>,
    ) -> Vec<String> {
        let max_chars = self.chunk_sizes[level] * CHARS_PER_TOKEN;
        let mut ids = Vec::new();

        for span in split_spans(text, max_chars) {
            let trimmed = span.trim();
            if trimmed.is_empty() {
                continue;
            }

            let id = node_id(&doc.id, level, ordinals[level]);
            ordinals[level] += 1;

            let child_ids = if level + 1 < self.levels() {
                self.split_level(nodes, ordinals, doc, trimmed, level + 1, Some(&id))
            } else {
                Vec::new()
            };

            nodes.push(ChunkNode {
                id: id.clone(),
                document_id: doc.id.clone(),
                level,
                text: trimmed.to_string(),
                parent_id: parent_id.map(|p| p.to_string()),
                child_ids,
            });
            ids.push(id);
        }

        ids
    }
}

/// Cut `text` into contiguous spans of at most `max_chars` characters,
/// preferring whitespace boundaries. The spans partition the input exactly.
fn split_spans(text: &str, max_chars: usize) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        if rest.len() <= max_chars {
            spans.push(rest);
            break;
        }

        let window = snap_to_char_boundary(rest, max_chars);
        let cut = rest[..window]
            .char_indices()
            .rev()
            .find(|(_, c)| c.is_whitespace())
            .map(|(pos, c)| pos + c.len_utf8())
            .unwrap_or(window);

        // Always make progress, even on a single oversized grapheme run.
        let cut = if cut == 0 {
            rest.char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(rest.len())
        } else {
            cut
        };

        spans.push(&rest[..cut]);
        rest = &rest[cut..];
    }

    spans
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, text: &str) -> Document {
        Document {
            id: id.to_string(),
            source_path: format!("/srd/{}", id),
            text: text.to_string(),
        }
    }

    fn normalize_ws(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_rejects_bad_chunk_sizes() {
        assert!(HierarchicalChunker::new(vec![]).is_err());
        assert!(HierarchicalChunker::new(vec![128, 128]).is_err());
        assert!(HierarchicalChunker::new(vec![128, 512]).is_err());
        assert!(HierarchicalChunker::new(vec![512, 0]).is_err());
        assert!(HierarchicalChunker::new(vec![2048, 512, 128]).is_ok());
    }

    #[test]
    fn test_small_document_single_chain() {
        let chunker = HierarchicalChunker::new(vec![2048, 512, 128]).unwrap();
        let nodes = chunker.chunk_document(&doc("d", "A short rule."));
        // One node per level, chained root -> middle -> leaf.
        assert_eq!(nodes.len(), 3);
        let root = nodes.iter().find(|n| n.level == 0).unwrap();
        let leaf = nodes.iter().find(|n| n.level == 2).unwrap();
        assert!(root.is_root());
        assert!(leaf.is_leaf());
        assert_eq!(root.text, "A short rule.");
        assert_eq!(leaf.text, "A short rule.");
    }

    #[test]
    fn test_empty_document_skipped() {
        let chunker = HierarchicalChunker::new(vec![512, 128]).unwrap();
        assert!(chunker.chunk_document(&doc("d", "")).is_empty());
        assert!(chunker.chunk_document(&doc("d", "   \n\t  ")).is_empty());
    }

    #[test]
    fn test_leaf_coverage_reconstructs_document() {
        let text = (0..120)
            .map(|i| format!("Rule number {} covers a distinct situation.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunker = HierarchicalChunker::new(vec![256, 64, 16]).unwrap();
        let nodes = chunker.chunk_document(&doc("d", &text));

        let mut leaves: Vec<&ChunkNode> = nodes.iter().filter(|n| n.is_leaf()).collect();
        leaves.sort_by_key(|n| {
            n.id.rsplit('.')
                .next()
                .and_then(|s| s.parse::<usize>().ok())
                .unwrap_or(0)
        });
        let rebuilt = leaves.iter().map(|n| n.text.as_str()).collect::<Vec<_>>().join(" ");
        assert_eq!(normalize_ws(&rebuilt), normalize_ws(&text));
    }

    #[test]
    fn test_children_partition_parent() {
        let text = (0..80)
            .map(|i| format!("Clause {} of the combat chapter.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunker = HierarchicalChunker::new(vec![128, 32]).unwrap();
        let nodes = chunker.chunk_document(&doc("d", &text));

        for parent in nodes.iter().filter(|n| !n.is_leaf()) {
            let rebuilt = parent
                .child_ids
                .iter()
                .map(|cid| {
                    nodes
                        .iter()
                        .find(|n| &n.id == cid)
                        .expect("child id resolves")
                        .text
                        .as_str()
                })
                .collect::<Vec<_>>()
                .join(" ");
            assert_eq!(normalize_ws(&rebuilt), normalize_ws(&parent.text));
        }
    }

    #[test]
    fn test_parent_links_consistent() {
        let text = (0..60)
            .map(|i| format!("Sentence {} about grappling rules.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunker = HierarchicalChunker::new(vec![96, 24, 8]).unwrap();
        let nodes = chunker.chunk_document(&doc("d", &text));

        for node in &nodes {
            if let Some(parent_id) = &node.parent_id {
                let parent = nodes.iter().find(|n| &n.id == parent_id).expect("parent exists");
                assert_eq!(parent.level + 1, node.level, "child must be one level finer");
                let occurrences = parent.child_ids.iter().filter(|c| *c == &node.id).count();
                assert_eq!(occurrences, 1, "node appears exactly once in parent's children");
            } else {
                assert_eq!(node.level, 0, "only level-0 nodes are roots");
            }
        }
    }

    #[test]
    fn test_ids_unique_and_deterministic() {
        let text = (0..50)
            .map(|i| format!("Entry {} in the bestiary.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunker = HierarchicalChunker::new(vec![64, 16]).unwrap();
        let a = chunker.chunk_document(&doc("d", &text));
        let b = chunker.chunk_document(&doc("d", &text));

        let mut seen = std::collections::HashSet::new();
        for node in &a {
            assert!(seen.insert(node.id.clone()), "duplicate id {}", node.id);
        }

        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.id, y.id);
            assert_eq!(x.text, y.text);
            assert_eq!(x.parent_id, y.parent_id);
            assert_eq!(x.child_ids, y.child_ids);
        }
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────────────┐ druid café naïve ── └──────────────────┘ ".repeat(8);
        let chunker = HierarchicalChunker::new(vec![16, 4]).unwrap();
        let nodes = chunker.chunk_document(&doc("d", &text));
        assert!(!nodes.is_empty());
        for node in &nodes {
            assert!(!node.text.is_empty());
        }
    }

    #[test]
    fn test_spans_partition_exactly() {
        let text = "one two three four five six seven eight nine ten";
        let spans = split_spans(text, 12);
        assert_eq!(spans.concat(), text);
        for span in spans {
            assert!(span.len() <= 13, "span too long: {:?}", span);
        }
    }
}

//! Auto-merging post-processing of leaf search hits.
//!
//! When a query's relevant region spans many sibling leaves, returning the
//! individual fragments is redundant; the shared parent span is the better
//! context unit. Starting from the leaf hits, candidates are grouped by
//! parent and a parent whose children are sufficiently represented in the
//! hit set replaces them, recursively, one level per pass.
//!
//! Determinism: a promoted parent carries the maximum of its matched
//! children's scores, parents are considered in id order, and the final
//! ordering is `(score desc, node id asc)`. The output never contains both
//! a node and one of its ancestors or descendants; that invariant is
//! enforced after merging and a violation fails the query loudly.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::error::IndexError;
use crate::models::RetrievalCandidate;
use crate::store::ChunkStore;

/// Fraction of a parent's children that must be present in the hit set
/// before the parent replaces them. 0.6 means a strict majority: one of two
/// siblings does not merge, two of three do.
pub const DEFAULT_MERGE_THRESHOLD: f32 = 0.6;

pub struct AutoMergingRetriever<'a> {
    store: &'a ChunkStore,
    threshold: f32,
    /// Maximum number of merge passes; bounded by granularity levels − 1.
    max_depth: usize,
}

impl<'a> AutoMergingRetriever<'a> {
    pub fn new(store: &'a ChunkStore, threshold: f32, max_depth: usize) -> Self {
        Self {
            store,
            threshold,
            max_depth,
        }
    }

    /// Merge sibling hits into parents until no group meets the threshold
    /// or the recursion depth is exhausted.
    pub fn merge(
        &self,
        mut candidates: Vec<RetrievalCandidate>,
    ) -> Result<Vec<RetrievalCandidate>, IndexError> {
        for _ in 0..self.max_depth {
            let (next, changed) = self.merge_pass(candidates);
            candidates = next;
            if !changed {
                break;
            }
        }

        self.check_no_overlap(&candidates)?;

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.node_id.cmp(&b.node_id))
        });
        Ok(candidates)
    }

    /// One grouping/promotion pass. Returns the new candidate set and
    /// whether anything merged.
    fn merge_pass(
        &self,
        candidates: Vec<RetrievalCandidate>,
    ) -> (Vec<RetrievalCandidate>, bool) {
        let mut by_parent: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, candidate) in candidates.iter().enumerate() {
            let Some(node) = self.store.get(&candidate.node_id) else {
                continue;
            };
            if let Some(parent_id) = node.parent_id.as_deref() {
                by_parent.entry(parent_id).or_default().push(i);
            }
        }

        // Consider parents in id order so promotion is reproducible.
        let mut groups: Vec<(&str, Vec<usize>)> = by_parent.into_iter().collect();
        groups.sort_by(|a, b| a.0.cmp(b.0));

        let mut promoted: Vec<(String, usize, f32)> = Vec::new();
        let mut removed: HashSet<usize> = HashSet::new();

        for (parent_id, child_idxs) in groups {
            let Some(parent) = self.store.get(parent_id) else {
                continue;
            };
            if parent.child_ids.is_empty() {
                continue;
            }
            let ratio = child_idxs.len() as f32 / parent.child_ids.len() as f32;
            if ratio < self.threshold {
                continue;
            }

            let best = child_idxs
                .iter()
                .map(|&i| candidates[i].score)
                .fold(f32::NEG_INFINITY, f32::max);
            debug!(
                parent = %parent.id,
                matched = child_idxs.len(),
                children = parent.child_ids.len(),
                score = best,
                "merging sibling hits into parent"
            );
            promoted.push((parent.id.clone(), parent.level, best));
            removed.extend(child_idxs);
        }

        if promoted.is_empty() {
            return (candidates, false);
        }

        let mut next: Vec<RetrievalCandidate> = candidates
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !removed.contains(i))
            .map(|(_, c)| c)
            .collect();

        // Insert coarsest promotions first so a finer promotion that falls
        // under one of them is dropped rather than duplicated.
        promoted.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        for (parent_id, _, score) in promoted {
            let already_covered = next.iter().any(|c| {
                c.node_id == parent_id || self.store.is_descendant(&parent_id, &c.node_id)
            });
            if already_covered {
                continue;
            }
            next.retain(|c| !self.store.is_descendant(&c.node_id, &parent_id));
            if let Some(parent) = self.store.get(&parent_id) {
                next.push(RetrievalCandidate {
                    node_id: parent_id,
                    text: parent.text.clone(),
                    score,
                });
            }
        }

        (next, true)
    }

    /// Fail loudly if the candidate set contains both a node and one of its
    /// ancestors.
    fn check_no_overlap(&self, candidates: &[RetrievalCandidate]) -> Result<(), IndexError> {
        let ids: HashSet<&str> = candidates.iter().map(|c| c.node_id.as_str()).collect();
        for candidate in candidates {
            let mut current = self
                .store
                .get(&candidate.node_id)
                .and_then(|n| n.parent_id.as_deref());
            while let Some(ancestor_id) = current {
                if ids.contains(ancestor_id) {
                    return Err(IndexError::MergeInvariant(format!(
                        "{} and its ancestor {} are both selected",
                        candidate.node_id, ancestor_id
                    )));
                }
                current = self.store.get(ancestor_id).and_then(|n| n.parent_id.as_deref());
            }
        }
        Ok(())
    }
}

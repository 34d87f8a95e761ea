//! Cross-encoder reranking of the merged candidate set.

use anyhow::{Context, Result};

use crate::capability::Reranker;
use crate::models::RetrievalCandidate;

/// Re-score `candidates` against `query` and keep the `top_n` best, ordered
/// by rerank score descending with ties broken by node id.
///
/// Reranking quality is part of the query contract: a reranker failure fails
/// the whole query, and candidates are never passed through with their
/// retrieval scores.
pub async fn rerank(
    reranker: &dyn Reranker,
    query: &str,
    candidates: Vec<RetrievalCandidate>,
    top_n: usize,
) -> Result<Vec<RetrievalCandidate>> {
    if candidates.is_empty() {
        return Ok(candidates);
    }

    let texts: Vec<String> = candidates.iter().map(|c| c.text.clone()).collect();
    let scores = reranker
        .score_batch(query, &texts)
        .await
        .context("reranking capability failed")?;
    anyhow::ensure!(
        scores.len() == candidates.len(),
        "reranker returned {} scores for {} candidates",
        scores.len(),
        candidates.len()
    );

    let mut rescored: Vec<RetrievalCandidate> = candidates
        .into_iter()
        .zip(scores)
        .map(|(candidate, score)| RetrievalCandidate { score, ..candidate })
        .collect();
    rescored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.node_id.cmp(&b.node_id))
    });
    rescored.truncate(top_n);
    Ok(rescored)
}

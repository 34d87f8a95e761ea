//! Query engine: the single retrieval pipeline every front-end calls.
//!
//! `search → auto-merge → rerank → tree synthesis`, blocking the caller for
//! the duration of one query. The engine owns the chunk store and vector
//! index (immutable once ready) and reaches the external models through the
//! capability traits.

use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::capability::{Embedder, LanguageModel, Reranker};
use crate::models::RetrievalCandidate;
use crate::rerank::rerank;
use crate::retriever::AutoMergingRetriever;
use crate::store::ChunkStore;
use crate::synthesis::TreeSummarizer;
use crate::index::VectorIndex;

#[derive(Debug, Clone)]
pub struct QueryEngineParams {
    /// Leaf hits fetched from the vector index per query.
    pub similarity_top_k: usize,
    /// Candidates surviving the rerank cut.
    pub rerank_top_n: usize,
    /// Sibling-hit ratio at which a parent replaces its children.
    pub merge_threshold: f32,
    /// Character budget per synthesis batch.
    pub synthesis_budget_chars: usize,
}

impl Default for QueryEngineParams {
    fn default() -> Self {
        Self {
            similarity_top_k: 12,
            rerank_top_n: 6,
            merge_threshold: crate::retriever::DEFAULT_MERGE_THRESHOLD,
            synthesis_budget_chars: crate::synthesis::DEFAULT_BUDGET_CHARS,
        }
    }
}

pub struct QueryEngine {
    store: ChunkStore,
    index: VectorIndex,
    /// Granularity levels in the forest; merging recurses at most
    /// `levels - 1` times.
    levels: usize,
    params: QueryEngineParams,
    embedder: Arc<dyn Embedder>,
    reranker: Arc<dyn Reranker>,
    llm: Arc<dyn LanguageModel>,
}

impl QueryEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: ChunkStore,
        index: VectorIndex,
        levels: usize,
        params: QueryEngineParams,
        embedder: Arc<dyn Embedder>,
        reranker: Arc<dyn Reranker>,
        llm: Arc<dyn LanguageModel>,
    ) -> Self {
        Self {
            store,
            index,
            levels,
            params,
            embedder,
            reranker,
            llm,
        }
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Retrieval without synthesis: vector search, auto-merge, rerank.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievalCandidate>> {
        anyhow::ensure!(!query.trim().is_empty(), "query must not be empty");

        let hits = self
            .index
            .search(&self.store, self.embedder.as_ref(), query, self.params.similarity_top_k)
            .await?;
        debug!(hits = hits.len(), "vector search complete");

        let retriever = AutoMergingRetriever::new(
            &self.store,
            self.params.merge_threshold,
            self.levels.saturating_sub(1),
        );
        let merged = retriever.merge(hits)?;
        debug!(candidates = merged.len(), "auto-merge complete");

        let reranked = rerank(
            self.reranker.as_ref(),
            query,
            merged,
            self.params.rerank_top_n,
        )
        .await?;
        debug!(kept = reranked.len(), "rerank complete");
        Ok(reranked)
    }

    /// Full pipeline ending in a tree-summarized answer.
    ///
    /// When nothing in the index matches, a fixed notice is returned rather
    /// than invoking the language model on empty context.
    pub async fn query(&self, query: &str) -> Result<String> {
        let candidates = self.retrieve(query).await?;
        if candidates.is_empty() {
            debug!("no matching context for query");
            return Ok("No relevant rules text was found in the reference.".to_string());
        }

        let contexts: Vec<String> = candidates.into_iter().map(|c| c.text).collect();
        let summarizer = TreeSummarizer::new(self.params.synthesis_budget_chars);
        summarizer.synthesize(self.llm.as_ref(), query, &contexts).await
    }
}

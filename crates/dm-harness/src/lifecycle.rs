//! SRD index lifecycle.
//!
//! One state machine around startup: probe the cache directory, then either
//! load (`Present`) or build from scratch (`Absent`). A cache that probes or
//! loads as corrupt is recovered by falling back to a full rebuild — only a
//! failure of that rebuild is fatal. Once ready, the chunk store and vector
//! index are immutable for the life of the process; there is no incremental
//! update, so changing the corpus means deleting the cache and rebuilding.
//!
//! Presence of the cache directory alone selects the path taken. The corpus
//! fingerprint recorded in the manifest is recomputed on load and a mismatch
//! is logged as a stale-cache warning, but it does not force a rebuild.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use dm_harness_core::capability::{Embedder, LanguageModel, Reranker};
use dm_harness_core::chunker::HierarchicalChunker;
use dm_harness_core::engine::{QueryEngine, QueryEngineParams};
use dm_harness_core::error::IndexError;
use dm_harness_core::index::VectorIndex;
use dm_harness_core::models::{Document, RetrievalCandidate};
use dm_harness_core::store::ChunkStore;

use crate::config::Config;
use crate::loader;
use crate::persist::{self, CacheState, IndexManifest, CACHE_FORMAT_VERSION};

/// The three external model collaborators, bundled for hand-off.
#[derive(Clone)]
pub struct Capabilities {
    pub llm: Arc<dyn LanguageModel>,
    pub embedder: Arc<dyn Embedder>,
    pub reranker: Arc<dyn Reranker>,
}

/// A ready SRD index plus the query engine over it.
pub struct SrdIndex {
    engine: QueryEngine,
    manifest: IndexManifest,
}

impl std::fmt::Debug for SrdIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SrdIndex")
            .field("manifest", &self.manifest)
            .finish_non_exhaustive()
    }
}

impl SrdIndex {
    /// Open the index: load from the cache when present, build (and
    /// persist) otherwise.
    pub async fn open(config: &Config, capabilities: Capabilities) -> Result<Self> {
        let cache_dir = &config.index.cache_dir;

        // Documents are loaded on both paths; a corpus that fails to load
        // aborts construction before any cache decision.
        let documents = loader::load_documents(&config.srd)?;
        let fingerprint = persist::corpus_fingerprint(&documents, &config.index.chunk_sizes);

        let loaded = match persist::probe(cache_dir) {
            CacheState::Absent => {
                info!(cache = %cache_dir.display(), "no index cache, building");
                None
            }
            CacheState::Present => match persist::load(cache_dir) {
                Ok(parts) => Some(parts),
                Err(e) => {
                    warn!(error = %e, "index cache failed to load, rebuilding");
                    None
                }
            },
            CacheState::Corrupt(reason) => {
                warn!(%reason, "index cache corrupt, rebuilding");
                None
            }
        };

        let (manifest, store, index) = match loaded {
            Some((manifest, store, index)) => {
                if manifest.fingerprint != fingerprint {
                    warn!(
                        cache = %cache_dir.display(),
                        "source documents changed since the cache was built; delete the cache to rebuild"
                    );
                }
                if manifest.embedding_model != capabilities.embedder.model_name() {
                    warn!(
                        cached = %manifest.embedding_model,
                        configured = %capabilities.embedder.model_name(),
                        "embedding model differs from the one the cache was built with"
                    );
                }
                info!(nodes = store.len(), leaves = index.len(), "index loaded from cache");
                (manifest, store, index)
            }
            None => build_index(config, &capabilities, &documents, fingerprint)
                .await
                .context("index build failed")?,
        };

        let params = QueryEngineParams {
            similarity_top_k: config.index.similarity_top_k,
            rerank_top_n: config.index.rerank_top_n,
            merge_threshold: config.index.merge_threshold,
            synthesis_budget_chars: config.index.synthesis_budget_chars,
        };
        let engine = QueryEngine::new(
            store,
            index,
            config.index.chunk_sizes.len(),
            params,
            capabilities.embedder,
            capabilities.reranker,
            capabilities.llm,
        );

        Ok(Self { engine, manifest })
    }

    /// Query the index through the full pipeline (see [`QueryEngine::query`]).
    pub async fn query(&self, text: &str) -> Result<String> {
        self.engine.query(text).await
    }

    /// Retrieval without synthesis, for inspection.
    pub async fn retrieve(&self, text: &str) -> Result<Vec<RetrievalCandidate>> {
        self.engine.retrieve(text).await
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }
}

async fn build_index(
    config: &Config,
    capabilities: &Capabilities,
    documents: &[Document],
    fingerprint: String,
) -> Result<(IndexManifest, ChunkStore, VectorIndex)> {
    let chunker = HierarchicalChunker::new(config.index.chunk_sizes.clone())?;
    let nodes = chunker.chunk_documents(documents);
    if nodes.is_empty() {
        return Err(IndexError::EmptyCorpus(config.srd.root.display().to_string()).into());
    }

    let store = ChunkStore::from_nodes(nodes);
    info!(
        nodes = store.len(),
        leaves = store.leaf_count(),
        documents = documents.len(),
        "chunked corpus"
    );

    let index = {
        let leaves = store.leaf_nodes();
        VectorIndex::build(
            &leaves,
            capabilities.embedder.as_ref(),
            config.embedding.batch_size,
        )
        .await?
    };

    let manifest = IndexManifest {
        version: CACHE_FORMAT_VERSION,
        embedding_model: capabilities.embedder.model_name().to_string(),
        dims: capabilities.embedder.dims(),
        chunk_sizes: config.index.chunk_sizes.clone(),
        fingerprint,
        built_at: Utc::now().timestamp(),
        node_count: store.len(),
        leaf_count: store.leaf_count(),
    };

    persist::save(&config.index.cache_dir, &store, &index, &manifest)?;
    info!(cache = %config.index.cache_dir.display(), "index persisted");

    Ok((manifest, store, index))
}

//! Index cache persistence.
//!
//! The cache directory holds three files: `manifest.json` (format version,
//! embedding model, chunk sizes, corpus fingerprint, counts),
//! `chunk_store.json`, and `vector_index.json`. The pair of store and index
//! is only ever written or replaced together; loading one without a
//! consistent other is a corruption.
//!
//! [`probe`] classifies the cache *before* any load is attempted, so the
//! build-vs-load decision never rides on interpreting load failures.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use dm_harness_core::error::IndexError;
use dm_harness_core::index::VectorIndex;
use dm_harness_core::models::Document;
use dm_harness_core::store::ChunkStore;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const CHUNK_STORE_FILE: &str = "chunk_store.json";
pub const VECTOR_INDEX_FILE: &str = "vector_index.json";

/// Bumped whenever the persisted layout changes shape.
pub const CACHE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexManifest {
    pub version: u32,
    pub embedding_model: String,
    pub dims: usize,
    pub chunk_sizes: Vec<usize>,
    /// SHA-256 over the sorted source documents and the chunk sizes.
    pub fingerprint: String,
    pub built_at: i64,
    pub node_count: usize,
    pub leaf_count: usize,
}

/// Result of inspecting a cache directory without loading it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheState {
    /// No cache directory, or an empty one: nothing was ever persisted.
    Absent,
    /// All files present and the manifest parses at the supported version.
    Present,
    /// Something is there but unusable; the reason is recorded.
    Corrupt(String),
}

/// Classify the cache directory. Reads only the manifest, never the stores.
pub fn probe(cache_dir: &Path) -> CacheState {
    if !cache_dir.is_dir() {
        return CacheState::Absent;
    }

    let files = [MANIFEST_FILE, CHUNK_STORE_FILE, VECTOR_INDEX_FILE];
    let present: Vec<&str> = files
        .iter()
        .copied()
        .filter(|f| cache_dir.join(f).is_file())
        .collect();
    if present.is_empty() {
        return CacheState::Absent;
    }
    if present.len() < files.len() {
        let missing: Vec<&str> = files
            .iter()
            .copied()
            .filter(|f| !present.contains(f))
            .collect();
        return CacheState::Corrupt(format!("missing {}", missing.join(", ")));
    }

    let manifest_raw = match fs::read_to_string(cache_dir.join(MANIFEST_FILE)) {
        Ok(raw) => raw,
        Err(e) => return CacheState::Corrupt(format!("manifest unreadable: {}", e)),
    };
    match serde_json::from_str::<IndexManifest>(&manifest_raw) {
        Ok(manifest) if manifest.version == CACHE_FORMAT_VERSION => CacheState::Present,
        Ok(manifest) => CacheState::Corrupt(format!(
            "unsupported cache version {} (expected {})",
            manifest.version, CACHE_FORMAT_VERSION
        )),
        Err(e) => CacheState::Corrupt(format!("manifest does not parse: {}", e)),
    }
}

/// Persist the store, index, and manifest, creating the directory (and
/// parents) if missing.
pub fn save(
    cache_dir: &Path,
    store: &ChunkStore,
    index: &VectorIndex,
    manifest: &IndexManifest,
) -> Result<()> {
    fs::create_dir_all(cache_dir)
        .with_context(|| format!("failed to create cache directory {}", cache_dir.display()))?;

    let manifest_json = serde_json::to_string_pretty(manifest)?;
    fs::write(cache_dir.join(MANIFEST_FILE), manifest_json)
        .with_context(|| "failed to write manifest")?;

    let store_json = serde_json::to_string(store)?;
    fs::write(cache_dir.join(CHUNK_STORE_FILE), store_json)
        .with_context(|| "failed to write chunk store")?;

    let index_json = serde_json::to_string(index)?;
    fs::write(cache_dir.join(VECTOR_INDEX_FILE), index_json)
        .with_context(|| "failed to write vector index")?;

    Ok(())
}

/// Load a cache that [`probe`] reported as `Present`.
///
/// Any parse failure or structural inconsistency (dangling parent links,
/// index entries that do not resolve to leaves) comes back as
/// [`IndexError::CacheCorrupt`], which the lifecycle recovers from by
/// rebuilding.
pub fn load(cache_dir: &Path) -> Result<(IndexManifest, ChunkStore, VectorIndex)> {
    let manifest = read_manifest(cache_dir)?;

    let store_raw = fs::read_to_string(cache_dir.join(CHUNK_STORE_FILE))
        .map_err(|e| IndexError::CacheCorrupt(format!("chunk store unreadable: {}", e)))?;
    let store: ChunkStore = serde_json::from_str(&store_raw)
        .map_err(|e| IndexError::CacheCorrupt(format!("chunk store does not parse: {}", e)))?;

    let index_raw = fs::read_to_string(cache_dir.join(VECTOR_INDEX_FILE))
        .map_err(|e| IndexError::CacheCorrupt(format!("vector index unreadable: {}", e)))?;
    let index: VectorIndex = serde_json::from_str(&index_raw)
        .map_err(|e| IndexError::CacheCorrupt(format!("vector index does not parse: {}", e)))?;

    store
        .validate()
        .map_err(|e| IndexError::CacheCorrupt(e.to_string()))?;
    index
        .check_consistent(&store)
        .map_err(|e| IndexError::CacheCorrupt(e.to_string()))?;

    Ok((manifest, store, index))
}

/// Read just the manifest (for `dm stats`).
pub fn read_manifest(cache_dir: &Path) -> Result<IndexManifest> {
    let manifest_raw = fs::read_to_string(cache_dir.join(MANIFEST_FILE))
        .map_err(|e| IndexError::CacheCorrupt(format!("manifest unreadable: {}", e)))?;
    let manifest: IndexManifest = serde_json::from_str(&manifest_raw)
        .map_err(|e| IndexError::CacheCorrupt(format!("manifest does not parse: {}", e)))?;
    Ok(manifest)
}

/// Fingerprint of the corpus as the chunker will see it: every document id
/// and text in sorted order, plus the chunk sizes.
pub fn corpus_fingerprint(documents: &[Document], chunk_sizes: &[usize]) -> String {
    let mut hasher = Sha256::new();
    for doc in documents {
        hasher.update(doc.id.as_bytes());
        hasher.update([0u8]);
        hasher.update(doc.text.as_bytes());
        hasher.update([0u8]);
    }
    for size in chunk_sizes {
        hasher.update(size.to_le_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dm_harness_core::chunker::HierarchicalChunker;
    use std::fs;
    use tempfile::TempDir;

    fn sample_parts() -> (ChunkStore, IndexManifest) {
        let doc = Document {
            id: "rules.json".to_string(),
            source_path: "/srd/rules.json".to_string(),
            text: (0..40)
                .map(|i| format!("Rule {} of the adventuring chapter.", i))
                .collect::<Vec<_>>()
                .join(" "),
        };
        let chunker = HierarchicalChunker::new(vec![64, 16]).unwrap();
        let store = ChunkStore::from_nodes(chunker.chunk_document(&doc));
        let manifest = IndexManifest {
            version: CACHE_FORMAT_VERSION,
            embedding_model: "test-model".to_string(),
            dims: 4,
            chunk_sizes: vec![64, 16],
            fingerprint: corpus_fingerprint(&[doc], &[64, 16]),
            built_at: 0,
            node_count: store.len(),
            leaf_count: store.leaf_count(),
        };
        (store, manifest)
    }

    /// A consistent (store, index) pair without going through an embedder:
    /// hand-assemble entries for every leaf.
    fn index_for(store: &ChunkStore) -> VectorIndex {
        let entries: Vec<serde_json::Value> = store
            .leaf_nodes()
            .iter()
            .map(|leaf| {
                serde_json::json!({
                    "node_id": leaf.id,
                    "vector": [1.0, 0.0, 0.0, 0.0],
                })
            })
            .collect();
        let raw = serde_json::json!({ "dims": 4, "entries": entries });
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn test_probe_absent_when_missing_or_empty() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(probe(&tmp.path().join("nope")), CacheState::Absent);

        let empty = tmp.path().join("empty");
        fs::create_dir_all(&empty).unwrap();
        assert_eq!(probe(&empty), CacheState::Absent);
    }

    #[test]
    fn test_save_then_probe_present_then_load() {
        let tmp = TempDir::new().unwrap();
        let cache = tmp.path().join("index");
        let (store, manifest) = sample_parts();
        let index = index_for(&store);

        save(&cache, &store, &index, &manifest).unwrap();
        assert_eq!(probe(&cache), CacheState::Present);

        let (loaded_manifest, loaded_store, loaded_index) = load(&cache).unwrap();
        assert_eq!(loaded_manifest.fingerprint, manifest.fingerprint);
        assert_eq!(loaded_store.len(), store.len());
        assert_eq!(loaded_index.len(), index.len());
    }

    #[test]
    fn test_probe_corrupt_on_missing_file() {
        let tmp = TempDir::new().unwrap();
        let cache = tmp.path().join("index");
        let (store, manifest) = sample_parts();
        let index = index_for(&store);
        save(&cache, &store, &index, &manifest).unwrap();

        fs::remove_file(cache.join(VECTOR_INDEX_FILE)).unwrap();
        assert!(matches!(probe(&cache), CacheState::Corrupt(_)));
    }

    #[test]
    fn test_probe_corrupt_on_bad_manifest() {
        let tmp = TempDir::new().unwrap();
        let cache = tmp.path().join("index");
        let (store, manifest) = sample_parts();
        let index = index_for(&store);
        save(&cache, &store, &index, &manifest).unwrap();

        fs::write(cache.join(MANIFEST_FILE), "{ truncated").unwrap();
        assert!(matches!(probe(&cache), CacheState::Corrupt(_)));
    }

    #[test]
    fn test_probe_corrupt_on_version_mismatch() {
        let tmp = TempDir::new().unwrap();
        let cache = tmp.path().join("index");
        let (store, mut manifest) = sample_parts();
        let index = index_for(&store);
        manifest.version = CACHE_FORMAT_VERSION + 1;
        save(&cache, &store, &index, &manifest).unwrap();

        assert!(matches!(probe(&cache), CacheState::Corrupt(_)));
    }

    #[test]
    fn test_load_truncated_store_is_cache_corrupt() {
        let tmp = TempDir::new().unwrap();
        let cache = tmp.path().join("index");
        let (store, manifest) = sample_parts();
        let index = index_for(&store);
        save(&cache, &store, &index, &manifest).unwrap();

        fs::write(cache.join(CHUNK_STORE_FILE), "{\"nodes\":").unwrap();
        assert_eq!(probe(&cache), CacheState::Present);
        let err = load(&cache).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IndexError>(),
            Some(IndexError::CacheCorrupt(_))
        ));
    }

    #[test]
    fn test_load_detects_store_index_mismatch() {
        let tmp = TempDir::new().unwrap();
        let cache = tmp.path().join("index");
        let (store, manifest) = sample_parts();
        let index = index_for(&store);
        save(&cache, &store, &index, &manifest).unwrap();

        // Replace the index with one pointing at a node that does not exist.
        let rogue = serde_json::json!({
            "dims": 4,
            "entries": [{ "node_id": "ghost#1.0", "vector": [1.0, 0.0, 0.0, 0.0] }],
        });
        fs::write(cache.join(VECTOR_INDEX_FILE), rogue.to_string()).unwrap();

        let err = load(&cache).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IndexError>(),
            Some(IndexError::CacheCorrupt(_))
        ));
    }

    #[test]
    fn test_fingerprint_tracks_content_and_sizes() {
        let doc = |text: &str| Document {
            id: "a.json".to_string(),
            source_path: "/srd/a.json".to_string(),
            text: text.to_string(),
        };
        let a = corpus_fingerprint(&[doc("one")], &[64, 16]);
        let b = corpus_fingerprint(&[doc("one")], &[64, 16]);
        let c = corpus_fingerprint(&[doc("two")], &[64, 16]);
        let d = corpus_fingerprint(&[doc("one")], &[128, 16]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }
}

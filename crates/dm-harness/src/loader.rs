//! SRD document loader.
//!
//! Walks the rules corpus directory, applies include/exclude globs, and
//! flattens each JSON rules file into a plain-text [`Document`]. A file
//! literally named `index.json` is always skipped regardless of globs (it is
//! the corpus's own table of contents, not rules text). Documents come back
//! sorted by id so every downstream stage sees a deterministic order.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};
use walkdir::WalkDir;

use dm_harness_core::error::IndexError;
use dm_harness_core::models::Document;

use crate::config::SrdConfig;

pub fn load_documents(config: &SrdConfig) -> Result<Vec<Document>> {
    let root = &config.root;
    if !root.is_dir() {
        return Err(IndexError::Load(format!(
            "source directory does not exist: {}",
            root.display()
        ))
        .into());
    }

    let include_set = build_globset(&config.include_globs)?;
    let exclude_set = build_globset(&config.exclude_globs)?;

    let mut documents = Vec::new();

    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| IndexError::Load(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        // The corpus's own table of contents, never rules text.
        if entry.file_name().to_string_lossy() == "index.json" {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !include_set.is_match(&rel_str) {
            continue;
        }

        let raw = std::fs::read_to_string(path).map_err(|e| {
            IndexError::Load(format!("failed to read {}: {}", path.display(), e))
        })?;

        let text = flatten_text(&rel_str, &raw);
        if text.trim().is_empty() {
            warn!(file = %rel_str, "empty document, skipping");
            continue;
        }

        documents.push(Document {
            id: rel_str,
            source_path: path.display().to_string(),
            text,
        });
    }

    documents.sort_by(|a, b| a.id.cmp(&b.id));
    debug!(count = documents.len(), root = %root.display(), "loaded SRD documents");

    if documents.is_empty() {
        return Err(IndexError::EmptyCorpus(root.display().to_string()).into());
    }

    Ok(documents)
}

/// Turn a rules file into plain text. JSON files are flattened into
/// `key: value` lines in depth-first order; anything that fails to parse is
/// used verbatim.
fn flatten_text(name: &str, raw: &str) -> String {
    if name.ends_with(".json") {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) {
            let mut lines = Vec::new();
            flatten_value(&value, "", &mut lines);
            return lines.join("\n");
        }
    }
    raw.to_string()
}

fn flatten_value(value: &serde_json::Value, key: &str, out: &mut Vec<String>) {
    match value {
        serde_json::Value::Object(map) => {
            for (k, v) in map {
                flatten_value(v, k, out);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                flatten_value(item, key, out);
            }
        }
        serde_json::Value::String(s) => push_line(key, s, out),
        serde_json::Value::Number(n) => push_line(key, &n.to_string(), out),
        serde_json::Value::Bool(b) => push_line(key, &b.to_string(), out),
        serde_json::Value::Null => {}
    }
}

fn push_line(key: &str, value: &str, out: &mut Vec<String>) {
    if value.trim().is_empty() {
        return;
    }
    if key.is_empty() {
        out.push(value.to_string());
    } else {
        out.push(format!("{}: {}", key, value));
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn srd_config(root: &std::path::Path) -> SrdConfig {
        SrdConfig {
            root: root.to_path_buf(),
            include_globs: vec!["**/*.json".to_string()],
            exclude_globs: Vec::new(),
        }
    }

    #[test]
    fn test_loads_and_sorts_documents() {
        let tmp = TempDir::new().unwrap();
        let weapons = tmp.path().join("weapons");
        fs::create_dir_all(&weapons).unwrap();
        fs::write(
            weapons.join("longsword.json"),
            r#"{"name": "Longsword", "damage": "1d8 slashing"}"#,
        )
        .unwrap();
        fs::write(
            tmp.path().join("armor.json"),
            r#"{"name": "Chain Mail", "ac": 16}"#,
        )
        .unwrap();

        let docs = load_documents(&srd_config(tmp.path())).unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["armor.json", "weapons/longsword.json"]);
    }

    #[test]
    fn test_index_json_always_excluded() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("index.json"), r#"{"files": ["a", "b"]}"#).unwrap();
        fs::write(tmp.path().join("rules.json"), r#"{"rule": "Roll a d20."}"#).unwrap();
        let nested = tmp.path().join("spells");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("index.json"), r#"{"files": []}"#).unwrap();

        let docs = load_documents(&srd_config(tmp.path())).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "rules.json");
    }

    #[test]
    fn test_flattens_json_to_key_value_lines() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("monster.json"),
            r#"{"name": "Goblin", "hp": 7, "actions": [{"desc": "Scimitar attack"}]}"#,
        )
        .unwrap();

        let docs = load_documents(&srd_config(tmp.path())).unwrap();
        let text = &docs[0].text;
        assert!(text.contains("name: Goblin"));
        assert!(text.contains("hp: 7"));
        assert!(text.contains("desc: Scimitar attack"));
    }

    #[test]
    fn test_invalid_json_used_verbatim() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("notes.json"), "not really { json").unwrap();

        let docs = load_documents(&srd_config(tmp.path())).unwrap();
        assert_eq!(docs[0].text, "not really { json");
    }

    #[test]
    fn test_missing_root_is_load_error() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("nope");
        let err = load_documents(&srd_config(&missing)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IndexError>(),
            Some(IndexError::Load(_))
        ));
    }

    #[test]
    fn test_zero_usable_documents_is_empty_corpus() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("index.json"), "{}").unwrap();
        fs::write(tmp.path().join("empty.json"), r#""""#).unwrap();

        let err = load_documents(&srd_config(tmp.path())).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IndexError>(),
            Some(IndexError::EmptyCorpus(_))
        ));
    }

    #[test]
    fn test_exclude_globs_apply() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("keep.json"), r#"{"a": "b"}"#).unwrap();
        let drafts = tmp.path().join("drafts");
        fs::create_dir_all(&drafts).unwrap();
        fs::write(drafts.join("wip.json"), r#"{"a": "b"}"#).unwrap();

        let mut config = srd_config(tmp.path());
        config.exclude_globs = vec!["drafts/**".to_string()];
        let docs = load_documents(&config).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "keep.json");
    }
}

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub srd: SrdConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub reranker: RerankerConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SrdConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.json".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Token budgets per granularity level, coarsest first.
    #[serde(default = "default_chunk_sizes")]
    pub chunk_sizes: Vec<usize>,
    #[serde(default = "default_similarity_top_k")]
    pub similarity_top_k: usize,
    #[serde(default = "default_rerank_top_n")]
    pub rerank_top_n: usize,
    #[serde(default = "default_merge_threshold")]
    pub merge_threshold: f32,
    #[serde(default = "default_synthesis_budget_chars")]
    pub synthesis_budget_chars: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            chunk_sizes: default_chunk_sizes(),
            similarity_top_k: default_similarity_top_k(),
            rerank_top_n: default_rerank_top_n(),
            merge_threshold: default_merge_threshold(),
            synthesis_budget_chars: default_synthesis_budget_chars(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("index")
}
fn default_chunk_sizes() -> Vec<usize> {
    vec![2048, 512, 128]
}
fn default_similarity_top_k() -> usize {
    12
}
fn default_rerank_top_n() -> usize {
    6
}
fn default_merge_threshold() -> f32 {
    0.6
}
fn default_synthesis_budget_chars() -> usize {
    12_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_stop")]
    pub stop: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: None,
            model: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            stop: default_stop(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_temperature() -> f32 {
    0.1
}
fn default_max_tokens() -> usize {
    512
}
fn default_stop() -> Vec<String> {
    vec![
        "### System".to_string(),
        "### User".to_string(),
        "### Assistant".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: None,
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankerConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: None,
            model: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    /// Number of player/DM exchanges kept in the prompt window.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            system_prompt: default_system_prompt(),
        }
    }
}

fn default_history_window() -> usize {
    2
}
fn default_system_prompt() -> String {
    "You are a Dungeon Master for a D&D Forgotten Realms campaign set in Waterdeep. \
     The following is a conversation between you and the player. \
     Reply only for yourself, and directly to the player. \
     Keep the conversation natural, and use your own personality."
        .to_string()
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl RerankerConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate index parameters
    if config.index.chunk_sizes.is_empty() {
        anyhow::bail!("index.chunk_sizes must not be empty");
    }
    if config.index.chunk_sizes.iter().any(|&s| s == 0) {
        anyhow::bail!("index.chunk_sizes must all be > 0");
    }
    if !config.index.chunk_sizes.windows(2).all(|w| w[0] > w[1]) {
        anyhow::bail!("index.chunk_sizes must be strictly decreasing (coarsest first)");
    }
    if config.index.similarity_top_k < 1 {
        anyhow::bail!("index.similarity_top_k must be >= 1");
    }
    if config.index.rerank_top_n < 1 {
        anyhow::bail!("index.rerank_top_n must be >= 1");
    }
    if !(config.index.merge_threshold > 0.0 && config.index.merge_threshold <= 1.0) {
        anyhow::bail!("index.merge_threshold must be in (0.0, 1.0]");
    }
    if config.index.synthesis_budget_chars < 256 {
        anyhow::bail!("index.synthesis_budget_chars must be >= 256");
    }

    // Validate providers
    for (section, provider) in [
        ("llm", config.llm.provider.as_str()),
        ("embedding", config.embedding.provider.as_str()),
        ("reranker", config.reranker.provider.as_str()),
    ] {
        match provider {
            "disabled" | "openai-compatible" => {}
            other => anyhow::bail!(
                "Unknown {} provider: '{}'. Must be disabled or openai-compatible.",
                section,
                other
            ),
        }
    }

    if config.llm.is_enabled() && (config.llm.base_url.is_none() || config.llm.model.is_none()) {
        anyhow::bail!(
            "llm.base_url and llm.model must be specified when provider is '{}'",
            config.llm.provider
        );
    }
    if config.embedding.is_enabled() {
        if config.embedding.base_url.is_none() || config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.base_url and embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.reranker.is_enabled()
        && (config.reranker.base_url.is_none() || config.reranker.model.is_none())
    {
        anyhow::bail!(
            "reranker.base_url and reranker.model must be specified when provider is '{}'",
            config.reranker.provider
        );
    }

    if config.chat.history_window == 0 {
        anyhow::bail!("chat.history_window must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_fills_defaults() {
        let config = parse_config("[srd]\nroot = \"srd\"\n").unwrap();
        assert_eq!(config.index.chunk_sizes, vec![2048, 512, 128]);
        assert_eq!(config.index.similarity_top_k, 12);
        assert_eq!(config.index.rerank_top_n, 6);
        assert!((config.index.merge_threshold - 0.6).abs() < 1e-6);
        assert_eq!(config.llm.provider, "disabled");
        assert_eq!(config.chat.history_window, 2);
        assert_eq!(config.srd.include_globs, vec!["**/*.json"]);
    }

    #[test]
    fn test_rejects_non_decreasing_chunk_sizes() {
        let err = parse_config("[srd]\nroot = \"srd\"\n[index]\nchunk_sizes = [128, 512]\n")
            .unwrap_err();
        assert!(err.to_string().contains("strictly decreasing"));
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        assert!(parse_config("[srd]\nroot = \"srd\"\n[index]\nmerge_threshold = 0.0\n").is_err());
        assert!(parse_config("[srd]\nroot = \"srd\"\n[index]\nmerge_threshold = 1.5\n").is_err());
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let err =
            parse_config("[srd]\nroot = \"srd\"\n[llm]\nprovider = \"magic\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown llm provider"));
    }

    #[test]
    fn test_enabled_embedding_requires_model_and_dims() {
        let err = parse_config(
            "[srd]\nroot = \"srd\"\n[embedding]\nprovider = \"openai-compatible\"\nbase_url = \"http://localhost:8080/v1\"\nmodel = \"bge-small\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn test_full_config_parses() {
        let config = parse_config(
            r#"
[srd]
root = "srd"
include_globs = ["**/*.json"]

[index]
cache_dir = "cache/index"
chunk_sizes = [1024, 256, 64]
similarity_top_k = 8
rerank_top_n = 4
merge_threshold = 0.5

[llm]
provider = "openai-compatible"
base_url = "http://localhost:5000/v1"
model = "neural-chat-7b-v3-3"

[embedding]
provider = "openai-compatible"
base_url = "http://localhost:8080/v1"
model = "BAAI/bge-small-en-v1.5"
dims = 384

[reranker]
provider = "openai-compatible"
base_url = "http://localhost:8081"
model = "BAAI/bge-reranker-base"

[chat]
history_window = 3
"#,
        )
        .unwrap();
        assert_eq!(config.index.chunk_sizes, vec![1024, 256, 64]);
        assert!(config.llm.is_enabled());
        assert!(config.embedding.is_enabled());
        assert!(config.reranker.is_enabled());
        assert_eq!(config.chat.history_window, 3);
    }
}

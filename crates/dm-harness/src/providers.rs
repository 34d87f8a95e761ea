//! Capability providers and configuration-driven selection.
//!
//! Each of the three capability roles has an OpenAI-compatible HTTP
//! implementation and a disabled stand-in. Which one is used is decided by
//! the `provider` string in configuration — never by inspecting the object.
//!
//! # Retry Strategy
//!
//! All HTTP providers share one policy for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use dm_harness_core::capability::{Embedder, LanguageModel, Reranker};

use crate::config::{EmbeddingConfig, LlmConfig, RerankerConfig};

const PROVIDER_DISABLED: &str = "disabled";
const PROVIDER_OPENAI_COMPATIBLE: &str = "openai-compatible";

// ============ Disabled Providers ============

/// Stand-ins used when a capability is not configured; any use fails with a
/// descriptive error.
pub struct DisabledLanguageModel;

#[async_trait]
impl LanguageModel for DisabledLanguageModel {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        bail!("Language model provider is disabled")
    }
}

pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled")
    }
}

pub struct DisabledReranker;

#[async_trait]
impl Reranker for DisabledReranker {
    async fn score_batch(&self, _query: &str, _texts: &[String]) -> Result<Vec<f32>> {
        bail!("Reranking provider is disabled")
    }
}

// ============ OpenAI-compatible Language Model ============

/// Chat-completions client for any OpenAI-compatible endpoint (a local
/// llama.cpp or text-generation-webui server, or the hosted API).
pub struct HttpLanguageModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
    stop: Vec<String>,
    max_retries: u32,
}

impl HttpLanguageModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.base_url required for OpenAI-compatible provider"))?;
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for OpenAI-compatible provider"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url,
            model,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            stop: config.stop.clone(),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl LanguageModel for HttpLanguageModel {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        if !self.stop.is_empty() {
            body["stop"] = serde_json::json!(self.stop);
        }

        let json = post_json_with_retry(&self.client, &url, &body, self.max_retries).await?;
        let choice = json
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .ok_or_else(|| anyhow::anyhow!("Invalid completion response: missing choices"))?;
        let text = choice
            .pointer("/message/content")
            .or_else(|| choice.get("text"))
            .and_then(|t| t.as_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid completion response: missing content"))?;
        Ok(text.to_string())
    }
}

// ============ OpenAI-compatible Embedder ============

pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base_url = config.base_url.clone().ok_or_else(|| {
            anyhow::anyhow!("embedding.base_url required for OpenAI-compatible provider")
        })?;
        let model = config.model.clone().ok_or_else(|| {
            anyhow::anyhow!("embedding.model required for OpenAI-compatible provider")
        })?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI-compatible provider"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url,
            model,
            dims,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let json = post_json_with_retry(&self.client, &url, &body, self.max_retries).await?;
        let data = json
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid embeddings response: missing data array"))?;
        if data.len() != texts.len() {
            bail!(
                "Embeddings response has {} entries for {} inputs",
                data.len(),
                texts.len()
            );
        }

        let mut embeddings = Vec::with_capacity(data.len());
        for item in data {
            let embedding = item
                .get("embedding")
                .and_then(|e| e.as_array())
                .ok_or_else(|| anyhow::anyhow!("Invalid embeddings response: missing embedding"))?;
            let vec: Vec<f32> = embedding
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect();
            embeddings.push(vec);
        }
        Ok(embeddings)
    }
}

// ============ Cross-encoder Reranker ============

/// Client for a rerank endpoint in the text-embeddings-inference shape:
/// `POST /rerank` with `{query, texts}`, answering one score per text.
pub struct HttpReranker {
    client: reqwest::Client,
    base_url: String,
    model: String,
    max_retries: u32,
}

impl HttpReranker {
    pub fn new(config: &RerankerConfig) -> Result<Self> {
        let base_url = config.base_url.clone().ok_or_else(|| {
            anyhow::anyhow!("reranker.base_url required for OpenAI-compatible provider")
        })?;
        let model = config.model.clone().ok_or_else(|| {
            anyhow::anyhow!("reranker.model required for OpenAI-compatible provider")
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url,
            model,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn score_batch(&self, query: &str, texts: &[String]) -> Result<Vec<f32>> {
        let url = format!("{}/rerank", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "query": query,
            "texts": texts,
        });

        let json = post_json_with_retry(&self.client, &url, &body, self.max_retries).await?;
        let results = json
            .as_array()
            .or_else(|| json.get("results").and_then(|r| r.as_array()))
            .ok_or_else(|| anyhow::anyhow!("Invalid rerank response: missing results"))?;

        let mut scores = vec![0.0f32; texts.len()];
        let mut filled = 0usize;
        for item in results {
            let index = item
                .get("index")
                .and_then(|i| i.as_u64())
                .ok_or_else(|| anyhow::anyhow!("Invalid rerank response: missing index"))?
                as usize;
            let score = item
                .get("relevance_score")
                .or_else(|| item.get("score"))
                .and_then(|s| s.as_f64())
                .ok_or_else(|| anyhow::anyhow!("Invalid rerank response: missing score"))?;
            if index >= scores.len() {
                bail!("Invalid rerank response: index {} out of range", index);
            }
            scores[index] = score as f32;
            filled += 1;
        }
        if filled != texts.len() {
            bail!(
                "Rerank response scored {} of {} texts",
                filled,
                texts.len()
            );
        }
        Ok(scores)
    }
}

// ============ Shared HTTP plumbing ============

/// POST a JSON body with retry/backoff, returning the parsed response.
async fn post_json_with_retry(
    client: &reqwest::Client,
    url: &str,
    body: &serde_json::Value,
    max_retries: u32,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client.post(url).json(body).send().await;

        match resp {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                // Rate limited or server error — retry
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!("{} returned {}: {}", url, status, body_text));
                    continue;
                }

                // Client error (not 429) — don't retry
                let body_text = response.text().await.unwrap_or_default();
                bail!("{} returned {}: {}", url, status, body_text);
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Request failed after retries")))
}

// ============ Selection ============

/// Create the language model selected by configuration.
pub fn create_language_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        PROVIDER_DISABLED => Ok(Arc::new(DisabledLanguageModel)),
        PROVIDER_OPENAI_COMPATIBLE => Ok(Arc::new(HttpLanguageModel::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

/// Create the embedder selected by configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        PROVIDER_DISABLED => Ok(Arc::new(DisabledEmbedder)),
        PROVIDER_OPENAI_COMPATIBLE => Ok(Arc::new(HttpEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Create the reranker selected by configuration.
pub fn create_reranker(config: &RerankerConfig) -> Result<Arc<dyn Reranker>> {
    match config.provider.as_str() {
        PROVIDER_DISABLED => Ok(Arc::new(DisabledReranker)),
        PROVIDER_OPENAI_COMPATIBLE => Ok(Arc::new(HttpReranker::new(config)?)),
        other => bail!("Unknown reranker provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmbeddingConfig, LlmConfig, RerankerConfig};

    #[tokio::test]
    async fn test_disabled_providers_error_on_use() {
        let llm = create_language_model(&LlmConfig::default()).unwrap();
        assert!(llm.generate("hello").await.is_err());

        let embedder = create_embedder(&EmbeddingConfig::default()).unwrap();
        assert!(embedder.embed_batch(&["hello".to_string()]).await.is_err());
        assert_eq!(embedder.model_name(), "disabled");

        let reranker = create_reranker(&RerankerConfig::default()).unwrap();
        assert!(reranker
            .score_batch("q", &["t".to_string()])
            .await
            .is_err());
    }

    #[test]
    fn test_http_providers_require_endpoint_config() {
        let mut llm = LlmConfig::default();
        llm.provider = "openai-compatible".to_string();
        assert!(create_language_model(&llm).is_err());
        llm.base_url = Some("http://localhost:5000/v1".to_string());
        llm.model = Some("neural-chat".to_string());
        assert!(create_language_model(&llm).is_ok());

        let mut emb = EmbeddingConfig::default();
        emb.provider = "openai-compatible".to_string();
        emb.base_url = Some("http://localhost:8080/v1".to_string());
        emb.model = Some("bge-small".to_string());
        assert!(create_embedder(&emb).is_err(), "dims still missing");
        emb.dims = Some(384);
        assert!(create_embedder(&emb).is_ok());

        let mut rr = RerankerConfig::default();
        rr.provider = "openai-compatible".to_string();
        rr.base_url = Some("http://localhost:8081".to_string());
        assert!(create_reranker(&rr).is_err(), "model still missing");
        rr.model = Some("bge-reranker".to_string());
        assert!(create_reranker(&rr).is_ok());
    }
}

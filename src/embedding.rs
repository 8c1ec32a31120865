//! Embedding functions for the knowledge index.
//!
//! | Provider | Config value | Notes |
//! |----------|--------------|-------|
//! | `LocalProvider` | `local` (default) | fastembed, `all-minilm-l6-v2` unless `model` says otherwise |
//! | [`OllamaProvider`] | `ollama` | `POST {url}/api/embed` |
//! | [`HashEmbedder`] | `hash` | feature hashing; offline and deterministic, used by tests |
//!
//! Ingestion goes through [`EmbeddingProvider::embed`], which the Ollama
//! provider retries on 429, 5xx, and connection errors with exponential
//! backoff (1s doubling, capped at 32s). Questions go through
//! [`EmbeddingProvider::embed_query`], which makes a single attempt: a
//! failing embedding service turns into an immediate low-confidence
//! answer instead of a stalled query.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::config::EmbeddingConfig;

/// An embedding function. An index is built with exactly one; vectors from
/// different functions are not comparable.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;

    /// Recorded by persistent indexes to detect a changed embedding function.
    fn identity(&self) -> String {
        format!("{}/{}", self.model_name(), self.dims())
    }

    /// Embed summaries for ingestion, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed one question. Never retries.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Embedding service returned no vector"))
    }
}

// ============ Hash Embedder ============

/// Deterministic bag-of-words embedder using signed feature hashing.
///
/// Tokens are lowercase alphanumeric runs. Each token is hashed with
/// FNV-1a; the hash selects a bucket and a sign. The result is L2-normalized.
/// Identical input always yields an identical vector.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let h = fnv1a(token.to_lowercase().as_bytes());
            let bucket = (h % self.dims as u64) as usize;
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            vec[bucket] += sign;
        }
        let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in vec.iter_mut() {
                *x /= norm;
            }
        }
        vec
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

// ============ Ollama ============

/// Embeddings from a running Ollama server.
pub struct OllamaProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = match &config.model {
            Some(model) => model.clone(),
            None => bail!("embedding.model must be set for the ollama provider"),
        };
        let dims = match config.dims {
            Some(dims) if dims > 0 => dims,
            _ => bail!("embedding.dims must be set for the ollama provider"),
        };
        let base = config.url.as_deref().unwrap_or("http://localhost:11434");
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/embed", base.trim_end_matches('/')),
            model,
            dims,
            max_retries: config.max_retries,
        })
    }

    /// One `/api/embed` exchange, repeated up to `retries` more times while
    /// the failure looks transient.
    async fn request(&self, texts: &[String], retries: u32) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let mut attempt = 0;
        loop {
            let outcome = match self.client.post(&self.endpoint).json(&body).send().await {
                Ok(response) if response.status().is_success() => {
                    let json: serde_json::Value = response.json().await?;
                    return parse_ollama_embeddings(&json, texts.len());
                }
                Ok(response) => {
                    let status = response.status();
                    let detail = response.text().await.unwrap_or_default();
                    let err = anyhow::anyhow!("Ollama API error {}: {}", status, detail);
                    if status.as_u16() != 429 && !status.is_server_error() {
                        return Err(err);
                    }
                    err
                }
                Err(e) => anyhow::anyhow!("Ollama connection error: {}", e),
            };

            if attempt >= retries {
                return Err(outcome);
            }
            attempt += 1;
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            debug!(attempt, ?delay, error = %outcome, "retrying embedding request");
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.request(texts, self.max_retries).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.request(&[text.to_string()], 0)
            .await?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Ollama returned no vector"))
    }
}

fn parse_ollama_embeddings(json: &serde_json::Value, expected: usize) -> Result<Vec<Vec<f32>>> {
    let Some(rows) = json.get("embeddings").and_then(|e| e.as_array()) else {
        bail!("Ollama response has no `embeddings` array");
    };
    if rows.len() != expected {
        bail!("Ollama returned {} vectors for {} inputs", rows.len(), expected);
    }
    rows.iter()
        .map(|row| -> Result<Vec<f32>> {
            row.as_array()
                .ok_or_else(|| anyhow::anyhow!("Ollama embedding is not an array"))?
                .iter()
                .map(|v| {
                    v.as_f64()
                        .map(|f| f as f32)
                        .ok_or_else(|| anyhow::anyhow!("Ollama embedding holds a non-number"))
                })
                .collect()
        })
        .collect()
}

// ============ Local (fastembed) ============

/// Models the local provider knows, with their output width.
#[cfg(feature = "local-embeddings-fastembed")]
const LOCAL_MODELS: &[(&str, fastembed::EmbeddingModel, usize)] = &[
    ("all-minilm-l6-v2", fastembed::EmbeddingModel::AllMiniLML6V2, 384),
    ("bge-small-en-v1.5", fastembed::EmbeddingModel::BGESmallENV15, 384),
    ("bge-base-en-v1.5", fastembed::EmbeddingModel::BGEBaseENV15, 768),
    ("nomic-embed-text-v1.5", fastembed::EmbeddingModel::NomicEmbedTextV15, 768),
];

/// Name of the local model used when `embedding.model` is unset.
pub const DEFAULT_LOCAL_MODEL: &str = "all-minilm-l6-v2";

/// In-process sentence embeddings via fastembed. The ONNX model is
/// downloaded on first use and loaded once per provider.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalProvider {
    name: String,
    model: fastembed::EmbeddingModel,
    dims: usize,
    batch_size: usize,
    loaded: std::sync::Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let name = config.model.as_deref().unwrap_or(DEFAULT_LOCAL_MODEL);
        let Some((_, model, width)) = LOCAL_MODELS.iter().find(|(n, _, _)| *n == name) else {
            let known: Vec<&str> = LOCAL_MODELS.iter().map(|(n, _, _)| *n).collect();
            bail!(
                "Unknown local embedding model '{}'; expected one of: {}",
                name,
                known.join(", ")
            );
        };
        if let Some(dims) = config.dims {
            if dims != *width {
                bail!("embedding.dims = {} but {} produces {}", dims, name, width);
            }
        }
        Ok(Self {
            name: name.to_string(),
            model: model.clone(),
            dims: *width,
            batch_size: config.batch_size.max(1),
            loaded: Default::default(),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.name
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let loaded = self.loaded.clone();
        let model = self.model.clone();
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut slot = loaded
                .lock()
                .map_err(|_| anyhow::anyhow!("local embedding model lock poisoned"))?;
            if slot.is_none() {
                let options = fastembed::InitOptions::new(model).with_show_download_progress(false);
                let embedder = fastembed::TextEmbedding::try_new(options)
                    .map_err(|e| anyhow::anyhow!("Failed to load local embedding model: {}", e))?;
                *slot = Some(embedder);
            }
            slot.as_mut()
                .ok_or_else(|| anyhow::anyhow!("local embedding model not loaded"))?
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
        })
        .await?
    }
}

/// Default width of the hash embedder.
const DEFAULT_HASH_DIMS: usize = 384;

/// Build the provider named by `config.provider`.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "hash" => Ok(Box::new(HashEmbedder::new(
            config.dims.unwrap_or(DEFAULT_HASH_DIMS),
        ))),
        "ollama" => Ok(Box::new(OllamaProvider::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Box::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!(
            "The local embedding provider needs the `local-embeddings-fastembed` feature; \
             rebuild with it or set [embedding] provider = \"ollama\" or \"hash\""
        ),
        other => bail!("Unknown embedding provider: {}", other),
    }
}


#[cfg(test)]
mod tests {
    use super::test_server::serve;
    use super::*;

    fn ollama_config(url: &str, max_retries: u32) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "ollama".to_string(),
            model: Some("nomic-embed-text".to_string()),
            dims: Some(2),
            url: Some(url.to_string()),
            max_retries,
            timeout_secs: 5,
            ..EmbeddingConfig::default()
        }
    }

    #[tokio::test]
    async fn hash_embedder_is_deterministic_and_normalized() {
        let e = HashEmbedder::new(64);
        let texts = vec!["Self-attention layers".to_string()];
        let a = e.embed(&texts).await.unwrap();
        let b = e.embed(&texts).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 64);
        let norm: f32 = a[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn hash_embedder_ignores_case_and_punctuation() {
        let e = HashEmbedder::new(128);
        assert_eq!(e.embed_one("Attention Heads"), e.embed_one("attention, heads!"));
        assert!(e.embed_one("  ...  ").iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn ollama_embeds_a_batch_in_one_request() {
        let server = serve("200 OK", r#"{"embeddings":[[1.0,0.0],[0.0,1.0]]}"#).await;
        let provider = OllamaProvider::new(&ollama_config(&server.url, 3)).unwrap();

        let vectors = provider
            .embed(&["first".to_string(), "second".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert_eq!(server.hits(), 1);
        assert_eq!(provider.identity(), "nomic-embed-text/2");
    }

    #[tokio::test]
    async fn ollama_rejects_short_responses() {
        let server = serve("200 OK", r#"{"embeddings":[[1.0,0.0]]}"#).await;
        let provider = OllamaProvider::new(&ollama_config(&server.url, 0)).unwrap();

        let err = provider
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("1 vectors for 2 inputs"));
    }

    #[tokio::test]
    async fn ingest_embedding_retries_server_errors() {
        let server = serve("503 Service Unavailable", "down").await;
        let provider = OllamaProvider::new(&ollama_config(&server.url, 1)).unwrap();

        let err = provider.embed(&["text".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("503"));
        assert_eq!(server.hits(), 2);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = serve("400 Bad Request", "no such model").await;
        let provider = OllamaProvider::new(&ollama_config(&server.url, 3)).unwrap();

        let err = provider.embed(&["text".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("no such model"));
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn query_embedding_makes_a_single_attempt() {
        let server = serve("503 Service Unavailable", "down").await;
        let provider = OllamaProvider::new(&ollama_config(&server.url, 5)).unwrap();

        let started = std::time::Instant::now();
        assert!(provider.embed_query("What?").await.is_err());
        assert_eq!(server.hits(), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn ollama_requires_model_and_dims() {
        let mut config = ollama_config("http://localhost:1", 0);
        config.dims = None;
        assert!(OllamaProvider::new(&config).is_err());
        config.dims = Some(2);
        config.model = None;
        assert!(OllamaProvider::new(&config).is_err());
    }

    #[test]
    fn hash_provider_defaults_to_384_dims() {
        let config = EmbeddingConfig {
            provider: "hash".to_string(),
            ..EmbeddingConfig::default()
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.identity(), "hash/384");
    }

    #[cfg(feature = "local-embeddings-fastembed")]
    #[test]
    fn local_provider_resolves_default_model_without_loading_it() {
        let provider = create_provider(&EmbeddingConfig::default()).unwrap();
        assert_eq!(provider.identity(), "all-minilm-l6-v2/384");

        let config = EmbeddingConfig {
            model: Some("bge-small-en-v1.5".to_string()),
            dims: Some(768),
            ..EmbeddingConfig::default()
        };
        assert!(create_provider(&config).is_err());
    }
}

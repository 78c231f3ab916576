//! Embedding contract and providers.
//!
//! The core depends only on the [`Embedder`] trait: batched `embed` for
//! indexing, `embed_single` for search queries, both returning L2-normalized
//! vectors of the advertised dimension. Concrete providers:
//!
//! - **OpenAI** — `POST /v1/embeddings`, keyed by `CTX_OPENAI_KEY`.
//! - **Voyage** — `POST /v1/embeddings` with document/query input types,
//!   keyed by `CTX_VOYAGE_KEY`.
//! - **Local** — fastembed models, behind the `local-embeddings` feature;
//!   no network calls after the first model download.
//!
//! Remote providers retry transient failures (HTTP 429, 5xx, network errors)
//! with exponential backoff — 1s, 2s, 4s, … capped — and fail fast on other
//! client errors. Exhausted retries surface as
//! [`CoreError::EmbedderFailed`].
//!
//! Instantiation goes through [`EmbedderFactory`] so callers (CLI, tests)
//! control construction; [`DefaultEmbedderFactory`] caches instances
//! process-wide per `(root, provider, model, dimensions)`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::EmbedderConfig;
use crate::error::{CoreError, Result};
use crate::store::EmbedderIdentity;

/// Callback reporting `(done, total)` after each embedded batch.
pub type Progress<'a> = &'a (dyn Fn(usize, usize) + Send + Sync);

/// A vector embedder. All returned vectors are L2-normalized and exactly
/// `dimensions()` long.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;
    fn dimensions(&self) -> usize;

    /// Embed documents for indexing. Output order matches input order.
    async fn embed(&self, texts: &[String], progress: Option<Progress<'_>>)
        -> Result<Vec<Vec<f32>>>;

    /// Embed a single search query.
    async fn embed_single(&self, text: &str) -> Result<Vec<f32>>;
}

/// Constructs embedders from configuration; the seam tests use to inject
/// deterministic fakes.
pub trait EmbedderFactory: Send + Sync {
    fn create(&self, root: &Path, config: &EmbedderConfig) -> Result<Arc<dyn Embedder>>;
}

/// The embedder identity an index built with this config would record.
pub fn identity_from_config(config: &EmbedderConfig) -> EmbedderIdentity {
    EmbedderIdentity {
        provider: config.provider.clone(),
        model: config.model.clone(),
        dimensions: config.dimensions,
    }
}

type CacheKey = (PathBuf, String, String, usize);

fn cache() -> &'static Mutex<HashMap<CacheKey, Arc<dyn Embedder>>> {
    static CACHE: OnceLock<Mutex<HashMap<CacheKey, Arc<dyn Embedder>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Factory for the configured provider set, with a process-lifetime cache
/// keyed by `(project_root, provider, model, dimensions)`.
pub struct DefaultEmbedderFactory;

impl EmbedderFactory for DefaultEmbedderFactory {
    fn create(&self, root: &Path, config: &EmbedderConfig) -> Result<Arc<dyn Embedder>> {
        let key: CacheKey = (
            root.to_path_buf(),
            config.provider.clone(),
            config.model.clone(),
            config.dimensions,
        );
        if let Some(embedder) = cache().lock().unwrap().get(&key) {
            return Ok(Arc::clone(embedder));
        }

        let embedder: Arc<dyn Embedder> = match config.provider.as_str() {
            "openai" => Arc::new(OpenAiEmbedder::new(config)?),
            "voyage" => Arc::new(VoyageEmbedder::new(config)?),
            #[cfg(feature = "local-embeddings")]
            "local" => Arc::new(LocalEmbedder::new(config)?),
            #[cfg(not(feature = "local-embeddings"))]
            "local" => {
                return Err(CoreError::ConfigInvalid(
                    "embedder.provider 'local' requires the local-embeddings feature".to_string(),
                ))
            }
            other => {
                return Err(CoreError::ConfigInvalid(format!(
                    "unknown embedder.provider '{}'",
                    other
                )))
            }
        };

        cache().lock().unwrap().insert(key, Arc::clone(&embedder));
        Ok(embedder)
    }
}

const MAX_RETRIES: u32 = 5;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ---- OpenAI ----

const OPENAI_URL: &str = "https://api.openai.com/v1/embeddings";
const OPENAI_BATCH: usize = 64;

pub struct OpenAiEmbedder {
    model: String,
    dims: usize,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbedderConfig) -> Result<Self> {
        let api_key = std::env::var("CTX_OPENAI_KEY").map_err(|_| {
            CoreError::ConfigInvalid(
                "CTX_OPENAI_KEY must be set for the openai embedder".to_string(),
            )
        })?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CoreError::EmbedderFailed(e.to_string()))?;
        Ok(Self {
            model: config.model.clone(),
            dims: config.dimensions,
            api_key,
            client,
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
            "dimensions": self.dims,
        });
        let json = post_with_retry(&self.client, OPENAI_URL, &self.api_key, &body).await?;
        parse_embedding_response(&json, texts.len(), self.dims)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed(
        &self,
        texts: &[String],
        progress: Option<Progress<'_>>,
    ) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(OPENAI_BATCH) {
            vectors.extend(self.embed_batch(batch).await?);
            if let Some(report) = progress {
                report(vectors.len(), texts.len());
            }
        }
        Ok(vectors)
    }

    async fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| CoreError::EmbedderFailed("empty embedding response".to_string()))
    }
}

// ---- Voyage ----

const VOYAGE_URL: &str = "https://api.voyageai.com/v1/embeddings";
const VOYAGE_BATCH: usize = 96;

pub struct VoyageEmbedder {
    model: String,
    dims: usize,
    api_key: String,
    client: reqwest::Client,
}

impl VoyageEmbedder {
    pub fn new(config: &EmbedderConfig) -> Result<Self> {
        let api_key = std::env::var("CTX_VOYAGE_KEY").map_err(|_| {
            CoreError::ConfigInvalid(
                "CTX_VOYAGE_KEY must be set for the voyage embedder".to_string(),
            )
        })?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CoreError::EmbedderFailed(e.to_string()))?;
        Ok(Self {
            model: config.model.clone(),
            dims: config.dimensions,
            api_key,
            client,
        })
    }

    async fn embed_batch(&self, texts: &[String], input_type: &str) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
            "input_type": input_type,
        });
        let json = post_with_retry(&self.client, VOYAGE_URL, &self.api_key, &body).await?;
        parse_embedding_response(&json, texts.len(), self.dims)
    }
}

#[async_trait]
impl Embedder for VoyageEmbedder {
    fn name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed(
        &self,
        texts: &[String],
        progress: Option<Progress<'_>>,
    ) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(VOYAGE_BATCH) {
            vectors.extend(self.embed_batch(batch, "document").await?);
            if let Some(report) = progress {
                report(vectors.len(), texts.len());
            }
        }
        Ok(vectors)
    }

    async fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()], "query").await?;
        vectors
            .pop()
            .ok_or_else(|| CoreError::EmbedderFailed("empty embedding response".to_string()))
    }
}

// ---- Local (fastembed) ----

#[cfg(feature = "local-embeddings")]
pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
    batch: usize,
}

#[cfg(feature = "local-embeddings")]
impl LocalEmbedder {
    pub fn new(config: &EmbedderConfig) -> Result<Self> {
        fastembed_model(&config.model)?;
        Ok(Self {
            model_name: config.model.clone(),
            dims: config.dimensions,
            batch: 32,
        })
    }

    async fn run_model(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let model = fastembed_model(&self.model_name)?;
        let batch = self.batch;
        tokio::task::spawn_blocking(move || {
            let mut embedder = fastembed::TextEmbedding::try_new(
                fastembed::InitOptions::new(model).with_show_download_progress(false),
            )
            .map_err(|e| CoreError::EmbedderFailed(format!("local model init: {}", e)))?;
            embedder
                .embed(texts, Some(batch))
                .map_err(|e| CoreError::EmbedderFailed(format!("local embedding: {}", e)))
        })
        .await
        .map_err(|e| CoreError::EmbedderFailed(format!("local embedding task: {}", e)))?
    }
}

#[cfg(feature = "local-embeddings")]
fn fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        other => Err(CoreError::ConfigInvalid(format!(
            "unknown local embedding model '{}'",
            other
        ))),
    }
}

#[cfg(feature = "local-embeddings")]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed(
        &self,
        texts: &[String],
        progress: Option<Progress<'_>>,
    ) -> Result<Vec<Vec<f32>>> {
        let mut vectors = self.run_model(texts.to_vec()).await?;
        for vector in &mut vectors {
            l2_normalize(vector);
        }
        if let Some(report) = progress {
            report(vectors.len(), texts.len());
        }
        Ok(vectors)
    }

    async fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.run_model(vec![text.to_string()]).await?;
        let mut vector = vectors
            .pop()
            .ok_or_else(|| CoreError::EmbedderFailed("empty embedding output".to_string()))?;
        l2_normalize(&mut vector);
        Ok(vector)
    }
}

// ---- HTTP plumbing ----

/// POST JSON with bearer auth, retrying 429/5xx/network errors with
/// exponential backoff. Other client errors fail immediately.
async fn post_with_retry(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    body: &serde_json::Value,
) -> Result<serde_json::Value> {
    let mut last_err: Option<CoreError> = None;

    for attempt in 0..=MAX_RETRIES {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            debug!("embedding retry {} after {:?}", attempt, delay);
            tokio::time::sleep(delay).await;
        }

        let response = match client
            .post(url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                last_err = Some(CoreError::EmbedderFailed(format!("request error: {}", err)));
                continue;
            }
        };

        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| CoreError::EmbedderFailed(format!("invalid response body: {}", e)));
        }

        let text = response.text().await.unwrap_or_default();
        if status.as_u16() == 429 || status.is_server_error() {
            warn!("embedding API {}: retrying", status);
            last_err = Some(CoreError::EmbedderFailed(format!("{}: {}", status, text)));
            continue;
        }
        return Err(CoreError::EmbedderFailed(format!("{}: {}", status, text)));
    }

    Err(last_err
        .unwrap_or_else(|| CoreError::EmbedderFailed("retries exhausted".to_string())))
}

/// Parse a `{"data": [{"embedding": [...]}, ...]}` response (OpenAI and
/// Voyage share this shape), normalizing and checking dimensions.
fn parse_embedding_response(
    json: &serde_json::Value,
    expected_count: usize,
    dims: usize,
) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| CoreError::EmbedderFailed("response missing data array".to_string()))?;

    if data.len() != expected_count {
        return Err(CoreError::EmbedderFailed(format!(
            "expected {} embeddings, got {}",
            expected_count,
            data.len()
        )));
    }

    let mut vectors = Vec::with_capacity(data.len());
    for item in data {
        let raw = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| CoreError::EmbedderFailed("response missing embedding".to_string()))?;
        let mut vector: Vec<f32> = raw
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        if vector.len() != dims {
            return Err(CoreError::EmbedderFailed(format!(
                "embedding has {} dimensions, expected {}",
                vector.len(),
                dims
            )));
        }
        l2_normalize(&mut vector);
        vectors.push(vector);
    }
    Ok(vectors)
}

// ---- vector utilities ----

/// Scale `vector` to unit length. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Cosine similarity in `[-1, 1]`; 0.0 for empty or mismatched inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

/// Encode a float vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for &v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vector = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vector)), vector);
    }

    #[test]
    fn test_normalize_unit_length() {
        let mut vector = vec![3.0f32, 4.0];
        l2_normalize(&mut vector);
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_normalize_idempotent() {
        let mut once = vec![0.2f32, -0.7, 0.4];
        l2_normalize(&mut once);
        let mut twice = once.clone();
        l2_normalize(&mut twice);
        for (a, b) in once.iter().zip(twice.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_normalize_zero_vector_unchanged() {
        let mut vector = vec![0.0f32; 4];
        l2_normalize(&mut vector);
        assert_eq!(vector, vec![0.0f32; 4]);
    }

    #[test]
    fn test_cosine_self_is_one() {
        let v = vec![1.0f32, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_cosine_orthogonal_is_zero() {
        let a = vec![1.0f32, 0.0];
        let b = vec![0.0f32, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_parse_embedding_response_normalizes() {
        let json = serde_json::json!({
            "data": [
                {"embedding": [3.0, 4.0]},
                {"embedding": [0.0, 5.0]}
            ]
        });
        let vectors = parse_embedding_response(&json, 2, 2).unwrap();
        for vector in &vectors {
            let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_parse_embedding_response_rejects_wrong_dims() {
        let json = serde_json::json!({"data": [{"embedding": [1.0, 2.0, 3.0]}]});
        match parse_embedding_response(&json, 1, 2) {
            Err(CoreError::EmbedderFailed(msg)) => assert!(msg.contains("dimensions")),
            other => panic!("expected EmbedderFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_identity_from_config() {
        let config = EmbedderConfig {
            provider: "voyage".to_string(),
            model: "voyage-code-2".to_string(),
            dimensions: 1536,
        };
        let identity = identity_from_config(&config);
        assert_eq!(identity.provider, "voyage");
        assert_eq!(identity.dimensions, 1536);
    }
}

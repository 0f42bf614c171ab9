//! Embedding gateway: provider abstraction, batching, retry.
//!
//! [`EmbeddingProvider`] is the outbound interface to whatever service turns
//! text into vectors. [`EmbeddingGateway`] wraps a provider with input
//! validation, blank filtering, bounded retry with exponential backoff, and
//! dimensionality checks, so the rest of the engine only ever sees vectors
//! of the configured size or a terminal [`EngineError::Embedding`].
//!
//! Also provides the vector utilities shared with the stores:
//! - [`cosine_similarity`] — similarity between two equal-length vectors
//! - [`vec_to_blob`] / [`blob_to_vec`] — little-endian f32 BLOB codec for
//!   SQLite storage

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::EmbeddingConfig;
use crate::error::EngineError;

/// Outbound embedding interface.
///
/// Implementations must preserve order: one vector per input text, in the
/// same order. Transport and provider-shape failures are reported as
/// [`EngineError::Embedding`]; the gateway decides whether to retry.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError>;
}

/// Wraps a provider with validation, retry, and backoff.
///
/// Stateless per invocation; retry is confined to this layer — callers must
/// not retry a terminal embedding failure themselves.
pub struct EmbeddingGateway {
    provider: Arc<dyn EmbeddingProvider>,
    config: EmbeddingConfig,
}

impl EmbeddingGateway {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: EmbeddingConfig) -> Self {
        Self { provider, config }
    }

    /// The fixed vector dimensionality this gateway enforces.
    pub fn dims(&self) -> usize {
        self.config.dims
    }

    /// Embed a single text. Blank input is rejected before any provider call.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        if text.trim().is_empty() {
            return Err(EngineError::invalid_input("embedding text must not be blank"));
        }

        let mut vectors = self.call_with_retry(&[text.to_string()]).await?;
        // call_with_retry has already validated count == 1.
        Ok(vectors.remove(0))
    }

    /// Embed a batch of texts in one provider call.
    ///
    /// Blank entries are dropped (relative order of the rest preserved); an
    /// all-blank batch returns an empty result without calling the provider.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
        let valid: Vec<String> = texts
            .iter()
            .filter(|t| !t.trim().is_empty())
            .cloned()
            .collect();

        if valid.is_empty() {
            tracing::warn!("no non-blank texts to embed");
            return Ok(Vec::new());
        }

        self.call_with_retry(&valid).await
    }

    /// One provider call per attempt, up to `max_attempts`, with backoff
    /// starting at `backoff_initial_ms` and doubling. Every provider-level
    /// failure is retryable: transport errors, malformed or empty responses,
    /// count mismatches, and wrong dimensionality.
    async fn call_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
        let mut delay = Duration::from_millis(self.config.backoff_initial_ms);
        let mut last_err: Option<EngineError> = None;

        for attempt in 1..=self.config.max_attempts {
            if attempt > 1 {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }

            match self.provider.embed(texts).await {
                Ok(vectors) => match self.validate(texts.len(), &vectors) {
                    Ok(()) => return Ok(vectors),
                    Err(e) => {
                        tracing::warn!(attempt, "embedding response invalid: {e}");
                        last_err = Some(e);
                    }
                },
                Err(e) => {
                    tracing::warn!(attempt, "embedding attempt failed: {e}");
                    last_err = Some(e);
                }
            }
        }

        let cause = last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempts were made".to_string());
        Err(EngineError::Embedding(format!(
            "exhausted {} attempts: {cause}",
            self.config.max_attempts
        )))
    }

    fn validate(&self, expected: usize, vectors: &[Vec<f32>]) -> Result<(), EngineError> {
        if vectors.len() != expected {
            return Err(EngineError::Embedding(format!(
                "provider returned {} vectors for {} inputs",
                vectors.len(),
                expected
            )));
        }
        for v in vectors {
            if v.is_empty() || v.len() != self.config.dims {
                return Err(EngineError::Embedding(format!(
                    "provider returned a vector of {} components, expected {}",
                    v.len(),
                    self.config.dims
                )));
            }
        }
        Ok(())
    }
}

/// Embedding provider speaking the OpenAI-compatible `/v1/embeddings` shape.
///
/// The bearer token is read from `OPENAI_API_KEY`; local endpoints that need
/// no key work without it.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::Embedding(format!("could not build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: config.url.clone(),
            model: config.model.clone(),
            api_key: std::env::var("OPENAI_API_KEY").ok(),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::Embedding(format!("embedding request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(EngineError::Embedding(format!(
                "embedding API error {status}: {body_text}"
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::Embedding(format!("invalid embedding response: {e}")))?;

        parse_embeddings_response(&json)
    }
}

/// Extract the `data[].embedding` arrays, preserving input order.
fn parse_embeddings_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EngineError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EngineError::Embedding("response is missing the data array".to_string()))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                EngineError::Embedding("response item is missing the embedding array".to_string())
            })?;
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        embeddings.push(vec);
    }

    Ok(embeddings)
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
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

/// Compute cosine similarity between two vectors of equal length.
///
/// Callers are responsible for the length check; the stores surface a
/// dimension mismatch as a configuration error before reaching this point.
/// Returns `0.0` when either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider that fails a fixed number of times, then returns vectors of
    /// the given dimensionality.
    struct FlakyProvider {
        failures: usize,
        dims: usize,
        calls: AtomicUsize,
    }

    impl FlakyProvider {
        fn new(failures: usize, dims: usize) -> Self {
            Self {
                failures,
                dims,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(EngineError::Embedding("transient failure".to_string()));
            }
            Ok(texts.iter().map(|_| vec![0.5; self.dims]).collect())
        }
    }

    /// Provider that returns one vector fewer than requested.
    struct ShortProvider {
        dims: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for ShortProvider {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .skip(1)
                .map(|_| vec![0.5; self.dims])
                .collect())
        }
    }

    fn config(dims: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            dims,
            max_attempts: 3,
            backoff_initial_ms: 1000,
            ..EmbeddingConfig::default()
        }
    }

    fn gateway(provider: Arc<dyn EmbeddingProvider>, dims: usize) -> EmbeddingGateway {
        EmbeddingGateway::new(provider, config(dims))
    }

    #[tokio::test]
    async fn test_embed_one_rejects_blank() {
        let provider = Arc::new(FlakyProvider::new(0, 4));
        let gw = gateway(provider.clone(), 4);
        let err = gw.embed_one("   ").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
        // Rejected before any provider call.
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_embed_one_returns_single_vector() {
        let gw = gateway(Arc::new(FlakyProvider::new(0, 4)), 4);
        let vector = gw.embed_one("hello").await.unwrap();
        assert_eq!(vector.len(), 4);
    }

    #[tokio::test]
    async fn test_batch_drops_blank_entries_preserving_order() {
        struct EchoProvider;

        #[async_trait]
        impl EmbeddingProvider for EchoProvider {
            async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
                // Encode input length so order is observable.
                Ok(texts
                    .iter()
                    .map(|t| vec![t.chars().count() as f32; 4])
                    .collect())
            }
        }

        let gw = gateway(Arc::new(EchoProvider), 4);
        let texts = vec![
            "a".to_string(),
            "   ".to_string(),
            "abc".to_string(),
            "".to_string(),
            "ab".to_string(),
        ];
        let vectors = gw.embed_batch(&texts).await.unwrap();
        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[0][0], 1.0);
        assert_eq!(vectors[1][0], 3.0);
        assert_eq!(vectors[2][0], 2.0);
    }

    #[tokio::test]
    async fn test_batch_all_blank_skips_provider() {
        let provider = Arc::new(FlakyProvider::new(0, 4));
        let gw = gateway(provider.clone(), 4);
        let vectors = gw
            .embed_batch(&["".to_string(), "  ".to_string()])
            .await
            .unwrap();
        assert!(vectors.is_empty());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds() {
        let provider = Arc::new(FlakyProvider::new(2, 4));
        let gw = gateway(provider.clone(), 4);
        let vectors = gw.embed_batch(&["hello".to_string()]).await.unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_is_terminal_embedding_failure() {
        let provider = Arc::new(FlakyProvider::new(10, 4));
        let gw = gateway(provider.clone(), 4);
        let err = gw.embed_batch(&["hello".to_string()]).await.unwrap_err();
        assert!(matches!(err, EngineError::Embedding(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_mismatch_is_retried_then_fails() {
        let provider = Arc::new(ShortProvider {
            dims: 4,
            calls: AtomicUsize::new(0),
        });
        let gw = gateway(provider.clone(), 4);
        let err = gw
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Embedding(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_dims_rejected() {
        let gw = gateway(Arc::new(FlakyProvider::new(0, 7)), 4);
        let err = gw.embed_one("hello").await.unwrap_err();
        assert!(matches!(err, EngineError::Embedding(_)));
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob.len(), 20);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn test_cosine_identical_and_orthogonal() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);

        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_magnitude() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_parse_embeddings_response() {
        let json = serde_json::json!({
            "data": [
                {"embedding": [0.1, 0.2]},
                {"embedding": [0.3, 0.4]},
            ]
        });
        let vectors = parse_embeddings_response(&json).unwrap();
        assert_eq!(vectors.len(), 2);
        assert!((vectors[1][0] - 0.3).abs() < 1e-6);

        let bad = serde_json::json!({"unexpected": true});
        assert!(parse_embeddings_response(&bad).is_err());
    }
}

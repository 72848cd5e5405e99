use crate::error::SearchError;
use crate::retry::{check_status, classify, RetryPolicy};
use crate::traits::EmbeddingProvider;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Instruction prefix for stored passages.
pub const DOCUMENT_PREFIX: &str = "Represent this recipe text for retrieval: ";
/// Instruction prefix for search queries.
pub const QUERY_PREFIX: &str = "Represent this recipe search query: ";
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 32;
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1024;
const BACKEND: &str = "embedding";

/// Prefixing, batching and L2 normalization over a raw [`EmbeddingProvider`].
///
/// The dimension is fixed at construction; any vector of another length is a
/// configuration error, and a failing batch fails the whole call.
#[derive(Clone)]
pub struct EmbeddingGateway {
    provider: Arc<dyn EmbeddingProvider>,
    dimension: usize,
    batch_size: usize,
}

impl EmbeddingGateway {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, batch_size: usize) -> Self {
        let dimension = provider.dimensions();
        Self {
            provider,
            dimension,
            batch_size: batch_size.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| SearchError::BackendResponse {
            backend: BACKEND.to_string(),
            details: "no vector returned".to_string(),
        })
    }

    /// Document embeddings in input order.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        self.embed_prefixed(DOCUMENT_PREFIX, texts).await
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        let mut vectors = self
            .embed_prefixed(QUERY_PREFIX, &[text.to_string()])
            .await?;
        vectors.pop().ok_or_else(|| SearchError::BackendResponse {
            backend: BACKEND.to_string(),
            details: "no vector returned".to_string(),
        })
    }

    /// Embeds one query and fails with [`SearchError::Configuration`] when the
    /// provider's real output width differs from the declared dimension.
    pub async fn check_dimension(&self) -> Result<(), SearchError> {
        self.embed_query("dimension check").await.map(|_| ())
    }

    async fn embed_prefixed(
        &self,
        prefix: &str,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, SearchError> {
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            let inputs = batch
                .iter()
                .map(|text| format!("{prefix}{text}"))
                .collect::<Vec<_>>();
            let raw = self.provider.embed_texts(&inputs).await?;
            if raw.len() != inputs.len() {
                return Err(SearchError::BackendResponse {
                    backend: BACKEND.to_string(),
                    details: format!("{} vectors for {} inputs", raw.len(), inputs.len()),
                });
            }

            for vector in raw {
                if vector.len() != self.dimension {
                    return Err(SearchError::Configuration(format!(
                        "embedding dimension {} does not match configured {}",
                        vector.len(),
                        self.dimension
                    )));
                }
                vectors.push(l2_normalize(vector));
            }
        }

        debug!(count = vectors.len(), "embedded texts");
        Ok(vectors)
    }
}

pub fn l2_normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for value in &mut vector {
            *value /= magnitude;
        }
    }
    vector
}

/// Offline provider hashing character n-grams into buckets. Deterministic,
/// for tests and air-gapped runs; not semantically meaningful.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
    /// Hangul syllables carry a morpheme each, so bigrams work better than trigrams.
    pub ngram: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            ngram: 2,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let chars: Vec<char> = text
            .to_lowercase()
            .chars()
            .filter(|ch| !ch.is_whitespace())
            .collect();
        let width = self.ngram.max(1);
        let buckets = vector.len();

        if chars.len() < width {
            if !chars.is_empty() {
                vector[bucket(&chars, buckets)] += 1.0;
            }
            return vector;
        }

        for window in chars.windows(width) {
            vector[bucket(window, buckets)] += 1.0;
        }
        vector
    }
}

fn bucket(window: &[char], buckets: usize) -> usize {
    // FNV-1a
    let mut hash = 1469598103934665603u64;
    for ch in window {
        let mut utf8 = [0u8; 4];
        for byte in ch.encode_utf8(&mut utf8).bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(1099511628211);
        }
    }
    (hash % buckets as u64) as usize
}

#[async_trait]
impl EmbeddingProvider for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed_texts(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        Ok(inputs.iter().map(|text| self.embed_one(text)).collect())
    }
}

#[derive(Debug, Clone)]
pub struct HttpEmbeddingConfig {
    /// Base URL of an OpenAI-compatible API; `/embeddings` is appended.
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub dimensions: usize,
    /// Sent as `dimensions` in the request for models that can truncate.
    pub request_dimensions: bool,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

/// Async client for OpenAI-style `/embeddings` endpoints.
pub struct HttpEmbeddingProvider {
    config: HttpEmbeddingConfig,
    endpoint: String,
    client: Client,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

impl HttpEmbeddingProvider {
    pub fn new(config: HttpEmbeddingConfig) -> Result<Self, SearchError> {
        if config.model.trim().is_empty() {
            return Err(SearchError::Configuration(
                "embedding model must not be empty".to_string(),
            ));
        }
        if config.dimensions == 0 {
            return Err(SearchError::Configuration(
                "embedding dimension must be positive".to_string(),
            ));
        }
        let endpoint = format!(
            "{}/embeddings",
            url::Url::parse(&config.base_url)?
                .as_str()
                .trim_end_matches('/')
        );
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            config,
            endpoint,
            client,
        })
    }

    async fn request(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        let body = EmbeddingRequest {
            model: &self.config.model,
            input: inputs,
            dimensions: self
                .config
                .request_dimensions
                .then_some(self.config.dimensions),
        };
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|error| classify(BACKEND, self.config.timeout, error))?;
        let response = check_status(BACKEND, response).await?;
        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|error| classify(BACKEND, self.config.timeout, error))?;
        into_ordered_vectors(parsed, inputs.len())
    }
}

fn into_ordered_vectors(
    mut parsed: EmbeddingResponse,
    expected: usize,
) -> Result<Vec<Vec<f32>>, SearchError> {
    parsed.data.sort_by_key(|entry| entry.index);
    if parsed.data.len() != expected {
        return Err(SearchError::BackendResponse {
            backend: BACKEND.to_string(),
            details: format!(
                "returned {} embeddings for {} inputs",
                parsed.data.len(),
                expected
            ),
        });
    }
    Ok(parsed
        .data
        .into_iter()
        .map(|entry| entry.embedding)
        .collect())
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    async fn embed_texts(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        self.config
            .retry
            .run(BACKEND, || self.request(inputs))
            .await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every input it sees and returns ngram vectors.
    #[derive(Default)]
    pub struct RecordingEmbedder {
        pub inner: CharacterNgramEmbedder,
        pub calls: Mutex<Vec<Vec<String>>>,
        pub fail: bool,
    }

    impl RecordingEmbedder {
        pub fn with_dimensions(dimensions: usize) -> Self {
            Self {
                inner: CharacterNgramEmbedder {
                    dimensions,
                    ngram: 2,
                },
                ..Default::default()
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().map(|calls| calls.len()).unwrap_or_default()
        }

        pub fn inputs(&self) -> Vec<String> {
            self.calls
                .lock()
                .map(|calls| calls.iter().flatten().cloned().collect())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl EmbeddingProvider for RecordingEmbedder {
        fn dimensions(&self) -> usize {
            self.inner.dimensions
        }

        async fn embed_texts(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(inputs.to_vec());
            }
            if self.fail {
                return Err(SearchError::Status {
                    backend: BACKEND.to_string(),
                    status: 500,
                    body: "provider down".to_string(),
                });
            }
            self.inner.embed_texts(inputs).await
        }
    }
}

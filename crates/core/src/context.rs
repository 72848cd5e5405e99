use crate::cache::{CacheSettings, CacheWriter, InMemoryQueryCache};
use crate::embeddings::{
    CharacterNgramEmbedder, EmbeddingGateway, HttpEmbeddingConfig, HttpEmbeddingProvider,
    DEFAULT_EMBED_BATCH_SIZE,
};
use crate::error::IngestError;
use crate::extractor::{ExtractionPolicy, TextExtractor};
use crate::filter::{ChatCompletionConfig, ChatCompletionTitleFilter};
use crate::ingest::IngestionPipeline;
use crate::models::IngestionOptions;
use crate::ocr::{OcrEndpointConfig, RemoteOcrEngine, TesseractOcr};
use crate::raster::PopplerRasterizer;
use crate::retrieval::RetrievalPipeline;
use crate::retry::{RetryPolicy, DEFAULT_MAX_RETRIES};
use crate::stores::{InMemoryVectorIndex, QdrantConfig, QdrantStore};
use crate::titles::{LayoutTitleDetector, TitleDetectionConfig};
use crate::traits::{EmbeddingProvider, OcrEngine, QueryCache, TitleFilter, VectorIndex};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Network behaviour shared by the embedding, vector-index and LLM clients.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub timeout: Duration,
    pub max_retries: usize,
    pub batch_size: usize,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_PROVIDER_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            batch_size: DEFAULT_EMBED_BATCH_SIZE,
        }
    }
}

impl ProviderSettings {
    fn retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            ..RetryPolicy::default()
        }
    }
}

#[derive(Debug, Clone)]
pub enum EmbeddingBackend {
    Http {
        base_url: String,
        api_key: Option<String>,
        model: String,
        dimensions: usize,
    },
    /// Hashed character n-grams; no network.
    Local { dimensions: usize },
}

#[derive(Debug, Clone)]
pub enum IndexBackend {
    Qdrant {
        url: String,
        collection: String,
        api_key: Option<String>,
    },
    Memory,
}

#[derive(Debug, Clone)]
pub enum OcrBackend {
    Tesseract { binary: PathBuf, timeout: Duration },
    Remote {
        endpoint: String,
        api_key: Option<String>,
        timeout: Duration,
    },
}

impl Default for OcrBackend {
    fn default() -> Self {
        let tesseract = TesseractOcr::default();
        OcrBackend::Tesseract {
            binary: tesseract.binary,
            timeout: tesseract.timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub embedding: EmbeddingBackend,
    pub index: IndexBackend,
    pub ocr: OcrBackend,
    pub pdftoppm_binary: PathBuf,
    /// Enables the food-name title filter.
    pub llm: Option<LlmSettings>,
    pub provider: ProviderSettings,
    pub cache: CacheSettings,
    pub ingestion: IngestionOptions,
    pub extraction: ExtractionPolicy,
    pub titles: TitleDetectionConfig,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            embedding: EmbeddingBackend::Local {
                dimensions: crate::embeddings::DEFAULT_EMBEDDING_DIMENSIONS,
            },
            index: IndexBackend::Memory,
            ocr: OcrBackend::default(),
            pdftoppm_binary: PopplerRasterizer::default().binary,
            llm: None,
            provider: ProviderSettings::default(),
            cache: CacheSettings::default(),
            ingestion: IngestionOptions::default(),
            extraction: ExtractionPolicy::default(),
            titles: TitleDetectionConfig::default(),
        }
    }
}

/// Process-wide handles, built once and shared by every pipeline.
pub struct AppContext {
    pub embeddings: EmbeddingGateway,
    pub index: Arc<dyn VectorIndex>,
    pub cache: Option<Arc<dyn QueryCache>>,
    pub extractor: TextExtractor,
    pub title_filter: Option<Arc<dyn TitleFilter>>,
    cache_writer: Option<Arc<CacheWriter>>,
    config: ContextConfig,
}

impl AppContext {
    /// Connects every collaborator. An embedding model whose output width
    /// differs from its configured dimension, or a vector index created with
    /// another dimension, fails here before any request is served.
    pub async fn initialize(config: ContextConfig) -> Result<Self, IngestError> {
        let provider: Arc<dyn EmbeddingProvider> = match &config.embedding {
            EmbeddingBackend::Http {
                base_url,
                api_key,
                model,
                dimensions,
            } => Arc::new(HttpEmbeddingProvider::new(HttpEmbeddingConfig {
                base_url: base_url.clone(),
                api_key: api_key.clone(),
                model: model.clone(),
                dimensions: *dimensions,
                request_dimensions: false,
                timeout: config.provider.timeout,
                retry: config.provider.retry(),
            })?),
            EmbeddingBackend::Local { dimensions } => Arc::new(CharacterNgramEmbedder {
                dimensions: *dimensions,
                ..CharacterNgramEmbedder::default()
            }),
        };
        Self::with_embedding_provider(config, provider).await
    }

    /// Same as [`AppContext::initialize`] with an already built embedding
    /// provider; `config.embedding` is ignored.
    pub async fn with_embedding_provider(
        config: ContextConfig,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, IngestError> {
        let embeddings = EmbeddingGateway::new(provider, config.provider.batch_size);
        embeddings.check_dimension().await?;

        let index: Arc<dyn VectorIndex> = match &config.index {
            IndexBackend::Qdrant {
                url,
                collection,
                api_key,
            } => Arc::new(
                QdrantStore::connect(QdrantConfig {
                    endpoint: url.clone(),
                    collection: collection.clone(),
                    api_key: api_key.clone(),
                    vector_size: embeddings.dimension(),
                    timeout: config.provider.timeout,
                    retry: config.provider.retry(),
                })
                .await?,
            ),
            IndexBackend::Memory => Arc::new(InMemoryVectorIndex::new(embeddings.dimension())),
        };

        let ocr: Arc<dyn OcrEngine> = match &config.ocr {
            OcrBackend::Tesseract { binary, timeout } => Arc::new(TesseractOcr {
                binary: binary.clone(),
                timeout: *timeout,
                dpi: config.extraction.dpi,
            }),
            OcrBackend::Remote {
                endpoint,
                api_key,
                timeout,
            } => Arc::new(RemoteOcrEngine::new(OcrEndpointConfig {
                endpoint: endpoint.clone(),
                api_key: api_key.clone(),
                timeout: *timeout,
            })?),
        };
        let rasterizer = Arc::new(PopplerRasterizer {
            binary: config.pdftoppm_binary.clone(),
            ..PopplerRasterizer::default()
        });
        let extractor = TextExtractor::new(rasterizer, ocr, config.extraction.clone());

        let title_filter: Option<Arc<dyn TitleFilter>> = match &config.llm {
            Some(llm) => Some(Arc::new(ChatCompletionTitleFilter::new(
                ChatCompletionConfig {
                    base_url: llm.base_url.clone(),
                    api_key: llm.api_key.clone(),
                    model: llm.model.clone(),
                    timeout: config.provider.timeout,
                    retry: config.provider.retry(),
                },
            )?)),
            None => None,
        };

        let (cache, cache_writer) = if config.cache.enabled {
            let cache: Arc<dyn QueryCache> = Arc::new(InMemoryQueryCache::new(config.cache.capacity));
            let writer = Arc::new(CacheWriter::spawn(cache.clone()));
            (Some(cache), Some(writer))
        } else {
            (None, None)
        };

        info!(
            dimension = embeddings.dimension(),
            cache = config.cache.enabled,
            title_filter = title_filter.is_some(),
            "context initialized"
        );

        Ok(Self {
            embeddings,
            index,
            cache,
            extractor,
            title_filter,
            cache_writer,
            config,
        })
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn ingestion_pipeline(&self) -> IngestionPipeline {
        let pipeline = IngestionPipeline::new(
            self.extractor.clone(),
            self.embeddings.clone(),
            self.index.clone(),
            self.config.ingestion.clone(),
        )
        .with_title_detector(LayoutTitleDetector::new(self.config.titles.clone()));
        match &self.title_filter {
            Some(filter) => pipeline.with_title_filter(filter.clone()),
            None => pipeline,
        }
    }

    pub fn retrieval_pipeline(&self) -> RetrievalPipeline {
        let pipeline = RetrievalPipeline::new(self.embeddings.clone(), self.index.clone())
            .with_description_chars(self.config.ingestion.description_chars);
        match (&self.cache, &self.cache_writer) {
            (Some(cache), Some(writer)) => {
                pipeline.with_cache(cache.clone(), writer.clone(), self.config.cache.ttl)
            }
            _ => pipeline,
        }
    }

    /// Drains pending cache writes. Pipelines built from this context stop
    /// caching afterwards.
    pub async fn shutdown(self) {
        if let Some(writer) = &self.cache_writer {
            writer.shutdown().await;
        }
        info!("context shut down");
    }
}

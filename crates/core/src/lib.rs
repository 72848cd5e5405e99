pub mod cache;
pub mod chunking;
pub mod context;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod filter;
pub mod ingest;
pub mod layout;
pub mod models;
pub mod normalize;
pub mod ocr;
mod process;
pub mod raster;
pub mod retrieval;
pub mod retry;
pub mod stores;
pub mod titles;
pub mod traits;

pub use cache::{cache_key, CacheSettings, CacheWriter, InMemoryQueryCache};
pub use chunking::{build_chunks, split_text, ChunkingConfig};
pub use context::{
    AppContext, ContextConfig, EmbeddingBackend, IndexBackend, LlmSettings, OcrBackend,
    ProviderSettings,
};
pub use embeddings::{
    CharacterNgramEmbedder, EmbeddingGateway, HttpEmbeddingConfig, HttpEmbeddingProvider,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{CacheError, IngestError, SearchError};
pub use extractor::{ExtractedPage, ExtractionPolicy, PageSource, TextExtractor};
pub use filter::{ChatCompletionConfig, ChatCompletionTitleFilter};
pub use ingest::{
    discover_pdf_files, FolderIngestReport, IngestionPipeline, SkippedPdf, TitleReport,
};
pub use models::{
    document_key, BatchIndexReport, Chunk, DocumentFingerprint, IndexRecord, IndexStats,
    IngestReport, IngestRequest, IngestionOptions, Metadata, MetadataFilter, RecipeHit,
    RecipeRecord, ScoredRecord, SearchRequest, SearchResponse,
};
pub use normalize::normalize_query;
pub use retrieval::RetrievalPipeline;
pub use retry::RetryPolicy;
pub use stores::{InMemoryVectorIndex, QdrantConfig, QdrantStore};
pub use titles::{LayoutTitleDetector, TitleCandidate, TitleDetectionConfig};
pub use traits::{EmbeddingProvider, OcrEngine, PageRasterizer, QueryCache, TitleFilter, VectorIndex};

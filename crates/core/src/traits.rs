use crate::error::{CacheError, IngestError, SearchError};
use crate::models::{IndexRecord, IndexStats, MetadataFilter, ScoredRecord};
use crate::ocr::OcrPage;
use crate::raster::GrayImage;
use async_trait::async_trait;
use std::time::Duration;

/// Raw text-to-vector provider. Prefixing and normalization live in
/// [`crate::EmbeddingGateway`], not here.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed_texts(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, SearchError>;
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Writes records wholesale; an existing id is replaced.
    async fn upsert(&self, records: &[IndexRecord]) -> Result<Vec<String>, SearchError>;

    /// Top-k by descending cosine similarity.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredRecord>, SearchError>;

    async fn delete(&self, id: &str) -> Result<bool, SearchError>;

    async fn stats(&self) -> Result<IndexStats, SearchError>;
}

#[async_trait]
pub trait QueryCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set_with_expiry(&self, key: &str, value: String, ttl: Duration)
        -> Result<(), CacheError>;
}

pub trait PageRasterizer: Send + Sync {
    /// Renders one 1-based page to grayscale at `dpi`.
    fn rasterize(&self, pdf: &[u8], page: u32, dpi: u32) -> Result<GrayImage, IngestError>;
}

pub trait OcrEngine: Send + Sync {
    fn recognize(&self, image: &GrayImage, language: &str) -> Result<OcrPage, IngestError>;
}

/// Keeps only the candidates naming a dish, dessert, drink or snack.
#[async_trait]
pub trait TitleFilter: Send + Sync {
    async fn filter_food_names(&self, candidates: &[String]) -> Result<Vec<String>, SearchError>;
}

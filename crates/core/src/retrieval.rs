use crate::cache::{cache_key, CacheWriter, DEFAULT_CACHE_TTL};
use crate::embeddings::EmbeddingGateway;
use crate::error::SearchError;
use crate::models::{
    MetadataFilter, RecipeHit, ScoredRecord, SearchRequest, SearchResponse,
    DEFAULT_DESCRIPTION_CHARS, FIELD_APPLIANCE, FIELD_CUISINE_TYPE, FIELD_DESCRIPTION,
    FIELD_DIFFICULTY_LEVEL, FIELD_INGREDIENTS, FIELD_INSTRUCTIONS, FIELD_MANUFACTURER,
    FIELD_PRODUCT_NAME, FIELD_TEXT, FIELD_TITLE,
};
use crate::normalize::normalize_query;
use crate::traits::{QueryCache, VectorIndex};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Query text to shaped recipe hits, with a read-through result cache.
///
/// Cache misses and cache errors take the same path; the result is written
/// back through a [`CacheWriter`] after the response is built, so a slow or
/// broken cache never delays or fails a search.
#[derive(Clone)]
pub struct RetrievalPipeline {
    embeddings: EmbeddingGateway,
    index: Arc<dyn VectorIndex>,
    cache: Option<(Arc<dyn QueryCache>, Arc<CacheWriter>)>,
    ttl: Duration,
    description_chars: usize,
}

impl RetrievalPipeline {
    pub fn new(embeddings: EmbeddingGateway, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            embeddings,
            index,
            cache: None,
            ttl: DEFAULT_CACHE_TTL,
            description_chars: DEFAULT_DESCRIPTION_CHARS,
        }
    }

    pub fn with_cache(
        mut self,
        cache: Arc<dyn QueryCache>,
        writer: Arc<CacheWriter>,
        ttl: Duration,
    ) -> Self {
        self.cache = Some((cache, writer));
        self.ttl = ttl;
        self
    }

    pub fn with_description_chars(mut self, description_chars: usize) -> Self {
        self.description_chars = description_chars;
        self
    }

    async fn cached(&self, key: &str) -> Option<SearchResponse> {
        let (cache, _) = self.cache.as_ref()?;
        match cache.get(key).await {
            Ok(Some(payload)) => match serde_json::from_str(&payload) {
                Ok(response) => Some(response),
                Err(error) => {
                    warn!(%key, %error, "discarding unreadable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(error) => {
                warn!(%key, %error, "cache lookup failed, computing result");
                None
            }
        }
    }

    fn store(&self, key: String, response: &SearchResponse) {
        let Some((_, writer)) = &self.cache else {
            return;
        };
        match serde_json::to_string(response) {
            Ok(payload) => writer.submit(key, payload, self.ttl),
            Err(error) => warn!(%key, %error, "search result not cacheable"),
        }
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, SearchError> {
        let normalized = normalize_query(&request.query);
        if normalized.is_empty() {
            return Err(SearchError::Request("query is empty".to_string()));
        }
        if request.limit == 0 {
            return Err(SearchError::Request("limit must be positive".to_string()));
        }
        let appliance = request
            .appliance
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty());

        let key = cache_key(&normalized, appliance, request.limit);
        if let Some(mut response) = self.cached(&key).await {
            debug!(%key, "cache hit");
            response.query = request.query.clone();
            return Ok(response);
        }

        let vector = self.embeddings.embed_query(&normalized).await?;
        let filter = appliance.map(MetadataFilter::appliance);
        let hits = self
            .index
            .query(&vector, request.limit, filter.as_ref())
            .await?;

        let recipes = hits
            .iter()
            .take(request.limit)
            .map(|hit| shape_hit(hit, self.description_chars))
            .collect::<Vec<_>>();
        let response = SearchResponse {
            total_count: recipes.len(),
            recipes,
            query: request.query.clone(),
            timestamp: Utc::now().to_rfc3339(),
        };
        info!(query = %normalized, appliance = ?appliance, hits = response.total_count, "search complete");

        self.store(key, &response);
        Ok(response)
    }
}

/// Maps an index record to a recipe hit. Directly indexed recipes carry their
/// own fields; chunk records fall back to their text and document identity.
pub fn shape_hit(hit: &ScoredRecord, description_chars: usize) -> RecipeHit {
    let text = hit.field(FIELD_TEXT).unwrap_or_default();
    let title = hit.field(FIELD_TITLE).unwrap_or_else(|| {
        match (hit.field(FIELD_MANUFACTURER), hit.field(FIELD_PRODUCT_NAME)) {
            (Some(manufacturer), Some(product)) => format!("{manufacturer} {product}"),
            _ => hit.id.clone(),
        }
    });
    let description = hit
        .field(FIELD_DESCRIPTION)
        .unwrap_or_else(|| text.chars().take(description_chars).collect());
    let instructions = hit.field(FIELD_INSTRUCTIONS).unwrap_or_else(|| text.clone());

    RecipeHit {
        recipe_id: hit.id.clone(),
        title,
        description,
        appliance: hit.field(FIELD_APPLIANCE).unwrap_or_default(),
        ingredients: hit.field(FIELD_INGREDIENTS).unwrap_or_default(),
        instructions,
        cuisine_type: hit.field(FIELD_CUISINE_TYPE),
        difficulty_level: hit.field(FIELD_DIFFICULTY_LEVEL),
        relevance_score: hit.score.clamp(0.0, 1.0),
    }
}

use crate::error::SearchError;
use crate::models::{IndexRecord, IndexStats, Metadata, MetadataFilter, ScoredRecord};
use crate::retry::{check_status, classify, RetryPolicy};
use crate::traits::VectorIndex;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

const BACKEND: &str = "qdrant";
/// Payload key holding the caller's string id; Qdrant point ids must be UUIDs.
pub const RECORD_ID_FIELD: &str = "record_id";

#[derive(Debug, Clone)]
pub struct QdrantConfig {
    pub endpoint: String,
    pub collection: String,
    pub api_key: Option<String>,
    pub vector_size: usize,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

pub struct QdrantStore {
    config: QdrantConfig,
    endpoint: String,
    client: Client,
}

/// Stable point id for a string record id, so re-upserts overwrite.
pub fn point_id(record_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, record_id.as_bytes())
}

fn filter_clause(filter: &MetadataFilter) -> Value {
    json!({
        "must": [{ "key": filter.field, "match": { "value": filter.value } }]
    })
}

impl QdrantStore {
    /// Opens the collection, creating it (cosine) when missing.
    ///
    /// An existing collection with another vector size is a configuration
    /// error, surfaced here rather than on the first query.
    pub async fn connect(config: QdrantConfig) -> Result<Self, SearchError> {
        let endpoint = url::Url::parse(&config.endpoint)?
            .as_str()
            .trim_end_matches('/')
            .to_string();
        let client = Client::builder().timeout(config.timeout).build()?;
        let store = Self {
            config,
            endpoint,
            client,
        };
        store.ensure_collection().await?;
        Ok(store)
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!(
            "{}/collections/{}{}",
            self.endpoint, self.config.collection, suffix
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(api_key) => request.header("api-key", api_key),
            None => request,
        }
    }

    async fn send(&self, build: impl Fn() -> RequestBuilder) -> Result<Value, SearchError> {
        let build = &build;
        self.config
            .retry
            .run(BACKEND, || async move {
                let response = self
                    .authorized(build())
                    .send()
                    .await
                    .map_err(|error| classify(BACKEND, self.config.timeout, error))?;
                let response = check_status(BACKEND, response).await?;
                Ok::<Value, SearchError>(response.json::<Value>().await?)
            })
            .await
    }

    async fn collection_info(&self) -> Result<Option<Value>, SearchError> {
        match self.send(|| self.client.get(self.collection_url(""))).await {
            Ok(value) => Ok(Some(value)),
            Err(SearchError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    pub async fn ensure_collection(&self) -> Result<(), SearchError> {
        let expected = self.config.vector_size;
        match self.collection_info().await? {
            Some(info) => {
                check_collection(&self.config.collection, &info, expected)?;
                info!(collection = %self.config.collection, dimension = expected, "reusing collection");
            }
            None => {
                let body = json!({ "vectors": { "size": expected, "distance": "Cosine" } });
                self.send(|| self.client.put(self.collection_url("")).json(&body))
                    .await?;
                info!(collection = %self.config.collection, dimension = expected, "created collection");
            }
        }
        Ok(())
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), SearchError> {
        if vector.len() != self.config.vector_size {
            return Err(SearchError::Configuration(format!(
                "vector dimension {} != collection dimension {}",
                vector.len(),
                self.config.vector_size
            )));
        }
        Ok(())
    }
}

fn vector_size(info: &Value) -> Option<usize> {
    info.pointer("/result/config/params/vectors/size")
        .and_then(Value::as_u64)
        .map(|size| size as usize)
}

/// An existing collection must have been created with the embedding dimension.
fn check_collection(collection: &str, info: &Value, expected: usize) -> Result<(), SearchError> {
    let existing = vector_size(info).ok_or_else(|| SearchError::BackendResponse {
        backend: BACKEND.to_string(),
        details: "collection info has no vector size".to_string(),
    })?;
    if existing != expected {
        return Err(SearchError::Configuration(format!(
            "collection {collection} has dimension {existing}, embedding model produces {expected}"
        )));
    }
    Ok(())
}

fn hit_to_record(hit: &Value) -> ScoredRecord {
    let mut metadata: Metadata = hit
        .pointer("/payload")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let id = match metadata.remove(RECORD_ID_FIELD) {
        Some(Value::String(id)) => id,
        _ => match hit.pointer("/id") {
            Some(Value::String(id)) => id.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        },
    };
    let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);

    ScoredRecord {
        id,
        score,
        metadata,
    }
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn upsert(&self, records: &[IndexRecord]) -> Result<Vec<String>, SearchError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let points = records
            .iter()
            .map(|record| {
                self.check_dimension(&record.vector)?;
                let mut payload = record.metadata.clone();
                payload.insert(RECORD_ID_FIELD.to_string(), Value::from(record.id.clone()));
                Ok(json!({
                    "id": point_id(&record.id).to_string(),
                    "vector": record.vector,
                    "payload": payload,
                }))
            })
            .collect::<Result<Vec<_>, SearchError>>()?;

        let body = json!({ "points": points });
        self.send(|| {
            self.client
                .put(self.collection_url("/points?wait=true"))
                .json(&body)
        })
        .await?;

        Ok(records.iter().map(|record| record.id.clone()).collect())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredRecord>, SearchError> {
        self.check_dimension(vector)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let mut body = json!({
            "vector": vector,
            "limit": top_k,
            "with_payload": true,
        });
        if let Some(filter) = filter {
            body["filter"] = filter_clause(filter);
        }

        let parsed = self
            .send(|| {
                self.client
                    .post(self.collection_url("/points/search"))
                    .json(&body)
            })
            .await?;

        let mut hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .map(|hits| hits.iter().map(hit_to_record).collect::<Vec<_>>())
            .unwrap_or_default();
        hits.sort_by(|left, right| right.score.total_cmp(&left.score));
        Ok(hits)
    }

    async fn delete(&self, id: &str) -> Result<bool, SearchError> {
        let point = point_id(id).to_string();
        let existing = self
            .send(|| {
                self.client
                    .post(self.collection_url("/points"))
                    .json(&json!({ "ids": [point], "with_payload": false }))
            })
            .await?;
        let found = existing
            .pointer("/result")
            .and_then(Value::as_array)
            .is_some_and(|points| !points.is_empty());
        if !found {
            return Ok(false);
        }

        self.send(|| {
            self.client
                .post(self.collection_url("/points/delete?wait=true"))
                .json(&json!({ "points": [point] }))
        })
        .await?;
        Ok(true)
    }

    async fn stats(&self) -> Result<IndexStats, SearchError> {
        let info = self
            .collection_info()
            .await?
            .ok_or_else(|| SearchError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("collection {} not found", self.config.collection),
            })?;

        Ok(IndexStats {
            count: info
                .pointer("/result/points_count")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            dimension: vector_size(&info).unwrap_or(self.config.vector_size),
        })
    }
}

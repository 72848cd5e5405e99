use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::skip_serializing_none;

/// Metadata stored next to every vector. Field names are part of the index contract.
pub type Metadata = Map<String, Value>;

pub const FIELD_MANUFACTURER: &str = "manufacturer";
pub const FIELD_PRODUCT_NAME: &str = "productName";
pub const FIELD_CHUNK_ID: &str = "chunk_id";
pub const FIELD_CHUNK_INDEX: &str = "chunkIndex";
pub const FIELD_TEXT: &str = "text";
pub const FIELD_TITLE: &str = "title";
pub const FIELD_DESCRIPTION: &str = "description";
pub const FIELD_APPLIANCE: &str = "appliance";
pub const FIELD_INGREDIENTS: &str = "ingredients";
pub const FIELD_INSTRUCTIONS: &str = "instructions";
pub const FIELD_CUISINE_TYPE: &str = "cuisine_type";
pub const FIELD_DIFFICULTY_LEVEL: &str = "difficulty_level";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentFingerprint {
    pub document_key: String,
    pub manufacturer: String,
    pub product_name: String,
    pub source_file: String,
    pub checksum: String,
    pub ingested_at: DateTime<Utc>,
}

/// `md5("{manufacturer}_{product_name}")` as lowercase hex.
///
/// Re-ingesting the same manufacturer and product always lands on the same key,
/// so chunk ids overwrite instead of duplicating.
pub fn document_key(manufacturer: &str, product_name: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(format!("{manufacturer}_{product_name}").as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn chunk_id(document_key: &str, sequence: usize) -> String {
    format!("{document_key}_{sequence}")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub document_key: String,
    pub sequence: usize,
    pub text: String,
}

impl Chunk {
    pub fn id(&self) -> String {
        chunk_id(&self.document_key, self.sequence)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredRecord {
    pub id: String,
    pub score: f64,
    pub metadata: Metadata,
}

impl ScoredRecord {
    pub fn field(&self, name: &str) -> Option<String> {
        metadata_string(&self.metadata, name)
    }
}

/// Reads a metadata field as text; numbers are rendered, arrays joined by newlines.
pub fn metadata_string(metadata: &Metadata, name: &str) -> Option<String> {
    match metadata.get(name)? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Array(items) => Some(
            items
                .iter()
                .map(|item| match item {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        Value::Null | Value::Object(_) => None,
    }
}

/// Equality predicate over a single metadata field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MetadataFilter {
    pub field: String,
    pub value: String,
}

impl MetadataFilter {
    pub fn appliance(value: impl Into<String>) -> Self {
        Self {
            field: FIELD_APPLIANCE.to_string(),
            value: value.into(),
        }
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        metadata_string(metadata, &self.field).is_some_and(|value| value == self.value)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexStats {
    pub count: u64,
    pub dimension: usize,
}

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub manufacturer: String,
    pub product_name: String,
    pub appliance: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub status: String,
    pub chunk_count: usize,
    pub document_key: String,
    pub checksum: String,
    pub chunk_ids: Vec<String>,
    pub ocr_pages: Vec<u32>,
    pub titles: Vec<String>,
}

/// Structured recipe indexed directly, outside of PDF ingestion.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RecipeRecord {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub appliance: String,
    #[serde(default)]
    pub ingredients: String,
    #[serde(default)]
    pub instructions: String,
    pub cuisine_type: Option<String>,
    pub difficulty_level: Option<String>,
    #[serde(flatten)]
    pub extra: Metadata,
}

impl RecipeRecord {
    pub fn embedding_text(&self) -> String {
        format!("{} {} {}", self.title, self.description, self.ingredients)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchIndexReport {
    pub total: usize,
    pub indexed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SearchRequest {
    pub query: String,
    pub appliance: Option<String>,
    pub limit: usize,
}

impl SearchRequest {
    pub const DEFAULT_LIMIT: usize = 10;

    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            appliance: None,
            limit: Self::DEFAULT_LIMIT,
        }
    }

    pub fn with_appliance(mut self, appliance: impl Into<String>) -> Self {
        self.appliance = Some(appliance.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecipeHit {
    pub recipe_id: String,
    pub title: String,
    pub description: String,
    pub appliance: String,
    pub ingredients: String,
    pub instructions: String,
    pub cuisine_type: Option<String>,
    pub difficulty_level: Option<String>,
    pub relevance_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResponse {
    pub total_count: usize,
    pub recipes: Vec<RecipeHit>,
    pub query: String,
    pub timestamp: String,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_max_chars: usize,
    pub chunk_overlap_chars: usize,
    pub upsert_batch_size: usize,
    pub description_chars: usize,
}

/// Records per vector-index write.
pub const DEFAULT_UPSERT_BATCH_SIZE: usize = 64;
/// Characters of chunk text shown as a hit's description when none is stored.
pub const DEFAULT_DESCRIPTION_CHARS: usize = 120;

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_max_chars: crate::chunking::DEFAULT_CHUNK_MAX_CHARS,
            chunk_overlap_chars: crate::chunking::DEFAULT_CHUNK_OVERLAP_CHARS,
            upsert_batch_size: DEFAULT_UPSERT_BATCH_SIZE,
            description_chars: DEFAULT_DESCRIPTION_CHARS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn document_key_is_md5_of_manufacturer_and_product() {
        assert_eq!(
            document_key("Acme", "Oven1"),
            format!("{:x}", Md5::digest(b"Acme_Oven1"))
        );
        assert_eq!(document_key("Acme", "Oven1").len(), 32);
        assert_ne!(document_key("Acme", "Oven1"), document_key("Acme", "Oven2"));
    }

    #[test]
    fn chunk_ids_are_key_and_sequence() {
        let chunk = Chunk {
            document_key: "abc".to_string(),
            sequence: 7,
            text: String::new(),
        };
        assert_eq!(chunk.id(), "abc_7");
    }

    #[test]
    fn filter_matches_only_equal_field() {
        let filter = MetadataFilter::appliance("오븐");
        let mut metadata = Metadata::new();
        assert!(!filter.matches(&metadata));
        metadata.insert(FIELD_APPLIANCE.to_string(), json!("에어프라이어"));
        assert!(!filter.matches(&metadata));
        metadata.insert(FIELD_APPLIANCE.to_string(), json!("오븐"));
        assert!(filter.matches(&metadata));
    }

    #[test]
    fn recipe_record_keeps_unknown_fields() {
        let record: RecipeRecord = serde_json::from_value(json!({
            "id": "r1",
            "title": "김치찌개",
            "appliance": "오븐",
            "category": "찌개"
        }))
        .expect("recipe json should parse");

        assert_eq!(record.title, "김치찌개");
        assert_eq!(record.cuisine_type, None);
        assert_eq!(record.extra.get("category"), Some(&json!("찌개")));
    }
}

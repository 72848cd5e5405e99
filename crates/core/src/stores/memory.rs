use crate::error::SearchError;
use crate::models::{IndexRecord, IndexStats, MetadataFilter, ScoredRecord};
use crate::traits::VectorIndex;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Brute-force cosine index held in process memory.
#[derive(Debug)]
pub struct InMemoryVectorIndex {
    dimension: usize,
    records: RwLock<BTreeMap<String, IndexRecord>>,
}

impl InMemoryVectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            records: RwLock::new(BTreeMap::new()),
        }
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), SearchError> {
        if vector.len() != self.dimension {
            return Err(SearchError::Configuration(format!(
                "vector dimension {} != index dimension {}",
                vector.len(),
                self.dimension
            )));
        }
        Ok(())
    }
}

fn poisoned() -> SearchError {
    SearchError::BackendResponse {
        backend: "memory".to_string(),
        details: "index lock poisoned".to_string(),
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    let mut dot = 0f64;
    let mut left_norm = 0f64;
    let mut right_norm = 0f64;
    for (a, b) in left.iter().zip(right) {
        dot += *a as f64 * *b as f64;
        left_norm += *a as f64 * *a as f64;
        right_norm += *b as f64 * *b as f64;
    }
    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm.sqrt() * right_norm.sqrt())
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, records: &[IndexRecord]) -> Result<Vec<String>, SearchError> {
        for record in records {
            self.check_dimension(&record.vector)?;
        }
        let mut stored = self.records.write().map_err(|_| poisoned())?;
        Ok(records
            .iter()
            .map(|record| {
                stored.insert(record.id.clone(), record.clone());
                record.id.clone()
            })
            .collect())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredRecord>, SearchError> {
        self.check_dimension(vector)?;
        let stored = self.records.read().map_err(|_| poisoned())?;

        let mut hits = stored
            .values()
            .filter(|record| filter.map_or(true, |filter| filter.matches(&record.metadata)))
            .map(|record| ScoredRecord {
                id: record.id.clone(),
                score: cosine_similarity(vector, &record.vector),
                metadata: record.metadata.clone(),
            })
            .collect::<Vec<_>>();
        // ids break ties so equal scores come back in a stable order
        hits.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then_with(|| left.id.cmp(&right.id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete(&self, id: &str) -> Result<bool, SearchError> {
        let mut stored = self.records.write().map_err(|_| poisoned())?;
        Ok(stored.remove(id).is_some())
    }

    async fn stats(&self) -> Result<IndexStats, SearchError> {
        let stored = self.records.read().map_err(|_| poisoned())?;
        Ok(IndexStats {
            count: stored.len() as u64,
            dimension: self.dimension,
        })
    }
}

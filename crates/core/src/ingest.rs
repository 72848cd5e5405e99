use crate::chunking::{build_chunks, ChunkingConfig};
use crate::embeddings::EmbeddingGateway;
use crate::error::IngestError;
use crate::extractor::{ExtractedPage, PageSource, TextExtractor};
use crate::layout::PageLayout;
use crate::models::{
    document_key, BatchIndexReport, Chunk, DocumentFingerprint, IndexRecord, IngestReport,
    IngestRequest, IngestionOptions, Metadata, RecipeRecord, FIELD_APPLIANCE, FIELD_CHUNK_ID,
    FIELD_CHUNK_INDEX, FIELD_MANUFACTURER, FIELD_PRODUCT_NAME, FIELD_TEXT, FIELD_TITLE,
};
use crate::titles::{candidate_texts, LayoutTitleDetector, TitleCandidate};
use crate::traits::{TitleFilter, VectorIndex};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const STATUS_SUCCESS: &str = "success";

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Extracted pages plus ranked title candidates for one PDF.
#[derive(Debug, Clone)]
pub struct DocumentAnalysis {
    pub pages: Vec<ExtractedPage>,
    /// Vector-layout candidates first, then OCR candidates page by page.
    pub candidates: Vec<TitleCandidate>,
}

impl DocumentAnalysis {
    pub fn ocr_pages(&self) -> Vec<u32> {
        self.pages
            .iter()
            .filter(|page| page.used_ocr())
            .map(|page| page.number)
            .collect()
    }
}

/// Runs extraction and both title strategies. Blocking: rasterization and OCR
/// shell out.
pub fn analyze_document(
    extractor: &TextExtractor,
    detector: &LayoutTitleDetector,
    pdf: &[u8],
) -> Result<DocumentAnalysis, IngestError> {
    let pages = extractor.extract_all(pdf)?;

    let layouts = pages
        .iter()
        .filter_map(|page| match &page.source {
            PageSource::TextLayer(layout) => Some(layout.clone()),
            _ => None,
        })
        .collect::<Vec<PageLayout>>();
    let mut candidates = detector.detect_from_layout(&layouts);

    for page in &pages {
        if let PageSource::Ocr(capture) = &page.source {
            candidates.extend(detector.detect_from_ocr(
                page.number,
                &capture.words,
                Some(&capture.image),
            ));
        }
    }

    Ok(DocumentAnalysis { pages, candidates })
}

#[derive(Debug, Clone, Serialize)]
pub struct TitleReport {
    pub candidates: Vec<TitleCandidate>,
    /// Present when a food-name filter is configured.
    pub food_names: Option<Vec<String>>,
    pub ocr_pages: Vec<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FolderIngestReport {
    pub documents: Vec<(PathBuf, IngestReport)>,
    pub skipped_files: Vec<SkippedPdf>,
}

/// PDF bytes to upserted chunk records, one document per call.
#[derive(Clone)]
pub struct IngestionPipeline {
    extractor: TextExtractor,
    detector: LayoutTitleDetector,
    title_filter: Option<Arc<dyn TitleFilter>>,
    embeddings: EmbeddingGateway,
    index: Arc<dyn VectorIndex>,
    options: IngestionOptions,
}

impl IngestionPipeline {
    pub fn new(
        extractor: TextExtractor,
        embeddings: EmbeddingGateway,
        index: Arc<dyn VectorIndex>,
        options: IngestionOptions,
    ) -> Self {
        Self {
            extractor,
            detector: LayoutTitleDetector::default(),
            title_filter: None,
            embeddings,
            index,
            options,
        }
    }

    pub fn with_title_detector(mut self, detector: LayoutTitleDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_title_filter(mut self, filter: Arc<dyn TitleFilter>) -> Self {
        self.title_filter = Some(filter);
        self
    }

    async fn analyze(&self, bytes: Vec<u8>) -> Result<DocumentAnalysis, IngestError> {
        let extractor = self.extractor.clone();
        let detector = self.detector.clone();
        tokio::task::spawn_blocking(move || analyze_document(&extractor, &detector, &bytes))
            .await
            .map_err(|error| IngestError::Worker(error.to_string()))?
    }

    /// Applies the food-name filter when configured. A failing filter is not
    /// fatal: the unfiltered candidates are used instead.
    async fn rank_titles(&self, candidates: &[TitleCandidate]) -> (Vec<String>, Option<Vec<String>>) {
        let texts = candidate_texts(candidates);
        let Some(filter) = &self.title_filter else {
            return (texts, None);
        };

        match filter.filter_food_names(&texts).await {
            Ok(names) => {
                // keep candidate rank order for names the model echoed back
                let ranked = texts
                    .iter()
                    .filter(|text| names.contains(text))
                    .cloned()
                    .collect::<Vec<_>>();
                (ranked, Some(names))
            }
            Err(error) => {
                warn!(%error, "title filter failed, keeping unfiltered candidates");
                (texts, None)
            }
        }
    }

    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestReport, IngestError> {
        let manufacturer = request.manufacturer.trim().to_string();
        let product_name = request.product_name.trim().to_string();
        if manufacturer.is_empty() || product_name.is_empty() {
            return Err(IngestError::InvalidArgument(
                "manufacturer and product name are required".to_string(),
            ));
        }

        let fingerprint = DocumentFingerprint {
            document_key: document_key(&manufacturer, &product_name),
            manufacturer,
            product_name,
            source_file: request.file_name.clone(),
            checksum: digest_bytes(&request.bytes),
            ingested_at: Utc::now(),
        };
        info!(
            document_key = %fingerprint.document_key,
            file = %fingerprint.source_file,
            checksum = %fingerprint.checksum,
            bytes = request.bytes.len(),
            "ingesting document"
        );

        let analysis = self.analyze(request.bytes).await?;
        let ocr_pages = analysis.ocr_pages();
        let (titles, _) = self.rank_titles(&analysis.candidates).await;

        let page_texts = analysis
            .pages
            .iter()
            .map(|page| page.text.as_str())
            .collect::<Vec<_>>();
        let chunks = build_chunks(
            &fingerprint.document_key,
            &page_texts,
            ChunkingConfig::from(&self.options),
        )?;
        if chunks.is_empty() {
            warn!(document_key = %fingerprint.document_key, "document produced no text");
        }

        let texts = chunks
            .iter()
            .map(|chunk| chunk.text.clone())
            .collect::<Vec<_>>();
        let vectors = self.embeddings.embed_batch(&texts).await?;

        let records = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexRecord {
                id: chunk.id(),
                vector,
                metadata: chunk_metadata(
                    &fingerprint,
                    chunk,
                    &titles,
                    request.appliance.as_deref(),
                ),
            })
            .collect::<Vec<_>>();

        let mut chunk_ids = Vec::with_capacity(records.len());
        for batch in records.chunks(self.options.upsert_batch_size.max(1)) {
            chunk_ids.extend(self.index.upsert(batch).await?);
            debug!(document_key = %fingerprint.document_key, written = chunk_ids.len(), "upserted batch");
        }

        info!(
            document_key = %fingerprint.document_key,
            pages = analysis.pages.len(),
            ocr_pages = ocr_pages.len(),
            chunks = chunk_ids.len(),
            "document indexed"
        );

        Ok(IngestReport {
            status: STATUS_SUCCESS.to_string(),
            chunk_count: chunk_ids.len(),
            document_key: fingerprint.document_key,
            checksum: fingerprint.checksum,
            chunk_ids,
            ocr_pages,
            titles,
        })
    }

    /// Ranked title candidates for a PDF without indexing anything.
    pub async fn detect_titles(&self, bytes: Vec<u8>) -> Result<TitleReport, IngestError> {
        let analysis = self.analyze(bytes).await?;
        let (_, food_names) = self.rank_titles(&analysis.candidates).await;
        Ok(TitleReport {
            ocr_pages: analysis.ocr_pages(),
            candidates: analysis.candidates,
            food_names,
        })
    }

    /// Ingests every PDF under `folder`, product name taken from the file stem.
    /// Per-file failures are collected instead of aborting the batch.
    pub async fn ingest_folder(
        &self,
        folder: &Path,
        manufacturer: &str,
        appliance: Option<&str>,
    ) -> Result<FolderIngestReport, IngestError> {
        let files = discover_pdf_files(folder);
        if files.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no pdf files found in {}",
                folder.display()
            )));
        }

        let mut documents = Vec::new();
        let mut skipped_files = Vec::new();

        for path in files {
            let result: Result<IngestReport, IngestError> = async {
                let product_name = path
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .ok_or_else(|| {
                        IngestError::InvalidArgument(format!(
                            "path has no usable file stem: {}",
                            path.display()
                        ))
                    })?
                    .to_string();
                let file_name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_default();
                let bytes = tokio::fs::read(&path).await?;

                self.ingest(IngestRequest {
                    bytes,
                    file_name,
                    manufacturer: manufacturer.to_string(),
                    product_name,
                    appliance: appliance.map(str::to_string),
                })
                .await
            }
            .await;

            match result {
                Ok(report) => documents.push((path, report)),
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping pdf");
                    skipped_files.push(SkippedPdf {
                        path,
                        reason: error.to_string(),
                    });
                }
            }
        }

        Ok(FolderIngestReport {
            documents,
            skipped_files,
        })
    }

    /// Embeds `title description ingredients` and stores every recipe field as metadata.
    pub async fn index_recipe(&self, recipe: &RecipeRecord) -> Result<String, IngestError> {
        if recipe.id.trim().is_empty() {
            return Err(IngestError::InvalidArgument(
                "recipe id must not be empty".to_string(),
            ));
        }

        let vector = self.embeddings.embed(&recipe.embedding_text()).await?;
        let metadata = match serde_json::to_value(recipe) {
            Ok(Value::Object(mut fields)) => {
                fields.remove("id");
                fields
            }
            Ok(_) => Metadata::new(),
            Err(error) => {
                return Err(IngestError::InvalidArgument(format!(
                    "recipe {} is not serializable: {error}",
                    recipe.id
                )))
            }
        };

        let mut ids = self
            .index
            .upsert(&[IndexRecord {
                id: recipe.id.clone(),
                vector,
                metadata,
            }])
            .await?;
        Ok(ids.pop().unwrap_or_else(|| recipe.id.clone()))
    }

    pub async fn index_recipes(&self, recipes: &[RecipeRecord]) -> BatchIndexReport {
        let mut indexed = 0;
        for recipe in recipes {
            match self.index_recipe(recipe).await {
                Ok(_) => indexed += 1,
                Err(error) => warn!(recipe_id = %recipe.id, %error, "failed to index recipe"),
            }
        }

        BatchIndexReport {
            total: recipes.len(),
            indexed,
            failed: recipes.len() - indexed,
        }
    }
}

/// Best-ranked title that appears in the chunk, else "{manufacturer} {product}".
pub fn chunk_title(titles: &[String], chunk_text: &str, fingerprint: &DocumentFingerprint) -> String {
    titles
        .iter()
        .find(|title| chunk_text.contains(title.as_str()))
        .cloned()
        .unwrap_or_else(|| format!("{} {}", fingerprint.manufacturer, fingerprint.product_name))
}

fn chunk_metadata(
    fingerprint: &DocumentFingerprint,
    chunk: &Chunk,
    titles: &[String],
    appliance: Option<&str>,
) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(
        FIELD_MANUFACTURER.to_string(),
        Value::from(fingerprint.manufacturer.clone()),
    );
    metadata.insert(
        FIELD_PRODUCT_NAME.to_string(),
        Value::from(fingerprint.product_name.clone()),
    );
    metadata.insert(FIELD_CHUNK_ID.to_string(), Value::from(chunk.id()));
    metadata.insert(FIELD_CHUNK_INDEX.to_string(), Value::from(chunk.sequence));
    metadata.insert(FIELD_TEXT.to_string(), Value::from(chunk.text.clone()));
    metadata.insert(
        FIELD_TITLE.to_string(),
        Value::from(chunk_title(titles, &chunk.text, fingerprint)),
    );
    if let Some(appliance) = appliance.filter(|value| !value.trim().is_empty()) {
        metadata.insert(FIELD_APPLIANCE.to_string(), Value::from(appliance));
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::testing::RecordingEmbedder;
    use crate::embeddings::DOCUMENT_PREFIX;
    use crate::error::SearchError;
    use crate::extractor::testing::{FakeOcr, FakeRasterizer};
    use crate::extractor::ExtractionPolicy;
    use crate::layout::fixtures::{build_pdf, FixturePage, Show};
    use crate::models::MetadataFilter;
    use crate::stores::InMemoryVectorIndex;
    use async_trait::async_trait;
    use std::fs;
    use tempfile::tempdir;

    struct Harness {
        pipeline: IngestionPipeline,
        index: Arc<InMemoryVectorIndex>,
        ocr: Arc<FakeOcr>,
        embedder: Arc<RecordingEmbedder>,
    }

    fn harness(ocr_text: &str) -> Harness {
        let ocr = Arc::new(FakeOcr::returning(ocr_text));
        let extractor = TextExtractor::new(
            Arc::new(FakeRasterizer::default()),
            ocr.clone(),
            ExtractionPolicy::default(),
        );
        let embedder = Arc::new(RecordingEmbedder::with_dimensions(32));
        let index = Arc::new(InMemoryVectorIndex::new(32));
        let pipeline = IngestionPipeline::new(
            extractor,
            EmbeddingGateway::new(embedder.clone(), 32),
            index.clone(),
            IngestionOptions::default(),
        );
        Harness {
            pipeline,
            index,
            ocr,
            embedder,
        }
    }

    fn two_page_manual() -> Vec<u8> {
        build_pdf(vec![
            FixturePage::Text(vec![
                vec![Show::new("F1", 24.0, 72.0, 760.0, "김치찌개")],
                vec![
                    Show::new("F1", 11.0, 72.0, 700.0, "묵은지와 돼지고기를 냄비에 넣는다"),
                    Show::new("F1", 11.0, 72.0, 686.0, "오븐 대신 가스레인지를 사용한다"),
                ],
            ]),
            FixturePage::ImageOnly,
        ])
    }

    fn request(bytes: Vec<u8>) -> IngestRequest {
        IngestRequest {
            bytes,
            file_name: "oven1.pdf".to_string(),
            manufacturer: "Acme".to_string(),
            product_name: "Oven1".to_string(),
            appliance: Some("오븐".to_string()),
        }
    }

    #[tokio::test]
    async fn mixed_manual_uses_ocr_once_and_keys_chunks_by_document() {
        let harness = harness("스캔한 쪽: 오븐을 200도로 예열한다");

        let report = harness
            .pipeline
            .ingest(request(two_page_manual()))
            .await
            .expect("ingest");

        let key = document_key("Acme", "Oven1");
        assert_eq!(report.status, STATUS_SUCCESS);
        assert_eq!(harness.ocr.calls(), 1);
        assert_eq!(report.ocr_pages, vec![2]);
        assert!(report.chunk_count >= 1);
        assert!(report
            .chunk_ids
            .iter()
            .all(|id| id.starts_with(&format!("{key}_"))));
        assert_eq!(report.chunk_ids[0], format!("{key}_0"));
        assert_eq!(report.titles.first().map(String::as_str), Some("김치찌개"));

        let stats = harness.index.stats().await.expect("stats");
        assert_eq!(stats.count as usize, report.chunk_count);
        assert!(harness
            .embedder
            .inputs()
            .iter()
            .all(|input| input.starts_with(DOCUMENT_PREFIX)));
    }

    #[tokio::test]
    async fn chunk_records_carry_document_and_recipe_fields() {
        let harness = harness("스캔한 쪽");
        harness
            .pipeline
            .ingest(request(two_page_manual()))
            .await
            .expect("ingest");

        let hits = harness
            .index
            .query(&vec![1.0; 32], 10, Some(&MetadataFilter::appliance("오븐")))
            .await
            .expect("query");
        let first = &hits[0];
        assert_eq!(first.field(FIELD_MANUFACTURER).as_deref(), Some("Acme"));
        assert_eq!(first.field(FIELD_PRODUCT_NAME).as_deref(), Some("Oven1"));
        assert_eq!(first.field(FIELD_CHUNK_ID).as_deref(), Some(first.id.as_str()));
        assert_eq!(first.field(FIELD_TITLE).as_deref(), Some("김치찌개"));
        assert!(first
            .field(FIELD_TEXT)
            .is_some_and(|text| text.contains("묵은지와 돼지고기") && text.contains("스캔한 쪽")));
    }

    #[tokio::test]
    async fn reingesting_the_same_document_overwrites() {
        let harness = harness("스캔한 쪽");
        let first = harness
            .pipeline
            .ingest(request(two_page_manual()))
            .await
            .expect("first ingest");
        let second = harness
            .pipeline
            .ingest(request(two_page_manual()))
            .await
            .expect("second ingest");

        assert_eq!(first.chunk_ids, second.chunk_ids);
        assert_eq!(first.checksum, second.checksum);
        let stats = harness.index.stats().await.expect("stats");
        assert_eq!(stats.count as usize, first.chunk_count);
    }

    #[tokio::test]
    async fn missing_identity_is_rejected() {
        let harness = harness("unused");
        let mut bad = request(two_page_manual());
        bad.product_name = "  ".to_string();
        assert!(matches!(
            harness.pipeline.ingest(bad).await,
            Err(IngestError::InvalidArgument(_))
        ));
    }

    struct KeepOnly(&'static str);

    #[async_trait]
    impl TitleFilter for KeepOnly {
        async fn filter_food_names(
            &self,
            candidates: &[String],
        ) -> Result<Vec<String>, SearchError> {
            Ok(candidates
                .iter()
                .filter(|candidate| candidate.as_str() == self.0)
                .cloned()
                .collect())
        }
    }

    #[tokio::test]
    async fn title_filter_narrows_candidates() {
        let harness = harness("unused");
        let pdf = build_pdf(vec![FixturePage::Text(vec![
            vec![Show::new("F1", 26.0, 72.0, 760.0, "사용 설명서")],
            vec![Show::new("F2", 12.0, 72.0, 700.0, "단호박찜")],
            vec![Show::new("F1", 10.0, 72.0, 600.0, "단호박을 반으로 자른다")],
        ])]);
        let pipeline = harness
            .pipeline
            .with_title_filter(Arc::new(KeepOnly("단호박찜")));

        let report = pipeline.detect_titles(pdf).await.expect("titles");
        let texts = candidate_texts(&report.candidates);
        assert_eq!(texts, vec!["사용 설명서".to_string(), "단호박찜".to_string()]);
        assert_eq!(report.food_names, Some(vec!["단호박찜".to_string()]));
        assert!(report.ocr_pages.is_empty());
    }

    #[tokio::test]
    async fn recipes_are_indexed_with_their_fields() {
        let harness = harness("unused");
        let recipes = vec![
            RecipeRecord {
                id: "r-1".to_string(),
                title: "감자 그라탕".to_string(),
                description: "오븐 요리".to_string(),
                appliance: "오븐".to_string(),
                ingredients: "감자, 치즈".to_string(),
                instructions: "200도에서 20분".to_string(),
                cuisine_type: Some("양식".to_string()),
                ..Default::default()
            },
            RecipeRecord::default(),
        ];

        let report = harness.pipeline.index_recipes(&recipes).await;
        assert_eq!(
            report,
            BatchIndexReport {
                total: 2,
                indexed: 1,
                failed: 1
            }
        );
        assert_eq!(
            harness.embedder.inputs(),
            vec![format!("{DOCUMENT_PREFIX}감자 그라탕 오븐 요리 감자, 치즈")]
        );

        let hits = harness
            .index
            .query(&vec![1.0; 32], 1, None)
            .await
            .expect("query");
        assert_eq!(hits[0].id, "r-1");
        assert_eq!(hits[0].field("cuisine_type").as_deref(), Some("양식"));
        assert!(hits[0].field("difficulty_level").is_none());
    }

    #[tokio::test]
    async fn folder_ingestion_uses_file_stems_and_collects_failures() {
        let dir = tempdir().expect("tempdir");
        let nested = dir.path().join("nested");
        fs::create_dir(&nested).expect("mkdir");
        fs::write(dir.path().join("Oven1.pdf"), two_page_manual()).expect("write");
        fs::write(nested.join("broken.PDF"), b"%PDF-1.4\n%broken").expect("write");
        fs::write(dir.path().join("notes.txt"), b"ignored").expect("write");

        let harness = harness("스캔한 쪽");
        let report = harness
            .pipeline
            .ingest_folder(dir.path(), "Acme", None)
            .await
            .expect("folder");

        assert_eq!(report.documents.len(), 1);
        assert_eq!(
            report.documents[0].1.document_key,
            document_key("Acme", "Oven1")
        );
        assert_eq!(report.skipped_files.len(), 1);
        assert!(report.skipped_files[0].path.ends_with("broken.PDF"));
    }

    #[tokio::test]
    async fn empty_folder_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let harness = harness("unused");
        assert!(harness
            .pipeline
            .ingest_folder(dir.path(), "Acme", None)
            .await
            .is_err());
    }

    #[test]
    fn checksum_is_reproducible() {
        assert_eq!(digest_bytes(b"abc"), digest_bytes(b"abc"));
        assert_ne!(digest_bytes(b"abc"), digest_bytes(b"abd"));
    }
}

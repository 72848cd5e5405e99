use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use recipe_rag_core::{
    AppContext, CacheSettings, ContextConfig, EmbeddingBackend, IndexBackend, IngestRequest,
    LlmSettings, OcrBackend, ProviderSettings, RecipeRecord, SearchRequest,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "recipe-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Vector index backend
    #[arg(long, value_enum, default_value_t = IndexKind::Qdrant)]
    index: IndexKind,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant collection
    #[arg(long, env = "QDRANT_COLLECTION", default_value = "recipes")]
    qdrant_collection: String,

    /// Qdrant API key
    #[arg(long, env = "QDRANT_API_KEY")]
    qdrant_api_key: Option<String>,

    /// OpenAI-compatible embeddings base URL; hashed n-grams are used when absent
    #[arg(long, env = "EMBEDDING_URL")]
    embedding_url: Option<String>,

    /// Embedding model name
    #[arg(long, env = "EMBEDDING_MODEL", default_value = "BAAI/bge-m3")]
    embedding_model: String,

    /// Embedding API key
    #[arg(long, env = "EMBEDDING_API_KEY")]
    embedding_api_key: Option<String>,

    /// Vector dimension produced by the embedding model
    #[arg(long, env = "EMBEDDING_DIMENSION", default_value_t = DEFAULT_EMBEDDING_DIMENSIONS)]
    embedding_dimension: usize,

    /// HTTP OCR endpoint; local tesseract is used when absent
    #[arg(long, env = "OCR_ENDPOINT")]
    ocr_endpoint: Option<String>,

    /// OCR endpoint API key
    #[arg(long, env = "OCR_API_KEY")]
    ocr_api_key: Option<String>,

    /// OpenAI-compatible chat base URL for the food-name title filter
    #[arg(long, env = "LLM_URL")]
    llm_url: Option<String>,

    /// Chat API key
    #[arg(long, env = "LLM_API_KEY")]
    llm_api_key: Option<String>,

    /// Chat model for the title filter
    #[arg(long, env = "LLM_MODEL", default_value = recipe_rag_core::filter::DEFAULT_LLM_MODEL)]
    llm_model: String,

    /// tesseract binary
    #[arg(long, env = "TESSERACT_BIN", default_value = "tesseract")]
    tesseract_bin: PathBuf,

    /// pdftoppm binary
    #[arg(long, env = "PDFTOPPM_BIN", default_value = "pdftoppm")]
    pdftoppm_bin: PathBuf,

    /// Timeout for every provider call, in seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Retries for transient provider failures
    #[arg(long, default_value_t = 3)]
    max_retries: usize,

    /// Search result cache TTL, in seconds
    #[arg(long, default_value_t = 3600)]
    cache_ttl_secs: u64,
}

#[derive(Clone, Copy, ValueEnum)]
enum IndexKind {
    Qdrant,
    /// Process-local; contents are lost on exit.
    Memory,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest one manual PDF.
    Ingest {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        manufacturer: String,
        #[arg(long)]
        product_name: String,
        /// Appliance tag stored on every chunk, e.g. 오븐.
        #[arg(long)]
        appliance: Option<String>,
    },
    /// Ingest every PDF under a folder; product name comes from each file stem.
    IngestFolder {
        #[arg(long)]
        folder: PathBuf,
        #[arg(long)]
        manufacturer: String,
        #[arg(long)]
        appliance: Option<String>,
    },
    /// Semantic recipe search.
    Search {
        #[arg(long)]
        query: String,
        #[arg(long)]
        appliance: Option<String>,
        #[arg(long, default_value_t = SearchRequest::DEFAULT_LIMIT)]
        limit: usize,
    },
    /// Print ranked title candidates of a PDF without indexing it.
    Titles {
        #[arg(long)]
        file: PathBuf,
    },
    /// Index structured recipes from a JSON file (one object or an array).
    IndexRecipes {
        #[arg(long)]
        file: PathBuf,
    },
    /// Delete one record by id.
    Delete {
        #[arg(long)]
        id: String,
    },
    /// Record count and vector dimension of the index.
    Stats,
}

impl Cli {
    fn context_config(&self) -> ContextConfig {
        let timeout = Duration::from_secs(self.timeout_secs);

        let embedding = match &self.embedding_url {
            Some(base_url) => EmbeddingBackend::Http {
                base_url: base_url.clone(),
                api_key: self.embedding_api_key.clone(),
                model: self.embedding_model.clone(),
                dimensions: self.embedding_dimension,
            },
            None => {
                warn!("EMBEDDING_URL not set, using hashed n-gram embeddings");
                EmbeddingBackend::Local {
                    dimensions: self.embedding_dimension,
                }
            }
        };

        let index = match self.index {
            IndexKind::Qdrant => IndexBackend::Qdrant {
                url: self.qdrant_url.clone(),
                collection: self.qdrant_collection.clone(),
                api_key: self.qdrant_api_key.clone(),
            },
            IndexKind::Memory => IndexBackend::Memory,
        };

        let ocr = match &self.ocr_endpoint {
            Some(endpoint) => OcrBackend::Remote {
                endpoint: endpoint.clone(),
                api_key: self.ocr_api_key.clone(),
                timeout,
            },
            None => OcrBackend::Tesseract {
                binary: self.tesseract_bin.clone(),
                timeout: Duration::from_secs(self.timeout_secs.max(120)),
            },
        };

        let llm = self.llm_url.as_ref().map(|base_url| LlmSettings {
            base_url: base_url.clone(),
            api_key: self.llm_api_key.clone(),
            model: self.llm_model.clone(),
        });

        ContextConfig {
            embedding,
            index,
            ocr,
            pdftoppm_binary: self.pdftoppm_bin.clone(),
            llm,
            provider: ProviderSettings {
                timeout,
                max_retries: self.max_retries,
                ..ProviderSettings::default()
            },
            cache: CacheSettings {
                ttl: Duration::from_secs(self.cache_ttl_secs),
                ..CacheSettings::default()
            },
            ..ContextConfig::default()
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn read_recipes(path: &Path) -> anyhow::Result<Vec<RecipeRecord>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    let recipes = match value {
        Value::Array(_) => serde_json::from_value(value)?,
        single => vec![serde_json::from_value(single)?],
    };
    Ok(recipes)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "recipe-rag boot"
    );

    let context = AppContext::initialize(cli.context_config())
        .await
        .context("failed to initialize providers")?;
    let result = run(&context, cli.command).await;
    context.shutdown().await;
    result
}

async fn run(context: &AppContext, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Ingest {
            file,
            manufacturer,
            product_name,
            appliance,
        } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let report = context
                .ingestion_pipeline()
                .ingest(IngestRequest {
                    bytes,
                    file_name: file_name(&file),
                    manufacturer,
                    product_name,
                    appliance,
                })
                .await?;
            print_json(&report)?;
        }
        Command::IngestFolder {
            folder,
            manufacturer,
            appliance,
        } => {
            let report = context
                .ingestion_pipeline()
                .ingest_folder(&folder, &manufacturer, appliance.as_deref())
                .await?;

            for skipped in &report.skipped_files {
                warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped pdf");
            }
            let chunks: usize = report
                .documents
                .iter()
                .map(|(_, document)| document.chunk_count)
                .sum();
            println!(
                "{} documents, {} chunks ingested, {} skipped at {}",
                report.documents.len(),
                chunks,
                report.skipped_files.len(),
                Utc::now().to_rfc3339()
            );
        }
        Command::Search {
            query,
            appliance,
            limit,
        } => {
            let mut request = SearchRequest::new(query).with_limit(limit);
            if let Some(appliance) = appliance {
                request = request.with_appliance(appliance);
            }
            let response = context.retrieval_pipeline().search(&request).await?;
            print_json(&response)?;
        }
        Command::Titles { file } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let report = context.ingestion_pipeline().detect_titles(bytes).await?;
            print_json(&report)?;
        }
        Command::IndexRecipes { file } => {
            let recipes = read_recipes(&file)?;
            let report = context.ingestion_pipeline().index_recipes(&recipes).await;
            print_json(&report)?;
        }
        Command::Delete { id } => {
            let deleted = context.index.delete(&id).await?;
            print_json(&serde_json::json!({ "id": id, "deleted": deleted }))?;
        }
        Command::Stats => {
            let stats = context.index.stats().await?;
            print_json(&stats)?;
        }
    }

    Ok(())
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ocr engine unavailable: {0}")]
    OcrUnavailable(String),

    #[error("ocr failed: {0}")]
    OcrFailed(String),

    #[error("page {page} rasterization failed: {details}")]
    Rasterize { page: u32, details: String },

    #[error("ingestion worker failed: {0}")]
    Worker(String),

    #[error(transparent)]
    Search(#[from] SearchError),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{backend} returned {status}: {body}")]
    Status {
        backend: String,
        status: u16,
        body: String,
    },

    #[error("search request failed: {0}")]
    Request(String),

    #[error("{backend} did not answer within {seconds}s")]
    Timeout { backend: String, seconds: u64 },

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl SearchError {
    /// Whether a bounded retry may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SearchError::Timeout { .. } => true,
            SearchError::Status { status, .. } => *status == 429 || *status >= 500,
            SearchError::Http(error) => {
                error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
            }
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("cache payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

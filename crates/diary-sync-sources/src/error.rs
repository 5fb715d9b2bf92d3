use diary_sync_config::StoreError;
use thiserror::Error;

/// The feed document could not be parsed
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed is not well-formed XML at byte {position}: {message}")]
    Malformed { position: u64, message: String },
    #[error("feed document has no root element")]
    Empty,
}

/// Fetching the feed over HTTP failed
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("feed request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("feed returned HTTP {0}")]
    Status(u16),
    #[error("feed body is empty")]
    Empty,
    #[error("feed body exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// A CSV or ZIP export could not be decoded
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to read export: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid ZIP archive: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("ZIP archive contains no CSV file")]
    NoCsvInArchive,
    #[error("export is empty")]
    Empty,
    #[error("missing required column '{column}'. Available columns: {available:?}")]
    MissingColumn { column: String, available: Vec<String> },
    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),
}

/// Errors from the movie-database client
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("TMDB API key is not configured")]
    MissingApiKey,
    #[error("TMDB rate limit still exceeded after {attempts} attempts")]
    RateLimitExceeded { attempts: u32 },
    #[error("TMDB returned HTTP {status}: {message}")]
    Provider { status: u16, message: String },
    #[error("TMDB request failed: {0}")]
    Transport(String),
    #[error("TMDB response could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    /// 404 from the provider: the id simply does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::Provider { status: 404, .. })
    }
}

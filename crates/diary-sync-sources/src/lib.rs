pub mod error;
pub mod letterboxd;
pub mod progress;
pub mod tmdb;

pub use error::{ApiError, CsvError, FeedError, FetchError};
pub use letterboxd::export::{decode_export, read_export, CsvDocument, CsvField, CsvRow};
pub use letterboxd::feed::{parse_feed, star_rating_from_numeric};
pub use letterboxd::fetch::{FeedFetcher, MAX_FEED_BYTES};
pub use progress::ProgressTracker;
pub use tmdb::client::{TmdbClient, TmdbClientConfig};
pub use tmdb::rate_limit::{Clock, RateLimiter, RateWindow, SystemClock};
pub use tmdb::transport::{HttpResponse, HttpTransport, ReqwestTransport};

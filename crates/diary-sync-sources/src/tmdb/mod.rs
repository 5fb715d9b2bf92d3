//! Movie-database (TMDB v3) client with a persisted fixed-window rate limiter.

pub mod api;
pub mod client;
pub mod rate_limit;
pub mod transport;

pub use api::{extract_metadata, SearchCandidate, POSTER_BASE_URL};

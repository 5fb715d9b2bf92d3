//! Film-diary service inputs: the RSS feed and the CSV/ZIP export.

pub mod export;
pub mod feed;
pub mod fetch;

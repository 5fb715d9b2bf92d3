use crate::error::FetchError;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

/// Feeds larger than this are rejected
pub const MAX_FEED_BYTES: usize = 10 * 1024 * 1024;

const USER_AGENT: &str = concat!("reelbook/", env!("CARGO_PKG_VERSION"));

/// Downloads the diary RSS feed
#[derive(Clone)]
pub struct FeedFetcher {
    client: Client,
    max_bytes: usize,
}

impl FeedFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            max_bytes: MAX_FEED_BYTES,
        })
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            max_bytes: MAX_FEED_BYTES,
        }
    }

    /// Fetch the raw feed bytes. Anything but a non-empty 200 body within the
    /// size limit is an error.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        info!("Fetching diary feed from {}", url);
        let mut response = self.client.get(url).send().await?;

        let status = response.status();
        if status.as_u16() != 200 {
            return Err(FetchError::Status(status.as_u16()));
        }

        if let Some(length) = response.content_length() {
            if length > self.max_bytes as u64 {
                return Err(FetchError::TooLarge { limit: self.max_bytes });
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(FetchError::TooLarge { limit: self.max_bytes });
            }
            body.extend_from_slice(&chunk);
        }

        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(FetchError::Empty);
        }

        debug!(bytes = body.len(), "Fetched diary feed");
        Ok(body)
    }
}

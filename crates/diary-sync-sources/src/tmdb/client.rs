use crate::error::ApiError;
use crate::tmdb::rate_limit::{Clock, RateLimiter};
use crate::tmdb::transport::HttpTransport;
use diary_sync_config::options::keys;
use diary_sync_config::{KvStore, TmdbConfig};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Query parameters never folded into cache keys
const SECRET_PARAMS: [&str; 2] = ["api_key", "session_id"];

const SEARCH_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct TmdbClientConfig {
    pub base_url: String,
    pub max_requests: u32,
    pub period: Duration,
    pub max_retries: u32,
    /// Movie details and external-id lookups
    pub details_ttl: Duration,
    pub search_ttl: Duration,
    pub providers_ttl: Duration,
}

impl From<&TmdbConfig> for TmdbClientConfig {
    fn from(config: &TmdbConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_requests: config.max_requests,
            period: Duration::from_secs(config.period_secs),
            max_retries: config.max_retries,
            details_ttl: Duration::from_secs(config.details_cache_days * 24 * 60 * 60),
            search_ttl: SEARCH_CACHE_TTL,
            providers_ttl: Duration::from_secs(config.providers_cache_hours * 60 * 60),
        }
    }
}

impl Default for TmdbClientConfig {
    fn default() -> Self {
        Self::from(&TmdbConfig::default())
    }
}

/// Rate-limited, caching client for the TMDB v3 REST API
#[derive(Clone)]
pub struct TmdbClient {
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn KvStore>,
    limiter: RateLimiter,
    config: TmdbClientConfig,
    api_key: Option<String>,
    session_id: Option<String>,
}

impl TmdbClient {
    pub fn new(
        config: TmdbClientConfig,
        api_key: Option<String>,
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let limiter = RateLimiter::new(store.clone(), clock, config.max_requests, config.period);
        Self {
            transport,
            store,
            limiter,
            config,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            session_id: None,
        }
    }

    /// Passed through on every request; never negotiated here
    pub fn with_session_id(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// GET `endpoint` (relative to the API base) and return the JSON body.
    ///
    /// Successful responses are cached by endpoint and sorted parameters.
    /// 429 responses are retried after `Retry-After` (at least one second)
    /// up to `max_retries` times.
    pub async fn request(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<Value, ApiError> {
        let api_key = self.api_key.as_deref().ok_or(ApiError::MissingApiKey)?;
        let endpoint = endpoint.trim_start_matches('/');

        let cache_key = cache_key(endpoint, params);
        if let Some(raw) = self.store.get(&cache_key)? {
            match serde_json::from_str::<Value>(&raw) {
                Ok(value) => {
                    debug!(endpoint = %endpoint, "TMDB cache hit");
                    return Ok(value);
                }
                Err(e) => warn!(endpoint = %endpoint, error = %e, "Ignoring undecodable cached response"),
            }
        }

        let url = self.build_url(endpoint, params, api_key);
        let mut retries = 0;
        loop {
            self.limiter.acquire().await?;
            let response = self.transport.get(&url).await?;

            match response.status {
                200 => {
                    let value: Value = serde_json::from_str(&response.body)?;
                    self.store
                        .set(&cache_key, response.body, Some(self.ttl_for(endpoint)))?;
                    return Ok(value);
                }
                429 => {
                    if retries >= self.config.max_retries {
                        return Err(ApiError::RateLimitExceeded { attempts: retries + 1 });
                    }
                    retries += 1;
                    let wait = response.retry_after.unwrap_or(1).max(1);
                    warn!(
                        endpoint = %endpoint,
                        retry = retries,
                        wait_secs = wait,
                        "TMDB rate limit hit, backing off"
                    );
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                }
                status => {
                    return Err(ApiError::Provider {
                        status,
                        message: provider_message(&response.body),
                    });
                }
            }
        }
    }

    fn build_url(&self, endpoint: &str, params: &[(&str, &str)], api_key: &str) -> String {
        let mut url = format!(
            "{}/{}?api_key={}",
            self.config.base_url,
            endpoint,
            urlencoding::encode(api_key)
        );
        if let Some(session_id) = &self.session_id {
            url.push_str("&session_id=");
            url.push_str(&urlencoding::encode(session_id));
        }
        for (name, value) in params.iter().filter(|(name, _)| !SECRET_PARAMS.contains(name)) {
            url.push('&');
            url.push_str(&urlencoding::encode(name));
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }
        url
    }

    fn ttl_for(&self, endpoint: &str) -> Duration {
        if endpoint.ends_with("/watch/providers") {
            self.config.providers_ttl
        } else if endpoint.starts_with("search/") {
            self.config.search_ttl
        } else {
            self.config.details_ttl
        }
    }
}

fn cache_key(endpoint: &str, params: &[(&str, &str)]) -> String {
    let mut pairs: Vec<(&str, &str)> = params
        .iter()
        .filter(|(name, _)| !SECRET_PARAMS.contains(name))
        .copied()
        .collect();
    pairs.sort();
    let query: Vec<String> = pairs.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("{}{}?{}", keys::TMDB_CACHE_PREFIX, endpoint, query.join("&"))
}

/// `status_message` from a TMDB error body, or the body itself
fn provider_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("status_message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(200).collect())
}

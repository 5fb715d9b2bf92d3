//! Stand-ins for the network, the media library and the feed used by the
//! pipeline tests.

use crate::import::FeedSource;
use crate::store::{ContentStore, MediaLibrary};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use diary_sync_config::{KvStore, MemoryKvStore};
use diary_sync_models::RecordId;
use diary_sync_sources::{ApiError, FetchError, HttpResponse, HttpTransport, SystemClock, TmdbClient, TmdbClientConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Answers each URL with the first route whose pattern it contains; 404 otherwise
#[derive(Default)]
pub(crate) struct RoutedTransport {
    routes: Vec<(String, HttpResponse)>,
    pub(crate) requests: Mutex<Vec<String>>,
}

impl RoutedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn route(mut self, pattern: &str, body: serde_json::Value) -> Self {
        self.routes.push((pattern.to_string(), HttpResponse::ok(body.to_string())));
        self
    }

    pub(crate) fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub(crate) fn requests_matching(&self, pattern: &str) -> usize {
        self.requests.lock().unwrap().iter().filter(|u| u.contains(pattern)).count()
    }
}

#[async_trait]
impl HttpTransport for RoutedTransport {
    async fn get(&self, url: &str) -> Result<HttpResponse, ApiError> {
        self.requests.lock().unwrap().push(url.to_string());
        Ok(self
            .routes
            .iter()
            .find(|(pattern, _)| url.contains(pattern.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or(HttpResponse {
                status: 404,
                retry_after: None,
                body: r#"{"status_code":34,"status_message":"The resource you requested could not be found."}"#
                    .to_string(),
            }))
    }
}

pub(crate) fn tmdb_client(transport: Arc<RoutedTransport>, api_key: Option<&str>) -> TmdbClient {
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
    TmdbClient::new(
        TmdbClientConfig::default(),
        api_key.map(str::to_string),
        transport,
        kv,
        Arc::new(SystemClock),
    )
}

/// Counts downloads and sets the cover directly on the store
pub(crate) struct RecordingMedia {
    store: Arc<dyn ContentStore>,
    fail: bool,
    downloads: AtomicUsize,
}

impl RecordingMedia {
    pub(crate) fn new(store: Arc<dyn ContentStore>) -> Self {
        Self {
            store,
            fail: false,
            downloads: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing(store: Arc<dyn ContentStore>) -> Self {
        Self {
            fail: true,
            ..Self::new(store)
        }
    }

    pub(crate) fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaLibrary for RecordingMedia {
    async fn download_and_attach(&self, url: &str, record_id: RecordId) -> Result<String> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(anyhow!("connection refused: {}", url));
        }
        Ok(format!("poster-{}", record_id))
    }

    async fn set_as_cover_image(&self, record_id: RecordId, attachment_id: &str) -> Result<bool> {
        self.store.set_cover_image(record_id, attachment_id)?;
        Ok(true)
    }
}

/// Serves a fixed document and counts fetches
pub(crate) struct StaticFeed {
    body: Mutex<Vec<u8>>,
    fetches: AtomicUsize,
}

impl StaticFeed {
    pub(crate) fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: Mutex::new(body.into()),
            fetches: AtomicUsize::new(0),
        }
    }

    pub(crate) fn replace(&self, body: impl Into<Vec<u8>>) {
        *self.body.lock().unwrap() = body.into();
    }

    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedSource for StaticFeed {
    async fn fetch(&self, _url: &str) -> Result<Vec<u8>, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let body = self.body.lock().unwrap().clone();
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(FetchError::Empty);
        }
        Ok(body)
    }
}

/// One diary `<item>`
pub(crate) struct FeedEntry<'a> {
    pub title: &'a str,
    pub link: &'a str,
    pub pub_date: &'a str,
    pub review: &'a str,
    pub film_year: &'a str,
    pub movie_id: Option<&'a str>,
}

pub(crate) fn feed_xml(entries: &[FeedEntry<'_>]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="utf-8"?>
<rss version="2.0" xmlns:letterboxd="https://letterboxd.com" xmlns:tmdb="https://themoviedb.org"><channel><title>Diary</title>"#,
    );
    for entry in entries {
        xml.push_str("<item>");
        xml.push_str(&format!("<title>{}</title>", entry.title));
        xml.push_str(&format!("<link>{}</link>", entry.link));
        xml.push_str(&format!("<pubDate>{}</pubDate>", entry.pub_date));
        xml.push_str(&format!("<description><![CDATA[{}]]></description>", entry.review));
        xml.push_str(&format!("<letterboxd:filmYear>{}</letterboxd:filmYear>", entry.film_year));
        if let Some(id) = entry.movie_id {
            xml.push_str(&format!("<tmdb:movieId>{}</tmdb:movieId>", id));
        }
        xml.push_str("</item>");
    }
    xml.push_str("</channel></rss>");
    xml
}

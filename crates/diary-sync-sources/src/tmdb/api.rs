use crate::error::ApiError;
use crate::tmdb::client::TmdbClient;
use diary_sync_models::{MovieMetadata, StreamingProvider};
use serde_json::Value;
use tracing::debug;

pub const POSTER_BASE_URL: &str = "https://image.tmdb.org/t/p/w500";
const LOGO_BASE_URL: &str = "https://image.tmdb.org/t/p/w92";

/// Watch-provider offer types, in display order
const PROVIDER_KINDS: [&str; 5] = ["flatrate", "rent", "buy", "free", "ads"];

/// One `search/movie` result
#[derive(Debug, Clone, PartialEq)]
pub struct SearchCandidate {
    pub id: u64,
    pub title: String,
    pub original_title: String,
    pub year: Option<u32>,
    pub popularity: f64,
}

impl SearchCandidate {
    fn from_json(value: &Value) -> Option<Self> {
        let id = value.get("id")?.as_u64()?;
        let title = str_field(value, "title").unwrap_or_default();
        Some(Self {
            id,
            original_title: str_field(value, "original_title").unwrap_or_else(|| title.clone()),
            title,
            year: str_field(value, "release_date").as_deref().and_then(year_from_date),
            popularity: value.get("popularity").and_then(Value::as_f64).unwrap_or(0.0),
        })
    }
}

/// Full details with credits, release dates, images and external ids embedded
pub async fn movie_details(client: &TmdbClient, tmdb_id: u64) -> Result<Value, ApiError> {
    client
        .request(
            &format!("movie/{}", tmdb_id),
            &[("append_to_response", "credits,release_dates,images,external_ids")],
        )
        .await
}

pub async fn watch_providers(client: &TmdbClient, tmdb_id: u64) -> Result<Value, ApiError> {
    client.request(&format!("movie/{}/watch/providers", tmdb_id), &[]).await
}

/// Resolve an IMDb id (`tt0113277`) to a TMDB movie id
pub async fn find_by_imdb_id(client: &TmdbClient, imdb_id: &str) -> Result<Option<u64>, ApiError> {
    let response = client
        .request(&format!("find/{}", imdb_id.trim()), &[("external_source", "imdb_id")])
        .await?;
    let id = response
        .get("movie_results")
        .and_then(Value::as_array)
        .and_then(|results| results.first())
        .and_then(|movie| movie.get("id"))
        .and_then(Value::as_u64);
    debug!(imdb_id = %imdb_id, tmdb_id = ?id, "IMDb id lookup");
    Ok(id)
}

pub async fn search_movies(client: &TmdbClient, query: &str, year: Option<u32>) -> Result<Vec<SearchCandidate>, ApiError> {
    let year = year.map(|y| y.to_string());
    let mut params = vec![("query", query), ("include_adult", "false")];
    if let Some(year) = year.as_deref() {
        params.push(("year", year));
    }
    let response = client.request("search/movie", &params).await?;
    Ok(response
        .get("results")
        .and_then(Value::as_array)
        .map(|results| results.iter().filter_map(SearchCandidate::from_json).collect())
        .unwrap_or_default())
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn year_from_date(date: &str) -> Option<u32> {
    date.get(..4).and_then(|y| y.parse().ok())
}

/// Pull the fields written back to a record out of a details payload and,
/// when available, the watch-providers payload for `region`
pub fn extract_metadata(details: &Value, providers: Option<&Value>, region: &str) -> MovieMetadata {
    let directors = details
        .pointer("/credits/crew")
        .and_then(Value::as_array)
        .map(|crew| {
            let mut names: Vec<String> = Vec::new();
            for member in crew {
                if member.get("job").and_then(Value::as_str) == Some("Director") {
                    if let Some(name) = str_field(member, "name") {
                        if !names.contains(&name) {
                            names.push(name);
                        }
                    }
                }
            }
            names
        })
        .unwrap_or_default();

    let imdb_id = details
        .pointer("/external_ids/imdb_id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| str_field(details, "imdb_id"));

    let genres = details
        .get("genres")
        .and_then(Value::as_array)
        .map(|genres| genres.iter().filter_map(|g| str_field(g, "name")).collect())
        .unwrap_or_default();

    let (streaming_providers, streaming_link) = providers
        .and_then(|p| p.pointer(&format!("/results/{}", region.to_uppercase())))
        .map(|regional| (extract_providers(regional), str_field(regional, "link")))
        .unwrap_or_default();

    MovieMetadata {
        tmdb_id: details.get("id").and_then(Value::as_u64).unwrap_or(0),
        title: str_field(details, "title").unwrap_or_default(),
        year: str_field(details, "release_date").as_deref().and_then(year_from_date),
        directors,
        imdb_id,
        overview: str_field(details, "overview"),
        genres,
        poster_url: str_field(details, "poster_path").map(|path| format!("{}{}", POSTER_BASE_URL, path)),
        streaming_providers,
        streaming_link,
    }
}

fn extract_providers(regional: &Value) -> Vec<StreamingProvider> {
    let mut providers = Vec::new();
    for kind in PROVIDER_KINDS {
        let Some(offers) = regional.get(kind).and_then(Value::as_array) else {
            continue;
        };
        for offer in offers {
            if let Some(name) = str_field(offer, "provider_name") {
                providers.push(StreamingProvider {
                    name,
                    kind: kind.to_string(),
                    logo_url: str_field(offer, "logo_path").map(|p| format!("{}{}", LOGO_BASE_URL, p)),
                });
            }
        }
    }
    providers
}

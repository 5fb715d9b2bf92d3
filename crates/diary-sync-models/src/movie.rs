use serde::{Deserialize, Serialize};

/// Metadata extracted from the movie database for one film
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MovieMetadata {
    pub tmdb_id: u64,
    pub title: String,
    pub year: Option<u32>,
    pub directors: Vec<String>,
    pub imdb_id: Option<String>,
    pub overview: Option<String>,
    pub genres: Vec<String>,
    pub poster_url: Option<String>,
    pub streaming_providers: Vec<StreamingProvider>,
    pub streaming_link: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamingProvider {
    pub name: String,
    pub kind: String, // flatrate, rent, buy, free, ads
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
}

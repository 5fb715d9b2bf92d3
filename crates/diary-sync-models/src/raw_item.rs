use serde::{Deserialize, Serialize};

/// One diary entry as produced by the feed or CSV parser.
///
/// Every field is kept as the source text; interpretation (title splitting,
/// date parsing, rating rendering) happens in the content writer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawItem {
    pub title: String,
    pub link: String, // May be empty (CSV rows without a URI)
    pub pub_date: String, // Publish timestamp (feed) or watch date (CSV)
    pub description: String, // Review HTML, may be empty
    pub film_year: String, // 4 digits or empty
    pub external_movie_id: String, // TMDB movie id, numeric or empty
    pub rating: String, // Free-form, e.g. "★★★½"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poster_url: Option<String>,
}

impl RawItem {
    pub fn has_link(&self) -> bool {
        !self.link.trim().is_empty()
    }

    pub fn has_external_movie_id(&self) -> bool {
        !self.external_movie_id.trim().is_empty()
    }
}

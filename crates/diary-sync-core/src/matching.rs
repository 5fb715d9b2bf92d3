//! Title/year search against the movie database when a record carries no
//! usable id.

use diary_sync_sources::tmdb::api::search_movies;
use diary_sync_sources::tmdb::SearchCandidate;
use diary_sync_sources::{ApiError, TmdbClient};
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

const EXACT_SCORE: f64 = 100.0;
const PREFIX_SCORE: f64 = 85.0;
const SIMILARITY_WEIGHT: f64 = 70.0;
const YEAR_EXACT_BONUS: f64 = 20.0;
const YEAR_NEAR_BONUS: f64 = 10.0;
const YEAR_GAP_PENALTY: f64 = 5.0;
const YEAR_PENALTY_CAP: f64 = 30.0;
const POPULARITY_BONUS: f64 = 5.0;

const LEADING_ARTICLES: [&str; 3] = ["the ", "a ", "an "];

/// An accepted search result
#[derive(Debug, Clone, PartialEq)]
pub struct MovieMatch {
    pub tmdb_id: u64,
    pub title: String,
    pub score: f64,
    /// Query variant that produced the match
    pub query: String,
}

fn parenthetical_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s*[\(\[][^\)\]]*[\)\]]").expect("static regex is valid"))
}

/// Lowercase, punctuation to spaces, whitespace collapsed
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Queries to try, most specific first: the title as given, without a
/// subtitle, without parentheticals, without a leading article
pub fn query_variants(title: &str) -> Vec<String> {
    let original = title.trim();
    let mut variants: Vec<String> = Vec::new();
    let mut push = |candidate: &str| {
        let candidate = candidate.trim();
        if !candidate.is_empty() && !variants.iter().any(|v| v == candidate) {
            variants.push(candidate.to_string());
        }
    };

    push(original);

    let without_subtitle = original
        .split_once(':')
        .or_else(|| original.split_once(" - "))
        .map(|(head, _)| head)
        .unwrap_or(original);
    push(without_subtitle);

    let without_parens = parenthetical_regex().replace_all(original, "");
    push(&without_parens);

    let lower = original.to_lowercase();
    if let Some(article) = LEADING_ARTICLES.iter().find(|a| lower.starts_with(*a)) {
        push(&original[article.len()..]);
    }

    variants
}

/// Years to try: exact, one either side, then unrestricted
pub fn year_variants(year: Option<u32>) -> Vec<Option<u32>> {
    match year {
        Some(y) => vec![Some(y), Some(y.saturating_sub(1)), Some(y + 1), None],
        None => vec![None],
    }
}

fn title_score(query: &str, candidate: &str) -> f64 {
    let query = normalize_title(query);
    let candidate = normalize_title(candidate);
    if query.is_empty() || candidate.is_empty() {
        return 0.0;
    }
    if query == candidate {
        return EXACT_SCORE;
    }
    if candidate.starts_with(&query) || query.starts_with(&candidate) {
        return PREFIX_SCORE;
    }
    let distance = strsim::levenshtein(&query, &candidate) as f64;
    let length = query.chars().count() as f64;
    (SIMILARITY_WEIGHT * (1.0 - distance / length)).max(0.0)
}

fn year_score(wanted: Option<u32>, candidate: Option<u32>) -> f64 {
    let (Some(wanted), Some(candidate)) = (wanted, candidate) else {
        return 0.0;
    };
    match wanted.abs_diff(candidate) {
        0 => YEAR_EXACT_BONUS,
        1 => YEAR_NEAR_BONUS,
        gap => -(YEAR_GAP_PENALTY * gap as f64).min(YEAR_PENALTY_CAP),
    }
}

/// Score of `candidate` for a search of `query` released in `year`
pub fn score_candidate(query: &str, year: Option<u32>, candidate: &SearchCandidate) -> f64 {
    let title = title_score(query, &candidate.title).max(title_score(query, &candidate.original_title));
    let popularity = (candidate.popularity / 100.0).clamp(0.0, 1.0) * POPULARITY_BONUS;
    title + year_score(year, candidate.year) + popularity
}

/// Highest-scoring candidate at or above `min_score`
pub fn best_candidate<'a>(
    query: &str,
    year: Option<u32>,
    candidates: &'a [SearchCandidate],
    min_score: f64,
) -> Option<(&'a SearchCandidate, f64)> {
    candidates
        .iter()
        .map(|c| (c, score_candidate(query, year, c)))
        .filter(|(_, score)| *score >= min_score)
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

/// Search `title` across query and year variants; the first acceptable
/// match wins. Scoring always uses the record's own year.
pub async fn find_best_match(
    client: &TmdbClient,
    title: &str,
    year: Option<u32>,
    min_score: f64,
) -> Result<Option<MovieMatch>, ApiError> {
    for query in query_variants(title) {
        for search_year in year_variants(year) {
            let candidates = search_movies(client, &query, search_year).await?;
            if candidates.is_empty() {
                continue;
            }
            if let Some((candidate, score)) = best_candidate(&query, year, &candidates, min_score) {
                debug!(
                    title = %title,
                    query = %query,
                    tmdb_id = candidate.id,
                    score,
                    "Accepted search match"
                );
                return Ok(Some(MovieMatch {
                    tmdb_id: candidate.id,
                    title: candidate.title.clone(),
                    score,
                    query,
                }));
            }
        }
    }
    debug!(title = %title, ?year, "No search result above the acceptance threshold");
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{tmdb_client, RoutedTransport};
    use serde_json::json;
    use std::sync::Arc;

    fn candidate(id: u64, title: &str, year: Option<u32>, popularity: f64) -> SearchCandidate {
        SearchCandidate {
            id,
            title: title.to_string(),
            original_title: title.to_string(),
            year,
            popularity,
        }
    }

    #[test]
    fn test_query_variants() {
        assert_eq!(
            query_variants("The Lord of the Rings: The Fellowship of the Ring"),
            vec![
                "The Lord of the Rings: The Fellowship of the Ring".to_string(),
                "The Lord of the Rings".to_string(),
                "Lord of the Rings: The Fellowship of the Ring".to_string(),
            ]
        );
        assert_eq!(
            query_variants("Solaris (1972)"),
            vec!["Solaris (1972)".to_string(), "Solaris".to_string()]
        );
        assert_eq!(query_variants("Heat"), vec!["Heat".to_string()]);
    }

    #[test]
    fn test_year_variants() {
        assert_eq!(year_variants(Some(1995)), vec![Some(1995), Some(1994), Some(1996), None]);
        assert_eq!(year_variants(None), vec![None]);
    }

    #[test]
    fn test_scores() {
        let heat = candidate(949, "Heat", Some(1995), 50.0);
        assert_eq!(score_candidate("heat", Some(1995), &heat), 100.0 + 20.0 + 2.5);
        assert_eq!(score_candidate("Heat", Some(1996), &heat), 100.0 + 10.0 + 2.5);
        // Five years apart: 25 off; twenty years apart: capped at 30
        assert_eq!(score_candidate("Heat", Some(2000), &heat), 100.0 - 25.0 + 2.5);
        assert_eq!(score_candidate("Heat", Some(2015), &heat), 100.0 - 30.0 + 2.5);

        let prefix = candidate(1, "Heat Wave", None, 0.0);
        assert_eq!(score_candidate("Heat", None, &prefix), 85.0);

        let unrelated = candidate(2, "Zardoz", None, 0.0);
        assert!(score_candidate("Heat", None, &unrelated) < 10.0);
    }

    #[test]
    fn test_best_candidate_respects_threshold() {
        let candidates = vec![
            candidate(1, "Heat", Some(1986), 5.0),
            candidate(949, "Heat", Some(1995), 40.0),
        ];
        let (best, _) = best_candidate("Heat", Some(1995), &candidates, 60.0).unwrap();
        assert_eq!(best.id, 949);

        let wrong = vec![candidate(3, "The Heat", Some(2013), 80.0)];
        assert!(best_candidate("Heat", Some(1995), &wrong, 60.0).is_none());
    }

    #[tokio::test]
    async fn test_find_best_match_falls_back_to_variants() {
        let transport = Arc::new(
            RoutedTransport::new()
                .route(
                    "query=Solaris&include_adult=false&year=1972",
                    json!({"results": [{"id": 593, "title": "Solaris", "release_date": "1972-03-20", "popularity": 12.0}]}),
                )
                .route("search/movie", json!({"results": []})),
        );
        let client = tmdb_client(transport.clone(), Some("key"));

        let found = find_best_match(&client, "Solaris (1972)", Some(1972), 60.0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.tmdb_id, 593);
        assert_eq!(found.query, "Solaris");
    }

    #[tokio::test]
    async fn test_find_best_match_none_below_threshold() {
        let transport = Arc::new(RoutedTransport::new().route(
            "search/movie",
            json!({"results": [{"id": 7, "title": "Something Else Entirely", "release_date": "2001-01-01"}]}),
        ));
        let client = tmdb_client(transport.clone(), Some("key"));
        assert!(find_best_match(&client, "Heat", Some(1995), 60.0).await.unwrap().is_none());
        // Exact, -1, +1 and no year
        assert_eq!(transport.requests_matching("search/movie"), 4);
    }
}

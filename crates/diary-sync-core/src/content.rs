//! Interpretation of raw entry text: the combined "Title, Year - Rating"
//! string, review HTML, watch dates and ratings.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use diary_sync_sources::star_rating_from_numeric;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTitle {
    pub title: String,
    pub year: String,
    pub rating: String,
}

fn title_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Greedy title: the year is the last ", dddd"
    RE.get_or_init(|| {
        Regex::new(r"^(?P<title>.+),\s*(?P<year>\d{4})(?:\s+-\s+(?P<rating>.+))?$").expect("static regex is valid")
    })
}

fn paragraph_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<p\b[^>]*>(.*?)</p>").expect("static regex is valid"))
}

fn img_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)<img\b[^>]*?\bsrc\s*=\s*["']([^"']+)["'][^>]*>"#).expect("static regex is valid")
    })
}

fn wrapper_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)</?(?:a|br|span|figure)\b[^>]*>|&nbsp;").expect("static regex is valid"))
}

/// Split "Heat, 1995 - ★★★★" into title, year and rating.
///
/// When the pattern does not match, the whole string is the title and the
/// year and rating come from the fallbacks (the entry's own year and rating
/// fields, which may be empty).
///
/// The fallbacks are used on purpose instead of leaving year and rating
/// empty: a feed title without a trailing year still carries
/// `letterboxd:filmYear`, and dropping it would lose the year term and the
/// title+year identity key. Pass empty fallbacks to get empty fields.
pub fn parse_title(raw: &str, fallback_year: &str, fallback_rating: &str) -> ParsedTitle {
    let raw = raw.trim();
    match title_regex().captures(raw) {
        Some(caps) => {
            let rating = caps
                .name("rating")
                .map(|m| m.as_str().trim().to_string())
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| fallback_rating.trim().to_string());
            ParsedTitle {
                title: caps["title"].trim().to_string(),
                year: caps["year"].to_string(),
                rating,
            }
        }
        None => {
            debug!(title = %raw, "Title has no trailing year; using it as-is");
            ParsedTitle {
                title: raw.to_string(),
                year: fallback_year.trim().to_string(),
                rating: fallback_rating.trim().to_string(),
            }
        }
    }
}

/// Review HTML split into kept paragraphs and images pulled out of
/// image-only paragraphs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewBlocks {
    pub paragraphs: Vec<String>,
    pub image_urls: Vec<String>,
}

impl ReviewBlocks {
    /// Body text: kept paragraphs separated by blank lines
    pub fn body(&self) -> String {
        self.paragraphs.join("\n\n")
    }

    pub fn first_image(&self) -> Option<&str> {
        self.image_urls.first().map(String::as_str)
    }
}

/// Split review HTML on `<p>` boundaries.
///
/// Paragraphs that hold nothing but images (optionally wrapped in links) are
/// dropped and their image URLs collected; every other paragraph is kept
/// verbatim. Assumes the provider never nests `<p>`. Text without any
/// paragraph markup becomes a single paragraph.
pub fn split_review(html: &str) -> ReviewBlocks {
    let html = html.trim();
    let mut blocks = ReviewBlocks::default();
    if html.is_empty() {
        return blocks;
    }

    let mut found_paragraph = false;
    for caps in paragraph_regex().captures_iter(html) {
        found_paragraph = true;
        let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        let inner = caps.get(1).map(|m| m.as_str()).unwrap_or_default();

        let images: Vec<String> = img_regex()
            .captures_iter(inner)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .collect();
        let without_images = img_regex().replace_all(inner, "");
        let residue = wrapper_tag_regex().replace_all(&without_images, "");

        if !images.is_empty() && residue.trim().is_empty() {
            blocks.image_urls.extend(images);
        } else if !inner.trim().is_empty() {
            blocks.paragraphs.push(whole.trim().to_string());
        }
    }

    if !found_paragraph {
        blocks.paragraphs.push(format!("<p>{}</p>", html));
    }
    blocks
}

/// Plain review text (CSV exports) as paragraph HTML; blank lines separate
/// paragraphs, single newlines become `<br>`
pub fn text_to_html(text: &str) -> String {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| format!("<p>{}</p>", escape_html(p).replace('\n', "<br>")))
        .collect::<Vec<_>>()
        .join("")
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Calendar date of a publish timestamp or watch date, in the timestamp's own offset
pub fn parse_watch_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.date());
    }
    ["%d/%m/%Y", "%m/%d/%Y"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
}

/// Numeric ratings become stars so CSV and feed records agree; anything else is kept
pub fn normalize_rating(raw: &str) -> String {
    let raw = raw.trim();
    star_rating_from_numeric(raw).unwrap_or_else(|| raw.to_string())
}

/// Hex SHA-256, used to notice source-side body changes
pub fn source_hash(body: &str) -> String {
    hex::encode(Sha256::digest(body.as_bytes()))
}

use crate::error::FeedError;
use diary_sync_models::RawItem;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemField {
    Title,
    Link,
    PubDate,
    Description,
    FilmYear,
    MemberRating,
    MovieId,
}

impl ItemField {
    fn from_tag(name: &[u8]) -> Option<Self> {
        match name {
            b"title" => Some(ItemField::Title),
            b"link" => Some(ItemField::Link),
            b"pubDate" => Some(ItemField::PubDate),
            b"description" => Some(ItemField::Description),
            b"letterboxd:filmYear" => Some(ItemField::FilmYear),
            b"letterboxd:memberRating" => Some(ItemField::MemberRating),
            b"tmdb:movieId" => Some(ItemField::MovieId),
            _ => None,
        }
    }
}

/// Text accumulated for the `<item>` currently being read
#[derive(Default)]
struct ItemBuffer {
    title: String,
    link: String,
    pub_date: String,
    description: String,
    film_year: String,
    member_rating: String,
    movie_id: Option<String>,
}

impl ItemBuffer {
    fn push(&mut self, field: ItemField, text: &str) {
        let target = match field {
            ItemField::Title => &mut self.title,
            ItemField::Link => &mut self.link,
            ItemField::PubDate => &mut self.pub_date,
            ItemField::Description => &mut self.description,
            ItemField::FilmYear => &mut self.film_year,
            ItemField::MemberRating => &mut self.member_rating,
            ItemField::MovieId => self.movie_id.get_or_insert_with(String::new),
        };
        target.push_str(text);
    }

    /// `None` when the entry is not a film-diary entry (lists, stories)
    fn into_raw_item(self) -> Option<RawItem> {
        let movie_id = self.movie_id.map(|id| id.trim().to_string()).filter(|id| !id.is_empty())?;
        let poster_url = extract_poster_url(&self.description);
        Some(RawItem {
            title: self.title.trim().to_string(),
            link: self.link.trim().to_string(),
            pub_date: self.pub_date.trim().to_string(),
            description: self.description.trim().to_string(),
            film_year: self.film_year.trim().to_string(),
            external_movie_id: movie_id,
            rating: star_rating_from_numeric(self.member_rating.trim()).unwrap_or_default(),
            poster_url,
        })
    }
}

fn img_src_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)<img\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#).expect("static regex is valid")
    })
}

/// First `<img src>` in the description HTML
pub fn extract_poster_url(html: &str) -> Option<String> {
    img_src_regex()
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Render a 0.5-5.0 member rating as stars, e.g. `3.5` -> `★★★½`
pub fn star_rating_from_numeric(value: &str) -> Option<String> {
    let rating: f64 = value.trim().parse().ok()?;
    if !(0.5..=5.0).contains(&rating) {
        return None;
    }
    let halves = (rating * 2.0).round() as usize;
    let mut stars = "★".repeat(halves / 2);
    if halves % 2 == 1 {
        stars.push('½');
    }
    Some(stars)
}

/// Parse a diary RSS feed into raw items, in document order.
///
/// Reads the document event by event; only the recognised children of
/// `<item>` are accumulated. Items without a `tmdb:movieId` element are not
/// diary entries and are dropped without error.
pub fn parse_feed(xml: &[u8]) -> Result<Vec<RawItem>, FeedError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut items = Vec::new();
    let mut depth: usize = 0;
    let mut seen_root = false;
    let mut current: Option<ItemBuffer> = None;
    let mut item_depth = 0;
    let mut field: Option<ItemField> = None;
    let mut dropped = 0;

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|e| FeedError::Malformed {
            position: reader.buffer_position() as u64,
            message: e.to_string(),
        })?;

        match event {
            Event::Start(e) => {
                depth += 1;
                seen_root = true;
                let name = e.name();
                if current.is_none() && name.as_ref() == b"item" {
                    current = Some(ItemBuffer::default());
                    item_depth = depth;
                } else if current.is_some() && depth == item_depth + 1 {
                    field = ItemField::from_tag(name.as_ref());
                    if field == Some(ItemField::MovieId) {
                        if let Some(item) = current.as_mut() {
                            item.push(ItemField::MovieId, "");
                        }
                    }
                }
            }
            Event::Empty(e) => {
                seen_root = true;
                if current.is_some() && depth == item_depth && e.name().as_ref() == b"tmdb:movieId" {
                    // <tmdb:movieId/> carries no id; leave the item unmarked
                    debug!("Feed item has an empty movie id element");
                }
            }
            Event::Text(t) => {
                if let (Some(item), Some(f)) = (current.as_mut(), field) {
                    let text = t.unescape().map_err(|e| FeedError::Malformed {
                        position: reader.buffer_position() as u64,
                        message: e.to_string(),
                    })?;
                    item.push(f, &text);
                }
            }
            Event::CData(c) => {
                if let (Some(item), Some(f)) = (current.as_mut(), field) {
                    let bytes = c.into_inner();
                    item.push(f, &String::from_utf8_lossy(&bytes));
                }
            }
            Event::End(e) => {
                if current.is_some() && depth == item_depth && e.name().as_ref() == b"item" {
                    if let Some(buffer) = current.take() {
                        match buffer.into_raw_item() {
                            Some(item) => items.push(item),
                            None => dropped += 1,
                        }
                    }
                } else if depth == item_depth + 1 {
                    field = None;
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !seen_root {
        return Err(FeedError::Empty);
    }
    if depth != 0 || current.is_some() {
        return Err(FeedError::Malformed {
            position: reader.buffer_position() as u64,
            message: "unexpected end of document (unclosed element)".to_string(),
        });
    }

    debug!(items = items.len(), dropped, "Parsed diary feed");
    Ok(items)
}

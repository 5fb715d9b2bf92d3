use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical, comparable key for one watched film.
///
/// The four shapes, in order of preference:
/// - `boxd:<code>` short-link code
/// - `film:<slug>` canonical film-page slug
/// - `<host><path>` generic URL
/// - `ty:<title>|<year>` title and year, only when no usable URL exists
///
/// An empty key means the item cannot be deduplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    ShortLink,
    FilmPage,
    Url,
    TitleYear,
    Empty,
}

impl IdentityKey {
    pub const SHORT_LINK_PREFIX: &'static str = "boxd:";
    pub const FILM_PAGE_PREFIX: &'static str = "film:";
    pub const TITLE_YEAR_PREFIX: &'static str = "ty:";

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn kind(&self) -> IdentityKind {
        if self.0.is_empty() {
            IdentityKind::Empty
        } else if self.0.starts_with(Self::SHORT_LINK_PREFIX) {
            IdentityKind::ShortLink
        } else if self.0.starts_with(Self::FILM_PAGE_PREFIX) {
            IdentityKind::FilmPage
        } else if self.0.starts_with(Self::TITLE_YEAR_PREFIX) {
            IdentityKind::TitleYear
        } else {
            IdentityKind::Url
        }
    }

    pub fn is_title_year(&self) -> bool {
        self.kind() == IdentityKind::TitleYear
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for IdentityKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for IdentityKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

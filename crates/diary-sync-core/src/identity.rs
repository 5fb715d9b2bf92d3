use diary_sync_models::IdentityKey;
use regex::Regex;
use reqwest::Url;
use std::sync::OnceLock;

/// Short-link host of the diary service
pub const SHORT_LINK_HOST: &str = "boxd.it";
/// Main site host of the diary service
pub const MAIN_HOST: &str = "letterboxd.com";

fn film_path_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // /film/<slug>/ optionally preceded by /<user>/; anything after the slug is ignored
    RE.get_or_init(|| Regex::new(r"^/(?:[^/]+/)?film/([^/]+)(?:/|$)").expect("static regex is valid"))
}

/// Derive the identity key for a diary entry.
///
/// A valid absolute URL with a host always wins; the title/year form is only
/// produced when there is no usable URL. Returns an empty key when neither is
/// available.
pub fn normalize(uri: &str, title: &str, year: &str) -> IdentityKey {
    key_from_url(uri).unwrap_or_else(|| title_year_key(title, year))
}

fn key_from_url(uri: &str) -> Option<IdentityKey> {
    let url = Url::parse(uri.trim()).ok()?;
    let host = url.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    if host.is_empty() {
        return None;
    }
    let path = url.path().trim_end_matches('/');

    if host == SHORT_LINK_HOST {
        let code = path.trim_matches('/');
        if !code.is_empty() {
            return Some(IdentityKey::new(format!("{}{}", IdentityKey::SHORT_LINK_PREFIX, code)));
        }
    } else if host == MAIN_HOST {
        if let Some(slug) = slug_from_path(url.path()) {
            return Some(IdentityKey::new(format!("{}{}", IdentityKey::FILM_PAGE_PREFIX, slug)));
        }
    }

    Some(IdentityKey::new(format!("{}{}", host, path)))
}

/// `ty:<title>|<year>`; empty unless both parts survive normalisation
pub fn title_year_key(title: &str, year: &str) -> IdentityKey {
    let title = title.trim().to_lowercase();
    let year: String = year.chars().filter(|c| c.is_ascii_digit()).collect();
    if title.is_empty() || year.is_empty() {
        return IdentityKey::empty();
    }
    IdentityKey::new(format!("{}{}|{}", IdentityKey::TITLE_YEAR_PREFIX, title, year))
}

fn slug_from_path(path: &str) -> Option<String> {
    film_path_regex()
        .captures(path)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_lowercase())
}

/// Film slug of a main-site film page URL (`/film/<slug>/` or `/<user>/film/<slug>/`)
pub fn film_slug(uri: &str) -> Option<String> {
    let url = Url::parse(uri.trim()).ok()?;
    let host = url.host_str()?.to_lowercase();
    if host.strip_prefix("www.").unwrap_or(&host) != MAIN_HOST {
        return None;
    }
    slug_from_path(url.path())
}

/// Spellings of the same URL a legacy record may have been stored under:
/// both schemes, with and without `www.`, with and without a trailing slash.
pub fn url_variants(uri: &str) -> Vec<String> {
    let trimmed = uri.trim();
    let mut variants = vec![trimmed.to_string()];

    let Ok(url) = Url::parse(trimmed) else {
        return variants;
    };
    let Some(host) = url.host_str().map(str::to_lowercase) else {
        return variants;
    };
    let bare_host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    let path = url.path().trim_end_matches('/');
    let query = url.query().map(|q| format!("?{}", q)).unwrap_or_default();

    for scheme in ["https", "http"] {
        for host in [bare_host.clone(), format!("www.{}", bare_host)] {
            for slash in ["/", ""] {
                let candidate = format!("{}://{}{}{}{}", scheme, host, path, slash, query);
                if !variants.contains(&candidate) {
                    variants.push(candidate);
                }
            }
        }
    }
    variants
}

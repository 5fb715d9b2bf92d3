use crate::error::CsvError;
use csv::ReaderBuilder;
use regex::Regex;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
/// Largest CSV entry read out of an archive
const MAX_ENTRY_BYTES: u64 = 64 * 1024 * 1024;
const PREFERRED_NAMES: [&str; 2] = ["diary.csv", "watched.csv"];
const CANDIDATE_DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];
const DELIMITER_SAMPLE_LINES: usize = 5;

/// Canonical columns of a diary export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CsvField {
    Title,
    Year,
    Date,
    Rating,
    Review,
    Uri,
    ExternalId,
}

impl CsvField {
    pub const ALL: [CsvField; 7] = [
        CsvField::Title,
        CsvField::Year,
        CsvField::Date,
        CsvField::Rating,
        CsvField::Review,
        CsvField::Uri,
        CsvField::ExternalId,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CsvField::Title => "title",
            CsvField::Year => "year",
            CsvField::Date => "date",
            CsvField::Rating => "rating",
            CsvField::Review => "review",
            CsvField::Uri => "uri",
            CsvField::ExternalId => "external id",
        }
    }

    /// Normalised header names accepted for this field, best first.
    /// For dates the watch date outranks the log date.
    fn aliases(&self) -> &'static [&'static str] {
        match self {
            CsvField::Title => &["name", "title", "film", "film title", "movie", "movie title"],
            CsvField::Year => &["year", "release year", "film year"],
            CsvField::Date => &[
                "watched date",
                "date watched",
                "watch date",
                "watched",
                "watched on",
                "diary date",
                "logged date",
                "date",
            ],
            CsvField::Rating => &["rating", "your rating", "member rating", "stars"],
            CsvField::Review => &["review", "review text", "text", "notes", "comment"],
            CsvField::Uri => &["letterboxd uri", "letterboxd url", "uri", "url", "link"],
            CsvField::ExternalId => &["tmdb id", "tmdbid", "tmdb", "external id", "movie id"],
        }
    }
}

/// A decoded export: UTF-8 text with its detected delimiter and column map
#[derive(Debug, Clone)]
pub struct CsvDocument {
    text: String,
    delimiter: u8,
    headers: Vec<String>,
    columns: HashMap<CsvField, usize>,
}

/// One data row, padded or truncated to the header width
#[derive(Debug, Clone)]
pub struct CsvRow<'a> {
    fields: Vec<String>,
    columns: &'a HashMap<CsvField, usize>,
}

impl CsvRow<'_> {
    /// Trimmed value of a canonical column; empty when the column is absent
    pub fn get(&self, field: CsvField) -> &str {
        self.columns
            .get(&field)
            .and_then(|&i| self.fields.get(i))
            .map(|s| s.trim())
            .unwrap_or("")
    }

    pub fn raw(&self) -> &[String] {
        &self.fields
    }
}

impl CsvDocument {
    /// Build a document from already-decoded text
    pub fn parse(text: &str) -> Result<Self, CsvError> {
        let text = normalize_line_endings(text);
        let (delimiter, body) = match take_sep_directive(&text) {
            Some((delimiter, rest)) => {
                debug!(delimiter = %(delimiter as char).escape_debug(), "Honouring sep= directive");
                (delimiter, rest.to_string())
            }
            None => (detect_delimiter(&text), text),
        };

        if body.trim().is_empty() {
            return Err(CsvError::Empty);
        }

        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(body.as_bytes());
        let headers: Vec<String> = reader.headers()?.iter().map(normalize_header).collect();
        if headers.iter().all(|h| h.is_empty()) {
            return Err(CsvError::Empty);
        }

        let columns = map_columns(&headers);
        for required in [CsvField::Title, CsvField::Date] {
            if !columns.contains_key(&required) {
                return Err(CsvError::MissingColumn {
                    column: required.name().to_string(),
                    available: headers.clone(),
                });
            }
        }

        debug!(?headers, delimiter = %(delimiter as char).escape_debug(), "Decoded CSV header");
        Ok(Self {
            text: body,
            delimiter,
            headers,
            columns,
        })
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    /// Normalised header names, in file order
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn column(&self, field: CsvField) -> Option<usize> {
        self.columns.get(&field).copied()
    }

    /// Data rows in file order. Blank lines are skipped.
    pub fn rows(&self) -> impl Iterator<Item = Result<CsvRow<'_>, CsvError>> + '_ {
        let width = self.headers.len();
        let reader = ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(self.text.as_bytes());
        reader.into_records().map(move |record| {
            let record = record?;
            let mut fields: Vec<String> = record.iter().map(str::to_string).collect();
            fields.resize(width, String::new());
            Ok(CsvRow {
                fields,
                columns: &self.columns,
            })
        })
    }
}

/// Read a CSV or ZIP export from disk; the format is sniffed from content
pub fn read_export(path: &Path) -> Result<CsvDocument, CsvError> {
    let bytes = std::fs::read(path)?;
    info!("Read {} bytes from {:?}", bytes.len(), path);
    decode_export(&bytes)
}

/// Decode raw export bytes (plain CSV or a ZIP containing one)
pub fn decode_export(bytes: &[u8]) -> Result<CsvDocument, CsvError> {
    if bytes.is_empty() {
        return Err(CsvError::Empty);
    }
    let csv_bytes = if bytes.starts_with(ZIP_MAGIC) {
        extract_csv_from_zip(bytes)?
    } else {
        bytes.to_vec()
    };
    let text = decode_text(&csv_bytes);
    CsvDocument::parse(&text)
}

fn is_platform_junk(name: &str) -> bool {
    let basename = name.rsplit('/').next().unwrap_or(name);
    name.starts_with("__MACOSX/")
        || name.contains("/__MACOSX/")
        || basename.starts_with("._")
        || basename == ".DS_Store"
        || basename.eq_ignore_ascii_case("Thumbs.db")
}

fn export_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)diary|watched|reviews|films|letterboxd").expect("static regex is valid"))
}

#[derive(Debug)]
struct ZipCandidate {
    index: usize,
    name: String,
    basename: String,
    size: u64,
}

/// Pick the CSV entry that most likely holds the diary
fn select_candidate(candidates: &[ZipCandidate]) -> Option<&ZipCandidate> {
    for preferred in PREFERRED_NAMES {
        if let Some(c) = candidates.iter().find(|c| c.basename == preferred) {
            return Some(c);
        }
    }
    candidates
        .iter()
        .filter(|c| export_name_regex().is_match(&c.basename))
        .max_by_key(|c| c.size)
        .or_else(|| candidates.iter().max_by_key(|c| c.size))
}

fn extract_csv_from_zip(bytes: &[u8]) -> Result<Vec<u8>, CsvError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut candidates = Vec::new();
    for index in 0..archive.len() {
        let entry = archive.by_index(index)?;
        let name = entry.name().to_string();
        if entry.is_dir() || is_platform_junk(&name) {
            continue;
        }
        let basename = name.rsplit('/').next().unwrap_or(&name).to_lowercase();
        if !basename.ends_with(".csv") {
            continue;
        }
        candidates.push(ZipCandidate {
            index,
            name,
            basename,
            size: entry.size(),
        });
    }

    let chosen = select_candidate(&candidates).ok_or(CsvError::NoCsvInArchive)?;
    info!(entry = %chosen.name, size = chosen.size, "Selected CSV from archive");

    let entry = archive.by_index(chosen.index)?;
    let mut out = Vec::new();
    entry.take(MAX_ENTRY_BYTES).read_to_end(&mut out)?;
    if out.len() as u64 >= MAX_ENTRY_BYTES {
        warn!(entry = %chosen.name, "CSV entry reached the size limit and was truncated");
    }
    Ok(out)
}

/// Bytes to UTF-8 text: BOMs stripped, UTF-16 transcoded
fn decode_text(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(b"\xEF\xBB\xBF") {
        return String::from_utf8_lossy(rest).into_owned();
    }
    if let Some(rest) = bytes.strip_prefix(b"\xFF\xFE") {
        return decode_utf16(rest, false);
    }
    if let Some(rest) = bytes.strip_prefix(b"\xFE\xFF") {
        return decode_utf16(rest, true);
    }
    if bytes.contains(&0) {
        // NULs in the high byte of ASCII characters give away the byte order
        let even_nuls = bytes.iter().step_by(2).filter(|&&b| b == 0).count();
        let odd_nuls = bytes.iter().skip(1).step_by(2).filter(|&&b| b == 0).count();
        debug!(even_nuls, odd_nuls, "Export looks like BOM-less UTF-16");
        return decode_utf16(bytes, even_nuls > odd_nuls);
    }
    String::from_utf8_lossy(bytes).into_owned()
}

fn decode_utf16(bytes: &[u8], big_endian: bool) -> String {
    let units = bytes.chunks_exact(2).map(|pair| {
        if big_endian {
            u16::from_be_bytes([pair[0], pair[1]])
        } else {
            u16::from_le_bytes([pair[0], pair[1]])
        }
    });
    let text: String = char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect();
    text.trim_start_matches('\u{FEFF}').to_string()
}

fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// `sep=;` on the first line (optionally quoted) names the delimiter
fn take_sep_directive(text: &str) -> Option<(u8, &str)> {
    let (first, rest) = match text.split_once('\n') {
        Some((first, rest)) => (first, rest),
        None => (text, ""),
    };
    let line = first.trim().trim_matches('"');
    let value = line.get(..4).filter(|p| p.eq_ignore_ascii_case("sep="))?;
    let delimiter = line[value.len()..].as_bytes();
    match delimiter {
        [d] => Some((*d, rest)),
        _ => None,
    }
}

/// Most frequent candidate delimiter outside quotes; ties go to comma
fn detect_delimiter(text: &str) -> u8 {
    let mut counts = [0usize; CANDIDATE_DELIMITERS.len()];
    for line in text.lines().filter(|l| !l.trim().is_empty()).take(DELIMITER_SAMPLE_LINES) {
        let mut in_quotes = false;
        for b in line.bytes() {
            if b == b'"' {
                in_quotes = !in_quotes;
            } else if !in_quotes {
                if let Some(i) = CANDIDATE_DELIMITERS.iter().position(|&d| d == b) {
                    counts[i] += 1;
                }
            }
        }
    }

    let mut best = 0;
    for i in 1..CANDIDATE_DELIMITERS.len() {
        if counts[i] > counts[best] {
            best = i;
        }
    }
    CANDIDATE_DELIMITERS[best]
}

/// Lowercase, strip invisible characters, unify dashes and whitespace
pub fn normalize_header(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '\u{FEFF}' | '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}'))
        .map(|c| match c {
            '\u{00A0}' | '_' => ' ',
            '\u{2010}'..='\u{2015}' | '\u{2212}' | '\u{FE58}' | '\u{FE63}' | '\u{FF0D}' => '-',
            other => other,
        })
        .collect::<String>()
        .to_lowercase();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn map_columns(headers: &[String]) -> HashMap<CsvField, usize> {
    let mut columns = HashMap::new();
    for field in CsvField::ALL {
        let position = field
            .aliases()
            .iter()
            .find_map(|alias| headers.iter().position(|h| h == alias));
        if let Some(i) = position {
            columns.insert(field, i);
        }
    }
    columns
}

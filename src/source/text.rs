//! Text extraction helpers for regulation titles
//!
//! Listing pages describe each regulation with free text such as
//! "Peraturan Daerah Kabupaten Bandung Nomor 5 Tahun 2019". These helpers
//! pull the year, number and issuing region out of that text.

use lazy_static::lazy_static;
use regex::Regex;
use url::Url;

/// Region types, in matching order
const REGION_TYPES: [&str; 5] = ["Provinsi", "Kabupaten", "Kota", "Daerah Khusus", "DKI"];

lazy_static! {
    static ref YEAR_RE: Regex = Regex::new(r"\b(19\d{2}|20\d{2})\b").unwrap();
    static ref NUMBER_RE: Regex = Regex::new(r"(?i)(?:Nomor|No\.?)\s*(\d[\d\s]*)").unwrap();
    static ref TRAILING_NUMBER_RE: Regex =
        Regex::new(r"(?i)\s*\d+\s*(?:Tahun\s*\d+)?$").unwrap();
    static ref WHITESPACE_RE: Regex = Regex::new(r"\s+").unwrap();
    static ref REGION_RES: Vec<(&'static str, Regex)> = REGION_TYPES
        .iter()
        .map(|rtype| {
            let pattern = format!(
                r"(?i){}\s+([^\n]+?)(?:\s+Nomor|\s+No\.|\s+Tahun|$)",
                regex::escape(rtype)
            );
            (*rtype, Regex::new(&pattern).unwrap())
        })
        .collect();
    static ref FALLBACK_REGION_RES: Vec<Regex> = vec![
        Regex::new(r"(?i)(?:Perda|Peraturan Daerah)\s+([A-Za-z\s]+?)(?:\s+Nomor|\s+No\.)").unwrap(),
        Regex::new(r"(?i)(?:dari|di)\s+([A-Za-z\s]+?)(?:\s+tentang|\s+Nomor)").unwrap(),
    ];
}

/// Issuing region parsed from a title
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionInfo {
    pub name: Option<String>,
    pub region_type: Option<String>,
}

/// Finds the first plausible year (1900-2099) in the text
pub fn extract_year(text: &str) -> Option<i32> {
    YEAR_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Extracts the regulation number following "Nomor" or "No."
pub fn extract_number(text: &str) -> Option<String> {
    NUMBER_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Extracts the issuing region and its type
///
/// The first region type mentioned in the text wins. When no typed region is
/// found, a looser "Peraturan Daerah X Nomor" pattern is tried.
pub fn extract_region(text: &str) -> RegionInfo {
    let mut info = RegionInfo::default();
    if text.trim().is_empty() {
        return info;
    }

    let lowered = text.to_lowercase();
    for (rtype, re) in REGION_RES.iter() {
        if !lowered.contains(&rtype.to_lowercase()) {
            continue;
        }

        info.region_type = Some(rtype.to_string());
        if let Some(m) = re.captures(text).and_then(|c| c.get(1)) {
            let name = TRAILING_NUMBER_RE.replace(m.as_str().trim(), "");
            let name = name.trim();
            if !name.is_empty() {
                info.name = Some(name.to_string());
            }
        }
        break;
    }

    if info.name.is_none() {
        for re in FALLBACK_REGION_RES.iter() {
            if let Some(m) = re.captures(text).and_then(|c| c.get(1)) {
                let mut name = m.as_str().trim().to_string();
                for rtype in REGION_TYPES {
                    if name.to_lowercase().starts_with(&rtype.to_lowercase()) {
                        name = name[rtype.len()..].trim().to_string();
                        info.region_type = Some(rtype.to_string());
                        break;
                    }
                }
                if !name.is_empty() {
                    info.name = Some(name);
                }
                break;
            }
        }
    }

    info
}

/// Collapses runs of whitespace and trims
pub(crate) fn clean_text(text: &str) -> String {
    WHITESPACE_RE.replace_all(text.trim(), " ").into_owned()
}

/// Resolves an href against the source base URL
///
/// Returns None for empty, fragment-only and non-HTTP(S) links.
pub(crate) fn resolve_href(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }

    let absolute = base.join(href).ok()?;
    match absolute.scheme() {
        "http" | "https" => Some(absolute.to_string()),
        _ => None,
    }
}

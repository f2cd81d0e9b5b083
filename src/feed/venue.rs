//! Short venue names for title prefixes and notifications.

use chrono::Datelike;
use regex::Regex;
use std::sync::OnceLock;

use crate::feed::types::CanonicalItem;
use crate::util::collapse_whitespace;

/// Feed titles with a fixed abbreviation.
const FEED_TITLES: &[(&str, &str)] = &[
    ("ScienceDirect Publication: Computers & Security", "C&S"),
    ("ScienceDirect Publication: Information and Software Technology", "IST"),
    ("ScienceDirect Publication: Journal of Systems and Software", "JSS"),
    ("ScienceDirect Publication: SoftwareX", "SoftwareX"),
    ("ScienceDirect Publication: Science of Computer Programming", "SCP"),
    (
        "Association for Computing Machinery: ACM Transactions on Software Engineering and Methodology: Table of Contents",
        "TOSEM",
    ),
    (
        "Association for Computing Machinery: ACM Transactions on Programming Languages and Systems: Table of Contents",
        "TOPLAS",
    ),
    (
        "Association for Computing Machinery: ACM Transactions on Privacy and Security: Table of Contents",
        "TOPS",
    ),
    (
        "Association for Computing Machinery: ACM Computing Surveys: Table of Contents",
        "CSUR",
    ),
    (
        "Association for Computing Machinery: Proceedings of the ACM on Programming Languages: Table of Contents",
        "PACMPL",
    ),
    (
        "Association for Computing Machinery: Proceedings of the ACM on Software Engineering: Table of Contents",
        "PACMSE",
    ),
];

/// DBLP stream names whose display name differs from the upper-cased name.
const DBLP_STREAMS: &[(&str, &str)] = &[
    ("fse", "FSE"),
    ("kbse", "ASE"),
    ("neurips", "NeurIPS"),
    ("nips", "NeurIPS"),
    ("sp", "S&P"),
    ("uss", "USENIXSec"),
    ("eurosp", "EuroS&P"),
    ("ieeesp", "IEEE S&P"),
    ("compsec", "C&S"),
];

const PUBLISHER_PREFIXES: &[&str] = &[
    "ScienceDirect Publication: ",
    "Association for Computing Machinery: ",
    "Wiley: ",
    "IEEE Transactions on ",
    "IEEE Journal of ",
];

const STOPWORDS: &[&str] = &["of", "and", "the", "on", "for", "in", "to", "a", "an"];

/// Abbreviates a feed or venue title, e.g. `"cs.SE updates on arXiv.org"`
/// becomes `"arXiv-SE"`.
///
/// Falls back to an acronym of the significant words, then to the first 15
/// characters of the cleaned title. Returns `"UNK"` for blank input.
pub fn abbreviate(source_title: &str) -> String {
    let normalized = collapse_whitespace(source_title).replace(" - new TOC", "");
    if normalized.is_empty() {
        return "UNK".to_string();
    }

    if let Some((_, abbr)) = FEED_TITLES.iter().find(|(title, _)| *title == normalized) {
        return abbr.to_string();
    }

    static DBLP_TITLE: OnceLock<Regex> = OnceLock::new();
    let dblp = DBLP_TITLE.get_or_init(|| {
        Regex::new(
            r"^dblp:\s+new\s+(?:issues|volumes)\s+for\s+streams/(?:conf|journals)/(?P<stream>[A-Za-z0-9_-]+)$",
        )
        .expect("DBLP title pattern is valid")
    });
    if let Some(caps) = dblp.captures(&normalized) {
        let stream = &caps["stream"];
        return DBLP_STREAMS
            .iter()
            .find(|(name, _)| *name == stream)
            .map(|(_, abbr)| abbr.to_string())
            .unwrap_or_else(|| stream.to_uppercase());
    }

    static ARXIV_TITLE: OnceLock<Regex> = OnceLock::new();
    let arxiv = ARXIV_TITLE.get_or_init(|| {
        Regex::new(r"^(?P<cat>[A-Za-z]+\.[A-Za-z0-9]+) updates on arXiv\.org$")
            .expect("arXiv title pattern is valid")
    });
    if let Some(caps) = arxiv.captures(&normalized) {
        let cat = &caps["cat"];
        let suffix = match cat.strip_prefix("cs.") {
            Some(sub) => sub.to_string(),
            None => cat.replace('.', ""),
        };
        return format!("arXiv-{}", suffix);
    }

    let mut cleaned = normalized.as_str();
    if let Some(rest) = PUBLISHER_PREFIXES
        .iter()
        .find_map(|prefix| cleaned.strip_prefix(prefix))
    {
        cleaned = rest;
    }
    let cleaned = cleaned
        .replace(": Table of Contents", "")
        .replace("Table of Contents", "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return "UNK".to_string();
    }

    let acronym: String = cleaned
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty() && !STOPWORDS.contains(&w.to_ascii_lowercase().as_str()))
        .filter_map(|w| w.chars().next())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if (2..=8).contains(&acronym.len()) {
        return acronym;
    }

    cleaned.chars().take(15).collect()
}

/// The `[ABBR YEAR] ` prefix written in front of an item title, or `None`
/// when the item has no venue.
pub fn title_prefix(item: &CanonicalItem) -> Option<String> {
    if item.source_title.trim().is_empty() {
        return None;
    }
    Some(format!(
        "[{} {}] ",
        abbreviate(&item.source_title),
        item.pub_date.year()
    ))
}

/// The title as written to the output feed.
pub fn display_title(item: &CanonicalItem) -> String {
    match title_prefix(item) {
        Some(prefix) => format!("{}{}", prefix, item.title),
        None => item.title.clone(),
    }
}

/// Undoes [`display_title`] on an item read back from the output feed.
///
/// Only the exact prefix computed from the item's own venue and date is
/// removed, so titles that merely start with brackets survive.
pub fn strip_display_prefix(item: &mut CanonicalItem) {
    if let Some(prefix) = title_prefix(item) {
        if let Some(rest) = item.title.strip_prefix(prefix.as_str()) {
            item.title = rest.to_string();
        }
    }
}

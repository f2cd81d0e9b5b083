use chrono::{DateTime, Utc};
use std::borrow::Cow;
use std::fmt;

use crate::util::sanitize_xml_text;

/// How a configured source is expanded and normalized.
///
/// The set is closed: every source URL maps to exactly one variant, and each
/// variant has its own normalization path in [`crate::feed::parse_feed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// A plain journal/conference RSS or Atom feed.
    Static,
    /// A DBLP stream root (`dblp.org/feed/streams/...`) listing volumes or events.
    DblpStream,
    /// An arXiv category feed. Derived from the host, otherwise handled like `Static`.
    Arxiv,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::Static => "static",
            SourceKind::DblpStream => "dblp_stream",
            SourceKind::Arxiv => "arxiv",
        };
        f.write_str(name)
    }
}

/// A configured feed source. Identity is the normalized URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeedSource {
    pub url: String,
    pub kind: SourceKind,
}

/// A normalized publication announcement.
///
/// Created by the parser, mutated at most once by the arXiv enricher
/// (summary only), sanitized before merge, then either kept or dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalItem {
    /// Unique identifier; defaults to `link` when the source provides none.
    pub guid: String,
    pub link: String,
    pub title: String,
    pub summary: String,
    pub pub_date: DateTime<Utc>,
    /// Feed (or DBLP volume) the item was read from.
    pub source_url: String,
    /// Human-readable venue name, e.g. the feed's channel title.
    pub source_title: String,
    pub authors: Vec<String>,
}

impl CanonicalItem {
    /// Deduplication key: `guid`, falling back to `link`.
    pub fn identity(&self) -> &str {
        if self.guid.is_empty() {
            &self.link
        } else {
            &self.guid
        }
    }

    /// Strips XML-1.0-illegal characters from every textual field in place.
    pub fn sanitize(&mut self) {
        sanitize_field(&mut self.guid);
        sanitize_field(&mut self.link);
        sanitize_field(&mut self.title);
        sanitize_field(&mut self.summary);
        sanitize_field(&mut self.source_url);
        sanitize_field(&mut self.source_title);
        for author in &mut self.authors {
            sanitize_field(author);
        }
    }
}

fn sanitize_field(field: &mut String) {
    let clean = match sanitize_xml_text(field) {
        Cow::Owned(clean) => clean,
        Cow::Borrowed(_) => return,
    };
    *field = clean;
}

#[cfg(test)]
pub(crate) fn test_item(guid: &str, title: &str, day: u32) -> CanonicalItem {
    use chrono::TimeZone;
    CanonicalItem {
        guid: guid.to_string(),
        link: format!("https://example.org/{}", guid),
        title: title.to_string(),
        summary: String::new(),
        pub_date: Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap(),
        source_url: "https://example.org/feed.xml".to_string(),
        source_title: "Example Journal".to_string(),
        authors: Vec::new(),
    }
}

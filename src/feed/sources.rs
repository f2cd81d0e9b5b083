use std::collections::HashSet;

use crate::feed::dblp::parse_stream_url;
use crate::feed::types::{FeedSource, SourceKind};
use crate::util::normalize_url;

/// Hosts whose feeds are tagged [`SourceKind::Arxiv`].
const ARXIV_HOSTS: &[&str] = &["arxiv.org", "rss.arxiv.org", "export.arxiv.org"];

/// Resolves configured source lines into an ordered, deduplicated list of
/// [`FeedSource`]s.
///
/// Blank lines and lines starting with `#` are ignored. Lines that are not
/// valid HTTP(S) URLs are skipped with a warning. No network activity.
pub fn resolve_sources<I, S>(lines: I) -> Vec<FeedSource>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut sources = Vec::new();

    for line in lines {
        let line = line.as_ref().trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let url = match normalize_url(line) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(source = %line, error = %e, "Skipping invalid source URL");
                continue;
            }
        };

        let kind = classify(&url);
        let url = String::from(url);
        if !seen.insert(url.clone()) {
            tracing::debug!(source = %url, "Skipping duplicate source");
            continue;
        }

        sources.push(FeedSource { url, kind });
    }

    sources
}

/// Derives the source kind from the URL shape alone.
fn classify(url: &url::Url) -> SourceKind {
    if parse_stream_url(url.as_str()).is_some() {
        return SourceKind::DblpStream;
    }
    match url.host_str() {
        Some(host) if ARXIV_HOSTS.contains(&host) => SourceKind::Arxiv,
        _ => SourceKind::Static,
    }
}

//! DBLP stream expansion.
//!
//! A DBLP stream feed (`/feed/streams/{conf|journals}/{name}.rss`) announces
//! volumes and events, not papers. Each run fetches the XML export of at most
//! `max_volumes` not-yet-seen volumes per stream. A volume counts as seen once
//! any item carrying its `source_url` is present in this run's items or in
//! the persisted feed, so repeated runs resume on their own without a stored
//! cursor.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;
use std::time::Duration;

use crate::feed::fetcher::Fetcher;
use crate::feed::parser::{parse_dblp_volume, ParsedFeed, VolumeContext};
use crate::feed::types::{CanonicalItem, FeedSource};
use crate::report::{RunReport, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Conf,
    Journals,
}

/// A recognized DBLP stream root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DblpStream {
    pub kind: StreamKind,
    pub name: String,
}

/// Recognizes a DBLP stream feed by its path pattern.
///
/// The host is not checked so that DBLP mirrors are recognized too.
pub fn parse_stream_url(url: &str) -> Option<DblpStream> {
    static STREAM_URL: OnceLock<Regex> = OnceLock::new();
    let re = STREAM_URL.get_or_init(|| {
        Regex::new(
            r"^https?://[^/?#]+/feed/streams/(?P<kind>conf|journals)/(?P<stream>[A-Za-z0-9_-]+)\.rss$",
        )
        .expect("DBLP stream pattern is valid")
    });

    let caps = re.captures(url.trim())?;
    let kind = match &caps["kind"] {
        "conf" => StreamKind::Conf,
        _ => StreamKind::Journals,
    };
    Some(DblpStream {
        kind,
        name: caps["stream"].to_string(),
    })
}

/// Where to fetch a volume page and how to recognize its items later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeLocator {
    /// The page URL without its fragment.
    pub page_url: String,
    /// The XML export of the page.
    pub xml_url: String,
    /// Issue number from a `#nrN` fragment.
    pub issue: Option<String>,
    /// Stored as `source_url` on every item of this volume (or issue).
    pub source_key: String,
}

/// Maps a volume page link (`.../tse50.html#nr3`) to its XML export.
pub fn locate_volume(page_link: &str) -> VolumeLocator {
    let (base, fragment) = match page_link.trim().split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (page_link.trim(), None),
    };

    let xml_url = if base.ends_with(".xml") {
        base.to_string()
    } else if let Some(stem) = base.strip_suffix(".html") {
        format!("{}.xml", stem)
    } else if let Some(stem) = base.strip_suffix(".htm") {
        format!("{}.xml", stem)
    } else {
        format!("{}.xml", base.trim_end_matches('/'))
    };

    let issue = fragment.and_then(issue_from_fragment);
    let source_key = match fragment {
        Some(f) if !f.is_empty() => format!("{}#{}", xml_url, f),
        _ => xml_url.clone(),
    };

    VolumeLocator {
        page_url: base.to_string(),
        xml_url,
        issue,
        source_key,
    }
}

fn issue_from_fragment(fragment: &str) -> Option<String> {
    let digits = fragment.strip_prefix("nr")?;
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        Some(digits.to_string())
    } else {
        None
    }
}

/// Per-run allowance of volume page fetches, counted per stream.
#[derive(Debug, Clone)]
pub struct ExpansionBudget {
    per_stream: usize,
    used: HashMap<String, usize>,
}

impl ExpansionBudget {
    pub fn new(per_stream: usize) -> Self {
        Self {
            per_stream,
            used: HashMap::new(),
        }
    }

    pub fn remaining(&self, stream_url: &str) -> usize {
        self.per_stream
            .saturating_sub(self.used.get(stream_url).copied().unwrap_or(0))
    }

    /// Claims one fetch for `stream_url`; false once the allowance is spent.
    pub fn try_take(&mut self, stream_url: &str) -> bool {
        if self.remaining(stream_url) == 0 {
            return false;
        }
        *self.used.entry(stream_url.to_string()).or_insert(0) += 1;
        true
    }

    pub fn total_used(&self) -> usize {
        self.used.values().sum()
    }
}

/// Outcome of expanding one stream.
#[derive(Debug, Default)]
pub struct Expansion {
    pub items: Vec<CanonicalItem>,
    pub volumes_fetched: usize,
    /// Keys of volumes that were fetched and yielded records, whether or not
    /// any record survives the keyword filter. Persisted so later runs skip
    /// them.
    pub processed: Vec<String>,
    /// True when every fetched volume came back empty and the stream's own
    /// announcements were returned instead.
    pub fell_back: bool,
}

pub struct DblpExpander<'a> {
    fetcher: &'a Fetcher,
    request_delay: Duration,
}

impl<'a> DblpExpander<'a> {
    pub fn new(fetcher: &'a Fetcher, request_delay: Duration) -> Self {
        Self {
            fetcher,
            request_delay,
        }
    }

    /// Expands one stream whose listing has already been parsed.
    ///
    /// `seen` holds the `source_url`s of items already known (this run and
    /// the persisted feed). `fetched_at` must be the timestamp the listing was
    /// parsed with; listing entries stamped with it had no date of their own.
    pub async fn expand(
        &self,
        source: &FeedSource,
        stream: &DblpStream,
        listing: &ParsedFeed,
        seen: &HashSet<String>,
        budget: &mut ExpansionBudget,
        report: &mut RunReport,
        fetched_at: DateTime<Utc>,
    ) -> Expansion {
        let source_title = listing
            .title
            .clone()
            .unwrap_or_else(|| format!("dblp: streams/{}", stream.name));

        let mut queued = HashSet::new();
        let pending: Vec<(&CanonicalItem, VolumeLocator)> = listing
            .items
            .iter()
            .filter(|v| !v.link.is_empty())
            .map(|v| (v, locate_volume(&v.link)))
            .filter(|(_, loc)| !seen.contains(&loc.source_key))
            .filter(|(_, loc)| queued.insert(loc.source_key.clone()))
            .collect();

        tracing::debug!(
            stream = %source.url,
            listed = listing.items.len(),
            pending = pending.len(),
            allowance = budget.remaining(&source.url),
            "Selecting DBLP volumes"
        );

        let mut expansion = Expansion::default();

        for (volume, locator) in pending {
            if !budget.try_take(&source.url) {
                break;
            }
            if expansion.volumes_fetched > 0 && !self.request_delay.is_zero() {
                tokio::time::sleep(self.request_delay).await;
            }
            expansion.volumes_fetched += 1;

            let bytes = match self.fetcher.fetch(&locator.xml_url).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    report.record(Stage::Expand, &locator.xml_url, e);
                    continue;
                }
            };

            let ctx = VolumeContext {
                page_url: locator.page_url.clone(),
                source_url: locator.source_key.clone(),
                source_title: source_title.clone(),
                issue: match stream.kind {
                    StreamKind::Journals => locator.issue.clone(),
                    StreamKind::Conf => None,
                },
                announced: (volume.pub_date != fetched_at).then_some(volume.pub_date),
                fetched_at,
            };
            let parsed = parse_dblp_volume(&bytes, &ctx);
            for error in parsed.errors {
                report.record(Stage::Parse, &locator.xml_url, error);
            }

            tracing::info!(
                stream = %source.url,
                volume = %locator.source_key,
                items = parsed.items.len(),
                "Expanded DBLP volume"
            );
            if !parsed.items.is_empty() {
                expansion.processed.push(locator.source_key.clone());
            }
            expansion.items.extend(parsed.items);
        }

        if expansion.volumes_fetched > 0 && expansion.items.is_empty() {
            tracing::warn!(
                stream = %source.url,
                "DBLP expansion returned 0 items; falling back to stream entries"
            );
            expansion.items = listing.items.clone();
            expansion.fell_back = true;
        }

        expansion
    }
}

//! Abstract enrichment for arXiv-linked items.
//!
//! arXiv category feeds and DBLP records often carry no usable description.
//! Items linking to an arXiv paper get their abstract from the export API,
//! bounded by a per-run [`EnrichmentBudget`].

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

use crate::feed::fetcher::{FetchError, Fetcher};
use crate::feed::types::CanonicalItem;
use crate::report::{RunReport, Stage};
use crate::util::collapse_whitespace;

pub const DEFAULT_API_URL: &str = "https://export.arxiv.org/api/query";
/// Summaries shorter than this (in characters, after trimming) are replaced.
pub const MIN_SUMMARY_LEN: usize = 40;

#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("arXiv API response is not a readable feed: {0}")]
    Parse(String),
    #[error("arXiv API returned no abstract for {0}")]
    MissingAbstract(String),
}

/// Extracts an arXiv identifier from an `arxiv.org/abs|pdf/` link or an
/// arXiv DOI (`10.48550/arXiv.ID`).
///
/// ```
/// use paperfeed::feed::arxiv_id;
///
/// assert_eq!(arxiv_id("https://arxiv.org/abs/2401.01234v2"), Some("2401.01234v2"));
/// assert_eq!(arxiv_id("https://arxiv.org/pdf/cs/0112017"), Some("cs/0112017"));
/// assert_eq!(arxiv_id("https://doi.org/10.1145/3597503"), None);
/// ```
pub fn arxiv_id(link: &str) -> Option<&str> {
    static ARXIV_LINK: OnceLock<Regex> = OnceLock::new();
    let re = ARXIV_LINK.get_or_init(|| {
        Regex::new(
            r"(?i)(?:arxiv\.org/(?:abs|pdf)/|10\.48550/arxiv\.)(?P<id>\d{4}\.\d{4,5}(?:v\d+)?|[a-z][a-z.-]*/\d{7}(?:v\d+)?)",
        )
        .expect("arXiv id pattern is valid")
    });
    re.captures(link)
        .and_then(|caps| caps.name("id"))
        .map(|m| m.as_str())
}

fn needs_summary(item: &CanonicalItem) -> bool {
    item.summary.trim().chars().count() < MIN_SUMMARY_LEN
}

/// Remaining abstract lookups for this run. Every attempt counts, including
/// failed ones.
#[derive(Debug, Clone)]
pub struct EnrichmentBudget {
    remaining: usize,
}

impl EnrichmentBudget {
    pub fn new(max_enrichments: usize) -> Self {
        Self {
            remaining: max_enrichments,
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn try_take(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }
}

pub struct ArxivEnricher<'a> {
    fetcher: &'a Fetcher,
    api_url: String,
    request_delay: Duration,
}

impl<'a> ArxivEnricher<'a> {
    pub fn new(fetcher: &'a Fetcher, request_delay: Duration) -> Self {
        Self {
            fetcher,
            api_url: DEFAULT_API_URL.to_string(),
            request_delay,
        }
    }

    /// Points the enricher at a different export API endpoint.
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// Fills short summaries of arXiv-linked items in place, in item order.
    ///
    /// Items whose identity is in `skip` are left alone. Returns the number of
    /// items whose summary was replaced.
    pub async fn enrich(
        &self,
        items: &mut [CanonicalItem],
        skip: &HashSet<String>,
        budget: &mut EnrichmentBudget,
        report: &mut RunReport,
    ) -> usize {
        let mut enriched = 0;
        let mut attempts = 0;

        for item in items.iter_mut() {
            if !needs_summary(item) || skip.contains(item.identity()) {
                continue;
            }
            let Some(id) = arxiv_id(&item.link).map(str::to_string) else {
                continue;
            };
            if !budget.try_take() {
                tracing::debug!(item = %item.identity(), "arXiv enrichment budget exhausted");
                break;
            }
            if attempts > 0 && !self.request_delay.is_zero() {
                tokio::time::sleep(self.request_delay).await;
            }
            attempts += 1;

            match self.fetch_abstract(&id).await {
                Ok(summary) => {
                    tracing::debug!(arxiv_id = %id, "Enriched summary from arXiv");
                    item.summary = summary;
                    enriched += 1;
                }
                Err(e) => report.record(Stage::Enrich, item.identity(), e),
            }
        }

        if attempts > 0 {
            tracing::info!(attempts, enriched, "arXiv enrichment finished");
        }
        enriched
    }

    /// Looks up one abstract through the export API.
    pub async fn fetch_abstract(&self, id: &str) -> Result<String, EnrichmentError> {
        let url = format!("{}?id_list={}", self.api_url, id);
        let bytes = self.fetcher.fetch(&url).await?;
        let feed = feed_rs::parser::parse(bytes.as_slice())
            .map_err(|e| EnrichmentError::Parse(e.to_string()))?;

        feed.entries
            .into_iter()
            // The API reports unknown ids as an entry under /api/errors.
            .filter(|entry| !entry.id.contains("/api/errors"))
            .find_map(|entry| entry.summary)
            .map(|s| collapse_whitespace(&s.content))
            .filter(|s| !s.is_empty())
            .ok_or_else(|| EnrichmentError::MissingAbstract(id.to_string()))
    }
}

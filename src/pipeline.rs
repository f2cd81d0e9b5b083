//! One unattended run: fetch, expand, enrich, filter, sanitize, merge, write.
//!
//! Source fetches run through a bounded, order-preserving pool. Everything
//! after collection is sequential, so the per-run budgets in [`RunContext`]
//! have a single owner. Only the final write can fail the run.

use chrono::{DateTime, Datelike, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::time::Duration;

use crate::config::Config;
use crate::feed::{
    parse_feed, parse_stream_url, ArxivEnricher, CanonicalItem, DblpExpander, EnrichmentBudget,
    ExpansionBudget, FeedSource, Fetcher, ParseError, SourceKind, DEFAULT_ARXIV_API_URL,
};
use crate::filter::QuerySet;
use crate::merge::{merge, MergeMode};
use crate::report::{RunReport, Stage};
use crate::storage::{load_persisted, FeedWriter, WriteError};

/// Cap on expanded-volume markers carried in the output feed.
const MAX_TRACKED_VOLUMES: usize = 2000;

/// Knobs for one run, resolved from [`Config`] plus the CLI mode.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub mode: MergeMode,
    pub max_items: usize,
    pub dblp_max_volumes: usize,
    pub arxiv_enrich: bool,
    pub arxiv_max_enrichments: usize,
    pub arxiv_api_url: String,
    pub request_delay: Duration,
    pub fetch_concurrency: usize,
    pub min_year: Option<i32>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            mode: MergeMode::default(),
            max_items: 1000,
            dblp_max_volumes: 1,
            arxiv_enrich: true,
            arxiv_max_enrichments: 30,
            arxiv_api_url: DEFAULT_ARXIV_API_URL.to_string(),
            request_delay: Duration::from_millis(500),
            fetch_concurrency: 4,
            min_year: None,
        }
    }
}

impl RunSettings {
    pub fn from_config(config: &Config, mode: MergeMode) -> Self {
        Self {
            mode,
            max_items: config.max_items,
            dblp_max_volumes: config.dblp_max_volumes,
            arxiv_enrich: config.arxiv_enrich,
            arxiv_max_enrichments: config.arxiv_max_enrichments,
            arxiv_api_url: config.arxiv_api_url.clone(),
            request_delay: config.request_delay(),
            fetch_concurrency: config.fetch_concurrency.max(1),
            min_year: config.min_year,
        }
    }
}

/// Per-run mutable state. Created fresh for every run and never persisted.
#[derive(Debug)]
pub struct RunContext {
    pub expansion: ExpansionBudget,
    pub enrichment: EnrichmentBudget,
    pub report: RunReport,
}

impl RunContext {
    pub fn new(settings: &RunSettings) -> Self {
        Self {
            expansion: ExpansionBudget::new(settings.dblp_max_volumes),
            enrichment: EnrichmentBudget::new(settings.arxiv_max_enrichments),
            report: RunReport::default(),
        }
    }
}

pub struct Pipeline {
    sources: Vec<FeedSource>,
    queries: QuerySet,
    fetcher: Fetcher,
    writer: FeedWriter,
    settings: RunSettings,
}

impl Pipeline {
    pub fn new(
        sources: Vec<FeedSource>,
        queries: QuerySet,
        fetcher: Fetcher,
        writer: FeedWriter,
        settings: RunSettings,
    ) -> Self {
        Self {
            sources,
            queries,
            fetcher,
            writer,
            settings,
        }
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    /// Executes one run and writes the output feed.
    ///
    /// `built_at` stamps `lastBuildDate` and stands in for missing item
    /// dates, so two runs with the same inputs and `built_at` produce the
    /// same bytes.
    pub async fn run(&self, built_at: DateTime<Utc>) -> Result<RunReport, WriteError> {
        let mut ctx = RunContext::new(&self.settings);
        ctx.report.sources = self.sources.len();

        let persisted = load_persisted(self.writer.path()).await;
        let (known_sources, known_ids): (HashSet<String>, HashSet<String>) =
            match self.settings.mode {
                MergeMode::Rebuild => (HashSet::new(), HashSet::new()),
                MergeMode::Incremental { .. } => (
                    persisted
                        .items
                        .iter()
                        .map(|i| i.source_url.clone())
                        .chain(persisted.volumes.iter().cloned())
                        .collect(),
                    persisted
                        .items
                        .iter()
                        .map(|i| i.identity().to_string())
                        .collect(),
                ),
            };

        let (mut fresh, expanded) = self.collect(&mut ctx, &known_sources, built_at).await;
        ctx.report.fetched_items = fresh.len();

        let carried: &[String] = match self.settings.mode {
            MergeMode::Rebuild => &[],
            MergeMode::Incremental { .. } => &persisted.volumes,
        };
        let volumes = tracked_volumes(expanded, carried);

        if self.settings.arxiv_enrich {
            let enricher = ArxivEnricher::new(&self.fetcher, self.settings.request_delay)
                .with_api_url(self.settings.arxiv_api_url.as_str());
            ctx.report.enriched_items = enricher
                .enrich(&mut fresh, &known_ids, &mut ctx.enrichment, &mut ctx.report)
                .await;
        }

        fresh.retain(|item| {
            self.queries.matches_item(item)
                && self
                    .settings
                    .min_year
                    .map_or(true, |year| item.pub_date.year() >= year)
        });
        ctx.report.matched_items = fresh.len();

        for item in &mut fresh {
            item.sanitize();
        }

        let outcome = merge(
            persisted.items,
            fresh,
            self.settings.mode,
            &self.queries,
            self.settings.max_items,
        );

        self.writer.write(&outcome.items, &volumes, built_at)?;

        let mut report = ctx.report;
        report.pruned_items = outcome.pruned;
        report.output_items = outcome.items.len();
        report.new_items = outcome.added;

        tracing::info!(
            sources = report.sources,
            failed = report.sources_failed,
            fetched = report.fetched_items,
            matched = report.matched_items,
            new = report.new_items.len(),
            pruned = report.pruned_items,
            total = report.output_items,
            failures = report.failures.len(),
            "Run complete"
        );
        Ok(report)
    }

    /// Fetches every source, parses it and expands DBLP streams.
    ///
    /// Returns the items plus the keys of the DBLP volumes expanded this run.
    async fn collect(
        &self,
        ctx: &mut RunContext,
        known_sources: &HashSet<String>,
        fetched_at: DateTime<Utc>,
    ) -> (Vec<CanonicalItem>, Vec<String>) {
        let fetched: Vec<_> = stream::iter(self.sources.iter())
            .map(|source| async move { (source, self.fetcher.fetch(&source.url).await) })
            .buffered(self.settings.fetch_concurrency.max(1))
            .collect()
            .await;

        let expander = DblpExpander::new(&self.fetcher, self.settings.request_delay);
        let mut seen_sources = known_sources.clone();
        let mut items = Vec::new();
        let mut expanded = Vec::new();

        for (source, result) in fetched {
            let bytes = match result {
                Ok(bytes) => bytes,
                Err(e) => {
                    ctx.report.sources_failed += 1;
                    ctx.report.record(Stage::Fetch, &source.url, e);
                    continue;
                }
            };

            let parsed = parse_feed(&bytes, source, fetched_at);
            if parsed
                .errors
                .iter()
                .any(|e| matches!(e, ParseError::Document(_)))
            {
                ctx.report.sources_failed += 1;
            }
            for error in &parsed.errors {
                ctx.report.record(Stage::Parse, &source.url, error);
            }

            let source_items = match (source.kind, parse_stream_url(&source.url)) {
                (SourceKind::DblpStream, Some(stream)) => {
                    let expansion = expander
                        .expand(
                            source,
                            &stream,
                            &parsed,
                            &seen_sources,
                            &mut ctx.expansion,
                            &mut ctx.report,
                            fetched_at,
                        )
                        .await;
                    seen_sources.extend(expansion.processed.iter().cloned());
                    expanded.extend(expansion.processed);
                    expansion.items
                }
                _ => parsed.items,
            };

            tracing::info!(
                source = %source.url,
                kind = %source.kind,
                items = source_items.len(),
                "Collected source"
            );
            seen_sources.extend(source_items.iter().map(|i| i.source_url.clone()));
            items.extend(source_items);
        }

        (items, expanded)
    }
}

/// Volumes expanded this run first, then previously recorded ones, without
/// duplicates and capped at [`MAX_TRACKED_VOLUMES`].
fn tracked_volumes(expanded: Vec<String>, carried: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    expanded
        .into_iter()
        .chain(carried.iter().cloned())
        .filter(|v| seen.insert(v.clone()))
        .take(MAX_TRACKED_VOLUMES)
        .collect()
}

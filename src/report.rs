//! Per-run accounting: counts and the failures each stage absorbed.
//!
//! Only configuration and final-write errors abort a run. Everything else is
//! recorded here, logged, and surfaced through the notification payload.

use serde::Serialize;
use std::fmt;

use crate::feed::CanonicalItem;

/// Pipeline stage that absorbed a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Parse,
    Expand,
    Enrich,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetch => "fetch",
            Stage::Parse => "parse",
            Stage::Expand => "expand",
            Stage::Enrich => "enrich",
        };
        f.write_str(name)
    }
}

/// One recorded, non-fatal failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub stage: Stage,
    /// URL or item identity the failure belongs to.
    pub target: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub sources: usize,
    pub sources_failed: usize,
    /// Items parsed from all sources and expanded volumes.
    pub fetched_items: usize,
    /// Fresh items that passed the keyword and year filters.
    pub matched_items: usize,
    pub enriched_items: usize,
    pub pruned_items: usize,
    pub output_items: usize,
    /// Items present in the output that were not in the persisted feed.
    pub new_items: Vec<CanonicalItem>,
    pub failures: Vec<Failure>,
}

/// Serializable counts for the notification payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub sources: usize,
    pub sources_failed: usize,
    pub fetched: usize,
    pub matched: usize,
    pub enriched: usize,
    pub new: usize,
    pub pruned: usize,
    pub total: usize,
    pub new_titles: Vec<String>,
    pub failures: Vec<Failure>,
}

impl RunReport {
    /// Records a failure and logs it.
    pub fn record(&mut self, stage: Stage, target: impl Into<String>, error: impl fmt::Display) {
        let target = target.into();
        let message = error.to_string();
        tracing::warn!(stage = %stage, target = %target, error = %message, "Recorded failure");
        self.failures.push(Failure {
            stage,
            target,
            message,
        });
    }

    pub fn failures_in(&self, stage: Stage) -> impl Iterator<Item = &Failure> {
        self.failures.iter().filter(move |f| f.stage == stage)
    }

    /// Counts plus the titles of at most `max_titles` new items.
    pub fn summary(&self, max_titles: usize) -> RunSummary {
        RunSummary {
            sources: self.sources,
            sources_failed: self.sources_failed,
            fetched: self.fetched_items,
            matched: self.matched_items,
            enriched: self.enriched_items,
            new: self.new_items.len(),
            pruned: self.pruned_items,
            total: self.output_items,
            new_titles: self
                .new_items
                .iter()
                .take(max_titles)
                .map(|item| item.title.clone())
                .collect(),
            failures: self.failures.clone(),
        }
    }
}

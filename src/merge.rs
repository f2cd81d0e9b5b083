//! Reconciles freshly filtered items with the persisted feed.

use std::collections::HashSet;

use crate::feed::CanonicalItem;
use crate::filter::QuerySet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Start from an empty set; the persisted feed only decides what is new.
    Rebuild,
    /// Start from the persisted feed. With `prune`, persisted items that no
    /// longer match the current queries are dropped.
    Incremental { prune: bool },
}

impl Default for MergeMode {
    fn default() -> Self {
        MergeMode::Incremental { prune: false }
    }
}

#[derive(Debug, Default)]
pub struct MergeOutcome {
    /// Final items, newest first, at most `max_items`.
    pub items: Vec<CanonicalItem>,
    /// Output items whose identity was not in the persisted feed.
    pub added: Vec<CanonicalItem>,
    pub pruned: usize,
    /// Fresh items dropped because their identity was already present.
    pub duplicates: usize,
    /// Items dropped by the `max_items` cap.
    pub truncated: usize,
}

/// Merges `fresh` into `persisted` according to `mode`.
///
/// First occurrence of an identity wins, and persisted items come first, so
/// a fresh copy of a known item never replaces it. Output is ordered by
/// `pub_date` descending with ties broken by `guid`, then truncated to
/// `max_items`.
pub fn merge(
    persisted: Vec<CanonicalItem>,
    fresh: Vec<CanonicalItem>,
    mode: MergeMode,
    queries: &QuerySet,
    max_items: usize,
) -> MergeOutcome {
    let known: HashSet<String> = persisted
        .iter()
        .map(|item| item.identity().to_string())
        .collect();

    let mut outcome = MergeOutcome::default();
    let mut seen: HashSet<String> = HashSet::new();
    let mut items = Vec::with_capacity(persisted.len() + fresh.len());

    let base = match mode {
        MergeMode::Rebuild => Vec::new(),
        MergeMode::Incremental { prune } => {
            if prune {
                let before = persisted.len();
                let kept: Vec<CanonicalItem> = persisted
                    .into_iter()
                    .filter(|item| queries.matches_item(item))
                    .collect();
                outcome.pruned = before - kept.len();
                kept
            } else {
                persisted
            }
        }
    };

    for item in base.into_iter().chain(fresh) {
        if seen.insert(item.identity().to_string()) {
            items.push(item);
        } else {
            outcome.duplicates += 1;
        }
    }

    items.sort_by(|a, b| b.pub_date.cmp(&a.pub_date).then_with(|| a.guid.cmp(&b.guid)));
    if items.len() > max_items {
        outcome.truncated = items.len() - max_items;
        items.truncate(max_items);
    }

    outcome.added = items
        .iter()
        .filter(|item| !known.contains(item.identity()))
        .cloned()
        .collect();
    outcome.items = items;

    tracing::debug!(
        total = outcome.items.len(),
        added = outcome.added.len(),
        pruned = outcome.pruned,
        duplicates = outcome.duplicates,
        truncated = outcome.truncated,
        "Merged feed"
    );
    outcome
}

//! paperfeed: aggregates academic publication announcements into one
//! keyword-filtered RSS 2.0 feed.
//!
//! A run resolves the configured sources ([`feed::resolve_sources`]), fetches
//! and parses them, expands DBLP streams into their newest unseen volumes,
//! fills missing abstracts from arXiv, keeps items matching the
//! [`filter::QuerySet`], merges them with the previous output
//! ([`merge::merge`]) and writes the result atomically
//! ([`storage::FeedWriter`]). [`pipeline::Pipeline`] ties the stages together.

pub mod config;
pub mod feed;
pub mod filter;
pub mod merge;
pub mod notify;
pub mod pipeline;
pub mod report;
pub mod storage;
pub mod util;

//! Source handling: from configured URLs to canonical items.
//!
//! - `sources`: resolves configured lines into typed [`FeedSource`]s
//! - `fetcher`: HTTP retrieval with timeout, size limit and one retry
//! - `parser`: RSS/Atom via `feed-rs`, DBLP volume XML via `quick-xml`
//! - `dblp`: bounded, self-resuming DBLP stream expansion
//! - `arxiv`: bounded abstract enrichment from the arXiv export API
//! - `venue`: venue abbreviations for title prefixes
//!
//! # Example
//!
//! ```
//! use paperfeed::feed::{resolve_sources, SourceKind};
//!
//! let sources = resolve_sources([
//!     "# conferences",
//!     "https://dblp.org/feed/streams/conf/icse.rss",
//!     "https://rss.arxiv.org/rss/cs.SE",
//! ]);
//! assert_eq!(sources[0].kind, SourceKind::DblpStream);
//! assert_eq!(sources[1].kind, SourceKind::Arxiv);
//! ```

mod arxiv;
mod dblp;
mod fetcher;
mod parser;
mod sources;
mod types;
mod venue;

pub use arxiv::{
    arxiv_id, ArxivEnricher, EnrichmentBudget, EnrichmentError,
    DEFAULT_API_URL as DEFAULT_ARXIV_API_URL, MIN_SUMMARY_LEN,
};
pub use dblp::{
    locate_volume, parse_stream_url, DblpExpander, DblpStream, Expansion, ExpansionBudget,
    StreamKind, VolumeLocator,
};
pub use fetcher::{FetchError, FetchFailure, Fetcher, DEFAULT_RETRY_BACKOFF, DEFAULT_TIMEOUT};
pub use parser::{parse_dblp_volume, parse_feed, ParseError, ParsedFeed, VolumeContext};
pub use sources::resolve_sources;
pub use types::{CanonicalItem, FeedSource, SourceKind};
pub use venue::{abbreviate, display_title, strip_display_prefix, title_prefix};

#[cfg(test)]
pub(crate) use types::test_item;

//! The output feed on disk: reading the previous run's file and writing the
//! next one atomically.

mod reader;
mod writer;

pub use reader::{load_persisted, parse_persisted, PersistedFeed, PersistedFeedError};
pub use writer::{render_rss, write_atomic, ChannelInfo, FeedWriter, WriteError};

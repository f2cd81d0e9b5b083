//! Utility functions for common operations.
//!
//! - **URL normalization**: parse configured source URLs into a canonical form
//! - **Text processing**: XML 1.0 character sanitization and whitespace cleanup
//!
//! # Examples
//!
//! ```
//! use paperfeed::util::{normalize_url, sanitize_xml_text};
//!
//! let url = normalize_url("https://example.com/feed.xml").unwrap();
//! assert_eq!(url.host_str(), Some("example.com"));
//!
//! assert_eq!(sanitize_xml_text("bad\u{0}char"), "badchar");
//! ```

mod text;
mod url_validator;

pub use text::{collapse_whitespace, is_forbidden_xml_char, sanitize_xml_text};
pub use url_validator::{normalize_url, UrlValidationError};

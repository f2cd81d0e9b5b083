use thiserror::Error;
use url::Url;

/// Errors that can occur when normalizing a configured source URL.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
}

/// Parses and normalizes a feed source URL.
///
/// The `url` crate lowercases scheme and host, resolves dot segments and
/// percent-encodes where required, so two spellings of the same source end
/// up with the same string identity. Fragments are kept: DBLP journal links
/// use `#nrN` to address a single issue.
///
/// Unlike an interactive reader, sources come from the operator's own
/// configuration, so loopback and private hosts are accepted.
///
/// # Examples
///
/// ```
/// use paperfeed::util::normalize_url;
///
/// let url = normalize_url("HTTPS://Example.COM/feed.xml").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/feed.xml");
///
/// assert!(normalize_url("file:///etc/passwd").is_err());
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlValidationError::MissingHost);
    }

    Ok(url)
}

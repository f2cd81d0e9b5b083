//! Run configuration.
//!
//! Precedence, lowest first: built-in defaults, the optional TOML file
//! (`paperfeed.toml` or `--config`), `RSS_*` environment variables, CLI flags.
//! The source and keyword lists live in their own line-oriented files
//! (`journals.dat`, `keywords.dat`) or in `RSS_JOURNALS` / `RSS_KEYWORDS`.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::storage::ChannelInfo;

pub const DEFAULT_CONFIG_FILE: &str = "paperfeed.toml";
const DEFAULT_REQUEST_SLEEP_SEC: f64 = 0.5;
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("{what} list not found: '{}' does not exist and {env} is not set", path.display())]
    MissingList {
        what: &'static str,
        env: &'static str,
        path: PathBuf,
    },

    #[error("Failed to read {what} list '{}': {source}", path.display())]
    ReadList {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{what} list is empty")]
    EmptyList { what: &'static str },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level run configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
///
/// SEC-015: Custom Debug impl masks `webhook`, whose URL embeds the bot token.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path of the generated RSS file; also the persisted feed read back in
    /// incremental mode.
    pub output_file: PathBuf,
    pub max_items: usize,
    pub user_agent: String,
    pub journals_file: PathBuf,
    pub keywords_file: PathBuf,
    /// Volume pages fetched per DBLP stream per run.
    pub dblp_max_volumes: usize,
    pub arxiv_enrich: bool,
    pub arxiv_max_enrichments: usize,
    pub arxiv_api_url: String,
    /// Pause between follow-up requests (DBLP volumes, arXiv lookups).
    pub request_sleep_sec: f64,
    pub fetch_concurrency: usize,
    pub timeout_secs: u64,
    pub webhook: Option<String>,
    pub notify_max_items: usize,
    /// Fresh items published before this year are dropped.
    pub min_year: Option<i32>,
    pub feed_title: String,
    pub feed_link: String,
    pub feed_description: String,
}

impl Default for Config {
    fn default() -> Self {
        let channel = ChannelInfo::default();
        Self {
            output_file: PathBuf::from("filtered_feed.xml"),
            max_items: 1000,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            journals_file: PathBuf::from("journals.dat"),
            keywords_file: PathBuf::from("keywords.dat"),
            dblp_max_volumes: 1,
            arxiv_enrich: true,
            arxiv_max_enrichments: 30,
            arxiv_api_url: crate::feed::DEFAULT_ARXIV_API_URL.to_string(),
            request_sleep_sec: DEFAULT_REQUEST_SLEEP_SEC,
            fetch_concurrency: 4,
            timeout_secs: 30,
            webhook: None,
            notify_max_items: 20,
            min_year: None,
            feed_title: channel.title,
            feed_link: channel.link,
            feed_description: channel.description,
        }
    }
}

/// SEC-015: Mask webhook in Debug output to prevent secret leakage.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("output_file", &self.output_file)
            .field("max_items", &self.max_items)
            .field("user_agent", &self.user_agent)
            .field("journals_file", &self.journals_file)
            .field("keywords_file", &self.keywords_file)
            .field("dblp_max_volumes", &self.dblp_max_volumes)
            .field("arxiv_enrich", &self.arxiv_enrich)
            .field("arxiv_max_enrichments", &self.arxiv_max_enrichments)
            .field("arxiv_api_url", &self.arxiv_api_url)
            .field("request_sleep_sec", &self.request_sleep_sec)
            .field("fetch_concurrency", &self.fetch_concurrency)
            .field("timeout_secs", &self.timeout_secs)
            .field("webhook", &self.webhook.as_ref().map(|_| "[REDACTED]"))
            .field("notify_max_items", &self.notify_max_items)
            .field("min_year", &self.min_year)
            .field("feed_title", &self.feed_title)
            .field("feed_link", &self.feed_link)
            .field("feed_description", &self.feed_description)
            .finish()
    }
}

const KNOWN_KEYS: &[&str] = &[
    "output_file",
    "max_items",
    "user_agent",
    "journals_file",
    "keywords_file",
    "dblp_max_volumes",
    "arxiv_enrich",
    "arxiv_max_enrichments",
    "arxiv_api_url",
    "request_sleep_sec",
    "fetch_concurrency",
    "timeout_secs",
    "webhook",
    "notify_max_items",
    "min_year",
    "feed_title",
    "feed_link",
    "feed_description",
];

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading to prevent memory exhaustion
        // from a maliciously large or corrupted config file.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Applies `RSS_*` overrides read through `lookup`.
    ///
    /// Blank values are ignored. Values that fail to parse are logged and the
    /// previous setting is kept.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get("RSS_OUTPUT_FILE") {
            self.output_file = PathBuf::from(v);
        }
        if let Some(v) = get("RSS_USER_AGENT") {
            self.user_agent = v;
        }
        if let Some(v) = get("RSS_JOURNALS_FILE") {
            self.journals_file = PathBuf::from(v);
        }
        if let Some(v) = get("RSS_KEYWORDS_FILE") {
            self.keywords_file = PathBuf::from(v);
        }
        if let Some(v) = get("RSS_WEBHOOK").or_else(|| get("RSS_FEISHU_WEBHOOK")) {
            self.webhook = Some(v);
        }

        parse_env(&get, "RSS_MAX_ITEMS", &mut self.max_items);
        parse_env(&get, "RSS_DBLP_MAX_VOLUMES", &mut self.dblp_max_volumes);
        parse_env(&get, "RSS_ARXIV_MAX_ENRICHMENTS", &mut self.arxiv_max_enrichments);
        parse_env(&get, "RSS_REQUEST_SLEEP_SEC", &mut self.request_sleep_sec);
        parse_env(&get, "RSS_NOTIFY_MAX_ITEMS", &mut self.notify_max_items);

        if let Some(v) = get("RSS_ARXIV_ENRICH") {
            match parse_bool(&v) {
                Some(enabled) => self.arxiv_enrich = enabled,
                None => tracing::warn!(var = "RSS_ARXIV_ENRICH", value = %v, "Invalid boolean, keeping previous value"),
            }
        }
        if let Some(v) = get("RSS_MIN_YEAR") {
            match v.parse::<i32>() {
                Ok(year) => self.min_year = Some(year),
                Err(_) => tracing::warn!(var = "RSS_MIN_YEAR", value = %v, "Invalid year, keeping previous value"),
            }
        }
    }

    /// Applies overrides from the process environment.
    pub fn apply_process_env(&mut self) {
        self.apply_env(|name| std::env::var(name).ok());
    }

    /// Pause between follow-up requests. Non-positive values disable it;
    /// values too large for a `Duration` fall back to the default.
    pub fn request_delay(&self) -> Duration {
        if self.request_sleep_sec.is_nan() || self.request_sleep_sec <= 0.0 {
            return Duration::ZERO;
        }
        match Duration::try_from_secs_f64(self.request_sleep_sec) {
            Ok(delay) => delay,
            Err(e) => {
                tracing::warn!(
                    value = self.request_sleep_sec,
                    error = %e,
                    "Invalid request_sleep_sec, using default"
                );
                Duration::from_secs_f64(DEFAULT_REQUEST_SLEEP_SEC)
            }
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn channel(&self) -> ChannelInfo {
        ChannelInfo {
            title: self.feed_title.clone(),
            link: self.feed_link.clone(),
            description: self.feed_description.clone(),
            ..ChannelInfo::default()
        }
    }
}

fn parse_env<T, G>(get: &G, name: &str, target: &mut T)
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    if let Some(v) = get(name) {
        match v.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!(var = %name, value = %v, "Invalid number, keeping previous value"),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ============================================================================
// Line lists
// ============================================================================

/// Loads a line list (sources or keyword queries).
///
/// A non-blank `env_value` wins over the file. Its content is split on
/// newlines, or on `;` when it is a single line. Blank lines and `#`
/// comments are dropped in both cases.
pub fn load_list(
    what: &'static str,
    path: &Path,
    env: &'static str,
    env_value: Option<String>,
) -> Result<Vec<String>, ConfigError> {
    let lines: Vec<String> = match env_value.filter(|v| !v.trim().is_empty()) {
        Some(content) => {
            tracing::info!(env = %env, "Loading {} list from environment", what);
            let separator = if content.contains('\n') { '\n' } else { ';' };
            content.split(separator).map(str::to_string).collect()
        }
        None => {
            let content = std::fs::read_to_string(path).map_err(|source| {
                if source.kind() == std::io::ErrorKind::NotFound {
                    ConfigError::MissingList {
                        what,
                        env,
                        path: path.to_path_buf(),
                    }
                } else {
                    ConfigError::ReadList {
                        what,
                        path: path.to_path_buf(),
                        source,
                    }
                }
            })?;
            tracing::info!(path = %path.display(), "Loading {} list from file", what);
            content.lines().map(str::to_string).collect()
        }
    };

    let lines: Vec<String> = lines
        .into_iter()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect();

    if lines.is_empty() {
        return Err(ConfigError::EmptyList { what });
    }
    Ok(lines)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.output_file, PathBuf::from("filtered_feed.xml"));
        assert_eq!(config.max_items, 1000);
        assert_eq!(config.dblp_max_volumes, 1);
        assert!(config.arxiv_enrich);
        assert_eq!(config.arxiv_max_enrichments, 30);
        assert_eq!(config.notify_max_items, 20);
        assert_eq!(config.request_delay(), Duration::from_millis(500));
        assert!(config.webhook.is_none());
        assert!(config.min_year.is_none());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("paperfeed.toml")).unwrap();
        assert_eq!(config.max_items, 1000);
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paperfeed.toml");
        std::fs::write(&path, "   \n  \n  ").unwrap();
        assert_eq!(Config::load(&path).unwrap().max_items, 1000);
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paperfeed.toml");
        std::fs::write(
            &path,
            "max_items = 50\nmin_year = 2022\nwebhook = \"https://hooks.example/abc\"\nunknown = 1\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.max_items, 50);
        assert_eq!(config.min_year, Some(2022));
        assert_eq!(config.webhook.as_deref(), Some("https://hooks.example/abc"));
        assert_eq!(config.dblp_max_volumes, 1);
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paperfeed.toml");
        std::fs::write(&path, "this is not [valid toml").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paperfeed.toml");
        std::fs::write(&path, "max_items = \"many\"\n").unwrap();
        assert!(Config::load(&path).is_err());
    }

    // SEC-014: File size limit
    #[test]
    fn test_too_large_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paperfeed.toml");
        std::fs::write(&path, "a".repeat(1_048_577)).unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
    }

    // SEC-015: Debug output masks the webhook
    #[test]
    fn test_debug_masks_webhook() {
        let config = Config {
            webhook: Some("https://open.feishu.cn/open-apis/bot/v2/hook/secret-token".to_string()),
            ..Config::default()
        };
        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("secret-token"));
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("RSS_OUTPUT_FILE", " out.xml "),
            ("RSS_MAX_ITEMS", "25"),
            ("RSS_DBLP_MAX_VOLUMES", "3"),
            ("RSS_ARXIV_ENRICH", "false"),
            ("RSS_REQUEST_SLEEP_SEC", "0"),
            ("RSS_FEISHU_WEBHOOK", "https://hooks.example/x"),
            ("RSS_MIN_YEAR", "2022"),
        ]));

        assert_eq!(config.output_file, PathBuf::from("out.xml"));
        assert_eq!(config.max_items, 25);
        assert_eq!(config.dblp_max_volumes, 3);
        assert!(!config.arxiv_enrich);
        assert_eq!(config.request_delay(), Duration::ZERO);
        assert_eq!(config.webhook.as_deref(), Some("https://hooks.example/x"));
        assert_eq!(config.min_year, Some(2022));
    }

    #[test]
    fn test_invalid_env_values_keep_previous() {
        let mut config = Config {
            max_items: 10,
            ..Config::default()
        };
        config.apply_env(env(&[
            ("RSS_MAX_ITEMS", "lots"),
            ("RSS_ARXIV_ENRICH", "maybe"),
            ("RSS_USER_AGENT", "   "),
        ]));
        assert_eq!(config.max_items, 10);
        assert!(config.arxiv_enrich);
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn test_out_of_range_sleep_falls_back_to_default() {
        let mut config = Config::default();
        config.apply_env(env(&[("RSS_REQUEST_SLEEP_SEC", "1e20")]));
        assert_eq!(config.request_delay(), Duration::from_millis(500));

        config.request_sleep_sec = f64::INFINITY;
        assert_eq!(config.request_delay(), Duration::from_millis(500));

        config.request_sleep_sec = f64::NAN;
        assert_eq!(config.request_delay(), Duration::ZERO);
        config.request_sleep_sec = -1.0;
        assert_eq!(config.request_delay(), Duration::ZERO);
    }

    #[test]
    fn test_webhook_env_takes_precedence_over_alias() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("RSS_WEBHOOK", "https://a.example"),
            ("RSS_FEISHU_WEBHOOK", "https://b.example"),
        ]));
        assert_eq!(config.webhook.as_deref(), Some("https://a.example"));
    }

    #[test]
    fn test_load_list_from_file_skips_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keywords.dat");
        std::fs::write(&path, "# queries\nLLM AND static analysis\n\n  =SAST  \n").unwrap();

        let lines = load_list("keyword", &path, "RSS_KEYWORDS", None).unwrap();
        assert_eq!(lines, vec!["LLM AND static analysis", "=SAST"]);
    }

    #[test]
    fn test_load_list_env_semicolons_and_newlines() {
        let path = Path::new("/nonexistent/journals.dat");
        let lines = load_list(
            "source",
            path,
            "RSS_JOURNALS",
            Some("https://a.example/rss; https://b.example/rss;".to_string()),
        )
        .unwrap();
        assert_eq!(lines, vec!["https://a.example/rss", "https://b.example/rss"]);

        let lines = load_list(
            "source",
            path,
            "RSS_JOURNALS",
            Some("https://a.example/rss;x\nhttps://b.example/rss".to_string()),
        )
        .unwrap();
        assert_eq!(lines, vec!["https://a.example/rss;x", "https://b.example/rss"]);
    }

    #[test]
    fn test_load_list_missing_or_empty_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("journals.dat");
        assert!(matches!(
            load_list("source", &missing, "RSS_JOURNALS", None),
            Err(ConfigError::MissingList { .. })
        ));

        let empty = dir.path().join("keywords.dat");
        std::fs::write(&empty, "# only a comment\n\n").unwrap();
        assert!(matches!(
            load_list("keyword", &empty, "RSS_KEYWORDS", Some("  ".to_string())),
            Err(ConfigError::EmptyList { what: "keyword" })
        ));
    }
}

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use secrecy::SecretString;
use std::path::PathBuf;

use paperfeed::config::{load_list, Config, ConfigError, DEFAULT_CONFIG_FILE};
use paperfeed::feed::{resolve_sources, Fetcher};
use paperfeed::filter::QuerySet;
use paperfeed::merge::MergeMode;
use paperfeed::notify::{notify, WebhookNotifier};
use paperfeed::pipeline::{Pipeline, RunSettings};
use paperfeed::storage::FeedWriter;

#[derive(Parser, Debug)]
#[command(
    name = "paperfeed",
    version,
    about = "Fetch paper feeds, filter by keywords, and write one RSS feed"
)]
struct Args {
    /// TOML config file
    #[arg(long, value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Path to the journal/source list file
    #[arg(long, value_name = "FILE")]
    journals_file: Option<PathBuf>,

    /// Path to the keyword query list file
    #[arg(long, value_name = "FILE")]
    keywords_file: Option<PathBuf>,

    /// Output RSS file
    #[arg(long, value_name = "FILE")]
    output_file: Option<PathBuf>,

    /// Maximum number of items in the output feed
    #[arg(long)]
    max_items: Option<usize>,

    /// HTTP User-Agent for all requests
    #[arg(long)]
    user_agent: Option<String>,

    /// DBLP volume/event pages to expand per stream per run
    #[arg(long)]
    dblp_max_volumes: Option<usize>,

    /// arXiv abstract lookups per run
    #[arg(long)]
    arxiv_max_enrichments: Option<usize>,

    /// Skip arXiv abstract enrichment
    #[arg(long)]
    no_arxiv_enrich: bool,

    /// Seconds to sleep between follow-up requests
    #[arg(long)]
    request_sleep_sec: Option<f64>,

    /// Chat webhook URL notified about new items and failures
    #[arg(long, value_name = "URL", alias = "feishu-webhook")]
    webhook: Option<String>,

    /// Max new items listed in the notification
    #[arg(long)]
    notify_max_items: Option<usize>,

    /// Drop fresh items published before this year
    #[arg(long)]
    min_year: Option<i32>,

    /// Ignore the existing output file and build the feed from scratch
    #[arg(long, conflicts_with = "prune_existing")]
    rebuild: bool,

    /// Drop existing items that no longer match the keyword queries
    #[arg(long)]
    prune_existing: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(v) = &self.journals_file {
            config.journals_file = v.clone();
        }
        if let Some(v) = &self.keywords_file {
            config.keywords_file = v.clone();
        }
        if let Some(v) = &self.output_file {
            config.output_file = v.clone();
        }
        if let Some(v) = self.max_items {
            config.max_items = v;
        }
        if let Some(v) = &self.user_agent {
            config.user_agent = v.clone();
        }
        if let Some(v) = self.dblp_max_volumes {
            config.dblp_max_volumes = v;
        }
        if let Some(v) = self.arxiv_max_enrichments {
            config.arxiv_max_enrichments = v;
        }
        if self.no_arxiv_enrich {
            config.arxiv_enrich = false;
        }
        if let Some(v) = self.request_sleep_sec {
            config.request_sleep_sec = v;
        }
        if let Some(v) = &self.webhook {
            config.webhook = Some(v.clone());
        }
        if let Some(v) = self.notify_max_items {
            config.notify_max_items = v;
        }
        if let Some(v) = self.min_year {
            config.min_year = Some(v);
        }
    }

    fn mode(&self) -> MergeMode {
        if self.rebuild {
            MergeMode::Rebuild
        } else {
            MergeMode::Incremental {
                prune: self.prune_existing,
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config '{}'", args.config.display()))?;
    config.apply_process_env();
    args.apply(&mut config);
    tracing::debug!(?config, "Effective configuration");

    let source_lines = load_list(
        "source",
        &config.journals_file,
        "RSS_JOURNALS",
        std::env::var("RSS_JOURNALS").ok(),
    )?;
    let query_lines = load_list(
        "keyword",
        &config.keywords_file,
        "RSS_KEYWORDS",
        std::env::var("RSS_KEYWORDS").ok(),
    )?;

    let sources = resolve_sources(&source_lines);
    if sources.is_empty() {
        return Err(ConfigError::EmptyList { what: "source" }.into());
    }
    let queries = QuerySet::parse(&query_lines);
    if queries.is_empty() {
        return Err(ConfigError::EmptyList { what: "keyword" }.into());
    }
    tracing::info!(sources = sources.len(), queries = queries.len(), "Starting run");

    let fetcher = Fetcher::new(&config.user_agent, config.timeout())
        .context("Failed to build HTTP client")?;
    let notifier = match config.webhook.clone() {
        Some(url) => match WebhookNotifier::new(
            fetcher.client().clone(),
            SecretString::from(url),
            config.notify_max_items,
        ) {
            Ok(notifier) => Some(notifier),
            Err(e) => {
                tracing::warn!(error = %e, "Notifications disabled");
                None
            }
        },
        None => None,
    };

    let pipeline = Pipeline::new(
        sources,
        queries,
        fetcher,
        FeedWriter::new(&config.output_file, config.channel()),
        RunSettings::from_config(&config, args.mode()),
    );

    let report = pipeline
        .run(Utc::now())
        .await
        .context("Failed to write output feed")?;

    notify(notifier.as_ref(), &report).await;
    Ok(())
}

//! ip-search - unified patent and trademark search

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use ip_search::config::LogFormat;
use ip_search::{
    Config, ConfigOverrides, ProviderOutcome, SearchMode, SearchQuery, SearchServicePort,
    UnifiedRecord, UnifiedSearchService,
};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ip-search")]
#[command(author, version, about = "Unified patent and trademark search", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to <config dir>/ip-search/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level directive used when RUST_LOG is unset
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, global = true)]
    log_format: Option<LogFormatArg>,

    /// Per-provider deadline in seconds
    #[arg(long, global = true)]
    provider_timeout: Option<u64>,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Pretty,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Search every registry serving the jurisdiction
    Search {
        /// Free-text keyword
        keyword: String,
        /// Office code (EP, US, GB, ...) or ALL
        #[arg(short, long, default_value = "ALL")]
        jurisdiction: String,
        /// Earliest filing date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Latest filing date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Assignee or owner name fragment
        #[arg(short, long)]
        assignee: Option<String>,
        /// Inventor name fragment
        #[arg(short, long)]
        inventor: Option<String>,
        /// Use each registry's structured search
        #[arg(long)]
        advanced: bool,
        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a single record by id
    Detail {
        /// Record id, e.g. EP3123456, US10123456B2, TM-8812
        id: String,
        /// Principal whose bookmarks are stamped on the record
        #[arg(short, long)]
        user: Option<String>,
        /// Print the record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration with secrets redacted
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Config::load().context("failed to load configuration")?,
    };
    config.apply_overrides(&ConfigOverrides {
        log_level: cli.log_level.clone(),
        json_logs: matches!(cli.log_format, Some(LogFormatArg::Json)),
        provider_timeout_secs: cli.provider_timeout,
        max_concurrent_calls: None,
    })?;

    init_tracing(&config)?;
    debug!("Effective configuration loaded");

    match cli.command {
        Commands::Search {
            keyword,
            jurisdiction,
            from,
            to,
            assignee,
            inventor,
            advanced,
            json,
        } => {
            let mut query = SearchQuery::keyword(keyword)
                .with_jurisdiction(&jurisdiction)
                .with_date_range(from, to);
            query.assignee = assignee;
            query.inventor = inventor;

            let mode = if advanced {
                SearchMode::Advanced
            } else {
                SearchMode::Keyword
            };
            run_search(&config, mode, &query, json).await
        }
        Commands::Detail { id, user, json } => run_detail(&config, &id, user.as_deref(), json).await,
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&redacted(&config))?);
            Ok(())
        }
    }
}

fn init_tracing(config: &Config) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("invalid log level directive")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match config.logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
    Ok(())
}

async fn run_search(
    config: &Config,
    mode: SearchMode,
    query: &SearchQuery,
    json: bool,
) -> anyhow::Result<()> {
    let service = UnifiedSearchService::from_config(config)?;
    info!("Providers: {:?}", service.provider_names());

    let (records, report) = service.search_with_report(mode, query).await?;

    if let Some(report) = &report {
        for (provider, outcome) in &report.outcomes {
            match outcome {
                ProviderOutcome::Succeeded(n) => eprintln!("  {provider}: {n} results"),
                ProviderOutcome::Failed(reason) => eprintln!("  {provider}: failed ({reason})"),
                ProviderOutcome::TimedOut => eprintln!("  {provider}: timed out"),
                ProviderOutcome::Skipped => eprintln!("  {provider}: skipped"),
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else if records.is_empty() {
        println!("No records found.");
    } else {
        for record in &records {
            println!("{}", summary_line(record));
        }
        println!("{} records", records.len());
    }
    Ok(())
}

async fn run_detail(
    config: &Config,
    id: &str,
    user: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let service = UnifiedSearchService::from_config(config)?;

    let record = match user {
        Some(user) => service.get_detail_for(id, user).await?,
        None => service.get_detail(id).await?,
    };

    let Some(record) = record else {
        anyhow::bail!("record {id} not found");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        print_detail(&record);
    }
    Ok(())
}

fn summary_line(record: &UnifiedRecord) -> String {
    format!(
        "{:<18} {:<9} {:<3} {:<10} {}",
        record.id,
        record.kind,
        record.jurisdiction.as_deref().unwrap_or("-"),
        record
            .reference_date()
            .map_or_else(|| "-".to_string(), |d| d.to_string()),
        record.title.as_deref().unwrap_or("(untitled)")
    )
}

fn print_detail(record: &UnifiedRecord) {
    println!("{} ({}, source: {})", record.id, record.kind, record.source);
    if let Some(title) = &record.title {
        println!("Title:        {title}");
    }
    if let Some(jurisdiction) = &record.jurisdiction {
        println!("Jurisdiction: {jurisdiction}");
    }
    if let Some(date) = record.filing_date {
        println!("Filed:        {date}");
    }
    if let Some(date) = record.grant_date {
        println!("Granted:      {date}");
    }
    if let Some(status) = &record.detail.status {
        println!("Status:       {status}");
    }
    if !record.assignees.is_empty() {
        println!("Assignees:    {}", record.assignees.join("; "));
    }
    if !record.inventors.is_empty() {
        println!("Inventors:    {}", record.inventors.join("; "));
    }
    if !record.classifications.is_empty() {
        println!("Classes:      {}", record.classifications.join(", "));
    }
    for goods in &record.detail.goods_and_services {
        println!("Goods:        {goods}");
    }
    if let Some(bookmarked) = record.bookmarked {
        println!("Bookmarked:   {bookmarked}");
    }
    if let Some(text) = &record.detail.abstract_text {
        println!();
        println!("{text}");
    }
}

fn redacted(config: &Config) -> Config {
    const MASK: &str = "********";
    let mut config = config.clone();
    if config.epo.consumer_secret.is_some() {
        config.epo.consumer_secret = Some(MASK.to_string());
    }
    if config.patents_view.api_key.is_some() {
        config.patents_view.api_key = Some(MASK.to_string());
    }
    config
}

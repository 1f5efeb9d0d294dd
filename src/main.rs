use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tankobon::config::{Config, DiscoveryKind};
use tankobon::diagnostics::{Diagnostics, TracingDiagnostics};
use tankobon::discovery::{DiscoveryBackend, FeedDiscovery, HttpRenderer, PageScanDiscovery};
use tankobon::fetch::{HttpPageFetcher, ImageLocator};
use tankobon::http::build_client;
use tankobon::orchestrator::{ChapterOrchestrator, ChapterOutcome, RangeEnd, RunReport};
use tankobon::series::SeriesRef;
use tankobon::sink::FsSink;
use tracing_subscriber::EnvFilter;

/// Default config file path (~/.config/tankobon/config.toml)
fn default_config_path() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("tankobon")
        .join("config.toml"))
}

#[derive(Parser, Debug)]
#[command(
    name = "tankobon",
    version,
    about = "Harvest a manga series chapter by chapter"
)]
struct Args {
    /// Series name as published, e.g. "One Piece"
    series: String,

    /// Config file (default: ~/.config/tankobon/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// First chapter to harvest
    #[arg(long, value_name = "N")]
    begin: Option<u32>,

    /// Last chapter to harvest, or "discover" for the latest published
    #[arg(long, value_name = "N")]
    end: Option<RangeEnd>,

    /// Output root; pages go to <DIR>/<series>/<chapter>/<page>.png
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// How chapter pages are enumerated
    #[arg(long, value_enum)]
    discovery: Option<DiscoveryKind>,

    /// Chapters harvested at once (also the chapter window size)
    #[arg(long, value_name = "N")]
    concurrent_chapters: Option<usize>,

    /// Pages fetched at once per chapter (also the page window size)
    #[arg(long, value_name = "N")]
    concurrent_pages: Option<usize>,

    /// Attempts per page before it is abandoned
    #[arg(long, value_name = "N")]
    patience: Option<u32>,

    /// Pause between chapter windows, in seconds
    #[arg(long, value_name = "SECS")]
    delay: Option<f64>,

    /// Append logs to FILE instead of stderr
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,

    /// Exit with status 2 unless every chapter ran to its end with no page
    /// or chapter abandoned
    #[arg(long)]
    strict: bool,
}

impl Args {
    /// Command-line values win over the config file.
    fn apply(&self, config: &mut Config) {
        if let Some(begin) = self.begin {
            config.range_begin = begin;
        }
        if let Some(end) = self.end {
            config.range_end = end;
        }
        if let Some(output) = &self.output {
            config.output_dir = output.clone();
        }
        if let Some(discovery) = self.discovery {
            config.discovery = discovery;
        }
        if let Some(n) = self.concurrent_chapters {
            config.concurrent_chapters = n;
            config.window_size_chapters = n;
        }
        if let Some(n) = self.concurrent_pages {
            config.concurrent_pages = n;
            config.window_size_pages = n;
        }
        if let Some(patience) = self.patience {
            config.retry_patience = patience;
        }
        if let Some(delay) = self.delay {
            config.inter_window_delay_seconds = delay;
        }
    }
}

fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tankobon=info"));

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file '{}'", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn print_summary(report: &RunReport) {
    println!(
        "{}: chapters {}..={}",
        report.series, report.begin, report.end
    );
    for outcome in &report.chapters {
        match outcome {
            ChapterOutcome::Completed(pages) if pages.abandoned_pages.is_empty() => {
                println!("  {:>4}  {} page(s)", pages.chapter, pages.stored);
            }
            ChapterOutcome::Completed(pages) => {
                let missing: Vec<String> = pages
                    .abandoned_pages
                    .iter()
                    .map(|p| p.page.to_string())
                    .collect();
                println!(
                    "  {:>4}  {} page(s), missing {}",
                    pages.chapter,
                    pages.stored,
                    missing.join(", ")
                );
            }
            ChapterOutcome::Interrupted(pages) => {
                println!(
                    "  {:>4}  {} page(s), interrupted",
                    pages.chapter, pages.stored
                );
            }
            ChapterOutcome::Abandoned { chapter, cause, .. } => {
                println!("  {chapter:>4}  abandoned: {cause}");
            }
            ChapterOutcome::Skipped { chapter } => {
                println!("  {chapter:>4}  skipped");
            }
        }
    }
    let totals = &report.totals;
    println!(
        "{} page(s) stored, {} missing; {} chapter(s) abandoned{}",
        totals.pages_stored,
        totals.pages_missing,
        totals.chapters_abandoned,
        if report.aborted { " (interrupted)" } else { "" }
    );
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_tracing(args.log_file.as_deref())?;

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config '{}'", config_path.display()))?;
    args.apply(&mut config);
    config.validate()?;

    let series = Arc::new(SeriesRef::new(args.series.as_str()));
    if series.display_name().is_empty() {
        anyhow::bail!("Series name must not be empty");
    }

    let diagnostics: Arc<dyn Diagnostics> = Arc::new(TracingDiagnostics);
    let client = build_client(config.request_timeout()).context("Failed to build HTTP client")?;

    let feed = FeedDiscovery::new(
        client.clone(),
        &config.feed_origin,
        config.request_timeout(),
        Arc::clone(&diagnostics),
    );
    let discovery: Arc<dyn DiscoveryBackend> = match config.discovery {
        DiscoveryKind::Feed => Arc::new(feed),
        DiscoveryKind::PageScan => Arc::new(PageScanDiscovery::new(
            Arc::new(HttpRenderer::new(client.clone())),
            &config.site_origin,
            config.settle_timeout(),
            feed,
            Arc::clone(&diagnostics),
        )),
    };
    let fetcher = Arc::new(HttpPageFetcher::new(
        client,
        config.request_timeout(),
        Arc::clone(&diagnostics),
    ));
    let sink = Arc::new(FsSink::new(config.output_dir.join(series.slug())));
    tracing::info!(path = %sink.root().display(), "Writing pages");

    let orchestrator = ChapterOrchestrator::new(
        series,
        discovery,
        fetcher,
        sink,
        ImageLocator::new(&config.image_origin),
        config.harvest_settings(),
        diagnostics,
    );

    let abort = orchestrator.abort_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, letting in-flight requests finish");
            abort.raise();
        }
    });

    let report = orchestrator
        .run(config.chapter_range())
        .await
        .context("Failed to resolve the chapter range")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
    } else {
        print_summary(&report);
    }

    if args.strict && !report.is_complete() {
        return Ok(ExitCode::from(2));
    }
    Ok(ExitCode::SUCCESS)
}

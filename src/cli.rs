//! CLI parsing and orchestration. Resolves settings (flags > config > defaults), runs the
//! crawl, and maps errors to exit codes.

use crate::artifacts::Artifacts;
use crate::checkpoint::{format_ranges, load_checkpoint, missing_chapter_ranges, CheckpointError};
use crate::config::{self, Config};
use crate::crawl::{
    ChapterExtractor, CrawlError, CrawlOptions, CrawlStatus, Crawler, PoliteClient, Selectors,
    DEFAULT_CHECKPOINT_INTERVAL, DEFAULT_MAX_CONSECUTIVE_FAILURES, DEFAULT_MAX_RETRIES,
};
use crate::model::NovelInfo;
use clap::Parser;
use reqwest::Url;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

const DEFAULT_URL_FILE: &str = "url.txt";
const DEFAULT_OUTPUT: &str = "novel_output.epub";
const DEFAULT_CHECKPOINT: &str = "crawl_checkpoint.json";
const DEFAULT_LOG_FILE: &str = "crawler.log";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    InvalidInput(String),

    #[error(transparent)]
    Crawl(#[from] CrawlError),

    #[error("No chapters were captured ({failed} url(s) failed). Check {log} for details.")]
    NoChapters { failed: usize, log: String },

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

impl CliRunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliRunError::InvalidInput(_) | CliRunError::Crawl(_) => 1,
            CliRunError::NoChapters { .. } => 2,
            CliRunError::Checkpoint(_) => 3,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "novelcrawl")]
#[command(about = "Crawl a web novel chapter by chapter and compile it into an EPUB")]
#[command(
    after_help = "Config file keys (url_file, output, checkpoint, log_file, user_agent, timeout_secs, max_retries, max_consecutive_failures, max_chapters, checkpoint_interval, title, author, language, toc_page, [selectors]) are read from novelcrawl.toml. CLI flags override config."
)]
pub struct Args {
    /// Start chapter URL. Default: first non-comment line of the URL file.
    #[arg(long)]
    pub url: Option<String>,

    /// File holding the start URL (lines starting with '#' or '.' are comments). Default: url.txt.
    #[arg(long)]
    pub url_file: Option<PathBuf>,

    /// EPUB output path. Default: novel_output.epub.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Checkpoint JSON path. Default: crawl_checkpoint.json.
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,

    /// Persistent log file (appended). Default: crawler.log.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Explicit config file instead of the default search.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// E-book title.
    #[arg(long)]
    pub title: Option<String>,

    /// E-book author.
    #[arg(long)]
    pub author: Option<String>,

    /// E-book language tag.
    #[arg(long)]
    pub language: Option<String>,

    /// Attempts per chapter page (default 3).
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Request timeout in seconds (default 30).
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Consecutive fetch-or-parse failures that end the crawl (default 2).
    #[arg(long)]
    pub max_consecutive_failures: Option<u32>,

    /// Stop after this many chapters (default unlimited).
    #[arg(long)]
    pub max_chapters: Option<usize>,

    /// Chapters between checkpoint and EPUB rewrites (default 5).
    #[arg(long)]
    pub checkpoint_interval: Option<usize>,

    /// HTTP User-Agent (overrides config).
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Show a progress spinner; console logging drops to warnings (the log file keeps everything).
    #[arg(long)]
    pub progress: bool,

    /// Suppress console output except errors.
    #[arg(short, long)]
    pub quiet: bool,

    /// Debug-level console logging and the full error chain on failure.
    #[arg(long)]
    pub verbose: bool,

    /// Print missing chapter ranges recorded in this checkpoint and exit.
    #[arg(long, value_name = "CHECKPOINT")]
    pub gaps: Option<PathBuf>,
}

/// Crawl settings after layering flags over config over defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Settings {
    output: PathBuf,
    checkpoint: PathBuf,
    user_agent: Option<String>,
    timeout_secs: u64,
    max_retries: u32,
    max_consecutive_failures: u32,
    max_chapters: Option<usize>,
    checkpoint_interval: usize,
    title: Option<String>,
    author: Option<String>,
    language: Option<String>,
    toc_page: bool,
    selectors: Selectors,
}

impl Settings {
    fn resolve(args: &Args, config: &Config) -> Self {
        Self {
            output: args
                .output
                .clone()
                .or_else(|| config.output.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT)),
            checkpoint: args
                .checkpoint
                .clone()
                .or_else(|| config.checkpoint.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CHECKPOINT)),
            user_agent: args.user_agent.clone().or_else(|| config.user_agent.clone()),
            timeout_secs: args
                .timeout
                .or(config.timeout_secs)
                .unwrap_or(DEFAULT_TIMEOUT_SECS)
                .max(1),
            max_retries: args
                .max_retries
                .or(config.max_retries)
                .unwrap_or(DEFAULT_MAX_RETRIES)
                .max(1),
            max_consecutive_failures: args
                .max_consecutive_failures
                .or(config.max_consecutive_failures)
                .unwrap_or(DEFAULT_MAX_CONSECUTIVE_FAILURES)
                .max(1),
            max_chapters: args.max_chapters.or(config.max_chapters),
            checkpoint_interval: args
                .checkpoint_interval
                .or(config.checkpoint_interval)
                .unwrap_or(DEFAULT_CHECKPOINT_INTERVAL)
                .max(1),
            title: args.title.clone().or_else(|| config.title.clone()),
            author: args.author.clone().or_else(|| config.author.clone()),
            language: args.language.clone().or_else(|| config.language.clone()),
            toc_page: config.toc_page.unwrap_or(true),
            selectors: config
                .selectors
                .as_ref()
                .map(|s| s.apply(Selectors::default()))
                .unwrap_or_default(),
        }
    }

    fn novel_info(&self, start_url: &str) -> NovelInfo {
        let mut info = NovelInfo::new(start_url);
        if let Some(t) = &self.title {
            info.title = t.clone();
        }
        if let Some(a) = &self.author {
            info.author = a.clone();
        }
        if let Some(l) = &self.language {
            info.language = l.clone();
        }
        info
    }
}

/// First non-blank line that is not a comment ('#' or '.').
fn first_url_line(contents: &str) -> Option<&str> {
    contents
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with('.'))
}

fn read_start_url(path: &Path) -> Result<String, CliRunError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        CliRunError::InvalidInput(format!("Cannot read URL file {}: {}", path.display(), e))
    })?;
    first_url_line(&contents)
        .map(String::from)
        .ok_or_else(|| CliRunError::InvalidInput(format!("No URLs found in {}", path.display())))
}

fn validate_start_url(url: &str) -> Result<(), CliRunError> {
    let parsed = Url::parse(url).map_err(|e| {
        CliRunError::InvalidInput(format!(
            "Expected a chapter URL such as https://example.com/novel/chapter-1. Invalid: {}: {}",
            url, e
        ))
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(CliRunError::InvalidInput(format!(
            "Unsupported URL scheme '{}' in {}",
            other, url
        ))),
    }
}

/// Ensure output path parent exists.
fn validate_output_path(path: &Path) -> Result<(), CliRunError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            return Err(CliRunError::InvalidInput(format!(
                "Cannot write output: {}: parent directory does not exist.",
                path.display()
            )));
        }
    }
    Ok(())
}

/// Persistent log file for this run. `--gaps` only reads a checkpoint and logs to the
/// console alone.
fn resolve_log_file(args: &Args, config: &Config) -> Option<PathBuf> {
    if args.gaps.is_some() {
        return None;
    }
    Some(
        args.log_file
            .clone()
            .or_else(|| config.log_file.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
    )
}

/// Record an interrupt on `flag`. Returns true when one was already pending.
fn note_interrupt(flag: &AtomicBool) -> bool {
    flag.swap(true, Ordering::SeqCst)
}

/// First Ctrl-C asks the crawl to stop at the next chapter boundary (the final checkpoint
/// and EPUB are still written); a second one exits immediately.
fn install_interrupt_handler() -> Arc<AtomicBool> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let signal = Arc::clone(&interrupted);
    let installed = ctrlc::set_handler(move || {
        if note_interrupt(&signal) {
            eprintln!("Interrupted again; exiting without a final save.");
            std::process::exit(130);
        }
        eprintln!("Interrupt received; stopping after the current chapter (Ctrl-C again to quit).");
    });
    if let Err(e) = installed {
        warn!(error = %e, "cannot install Ctrl-C handler; an interrupt skips the final save");
    }
    interrupted
}

fn report_gaps(path: &Path) -> Result<(), CliRunError> {
    let record = load_checkpoint(path)?;
    println!("Chapters in checkpoint: {}", record.chapter_count);
    let ranges = missing_chapter_ranges(&record.chapters);
    if ranges.is_empty() {
        println!("No missing chapters.");
    } else {
        let missing: u64 = ranges.iter().map(|r| r.end() - r.start() + 1).sum();
        println!("Missing chapters ({}):", missing);
        println!("{}", format_ranges(&ranges));
    }
    Ok(())
}

/// Entry point for the CLI. Returns Ok(()) on success; Err with exit code and message on failure.
pub fn run(args: &Args) -> Result<(), CliRunError> {
    let config = config::load_config(args.config.as_deref())
        .map_err(CliRunError::InvalidInput)?
        .unwrap_or_default();

    let console_level = if args.quiet {
        "error"
    } else if args.verbose {
        "debug"
    } else if args.progress {
        "warn"
    } else {
        "info"
    };
    let log_file = resolve_log_file(args, &config);
    crate::logging::init(console_level, log_file.as_deref()).map_err(CliRunError::InvalidInput)?;

    if let Some(ref checkpoint) = args.gaps {
        return report_gaps(checkpoint);
    }

    let start_url = match &args.url {
        Some(u) => u.trim().to_string(),
        None => {
            let url_file = args
                .url_file
                .clone()
                .or_else(|| config.url_file.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_URL_FILE));
            read_start_url(&url_file)?
        }
    };
    validate_start_url(&start_url)?;

    let settings = Settings::resolve(args, &config);
    validate_output_path(&settings.output)?;
    validate_output_path(&settings.checkpoint)?;

    let mut builder = PoliteClient::builder()
        .timeout_secs(settings.timeout_secs)
        .max_retries(settings.max_retries);
    if let Some(ua) = &settings.user_agent {
        builder = builder.user_agent(ua.clone());
    }
    let mut client = builder.build()?;
    let extractor = ChapterExtractor::new(settings.selectors.clone())?;
    let mut artifacts = Artifacts {
        checkpoint_path: settings.checkpoint.clone(),
        document_path: settings.output.clone(),
        info: settings.novel_info(&start_url),
        toc_page: settings.toc_page,
    };

    if settings.max_consecutive_failures <= DEFAULT_MAX_CONSECUTIVE_FAILURES {
        info!(
            limit = settings.max_consecutive_failures,
            "a short network outage counts the same as a missing chapter; raise \
             max_consecutive_failures if the source is unreliable"
        );
    }

    let spinner: RefCell<Option<indicatif::ProgressBar>> = RefCell::new(None);
    let progress_cb = |count: usize, title: &str| {
        let mut state = spinner.borrow_mut();
        let pb = state.get_or_insert_with(|| {
            let bar = indicatif::ProgressBar::new_spinner();
            bar.set_style(
                indicatif::ProgressStyle::with_template("{spinner} {msg} ({elapsed})")
                    .unwrap_or_else(|_| indicatif::ProgressStyle::default_spinner())
                    .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
            );
            bar.enable_steady_tick(Duration::from_millis(80));
            bar
        });
        pb.set_message(format!("Chapter {}: {}", count, title));
    };
    let progress: Option<&dyn Fn(usize, &str)> = if args.progress && !args.quiet {
        Some(&progress_cb)
    } else {
        None
    };

    let interrupted = install_interrupt_handler();
    let options = CrawlOptions {
        max_consecutive_failures: settings.max_consecutive_failures,
        max_chapters: settings.max_chapters,
        checkpoint_interval: settings.checkpoint_interval,
        progress,
        cancel: Some(interrupted.as_ref()),
    };
    let report = Crawler::new(&mut client, &extractor, &mut artifacts).run(&start_url, &options);

    if let Some(pb) = spinner.borrow_mut().take() {
        pb.finish_and_clear();
    }

    if report.chapters.is_empty() {
        return Err(CliRunError::NoChapters {
            failed: report.failed_urls.len(),
            log: log_file
                .as_deref()
                .unwrap_or(Path::new(DEFAULT_LOG_FILE))
                .display()
                .to_string(),
        });
    }

    if !args.quiet {
        let why = match report.status {
            CrawlStatus::StoppedFailureThreshold => "consecutive failures reached the limit",
            CrawlStatus::StoppedChapterLimit => "chapter limit reached",
            CrawlStatus::StoppedExhausted => "no next chapter url",
            CrawlStatus::StoppedInterrupted => "interrupted",
            CrawlStatus::Running => "running",
        };
        eprintln!(
            "Captured {} chapter(s) ({}). Wrote {} and {}",
            report.chapters.len(),
            why,
            settings.output.display(),
            settings.checkpoint.display()
        );
    }
    Ok(())
}

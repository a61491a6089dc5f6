//! Sequential chapter crawl: fetch, extract, advance to the derived next URL, stop on
//! consecutive failures. Periodic snapshots go to a [`Persist`] sink.

mod client;
mod error;

pub mod extract;
pub mod sequence;

pub use client::{
    DelayRange, PageFetcher, PoliteClient, PoliteClientBuilder, DEFAULT_MAX_RETRIES,
    DEFAULT_POLITENESS_DELAY, DEFAULT_RETRY_BACKOFF,
};
pub use error::CrawlError;
pub use extract::{ChapterExtractor, HtmlPage, PageTree, Selectors};
pub use sequence::{chapter_index, next_chapter_url};

use crate::model::Chapter;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// Default number of consecutive fetch-or-parse failures that ends a crawl.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 2;
/// Default number of new chapters between periodic snapshots.
pub const DEFAULT_CHECKPOINT_INTERVAL: usize = 5;

/// Controller state. Every `Stopped*` value is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlStatus {
    Running,
    /// No next URL could be derived.
    StoppedExhausted,
    /// Consecutive failures reached the configured limit.
    StoppedFailureThreshold,
    /// `max_chapters` chapters were captured.
    StoppedChapterLimit,
    /// The cancel flag was raised.
    StoppedInterrupted,
}

impl CrawlStatus {
    pub fn is_terminal(self) -> bool {
        self != CrawlStatus::Running
    }
}

/// Receives full chapter-list snapshots. Failures are the sink's to log; the crawl goes on.
pub trait Persist {
    fn persist(&mut self, chapters: &[Chapter]);
}

/// Tunables and hooks for a crawl run.
pub struct CrawlOptions<'a> {
    pub max_consecutive_failures: u32,
    pub max_chapters: Option<usize>,
    pub checkpoint_interval: usize,
    /// Called after each stored chapter with (chapters so far, chapter title).
    pub progress: Option<&'a dyn Fn(usize, &str)>,
    /// Checked at every iteration boundary.
    pub cancel: Option<&'a AtomicBool>,
}

impl Default for CrawlOptions<'_> {
    fn default() -> Self {
        Self {
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            max_chapters: None,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            progress: None,
            cancel: None,
        }
    }
}

/// Mutable state of one crawl run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlState {
    /// `None` means there is nothing left to fetch.
    pub current_url: Option<String>,
    /// Discovery order, which is also document order.
    pub chapters: Vec<Chapter>,
    pub consecutive_failures: u32,
    /// Diagnostics only; never read by the loop.
    pub failed_urls: Vec<String>,
}

impl CrawlState {
    pub fn new(start_url: impl Into<String>) -> Self {
        Self {
            current_url: Some(start_url.into()),
            ..Self::default()
        }
    }
}

/// Result of a finished crawl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlReport {
    pub status: CrawlStatus,
    pub chapters: Vec<Chapter>,
    pub failed_urls: Vec<String>,
}

/// Drives fetch -> extract -> advance, one chapter in flight at a time.
pub struct Crawler<'a> {
    fetcher: &'a mut dyn PageFetcher,
    extractor: &'a ChapterExtractor,
    sink: &'a mut dyn Persist,
}

impl<'a> Crawler<'a> {
    pub fn new(
        fetcher: &'a mut dyn PageFetcher,
        extractor: &'a ChapterExtractor,
        sink: &'a mut dyn Persist,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            sink,
        }
    }

    /// Crawl from `start_url` until a terminal status, then persist once more if at least
    /// one chapter was captured.
    pub fn run(&mut self, start_url: &str, options: &CrawlOptions<'_>) -> CrawlReport {
        info!(url = start_url, "starting crawl");
        let mut state = CrawlState::new(start_url);
        let status = loop {
            let status = self.step(&mut state, options);
            if status.is_terminal() {
                break status;
            }
        };

        info!(
            chapters = state.chapters.len(),
            status = ?status,
            failed = state.failed_urls.len(),
            "crawl completed"
        );
        if !state.failed_urls.is_empty() {
            info!(failed_urls = ?state.failed_urls, "urls that yielded no chapter");
        }
        if state.chapters.is_empty() {
            warn!("no chapters were captured; nothing to persist");
        } else {
            self.sink.persist(&state.chapters);
        }

        CrawlReport {
            status,
            chapters: state.chapters,
            failed_urls: state.failed_urls,
        }
    }

    /// Run one iteration against `state` and return the resulting status.
    pub fn step(&mut self, state: &mut CrawlState, options: &CrawlOptions<'_>) -> CrawlStatus {
        let Some(url) = state.current_url.clone() else {
            return CrawlStatus::StoppedExhausted;
        };
        if let Some(max) = options.max_chapters {
            if state.chapters.len() >= max {
                info!(max_chapters = max, "chapter limit reached");
                return CrawlStatus::StoppedChapterLimit;
            }
        }
        if options.cancel.is_some_and(|c| c.load(Ordering::SeqCst)) {
            warn!(url = %url, "crawl interrupted");
            return CrawlStatus::StoppedInterrupted;
        }

        let chapter_no = state.chapters.len() + 1;
        info!(chapter = chapter_no, url = %url, "fetching chapter");

        let extracted = match self.fetcher.fetch(&url) {
            Ok(html) => {
                let chapter = self.extractor.extract(&html, &url);
                if chapter.is_none() {
                    warn!(chapter = chapter_no, url = %url, "page fetched but holds no chapter");
                }
                chapter
            }
            Err(e) => {
                warn!(chapter = chapter_no, url = %url, error = %e, "fetch failed");
                None
            }
        };

        match extracted {
            Some(chapter) => {
                let title = chapter.title.clone();
                state.chapters.push(chapter);
                state.consecutive_failures = 0;
                let count = state.chapters.len();
                info!(chapter = count, title = %title, "chapter saved");
                if let Some(progress) = options.progress {
                    progress(count, &title);
                }
                if count % options.checkpoint_interval.max(1) == 0 {
                    info!(chapter = count, "writing periodic checkpoint and document");
                    self.sink.persist(&state.chapters);
                }
            }
            None => {
                state.failed_urls.push(url.clone());
                state.consecutive_failures += 1;
                let limit = options.max_consecutive_failures.max(1);
                if state.consecutive_failures >= limit {
                    warn!(
                        consecutive_failures = state.consecutive_failures,
                        limit,
                        recent = ?&state.failed_urls[state.failed_urls.len().saturating_sub(limit as usize)..],
                        "failure limit reached; treating this as the end of the novel, though a \
                         transient network failure cannot be told apart from a missing chapter"
                    );
                    return CrawlStatus::StoppedFailureThreshold;
                }
            }
        }

        match next_chapter_url(&url) {
            Some(next) => {
                state.current_url = Some(next);
                CrawlStatus::Running
            }
            None => {
                info!(url = %url, "no chapter index in url; cannot derive next chapter");
                state.current_url = None;
                CrawlStatus::StoppedExhausted
            }
        }
    }
}

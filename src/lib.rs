//! novelcrawl: sequential web-novel chapter crawler with retry, checkpointing and EPUB output.

pub mod artifacts;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod crawl;
pub mod epub;
pub mod logging;
pub mod model;

// Re-exports for CLI and consumers.
pub use artifacts::Artifacts;
pub use checkpoint::{load_checkpoint, missing_chapter_ranges, write_checkpoint, CheckpointError};
pub use crawl::{
    ChapterExtractor, CrawlError, CrawlOptions, CrawlReport, CrawlState, CrawlStatus, Crawler,
    PageFetcher, Persist, PoliteClient, PoliteClientBuilder, Selectors,
};
pub use epub::{build_document, write_epub, EpubDocument, EpubError};
pub use model::{Chapter, CheckpointRecord, NovelInfo};

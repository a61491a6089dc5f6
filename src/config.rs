//! Optional config file loading. Search order: explicit `--config` path, ./novelcrawl.toml,
//! then $XDG_CONFIG_HOME/novelcrawl/config.toml (or ~/.config/novelcrawl/config.toml).

use crate::crawl::Selectors;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Config file contents. All fields optional; only present keys override defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// Text file whose first non-comment line is the start URL.
    pub url_file: Option<PathBuf>,
    /// EPUB output path.
    pub output: Option<PathBuf>,
    /// Checkpoint JSON path.
    pub checkpoint: Option<PathBuf>,
    /// Persistent log file (appended).
    pub log_file: Option<PathBuf>,
    /// HTTP User-Agent header.
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Attempts per chapter page (default 3).
    pub max_retries: Option<u32>,
    /// Consecutive fetch-or-parse failures that end the crawl (default 2).
    pub max_consecutive_failures: Option<u32>,
    /// Stop after this many chapters (default unlimited).
    pub max_chapters: Option<usize>,
    /// Chapters between checkpoint and EPUB rewrites (default 5).
    pub checkpoint_interval: Option<usize>,
    /// E-book title.
    pub title: Option<String>,
    /// E-book author.
    pub author: Option<String>,
    /// E-book language tag (default "en").
    pub language: Option<String>,
    /// Put the table of contents at the front of the reading order (default: true).
    pub toc_page: Option<bool>,
    /// Site-specific CSS selectors.
    pub selectors: Option<SelectorConfig>,
}

/// `[selectors]` table. Missing keys keep the built-in selector.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct SelectorConfig {
    pub nav_title: Option<String>,
    pub heading: Option<String>,
    pub line_text: Option<String>,
    pub post_content: Option<String>,
    pub paragraph: Option<String>,
}

impl SelectorConfig {
    /// Overlay the configured selectors on `base`.
    pub fn apply(&self, base: Selectors) -> Selectors {
        Selectors {
            nav_title: self.nav_title.clone().unwrap_or(base.nav_title),
            heading: self.heading.clone().unwrap_or(base.heading),
            line_text: self.line_text.clone().unwrap_or(base.line_text),
            post_content: self.post_content.clone().unwrap_or(base.post_content),
            paragraph: self.paragraph.clone().unwrap_or(base.paragraph),
        }
    }
}

fn read_config(path: &Path) -> Result<Config, String> {
    let s = std::fs::read_to_string(path)
        .map_err(|e| format!("Cannot read config {}: {}", path.display(), e))?;
    toml::from_str(&s).map_err(|e| format!("Invalid config {}: {}", path.display(), e))
}

/// An explicit path must exist. Otherwise search (1) ./novelcrawl.toml,
/// (2) $XDG_CONFIG_HOME/novelcrawl/config.toml.
/// Missing file returns Ok(None). Invalid TOML or I/O error reading a present file returns Err.
pub fn load_config(explicit: Option<&Path>) -> Result<Option<Config>, String> {
    if let Some(path) = explicit {
        return read_config(path).map(Some);
    }
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Cannot determine current directory: {}", e))?;
    let mut paths = vec![cwd.join("novelcrawl.toml")];
    if let Some(d) = dirs::config_dir() {
        paths.push(d.join("novelcrawl").join("config.toml"));
    }
    for path in &paths {
        if path.exists() {
            return read_config(path).map(Some);
        }
    }
    Ok(None)
}

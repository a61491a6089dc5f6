//! Chapter extraction. Validates a fetched page and turns it into a [`Chapter`].
//!
//! Extraction only talks to the page through [`PageTree`], so the resolution rules below do
//! not depend on the HTML parser.

use super::error::CrawlError;
use super::sequence::chapter_index;
use crate::model::{Chapter, UNKNOWN_EDITOR, UNKNOWN_TITLE};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};

const EDITOR_PREFIX: &str = "Edited:";
/// Fallback paragraphs shorter than this (in chars) are treated as navigation noise.
const MIN_FALLBACK_PARAGRAPH_CHARS: usize = 10;

/// Text queries over a parsed page.
pub trait PageTree {
    /// Text of the first element matching `selector`, in document order.
    fn find_first_text(&self, selector: &str) -> Option<String>;

    /// Text of every element matching `selector`, in document order.
    fn find_all_text(&self, selector: &str) -> Vec<String>;

    /// Text of every `selector` match inside the first `container` match.
    /// `None` when no container exists.
    fn find_all_text_within(&self, container: &str, selector: &str) -> Option<Vec<String>>;
}

/// [`PageTree`] over a `scraper` document.
pub struct HtmlPage {
    doc: Html,
}

impl HtmlPage {
    pub fn parse(html: &str) -> Self {
        Self {
            doc: Html::parse_document(html),
        }
    }

    fn selector(selector: &str) -> Option<Selector> {
        match Selector::parse(selector) {
            Ok(s) => Some(s),
            Err(e) => {
                warn!(selector, error = %e, "ignoring invalid selector");
                None
            }
        }
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>()
}

impl PageTree for HtmlPage {
    fn find_first_text(&self, selector: &str) -> Option<String> {
        let sel = Self::selector(selector)?;
        self.doc.select(&sel).next().map(element_text)
    }

    fn find_all_text(&self, selector: &str) -> Vec<String> {
        match Self::selector(selector) {
            Some(sel) => self.doc.select(&sel).map(element_text).collect(),
            None => Vec::new(),
        }
    }

    fn find_all_text_within(&self, container: &str, selector: &str) -> Option<Vec<String>> {
        let container_sel = Self::selector(container)?;
        let item_sel = Self::selector(selector)?;
        let root = self.doc.select(&container_sel).next()?;
        Some(root.select(&item_sel).map(element_text).collect())
    }
}

/// Site-specific CSS selectors used to locate chapter parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selectors {
    /// Dedicated chapter navigation title.
    pub nav_title: String,
    /// Generic headings, first match in document order is the fallback title.
    pub heading: String,
    /// Marker for plain-text line elements; when present these are the body.
    pub line_text: String,
    /// Post content container.
    pub post_content: String,
    /// Paragraph-level elements.
    pub paragraph: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            nav_title: "h3.chapter-title".to_string(),
            heading: "h1, h2, h3, h4, h5, h6".to_string(),
            line_text: ".pr-line-text".to_string(),
            post_content: "div.chapter-body".to_string(),
            paragraph: "p".to_string(),
        }
    }
}

/// Which body source produced the paragraphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodySource {
    LineText,
    PostContent,
    AllParagraphs,
}

/// Turns raw page content into a [`Chapter`], or `None` when the page holds no chapter.
#[derive(Debug, Clone)]
pub struct ChapterExtractor {
    selectors: Selectors,
}

impl ChapterExtractor {
    /// Validate every selector up front so extraction never trips over a bad one.
    pub fn new(selectors: Selectors) -> Result<Self, CrawlError> {
        for sel in [
            &selectors.nav_title,
            &selectors.heading,
            &selectors.line_text,
            &selectors.post_content,
            &selectors.paragraph,
        ] {
            Selector::parse(sel).map_err(|e| CrawlError::InvalidSelector {
                selector: sel.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(Self { selectors })
    }

    /// Parse `html` and extract a chapter fetched from `source_url`.
    pub fn extract(&self, html: &str, source_url: &str) -> Option<Chapter> {
        let page = HtmlPage::parse(html);
        self.extract_from(&page, source_url)
    }

    /// Extract from an already parsed page.
    ///
    /// Returns `None` when no body source yields a non-empty paragraph. A missing title or
    /// editor never causes a failure.
    pub fn extract_from(&self, page: &dyn PageTree, source_url: &str) -> Option<Chapter> {
        let Some((source, body_paragraphs)) = self.resolve_body(page) else {
            warn!(url = source_url, "no chapter paragraphs found");
            return None;
        };
        let title = self.resolve_title(page);
        let edited_by = self.resolve_editor(page);
        info!(title = %title, paragraphs = body_paragraphs.len(), "extracted chapter");
        debug!(url = source_url, ?source, editor = %edited_by, "chapter body source");
        Some(Chapter {
            source_url: source_url.to_string(),
            chapter_number: chapter_index(source_url),
            title,
            edited_by,
            body_paragraphs,
        })
    }

    fn resolve_title(&self, page: &dyn PageTree) -> String {
        page.find_first_text(&self.selectors.nav_title)
            .into_iter()
            .chain(page.find_all_text(&self.selectors.heading))
            .map(|t| t.trim().to_string())
            .find(|t| !t.is_empty())
            .unwrap_or_else(|| UNKNOWN_TITLE.to_string())
    }

    fn resolve_editor(&self, page: &dyn PageTree) -> String {
        page.find_all_text(&self.selectors.paragraph)
            .iter()
            .map(|t| t.trim())
            .find_map(|t| t.strip_prefix(EDITOR_PREFIX))
            .map(|rest| rest.trim().to_string())
            .filter(|editor| !editor.is_empty())
            .unwrap_or_else(|| UNKNOWN_EDITOR.to_string())
    }

    fn resolve_body(&self, page: &dyn PageTree) -> Option<(BodySource, Vec<String>)> {
        let lines = clean_paragraphs(page.find_all_text(&self.selectors.line_text));
        if !lines.is_empty() {
            return Some((BodySource::LineText, lines));
        }

        if let Some(texts) =
            page.find_all_text_within(&self.selectors.post_content, &self.selectors.paragraph)
        {
            let paragraphs = clean_paragraphs(texts);
            return (!paragraphs.is_empty()).then_some((BodySource::PostContent, paragraphs));
        }

        let paragraphs: Vec<String> = clean_paragraphs(page.find_all_text(&self.selectors.paragraph))
            .into_iter()
            .filter(|p| !p.starts_with('[') && p.chars().count() >= MIN_FALLBACK_PARAGRAPH_CHARS)
            .collect();
        (!paragraphs.is_empty()).then_some((BodySource::AllParagraphs, paragraphs))
    }
}

fn clean_paragraphs(texts: Vec<String>) -> Vec<String> {
    texts
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

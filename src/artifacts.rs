//! Output artifacts written on every checkpoint trigger: the JSON checkpoint and the EPUB.

use crate::checkpoint::write_checkpoint;
use crate::crawl::Persist;
use crate::epub::write_epub;
use crate::model::{Chapter, NovelInfo};
use std::path::PathBuf;
use tracing::{error, info};

/// Writes the checkpoint and rebuilds the EPUB from the full chapter list.
///
/// Write errors are logged and swallowed; the next trigger tries again.
#[derive(Debug, Clone)]
pub struct Artifacts {
    pub checkpoint_path: PathBuf,
    pub document_path: PathBuf,
    pub info: NovelInfo,
    pub toc_page: bool,
}

impl Persist for Artifacts {
    fn persist(&mut self, chapters: &[Chapter]) {
        match write_checkpoint(&self.checkpoint_path, chapters) {
            Ok(()) => info!(
                path = %self.checkpoint_path.display(),
                chapters = chapters.len(),
                "checkpoint saved"
            ),
            Err(e) => error!(error = %e, "checkpoint write failed"),
        }
        match write_epub(&self.document_path, &self.info, chapters, self.toc_page) {
            Ok(()) => info!(
                path = %self.document_path.display(),
                chapters = chapters.len(),
                "epub saved"
            ),
            Err(e) => error!(error = %e, "epub write failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::load_checkpoint;
    use std::error::Error;

    fn chapters(n: usize) -> Vec<Chapter> {
        (1..=n)
            .map(|i| Chapter {
                source_url: format!("https://example.com/novel/chapter-{}", i),
                chapter_number: Some(i as u64),
                title: format!("Chapter {}", i),
                edited_by: "Unknown".to_string(),
                body_paragraphs: vec!["Hello".to_string()],
            })
            .collect()
    }

    #[test]
    fn persist_writes_both_files() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let mut artifacts = Artifacts {
            checkpoint_path: dir.path().join("crawl_checkpoint.json"),
            document_path: dir.path().join("novel_output.epub"),
            info: NovelInfo::new("https://example.com/novel/chapter-1"),
            toc_page: true,
        };
        artifacts.persist(&chapters(2));
        artifacts.persist(&chapters(3));
        assert_eq!(load_checkpoint(&artifacts.checkpoint_path)?.chapter_count, 3);
        assert!(std::fs::metadata(&artifacts.document_path)?.len() > 0);
        Ok(())
    }

    #[test]
    fn checkpoint_failure_does_not_block_document() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let mut artifacts = Artifacts {
            checkpoint_path: dir.path().join("missing-dir").join("checkpoint.json"),
            document_path: dir.path().join("novel_output.epub"),
            info: NovelInfo::new("urn:test"),
            toc_page: false,
        };
        artifacts.persist(&chapters(1));
        assert!(!artifacts.checkpoint_path.exists());
        assert!(artifacts.document_path.exists());
        Ok(())
    }
}

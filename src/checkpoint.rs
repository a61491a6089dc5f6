//! Checkpoint file: a full JSON snapshot of every chapter fetched so far, rewritten
//! atomically on each trigger. Also the missing-chapter report built from one.

use crate::model::{Chapter, CheckpointRecord};
use std::io::Write;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Cannot write checkpoint {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot read checkpoint {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid checkpoint JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Write `bytes` to `path` through a sibling temp file and a rename, so readers only ever
/// see the previous file or the complete new one.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    {
        let mut f = std::fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp, path)
}

/// Snapshot `chapters` (with the current timestamp) to `path`, replacing any prior file.
pub fn write_checkpoint(path: &Path, chapters: &[Chapter]) -> Result<(), CheckpointError> {
    let record = CheckpointRecord::new(chapters);
    let json = serde_json::to_vec_pretty(&record)?;
    write_atomic(path, &json).map_err(|e| CheckpointError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

pub fn load_checkpoint(path: &Path) -> Result<CheckpointRecord, CheckpointError> {
    let f = std::fs::File::open(path).map_err(|e| CheckpointError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(serde_json::from_reader(std::io::BufReader::new(f))?)
}

/// Chapter numbers missing between the lowest and highest captured number, grouped into
/// consecutive ranges. Chapters without a number are ignored.
pub fn missing_chapter_ranges(chapters: &[Chapter]) -> Vec<RangeInclusive<u64>> {
    let mut numbers: Vec<u64> = chapters.iter().filter_map(|c| c.chapter_number).collect();
    numbers.sort_unstable();
    numbers.dedup();
    numbers
        .windows(2)
        .filter(|w| w[1] > w[0] + 1)
        .map(|w| (w[0] + 1)..=(w[1] - 1))
        .collect()
}

/// Render ranges as "Chapter 5" or "Chapters 7-9", one per line.
pub fn format_ranges(ranges: &[RangeInclusive<u64>]) -> String {
    ranges
        .iter()
        .map(|r| {
            if r.start() == r.end() {
                format!("Chapter {}", r.start())
            } else {
                format!("Chapters {}-{}", r.start(), r.end())
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

//! Debug metadata (`ai-<flow>.json`) left by maestro under its tests directory

use super::types::FlowMetadata;
use anyhow::{Context, Result};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Names of per-run directories, e.g. `2024-05-01_134501`
const TIMESTAMP_DIR_PATTERN: &str = r"^\d{4}-\d{2}-\d{2}_\d{6}$";

/// Parse one metadata file. Any read, JSON or shape failure yields `None`.
pub fn parse_flow_metadata(path: &Path) -> Option<FlowMetadata> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            log::warn!("Failed to read {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str::<FlowMetadata>(&content) {
        Ok(metadata) => Some(metadata),
        Err(e) => {
            log::warn!("Skipping metadata {}: {}", path.display(), e);
            None
        }
    }
}

/// Metadata joined across every timestamp directory
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MetadataIndex {
    /// Flow name to the most recent `flow_file_path`
    paths: HashMap<String, String>,
    /// Flow name to the number of timestamp directories it appears in
    counts: HashMap<String, u32>,
}

impl MetadataIndex {
    pub fn flow_file_path(&self, flow_name: &str) -> Option<&str> {
        self.paths.get(flow_name).map(String::as_str)
    }

    pub fn occurrences(&self, flow_name: &str) -> u32 {
        self.counts.get(flow_name).copied().unwrap_or(0)
    }

    /// Runs beyond the first. Counts every timestamp directory, including
    /// stale ones from earlier jobs sharing the tests directory.
    pub fn retry_count(&self, flow_name: &str) -> u32 {
        self.occurrences(flow_name).saturating_sub(1)
    }

    fn record_directory(&mut self, entries: Vec<FlowMetadata>) {
        let mut seen_here = std::collections::HashSet::new();
        for metadata in entries {
            if seen_here.insert(metadata.flow_name.clone()) {
                *self.counts.entry(metadata.flow_name.clone()).or_insert(0) += 1;
            }
            self.paths.insert(metadata.flow_name, metadata.flow_file_path);
        }
    }
}

/// Scan `tests_dir` in chronological order. A missing directory gives an
/// empty index.
pub fn collect_metadata(tests_dir: &Path) -> Result<MetadataIndex> {
    let mut index = MetadataIndex::default();
    if !tests_dir.is_dir() {
        log::debug!("No maestro tests directory at {}", tests_dir.display());
        return Ok(index);
    }

    for dir in timestamp_dirs(tests_dir)? {
        let entries: Vec<FlowMetadata> = metadata_files(&dir)
            .iter()
            .filter_map(|file| parse_flow_metadata(file))
            .collect();
        index.record_directory(entries);
    }
    Ok(index)
}

/// Immediate subdirectories named like a timestamp, oldest first
fn timestamp_dirs(tests_dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = Regex::new(TIMESTAMP_DIR_PATTERN)?;
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(tests_dir)
        .with_context(|| format!("Failed to list {}", tests_dir.display()))?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| pattern.is_match(n))
        })
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn metadata_files(dir: &Path) -> Vec<PathBuf> {
    let read = match std::fs::read_dir(dir) {
        Ok(read) => read,
        Err(e) => {
            log::warn!("Failed to list {}: {}", dir.display(), e);
            return Vec::new();
        }
    };
    let mut files: Vec<PathBuf> = read
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.starts_with("ai-") && n.ends_with(".json"))
        })
        .collect();
    files.sort();
    files
}

//! Turns a session directory into passages.

use std::path::Path;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    chunking::{ChunkingConfig, Passage, chunk_document},
    config::Deadline,
    error::{Error, Result},
    extract::{Extractors, Format},
    walker::{self, DiscoveredFile},
};

/// A file that was left out of a load, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadWarning {
    pub name: String,
    pub reason: String,
}

/// Passages of every readable file, plus the files that were skipped.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub passages: Vec<Passage>,
    pub warnings: Vec<LoadWarning>,
    /// Files that produced at least one passage.
    pub loaded_files: usize,
}

/// Extract and chunk every supported file under `dir`.
///
/// Files with an unsupported extension are ignored. Files that fail to
/// extract are reported in [`LoadReport::warnings`] and do not fail the
/// load. Passages come out in walk order, then by position.
pub fn load_all(
    dir: &Path,
    extractors: &Extractors,
    chunking: &ChunkingConfig,
    deadline: &Deadline,
) -> Result<LoadReport> {
    let files: Vec<(DiscoveredFile, Format)> = walker::discover_files(dir)?
        .into_iter()
        .filter_map(|file| {
            let (format, _) = extractors.for_path(&file.relative_path)?;
            Some((file, format))
        })
        .collect();
    debug!(dir = %dir.display(), files = files.len(), "loading session");

    // Extract in parallel; collect keeps the walk order.
    let loaded: Vec<(String, Result<Vec<Passage>>)> = files
        .par_iter()
        .map(|(file, format)| {
            let outcome = deadline.check().and_then(|()| {
                let raw = extractors.extract(&file.absolute_path, *format)?;
                Ok(chunk_document(&raw, chunking))
            });
            (file.file_name(), outcome)
        })
        .collect();

    let mut report = LoadReport::default();
    for (name, outcome) in loaded {
        match outcome {
            Ok(passages) => {
                debug!(file = %name, passages = passages.len(), "extracted");
                if !passages.is_empty() {
                    report.loaded_files += 1;
                }
                report.passages.extend(passages);
            }
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                warn!(file = %name, error = %e, "skipping file");
                report.warnings.push(LoadWarning {
                    name,
                    reason: skip_reason(&e),
                });
            }
        }
    }

    deadline.check()?;
    Ok(report)
}

fn skip_reason(err: &Error) -> String {
    match err {
        Error::Extraction { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

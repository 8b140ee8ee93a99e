// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Source enumeration.
//!
//! Resolves the configured input into the immutable set of things the
//! producer pool will emit: a synthetic byte budget, or an ordered list of
//! regular files. Directory traversal is sorted so the same tree always
//! yields the same order.

use std::path::{Path, PathBuf};

use jwalk::WalkDir;

use crate::config::{RunConfiguration, SourceMode};
use crate::error::{FloodError, FloodResult};
use crate::types::ChunkSize;

/// What a run reads. Built once at run start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSet {
    /// Generate `target_bytes` in chunks of `chunk_size`.
    Synthetic {
        target_bytes: u64,
        chunk_size: ChunkSize,
    },
    /// Read each file in order, in chunks of `chunk_size`.
    Files {
        paths: Vec<PathBuf>,
        chunk_size: ChunkSize,
    },
}

impl SourceSet {
    /// Number of files that will be read (zero for synthetic sources).
    pub fn file_count(&self) -> usize {
        match self {
            Self::Synthetic { .. } => 0,
            Self::Files { paths, .. } => paths.len(),
        }
    }
}

/// Resolve the run's input.
///
/// In filesystem mode a missing source fails here, before any producer exists.
pub fn enumerate(config: &RunConfiguration) -> FloodResult<SourceSet> {
    match config.source_mode {
        SourceMode::Synthetic => Ok(SourceSet::Synthetic {
            target_bytes: config.synthetic_size_bytes,
            chunk_size: config.chunk_size,
        }),
        SourceMode::Filesystem => {
            let paths = discover_files(&config.source_path())?;
            Ok(SourceSet::Files {
                paths,
                chunk_size: config.chunk_size,
            })
        }
    }
}

/// Collect the regular files at or beneath `root`, sorted by path.
pub fn discover_files(root: &Path) -> FloodResult<Vec<PathBuf>> {
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }
    if !root.is_dir() {
        return Err(FloodError::SourceNotFound {
            path: root.to_path_buf(),
        });
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort(true) {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
            let source = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("directory walk failed"));
            FloodError::io("walking source directory", path, source)
        })?;

        if entry.file_type().is_file() {
            files.push(entry.path());
        }
    }

    // jwalk sorts siblings; a full sort makes the order independent of walk shape.
    files.sort();

    tracing::debug!(root = %root.display(), files = files.len(), "Discovered source files");
    Ok(files)
}

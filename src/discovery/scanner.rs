//! Audio file discovery

use crate::error::{BeatkeyError, Result};
use crate::types::AudioFormat;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// An audio file found on disk
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub format: AudioFormat,
    pub size_bytes: u64,
}

/// Find the audio files under `input`
///
/// A file input must itself have a supported extension. Directory results
/// are sorted by path so batch output is stable between runs; unreadable
/// entries are logged and passed over.
pub fn scan(input: &Path, recursive: bool) -> Result<Vec<DiscoveredFile>> {
    if !input.exists() {
        return Err(BeatkeyError::FileNotFound(input.to_path_buf()));
    }

    if input.is_file() {
        return DiscoveredFile::from_path(input)
            .map(|file| vec![file])
            .ok_or_else(|| BeatkeyError::UnsupportedFormat {
                path: input.to_path_buf(),
                format: input
                    .extension()
                    .map(|e| e.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "none".to_string()),
            });
    }

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files: Vec<DiscoveredFile> = WalkDir::new(input)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("Unreadable entry under {}: {}", input.display(), e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| DiscoveredFile::from_path(entry.path()))
        .collect();
    files.sort_by(|a, b| a.path.cmp(&b.path));

    if files.is_empty() {
        warn!("No supported audio files found in {}", input.display());
    } else {
        info!("Discovered {} audio files in {}", files.len(), input.display());
    }

    Ok(files)
}

impl DiscoveredFile {
    /// `None` unless `path` has a supported extension and readable metadata
    fn from_path(path: &Path) -> Option<Self> {
        let format = AudioFormat::from_extension(path.extension()?.to_str()?)?;
        let size_bytes = std::fs::metadata(path).ok()?.len();
        Some(Self {
            path: path.to_path_buf(),
            format,
            size_bytes,
        })
    }
}

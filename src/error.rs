//! Unified error types for beatkey
//!
//! Error strategy:
//! - Analysis errors (invalid waveform, indeterminate key/tempo, window out of
//!   range): recoverable, the orchestrator folds them into a partial report
//! - Per-file errors (decode, unsupported format): recoverable, skip the file
//! - Admission errors (busy, timeout, worker failure): reported to the caller
//! - System errors (output, configuration): fatal, abort the batch

use std::path::PathBuf;
use thiserror::Error;

/// Supported audio formats for helpful error messages
pub const SUPPORTED_FORMATS: &str = "MP3, WAV, FLAC, AIFF, OGG";

/// Top-level error type for beatkey operations
#[derive(Debug, Error)]
pub enum BeatkeyError {
    // =========================================================================
    // Analysis errors - recoverable, become partial reports
    // =========================================================================
    #[error("Invalid waveform: {reason}")]
    InvalidWaveform { reason: String },

    #[error("Indeterminate key: {reason}")]
    IndeterminateKey { reason: String },

    #[error("Indeterminate tempo: {reason}")]
    IndeterminateTempo { reason: String },

    #[error("Window {start:.2}s-{end:.2}s is outside the {duration:.2}s signal")]
    WindowOutOfRange { start: f64, end: f64, duration: f64 },

    // =========================================================================
    // Per-file errors - skip file, continue batch
    // =========================================================================
    #[error("Failed to decode audio file '{path}': {reason}\n  Supported formats: {SUPPORTED_FORMATS}\n  Tip: If the file plays in other apps, it may be corrupted or use an unsupported codec")]
    DecodeError { path: PathBuf, reason: String },

    #[error("Unsupported audio format for '{path}': {format}\n  Supported formats: {SUPPORTED_FORMATS}")]
    UnsupportedFormat { path: PathBuf, format: String },

    #[error("File not found: '{0}'\n  Tip: Check the path exists and is accessible")]
    FileNotFound(PathBuf),

    // =========================================================================
    // Admission and execution errors
    // =========================================================================
    #[error("Analysis queue is full ({in_flight} of {capacity} slots in use), try again later")]
    Busy { in_flight: usize, capacity: usize },

    #[error("Analysis did not finish within {seconds:.1}s")]
    Timeout { seconds: f64 },

    #[error("Analysis cancelled after its caller stopped waiting")]
    Cancelled,

    #[error("Analysis worker failed: {reason}")]
    WorkerFailed { reason: String },

    // =========================================================================
    // Fatal errors - abort entire batch
    // =========================================================================
    #[error("Cannot write output to '{path}': {reason}\n  Tip: Check write permissions for the output directory")]
    OutputError { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for beatkey operations
pub type Result<T> = std::result::Result<T, BeatkeyError>;

impl BeatkeyError {
    /// Returns true for the analysis errors that the orchestrator turns into
    /// an indeterminate part of a report instead of failing the analysis
    pub fn is_indeterminate(&self) -> bool {
        matches!(
            self,
            BeatkeyError::InvalidWaveform { .. }
                | BeatkeyError::IndeterminateKey { .. }
                | BeatkeyError::IndeterminateTempo { .. }
                | BeatkeyError::WindowOutOfRange { .. }
        )
    }

    /// Returns true if this error is recoverable (should skip file, continue batch)
    pub fn is_recoverable(&self) -> bool {
        self.is_indeterminate()
            || matches!(
                self,
                BeatkeyError::DecodeError { .. }
                    | BeatkeyError::UnsupportedFormat { .. }
                    | BeatkeyError::FileNotFound(_)
                    | BeatkeyError::Timeout { .. }
                    | BeatkeyError::Cancelled
                    | BeatkeyError::WorkerFailed { .. }
            )
    }

    pub fn invalid_waveform(reason: impl Into<String>) -> Self {
        BeatkeyError::InvalidWaveform {
            reason: reason.into(),
        }
    }

    pub fn indeterminate_key(reason: impl Into<String>) -> Self {
        BeatkeyError::IndeterminateKey {
            reason: reason.into(),
        }
    }

    pub fn indeterminate_tempo(reason: impl Into<String>) -> Self {
        BeatkeyError::IndeterminateTempo {
            reason: reason.into(),
        }
    }

    /// Create a decode error with context about the issue
    pub fn decode_error(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        BeatkeyError::DecodeError {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an output error, checking for common issues
    pub fn output_error(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        let path = path.into();
        let reason = match err.kind() {
            std::io::ErrorKind::PermissionDenied => {
                format!("Permission denied. Check that you have write access to {}", path.display())
            }
            std::io::ErrorKind::NotFound => {
                format!(
                    "Directory does not exist: {}",
                    path.parent().map(|p| p.display().to_string()).unwrap_or_default()
                )
            }
            _ => err.to_string(),
        };
        BeatkeyError::OutputError { path, reason }
    }
}

/// Extension trait for adding context to errors
pub trait ErrorContext<T> {
    /// Attach the file being processed to a decoding failure
    fn with_file_context(self, path: &std::path::Path) -> Result<T>;
}

impl<T, E: std::fmt::Display> ErrorContext<T> for std::result::Result<T, E> {
    fn with_file_context(self, path: &std::path::Path) -> Result<T> {
        self.map_err(|e| BeatkeyError::DecodeError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analysis_errors_are_indeterminate() {
        assert!(BeatkeyError::indeterminate_key("flat chroma").is_indeterminate());
        assert!(BeatkeyError::indeterminate_tempo("no onsets").is_indeterminate());
        assert!(BeatkeyError::invalid_waveform("empty").is_indeterminate());
        assert!(BeatkeyError::WindowOutOfRange {
            start: 35.0,
            end: 60.0,
            duration: 10.0
        }
        .is_indeterminate());
    }

    #[test]
    fn test_admission_errors_are_not_indeterminate() {
        let busy = BeatkeyError::Busy {
            in_flight: 5,
            capacity: 5,
        };
        assert!(!busy.is_indeterminate());
        assert!(!busy.is_recoverable());
        assert!(BeatkeyError::Timeout { seconds: 1.0 }.is_recoverable());
        assert!(BeatkeyError::Cancelled.is_recoverable());
        assert!(!BeatkeyError::Cancelled.is_indeterminate());
    }

    #[test]
    fn test_config_error_is_fatal() {
        let err = BeatkeyError::ConfigError("workers must be positive".into());
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("workers must be positive"));
    }

    #[test]
    fn test_file_context() {
        let result: std::result::Result<(), &str> = Err("bad header");
        let err = result.with_file_context(std::path::Path::new("beat.wav")).unwrap_err();
        match err {
            BeatkeyError::DecodeError { path, reason } => {
                assert_eq!(path, PathBuf::from("beat.wav"));
                assert_eq!(reason, "bad header");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

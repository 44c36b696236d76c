//! beatkey - musical key and tempo estimation
//!
//! Estimates the key of a piece of music (Krumhansl-Schmuckler profile
//! correlation over a constant-Q chromagram of the harmonic part) and its
//! tempo and beat positions (onset autocorrelation plus a dynamic-programming
//! beat tracker over the percussive part).
//!
//! # Architecture
//!
//! - `config`: CLI argument parsing and runtime settings
//! - `discovery`: File scanning
//! - `audio`: Audio decoding using symphonia
//! - `analysis`: STFT, harmonic/percussive separation, chroma, key and tempo
//! - `pipeline`: Single-track analysis, the worker pool, and the batch run
//! - `export`: Text summaries and JSON output
//!
//! # Example
//!
//! ```no_run
//! use beatkey::pipeline::{AnalysisOptions, Analyzer};
//!
//! let analyzer = Analyzer::new(AnalysisOptions::default());
//! let report = analyzer
//!     .analyze_file(std::path::Path::new("track.flac"))
//!     .expect("decode failed");
//! println!("{}", beatkey::export::summary(&report));
//! ```

pub mod analysis;
pub mod audio;
pub mod config;
pub mod discovery;
pub mod error;
pub mod export;
pub mod pipeline;
pub mod types;

// Re-export key types at crate root
pub use error::{BeatkeyError, Result};
pub use types::{
    AnalysisReport, Key, KeyEstimate, Mode, Outcome, PitchClass, TempoEstimate, TimeWindow,
    Waveform,
};

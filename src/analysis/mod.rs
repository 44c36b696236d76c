//! Audio analysis modules
//!
//! This module provides traits for analysis backends and concrete implementations.
//! The trait abstraction allows swapping backends without changing pipeline code.

pub mod chroma;
pub mod hpss;
pub mod key;
pub mod stft;
pub mod tempo;
pub mod traits;

pub use traits::{KeyDetector, Separator, TempoDetector};

pub use chroma::{extract_chroma, ChromaConfig, ChromaVector};
pub use hpss::{HpssConfig, MedianFilterSeparator, Separation};
pub use key::{estimate_key, AlternatePolicy, KeyOptions, KrumhanslKeyDetector};
pub use tempo::{estimate_tempo, BeatTrackTempoDetector, TempoOptions};

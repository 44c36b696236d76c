//! Analysis trait abstractions
//!
//! These traits define the interface for swappable analysis backends.
//! The orchestrator only talks to these, never to a concrete algorithm.

use crate::analysis::hpss::Separation;
use crate::error::Result;
use crate::types::{KeyEstimate, TempoEstimate, TimeWindow, Waveform};

/// Harmonic/percussive separation backend
pub trait Separator: Send + Sync {
    /// Split a waveform into harmonic and percussive components of equal length
    fn separate(&self, waveform: &Waveform) -> Result<Separation>;

    /// Get the name of this separator (for logging)
    fn name(&self) -> &'static str;
}

/// Musical key detection backend
pub trait KeyDetector: Send + Sync {
    /// Detect the key of the (harmonic) waveform inside `window`
    fn detect(&self, waveform: &Waveform, window: TimeWindow) -> Result<KeyEstimate>;

    /// Get the name of this detector (for logging)
    fn name(&self) -> &'static str;
}

/// Tempo and beat detection backend
pub trait TempoDetector: Send + Sync {
    /// Detect tempo and beat positions from the (percussive) waveform
    fn detect(&self, waveform: &Waveform) -> Result<TempoEstimate>;

    /// Get the name of this detector (for logging)
    fn name(&self) -> &'static str;
}

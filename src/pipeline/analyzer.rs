//! Single-waveform analysis
//!
//! Lead-in trim, harmonic/percussive separation, then key from the harmonic
//! part and tempo from the percussive part. Analysis failures never abort
//! the report: each half degrades to an indeterminate outcome on its own.

use crate::analysis::{
    BeatTrackTempoDetector, ChromaConfig, HpssConfig, KeyDetector, KeyOptions,
    KrumhanslKeyDetector, MedianFilterSeparator, Separator, TempoDetector, TempoOptions,
};
use crate::audio;
use crate::error::{BeatkeyError, Result};
use crate::types::{AnalysisReport, KeyEstimate, Outcome, TempoEstimate, TimeWindow, Waveform};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Everything one analysis needs to know
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOptions {
    /// Seconds dropped from the start of the track before any analysis
    pub lead_in_seconds: f64,
    /// Key window, relative to the end of the lead-in
    pub key_window: TimeWindow,
    pub tempo: TempoOptions,
    pub key: KeyOptions,
    pub chroma: ChromaConfig,
    pub hpss: HpssConfig,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            lead_in_seconds: 30.0,
            key_window: TimeWindow {
                start: Some(35.0),
                end: Some(60.0),
            },
            tempo: TempoOptions::default(),
            key: KeyOptions::default(),
            chroma: ChromaConfig::default(),
            hpss: HpssConfig::default(),
        }
    }
}

impl AnalysisOptions {
    pub fn validate(&self) -> Result<()> {
        if !self.lead_in_seconds.is_finite() || self.lead_in_seconds < 0.0 {
            return Err(BeatkeyError::ConfigError(format!(
                "lead-in must be a non-negative number of seconds, got {}",
                self.lead_in_seconds
            )));
        }
        // Re-run the window checks in case the fields were set directly
        TimeWindow::new(self.key_window.start, self.key_window.end)?;
        if !(self.key.alternate_ratio > 0.0 && self.key.alternate_ratio <= 1.0) {
            return Err(BeatkeyError::ConfigError(format!(
                "alternate key ratio must be in (0, 1], got {}",
                self.key.alternate_ratio
            )));
        }
        self.tempo.validate()
    }
}

/// Key and tempo analysis over pluggable backends
pub struct Analyzer {
    options: AnalysisOptions,
    separator: Arc<dyn Separator>,
    key_detector: Arc<dyn KeyDetector>,
    tempo_detector: Arc<dyn TempoDetector>,
}

impl Analyzer {
    /// Analyzer with the median-filter, Krumhansl and DP beat-tracking backends
    pub fn new(options: AnalysisOptions) -> Self {
        let separator = Arc::new(MedianFilterSeparator::new(options.hpss));
        let key_detector = Arc::new(KrumhanslKeyDetector::new(options.chroma, options.key));
        let tempo_detector = Arc::new(BeatTrackTempoDetector::new(options.tempo));
        Self::with_backends(options, separator, key_detector, tempo_detector)
    }

    pub fn with_backends(
        options: AnalysisOptions,
        separator: Arc<dyn Separator>,
        key_detector: Arc<dyn KeyDetector>,
        tempo_detector: Arc<dyn TempoDetector>,
    ) -> Self {
        Self {
            options,
            separator,
            key_detector,
            tempo_detector,
        }
    }

    pub fn options(&self) -> &AnalysisOptions {
        &self.options
    }

    /// Analyze a waveform; always yields a report
    pub fn analyze(&self, waveform: &Waveform) -> AnalysisReport {
        let (tempo, key) = self
            .analyze_parts(waveform, &|| false)
            .unwrap_or_else(|e| {
                let reason = e.to_string();
                (Outcome::indeterminate(reason.clone()), Outcome::indeterminate(reason))
            });
        self.report(waveform, tempo, key)
    }

    /// Like [`Analyzer::analyze`], but gives up with `Cancelled` at the next
    /// stage boundary once `is_cancelled` returns true
    pub fn analyze_cancellable(
        &self,
        waveform: &Waveform,
        is_cancelled: &dyn Fn() -> bool,
    ) -> Result<AnalysisReport> {
        let (tempo, key) = self.analyze_parts(waveform, is_cancelled)?;
        Ok(self.report(waveform, tempo, key))
    }

    /// Decode a file and analyze it; decoding failures are errors
    pub fn analyze_file(&self, path: &Path) -> Result<AnalysisReport> {
        self.analyze_file_cancellable(path, &|| false)
    }

    pub fn analyze_file_cancellable(
        &self,
        path: &Path,
        is_cancelled: &dyn Fn() -> bool,
    ) -> Result<AnalysisReport> {
        debug!("Analyzing: {}", path.display());
        let waveform = audio::decode(path)?;
        let mut report = self.analyze_cancellable(&waveform, is_cancelled)?;
        report.source = Some(path.to_path_buf());
        Ok(report)
    }

    fn report(
        &self,
        waveform: &Waveform,
        tempo: Outcome<TempoEstimate>,
        key: Outcome<KeyEstimate>,
    ) -> AnalysisReport {
        AnalysisReport {
            source: None,
            duration_seconds: waveform.duration_seconds(),
            sample_rate: waveform.sample_rate,
            tempo,
            key,
            analyzed_at: chrono::Utc::now(),
        }
    }

    /// Only cancellation is an error here; analysis failures degrade the
    /// affected outcome
    fn analyze_parts(
        &self,
        waveform: &Waveform,
        is_cancelled: &dyn Fn() -> bool,
    ) -> Result<(Outcome<TempoEstimate>, Outcome<KeyEstimate>)> {
        let checkpoint = |stage: &str| {
            if is_cancelled() {
                debug!("Analysis cancelled before {}", stage);
                Err(BeatkeyError::Cancelled)
            } else {
                Ok(())
            }
        };

        if let Err(e) = waveform.validate() {
            let reason = degrade(&e, "waveform");
            return Ok((Outcome::indeterminate(reason.clone()), Outcome::indeterminate(reason)));
        }

        let lead_in = TimeWindow {
            start: Some(self.options.lead_in_seconds),
            end: None,
        }
        .resolve(waveform.sample_rate, waveform.len());

        if lead_in.is_empty() {
            let e = BeatkeyError::WindowOutOfRange {
                start: self.options.lead_in_seconds,
                end: waveform.duration_seconds(),
                duration: waveform.duration_seconds(),
            };
            let reason = degrade(&e, "lead-in");
            return Ok((Outcome::indeterminate(reason.clone()), Outcome::indeterminate(reason)));
        }

        checkpoint("separation")?;
        let body = waveform.slice(&lead_in);
        debug!(
            "Lead-in {:.1}s removed, analysing {:.1}s",
            self.options.lead_in_seconds,
            body.duration_seconds()
        );

        let separation = match self.separator.separate(&body).and_then(|separation| {
            separation.harmonic.ensure_compatible(&separation.percussive)?;
            Ok(separation)
        }) {
            Ok(separation) => separation,
            Err(e) => {
                let reason = degrade(&e, self.separator.name());
                return Ok((Outcome::indeterminate(reason.clone()), Outcome::indeterminate(reason)));
            }
        };

        checkpoint("key detection")?;
        let key = match self
            .key_detector
            .detect(&separation.harmonic, self.options.key_window)
        {
            Ok(estimate) => Outcome::Estimated(estimate),
            Err(e) => Outcome::indeterminate(degrade(&e, self.key_detector.name())),
        };

        checkpoint("tempo detection")?;
        let tempo = match self.tempo_detector.detect(&separation.percussive) {
            Ok(mut estimate) => {
                // Beats index the original track, not the trimmed body
                for beat in estimate.beats.iter_mut() {
                    *beat += lead_in.start;
                }
                Outcome::Estimated(estimate)
            }
            Err(e) => Outcome::indeterminate(degrade(&e, self.tempo_detector.name())),
        };

        Ok((tempo, key))
    }
}

/// Log an analysis failure and turn it into an indeterminate reason
fn degrade(e: &BeatkeyError, stage: &str) -> String {
    if e.is_indeterminate() {
        warn!("{} analysis indeterminate: {}", stage, e);
    } else {
        error!("{} analysis failed: {}", stage, e);
    }
    e.to_string()
}

//! Tempo detection module
//!
//! 1. Onset strength envelope from the log-power spectrogram ([`onset`])
//! 2. Beat period from the envelope's autocorrelation, weighted by a
//!    log-normal prior around a starting tempo
//! 3. Beat positions from a dynamic-programming tracker ([`beat`])
//! 4. The BPM is refined from the span of the tracked beats when both agree

pub mod beat;
pub mod onset;

use crate::analysis::stft::StftConfig;
use crate::analysis::traits::TempoDetector;
use crate::error::{BeatkeyError, Result};
use crate::types::{TempoEstimate, Waveform};
use rustfft::{num_complex::Complex, FftPlanner};
use tracing::debug;

pub use beat::track_beats;
pub use onset::{onset_strength, OnsetEnvelope};

/// Smoothing applied to the envelope before autocorrelation
const ENVELOPE_SMOOTHING: [f64; 5] = [0.25, 0.75, 1.0, 0.75, 0.25];

/// Beat-span BPM replaces the autocorrelation BPM within this relative distance
const REFINE_TOLERANCE: f64 = 0.08;

/// Tempo estimation parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoOptions {
    /// Centre of the tempo prior
    pub prior_bpm: f64,
    /// Width of the tempo prior in octaves
    pub prior_std_octaves: f64,
    /// How strongly the tracker sticks to the estimated period
    pub tightness: f64,
    /// Drop weak beats at the start and end
    pub trim: bool,
    pub min_bpm: f64,
    pub max_bpm: f64,
    pub stft: StftConfig,
}

impl Default for TempoOptions {
    fn default() -> Self {
        Self {
            prior_bpm: 110.0,
            prior_std_octaves: 1.0,
            tightness: 100.0,
            trim: true,
            min_bpm: 30.0,
            max_bpm: 320.0,
            stft: StftConfig::default(),
        }
    }
}

impl TempoOptions {
    pub fn validate(&self) -> Result<()> {
        if !self.prior_bpm.is_finite() || self.prior_bpm <= 0.0 {
            return Err(BeatkeyError::ConfigError(format!(
                "prior BPM must be positive, got {}",
                self.prior_bpm
            )));
        }
        if !self.prior_std_octaves.is_finite() || self.prior_std_octaves <= 0.0 {
            return Err(BeatkeyError::ConfigError(
                "tempo prior width must be positive".into(),
            ));
        }
        if !self.tightness.is_finite() || self.tightness < 0.0 {
            return Err(BeatkeyError::ConfigError(format!(
                "tightness must be non-negative, got {}",
                self.tightness
            )));
        }
        if !(self.min_bpm > 0.0 && self.min_bpm < self.max_bpm) {
            return Err(BeatkeyError::ConfigError(format!(
                "BPM range {}-{} is empty",
                self.min_bpm, self.max_bpm
            )));
        }
        if self.stft.n_fft == 0 || self.stft.hop_length == 0 {
            return Err(BeatkeyError::ConfigError(
                "STFT size and hop must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Estimate tempo and beat positions of a (percussive) waveform
pub fn estimate_tempo(waveform: &Waveform, options: &TempoOptions) -> Result<TempoEstimate> {
    waveform.validate()?;
    options.validate()?;

    let envelope = onset_strength(&waveform.samples, waveform.sample_rate, options.stft);
    if envelope.is_flat() {
        return Err(BeatkeyError::indeterminate_tempo("no onsets detected"));
    }

    let fps = envelope.frame_rate();
    let strength: Vec<f64> = envelope.strength.iter().map(|&s| s as f64).collect();

    let period = estimate_period(&strength, fps, options)
        .ok_or_else(|| BeatkeyError::indeterminate_tempo("no periodicity in onset envelope"))?;
    let mut bpm = 60.0 * fps / period;

    let beat_frames = track_beats(&strength, period, options.tightness, options.trim);
    if beat_frames.is_empty() {
        return Err(BeatkeyError::indeterminate_tempo("beat tracker found no beats"));
    }

    if let Some(span_bpm) = span_bpm(&beat_frames, fps) {
        if (span_bpm - bpm).abs() <= REFINE_TOLERANCE * bpm {
            debug!("Refined BPM {:.2} -> {:.2} from beat span", bpm, span_bpm);
            bpm = span_bpm;
        }
    }

    let beats: Vec<usize> = beat_frames
        .iter()
        .map(|&frame| frame * envelope.hop_length)
        .collect();

    debug!("Detected BPM: {:.2} ({} beats)", bpm, beats.len());

    Ok(TempoEstimate { bpm, beats })
}

/// Beat period in (fractional) envelope frames
///
/// Returns `None` when no lag in the BPM range correlates positively.
pub fn estimate_period(onsets: &[f64], fps: f64, options: &TempoOptions) -> Option<f64> {
    let smoothed = smooth(onsets);
    let mean = smoothed.iter().sum::<f64>() / smoothed.len().max(1) as f64;
    let centered: Vec<f64> = smoothed.iter().map(|x| x - mean).collect();

    let ac = autocorrelation(&centered);
    if ac.is_empty() || ac[0] <= 0.0 {
        return None;
    }

    let min_lag = ((60.0 * fps / options.max_bpm).ceil() as usize).max(1);
    let max_lag = ((60.0 * fps / options.min_bpm).floor() as usize).min(ac.len() - 1);
    if min_lag > max_lag {
        return None;
    }

    let log_prior = options.prior_bpm.log2();
    let score = |lag: usize| -> f64 {
        let bpm = 60.0 * fps / lag as f64;
        let z = (bpm.log2() - log_prior) / options.prior_std_octaves;
        (ac[lag] / ac[0]).max(0.0) * (-0.5 * z * z).exp()
    };

    let (best_lag, best_score) = (min_lag..=max_lag)
        .map(|lag| (lag, score(lag)))
        .fold((min_lag, 0.0), |best, cur| if cur.1 > best.1 { cur } else { best });
    if best_score <= 0.0 {
        return None;
    }

    // Parabolic interpolation for a sub-frame period
    if best_lag > min_lag && best_lag < max_lag {
        let prev = score(best_lag - 1);
        let next = score(best_lag + 1);
        let denom = prev - 2.0 * best_score + next;
        if denom.abs() > 1e-12 {
            let offset = 0.5 * (prev - next) / denom;
            if offset.abs() < 1.0 {
                return Some(best_lag as f64 + offset);
            }
        }
    }
    Some(best_lag as f64)
}

/// Tempo implied by the first and last beat, given at least 4 beats
fn span_bpm(beat_frames: &[usize], fps: f64) -> Option<f64> {
    let (first, last) = (*beat_frames.first()?, *beat_frames.last()?);
    if beat_frames.len() < 4 || last <= first {
        return None;
    }
    Some(60.0 * fps * (beat_frames.len() - 1) as f64 / (last - first) as f64)
}

fn smooth(values: &[f64]) -> Vec<f64> {
    let half = (ENVELOPE_SMOOTHING.len() / 2) as isize;
    let n = values.len() as isize;
    (0..n)
        .map(|i| {
            ENVELOPE_SMOOTHING
                .iter()
                .enumerate()
                .filter_map(|(k, w)| {
                    let j = i + k as isize - half;
                    (j >= 0 && j < n).then(|| values[j as usize] * w)
                })
                .sum()
        })
        .collect()
}

/// Linear autocorrelation via FFT, `ac[lag]` for lags 0..len
fn autocorrelation(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    if n == 0 {
        return Vec::new();
    }
    let size = (2 * n).next_power_of_two();

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(size);
    let ifft = planner.plan_fft_inverse(size);

    let mut buffer: Vec<Complex<f64>> = values
        .iter()
        .map(|&v| Complex::new(v, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(size)
        .collect();
    fft.process(&mut buffer);
    for c in buffer.iter_mut() {
        *c = Complex::new(c.norm_sqr(), 0.0);
    }
    ifft.process(&mut buffer);

    buffer[..n].iter().map(|c| c.re / size as f64).collect()
}

/// Tempo detector: onset envelope -> period -> DP beat tracking
#[derive(Debug, Clone, Default)]
pub struct BeatTrackTempoDetector {
    options: TempoOptions,
}

impl BeatTrackTempoDetector {
    pub fn new(options: TempoOptions) -> Self {
        Self { options }
    }
}

impl TempoDetector for BeatTrackTempoDetector {
    fn detect(&self, waveform: &Waveform) -> Result<TempoEstimate> {
        debug!(
            "Analyzing tempo ({} samples, {}Hz)",
            waveform.len(),
            waveform.sample_rate
        );
        estimate_tempo(waveform, &self.options)
    }

    fn name(&self) -> &'static str {
        "dp-beat-tracker"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    const SR: u32 = 22050;

    /// Decaying 1 kHz blips at a fixed tempo
    fn click_track(bpm: f64, seconds: f64, amplitude: f32) -> Waveform {
        let len = (seconds * SR as f64) as usize;
        let interval = 60.0 / bpm * SR as f64;
        let mut samples = vec![0.0f32; len];
        let mut beat = 0.0;
        while (beat as usize) < len {
            let start = beat as usize;
            for (i, s) in samples.iter_mut().skip(start).take(441).enumerate() {
                let t = i as f32 / SR as f32;
                *s = amplitude * (2.0 * PI * 1000.0 * t).sin() * (-t * 200.0).exp();
            }
            beat += interval;
        }
        Waveform::new(samples, SR).unwrap()
    }

    #[test]
    fn test_click_track_at_120_bpm() {
        let estimate = estimate_tempo(&click_track(120.0, 30.0, 0.8), &TempoOptions::default()).unwrap();
        assert!((estimate.bpm - 120.0).abs() <= 2.0, "bpm {}", estimate.bpm);
        assert!(estimate.beats.len() >= 50, "{} beats", estimate.beats.len());
        assert!(estimate.beats.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_amplitude_invariance() {
        let options = TempoOptions::default();
        let quiet = estimate_tempo(&click_track(120.0, 10.0, 0.3), &options).unwrap();
        let loud = estimate_tempo(&click_track(120.0, 10.0, 0.6), &options).unwrap();
        assert!((quiet.bpm - loud.bpm).abs() < 1e-3);
        assert_eq!(quiet.beats, loud.beats);
    }

    #[test]
    fn test_silence_is_indeterminate() {
        let silent = Waveform::new(vec![0.0; 5 * SR as usize], SR).unwrap();
        assert!(matches!(
            estimate_tempo(&silent, &TempoOptions::default()),
            Err(BeatkeyError::IndeterminateTempo { .. })
        ));
    }

    #[test]
    fn test_empty_waveform_is_invalid() {
        let empty = Waveform::new(vec![], SR).unwrap();
        assert!(matches!(
            estimate_tempo(&empty, &TempoOptions::default()),
            Err(BeatkeyError::InvalidWaveform { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_options() {
        let options = TempoOptions {
            prior_bpm: 0.0,
            ..TempoOptions::default()
        };
        assert!(matches!(options.validate(), Err(BeatkeyError::ConfigError(_))));

        let options = TempoOptions {
            min_bpm: 200.0,
            max_bpm: 100.0,
            ..TempoOptions::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_autocorrelation_matches_direct_sum() {
        let values = [1.0, -2.0, 3.0, 0.5, -1.0];
        let ac = autocorrelation(&values);
        for lag in 0..values.len() {
            let direct: f64 = (0..values.len() - lag).map(|i| values[i] * values[i + lag]).sum();
            assert!((ac[lag] - direct).abs() < 1e-9);
        }
    }

    #[test]
    fn test_period_of_pulse_train() {
        let fps = SR as f64 / 512.0;
        let mut env = vec![0.0; 1000];
        for i in (0..1000).step_by(20) {
            env[i] = 1.0;
        }
        let period = estimate_period(&env, fps, &TempoOptions::default()).unwrap();
        assert!((period - 20.0).abs() < 0.5, "period {}", period);
    }

    #[test]
    fn test_span_bpm() {
        let fps = 10.0;
        assert_eq!(span_bpm(&[0, 5, 10], fps), None);
        // 3 intervals over 15 frames at 10 fps: 0.5s per beat
        assert_eq!(span_bpm(&[0, 5, 10, 15], fps), Some(120.0));
    }

    #[test]
    fn test_detector_name() {
        assert_eq!(BeatTrackTempoDetector::default().name(), "dp-beat-tracker");
    }
}

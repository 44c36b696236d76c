//! Chroma extraction
//!
//! Folds a constant-Q magnitude spectrogram into 12 pitch classes and sums
//! the frames of a time window into one [`ChromaVector`].

pub mod cqt;

pub use cqt::{CqtConfig, CqtKernel, C1_HZ};

use crate::error::{BeatkeyError, Result};
use crate::types::{PitchClass, TimeWindow, Waveform};
use std::ops::Index;
use tracing::{debug, trace};

/// Total energy per pitch class, indexed C = 0 .. B = 11
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChromaVector([f64; 12]);

impl ChromaVector {
    pub fn new(values: [f64; 12]) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[f64; 12] {
        &self.0
    }

    pub fn get(&self, pitch: PitchClass) -> f64 {
        self.0[pitch.to_index()]
    }

    pub fn total(&self) -> f64 {
        self.0.iter().sum()
    }

    /// Transpose up `semitones`: energy at pitch `p` moves to `p + semitones`
    pub fn rotate(&self, semitones: usize) -> Self {
        let mut rotated = [0.0; 12];
        for (i, &v) in self.0.iter().enumerate() {
            rotated[(i + semitones) % 12] = v;
        }
        Self(rotated)
    }
}

impl From<[f64; 12]> for ChromaVector {
    fn from(values: [f64; 12]) -> Self {
        Self(values)
    }
}

impl Index<usize> for ChromaVector {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        &self.0[index]
    }
}

/// Chroma extraction parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChromaConfig {
    pub cqt: CqtConfig,
    /// Scale every frame so its loudest pitch class is 1
    pub normalize_frames: bool,
    /// Frames quieter than this (dB relative to the loudest frame) are skipped
    pub silence_floor_db: f64,
}

impl Default for ChromaConfig {
    fn default() -> Self {
        Self {
            cqt: CqtConfig::default(),
            normalize_frames: true,
            silence_floor_db: -80.0,
        }
    }
}

impl ChromaConfig {
    fn validate(&self) -> Result<()> {
        if self.cqt.bins_per_octave == 0 || self.cqt.bins_per_octave % 12 != 0 {
            return Err(BeatkeyError::ConfigError(format!(
                "bins per octave must be a positive multiple of 12, got {}",
                self.cqt.bins_per_octave
            )));
        }
        Ok(())
    }
}

/// Summed chroma of `waveform` inside `window`
pub fn extract_chroma(
    waveform: &Waveform,
    window: TimeWindow,
    config: &ChromaConfig,
) -> Result<ChromaVector> {
    waveform.validate()?;
    config.validate()?;

    let range = window.resolve(waveform.sample_rate, waveform.len());
    if range.is_empty() {
        return Err(BeatkeyError::WindowOutOfRange {
            start: window.start.unwrap_or(0.0),
            end: window.end.unwrap_or_else(|| waveform.duration_seconds()),
            duration: waveform.duration_seconds(),
        });
    }
    if range.clipped {
        let (start, end) = range.to_seconds(waveform.sample_rate);
        debug!("Chroma window clipped to {:.2}s-{:.2}s", start, end);
    }

    let kernel = CqtKernel::new(waveform.sample_rate, &config.cqt)?;
    let frames = chromagram(&kernel, waveform.segment(&range));

    Ok(sum_frames(&frames, config))
}

/// Per-frame chroma from a CQT magnitude spectrogram
pub fn chromagram(kernel: &CqtKernel, samples: &[f32]) -> Vec<[f64; 12]> {
    let cqt = kernel.config();
    let n_merge = cqt.bins_per_octave / 12;
    let fmin_pitch = pitch_class_of(cqt.fmin);

    // Each pitch class takes its exact bin plus the bins just below it
    let bin_pitch: Vec<usize> = (0..kernel.num_bins())
        .map(|k| ((k % cqt.bins_per_octave + n_merge / 2) / n_merge + fmin_pitch) % 12)
        .collect();

    kernel
        .magnitudes(samples)
        .into_iter()
        .map(|frame| {
            let mut chroma = [0.0f64; 12];
            for (mag, &pitch) in frame.iter().zip(bin_pitch.iter()) {
                chroma[pitch] += *mag as f64;
            }
            chroma
        })
        .collect()
}

/// Sum frames, optionally max-normalised, skipping frames below the floor
fn sum_frames(frames: &[[f64; 12]], config: &ChromaConfig) -> ChromaVector {
    let frame_max = |frame: &[f64; 12]| frame.iter().copied().fold(0.0f64, f64::max);
    let loudest = frames.iter().map(frame_max).fold(0.0f64, f64::max);
    let floor = loudest * 10f64.powf(config.silence_floor_db / 20.0);

    let mut total = [0.0f64; 12];
    let mut used = 0usize;
    for frame in frames {
        let peak = frame_max(frame);
        if peak <= 0.0 || peak < floor {
            continue;
        }
        let scale = if config.normalize_frames { 1.0 / peak } else { 1.0 };
        for (acc, v) in total.iter_mut().zip(frame.iter()) {
            *acc += v * scale;
        }
        used += 1;
    }

    trace!("Chroma summed over {} of {} frames", used, frames.len());
    ChromaVector(total)
}

/// Pitch class of the nearest equal-tempered note to `freq`
fn pitch_class_of(freq: f64) -> usize {
    let midi = (12.0 * (freq / 440.0).log2() + 69.0).round() as i64;
    midi.rem_euclid(12) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const SR: u32 = 22050;

    fn tones(freqs: &[f64], seconds: f64) -> Waveform {
        let n = (seconds * SR as f64) as usize;
        let samples = (0..n)
            .map(|i| {
                let t = i as f64 / SR as f64;
                freqs.iter().map(|f| (2.0 * PI * f * t).sin()).sum::<f64>() as f32 * 0.3
            })
            .collect();
        Waveform::new(samples, SR).unwrap()
    }

    fn argmax(chroma: &ChromaVector) -> usize {
        (0..12)
            .max_by(|&a, &b| chroma[a].total_cmp(&chroma[b]))
            .unwrap()
    }

    #[test]
    fn test_rotate() {
        let mut values = [0.0; 12];
        values[0] = 1.0;
        values[4] = 2.0;
        let rotated = ChromaVector::new(values).rotate(3);
        assert_eq!(rotated.get(PitchClass::Ds), 1.0);
        assert_eq!(rotated.get(PitchClass::G), 2.0);
        assert_eq!(rotated.total(), 3.0);
        assert_eq!(ChromaVector::new(values).rotate(12), ChromaVector::new(values));
    }

    #[test]
    fn test_pitch_class_of() {
        assert_eq!(pitch_class_of(C1_HZ), 0);
        assert_eq!(pitch_class_of(440.0), 9);
        assert_eq!(pitch_class_of(466.16), 10);
    }

    #[test]
    fn test_single_tone_lands_on_its_pitch_class() {
        // A4
        let chroma = extract_chroma(&tones(&[440.0], 2.0), TimeWindow::full(), &ChromaConfig::default())
            .unwrap();
        assert_eq!(argmax(&chroma), 9);
    }

    #[test]
    fn test_triad_energy() {
        // C4 E4 G4
        let chroma = extract_chroma(
            &tones(&[261.63, 329.63, 392.0], 2.0),
            TimeWindow::full(),
            &ChromaConfig::default(),
        )
        .unwrap();
        let top = {
            let mut idx: Vec<usize> = (0..12).collect();
            idx.sort_by(|&a, &b| chroma[b].total_cmp(&chroma[a]));
            let mut top3 = idx[..3].to_vec();
            top3.sort_unstable();
            top3
        };
        assert_eq!(top, vec![0, 4, 7]);
    }

    #[test]
    fn test_scale_invariance() {
        let quiet = tones(&[261.63, 392.0], 1.0);
        let loud = Waveform::new(quiet.samples.iter().map(|s| s * 3.0).collect(), SR).unwrap();
        let a = extract_chroma(&quiet, TimeWindow::full(), &ChromaConfig::default()).unwrap();
        let b = extract_chroma(&loud, TimeWindow::full(), &ChromaConfig::default()).unwrap();
        for i in 0..12 {
            assert!((a[i] - b[i]).abs() < 1e-6 * a.total().max(1.0));
        }
    }

    #[test]
    fn test_silence_gives_zero_chroma() {
        let silent = Waveform::new(vec![0.0; SR as usize], SR).unwrap();
        let chroma = extract_chroma(&silent, TimeWindow::full(), &ChromaConfig::default()).unwrap();
        assert_eq!(chroma.total(), 0.0);
    }

    #[test]
    fn test_empty_waveform_is_invalid() {
        let empty = Waveform::new(vec![], SR).unwrap();
        assert!(matches!(
            extract_chroma(&empty, TimeWindow::full(), &ChromaConfig::default()),
            Err(BeatkeyError::InvalidWaveform { .. })
        ));
    }

    #[test]
    fn test_window_past_end_is_out_of_range() {
        let short = tones(&[440.0], 1.0);
        let window = TimeWindow::between(35.0, 60.0).unwrap();
        assert!(matches!(
            extract_chroma(&short, window, &ChromaConfig::default()),
            Err(BeatkeyError::WindowOutOfRange { .. })
        ));
    }

    #[test]
    fn test_rejects_odd_bins_per_octave() {
        let config = ChromaConfig {
            cqt: CqtConfig {
                bins_per_octave: 18,
                ..CqtConfig::default()
            },
            ..ChromaConfig::default()
        };
        assert!(matches!(
            extract_chroma(&tones(&[440.0], 0.5), TimeWindow::full(), &config),
            Err(BeatkeyError::ConfigError(_))
        ));
    }
}

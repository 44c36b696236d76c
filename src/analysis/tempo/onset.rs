//! Onset strength envelope
//!
//! Spectral flux on a log-power spectrogram: for every frame, the mean over
//! frequency bins of the positive change in dB since the previous frame.
//! Power is measured relative to the loudest bin of the whole signal, so the
//! envelope does not depend on the input gain.

use crate::analysis::stft::{stft, StftConfig};
use tracing::trace;

/// Dynamic range kept below the loudest bin
const TOP_DB: f32 = 80.0;

/// Power floor before taking logarithms
const AMIN: f32 = 1e-10;

/// Onset strength per STFT frame
#[derive(Debug, Clone)]
pub struct OnsetEnvelope {
    pub strength: Vec<f32>,
    pub hop_length: usize,
    pub sample_rate: u32,
}

impl OnsetEnvelope {
    /// Envelope frames per second
    pub fn frame_rate(&self) -> f64 {
        self.sample_rate as f64 / self.hop_length as f64
    }

    pub fn len(&self) -> usize {
        self.strength.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strength.is_empty()
    }

    /// True when no frame shows any increase in energy
    pub fn is_flat(&self) -> bool {
        self.strength.iter().all(|&s| s <= 0.0)
    }
}

/// Compute the onset strength envelope of a mono signal
///
/// The envelope has one value per centred STFT frame. Values are delayed by
/// the half-window so a transient at sample `s` peaks near frame
/// `s / hop_length` rather than when it first enters the window.
pub fn onset_strength(samples: &[f32], sample_rate: u32, config: StftConfig) -> OnsetEnvelope {
    let power = stft(samples, config).power();
    let num_frames = power.len();

    let peak = power
        .iter()
        .flat_map(|frame| frame.iter().copied())
        .fold(0.0f32, f32::max);
    let reference_db = 10.0 * peak.max(AMIN).log10();

    let log_power: Vec<Vec<f32>> = power
        .iter()
        .map(|frame| {
            frame
                .iter()
                .map(|&p| (10.0 * p.max(AMIN).log10() - reference_db).max(-TOP_DB))
                .collect()
        })
        .collect();

    let flux: Vec<f32> = log_power
        .windows(2)
        .map(|pair| {
            let rise: f32 = pair[1]
                .iter()
                .zip(pair[0].iter())
                .map(|(cur, prev)| (cur - prev).max(0.0))
                .sum();
            rise / pair[1].len() as f32
        })
        .collect();

    // One frame of lag from the difference plus the half-window of centring
    let delay = 1 + config.n_fft / (2 * config.hop_length);
    let mut strength = vec![0.0f32; num_frames];
    for (i, &value) in flux.iter().enumerate() {
        if let Some(slot) = strength.get_mut(i + delay) {
            *slot = value;
        }
    }

    trace!("Onset envelope: {} frames", strength.len());

    OnsetEnvelope {
        strength,
        hop_length: config.hop_length,
        sample_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 22050;

    fn clicks(positions: &[usize], len: usize) -> Vec<f32> {
        let mut samples = vec![0.0f32; len];
        for &p in positions {
            for (i, s) in samples.iter_mut().skip(p).take(64).enumerate() {
                *s = 0.8 * (-(i as f32) / 16.0).exp();
            }
        }
        samples
    }

    #[test]
    fn test_envelope_length_and_rate() {
        let env = onset_strength(&vec![0.0; 22050], SR, StftConfig::default());
        assert_eq!(env.len(), 44);
        assert!((env.frame_rate() - 43.066).abs() < 0.01);
        assert_eq!(env.strength[0], 0.0);
    }

    #[test]
    fn test_silence_is_flat() {
        let env = onset_strength(&vec![0.0; 22050], SR, StftConfig::default());
        assert!(env.is_flat());
    }

    #[test]
    fn test_click_peaks_near_its_frame() {
        let position = 10_240; // frame 20
        let env = onset_strength(&clicks(&[position], 22050), SR, StftConfig::default());
        let peak = env
            .strength
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert!((peak as i64 - 20).abs() <= 2, "peak at frame {}", peak);
    }

    #[test]
    fn test_gain_does_not_change_envelope() {
        let quiet = clicks(&[5000, 16000], 22050);
        let loud: Vec<f32> = quiet.iter().map(|s| s * 2.0).collect();
        let a = onset_strength(&quiet, SR, StftConfig::default());
        let b = onset_strength(&loud, SR, StftConfig::default());
        for (x, y) in a.strength.iter().zip(b.strength.iter()) {
            assert!((x - y).abs() < 1e-3);
        }
    }
}

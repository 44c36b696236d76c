//! Harmonic/percussive source separation by median filtering
//!
//! Sustained partials form horizontal ridges in a magnitude spectrogram and
//! drum hits form vertical ones. Median filtering along time keeps the
//! former, along frequency the latter. The two estimates become soft masks
//! that split the complex spectrogram, and each half is inverted back to a
//! waveform of the original length.

use crate::analysis::stft::{istft, stft, Spectrogram, StftConfig};
use crate::analysis::traits::Separator;
use crate::error::Result;
use crate::types::Waveform;
use rayon::prelude::*;
use tracing::debug;

/// Median filter length (frames) for the harmonic estimate
pub const HARMONIC_KERNEL: usize = 31;

/// Median filter length (bins) for the percussive estimate
pub const PERCUSSIVE_KERNEL: usize = 31;

/// Separation parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HpssConfig {
    pub stft: StftConfig,
    pub harmonic_kernel: usize,
    pub percussive_kernel: usize,
    /// Exponent of the soft masks
    pub mask_power: f32,
}

impl Default for HpssConfig {
    fn default() -> Self {
        Self {
            stft: StftConfig::default(),
            harmonic_kernel: HARMONIC_KERNEL,
            percussive_kernel: PERCUSSIVE_KERNEL,
            mask_power: 2.0,
        }
    }
}

/// Harmonic and percussive components, each as long as the input
#[derive(Debug, Clone)]
pub struct Separation {
    pub harmonic: Waveform,
    pub percussive: Waveform,
}

/// Split a waveform into its harmonic and percussive parts
pub fn separate(waveform: &Waveform, config: &HpssConfig) -> Separation {
    let len = waveform.len();
    if len == 0 {
        return Separation {
            harmonic: waveform.clone(),
            percussive: waveform.clone(),
        };
    }

    let spectrogram = stft(&waveform.samples, config.stft);
    let magnitudes = spectrogram.magnitudes();

    let harmonic_est = median_along_time(&magnitudes, config.harmonic_kernel);
    let percussive_est = median_along_frequency(&magnitudes, config.percussive_kernel);

    let (harmonic_spec, percussive_spec) =
        apply_soft_masks(&spectrogram, &harmonic_est, &percussive_est, config.mask_power);

    debug!(
        "HPSS: {} frames x {} bins, kernels {}/{}",
        spectrogram.num_frames(),
        spectrogram.num_bins(),
        config.harmonic_kernel,
        config.percussive_kernel
    );

    Separation {
        harmonic: Waveform {
            samples: istft(&harmonic_spec, len),
            sample_rate: waveform.sample_rate,
        },
        percussive: Waveform {
            samples: istft(&percussive_spec, len),
            sample_rate: waveform.sample_rate,
        },
    }
}

/// Median-filter separator used by the orchestrator
#[derive(Debug, Clone, Default)]
pub struct MedianFilterSeparator {
    config: HpssConfig,
}

impl MedianFilterSeparator {
    pub fn new(config: HpssConfig) -> Self {
        Self { config }
    }
}

impl Separator for MedianFilterSeparator {
    fn separate(&self, waveform: &Waveform) -> Result<Separation> {
        Ok(separate(waveform, &self.config))
    }

    fn name(&self) -> &'static str {
        "median-filter"
    }
}

/// Median over a sliding window of `kernel` frames for every bin
fn median_along_time(magnitudes: &[Vec<f32>], kernel: usize) -> Vec<Vec<f32>> {
    let num_frames = magnitudes.len();
    let num_bins = magnitudes.first().map(Vec::len).unwrap_or(0);

    // Filter each bin's time series in parallel, then transpose back
    let filtered_bins: Vec<Vec<f32>> = (0..num_bins)
        .into_par_iter()
        .map(|bin| {
            let series: Vec<f32> = magnitudes.iter().map(|frame| frame[bin]).collect();
            median_filter(&series, kernel)
        })
        .collect();

    (0..num_frames)
        .map(|t| filtered_bins.iter().map(|series| series[t]).collect())
        .collect()
}

/// Median over a sliding window of `kernel` bins within every frame
fn median_along_frequency(magnitudes: &[Vec<f32>], kernel: usize) -> Vec<Vec<f32>> {
    magnitudes
        .par_iter()
        .map(|frame| median_filter(frame, kernel))
        .collect()
}

/// Centred 1-D median filter with symmetric reflection at the edges
fn median_filter(values: &[f32], kernel: usize) -> Vec<f32> {
    let n = values.len();
    let kernel = kernel.max(1);
    if n == 0 {
        return Vec::new();
    }

    let half = (kernel / 2) as isize;
    let mut window = Vec::with_capacity(kernel);

    (0..n)
        .map(|i| {
            window.clear();
            for offset in 0..kernel as isize {
                let idx = reflect(i as isize + offset - half, n);
                window.push(values[idx]);
            }
            let mid = kernel / 2;
            let (_, median, _) = window.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
            *median
        })
        .collect()
}

/// Map an out-of-range index into `0..n` by mirroring (d c b a | a b c d | d c b a)
fn reflect(mut idx: isize, n: usize) -> usize {
    let n = n as isize;
    if n == 1 {
        return 0;
    }
    let period = 2 * n;
    idx = idx.rem_euclid(period);
    if idx >= n {
        idx = period - 1 - idx;
    }
    idx as usize
}

/// Split a complex spectrogram with `H^p / (H^p + P^p)` masks
fn apply_soft_masks(
    spectrogram: &Spectrogram,
    harmonic: &[Vec<f32>],
    percussive: &[Vec<f32>],
    power: f32,
) -> (Spectrogram, Spectrogram) {
    let (harmonic_frames, percussive_frames): (Vec<_>, Vec<_>) = spectrogram
        .frames
        .par_iter()
        .zip(harmonic.par_iter().zip(percussive.par_iter()))
        .map(|(frame, (h_row, p_row))| {
            let mut h_frame = Vec::with_capacity(frame.len());
            let mut p_frame = Vec::with_capacity(frame.len());
            for ((&x, &h), &p) in frame.iter().zip(h_row).zip(p_row) {
                let mask = soft_mask(h, p, power);
                h_frame.push(x * mask);
                p_frame.push(x * (1.0 - mask));
            }
            (h_frame, p_frame)
        })
        .unzip();

    (
        Spectrogram {
            frames: harmonic_frames,
            config: spectrogram.config,
        },
        Spectrogram {
            frames: percussive_frames,
            config: spectrogram.config,
        },
    )
}

/// Harmonic share of one bin; both estimates at zero split evenly
fn soft_mask(harmonic: f32, percussive: f32, power: f32) -> f32 {
    let z = harmonic.max(percussive);
    if z < f32::MIN_POSITIVE {
        return 0.5;
    }
    let h = (harmonic / z).powf(power);
    let p = (percussive / z).powf(power);
    h / (h + p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    const SR: u32 = 22050;

    fn energy(samples: &[f32]) -> f32 {
        samples.iter().map(|s| s * s).sum()
    }

    #[test]
    fn test_median_filter_removes_spike() {
        let values = vec![1.0, 1.0, 9.0, 1.0, 1.0];
        assert_eq!(median_filter(&values, 3), vec![1.0, 1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_reflect_indices() {
        assert_eq!(reflect(-1, 4), 0);
        assert_eq!(reflect(-2, 4), 1);
        assert_eq!(reflect(4, 4), 3);
        assert_eq!(reflect(5, 4), 2);
        assert_eq!(reflect(2, 4), 2);
        assert_eq!(reflect(7, 1), 0);
    }

    #[test]
    fn test_soft_mask() {
        assert_eq!(soft_mask(0.0, 0.0, 2.0), 0.5);
        assert!((soft_mask(1.0, 1.0, 2.0) - 0.5).abs() < 1e-6);
        assert!((soft_mask(3.0, 1.0, 2.0) - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_lengths_preserved() {
        let waveform = Waveform::new(vec![0.1; 10_001], SR).unwrap();
        let sep = separate(&waveform, &HpssConfig::default());
        assert_eq!(sep.harmonic.len(), 10_001);
        assert_eq!(sep.percussive.len(), 10_001);
        assert_eq!(sep.harmonic.sample_rate, SR);
    }

    #[test]
    fn test_empty_input_gives_empty_outputs() {
        let waveform = Waveform::new(vec![], SR).unwrap();
        let sep = separate(&waveform, &HpssConfig::default());
        assert!(sep.harmonic.is_empty());
        assert!(sep.percussive.is_empty());
    }

    #[test]
    fn test_components_sum_to_input() {
        let samples: Vec<f32> = (0..SR as usize)
            .map(|i| (2.0 * PI * 330.0 * i as f32 / SR as f32).sin() * 0.5)
            .collect();
        let waveform = Waveform::new(samples.clone(), SR).unwrap();
        let sep = separate(&waveform, &HpssConfig::default());

        let max_err = (0..samples.len())
            .map(|i| (sep.harmonic.samples[i] + sep.percussive.samples[i] - samples[i]).abs())
            .fold(0.0f32, f32::max);
        assert!(max_err < 1e-3, "max error {}", max_err);
    }

    #[test]
    fn test_sustained_tone_is_harmonic() {
        let samples: Vec<f32> = (0..2 * SR as usize)
            .map(|i| (2.0 * PI * 440.0 * i as f32 / SR as f32).sin() * 0.5)
            .collect();
        let waveform = Waveform::new(samples, SR).unwrap();
        let sep = separate(&waveform, &HpssConfig::default());

        assert!(energy(&sep.harmonic.samples) > 10.0 * energy(&sep.percussive.samples));
    }

    #[test]
    fn test_clicks_are_percussive() {
        let mut samples = vec![0.0f32; 2 * SR as usize];
        for start in (0..samples.len()).step_by(SR as usize / 2) {
            for s in samples.iter_mut().skip(start).take(20) {
                *s = 0.9;
            }
        }
        let waveform = Waveform::new(samples, SR).unwrap();
        let sep = separate(&waveform, &HpssConfig::default());

        assert!(energy(&sep.percussive.samples) > 5.0 * energy(&sep.harmonic.samples));
    }
}

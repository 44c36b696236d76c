//! Constant-Q transform with sparse spectral kernels
//!
//! Every CQT bin `k` has centre frequency `fmin * 2^(k / bins_per_octave)`
//! and a Hann-windowed complex exponential of length `Q * sr / f_k`, so all
//! bins share the same quality factor `Q = 1 / (2^(1 / bins_per_octave) - 1)`.
//! The kernels are transformed once into the frequency domain and pruned of
//! negligible coefficients; each signal frame then needs one FFT plus a
//! sparse dot product per bin.

use crate::error::{BeatkeyError, Result};
use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};
use std::f64::consts::PI;
use tracing::debug;

/// Frequency of C1 in Hz
pub const C1_HZ: f64 = 32.703_195_662_574_83;

/// Kernel coefficients below this fraction of a row's peak are dropped
const SPARSITY_THRESHOLD: f32 = 0.005;

/// CQT layout
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CqtConfig {
    /// Lowest bin frequency in Hz
    pub fmin: f64,
    pub bins_per_octave: usize,
    pub n_octaves: usize,
    pub hop_length: usize,
}

impl Default for CqtConfig {
    fn default() -> Self {
        Self {
            fmin: C1_HZ,
            bins_per_octave: 24,
            n_octaves: 7,
            hop_length: 512,
        }
    }
}

impl CqtConfig {
    /// Quality factor shared by all bins
    pub fn q_factor(&self) -> f64 {
        1.0 / (2f64.powf(1.0 / self.bins_per_octave as f64) - 1.0)
    }

    /// Centre frequency of bin `k`
    pub fn frequency(&self, k: usize) -> f64 {
        self.fmin * 2f64.powf(k as f64 / self.bins_per_octave as f64)
    }

    fn validate(&self) -> Result<()> {
        if self.bins_per_octave == 0 || self.n_octaves == 0 || self.hop_length == 0 {
            return Err(BeatkeyError::ConfigError(
                "CQT bins per octave, octave count and hop length must be positive".into(),
            ));
        }
        if !self.fmin.is_finite() || self.fmin <= 0.0 {
            return Err(BeatkeyError::ConfigError(format!(
                "CQT minimum frequency must be positive, got {}",
                self.fmin
            )));
        }
        Ok(())
    }
}

/// Precomputed sparse spectral kernels for one sample rate
#[derive(Debug, Clone)]
pub struct CqtKernel {
    config: CqtConfig,
    fft_len: usize,
    frequencies: Vec<f64>,
    /// Per bin: (fft bin, conj(K) / fft_len)
    rows: Vec<Vec<(usize, Complex<f32>)>>,
}

impl CqtKernel {
    /// Build the kernels, dropping bins whose passband would reach Nyquist
    pub fn new(sample_rate: u32, config: &CqtConfig) -> Result<Self> {
        config.validate()?;

        let sr = sample_rate as f64;
        let nyquist = sr / 2.0;
        let q = config.q_factor();

        let frequencies: Vec<f64> = (0..config.bins_per_octave * config.n_octaves)
            .map(|k| config.frequency(k))
            .take_while(|&f| f * (1.0 + 0.5 / q) < nyquist)
            .collect();

        if frequencies.is_empty() {
            return Err(BeatkeyError::ConfigError(format!(
                "sample rate {} Hz is too low for a CQT starting at {:.2} Hz",
                sample_rate, config.fmin
            )));
        }

        let lengths: Vec<usize> = frequencies
            .iter()
            .map(|&f| (q * sr / f).ceil() as usize)
            .collect();
        let fft_len = lengths[0].next_power_of_two();

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_len);

        let rows: Vec<Vec<(usize, Complex<f32>)>> = frequencies
            .par_iter()
            .zip(lengths.par_iter())
            .map(|(&freq, &len)| {
                let mut buffer = vec![Complex::new(0.0f32, 0.0); fft_len];
                let offset = (fft_len - len) / 2;
                for n in 0..len {
                    let window = 0.5 * (1.0 - (2.0 * PI * n as f64 / len as f64).cos());
                    // Phase is measured from the kernel centre so frames centre on hop positions
                    let t = n as f64 - (len / 2) as f64;
                    let phase = 2.0 * PI * freq * t / sr;
                    let scale = window / len as f64;
                    buffer[offset + n] =
                        Complex::new((scale * phase.cos()) as f32, (scale * phase.sin()) as f32);
                }
                fft.process(&mut buffer);

                let peak = buffer.iter().map(|c| c.norm()).fold(0.0f32, f32::max);
                let cutoff = peak * SPARSITY_THRESHOLD;
                let norm = 1.0 / fft_len as f32;
                buffer
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.norm() > cutoff)
                    .map(|(j, c)| (j, c.conj() * norm))
                    .collect()
            })
            .collect();

        debug!(
            "CQT kernel: {} bins, {:.1}-{:.1} Hz, fft_len {}, {} coefficients",
            frequencies.len(),
            frequencies[0],
            frequencies[frequencies.len() - 1],
            fft_len,
            rows.iter().map(Vec::len).sum::<usize>()
        );

        Ok(Self {
            config: *config,
            fft_len,
            frequencies,
            rows,
        })
    }

    /// Number of CQT bins actually available
    pub fn num_bins(&self) -> usize {
        self.frequencies.len()
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    pub fn config(&self) -> &CqtConfig {
        &self.config
    }

    /// Magnitude CQT `[frame][bin]` with frames centred on multiples of the hop
    pub fn magnitudes(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        if samples.is_empty() {
            return Vec::new();
        }

        let hop = self.config.hop_length;
        let num_frames = samples.len() / hop + 1;
        let half = (self.fft_len / 2) as isize;

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(self.fft_len);

        (0..num_frames)
            .into_par_iter()
            .map(|frame_idx| {
                let origin = (frame_idx * hop) as isize - half;
                let mut buffer: Vec<Complex<f32>> = (0..self.fft_len as isize)
                    .map(|i| {
                        let pos = origin + i;
                        if pos >= 0 && (pos as usize) < samples.len() {
                            Complex::new(samples[pos as usize], 0.0)
                        } else {
                            Complex::new(0.0, 0.0)
                        }
                    })
                    .collect();
                fft.process(&mut buffer);

                self.rows
                    .iter()
                    .map(|row| {
                        row.iter()
                            .map(|&(j, coef)| buffer[j] * coef)
                            .sum::<Complex<f32>>()
                            .norm()
                    })
                    .collect()
            })
            .collect()
    }
}

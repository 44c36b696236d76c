//! Key detection module
//!
//! Krumhansl-Schmuckler key finding: the chroma vector is read starting
//! from each of the 12 possible tonics and correlated with the major and
//! minor profiles. The 24 correlations form a table in a fixed order
//! (C major .. B major, C minor .. B minor) from which the best key and an
//! optional close alternate are picked.

pub mod profiles;

use crate::analysis::chroma::{extract_chroma, ChromaConfig, ChromaVector};
use crate::analysis::traits::KeyDetector;
use crate::error::{BeatkeyError, Result};
use crate::types::{Key, KeyEstimate, KeyScore, Mode, PitchClass, TimeWindow, Waveform};
use std::str::FromStr;
use tracing::debug;

/// How the alternate key is chosen among the near-best entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlternatePolicy {
    /// Last qualifying entry in table order
    #[default]
    LastAboveThreshold,
    /// Highest qualifying entry, first in table order on ties
    ClosestBelowBest,
}

impl FromStr for AlternatePolicy {
    type Err = BeatkeyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "last" => Ok(AlternatePolicy::LastAboveThreshold),
            "closest" => Ok(AlternatePolicy::ClosestBelowBest),
            other => Err(BeatkeyError::ConfigError(format!(
                "unknown alternate key policy '{}' (expected 'last' or 'closest')",
                other
            ))),
        }
    }
}

/// Key estimation parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyOptions {
    /// An entry qualifies as alternate when its correlation exceeds `ratio * best`
    pub alternate_ratio: f64,
    pub alternate_policy: AlternatePolicy,
}

impl Default for KeyOptions {
    fn default() -> Self {
        Self {
            alternate_ratio: 0.9,
            alternate_policy: AlternatePolicy::default(),
        }
    }
}

/// Correlation of every key with a chroma vector, in table order
#[derive(Debug, Clone, PartialEq)]
pub struct KeyCorrelationTable {
    entries: Vec<KeyScore>,
}

impl KeyCorrelationTable {
    pub fn entries(&self) -> &[KeyScore] {
        &self.entries
    }

    pub fn get(&self, key: Key) -> Option<f64> {
        self.entries
            .iter()
            .find(|score| score.key == key)
            .map(|score| score.correlation)
    }

    /// First entry with the maximum correlation
    pub fn best(&self) -> KeyScore {
        let mut best = self.entries[0];
        for score in &self.entries[1..] {
            if score.correlation > best.correlation {
                best = *score;
            }
        }
        best
    }

    /// Near-best entry under `options`, if any qualifies
    pub fn alternate(&self, best: &KeyScore, options: &KeyOptions) -> Option<KeyScore> {
        let threshold = best.correlation * options.alternate_ratio;
        let candidates = self
            .entries
            .iter()
            .filter(|score| score.correlation > threshold && score.correlation != best.correlation)
            .copied();

        match options.alternate_policy {
            AlternatePolicy::LastAboveThreshold => candidates.last(),
            AlternatePolicy::ClosestBelowBest => candidates.fold(None, |acc: Option<KeyScore>, s| {
                match acc {
                    Some(a) if a.correlation >= s.correlation => Some(a),
                    _ => Some(s),
                }
            }),
        }
    }
}

/// Correlate a chroma vector against all 24 key profiles
pub fn correlate(chroma: &ChromaVector) -> Result<KeyCorrelationTable> {
    if chroma.values().iter().any(|v| !v.is_finite()) {
        return Err(BeatkeyError::indeterminate_key("chroma contains non-finite energy"));
    }

    let mut entries = Vec::with_capacity(24);
    for mode in [Mode::Major, Mode::Minor] {
        let profile = profiles::profile(mode);
        for root in 0..12 {
            let test: [f64; 12] = std::array::from_fn(|m| chroma[(root + m) % 12]);
            let corr = pearson(profile, &test).ok_or_else(|| {
                BeatkeyError::indeterminate_key("chroma has no variation across pitch classes")
            })?;
            entries.push(KeyScore {
                key: Key::new(PitchClass::from_index(root), mode),
                correlation: round3(corr),
            });
        }
    }

    Ok(KeyCorrelationTable { entries })
}

/// Best and alternate key for a chroma vector
pub fn estimate_key(chroma: &ChromaVector, options: &KeyOptions) -> Result<KeyEstimate> {
    let table = correlate(chroma)?;
    let best = table.best();
    let alternate = table.alternate(&best, options);

    debug!(
        "Detected key: {} (correlation: {:.3}){}",
        best.key,
        best.correlation,
        alternate
            .map(|a| format!(", alternate {} ({:.3})", a.key, a.correlation))
            .unwrap_or_default()
    );

    Ok(KeyEstimate { best, alternate })
}

/// Pearson correlation coefficient; `None` when either side has zero variance
pub fn pearson(a: &[f64; 12], b: &[f64; 12]) -> Option<f64> {
    let mean_a = a.iter().sum::<f64>() / 12.0;
    let mean_b = b.iter().sum::<f64>() / 12.0;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    let mut energy_a = 0.0;
    let mut energy_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
        energy_a += x * x;
        energy_b += y * y;
    }

    // Variance at rounding-noise level counts as constant
    if var_a <= f64::EPSILON * energy_a || var_b <= f64::EPSILON * energy_b {
        return None;
    }
    let r = cov / (var_a * var_b).sqrt();
    r.is_finite().then_some(r.clamp(-1.0, 1.0))
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Key detector: window -> chroma -> Krumhansl-Schmuckler
#[derive(Debug, Clone, Default)]
pub struct KrumhanslKeyDetector {
    chroma: ChromaConfig,
    options: KeyOptions,
}

impl KrumhanslKeyDetector {
    pub fn new(chroma: ChromaConfig, options: KeyOptions) -> Self {
        Self { chroma, options }
    }
}

impl KeyDetector for KrumhanslKeyDetector {
    fn detect(&self, waveform: &Waveform, window: TimeWindow) -> Result<KeyEstimate> {
        debug!(
            "Analyzing key ({} samples, {}Hz)",
            waveform.len(),
            waveform.sample_rate
        );
        let chroma = extract_chroma(waveform, window, &self.chroma)?;
        estimate_key(&chroma, &self.options)
    }

    fn name(&self) -> &'static str {
        "krumhansl-schmuckler"
    }
}

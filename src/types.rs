//! Core data types for beatkey
//!
//! These types represent the domain model and flow through the pipeline.
//! All of them are plain values owned by a single analysis.

use crate::error::{BeatkeyError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::path::PathBuf;
use std::str::FromStr;

// =============================================================================
// Musical primitives
// =============================================================================

/// The 12 pitch classes in Western music
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PitchClass {
    C,
    Cs, // C#/Db
    D,
    Ds, // D#/Eb
    E,
    F,
    Fs, // F#/Gb
    G,
    Gs, // G#/Ab
    A,
    As, // A#/Bb
    B,
}

impl PitchClass {
    /// All pitch classes in ascending order from C
    pub const ALL: [PitchClass; 12] = [
        PitchClass::C,
        PitchClass::Cs,
        PitchClass::D,
        PitchClass::Ds,
        PitchClass::E,
        PitchClass::F,
        PitchClass::Fs,
        PitchClass::G,
        PitchClass::Gs,
        PitchClass::A,
        PitchClass::As,
        PitchClass::B,
    ];

    /// Convert from numeric index (0 = C, 1 = C#, ..., 11 = B), wrapping
    pub fn from_index(index: usize) -> Self {
        Self::ALL[index % 12]
    }

    /// Convert to numeric index (0 = C, 1 = C#, ..., 11 = B)
    pub fn to_index(self) -> usize {
        self as usize
    }

    /// Pitch class `semitones` above this one
    pub fn transpose(self, semitones: usize) -> Self {
        Self::from_index(self.to_index() + semitones)
    }

    /// Standard notation with sharps (e.g., "C", "F#")
    pub fn to_standard_notation(self) -> &'static str {
        match self {
            PitchClass::C => "C",
            PitchClass::Cs => "C#",
            PitchClass::D => "D",
            PitchClass::Ds => "D#",
            PitchClass::E => "E",
            PitchClass::F => "F",
            PitchClass::Fs => "F#",
            PitchClass::G => "G",
            PitchClass::Gs => "G#",
            PitchClass::A => "A",
            PitchClass::As => "A#",
            PitchClass::B => "B",
        }
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_standard_notation())
    }
}

impl FromStr for PitchClass {
    type Err = BeatkeyError;

    fn from_str(s: &str) -> Result<Self> {
        PitchClass::ALL
            .iter()
            .copied()
            .find(|p| p.to_standard_notation() == s)
            .ok_or_else(|| BeatkeyError::ConfigError(format!("unknown pitch class '{}'", s)))
    }
}

/// Major or Minor scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    Major,
    Minor,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Major => "major",
            Mode::Minor => "minor",
        }
    }
}

/// A musical key, labelled "<Pitch> major" / "<Pitch> minor"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Key {
    pub tonic: PitchClass,
    pub mode: Mode,
}

impl Key {
    pub fn new(tonic: PitchClass, mode: Mode) -> Self {
        Self { tonic, mode }
    }

    pub fn major(tonic: PitchClass) -> Self {
        Self::new(tonic, Mode::Major)
    }

    pub fn minor(tonic: PitchClass) -> Self {
        Self::new(tonic, Mode::Minor)
    }

    /// Same mode, tonic moved up `semitones`
    pub fn transpose(self, semitones: usize) -> Self {
        Self::new(self.tonic.transpose(semitones), self.mode)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.tonic, self.mode.as_str())
    }
}

impl FromStr for Key {
    type Err = BeatkeyError;

    fn from_str(s: &str) -> Result<Self> {
        let (tonic, mode) = s
            .trim()
            .split_once(' ')
            .ok_or_else(|| BeatkeyError::ConfigError(format!("malformed key label '{}'", s)))?;
        let mode = match mode.trim() {
            "major" => Mode::Major,
            "minor" => Mode::Minor,
            other => {
                return Err(BeatkeyError::ConfigError(format!("unknown mode '{}'", other)));
            }
        };
        Ok(Key::new(tonic.parse()?, mode))
    }
}

impl From<Key> for String {
    fn from(key: Key) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for Key {
    type Error = BeatkeyError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

// =============================================================================
// Waveform and windows
// =============================================================================

/// Decoded mono PCM samples ready for analysis
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    /// Mono samples, nominally in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate in Hz (always > 0)
    pub sample_rate: u32,
}

impl Waveform {
    /// Create a waveform; a zero sample rate is rejected
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(BeatkeyError::invalid_waveform("sample rate must be positive"));
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Create a mono waveform from interleaved multi-channel samples by
    /// averaging the channels of each frame
    pub fn from_interleaved(samples: &[f32], channels: usize, sample_rate: u32) -> Result<Self> {
        if channels == 0 {
            return Err(BeatkeyError::invalid_waveform("channel count must be positive"));
        }
        if samples.len() % channels != 0 {
            return Err(BeatkeyError::invalid_waveform(format!(
                "{} interleaved samples do not divide into {} channels",
                samples.len(),
                channels
            )));
        }
        Self::new(to_mono(samples, channels), sample_rate)
    }

    /// An empty waveform at the given rate (degenerate, used for empty outputs)
    pub fn empty(sample_rate: u32) -> Self {
        Self {
            samples: Vec::new(),
            sample_rate: sample_rate.max(1),
        }
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if waveform is empty
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds
    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Check the waveform can be analysed: non-empty, positive rate, finite samples
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(BeatkeyError::invalid_waveform("sample rate must be positive"));
        }
        if self.samples.is_empty() {
            return Err(BeatkeyError::invalid_waveform("waveform has no samples"));
        }
        if let Some(pos) = self.samples.iter().position(|s| !s.is_finite()) {
            return Err(BeatkeyError::invalid_waveform(format!(
                "non-finite sample at index {}",
                pos
            )));
        }
        Ok(())
    }

    /// Check another waveform can be combined with this one
    pub fn ensure_compatible(&self, other: &Waveform) -> Result<()> {
        if self.sample_rate != other.sample_rate {
            return Err(BeatkeyError::invalid_waveform(format!(
                "sample rate mismatch: {} Hz vs {} Hz",
                self.sample_rate, other.sample_rate
            )));
        }
        if self.len() != other.len() {
            return Err(BeatkeyError::invalid_waveform(format!(
                "length mismatch: {} vs {} samples",
                self.len(),
                other.len()
            )));
        }
        Ok(())
    }

    /// Borrow the samples inside `range` (clamped to the signal)
    pub fn segment(&self, range: &SampleRange) -> &[f32] {
        let end = range.end.min(self.samples.len());
        let start = range.start.min(end);
        &self.samples[start..end]
    }

    /// Copy the samples inside `range` into a new waveform
    pub fn slice(&self, range: &SampleRange) -> Waveform {
        Waveform {
            samples: self.segment(range).to_vec(),
            sample_rate: self.sample_rate,
        }
    }
}

/// Convert interleaved multi-channel audio to mono
pub(crate) fn to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return samples.to_vec();
    }

    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Optional start/end times in seconds; `None` means track start / track end
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: Option<f64>,
    pub end: Option<f64>,
}

impl TimeWindow {
    /// Create a window, rejecting negative or reversed bounds
    pub fn new(start: Option<f64>, end: Option<f64>) -> Result<Self> {
        for t in [start, end].into_iter().flatten() {
            if !t.is_finite() || t < 0.0 {
                return Err(BeatkeyError::ConfigError(format!(
                    "window bound {} must be a non-negative number of seconds",
                    t
                )));
            }
        }
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(BeatkeyError::ConfigError(format!(
                    "window start {}s is after end {}s",
                    s, e
                )));
            }
        }
        Ok(Self { start, end })
    }

    /// Window covering the whole signal
    pub fn full() -> Self {
        Self::default()
    }

    /// Window from `start` seconds to the end of the signal
    pub fn from_start(start: f64) -> Result<Self> {
        Self::new(Some(start), None)
    }

    /// Window between two times in seconds
    pub fn between(start: f64, end: f64) -> Result<Self> {
        Self::new(Some(start), Some(end))
    }

    /// Convert to sample indices, clipping to `len` samples
    ///
    /// `index = round(time * sample_rate)`. Out-of-range bounds clip to the
    /// signal rather than failing.
    pub fn resolve(&self, sample_rate: u32, len: usize) -> SampleRange {
        let to_index = |t: f64| (t * sample_rate as f64).round() as usize;

        let requested_start = self.start.map(to_index).unwrap_or(0);
        let requested_end = self.end.map(to_index).unwrap_or(len);

        let end = requested_end.min(len);
        let start = requested_start.min(end);

        SampleRange {
            start,
            end,
            clipped: start != requested_start || end != requested_end,
        }
    }
}

/// A resolved, clipped range of sample indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleRange {
    pub start: usize,
    pub end: usize,
    /// True when the requested window extended past the signal
    pub clipped: bool,
}

impl SampleRange {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn as_range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Start and end in seconds at `sample_rate`
    pub fn to_seconds(&self, sample_rate: u32) -> (f64, f64) {
        (
            self.start as f64 / sample_rate as f64,
            self.end as f64 / sample_rate as f64,
        )
    }
}

// =============================================================================
// Analysis results
// =============================================================================

/// One key with its profile correlation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeyScore {
    pub key: Key,
    /// Pearson correlation against the key profile, rounded to 3 decimals
    pub correlation: f64,
}

/// Musical key analysis result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyEstimate {
    /// Most likely key
    pub best: KeyScore,
    /// Plausible second key whose correlation is close to the best
    pub alternate: Option<KeyScore>,
}

impl KeyEstimate {
    pub fn label(&self) -> String {
        self.best.key.to_string()
    }

    pub fn correlation(&self) -> f64 {
        self.best.correlation
    }
}

/// Tempo analysis result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempoEstimate {
    /// Estimated tempo in beats per minute (always > 0)
    pub bpm: f64,
    /// Tracked beat positions as sample indices
    pub beats: Vec<usize>,
}

impl TempoEstimate {
    /// Beat positions in seconds at `sample_rate`
    pub fn beat_times(&self, sample_rate: u32) -> Vec<f64> {
        self.beats
            .iter()
            .map(|&b| b as f64 / sample_rate as f64)
            .collect()
    }
}

/// Either an estimate or the reason no estimate could be made
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Estimated(T),
    Indeterminate { reason: String },
}

impl<T> Outcome<T> {
    pub fn indeterminate(reason: impl Into<String>) -> Self {
        Outcome::Indeterminate {
            reason: reason.into(),
        }
    }

    pub fn estimate(&self) -> Option<&T> {
        match self {
            Outcome::Estimated(value) => Some(value),
            Outcome::Indeterminate { .. } => None,
        }
    }

    pub fn is_estimated(&self) -> bool {
        matches!(self, Outcome::Estimated(_))
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Estimated(_) => None,
            Outcome::Indeterminate { reason } => Some(reason),
        }
    }
}

impl<T> From<Result<T>> for Outcome<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => Outcome::Estimated(value),
            Err(e) => Outcome::indeterminate(e.to_string()),
        }
    }
}

/// Combined key + tempo report for one waveform
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    /// Source file, when the waveform came from disk
    pub source: Option<PathBuf>,
    /// Duration of the full waveform in seconds
    pub duration_seconds: f64,
    /// Sample rate of the analysed waveform
    pub sample_rate: u32,
    pub tempo: Outcome<TempoEstimate>,
    pub key: Outcome<KeyEstimate>,
    /// Timestamp of analysis
    pub analyzed_at: chrono::DateTime<chrono::Utc>,
}

impl AnalysisReport {
    /// True when both key and tempo were estimated
    pub fn is_complete(&self) -> bool {
        self.tempo.is_estimated() && self.key.is_estimated()
    }

    /// True when neither key nor tempo could be estimated
    pub fn is_empty(&self) -> bool {
        !self.tempo.is_estimated() && !self.key.is_estimated()
    }
}

// =============================================================================
// Supported formats
// =============================================================================

/// Audio formats supported by beatkey
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioFormat {
    Mp3,
    Wav,
    Flac,
    Aiff,
    Ogg,
}

impl AudioFormat {
    /// Detect format from file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "mp3" => Some(AudioFormat::Mp3),
            "wav" => Some(AudioFormat::Wav),
            "flac" => Some(AudioFormat::Flac),
            "aiff" | "aif" => Some(AudioFormat::Aiff),
            "ogg" => Some(AudioFormat::Ogg),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "MP3",
            AudioFormat::Wav => "WAV",
            AudioFormat::Flac => "FLAC",
            AudioFormat::Aiff => "AIFF",
            AudioFormat::Ogg => "OGG",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pitch_class_round_trip() {
        for (i, pitch) in PitchClass::ALL.iter().enumerate() {
            assert_eq!(pitch.to_index(), i);
            assert_eq!(PitchClass::from_index(i), *pitch);
        }
        assert_eq!(PitchClass::from_index(14), PitchClass::D);
        assert_eq!(PitchClass::B.transpose(1), PitchClass::C);
    }

    #[test]
    fn test_key_label_parse() {
        let key = Key::minor(PitchClass::Fs);
        assert_eq!(key.to_string(), "F# minor");
        assert_eq!("F# minor".parse::<Key>().unwrap(), key);
        assert!("H major".parse::<Key>().is_err());
        assert!("C dorian".parse::<Key>().is_err());
        assert!("Cmajor".parse::<Key>().is_err());
    }

    #[test]
    fn test_key_serializes_as_label() {
        let json = serde_json::to_string(&Key::major(PitchClass::As)).unwrap();
        assert_eq!(json, "\"A# major\"");
        let back: Key = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Key::major(PitchClass::As));
    }

    #[test]
    fn test_waveform_rejects_zero_rate() {
        assert!(matches!(
            Waveform::new(vec![0.0; 10], 0),
            Err(BeatkeyError::InvalidWaveform { .. })
        ));
    }

    #[test]
    fn test_waveform_validate() {
        let empty = Waveform::new(vec![], 22050).unwrap();
        assert!(empty.validate().is_err());

        let nan = Waveform::new(vec![0.0, f32::NAN], 22050).unwrap();
        assert!(nan.validate().is_err());

        let ok = Waveform::new(vec![0.0, 0.5], 22050).unwrap();
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_from_interleaved_stereo() {
        let stereo = vec![0.5, 0.3, 0.8, 0.2, 1.0, 0.0];
        let mono = Waveform::from_interleaved(&stereo, 2, 44100).unwrap();
        assert_eq!(mono.len(), 3);
        assert!((mono.samples[0] - 0.4).abs() < 0.001);
        assert!((mono.samples[1] - 0.5).abs() < 0.001);
        assert!((mono.samples[2] - 0.5).abs() < 0.001);

        assert!(Waveform::from_interleaved(&stereo[..5], 2, 44100).is_err());
    }

    #[test]
    fn test_ensure_compatible() {
        let a = Waveform::new(vec![0.0; 4], 22050).unwrap();
        let b = Waveform::new(vec![0.0; 4], 44100).unwrap();
        let c = Waveform::new(vec![0.0; 3], 22050).unwrap();
        assert!(a.ensure_compatible(&a.clone()).is_ok());
        assert!(a.ensure_compatible(&b).is_err());
        assert!(a.ensure_compatible(&c).is_err());
    }

    #[test]
    fn test_time_window_rejects_reversed_bounds() {
        assert!(TimeWindow::between(60.0, 35.0).is_err());
        assert!(TimeWindow::between(-1.0, 35.0).is_err());
        assert!(TimeWindow::between(35.0, 35.0).is_ok());
    }

    #[test]
    fn test_time_window_rounds_to_nearest_sample() {
        let window = TimeWindow::between(0.5, 1.0).unwrap();
        // 0.5 * 3 = 1.5 rounds to 2, 1.0 * 3 = 3
        let range = window.resolve(3, 100);
        assert_eq!(range.start, 2);
        assert_eq!(range.end, 3);
        assert!(!range.clipped);
    }

    #[test]
    fn test_time_window_clips_to_track_length() {
        let sr = 22050;
        let len = 40 * sr as usize;
        let range = TimeWindow::between(35.0, 60.0).unwrap().resolve(sr, len);
        assert_eq!(range.start, 35 * sr as usize);
        assert_eq!(range.end, len);
        assert!(range.clipped);
        let (start, end) = range.to_seconds(sr);
        assert!((start - 35.0).abs() < 1e-9);
        assert!((end - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_time_window_past_end_is_empty() {
        let range = TimeWindow::between(35.0, 60.0).unwrap().resolve(100, 1000);
        assert!(range.is_empty());
        assert!(range.clipped);
    }

    #[test]
    fn test_full_window() {
        let range = TimeWindow::full().resolve(22050, 1234);
        assert_eq!(range.as_range(), 0..1234);
        assert!(!range.clipped);
    }

    #[test]
    fn test_outcome_from_result() {
        let ok: Outcome<u32> = Outcome::from(Ok(3));
        assert_eq!(ok.estimate(), Some(&3));

        let err: Outcome<u32> = Outcome::from(Err(BeatkeyError::indeterminate_tempo("no onsets")));
        assert!(!err.is_estimated());
        assert!(err.reason().unwrap().contains("no onsets"));
    }

    #[test]
    fn test_audio_format_extensions() {
        assert_eq!(AudioFormat::from_extension("WAV"), Some(AudioFormat::Wav));
        assert_eq!(AudioFormat::from_extension("aif"), Some(AudioFormat::Aiff));
        assert_eq!(AudioFormat::from_extension("txt"), None);
    }
}

//! Runtime configuration settings

use crate::analysis::{AlternatePolicy, KeyOptions, TempoOptions};
use crate::error::{BeatkeyError, Result};
use crate::pipeline::{AnalysisOptions, PoolConfig};
use crate::types::TimeWindow;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings for the analysis pipeline
#[derive(Debug, Clone)]
pub struct Settings {
    /// Input path (file or directory)
    pub input: PathBuf,
    /// Output directory, if results should be written
    pub output: Option<PathBuf>,
    /// Parameters of every single-track analysis
    pub analysis: AnalysisOptions,
    /// Worker and queue sizing
    pub pool: PoolConfig,
    /// Longest wait for one track
    pub timeout: Duration,
    /// Number of DSP threads
    pub analysis_threads: usize,
    /// Scan recursively
    pub recursive: bool,
    /// Overwrite existing analysis
    pub force: bool,
    /// Output JSON
    pub output_json: bool,
    /// Show progress bar
    pub show_progress: bool,
    /// Dry run mode - show files without processing
    pub dry_run: bool,
}

impl Settings {
    /// Create settings from CLI arguments
    pub fn from_cli(cli: &super::cli::Cli) -> Self {
        let default_threads = num_cpus::get().saturating_sub(1).max(1);

        let key = KeyOptions {
            alternate_policy: cli.alt_policy.parse::<AlternatePolicy>().unwrap_or_default(),
            ..KeyOptions::default()
        };

        let tempo = TempoOptions {
            prior_bpm: cli.prior_bpm,
            tightness: cli.tightness,
            trim: cli.trim,
            ..TempoOptions::default()
        };

        let analysis = AnalysisOptions {
            lead_in_seconds: cli.lead_in,
            key_window: TimeWindow {
                start: Some(cli.key_start),
                end: Some(cli.key_end),
            },
            tempo,
            key,
            ..AnalysisOptions::default()
        };

        Self {
            input: cli.input.clone(),
            output: cli.output.clone(),
            analysis,
            pool: PoolConfig {
                worker_limit: cli.workers,
                queue_capacity: cli.queue,
            },
            timeout: Duration::from_secs(cli.timeout),
            analysis_threads: cli.threads.unwrap_or(default_threads),
            recursive: cli.recursive,
            force: cli.force,
            output_json: cli.json,
            show_progress: !cli.quiet,
            dry_run: cli.dry_run,
        }
    }

    /// Reject settings no analysis could run with
    pub fn validate(&self) -> Result<()> {
        if self.pool.worker_limit == 0 {
            return Err(BeatkeyError::ConfigError(
                "at least one worker is required".to_string(),
            ));
        }
        if self.analysis_threads == 0 {
            return Err(BeatkeyError::ConfigError(
                "at least one DSP thread is required".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(BeatkeyError::ConfigError(
                "timeout must be at least one second".to_string(),
            ));
        }
        self.analysis.validate()
    }

    /// Path of the JSON results file, when results are written
    pub fn json_path(&self) -> Option<PathBuf> {
        match &self.output {
            Some(dir) if self.output_json => Some(dir.join(crate::export::JSON_FILE_NAME)),
            _ => None,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            input: PathBuf::from("."),
            output: None,
            analysis: AnalysisOptions::default(),
            pool: PoolConfig::default(),
            timeout: Duration::from_secs(300),
            analysis_threads: num_cpus::get().saturating_sub(1).max(1),
            recursive: true,
            force: false,
            output_json: true,
            show_progress: true,
            dry_run: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Cli;
    use clap::Parser;

    #[test]
    fn test_from_cli_maps_analysis_options() {
        let cli = Cli::parse_from([
            "beatkey",
            "-i",
            "music",
            "-o",
            "out",
            "--lead-in",
            "10",
            "--key-start",
            "5",
            "--key-end",
            "20",
            "--prior-bpm",
            "128",
            "--alt-policy",
            "closest",
            "--workers",
            "2",
            "--queue",
            "4",
        ]);
        let settings = Settings::from_cli(&cli);

        assert_eq!(settings.analysis.lead_in_seconds, 10.0);
        assert_eq!(settings.analysis.key_window.start, Some(5.0));
        assert_eq!(settings.analysis.key_window.end, Some(20.0));
        assert_eq!(settings.analysis.tempo.prior_bpm, 128.0);
        assert_eq!(
            settings.analysis.key.alternate_policy,
            AlternatePolicy::ClosestBelowBest
        );
        assert_eq!(settings.pool.capacity(), 6);
        assert_eq!(settings.json_path(), Some(PathBuf::from("out/beatkey.json")));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.analysis, AnalysisOptions::default());
        assert_eq!(settings.timeout, Duration::from_secs(300));
        assert!(settings.json_path().is_none());
    }

    #[test]
    fn test_validation_failures() {
        let mut settings = Settings::default();
        settings.pool.worker_limit = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.analysis.key_window = TimeWindow {
            start: Some(60.0),
            end: Some(35.0),
        };
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.analysis.tempo.prior_bpm = 0.0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.analysis.tempo.tightness = -1.0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.analysis.lead_in_seconds = -5.0;
        assert!(settings.validate().is_err());
    }
}

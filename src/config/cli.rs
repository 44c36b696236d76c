//! CLI argument parsing and configuration

use clap::Parser;
use std::path::PathBuf;

/// beatkey - musical key and tempo estimation
///
/// Estimates the key (with an optional close alternate) and the tempo and
/// beat positions of audio files. Prints a summary per track and, with an
/// output directory, writes the results to beatkey.json.
#[derive(Parser, Debug)]
#[command(name = "beatkey")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Input path (file or directory)
    #[arg(short, long, value_name = "PATH")]
    pub input: PathBuf,

    /// Output directory for beatkey.json
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Seconds skipped at the start of every track
    #[arg(long, value_name = "SECS", default_value_t = 30.0)]
    pub lead_in: f64,

    /// Start of the key window, in seconds after the lead-in
    #[arg(long, value_name = "SECS", default_value_t = 35.0)]
    pub key_start: f64,

    /// End of the key window, in seconds after the lead-in
    #[arg(long, value_name = "SECS", default_value_t = 60.0)]
    pub key_end: f64,

    /// Starting tempo estimate for the tempo prior
    #[arg(long, value_name = "BPM", default_value_t = 110.0)]
    pub prior_bpm: f64,

    /// How strictly beats follow the estimated tempo
    #[arg(long, default_value_t = 100.0)]
    pub tightness: f64,

    /// Drop weak beats at the start and end of a track
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub trim: bool,

    /// How the alternate key is picked among close candidates
    #[arg(long, value_name = "POLICY", default_value = "last")]
    #[arg(value_parser = ["last", "closest"])]
    pub alt_policy: String,

    /// Tracks analysed at the same time
    #[arg(short, long, value_name = "N", default_value_t = 3)]
    pub workers: usize,

    /// Tracks allowed to wait for a free worker
    #[arg(long, value_name = "N", default_value_t = 8)]
    pub queue: usize,

    /// Give up waiting on a single track after this many seconds
    #[arg(long, value_name = "SECS", default_value_t = 300)]
    pub timeout: u64,

    /// Number of DSP threads (defaults to CPU count - 1)
    #[arg(short = 'j', long, value_name = "N")]
    pub threads: Option<usize>,

    /// Scan subdirectories recursively
    #[arg(short, long, default_value_t = true, action = clap::ArgAction::Set)]
    pub recursive: bool,

    /// Overwrite existing analysis (by default, skips already-analyzed files)
    #[arg(long, default_value = "false")]
    pub force: bool,

    /// Write beatkey.json when an output directory is given
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub json: bool,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (errors only, no progress bar)
    #[arg(short, long, default_value = "false")]
    pub quiet: bool,

    /// Dry run - show files that would be analyzed without processing
    #[arg(long, default_value = "false")]
    pub dry_run: bool,
}

impl Cli {
    /// Log filter directive for the verbosity flags
    pub fn log_filter(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

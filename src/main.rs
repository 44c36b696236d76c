//! beatkey CLI entry point

use beatkey::config::{Cli, Settings};
use beatkey::pipeline::{self, PipelineResult};
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    let settings = match prepare(&cli) {
        Ok(settings) => settings,
        Err(message) => {
            eprintln!("Error: {}", message);
            return ExitCode::FAILURE;
        }
    };

    match pipeline::run(&settings) {
        Ok(result) => {
            print_summary(&result);
            // Partial reports do not fail the run
            if result.failed > 0 {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            eprintln!("Fatal error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// RUST_LOG wins over the verbosity flags
fn init_logging(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Check the paths on disk and build validated settings
fn prepare(cli: &Cli) -> Result<Settings, String> {
    if !cli.input.exists() {
        return Err(format!(
            "Input path does not exist: {}\n\n  Examples:\n    beatkey -i ~/Music/set -o ./analyzed\n    beatkey -i ./track.mp3",
            cli.input.display()
        ));
    }

    // pipeline::run creates the output directory, not its parents
    let missing_parent = cli
        .output
        .as_deref()
        .and_then(|o| o.parent())
        .filter(|p| !p.as_os_str().is_empty() && !p.exists());
    if let Some(parent) = missing_parent {
        return Err(format!(
            "Output parent directory does not exist: {}\n\n  Tip: mkdir -p {}",
            parent.display(),
            parent.display()
        ));
    }

    let settings = Settings::from_cli(cli);
    settings.validate().map_err(|e| e.to_string())?;
    Ok(settings)
}

fn print_summary(result: &PipelineResult) {
    println!();
    println!(
        "Summary: {} complete, {} partial, {} failed, {} skipped (of {} total)",
        result.complete, result.partial, result.failed, result.skipped, result.total_files
    );
}

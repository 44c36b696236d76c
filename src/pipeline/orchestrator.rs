//! Batch pipeline
//!
//! Coordinates file discovery, pooled analysis, and export. Files are fed to
//! the analysis pool in discovery order; when the pool is full the oldest
//! outstanding ticket is collected before retrying.

use crate::config::Settings;
use crate::discovery::{self, DiscoveredFile};
use crate::error::{BeatkeyError, Result};
use crate::export;
use crate::pipeline::{AnalysisPool, Analyzer, Ticket};
use crate::types::{AnalysisReport, AudioFormat};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Pause before resubmitting when every admitted job has already timed out
const BUSY_BACKOFF: Duration = Duration::from_millis(50);

/// Pipeline result summary
#[derive(Debug, Default)]
pub struct PipelineResult {
    pub total_files: usize,
    /// Both key and tempo estimated
    pub complete: usize,
    /// Reports with at least one indeterminate part
    pub partial: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Reports produced by this run, in discovery order
    pub reports: Vec<AnalysisReport>,
}

/// Run the full analysis pipeline
pub fn run(settings: &Settings) -> Result<PipelineResult> {
    let pipeline_start = Instant::now();

    settings.validate()?;
    configure_thread_pool(settings.analysis_threads)?;

    // Phase 1: Discovery
    info!("Scanning for audio files...");
    let files = discovery::scan(&settings.input, settings.recursive)?;

    if files.is_empty() {
        return Ok(PipelineResult::default());
    }

    info!(
        "Found {} audio files in {:.2}s",
        files.len(),
        pipeline_start.elapsed().as_secs_f64()
    );

    if settings.dry_run {
        return Ok(run_dry_run(&files, settings));
    }

    // Earlier results are kept in the export and drive the skip logic
    let json_path = settings.json_path();
    let existing = json_path
        .as_deref()
        .map(export::read_existing_reports)
        .unwrap_or_default();

    let existing_paths: HashSet<String> = if settings.force {
        debug!("Force mode enabled, will re-analyze all files");
        HashSet::new()
    } else {
        existing.iter().filter_map(|r| r.path.clone()).collect()
    };

    let (files_to_analyze, skipped_existing): (Vec<_>, Vec<_>) =
        files.into_iter().partition(|f| {
            let already = existing_paths.contains(&*f.path.to_string_lossy());
            if already {
                debug!("Skipping {} (already analyzed)", f.path.display());
            }
            !already
        });

    let skipped_count = skipped_existing.len();
    if skipped_count > 0 {
        info!(
            "Skipping {} already-analyzed files (use --force to re-analyze)",
            skipped_count
        );
    }

    let total_files = files_to_analyze.len() + skipped_count;

    if files_to_analyze.is_empty() {
        info!("All files already analyzed, nothing to do");
        return Ok(PipelineResult {
            total_files,
            skipped: skipped_count,
            ..PipelineResult::default()
        });
    }

    // Phase 2: Analysis
    info!("Analyzing {} files", files_to_analyze.len());
    let analysis_start = Instant::now();
    let mut result = analyze_files(&files_to_analyze, settings)?;
    info!(
        "Analysis completed in {:.2}s",
        analysis_start.elapsed().as_secs_f64()
    );

    // Phase 3: Export
    if let Some(path) = json_path {
        if !result.reports.is_empty() {
            export_results(&result.reports, existing, &path, settings)?;
        }
    }

    info!(
        "Total pipeline time: {:.2}s",
        pipeline_start.elapsed().as_secs_f64()
    );

    result.total_files = total_files;
    result.skipped += skipped_count;
    Ok(result)
}

/// Dry run mode - show files that would be analyzed without processing
fn run_dry_run(files: &[DiscoveredFile], settings: &Settings) -> PipelineResult {
    println!();
    println!("=== DRY RUN MODE ===");
    println!();

    let mut by_directory: HashMap<PathBuf, Vec<&DiscoveredFile>> = HashMap::new();
    let mut by_format: HashMap<AudioFormat, usize> = HashMap::new();
    for file in files {
        let dir = file.path.parent().unwrap_or(&file.path).to_path_buf();
        by_directory.entry(dir).or_default().push(file);
        *by_format.entry(file.format).or_default() += 1;
    }

    let mut directories: Vec<_> = by_directory.keys().cloned().collect();
    directories.sort();

    for dir in &directories {
        let dir_files = &by_directory[dir];
        println!("{}/ ({} files)", dir.display(), dir_files.len());
        for file in dir_files {
            let name = file.path.file_name().and_then(|n| n.to_str()).unwrap_or("?");
            println!("  {}", name);
        }
        println!();
    }

    let total_bytes: u64 = files.iter().map(|f| f.size_bytes).sum();
    println!("─────────────────────────────────────────");
    println!();
    println!(
        "Would analyze {} files ({:.1} MB):",
        files.len(),
        total_bytes as f64 / (1024.0 * 1024.0)
    );

    let mut formats: Vec<_> = by_format.into_iter().collect();
    formats.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.name().cmp(b.0.name())));
    for (format, count) in formats {
        println!("  {} {} files", count, format.name());
    }
    println!();

    println!(
        "Workers: {} ({} queue slots), lead-in {:.0}s, key window {:.0}-{:.0}s",
        settings.pool.worker_limit,
        settings.pool.queue_capacity,
        settings.analysis.lead_in_seconds,
        settings.analysis.key_window.start.unwrap_or(0.0),
        settings.analysis.key_window.end.unwrap_or(f64::INFINITY),
    );
    if let Some(path) = settings.json_path() {
        println!("Would create: {}", path.display());
    }
    println!();

    PipelineResult {
        total_files: files.len(),
        // All "skipped" in dry run mode
        skipped: files.len(),
        ..PipelineResult::default()
    }
}

/// Configure the Rayon thread pool used by the DSP inner loops
fn configure_thread_pool(num_threads: usize) -> Result<()> {
    match rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()
    {
        Ok(()) => debug!("Configured DSP thread pool with {} threads", num_threads),
        Err(e) if e.to_string().contains("already been initialized") => {
            // Tests and repeated runs in one process share the first pool
            debug!("Thread pool already initialized, using existing pool");
        }
        Err(e) => {
            return Err(BeatkeyError::ConfigError(format!(
                "Failed to configure thread pool: {}",
                e
            )));
        }
    }
    Ok(())
}

/// Submit every file to the pool and collect the outcomes in order
fn analyze_files(files: &[DiscoveredFile], settings: &Settings) -> Result<PipelineResult> {
    let analyzer = Analyzer::new(settings.analysis.clone());
    let pool = AnalysisPool::new(analyzer, settings.pool)?;

    let progress_bar = if settings.show_progress {
        let pb = ProgressBar::new(files.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        Some(pb)
    } else {
        None
    };

    let mut collector = Collector {
        result: PipelineResult::default(),
        timeout: settings.timeout,
        progress_bar: progress_bar.as_ref(),
    };
    let mut pending: VecDeque<(&DiscoveredFile, Ticket)> = VecDeque::new();

    for file in files {
        loop {
            match pool.submit_file(&file.path) {
                Ok(ticket) => {
                    pending.push_back((file, ticket));
                    break;
                }
                Err(BeatkeyError::Busy { .. }) => match pending.pop_front() {
                    Some((done, ticket)) => collector.collect(done, ticket),
                    // Only timed-out jobs hold the slots; give them a moment
                    None => std::thread::sleep(BUSY_BACKOFF),
                },
                Err(e) => return Err(e),
            }
        }
    }

    while let Some((file, ticket)) = pending.pop_front() {
        collector.collect(file, ticket);
    }

    if let Some(pb) = &progress_bar {
        pb.finish_with_message("Analysis complete");
    }

    Ok(collector.result)
}

/// Tallies finished tickets into a pipeline result
struct Collector<'a> {
    result: PipelineResult,
    timeout: Duration,
    progress_bar: Option<&'a ProgressBar>,
}

impl Collector<'_> {
    fn collect(&mut self, file: &DiscoveredFile, ticket: Ticket) {
        let name = file
            .path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        match ticket.wait_timeout(self.timeout) {
            Ok(report) => {
                let summary = export::summary(&report)
                    .lines()
                    .map(|line| format!("  {}", line))
                    .collect::<Vec<_>>()
                    .join("\n");
                self.print(&format!("{}\n{}", name, summary));

                if report.is_complete() {
                    self.result.complete += 1;
                } else {
                    self.result.partial += 1;
                }
                self.result.reports.push(report);
            }
            Err(e) if e.is_recoverable() => {
                warn!("Skipping {}: {}", file.path.display(), e);
                self.result.skipped += 1;
            }
            Err(e) => {
                error!("Failed {}: {}", file.path.display(), e);
                self.result.failed += 1;
            }
        }

        if let Some(pb) = self.progress_bar {
            pb.inc(1);
            pb.set_message(name);
        }
    }

    fn print(&self, text: &str) {
        match self.progress_bar {
            Some(pb) => pb.println(text),
            None => println!("{}", text),
        }
    }
}

/// Write the JSON export
fn export_results(
    reports: &[AnalysisReport],
    existing: Vec<export::ReportJson>,
    json_path: &std::path::Path,
    settings: &Settings,
) -> Result<()> {
    if let Some(dir) = &settings.output {
        std::fs::create_dir_all(dir).map_err(|e| BeatkeyError::output_error(dir, e))?;
    }

    export::write_json(reports, existing, json_path)?;

    println!();
    println!("✓ Wrote {} reports to {}", reports.len(), json_path.display());
    Ok(())
}

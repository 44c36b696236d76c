//! JSON export for interoperability with other tools

use crate::error::{BeatkeyError, Result};
use crate::types::{AnalysisReport, KeyEstimate, Outcome, TempoEstimate};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::{debug, info};

/// JSON output schema version
const SCHEMA_VERSION: &str = "1.0";

/// Top-level JSON output structure
#[derive(Debug, Serialize, Deserialize)]
pub struct BeatkeyJson {
    /// Schema version for forward compatibility
    pub version: String,
    pub metadata: ExportMetadata,
    pub reports: Vec<ReportJson>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExportMetadata {
    /// beatkey version that generated this file
    pub generator_version: String,
    pub exported_at: String,
    pub report_count: usize,
}

/// JSON representation of one analysis report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportJson {
    /// Source file; null for in-memory waveforms
    pub path: Option<String>,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub tempo: TempoJson,
    pub key: KeyJson,
    pub analyzed_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TempoJson {
    Estimated {
        bpm: f64,
        beat_count: usize,
        /// Beat positions in seconds from the start of the track
        #[serde(default)]
        beat_times: Vec<f64>,
    },
    Indeterminate {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum KeyJson {
    Estimated {
        label: String,
        correlation: f64,
        alt_label: Option<String>,
        alt_correlation: Option<f64>,
    },
    Indeterminate {
        reason: String,
    },
}

impl ReportJson {
    pub fn from_report(report: &AnalysisReport) -> Self {
        Self {
            path: report
                .source
                .as_ref()
                .map(|p| p.to_string_lossy().to_string()),
            duration_seconds: report.duration_seconds,
            sample_rate: report.sample_rate,
            tempo: tempo_json(&report.tempo, report.sample_rate),
            key: key_json(&report.key),
            analyzed_at: report.analyzed_at.to_rfc3339(),
        }
    }
}

fn tempo_json(tempo: &Outcome<TempoEstimate>, sample_rate: u32) -> TempoJson {
    match tempo {
        Outcome::Estimated(estimate) => TempoJson::Estimated {
            bpm: estimate.bpm,
            beat_count: estimate.beats.len(),
            beat_times: estimate.beat_times(sample_rate),
        },
        Outcome::Indeterminate { reason } => TempoJson::Indeterminate {
            reason: reason.clone(),
        },
    }
}

fn key_json(key: &Outcome<KeyEstimate>) -> KeyJson {
    match key {
        Outcome::Estimated(estimate) => KeyJson::Estimated {
            label: estimate.best.key.to_string(),
            correlation: estimate.best.correlation,
            alt_label: estimate.alternate.map(|alt| alt.key.to_string()),
            alt_correlation: estimate.alternate.map(|alt| alt.correlation),
        },
        Outcome::Indeterminate { reason } => KeyJson::Indeterminate {
            reason: reason.clone(),
        },
    }
}

/// Write reports to a JSON file
///
/// `existing` entries are kept unless a new report has the same path. Uses
/// atomic write pattern: writes to a temp file first, then renames.
pub fn write_json(
    reports: &[AnalysisReport],
    existing: Vec<ReportJson>,
    output_path: &Path,
) -> Result<()> {
    let fresh: Vec<ReportJson> = reports.iter().map(ReportJson::from_report).collect();
    let replaced: HashSet<&str> = fresh.iter().filter_map(|r| r.path.as_deref()).collect();

    let mut merged: Vec<ReportJson> = existing
        .into_iter()
        .filter(|r| r.path.as_deref().map_or(true, |p| !replaced.contains(p)))
        .collect();
    let kept = merged.len();
    merged.extend(fresh.iter().cloned());
    merged.sort_by(|a, b| a.path.cmp(&b.path));

    let output = BeatkeyJson {
        version: SCHEMA_VERSION.to_string(),
        metadata: ExportMetadata {
            generator_version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: chrono::Utc::now().to_rfc3339(),
            report_count: merged.len(),
        },
        reports: merged,
    };

    // Temp file in the same directory so the rename stays on one filesystem
    let temp_path = output_path.with_extension("json.tmp");
    let file = File::create(&temp_path).map_err(|e| BeatkeyError::OutputError {
        path: output_path.to_path_buf(),
        reason: format!("Failed to create temp file: {}", e),
    })?;

    serde_json::to_writer_pretty(BufWriter::new(file), &output).map_err(|e| {
        let _ = std::fs::remove_file(&temp_path);
        BeatkeyError::OutputError {
            path: output_path.to_path_buf(),
            reason: e.to_string(),
        }
    })?;

    std::fs::rename(&temp_path, output_path).map_err(|e| {
        let _ = std::fs::remove_file(&temp_path);
        BeatkeyError::OutputError {
            path: output_path.to_path_buf(),
            reason: format!("Failed to finalize file: {}", e),
        }
    })?;

    info!(
        "Wrote {} reports ({} new, {} kept) to {}",
        output.metadata.report_count,
        fresh.len(),
        kept,
        output_path.display()
    );

    Ok(())
}

/// Read the reports of an earlier run
///
/// A missing or unreadable file yields no reports.
pub fn read_existing_reports(json_path: &Path) -> Vec<ReportJson> {
    if !json_path.exists() {
        debug!("No existing analysis file at {}", json_path.display());
        return Vec::new();
    }

    let file = match File::open(json_path) {
        Ok(f) => f,
        Err(e) => {
            debug!("Could not open existing analysis: {}", e);
            return Vec::new();
        }
    };

    match serde_json::from_reader::<_, BeatkeyJson>(BufReader::new(file)) {
        Ok(json) => json.reports,
        Err(e) => {
            debug!("Could not parse existing analysis: {}", e);
            Vec::new()
        }
    }
}

/// Paths that already have a report in `json_path`
pub fn read_existing_analysis(json_path: &Path) -> HashSet<String> {
    let paths: HashSet<String> = read_existing_reports(json_path)
        .into_iter()
        .filter_map(|r| r.path)
        .collect();

    debug!(
        "Loaded {} previously analyzed tracks from {}",
        paths.len(),
        json_path.display()
    );

    paths
}

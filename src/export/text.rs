//! Plain-text report summary

use crate::types::{AnalysisReport, KeyEstimate, Outcome, TempoEstimate};

/// Tempo line, e.g. `BPM: 120.0`
pub fn tempo_line(tempo: &Outcome<TempoEstimate>) -> String {
    match tempo {
        Outcome::Estimated(estimate) => format!("BPM: {:.1}", estimate.bpm),
        Outcome::Indeterminate { reason } => format!("BPM: indeterminate ({})", reason),
    }
}

/// Key line, e.g. `Likely key: C major, correlation: 0.791`
pub fn key_line(key: &Outcome<KeyEstimate>) -> String {
    match key {
        Outcome::Estimated(estimate) => {
            let mut line = format!(
                "Likely key: {}, correlation: {}",
                estimate.best.key, estimate.best.correlation
            );
            if let Some(alt) = &estimate.alternate {
                line.push_str(&format!(
                    "  also possible: {}, correlation: {}",
                    alt.key, alt.correlation
                ));
            }
            line
        }
        Outcome::Indeterminate { reason } => format!("Likely key: indeterminate ({})", reason),
    }
}

/// Both lines of a report
pub fn summary(report: &AnalysisReport) -> String {
    format!("{}\n{}", tempo_line(&report.tempo), key_line(&report.key))
}

//! Report output: text summaries and JSON

pub mod json;
pub mod text;

pub use json::{read_existing_analysis, read_existing_reports, write_json, ReportJson};
pub use text::summary;

/// Results file written into the output directory
pub const JSON_FILE_NAME: &str = "beatkey.json";

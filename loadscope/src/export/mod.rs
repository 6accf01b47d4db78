//! Session export
//!
//! Sessions are written as CSV (the two-section format with sample rows
//! followed by event markers) or as JSON for external analysis. The CSV
//! parser reads exports back for `loadscope summarize`.

pub mod csv;
pub mod json;
pub mod summary;

pub use csv::{parse as parse_csv, parse_file, write_csv, write_csv_file, ParsedCsv};
pub use json::{write_json, write_json_file};
pub use summary::SessionSummary;

//! Report generation.
//!
//! Markdown and JSON renderings of a job, and CSV views of its metrics.

pub mod csv;
pub mod generator;

pub use self::csv::write_csv_exports;
pub use generator::{generate_json_report, generate_markdown_report};

//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::AnalysisType;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CASA Analyzer - computer-assisted sperm analysis
///
/// Computes per-track kinematics, population motility metrics and a
/// quality assessment from detector/tracker output, and keeps the
/// results of every analysis on disk.
///
/// Examples:
///   casa analyze sample_tracks.json
///   casa analyze slide.json --type image --name "Slide 4"
///   casa list
///   casa result 3f2a... --format json
///   casa export 3f2a... --format csv --output exports/
///   casa init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to configuration file
    ///
    /// If not specified, looks for .casa.toml in the current directory
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory holding analysis records
    #[arg(long, global = true, value_name = "DIR", env = "CASA_RESULTS_DIR")]
    pub results_dir: Option<PathBuf>,

    /// Maximum number of analyses processed at once
    #[arg(long, global = true, value_name = "NUM")]
    pub concurrency: Option<usize>,

    /// Enable verbose logging output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Analyze detector output and wait for the result
    Analyze {
        /// Detection/tracking document written by the detector
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Kind of sample the document describes
        #[arg(short = 't', long = "type", default_value = "video", value_name = "TYPE")]
        kind: InputKind,

        /// Display name of the sample (defaults to the file name)
        #[arg(long)]
        name: Option<String>,

        /// Also write a Markdown report to this file
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Show the status of an analysis
    Status {
        /// Analysis ID
        id: String,
    },

    /// Print the result of a completed analysis
    Result {
        /// Analysis ID
        id: String,

        /// Output format (markdown, json)
        #[arg(short, long, default_value = "markdown", value_name = "FORMAT")]
        format: OutputFormat,
    },

    /// List stored analyses, newest first
    List,

    /// Delete an analysis and its stored record
    Delete {
        /// Analysis ID
        id: String,
    },

    /// Export an analysis to a file
    Export {
        /// Analysis ID
        id: String,

        /// Export format (csv, json, markdown)
        #[arg(short, long, default_value = "csv", value_name = "FORMAT")]
        format: ExportFormat,

        /// Output file, or directory for CSV (defaults to the results directory)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Generate a default .casa.toml configuration file
    InitConfig,
}

/// Kind of input passed to `analyze`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum InputKind {
    /// Tracked video (default)
    #[default]
    Video,
    /// Still image
    Image,
}

impl From<InputKind> for AnalysisType {
    fn from(kind: InputKind) -> Self {
        match kind {
            InputKind::Video => AnalysisType::Video,
            InputKind::Image => AnalysisType::Image,
        }
    }
}

/// Output format for printed results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

/// Format for `export`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportFormat {
    /// Population row and per-track table
    Csv,
    /// Full analysis record
    Json,
    /// Markdown report
    Markdown,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::Markdown => "md",
        }
    }
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.concurrency == Some(0) {
            return Err("Concurrency must be at least 1".to_string());
        }

        if let Command::Analyze { ref input, .. } = self.command {
            if !input.exists() {
                return Err(format!("Input file does not exist: {}", input.display()));
            }
            if !input.is_file() {
                return Err(format!("Input is not a file: {}", input.display()));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    ///
    /// `config_verbose` is the `general.verbose` setting of the config file.
    pub fn log_level(&self, config_verbose: bool) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose || config_verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("casa").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_parse_analyze_defaults() {
        let cli = parse(&["analyze", "tracks.json"]);
        match cli.command {
            Command::Analyze {
                input,
                kind,
                name,
                output,
            } => {
                assert_eq!(input, PathBuf::from("tracks.json"));
                assert_eq!(kind, InputKind::Video);
                assert!(name.is_none());
                assert!(output.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert!(cli.config.is_none());
        assert!(cli.concurrency.is_none());
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = parse(&[
            "export",
            "abc",
            "--format",
            "json",
            "--results-dir",
            "/tmp/casa",
            "--concurrency",
            "2",
            "-v",
        ]);
        assert!(matches!(
            cli.command,
            Command::Export {
                format: ExportFormat::Json,
                ..
            }
        ));
        assert_eq!(cli.results_dir, Some(PathBuf::from("/tmp/casa")));
        assert_eq!(cli.concurrency, Some(2));
        assert!(cli.verbose);
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        let result = Cli::try_parse_from(["casa", "analyze", "x.json", "--type", "audio"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut cli = parse(&["list"]);
        cli.verbose = true;
        cli.quiet = true;
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_validation_missing_input() {
        let cli = parse(&["analyze", "/nonexistent/tracks.json"]);
        assert!(cli.validate().is_err());

        let file = tempfile::NamedTempFile::new().unwrap();
        let cli = parse(&["analyze", file.path().to_str().unwrap()]);
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_validation_zero_concurrency() {
        let cli = parse(&["list", "--concurrency", "0"]);
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_log_level() {
        let mut cli = parse(&["list"]);
        assert_eq!(cli.log_level(false), tracing::Level::INFO);
        assert_eq!(cli.log_level(true), tracing::Level::DEBUG);

        cli.verbose = true;
        assert_eq!(cli.log_level(false), tracing::Level::DEBUG);

        cli.verbose = false;
        cli.quiet = true;
        assert_eq!(cli.log_level(true), tracing::Level::ERROR);
    }

    #[test]
    fn test_input_kind_maps_to_analysis_type() {
        assert_eq!(AnalysisType::from(InputKind::Image), AnalysisType::Image);
        assert_eq!(ExportFormat::Markdown.extension(), "md");
    }
}

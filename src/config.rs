//! Configuration file handling.
//!
//! This module handles loading, merging and validating configuration from
//! `.casa.toml` files. Calibration values here are placeholders until the
//! instrument has been calibrated; none of them is derived from the sample.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the configuration file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = ".casa.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Instrument calibration.
    #[serde(default)]
    pub calibration: CalibrationConfig,

    /// Reference thresholds.
    #[serde(default)]
    pub reference: ReferenceConfig,

    /// Result storage.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Pipeline options.
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Maximum number of analyses executing at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}

/// Conversion factors between detector output and physical units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Micrometers per pixel.
    #[serde(default = "default_microns_per_pixel")]
    pub microns_per_pixel: f64,

    /// Concentration (million/ml) attributed to each valid track.
    #[serde(default = "default_concentration_per_track")]
    pub concentration_per_track: f64,

    /// Moving-average window used for the average path.
    #[serde(default = "default_smoothing_window")]
    pub smoothing_window: usize,

    /// Minimum detections a track needs for kinematics.
    #[serde(default = "default_min_track_points")]
    pub min_track_points: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            microns_per_pixel: default_microns_per_pixel(),
            concentration_per_track: default_concentration_per_track(),
            smoothing_window: default_smoothing_window(),
            min_track_points: default_min_track_points(),
        }
    }
}

fn default_microns_per_pixel() -> f64 {
    0.2
}

fn default_concentration_per_track() -> f64 {
    1.0
}

fn default_smoothing_window() -> usize {
    3
}

fn default_min_track_points() -> usize {
    3
}

/// Reference-standard thresholds for classification and assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceConfig {
    /// Concentration lower limit (million/ml).
    #[serde(default = "default_concentration_lower_limit")]
    pub concentration_lower_limit: f64,

    /// Progressive motility lower limit (%).
    #[serde(default = "default_progressive_lower_limit")]
    pub progressive_motility_lower_limit: f64,

    /// Total motility lower limit (%).
    #[serde(default = "default_total_lower_limit")]
    pub total_motility_lower_limit: f64,

    /// Minimum VCL for a progressive track (μm/s).
    #[serde(default = "default_vcl_progressive")]
    pub vcl_progressive: f64,

    /// Minimum VSL for a progressive track (μm/s).
    #[serde(default = "default_vsl_progressive")]
    pub vsl_progressive: f64,

    /// VCL above which a track counts as moving at all (μm/s).
    #[serde(default = "default_vcl_motile")]
    pub vcl_motile: f64,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            concentration_lower_limit: default_concentration_lower_limit(),
            progressive_motility_lower_limit: default_progressive_lower_limit(),
            total_motility_lower_limit: default_total_lower_limit(),
            vcl_progressive: default_vcl_progressive(),
            vsl_progressive: default_vsl_progressive(),
            vcl_motile: default_vcl_motile(),
        }
    }
}

fn default_concentration_lower_limit() -> f64 {
    15.0
}

fn default_progressive_lower_limit() -> f64 {
    32.0
}

fn default_total_lower_limit() -> f64 {
    40.0
}

fn default_vcl_progressive() -> f64 {
    25.0
}

fn default_vsl_progressive() -> f64 {
    5.0
}

fn default_vcl_motile() -> f64 {
    5.0
}

/// Durable storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one JSON record per analysis.
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            results_dir: default_results_dir(),
        }
    }
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

/// Pipeline options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Run the quality assessment on completed analyses.
    #[serde(default = "default_true")]
    pub assess: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self { assess: true }
    }
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE_NAME);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were given explicitly.
    pub fn merge_with_args(&mut self, args: &crate::cli::Cli) {
        if let Some(ref dir) = args.results_dir {
            self.storage.results_dir = dir.clone();
        }

        if let Some(concurrency) = args.concurrency {
            self.general.concurrency = concurrency;
        }

        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Reject values that would make the calculations meaningless.
    pub fn validate(&self) -> Result<()> {
        let calibration = &self.calibration;
        if !(calibration.microns_per_pixel.is_finite() && calibration.microns_per_pixel > 0.0) {
            bail!("calibration.microns_per_pixel must be a positive number");
        }
        if !(calibration.concentration_per_track.is_finite()
            && calibration.concentration_per_track >= 0.0)
        {
            bail!("calibration.concentration_per_track must not be negative");
        }
        if calibration.smoothing_window == 0 {
            bail!("calibration.smoothing_window must be at least 1");
        }
        if calibration.min_track_points < 3 {
            bail!("calibration.min_track_points must be at least 3");
        }

        let reference = &self.reference;
        let limits = [
            ("concentration_lower_limit", reference.concentration_lower_limit),
            (
                "progressive_motility_lower_limit",
                reference.progressive_motility_lower_limit,
            ),
            ("total_motility_lower_limit", reference.total_motility_lower_limit),
            ("vcl_progressive", reference.vcl_progressive),
            ("vsl_progressive", reference.vsl_progressive),
            ("vcl_motile", reference.vcl_motile),
        ];
        for (name, value) in limits {
            if !(value.is_finite() && value >= 0.0) {
                bail!("reference.{} must be a non-negative number", name);
            }
        }

        if self.general.concurrency == 0 {
            bail!("general.concurrency must be at least 1");
        }

        Ok(())
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

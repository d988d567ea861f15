//! CASA Analyzer - computer-assisted sperm analysis
//!
//! A CLI tool that turns detector/tracker output into per-track
//! kinematics, population motility metrics and a quality assessment,
//! keeping every analysis in a results directory.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (bad config, unknown analysis, I/O failure, etc.)
//!   2 - The analysis itself failed

mod analysis;
mod cli;
mod config;
mod error;
mod jobs;
mod kinematics;
mod models;
mod report;
mod tracking;

use anyhow::{Context, Result};
use cli::{Cli, Command, ExportFormat, InputKind, OutputFormat};
use config::{Config, CONFIG_FILE_NAME};
use indicatif::{ProgressBar, ProgressStyle};
use jobs::{AnalysisSettings, FileJobStore, Orchestrator};
use models::{AnalysisJob, JobStatus, ReferenceStatus};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let cli = Cli::parse_args();

    // Validate arguments
    if let Err(e) = cli.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle init-config early (no logging needed)
    if let Command::InitConfig = cli.command {
        return handle_init_config();
    }

    let mut config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };
    config.merge_with_args(&cli);
    if let Err(e) = config.validate() {
        eprintln!("Error: invalid configuration: {}", e);
        std::process::exit(1);
    }

    // Initialize logging
    init_logging(cli.log_level(config.general.verbose));

    info!("CASA Analyzer v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", cli);
    debug!("Configuration: {:?}", config);

    match run(cli, config).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle init-config: generate a default .casa.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE_NAME);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE_NAME
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", CONFIG_FILE_NAME))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE_NAME);
    println!("   Edit it to set the calibration and reference limits of your instrument.");
    Ok(())
}

/// Initialize logging at the given level.
fn init_logging(level: tracing::Level) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Load configuration from file or use defaults.
///
/// Runs before logging is set up, so problems are reported on stderr.
fn load_config(cli: &Cli) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = cli.config {
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => Ok(config),
        Ok(None) => Ok(Config::default()),
        Err(e) => {
            eprintln!("⚠️  Ignoring {}: {:#}", CONFIG_FILE_NAME, e);
            Ok(Config::default())
        }
    }
}

/// Run the selected command. Returns the exit code.
async fn run(cli: Cli, config: Config) -> Result<i32> {
    let store = FileJobStore::new(config.storage.results_dir.clone());
    debug!("Results directory: {}", store.dir().display());

    let orchestrator = Orchestrator::new(
        Arc::new(store),
        Arc::new(tracking::DetectionDumpSource::new()),
        AnalysisSettings::from(&config),
    );
    debug!(
        "Running up to {} analyses at once",
        orchestrator.settings().concurrency
    );

    match cli.command {
        Command::Analyze {
            input,
            kind,
            name,
            output,
        } => handle_analyze(&orchestrator, input, kind, name, output, cli.quiet).await,
        Command::Status { id } => {
            let status = orchestrator.get_status(&id).await?;
            println!("🔎 Analysis {}", status.id);
            println!("   Status: {}", status.status);
            println!("   Progress: {:.0}%", status.progress);
            println!("   Message: {}", status.message);
            if let Some(completed) = status.completed_at {
                println!("   Completed: {}", completed.format("%Y-%m-%d %H:%M:%S UTC"));
            }
            Ok(0)
        }
        Command::Result { id, format } => {
            // Fails with "not ready" for analyses that have not completed.
            orchestrator.get_result(&id).await?;
            let job = orchestrator.get_job(&id).await?;
            let output = match format {
                OutputFormat::Json => report::generate_json_report(&job)?,
                OutputFormat::Markdown => report::generate_markdown_report(&job),
            };
            println!("{}", output);
            Ok(0)
        }
        Command::List => {
            let summaries = orchestrator.list().await?;
            if summaries.is_empty() {
                println!("No analyses found in {}", config.storage.results_dir.display());
                return Ok(0);
            }

            println!("📋 {} analyses:\n", summaries.len());
            for summary in summaries {
                println!(
                    "   {}  {:<10} {:<5} {}  {}",
                    summary.id,
                    summary.status.to_string(),
                    summary.analysis_type.to_string(),
                    summary.created_at.format("%Y-%m-%d %H:%M"),
                    summary.filename
                );
            }
            Ok(0)
        }
        Command::Delete { id } => {
            orchestrator.delete(&id).await?;
            println!("🗑️  Deleted analysis {}", id);
            Ok(0)
        }
        Command::Export { id, format, output } => {
            let job = orchestrator.get_job(&id).await?;
            let dir = config.storage.results_dir.join("exports");
            let written = export(&job, format, output, &dir)?;
            for path in written {
                println!("✅ Exported to: {}", path.display());
            }
            Ok(0)
        }
        // Handled before startup.
        Command::InitConfig => Ok(0),
    }
}

/// Submit an analysis, show its progress and print the outcome.
async fn handle_analyze(
    orchestrator: &Orchestrator,
    input: PathBuf,
    kind: InputKind,
    name: Option<String>,
    output: Option<PathBuf>,
    quiet: bool,
) -> Result<i32> {
    println!("🔬 Analyzing {} ({:?})", input.display(), kind);

    let submission = orchestrator.submit(input, kind.into(), name);
    let id = submission.id().to_string();
    info!("Analysis ID: {}", id);

    if quiet {
        submission.wait().await;
    } else {
        let progress_bar = ProgressBar::new(100);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        progress_bar.set_style(style);

        let mut updates = submission.subscribe();
        loop {
            let view = updates.borrow_and_update().clone();
            progress_bar.set_position(view.progress.round() as u64);
            progress_bar.set_message(view.message);
            if view.status.is_terminal() || updates.changed().await.is_err() {
                break;
            }
        }
        progress_bar.finish_and_clear();
    }

    let mut job = orchestrator.wait(&id).await?;
    orchestrator.drain().await;

    if job.status != JobStatus::Completed {
        eprintln!("\n❌ {}", job.message);
        return Ok(2);
    }

    if !job.persisted {
        info!("Retrying save of analysis {}", id);
        if orchestrator.retry_persistence(&id).await.is_ok() {
            job = orchestrator.get_job(&id).await?;
        }
    }

    print_summary(&job);

    if let Some(path) = output {
        std::fs::write(&path, report::generate_markdown_report(&job))
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        println!("\n📝 Report saved to: {}", path.display());
    }

    if let Some(e) = &job.persistence_error {
        eprintln!("\n⚠️  The result could not be saved: {}", e);
        return Ok(1);
    }

    println!("\n✅ Analysis complete! ID: {}", job.id);
    Ok(0)
}

fn print_summary(job: &AnalysisJob) {
    let Some(result) = &job.result else {
        return;
    };
    let m = &result.casa_metrics;

    println!("\n📊 Analysis Summary:");
    println!("   Count: {} | Concentration: {:.2}", m.total_count, m.concentration);
    println!(
        "   Motility: {:.1}% progressive | {:.1}% non-progressive | {:.1}% immotile",
        m.progressive_motility, m.non_progressive_motility, m.immotile
    );
    println!(
        "   VCL {:.1} | VSL {:.1} | VAP {:.1} μm/s",
        m.vcl.mean, m.vsl.mean, m.vap.mean
    );
    if let Some(seconds) = job.processing_time {
        println!("   Duration: {:.2}s", seconds);
    }

    if let Some(assessment) = &result.assessment {
        println!("\n🩺 Quality: {}", assessment.overall_quality);
        let flagged = [
            ("Concentration", assessment.concentration_status),
            ("Progressive motility", assessment.progressive_motility_status),
            ("Total motility", assessment.total_motility_status),
        ];
        for (label, status) in flagged {
            if status == ReferenceStatus::BelowReference {
                println!("   ⚠️  {} below reference", label);
            }
        }
        for rec in &assessment.recommendations {
            println!("   - {}", rec);
        }
    }
}

/// Write an export of `job`. CSV produces two files in a directory; the
/// other formats produce one file.
fn export(
    job: &AnalysisJob,
    format: ExportFormat,
    output: Option<PathBuf>,
    default_dir: &Path,
) -> Result<Vec<PathBuf>> {
    if format == ExportFormat::Csv {
        let dir = output.unwrap_or_else(|| default_dir.to_path_buf());
        return report::write_csv_exports(job, &dir);
    }

    let content = match format {
        ExportFormat::Json => report::generate_json_report(job)?,
        _ => report::generate_markdown_report(job),
    };
    let path = output.unwrap_or_else(|| {
        default_dir.join(format!("{}_report.{}", job.id, format.extension()))
    });
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    Ok(vec![path])
}

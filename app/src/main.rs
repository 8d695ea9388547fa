use anyhow::{Context, Result};
use clap::Parser;
use scrub::{collect_inputs, RedactConfig, Redactor, ARCHIVE_NAME};
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "scrub")]
#[command(about = "Redact personal data from PDF and XML documents", long_about = None)]
#[command(version)]
struct Cli {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Archive to write
    #[arg(short, long, default_value = ARCHIVE_NAME)]
    output: PathBuf,

    /// Add skipped.json listing documents that failed
    #[arg(long)]
    manifest: bool,

    /// Process documents one at a time
    #[arg(long)]
    sequential: bool,

    /// Also strip PDF document metadata
    #[arg(long)]
    clean_metadata: bool,

    /// Re-scan every output for remaining detections
    #[arg(long)]
    verify: bool,

    /// Files or folders to redact
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn main() -> Result<()> {
    let filters = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    pretty_env_logger::formatted_builder()
        .parse_filters(&filters)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => RedactConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => RedactConfig::default(),
    };
    config.apply_env()?;
    if cli.sequential {
        config.parallel = false;
    }
    config.clean_metadata |= cli.clean_metadata;
    config.verify |= cli.verify;

    let inputs = collect_inputs(&cli.files).context("failed to read inputs")?;
    let redactor = Redactor::new(config)?;
    let (bytes, report) = redactor.redact_to_archive(&inputs, cli.manifest)?;

    fs::write(&cli.output, bytes)
        .with_context(|| format!("failed to write {}", cli.output.display()))?;

    for doc in &report.outputs {
        if let Some(verification) = &doc.verification {
            for warning in &verification.warnings {
                log::warn!("[Verify] {}: {}", doc.name, warning);
            }
        }
    }
    for skipped in &report.skipped {
        log::warn!("[Pipeline] skipped {} ({})", skipped.name, skipped.kind);
    }
    log::info!(
        "[Pipeline] wrote {}: {} of {} document(s) redacted",
        cli.output.display(),
        report.outputs.len(),
        report.total()
    );
    Ok(())
}

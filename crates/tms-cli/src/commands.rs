//! CLI command implementations.
//!
//! Each command returns `Ok(false)` when it ran to the end but the run was
//! not clean (validation errors, per-entity failures); `main` turns that into
//! exit code 1.

use crate::config::AppConfig;
use crate::progress::ConsoleProgressReporter;
use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use console::style;
use std::path::{Path, PathBuf};
use tms_export::{
    AllureExporter, AzureDevOpsExporter, ExportOptions, Exporter, TestRailExporter,
    ZephyrScaleExporter,
};
use tms_import::{ImportOptions, Importer};
use tms_models::{validate_export, ExportReader, ExportWriter, Progress};

/// Products `tms export` can read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Platform {
    Testrail,
    ZephyrScale,
    AzureDevops,
    Allure,
}

fn exporter(config: &AppConfig, platform: Platform, progress: Progress) -> Result<Box<dyn Exporter>> {
    let exporter: Box<dyn Exporter> = match platform {
        Platform::Testrail => {
            Box::new(TestRailExporter::new(config.testrail()?)?.with_progress(progress))
        }
        Platform::ZephyrScale => {
            Box::new(ZephyrScaleExporter::new(config.zephyr_scale()?)?.with_progress(progress))
        }
        Platform::AzureDevops => {
            Box::new(AzureDevOpsExporter::new(config.azure_devops()?)?.with_progress(progress))
        }
        Platform::Allure => Box::new(AllureExporter::new(config.allure()?)?.with_progress(progress)),
    };
    Ok(exporter)
}

/// Export a project into `output` (or the configured export directory).
pub async fn export(
    config: &AppConfig,
    platform: Platform,
    output: Option<PathBuf>,
    no_attachments: bool,
) -> Result<bool> {
    let dir = output.unwrap_or_else(|| config.export_dir.clone());
    let reporter = ConsoleProgressReporter::new();
    let exporter = exporter(config, platform, Progress::with_callback(reporter.callback()))?;

    tracing::info!(
        platform = %exporter.platform(),
        dir = %dir.display(),
        attachments = !no_attachments,
        "Starting export"
    );

    let writer = ExportWriter::create(dir.clone())
        .with_context(|| format!("Cannot create export directory {}", dir.display()))?;
    let options = ExportOptions::default().with_attachments(!no_attachments);
    let report = exporter.export(writer, &options).await?;

    reporter.finish("Export complete");
    report.print_summary();
    println!("\nExport written to {}", style(dir.display()).bold());

    Ok(report.is_successful())
}

/// Import an export directory into Test IT.
///
/// The export is validated first; an invalid export is never sent.
pub async fn import(config: &AppConfig, input: Option<PathBuf>, no_attachments: bool) -> Result<bool> {
    let dir = input.unwrap_or_else(|| config.export_dir.clone());
    let reader = open(&dir)?;

    let validation = validate_export(&reader)?;
    if !validation.is_valid() {
        validation.print_summary();
        bail!("Export in {} failed validation; nothing was imported", dir.display());
    }

    let reporter = ConsoleProgressReporter::new();
    let importer =
        Importer::new(config.testit()?)?.with_progress(Progress::with_callback(reporter.callback()));

    tracing::info!(dir = %dir.display(), attachments = !no_attachments, "Starting import");

    let options = ImportOptions::default().with_attachments(!no_attachments);
    let report = importer.import(&reader, &options).await?;

    reporter.finish("Import complete");
    report.print_summary();

    Ok(report.is_successful())
}

/// Check an export directory for dangling references and missing files.
pub fn validate(dir: &Path) -> Result<bool> {
    let reader = open(dir)?;
    let report = validate_export(&reader)?;
    report.print_summary();
    Ok(report.is_valid())
}

/// Print what an export directory contains.
pub fn inspect(dir: &Path) -> Result<()> {
    let reader = open(dir)?;
    let root = reader.read_root()?;

    println!("{}", style(&root.project_name).bold().underlined());
    if let Some(source) = &root.source {
        println!("Source:        {source}");
    }
    println!("Sections:      {}", root.walk_sections().count());
    println!("Attributes:    {}", root.attributes.len());
    println!("Shared steps:  {}", root.shared_steps.len());
    println!("Test cases:    {}", root.test_cases.len());

    if !root.attributes.is_empty() {
        println!("\n{}", style("Attributes").bold());
        for attribute in &root.attributes {
            println!(
                "  {} ({:?}, {} options)",
                attribute.name,
                attribute.attribute_type,
                attribute.options.len()
            );
        }
    }

    if !root.sections.is_empty() {
        println!("\n{}", style("Top-level sections").bold());
        for section in &root.sections {
            println!("  {}", section.name);
        }
    }

    Ok(())
}

fn open(dir: &Path) -> Result<ExportReader> {
    ExportReader::open(dir.to_path_buf())
        .with_context(|| format!("Cannot open export directory {}", dir.display()))
}

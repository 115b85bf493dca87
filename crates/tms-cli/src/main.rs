//! tms - move test-management projects between products.

use clap::{Parser, Subcommand};
use console::style;
use std::path::PathBuf;

mod commands;
mod config;
mod logging;
mod progress;

use commands::Platform;
use config::AppConfig;
use logging::LogFormat;

/// tms - export test cases from TestRail, Zephyr Scale, Azure DevOps or
/// Allure TestOps and import them into Test IT
#[derive(Parser, Debug)]
#[command(name = "tms")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file (default: tms.yaml, tms.toml or tms.json if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log as JSON lines instead of human-readable text
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Export a project into a directory
    Export {
        /// Product to export from
        #[arg(value_enum)]
        platform: Platform,
        /// Output directory (default: `export_dir` from the configuration)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Skip downloading attachments
        #[arg(long)]
        no_attachments: bool,
    },

    /// Import an export directory into Test IT
    Import {
        /// Export directory (default: `export_dir` from the configuration)
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Skip uploading attachments
        #[arg(long)]
        no_attachments: bool,
    },

    /// Check an export directory for consistency
    Validate {
        /// Export directory
        dir: PathBuf,
    },

    /// Show what an export directory contains
    Inspect {
        /// Export directory
        dir: PathBuf,
    },

    /// Show version information
    Version,
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    match cli.command {
        Commands::Export {
            platform,
            output,
            no_attachments,
        } => {
            let config = AppConfig::load(cli.config.as_deref())?;
            commands::export(&config, platform, output, no_attachments).await
        }
        Commands::Import {
            input,
            no_attachments,
        } => {
            let config = AppConfig::load(cli.config.as_deref())?;
            commands::import(&config, input, no_attachments).await
        }
        Commands::Validate { dir } => commands::validate(&dir),
        Commands::Inspect { dir } => commands::inspect(&dir).map(|()| true),
        Commands::Version => {
            println!("tms {}", env!("CARGO_PKG_VERSION"));
            println!("tms-export {}", tms_export::VERSION);
            println!("tms-import {}", tms_import::VERSION);
            Ok(true)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    logging::init_logging(
        logging::level_for(cli.verbose),
        LogFormat::from_flag(cli.json_logs),
    );

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            tracing::debug!(error = ?e, "Command failed");
            eprintln!("{} {e:#}", style("Error:").red().bold());
            std::process::exit(1);
        }
    }
}

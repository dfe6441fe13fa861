use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::info;

use atrium_host::plugin::{BuildOutcome, StaticModuleResolver};
use atrium_host::{HostConfig, PluginManager};

/// Atrium Host - plugin runtime and build tooling
#[derive(Parser, Debug)]
#[command(name = "atrium-host")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build one plugin's client components into the import map
    BuildPlugin {
        /// Slug of the plugin to build, or a path to its directory
        target: String,
    },

    /// Build every discovered plugin's client components
    BuildPlugins,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    match run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config = HostConfig::load(cli.config.as_deref())?;
    let manager = PluginManager::new(config, Box::new(StaticModuleResolver))?;

    match cli.command {
        Some(Commands::BuildPlugin { target }) => {
            // A directory path names the plugin through its manifest
            let slug = if std::path::Path::new(&target).is_dir() {
                atrium_host::plugin::PluginManifest::from_dir(std::path::Path::new(&target))?.slug
            } else {
                target.clone()
            };
            match manager.build_plugin(&slug)? {
                BuildOutcome::Success { components } => {
                    println!("built {components} component(s) for '{target}'");
                    Ok(ExitCode::SUCCESS)
                }
                BuildOutcome::Skipped => {
                    println!("plugin '{target}' declares no client assets");
                    Ok(ExitCode::SUCCESS)
                }
                BuildOutcome::Failed { reason } => {
                    eprintln!("build failed for '{target}': {reason}");
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Some(Commands::BuildPlugins) => {
            let report = manager.build_plugins()?;
            for (slug, outcome) in &report.outcomes {
                match outcome {
                    BuildOutcome::Success { components } => {
                        println!("{slug}: {components} component(s)");
                    }
                    BuildOutcome::Skipped => println!("{slug}: no client assets"),
                    BuildOutcome::Failed { reason } => eprintln!("{slug}: FAILED - {reason}"),
                }
            }
            println!("import map holds {} component(s)", report.total_components);
            if report.has_failures() {
                Ok(ExitCode::FAILURE)
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
        None => {
            let report = manager.startup().await?;
            info!(
                discovered = report.discovered,
                skipped = report.skipped_dirs,
                loaded = report.load.loaded.len(),
                failed = report.load.failed.len(),
                "Startup complete"
            );
            for overview in manager.plugins()? {
                println!(
                    "{:<24} v{:<10} active={:<5} state={}",
                    overview.record.slug,
                    overview.record.version,
                    overview.record.is_active,
                    overview.state
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

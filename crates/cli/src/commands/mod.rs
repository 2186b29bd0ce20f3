//! CLI command definitions and execution
//!
//! Every command receives a [`Context`] holding the loaded configuration, the
//! provider registry built from it and the output formatter, and returns an
//! [`ExitCode`].

use std::path::PathBuf;
use std::sync::Arc;

use arc_core::{Config, ConfigManager, Error, ProviderRegistry};
use clap::{Parser, Subcommand};

use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};
use crate::providers::build_registry;

mod completions;
pub mod cp;
mod ls;
mod providers;
mod resume;
mod stats;

/// arc - move and inspect files across storage providers
///
/// Locations are written as `provider:path`, for example `local:/home/me/docs`
/// or `s3://bucket/prefix`. Providers are configured in ~/.arc/config.toml.
#[derive(Parser, Debug)]
#[command(name = "arc")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file (default: ~/.arc/config.toml)
    #[arg(long, global = true, env = "ARC_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true, env = "ARC_VERBOSE")]
    pub verbose: bool,

    /// Output format: human-readable or JSON
    #[arg(long, global = true, default_value = "false")]
    pub json: bool,

    /// Disable colored output
    #[arg(long, global = true, default_value = "false")]
    pub no_color: bool,

    /// Disable progress bar
    #[arg(long, global = true, default_value = "false")]
    pub no_progress: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true, default_value = "false")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Copy a file or directory tree between providers
    Cp(cp::CpArgs),

    /// List the contents of a location
    Ls(ls::LsArgs),

    /// Show file counts and sizes below a location
    Stats(stats::StatsArgs),

    /// Re-run the unfinished tasks of a saved report
    Resume(resume::ResumeArgs),

    /// List configured providers
    Providers,

    /// Generate shell completion scripts
    Completions(completions::CompletionsArgs),
}

/// Everything a command needs besides its own arguments
pub struct Context {
    pub config: Config,
    pub registry: Arc<ProviderRegistry>,
    pub formatter: Formatter,
}

impl Context {
    /// Print `error` with a prefix and map it to an exit code
    pub fn fail(&self, prefix: &str, error: &Error) -> ExitCode {
        self.formatter.error(&format!("{prefix}: {error}"));
        ExitCode::from_error(error)
    }
}

/// Execute the CLI command and return an exit code
pub async fn execute(cli: Cli) -> ExitCode {
    let flags = OutputConfig {
        json: cli.json,
        no_color: cli.no_color,
        no_progress: cli.no_progress,
        quiet: cli.quiet,
    };

    let command = match cli.command {
        Commands::Completions(args) => return completions::execute(args),
        command => command,
    };

    let config = match load_config(cli.config) {
        Ok(config) => config,
        Err(e) => {
            Formatter::new(flags).error(&format!("Failed to load configuration: {e}"));
            return ExitCode::from_error(&e);
        }
    };

    let output = OutputConfig::resolve(flags, &config.defaults);
    if output.no_color {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }
    let formatter = Formatter::new(output);

    let registry = match build_registry(&config) {
        Ok(registry) => Arc::new(registry),
        Err(e) => {
            formatter.error(&format!("Invalid provider configuration: {e}"));
            return ExitCode::from_error(&e);
        }
    };

    let ctx = Context {
        config,
        registry,
        formatter,
    };

    match command {
        Commands::Cp(args) => cp::execute(args, &ctx).await,
        Commands::Ls(args) => ls::execute(args, &ctx).await,
        Commands::Stats(args) => stats::execute(args, &ctx).await,
        Commands::Resume(args) => resume::execute(args, &ctx).await,
        Commands::Providers => providers::execute(&ctx),
        Commands::Completions(args) => completions::execute(args),
    }
}

fn load_config(path: Option<PathBuf>) -> arc_core::Result<Config> {
    let manager = match path {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new()?,
    };
    manager.load()
}

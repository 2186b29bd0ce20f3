//! arc - move and inspect files across storage providers
//!
//! Copies files and directory trees between any two configured providers
//! (local disk, S3-compatible storage, in-memory scratch space) and reports
//! per-file outcomes.

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use arc_cli::commands::{self, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let exit_code = commands::execute(cli).await;

    std::process::exit(exit_code.as_i32());
}

/// Log to stderr; `RUST_LOG` wins over `-v`
fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("warn,arc=debug,arc_cli=debug,arc_core=debug,arc_s3=debug")
        } else {
            EnvFilter::new("warn")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

//! cp command - Copy files between providers
//!
//! Plans the transfer, runs it on the executor's worker pool and prints the
//! migration report. With `--report-file` the report is also saved so an
//! interrupted or partially failed run can be picked up with `arc resume`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use arc_core::{
    Executor, ExecutorOptions, MigrationReport, TaskKind, TransferConfig, TransferTask, plan,
    resolve,
};
use clap::Args;
use tokio_util::sync::CancellationToken;

use super::Context;
use crate::exit_code::ExitCode;
use crate::output::TransferProgress;

/// Copy files between providers
#[derive(Args, Debug)]
pub struct CpArgs {
    /// Source location (provider:path)
    pub source: String,

    /// Destination location (provider:path); a trailing `/` keeps the file name
    pub destination: String,

    /// Copy directories recursively
    #[arg(short, long)]
    pub recursive: bool,

    /// Number of parallel transfers
    #[arg(short = 'j', long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Attempts per file before giving up on transient errors
    #[arg(long, value_name = "N")]
    pub max_attempts: Option<u32>,

    /// Per-file time limit in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Skip the size/checksum check after each copy
    #[arg(long)]
    pub no_verify: bool,

    /// Only show what would be copied
    #[arg(long)]
    pub dry_run: bool,

    /// Save the migration report as JSON
    #[arg(long, value_name = "FILE")]
    pub report_file: Option<PathBuf>,
}

/// Execute the cp command
pub async fn execute(args: CpArgs, ctx: &Context) -> ExitCode {
    let source = match resolve(&args.source, &ctx.registry) {
        Ok(location) => location,
        Err(e) => return ctx.fail("Invalid source", &e),
    };
    let destination = match resolve(&args.destination, &ctx.registry) {
        Ok(location) => location,
        Err(e) => return ctx.fail("Invalid destination", &e),
    };

    let tasks = match plan(&ctx.registry, &source, &destination, args.recursive).await {
        Ok(tasks) => tasks,
        Err(e) => return ctx.fail(&format!("Cannot copy {source}"), &e),
    };

    if args.dry_run {
        print_plan(ctx, &tasks);
        return ExitCode::Success;
    }

    let mut transfer = ctx.config.transfer.clone();
    if let Some(concurrency) = args.concurrency {
        transfer.concurrency = concurrency;
    }
    if let Some(max_attempts) = args.max_attempts {
        transfer.max_attempts = max_attempts;
    }
    if let Some(timeout) = args.timeout {
        transfer.timeout_secs = Some(timeout);
    }
    if args.no_verify {
        transfer.verify = false;
    }

    run_transfer(ctx, tasks, &transfer, args.report_file.as_deref()).await
}

fn print_plan(ctx: &Context, tasks: &[TransferTask]) {
    let formatter = &ctx.formatter;
    if formatter.is_json() {
        formatter.json(&tasks);
        return;
    }

    for task in tasks {
        match task.kind {
            TaskKind::Copy => formatter.println(&format!(
                "{} -> {} ({})",
                task.source.reference,
                task.destination,
                task.source.size_human()
            )),
            TaskKind::EnsureDirectory => {
                formatter.println(&format!("mkdir {}", task.destination))
            }
        }
    }

    let bytes: u64 = tasks.iter().map(|t| t.source.size).sum();
    formatter.println(&format!(
        "Would transfer {} objects ({})",
        tasks.len(),
        humansize::format_size(bytes, humansize::BINARY)
    ));
}

/// Run `tasks` with Ctrl+C wired to cancellation and print the report
pub(super) async fn run_transfer(
    ctx: &Context,
    tasks: Vec<TransferTask>,
    transfer: &TransferConfig,
    report_file: Option<&Path>,
) -> ExitCode {
    let progress = Arc::new(TransferProgress::new(ctx.formatter.config(), &tasks));
    let cancel = CancellationToken::new();
    let executor = Executor::new(Arc::clone(&ctx.registry), ExecutorOptions::from(transfer))
        .with_cancellation(cancel.clone())
        .with_observer(progress.clone());

    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping transfers");
            cancel.cancel();
        }
    });

    let result = executor.execute(tasks).await;
    interrupt.abort();
    progress.bar().finish_and_clear();

    let report = match result {
        Ok(report) => report,
        Err(e) => return ctx.fail("Transfer failed", &e),
    };

    let mut code = ExitCode::from_report(&report);
    if let Some(path) = report_file
        && let Err(e) = save_report(path, &report)
    {
        ctx.formatter.error(&format!("{e:#}"));
        if code == ExitCode::Success {
            code = ExitCode::GeneralError;
        }
    }

    let formatter = &ctx.formatter;
    if code == ExitCode::Success && !formatter.is_json() {
        formatter.success(&report.to_string());
    } else {
        formatter.output(&report);
    }
    if report.cancelled
        && let Some(path) = report_file
    {
        formatter.warning(&format!(
            "Interrupted. Run `arc resume {}` to finish the remaining files",
            path.display()
        ));
    }

    code
}

/// Write `report` as pretty JSON
pub(super) fn save_report(path: &Path, report: &MigrationReport) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    tracing::debug!(path = %path.display(), "saved migration report");
    Ok(())
}

/// Read a report written by [`save_report`]
pub(super) fn load_report(path: &Path) -> anyhow::Result<MigrationReport> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read report {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("{} is not a migration report", path.display()))
}

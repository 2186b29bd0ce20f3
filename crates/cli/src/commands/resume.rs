//! resume command - Finish a transfer from a saved report
//!
//! Files that succeeded last time are left alone; everything else is reset
//! and copied again.

use std::path::PathBuf;

use arc_core::TaskStatus;
use clap::Args;

use super::Context;
use super::cp::{load_report, run_transfer};
use crate::exit_code::ExitCode;

/// Re-run the unfinished tasks of a saved report
#[derive(Args, Debug)]
pub struct ResumeArgs {
    /// Report written by `arc cp --report-file`
    pub report_file: PathBuf,

    /// Number of parallel transfers
    #[arg(short = 'j', long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Attempts per file before giving up on transient errors
    #[arg(long, value_name = "N")]
    pub max_attempts: Option<u32>,

    /// Where to write the updated report (default: overwrite the input)
    #[arg(long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

/// Execute the resume command
pub async fn execute(args: ResumeArgs, ctx: &Context) -> ExitCode {
    let report = match load_report(&args.report_file) {
        Ok(report) => report,
        Err(e) => {
            ctx.formatter.error(&format!("{e:#}"));
            return ExitCode::UsageError;
        }
    };

    let tasks = report.retry_plan();
    let pending = tasks
        .iter()
        .filter(|t| t.status != TaskStatus::Succeeded)
        .count();
    if pending == 0 {
        ctx.formatter
            .success(&format!("Nothing to resume: all {} tasks succeeded", tasks.len()));
        return ExitCode::Success;
    }

    if let Some(missing) = tasks
        .iter()
        .flat_map(|t| [&t.source.reference.provider_id, &t.destination.provider_id])
        .find(|id| !ctx.registry.contains(id))
    {
        ctx.formatter.error(&format!(
            "Report refers to provider '{missing}', which is not configured"
        ));
        return ExitCode::UsageError;
    }

    tracing::debug!(
        total = tasks.len(),
        pending,
        report = %args.report_file.display(),
        "resuming transfer"
    );

    let mut transfer = ctx.config.transfer.clone();
    if let Some(concurrency) = args.concurrency {
        transfer.concurrency = concurrency;
    }
    if let Some(max_attempts) = args.max_attempts {
        transfer.max_attempts = max_attempts;
    }

    let output = args.output.as_ref().unwrap_or(&args.report_file);
    run_transfer(ctx, tasks, &transfer, Some(output.as_path())).await
}

//! ls command - List the contents of a location
//!
//! Entries are printed as the provider yields them, so large trees start
//! showing output before the listing is complete.

use arc_core::{ListOptions, LocationRef, ObjectDescriptor, resolve};
use clap::Args;
use futures::TryStreamExt;
use serde::Serialize;

use super::Context;
use crate::exit_code::ExitCode;

/// List files and directories
#[derive(Args, Debug)]
pub struct LsArgs {
    /// Location to list (provider:path)
    pub location: String,

    /// List recursively
    #[arg(short, long)]
    pub recursive: bool,
}

/// Output structure for ls command (JSON format)
#[derive(Debug, Serialize)]
struct LsOutput {
    items: Vec<ObjectDescriptor>,
    summary: Summary,
}

#[derive(Debug, Default, Serialize)]
struct Summary {
    files: u64,
    directories: u64,
    total_size_bytes: u64,
    total_size_human: String,
}

impl Summary {
    fn record(&mut self, entry: &ObjectDescriptor) {
        if entry.is_directory {
            self.directories += 1;
        } else {
            self.files += 1;
            self.total_size_bytes += entry.size;
        }
    }
}

/// Execute the ls command
pub async fn execute(args: LsArgs, ctx: &Context) -> ExitCode {
    let location = match resolve(&args.location, &ctx.registry) {
        Ok(location) => location,
        Err(e) => return ctx.fail("Invalid location", &e),
    };

    match list(&location, args.recursive, ctx).await {
        Ok(()) => ExitCode::Success,
        Err(e) => ctx.fail(&format!("Failed to list {location}"), &e),
    }
}

async fn list(location: &LocationRef, recursive: bool, ctx: &Context) -> arc_core::Result<()> {
    let formatter = &ctx.formatter;
    let adapter = ctx.registry.adapter(&location.provider_id).await?;

    let root = adapter.stat(location).await?;
    let mut summary = Summary::default();
    let mut items = Vec::new();

    if root.is_directory {
        let mut entries = adapter.list(location, ListOptions { recursive }).await?;
        while let Some(entry) = entries.try_next().await? {
            summary.record(&entry);
            if formatter.is_json() {
                items.push(entry);
            } else {
                formatter.println(&format_entry(ctx, location, &entry));
            }
        }
    } else {
        summary.record(&root);
        if formatter.is_json() {
            items.push(root);
        } else {
            formatter.println(&format_entry(ctx, location, &root));
        }
    }

    summary.total_size_human = humansize::format_size(summary.total_size_bytes, humansize::BINARY);
    if formatter.is_json() {
        formatter.json(&LsOutput { items, summary });
    } else {
        formatter.println(&format!(
            "\nTotal: {} files, {} directories, {}",
            summary.files, summary.directories, summary.total_size_human
        ));
    }
    Ok(())
}

fn format_entry(ctx: &Context, root: &LocationRef, entry: &ObjectDescriptor) -> String {
    let date = entry
        .modified_time
        .map(|t| t.strftime("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| " ".repeat(19));
    let date = ctx.formatter.dim(&format!("[{date}]"));

    let name = display_name(root, entry);
    if entry.is_directory {
        format!("{date} {:>10} {name}/", "DIR")
    } else {
        format!("{date} {:>10} {name}", entry.size_human())
    }
}

/// Path of `entry` relative to the listed location, or its file name
fn display_name(root: &LocationRef, entry: &ObjectDescriptor) -> String {
    entry
        .reference
        .relative_to(root)
        .filter(|rel| !rel.is_empty())
        .or_else(|| entry.reference.file_name().map(str::to_string))
        .unwrap_or_else(|| entry.reference.path.clone())
}

//! stats command - Aggregated size and count metrics for a location

use arc_core::{LocationStats, collect_stats, resolve};
use clap::Args;
use comfy_table::{CellAlignment, Table, presets};
use humansize::{BINARY, format_size};

use super::Context;
use crate::exit_code::ExitCode;

/// Show file counts and sizes below a location
#[derive(Args, Debug)]
pub struct StatsArgs {
    /// Location to inspect (provider:path)
    pub location: String,
}

/// Execute the stats command
pub async fn execute(args: StatsArgs, ctx: &Context) -> ExitCode {
    let location = match resolve(&args.location, &ctx.registry) {
        Ok(location) => location,
        Err(e) => return ctx.fail("Invalid location", &e),
    };

    let adapter = match ctx.registry.adapter(&location.provider_id).await {
        Ok(adapter) => adapter,
        Err(e) => return ctx.fail("Provider unavailable", &e),
    };

    let stats = match collect_stats(adapter.as_ref(), &location).await {
        Ok(stats) => stats,
        Err(e) => return ctx.fail(&format!("Failed to collect stats for {location}"), &e),
    };

    if ctx.formatter.is_json() {
        ctx.formatter.output(&stats);
    } else {
        ctx.formatter.println(&render(&stats));
    }
    ExitCode::Success
}

/// Human-readable summary followed by the per-extension table
fn render(stats: &LocationStats) -> String {
    let mut lines = vec![stats.to_string()];
    if stats.files > 0 {
        lines.push(format!(
            "Average file size: {}",
            format_size(stats.average_size(), BINARY)
        ));
    }
    if let Some(largest) = &stats.largest {
        lines.push(format!(
            "Largest file: {} ({})",
            largest.path,
            format_size(largest.size, BINARY)
        ));
    }
    if !stats.by_extension.is_empty() {
        lines.push(String::new());
        lines.push(extension_table(stats).to_string());
    }
    lines.join("\n")
}

fn extension_table(stats: &LocationStats) -> Table {
    let mut rows: Vec<_> = stats.by_extension.iter().collect();
    rows.sort_by(|(a_ext, a), (b_ext, b)| b.bytes.cmp(&a.bytes).then_with(|| a_ext.cmp(b_ext)));

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_header(vec!["Extension", "Files", "Size", "Share"]);

    for (ext, totals) in rows {
        let share = if stats.total_bytes == 0 {
            0.0
        } else {
            totals.bytes as f64 * 100.0 / stats.total_bytes as f64
        };
        table.add_row(vec![
            ext.clone(),
            totals.files.to_string(),
            format_size(totals.bytes, BINARY),
            format!("{share:.1}%"),
        ]);
    }

    for index in 1..4 {
        if let Some(column) = table.column_mut(index) {
            column.set_cell_alignment(CellAlignment::Right);
        }
    }
    table
}

//! providers command - Show the configured providers

use comfy_table::{Table, presets};
use serde::Serialize;

use super::Context;
use crate::exit_code::ExitCode;

#[derive(Debug, Serialize)]
struct ProviderInfo {
    id: String,
    kind: String,
    description: String,
}

/// Execute the providers command
pub fn execute(ctx: &Context) -> ExitCode {
    let providers: Vec<ProviderInfo> = ctx
        .registry
        .factories()
        .map(|(id, factory)| ProviderInfo {
            id: id.to_string(),
            kind: factory.kind().to_string(),
            description: factory.describe(),
        })
        .collect();

    if ctx.formatter.is_json() {
        ctx.formatter.json(&providers);
        return ExitCode::Success;
    }

    let mut table = Table::new();
    table
        .load_preset(presets::NOTHING)
        .set_header(vec!["ID", "KIND", "DESCRIPTION"]);
    for provider in &providers {
        table.add_row(vec![&provider.id, &provider.kind, &provider.description]);
    }
    ctx.formatter.println(&table.to_string());
    ExitCode::Success
}

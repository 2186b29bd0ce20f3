//! Output formatting utilities
//!
//! This module provides formatters for CLI output in both human-readable
//! and JSON formats. It also handles progress bars and colored output.

mod formatter;
mod progress;

pub use formatter::Formatter;
pub use progress::{ProgressBar, TransferProgress};

/// Output configuration derived from CLI flags and `[defaults]`
#[derive(Debug, Clone, Default)]
pub struct OutputConfig {
    /// Use JSON output format
    pub json: bool,
    /// Disable colored output
    pub no_color: bool,
    /// Disable progress bar
    pub no_progress: bool,
    /// Suppress non-error output
    pub quiet: bool,
}

impl OutputConfig {
    /// Merge command-line flags over the config file defaults
    ///
    /// A flag can only switch a behavior on; `--json` wins over
    /// `output = "human"` but not the other way around.
    pub fn resolve(flags: OutputConfig, defaults: &arc_core::config::Defaults) -> Self {
        Self {
            json: flags.json || defaults.output.eq_ignore_ascii_case("json"),
            no_color: flags.no_color || defaults.color.eq_ignore_ascii_case("never"),
            no_progress: flags.no_progress || !defaults.progress,
            quiet: flags.quiet,
        }
    }
}

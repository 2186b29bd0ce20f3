//! Progress bar utilities for transfer operations
//!
//! The executor reports bytes through [`TransferObserver`]; the
//! [`TransferProgress`] adapter turns those callbacks into one bar for the
//! whole batch.

use std::time::Duration;

use arc_core::{TaskStatus, TransferObserver, TransferTask};
use indicatif::ProgressStyle;

use super::OutputConfig;

const BAR_TEMPLATE: &str =
    "{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta}) {msg}";

/// Progress bar wrapper
///
/// Handles progress display based on output configuration.
/// In quiet or JSON mode, progress is suppressed.
#[derive(Debug, Clone)]
pub struct ProgressBar {
    bar: Option<indicatif::ProgressBar>,
}

impl ProgressBar {
    /// Create a new progress bar with the given total size
    pub fn new(config: &OutputConfig, total: u64) -> Self {
        let bar = if config.quiet || config.json || config.no_progress {
            None
        } else {
            let style = ProgressStyle::default_bar()
                .template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-");
            let bar = indicatif::ProgressBar::new(total);
            bar.set_style(style);
            Some(bar)
        };

        Self { bar }
    }

    /// Increment progress
    pub fn inc(&self, delta: u64) {
        if let Some(bar) = &self.bar {
            bar.inc(delta);
        }
    }

    /// Move progress back, e.g. when an attempt is thrown away
    pub fn rewind(&self, delta: u64) {
        if let Some(bar) = &self.bar {
            bar.set_position(bar.position().saturating_sub(delta));
        }
    }

    /// Set message
    pub fn set_message(&self, message: &str) {
        if let Some(bar) = &self.bar {
            bar.set_message(message.to_string());
        }
    }

    /// Print a line above the bar without tearing it
    pub fn println(&self, message: &str) {
        if let Some(bar) = &self.bar {
            bar.println(message);
        }
    }

    /// Finish and clear the progress bar
    pub fn finish_and_clear(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }

    /// Check if progress bar is visible
    pub fn is_visible(&self) -> bool {
        self.bar.is_some()
    }

    pub fn position(&self) -> u64 {
        self.bar.as_ref().map_or(0, indicatif::ProgressBar::position)
    }
}

/// Drives a [`ProgressBar`] from executor events
#[derive(Debug, Clone)]
pub struct TransferProgress {
    bar: ProgressBar,
}

impl TransferProgress {
    /// Bar sized for the bytes still to move in `tasks`
    pub fn new(config: &OutputConfig, tasks: &[TransferTask]) -> Self {
        let total = tasks
            .iter()
            .filter(|t| t.status != TaskStatus::Succeeded)
            .map(|t| t.source.size)
            .sum();
        Self {
            bar: ProgressBar::new(config, total),
        }
    }

    pub fn bar(&self) -> &ProgressBar {
        &self.bar
    }
}

impl TransferObserver for TransferProgress {
    fn task_started(&self, _index: usize, task: &TransferTask) {
        let name = task.source.reference.file_name().unwrap_or("");
        self.bar.set_message(name);
    }

    fn bytes_transferred(&self, _index: usize, bytes: u64) {
        self.bar.inc(bytes);
    }

    fn task_retrying(&self, _index: usize, task: &TransferTask, _delay: Duration) {
        // The next attempt starts from byte zero
        self.bar.rewind(task.bytes_transferred);
    }

    fn task_finished(&self, _index: usize, task: &TransferTask) {
        if task.status == TaskStatus::Failed {
            self.bar.println(&format!(
                "failed: {} ({})",
                task.source.reference,
                task.last_error.as_deref().unwrap_or("unknown error")
            ));
        }
    }
}

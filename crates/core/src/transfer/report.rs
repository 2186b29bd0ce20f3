//! Migration report and its accumulator

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};

use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};

use super::task::{TaskStatus, TransferTask};
use crate::error::{Error, Result};

/// Final summary of one batch transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub bytes_transferred: u64,

    /// The batch was stopped by the caller
    #[serde(default)]
    pub cancelled: bool,

    pub started_at: Timestamp,
    pub finished_at: Timestamp,

    /// Every task, in planned order
    pub task_details: Vec<TransferTask>,
}

impl MigrationReport {
    pub fn from_tasks(
        task_details: Vec<TransferTask>,
        started_at: Timestamp,
        finished_at: Timestamp,
        cancelled: bool,
    ) -> Self {
        let count = |status| task_details.iter().filter(|t| t.status == status).count();
        let bytes_transferred = task_details
            .iter()
            .filter(|t| t.status == TaskStatus::Succeeded)
            .map(|t| t.bytes_transferred)
            .sum();

        Self {
            total: task_details.len(),
            succeeded: count(TaskStatus::Succeeded),
            failed: count(TaskStatus::Failed),
            skipped: count(TaskStatus::Skipped),
            bytes_transferred,
            cancelled,
            started_at,
            finished_at,
            task_details,
        }
    }

    /// True when no task failed
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub fn duration(&self) -> SignedDuration {
        self.finished_at.duration_since(self.started_at)
    }

    /// Tasks that ended in `Failed`
    pub fn failures(&self) -> impl Iterator<Item = &TransferTask> {
        self.task_details
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
    }

    /// Task list for a resume run
    ///
    /// Succeeded tasks are kept untouched so the executor skips them; all
    /// others are reset to a fresh pending state.
    pub fn retry_plan(&self) -> Vec<TransferTask> {
        self.task_details
            .iter()
            .cloned()
            .map(|mut task| {
                if task.status != TaskStatus::Succeeded {
                    task.reset();
                }
                task
            })
            .collect()
    }
}

impl std::fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let seconds = self.duration().as_secs_f64();
        write!(
            f,
            "{} of {} objects transferred ({}) in {seconds:.1}s: {} succeeded, {} failed, {} skipped",
            self.succeeded,
            self.total,
            humansize::format_size(self.bytes_transferred, humansize::BINARY),
            self.succeeded,
            self.failed,
            self.skipped,
        )?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        for task in self.failures() {
            write!(
                f,
                "\n  {} -> {}: {}",
                task.source.reference,
                task.destination,
                task.last_error.as_deref().unwrap_or("unknown error")
            )?;
        }
        Ok(())
    }
}

/// Thread-safe collector of task outcomes
///
/// One slot per planned task, so the final order never depends on which
/// worker finished first.
#[derive(Debug)]
pub struct ReportAccumulator {
    slots: Mutex<Vec<TransferTask>>,
    started_at: Timestamp,
    complete: AtomicBool,
    cancelled: AtomicBool,
    report: OnceLock<MigrationReport>,
}

impl ReportAccumulator {
    pub fn new(tasks: Vec<TransferTask>) -> Self {
        Self {
            slots: Mutex::new(tasks),
            started_at: Timestamp::now(),
            complete: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            report: OnceLock::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mutate one slot and return whatever the closure returns
    ///
    /// Panics if `index` is out of range.
    pub fn update<R>(&self, index: usize, f: impl FnOnce(&mut TransferTask) -> R) -> R {
        f(&mut self.lock()[index])
    }

    /// Copy of one slot
    pub fn snapshot(&self, index: usize) -> Option<TransferTask> {
        self.lock().get(index).cloned()
    }

    /// Visit every slot in order
    pub fn for_each_mut(&self, mut f: impl FnMut(usize, &mut TransferTask)) {
        for (index, task) in self.lock().iter_mut().enumerate() {
            f(index, task);
        }
    }

    /// Signal that the executor is done with every slot
    pub fn mark_complete(&self, cancelled: bool) {
        self.cancelled.store(cancelled, Ordering::Release);
        self.complete.store(true, Ordering::Release);
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    /// Build the report; later calls return the same report
    pub fn finalize(&self) -> Result<MigrationReport> {
        if !self.is_complete() {
            return Err(Error::General(
                "Report finalized before the executor completed".into(),
            ));
        }
        let report = self.report.get_or_init(|| {
            MigrationReport::from_tasks(
                self.lock().clone(),
                self.started_at,
                Timestamp::now(),
                self.cancelled.load(Ordering::Acquire),
            )
        });
        Ok(report.clone())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TransferTask>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::LocationRef;
    use crate::provider::ObjectDescriptor;

    fn task(name: &str, size: u64) -> TransferTask {
        TransferTask::copy(
            ObjectDescriptor::file(LocationRef::new("src", format!("/{name}")), size),
            LocationRef::new("dst", format!("/{name}")),
        )
    }

    fn finished(name: &str, size: u64, status: TaskStatus) -> TransferTask {
        let mut task = task(name, size);
        task.start();
        match status {
            TaskStatus::Succeeded => task.succeed(size),
            TaskStatus::Failed => task.fail(&Error::NotFound(name.to_string())),
            TaskStatus::Skipped => task.skip(),
            _ => {}
        }
        task
    }

    #[test]
    fn test_counts() {
        let now = Timestamp::now();
        let report = MigrationReport::from_tasks(
            vec![
                finished("a", 10, TaskStatus::Succeeded),
                finished("b", 20, TaskStatus::Failed),
                finished("c", 30, TaskStatus::Succeeded),
                task("d", 40),
            ],
            now,
            now,
            false,
        );
        assert_eq!(report.total, 4);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.bytes_transferred, 40);
        assert!(!report.is_success());
        assert_eq!(report.failures().count(), 1);
    }

    #[test]
    fn test_retry_plan_keeps_succeeded() {
        let now = Timestamp::now();
        let report = MigrationReport::from_tasks(
            vec![
                finished("a", 10, TaskStatus::Succeeded),
                finished("b", 20, TaskStatus::Failed),
                finished("c", 30, TaskStatus::Skipped),
            ],
            now,
            now,
            true,
        );

        let plan = report.retry_plan();
        assert_eq!(plan[0].status, TaskStatus::Succeeded);
        assert_eq!(plan[0].attempt_count, 1);
        assert_eq!(plan[1], task("b", 20));
        assert_eq!(plan[2], task("c", 30));
    }

    #[test]
    fn test_finalize_requires_completion() {
        let acc = ReportAccumulator::new(vec![task("a", 1)]);
        assert!(acc.finalize().is_err());

        acc.update(0, |t| {
            t.start();
            t.succeed(1);
        });
        acc.mark_complete(false);

        let first = acc.finalize().unwrap();
        let second = acc.finalize().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.succeeded, 1);
    }

    #[test]
    fn test_finalize_is_stable_after_late_updates() {
        let acc = ReportAccumulator::new(vec![task("a", 1)]);
        acc.mark_complete(false);
        let first = acc.finalize().unwrap();

        acc.update(0, |t| t.skip());
        assert_eq!(acc.finalize().unwrap(), first);
    }

    #[test]
    fn test_display() {
        let now = Timestamp::now();
        let report = MigrationReport::from_tasks(
            vec![
                finished("a", 2048, TaskStatus::Succeeded),
                finished("b", 20, TaskStatus::Failed),
            ],
            now,
            now,
            false,
        );
        let text = report.to_string();
        assert!(text.starts_with("1 of 2 objects transferred (2 KiB)"));
        assert!(text.contains("src:/b -> dst:/b: Not found: b"));
    }

    #[test]
    fn test_report_json_roundtrip() {
        let now = Timestamp::now();
        let report = MigrationReport::from_tasks(
            vec![finished("a", 10, TaskStatus::Succeeded)],
            now,
            now,
            false,
        );
        let json = serde_json::to_string(&report).unwrap();
        let back: MigrationReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }
}

//! Transfer executor
//!
//! Runs planned tasks on a fixed pool of tokio workers that pull task indices
//! from one FIFO queue. Bytes are streamed from the source adapter to the
//! destination sink in bounded chunks; every write is awaited, so a slow
//! destination slows the reader down instead of growing a buffer.
//!
//! Retries are explicit state transitions: a task that hits a transient error
//! goes back to `Pending` and a timer owned by the executor puts its index at
//! the end of the queue once the backoff has elapsed.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use tokio::io::AsyncReadExt;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::report::{MigrationReport, ReportAccumulator};
use super::retry::RetryPolicy;
use super::task::{TaskKind, TaskStatus, TransferTask};
use super::verify::verify;
use crate::config::TransferConfig;
use crate::error::{Error, Result};
use crate::provider::{ObjectReader, ObjectSink, ProviderRegistry};

/// Tuning knobs for one executor run
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorOptions {
    /// Number of parallel workers
    pub concurrency: usize,
    pub retry: RetryPolicy,
    /// Copy buffer size in bytes
    pub chunk_size: usize,
    /// Per-attempt time limit
    pub timeout: Option<Duration>,
    /// Check size/checksum after each copy
    pub verify: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self::from(&TransferConfig::default())
    }
}

impl From<&TransferConfig> for ExecutorOptions {
    fn from(config: &TransferConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            retry: RetryPolicy::from(config),
            chunk_size: config.chunk_size.max(1),
            timeout: config.timeout(),
            verify: config.verify,
        }
    }
}

/// Receives progress events from the workers
///
/// Called from worker tasks, so implementations must be cheap and must not
/// block.
pub trait TransferObserver: Send + Sync {
    /// An attempt is about to start
    fn task_started(&self, _index: usize, _task: &TransferTask) {}

    /// `bytes` more bytes were written for the task
    fn bytes_transferred(&self, _index: usize, _bytes: u64) {}

    /// The attempt failed and the task will run again after `delay`
    fn task_retrying(&self, _index: usize, _task: &TransferTask, _delay: Duration) {}

    /// The task reached a terminal status
    fn task_finished(&self, _index: usize, _task: &TransferTask) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TransferObserver for NoopObserver {}

/// Executes transfer tasks against a provider registry
pub struct Executor {
    registry: Arc<ProviderRegistry>,
    options: ExecutorOptions,
    cancel: CancellationToken,
    observer: Arc<dyn TransferObserver>,
}

impl Executor {
    pub fn new(registry: Arc<ProviderRegistry>, options: ExecutorOptions) -> Self {
        Self {
            registry,
            options,
            cancel: CancellationToken::new(),
            observer: Arc::new(NoopObserver),
        }
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn TransferObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Token that stops this executor when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// Run every task to a terminal status and build the report
    ///
    /// Tasks that are already `Succeeded` are left untouched; every other
    /// task is reset and runs again.
    pub async fn execute(&self, mut tasks: Vec<TransferTask>) -> Result<MigrationReport> {
        if self.options.concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".into()));
        }

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let mut runnable = 0usize;
        for (index, task) in tasks.iter_mut().enumerate() {
            if task.status == TaskStatus::Succeeded {
                continue;
            }
            task.reset();
            runnable += 1;
            // The receiver is alive in this scope
            let _ = queue_tx.send(index);
        }

        let total = tasks.len();
        let shared = Arc::new(Shared {
            finished: (0..total).map(|_| AtomicBool::new(false)).collect(),
            registry: Arc::clone(&self.registry),
            options: self.options.clone(),
            cancel: self.cancel.clone(),
            done: CancellationToken::new(),
            queue_tx,
            queue_rx: Mutex::new(queue_rx),
            outstanding: AtomicUsize::new(runnable),
            accumulator: ReportAccumulator::new(tasks),
            observer: Arc::clone(&self.observer),
        });

        tracing::info!(
            tasks = total,
            runnable,
            concurrency = self.options.concurrency,
            "starting transfer"
        );

        if runnable == 0 {
            shared.done.cancel();
        }

        let mut workers = JoinSet::new();
        for worker_id in 0..self.options.concurrency {
            workers.spawn(Arc::clone(&shared).worker(worker_id));
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "transfer worker stopped unexpectedly");
            }
        }

        let cancelled = shared.cancel.is_cancelled();
        shared.sweep();
        shared.accumulator.mark_complete(cancelled);
        let report = shared.accumulator.finalize()?;

        tracing::info!(
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            bytes = report.bytes_transferred,
            cancelled,
            "transfer finished"
        );
        Ok(report)
    }
}

/// Run `tasks` with default options and the given concurrency
pub async fn execute(
    registry: Arc<ProviderRegistry>,
    tasks: Vec<TransferTask>,
    concurrency: usize,
) -> Result<MigrationReport> {
    let options = ExecutorOptions {
        concurrency,
        ..ExecutorOptions::default()
    };
    Executor::new(registry, options).execute(tasks).await
}

/// State shared by all workers of one run
struct Shared {
    registry: Arc<ProviderRegistry>,
    options: ExecutorOptions,
    cancel: CancellationToken,
    /// Fired once every runnable task is terminal
    done: CancellationToken,
    queue_tx: mpsc::UnboundedSender<usize>,
    queue_rx: Mutex<mpsc::UnboundedReceiver<usize>>,
    /// Runnable tasks not yet terminal
    outstanding: AtomicUsize,
    /// Tasks already counted out of `outstanding`
    finished: Box<[AtomicBool]>,
    accumulator: ReportAccumulator,
    observer: Arc<dyn TransferObserver>,
}

impl Shared {
    async fn worker(self: Arc<Self>, worker_id: usize) {
        loop {
            let next = {
                let mut queue = self.queue_rx.lock().await;
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => None,
                    _ = self.done.cancelled() => None,
                    index = queue.recv() => index,
                }
            };
            let Some(index) = next else {
                break;
            };
            if let Err(payload) = AssertUnwindSafe(self.run(index)).catch_unwind().await {
                self.recover(index, panic_message(payload.as_ref()));
            }
        }
        tracing::trace!(worker_id, "worker exiting");
    }

    async fn run(&self, index: usize) {
        let task = self.accumulator.update(index, |t| {
            t.start();
            t.clone()
        });
        self.observer.task_started(index, &task);
        tracing::debug!(
            source = %task.source.reference,
            destination = %task.destination,
            attempt = task.attempt_count,
            "starting attempt"
        );

        match self.attempt(index, &task).await {
            Ok(bytes) => self.succeed(index, bytes).await,
            Err(err) if err.is_retryable() && self.cancel.is_cancelled() => {
                self.fail(index, &Error::Cancelled)
            }
            Err(err) if self.options.retry.should_retry(task.attempt_count, &err) => {
                self.retry_later(index, &err, task.attempt_count)
            }
            Err(err) => self.fail(index, &err),
        }
    }

    async fn attempt(&self, index: usize, task: &TransferTask) -> Result<u64> {
        let deadline = self.options.timeout.map(|limit| Instant::now() + limit);
        match task.kind {
            TaskKind::EnsureDirectory => {
                let dst = self.registry.adapter(&task.destination.provider_id).await?;
                within(deadline, dst.ensure_directory(&task.destination)).await?;
                Ok(0)
            }
            TaskKind::Copy => self.copy(index, task, deadline).await,
        }
    }

    async fn copy(
        &self,
        index: usize,
        task: &TransferTask,
        deadline: Option<Instant>,
    ) -> Result<u64> {
        let src = self.registry.adapter(&task.source.reference.provider_id).await?;
        let dst = self.registry.adapter(&task.destination.provider_id).await?;

        let reader = within(deadline, src.open_read(&task.source.reference)).await?;
        let mut sink = within(
            deadline,
            dst.open_write(&task.destination, Some(task.source.size)),
        )
        .await?;

        let pumped = within(deadline, self.pump(index, task, reader, sink.as_mut())).await;
        match pumped {
            Ok(_) => within(deadline, sink.finish()).await,
            Err(err) => {
                if let Err(abort_err) = sink.abort().await {
                    tracing::debug!(
                        destination = %task.destination,
                        error = %abort_err,
                        "failed to abort partial write"
                    );
                }
                Err(err)
            }
        }
    }

    /// Copy bytes chunk by chunk, stopping at the first chunk boundary after cancellation
    async fn pump(
        &self,
        index: usize,
        task: &TransferTask,
        mut reader: ObjectReader,
        sink: &mut dyn ObjectSink,
    ) -> Result<u64> {
        let mut buffer = vec![0u8; self.options.chunk_size];
        let mut total = 0u64;
        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let read = reader
                .read(&mut buffer)
                .await
                .map_err(|e| Error::from_io(&task.source.reference.to_string(), e))?;
            if read == 0 {
                return Ok(total);
            }
            sink.write_chunk(&buffer[..read]).await?;
            total += read as u64;
            self.accumulator
                .update(index, |t| t.bytes_transferred = total);
            self.observer.bytes_transferred(index, read as u64);
        }
    }

    async fn succeed(&self, index: usize, bytes: u64) {
        let task = self.accumulator.update(index, |t| {
            t.succeed(bytes);
            t.clone()
        });

        if self.options.verify && task.kind == TaskKind::Copy {
            let result = match self.registry.adapter(&task.destination.provider_id).await {
                Ok(dst) => verify(dst.as_ref(), &task).await,
                Err(err) => super::verify::VerificationResult::mismatch(err.to_string()),
            };
            if !result.ok {
                tracing::warn!(
                    destination = %task.destination,
                    reason = result.reason.as_deref().unwrap_or_default(),
                    "integrity check failed"
                );
                self.accumulator.update(index, |t| result.apply(t));
            }
        }
        self.finish(index);
    }

    fn fail(&self, index: usize, err: &Error) {
        self.accumulator.update(index, |t| t.fail(err));
        tracing::warn!(index, error = %err, "transfer task failed");
        self.finish(index);
    }

    fn retry_later(&self, index: usize, err: &Error, attempt: u32) {
        let task = self.accumulator.update(index, |t| {
            t.retry_later(err);
            t.clone()
        });
        let delay = self.options.retry.backoff(attempt);
        tracing::warn!(
            source = %task.source.reference,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient failure, retrying"
        );
        self.observer.task_retrying(index, &task, delay);

        let queue = self.queue_tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    // Send only fails once every worker is gone
                    let _ = queue.send(index);
                }
                _ = cancel.cancelled() => {}
            }
        });
    }

    /// A task panicked somewhere between `start` and `finish`
    fn recover(&self, index: usize, message: &str) {
        tracing::error!(index, panic = message, "transfer task panicked");
        let terminal = self
            .accumulator
            .snapshot(index)
            .is_some_and(|task| task.is_terminal());
        if terminal {
            self.finish(index);
        } else {
            self.fail(
                index,
                &Error::General(format!("transfer task panicked: {message}")),
            );
        }
    }

    /// Mark a task terminal and wake the workers when it was the last one
    ///
    /// Counts each task once, even when called again after a panic.
    fn finish(&self, index: usize) {
        if self.finished[index].swap(true, Ordering::AcqRel) {
            return;
        }
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.done.cancel();
        }
        if let Some(task) = self.accumulator.snapshot(index) {
            self.observer.task_finished(index, &task);
        }
    }

    /// Give every task left behind by a cancelled run a terminal status
    fn sweep(&self) {
        let mut swept = Vec::new();
        self.accumulator.for_each_mut(|index, task| match task.status {
            TaskStatus::Pending if task.attempt_count == 0 => {
                task.skip();
                swept.push((index, task.clone()));
            }
            TaskStatus::Pending => {
                task.fail(&Error::Cancelled);
                swept.push((index, task.clone()));
            }
            TaskStatus::InProgress => {
                task.fail(&Error::General("worker stopped unexpectedly".into()));
                swept.push((index, task.clone()));
            }
            _ => {}
        });
        for (index, task) in &swept {
            self.observer.task_finished(*index, task);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Await `future`, failing with a transient error once `deadline` passes
async fn within<T>(
    deadline: Option<Instant>,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    match deadline {
        None => future.await,
        Some(deadline) => tokio::time::timeout_at(deadline, future)
            .await
            .unwrap_or_else(|_| Err(Error::Transient("transfer attempt timed out".into()))),
    }
}

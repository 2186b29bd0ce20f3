//! End-to-end engine scenarios on in-memory providers

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_core::error::{Error, FailureKind, Result};
use arc_core::provider::{
    Capabilities, DescriptorStream, ListOptions, MemoryProvider, ObjectDescriptor, ObjectReader,
    ObjectSink, ProviderAdapter, ProviderRegistry,
};
use arc_core::transfer::{
    Executor, ExecutorOptions, MigrationReport, RetryPolicy, TaskKind, TaskStatus,
    TransferObserver, TransferTask, plan,
};
use arc_core::LocationRef;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Memory provider with injectable faults
#[derive(Default)]
struct FaultyProvider {
    inner: MemoryProvider,
    read_delay: Mutex<HashMap<String, Duration>>,
    default_read_delay: Mutex<Duration>,
    transient_reads: Mutex<HashMap<String, u32>>,
    denied_writes: Mutex<HashSet<String>>,
    corrupt_writes: bool,
    writes: Mutex<HashMap<String, u32>>,
}

impl FaultyProvider {
    fn new() -> Self {
        Self::default()
    }

    fn corrupting() -> Self {
        Self {
            corrupt_writes: true,
            ..Self::default()
        }
    }

    fn delay_reads(&self, path: &str, delay: Duration) {
        self.read_delay.lock().unwrap().insert(path.into(), delay);
    }

    fn delay_all_reads(&self, delay: Duration) {
        *self.default_read_delay.lock().unwrap() = delay;
    }

    fn fail_reads(&self, path: &str, times: u32) {
        self.transient_reads.lock().unwrap().insert(path.into(), times);
    }

    fn deny_writes(&self, path: &str) {
        self.denied_writes.lock().unwrap().insert(path.into());
    }

    fn allow_all_writes(&self) {
        self.denied_writes.lock().unwrap().clear();
    }

    fn write_count(&self, path: &str) -> u32 {
        self.writes.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ProviderAdapter for FaultyProvider {
    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    async fn list(&self, location: &LocationRef, options: ListOptions) -> Result<DescriptorStream> {
        self.inner.list(location, options).await
    }

    async fn stat(&self, location: &LocationRef) -> Result<ObjectDescriptor> {
        self.inner.stat(location).await
    }

    async fn open_read(&self, location: &LocationRef) -> Result<ObjectReader> {
        let delay = self
            .read_delay
            .lock()
            .unwrap()
            .get(&location.path)
            .copied()
            .unwrap_or(*self.default_read_delay.lock().unwrap());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let should_fail = {
            let mut remaining = self.transient_reads.lock().unwrap();
            match remaining.get_mut(&location.path) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    true
                }
                _ => false,
            }
        };
        if should_fail {
            return Err(Error::Transient(format!("{location}: 503 Slow Down")));
        }
        self.inner.open_read(location).await
    }

    async fn open_write(
        &self,
        location: &LocationRef,
        size_hint: Option<u64>,
    ) -> Result<Box<dyn ObjectSink>> {
        *self
            .writes
            .lock()
            .unwrap()
            .entry(location.path.clone())
            .or_default() += 1;
        if self.denied_writes.lock().unwrap().contains(&location.path) {
            return Err(Error::PermissionDenied(location.to_string()));
        }
        let sink = self.inner.open_write(location, size_hint).await?;
        if self.corrupt_writes {
            Ok(Box::new(DroppingSink {
                inner: sink,
                first: true,
            }))
        } else {
            Ok(sink)
        }
    }

    async fn delete(&self, location: &LocationRef) -> Result<()> {
        self.inner.delete(location).await
    }

    async fn ensure_directory(&self, location: &LocationRef) -> Result<()> {
        self.inner.ensure_directory(location).await
    }
}

/// Loses the first byte of every object
struct DroppingSink {
    inner: Box<dyn ObjectSink>,
    first: bool,
}

#[async_trait]
impl ObjectSink for DroppingSink {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        if self.first && !chunk.is_empty() {
            self.first = false;
            return self.inner.write_chunk(&chunk[1..]).await;
        }
        self.inner.write_chunk(chunk).await
    }

    async fn finish(self: Box<Self>) -> Result<u64> {
        self.inner.finish().await
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        self.inner.abort().await
    }
}

/// Tracks how many tasks are in progress at once
#[derive(Default)]
struct ConcurrencyGauge {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl TransferObserver for ConcurrencyGauge {
    fn task_started(&self, _index: usize, _task: &TransferTask) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn task_retrying(&self, _index: usize, _task: &TransferTask, _delay: Duration) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn task_finished(&self, _index: usize, task: &TransferTask) {
        if task.attempt_count > 0 {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Cancels the run as soon as the first task succeeds
struct CancelAfterFirst {
    token: CancellationToken,
}

impl TransferObserver for CancelAfterFirst {
    fn task_finished(&self, _index: usize, task: &TransferTask) {
        if task.status == TaskStatus::Succeeded {
            self.token.cancel();
        }
    }
}

fn loc(provider: &str, path: &str) -> LocationRef {
    LocationRef::new(provider, path)
}

fn registry(src: Arc<dyn ProviderAdapter>, dst: Arc<dyn ProviderAdapter>) -> Arc<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    registry.register_adapter("src", "memory", src);
    registry.register_adapter("dst", "memory", dst);
    Arc::new(registry)
}

fn options(concurrency: usize) -> ExecutorOptions {
    ExecutorOptions {
        concurrency,
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
        },
        ..ExecutorOptions::default()
    }
}

fn source_with(files: &[(&str, usize)]) -> Arc<FaultyProvider> {
    let src = Arc::new(FaultyProvider::new());
    for (path, size) in files {
        src.inner.put(path, vec![b'x'; *size]);
    }
    src
}

async fn run(
    registry: &Arc<ProviderRegistry>,
    tasks: Vec<TransferTask>,
    options: ExecutorOptions,
) -> MigrationReport {
    Executor::new(Arc::clone(registry), options)
        .execute(tasks)
        .await
        .unwrap()
}

#[tokio::test]
async fn three_files_two_workers_all_succeed() {
    let src = source_with(&[("/in/a", 10), ("/in/b", 20), ("/in/c", 30)]);
    let dst = Arc::new(MemoryProvider::new());
    let registry = registry(src, dst.clone());

    let tasks = plan(&registry, &loc("src", "/in"), &loc("dst", "/out"), true)
        .await
        .unwrap();
    let report = run(&registry, tasks, options(2)).await;

    assert_eq!(report.total, 3);
    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.bytes_transferred, 60);
    assert!(report.is_success());
    assert_eq!(dst.get("/out/c").map(|d| d.len()), Some(30));
}

#[tokio::test]
async fn corrupted_write_is_integrity_mismatch() {
    let src = source_with(&[("/a.txt", 16)]);
    let dst = Arc::new(FaultyProvider::corrupting());
    let registry = registry(src, dst.clone());

    let tasks = plan(&registry, &loc("src", "/a.txt"), &loc("dst", "/a.txt"), false)
        .await
        .unwrap();
    let report = run(&registry, tasks, options(1)).await;

    assert_eq!(report.failed, 1);
    let task = &report.task_details[0];
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.failure, Some(FailureKind::IntegrityMismatch));
    assert_eq!(task.attempt_count, 1);
    assert_eq!(dst.write_count("/a.txt"), 1);
}

#[tokio::test]
async fn corrupted_write_passes_when_verification_disabled() {
    let src = source_with(&[("/a.txt", 16)]);
    let registry = registry(src, Arc::new(FaultyProvider::corrupting()));

    let tasks = plan(&registry, &loc("src", "/a.txt"), &loc("dst", "/a.txt"), false)
        .await
        .unwrap();
    let report = run(
        &registry,
        tasks,
        ExecutorOptions {
            verify: false,
            ..options(1)
        },
    )
    .await;

    assert_eq!(report.succeeded, 1);
}

#[tokio::test]
async fn cancel_after_first_success() {
    let src = source_with(&[("/0", 8), ("/1", 8), ("/2", 8), ("/3", 8), ("/4", 8)]);
    src.delay_all_reads(Duration::from_millis(200));
    src.delay_reads("/0", Duration::ZERO);
    let registry = registry(src, Arc::new(MemoryProvider::new()));

    let tasks = plan(&registry, &loc("src", "/"), &loc("dst", "/"), true)
        .await
        .unwrap();
    assert_eq!(tasks.len(), 5);

    let token = CancellationToken::new();
    let concurrency = 2;
    let report = Executor::new(Arc::clone(&registry), options(concurrency))
        .with_cancellation(token.clone())
        .with_observer(Arc::new(CancelAfterFirst {
            token: token.clone(),
        }))
        .execute(tasks)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.task_details[0].status, TaskStatus::Succeeded);
    assert!(report.failed <= concurrency - 1);
    assert_eq!(report.skipped, 5 - 1 - report.failed);
    for task in report.failures() {
        assert_eq!(task.failure, Some(FailureKind::Cancelled));
    }
    for task in report
        .task_details
        .iter()
        .filter(|t| t.status == TaskStatus::Skipped)
    {
        assert_eq!(task.attempt_count, 0);
    }
}

#[tokio::test]
async fn never_more_than_n_in_progress() {
    let files: Vec<(String, usize)> = (0..12).map(|i| (format!("/f{i:02}"), 4)).collect();
    let refs: Vec<(&str, usize)> = files.iter().map(|(p, s)| (p.as_str(), *s)).collect();
    let src = source_with(&refs);
    src.delay_all_reads(Duration::from_millis(15));
    src.fail_reads("/f03", 1);
    let registry = registry(src, Arc::new(MemoryProvider::new()));

    let tasks = plan(&registry, &loc("src", "/"), &loc("dst", "/"), true)
        .await
        .unwrap();
    let gauge = Arc::new(ConcurrencyGauge::default());
    let report = Executor::new(Arc::clone(&registry), options(3))
        .with_observer(gauge.clone())
        .execute(tasks)
        .await
        .unwrap();

    assert_eq!(report.succeeded, 12);
    let max = gauge.max.load(Ordering::SeqCst);
    assert!(max >= 1 && max <= 3, "max in progress was {max}");
    assert_eq!(gauge.current.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn report_keeps_planned_order() {
    let src = source_with(&[("/a", 1), ("/b", 2), ("/c", 3), ("/d", 4)]);
    // Earlier tasks finish last
    src.delay_reads("/a", Duration::from_millis(80));
    src.delay_reads("/b", Duration::from_millis(60));
    src.delay_reads("/c", Duration::from_millis(40));
    let registry = registry(src, Arc::new(MemoryProvider::new()));

    let tasks = plan(&registry, &loc("src", "/"), &loc("dst", "/copy"), true)
        .await
        .unwrap();
    let planned: Vec<LocationRef> = tasks.iter().map(|t| t.destination.clone()).collect();

    let report = run(&registry, tasks, options(4)).await;
    let reported: Vec<LocationRef> = report
        .task_details
        .iter()
        .map(|t| t.destination.clone())
        .collect();
    assert_eq!(reported, planned);
    assert_eq!(reported[0], loc("dst", "/copy/a"));
}

#[tokio::test]
async fn transient_errors_are_retried() {
    let src = source_with(&[("/flaky", 5)]);
    src.fail_reads("/flaky", 2);
    let registry = registry(src, Arc::new(MemoryProvider::new()));

    let tasks = plan(&registry, &loc("src", "/flaky"), &loc("dst", "/flaky"), false)
        .await
        .unwrap();
    let report = run(&registry, tasks, options(1)).await;

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.task_details[0].attempt_count, 3);
    assert!(report.task_details[0].last_error.is_none());
}

#[tokio::test]
async fn transient_errors_give_up_after_max_attempts() {
    let src = source_with(&[("/flaky", 5)]);
    src.fail_reads("/flaky", 10);
    let registry = registry(src, Arc::new(MemoryProvider::new()));

    let tasks = plan(&registry, &loc("src", "/flaky"), &loc("dst", "/flaky"), false)
        .await
        .unwrap();
    let report = run(&registry, tasks, options(2)).await;

    let task = &report.task_details[0];
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.failure, Some(FailureKind::Transient));
    assert_eq!(task.attempt_count, 3);
    assert!(task.last_error.as_deref().unwrap().contains("503"));
}

#[tokio::test]
async fn permanent_error_fails_after_one_attempt() {
    let src = source_with(&[("/a", 1), ("/b", 1)]);
    let dst = Arc::new(FaultyProvider::new());
    dst.deny_writes("/b");
    let registry = registry(src, dst.clone());

    let tasks = plan(&registry, &loc("src", "/"), &loc("dst", "/"), true)
        .await
        .unwrap();
    let report = run(&registry, tasks, options(2)).await;

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);
    let failed = report.failures().next().unwrap();
    assert_eq!(failed.failure, Some(FailureKind::PermissionDenied));
    assert_eq!(failed.attempt_count, 1);
    assert_eq!(dst.write_count("/b"), 1);
}

#[tokio::test]
async fn timeout_is_treated_as_transient() {
    let src = source_with(&[("/slow", 3)]);
    src.delay_reads("/slow", Duration::from_millis(500));
    let registry = registry(src, Arc::new(MemoryProvider::new()));

    let tasks = plan(&registry, &loc("src", "/slow"), &loc("dst", "/slow"), false)
        .await
        .unwrap();
    let report = run(
        &registry,
        tasks,
        ExecutorOptions {
            timeout: Some(Duration::from_millis(20)),
            retry: RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(1),
            },
            ..options(1)
        },
    )
    .await;

    let task = &report.task_details[0];
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.failure, Some(FailureKind::Transient));
    assert_eq!(task.attempt_count, 2);
}

#[tokio::test]
async fn resume_only_touches_unfinished_tasks() {
    let src = source_with(&[("/a", 1), ("/b", 2), ("/c", 3)]);
    let dst = Arc::new(FaultyProvider::new());
    dst.deny_writes("/b");
    let registry = registry(src, dst.clone());

    let tasks = plan(&registry, &loc("src", "/"), &loc("dst", "/"), true)
        .await
        .unwrap();
    let first = run(&registry, tasks, options(2)).await;
    assert_eq!(first.succeeded, 2);
    assert_eq!(first.failed, 1);

    // Round-trip through JSON like a report file on disk
    let saved = serde_json::to_string(&first).unwrap();
    let loaded: MigrationReport = serde_json::from_str(&saved).unwrap();

    dst.allow_all_writes();
    let second = run(&registry, loaded.retry_plan(), options(2)).await;

    assert_eq!(second.succeeded, 3);
    assert_eq!(second.failed, 0);
    assert_eq!(dst.write_count("/a"), 1);
    assert_eq!(dst.write_count("/b"), 2);
    assert_eq!(dst.write_count("/c"), 1);
}

#[tokio::test]
async fn recursive_task_count_matches_tree() {
    let src = source_with(&[
        ("/tree/a", 1),
        ("/tree/x/b", 1),
        ("/tree/x/y/c", 1),
        ("/tree/z/d", 1),
    ]);

    let flat = registry(src.clone(), Arc::new(MemoryProvider::new()));
    let tasks = plan(&flat, &loc("src", "/tree"), &loc("dst", "/t"), true)
        .await
        .unwrap();
    assert_eq!(tasks.len(), 4);
    assert!(tasks.iter().all(|t| t.kind == TaskKind::Copy));

    let hierarchical = registry(src, Arc::new(MemoryProvider::new().with_directories()));
    let tasks = plan(&hierarchical, &loc("src", "/tree"), &loc("dst", "/t"), true)
        .await
        .unwrap();
    let dirs = tasks
        .iter()
        .filter(|t| t.kind == TaskKind::EnsureDirectory)
        .count();
    assert_eq!(dirs, 3);
    assert_eq!(tasks.len(), 7);

    let report = run(&hierarchical, tasks, options(2)).await;
    assert_eq!(report.succeeded, 7);
}

#[tokio::test]
async fn unknown_provider_aborts_before_execution() {
    let registry = registry(source_with(&[("/a", 1)]), Arc::new(MemoryProvider::new()));
    let result = plan(&registry, &loc("dropbox", "/a"), &loc("dst", "/a"), false).await;
    assert!(matches!(result, Err(Error::InvalidReference(_))));
}

//! Transfer planning
//!
//! Turns a source and a destination location into an ordered list of
//! [`TransferTask`]s. Recursive plans walk the source lazily through the
//! adapter's list stream, so a large tree is never materialized twice.

use std::pin::Pin;

use futures::{Stream, TryStreamExt, future, stream};

use super::task::TransferTask;
use crate::error::{Error, Result};
use crate::path::LocationRef;
use crate::provider::{ListOptions, ObjectDescriptor, ProviderAdapter, ProviderRegistry};

/// Lazy sequence of planned tasks, in source listing order
pub type TaskStream = Pin<Box<dyn Stream<Item = Result<TransferTask>> + Send>>;

/// Plan a transfer and collect every task
///
/// Any planning error (unknown provider, missing source, listing failure)
/// is returned before a single task exists.
pub async fn plan(
    registry: &ProviderRegistry,
    source: &LocationRef,
    destination: &LocationRef,
    recursive: bool,
) -> Result<Vec<TransferTask>> {
    let tasks = plan_stream(registry, source, destination, recursive)
        .await?
        .try_collect::<Vec<_>>()
        .await?;
    tracing::debug!(%source, %destination, tasks = tasks.len(), "planned transfer");
    Ok(tasks)
}

/// Plan a transfer lazily
pub async fn plan_stream(
    registry: &ProviderRegistry,
    source: &LocationRef,
    destination: &LocationRef,
    recursive: bool,
) -> Result<TaskStream> {
    let src = registry.adapter(&source.provider_id).await?;
    let dst = registry.adapter(&destination.provider_id).await?;
    plan_with(src.as_ref(), dst.as_ref(), source, destination, recursive).await
}

/// Plan against already resolved adapters
pub async fn plan_with(
    src: &dyn ProviderAdapter,
    dst: &dyn ProviderAdapter,
    source: &LocationRef,
    destination: &LocationRef,
    recursive: bool,
) -> Result<TaskStream> {
    let root = src.stat(source).await?;

    if !root.is_directory {
        let target = file_destination(source, destination);
        let task = TransferTask::copy(root, target);
        return Ok(Box::pin(stream::once(future::ready(Ok(task)))));
    }

    if !recursive {
        return Err(Error::IsDirectory(source.to_string()));
    }

    let with_directories = dst.capabilities().requires_directories;
    let source_root = source.clone();
    let dest_root = destination.clone();

    let entries = src.list(source, ListOptions { recursive: true }).await?;
    let tasks = entries.try_filter_map(move |entry| {
        future::ready(map_entry(entry, &source_root, &dest_root, with_directories))
    });
    Ok(Box::pin(tasks))
}

/// Destination of a single-file copy: `dst/` means "into this directory"
fn file_destination(source: &LocationRef, destination: &LocationRef) -> LocationRef {
    match source.file_name() {
        Some(name) if destination.is_dir_like() => destination.join(name),
        _ => destination.clone(),
    }
}

fn map_entry(
    entry: ObjectDescriptor,
    source_root: &LocationRef,
    dest_root: &LocationRef,
    with_directories: bool,
) -> Result<Option<TransferTask>> {
    if entry.is_directory && !with_directories {
        return Ok(None);
    }

    let relative = entry.reference.relative_to(source_root).ok_or_else(|| {
        Error::General(format!(
            "Listing of {source_root} returned {} outside the source tree",
            entry.reference
        ))
    })?;
    if relative.is_empty() {
        return Ok(None);
    }

    let target = dest_root.join(&relative);
    Ok(Some(if entry.is_directory {
        TransferTask::ensure_directory(entry, target)
    } else {
        TransferTask::copy(entry, target)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Capabilities, MemoryProvider, MockProviderAdapter};
    use crate::transfer::task::TaskKind;
    use std::sync::Arc;

    fn loc(provider: &str, path: &str) -> LocationRef {
        LocationRef::new(provider, path)
    }

    fn registry(src: Arc<MemoryProvider>, dst: Arc<MemoryProvider>) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry.register_adapter("src", "memory", src);
        registry.register_adapter("dst", "memory", dst);
        registry
    }

    fn destinations(tasks: &[TransferTask]) -> Vec<&str> {
        tasks.iter().map(|t| t.destination.path.as_str()).collect()
    }

    #[tokio::test]
    async fn test_single_file() {
        let src = Arc::new(MemoryProvider::new());
        src.put("/docs/report.pdf", vec![1u8; 42]);
        let registry = registry(src, Arc::new(MemoryProvider::new()));

        let tasks = plan(
            &registry,
            &loc("src", "/docs/report.pdf"),
            &loc("dst", "/backup/copy.pdf"),
            false,
        )
        .await
        .unwrap();

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].source.size, 42);
        assert_eq!(tasks[0].destination, loc("dst", "/backup/copy.pdf"));
    }

    #[tokio::test]
    async fn test_single_file_into_directory() {
        let src = Arc::new(MemoryProvider::new());
        src.put("/docs/report.pdf", "x");
        let registry = registry(src, Arc::new(MemoryProvider::new()));

        let tasks = plan(
            &registry,
            &loc("src", "/docs/report.pdf"),
            &loc("dst", "/backup/"),
            true,
        )
        .await
        .unwrap();

        assert_eq!(destinations(&tasks), vec!["/backup/report.pdf"]);
    }

    #[tokio::test]
    async fn test_directory_without_recursive() {
        let src = Arc::new(MemoryProvider::new());
        src.put("/docs/a.txt", "a");
        let registry = registry(src, Arc::new(MemoryProvider::new()));

        let result = plan(&registry, &loc("src", "/docs"), &loc("dst", "/out"), false).await;
        assert!(matches!(result, Err(Error::IsDirectory(_))));
    }

    #[tokio::test]
    async fn test_missing_source() {
        let registry = registry(
            Arc::new(MemoryProvider::new()),
            Arc::new(MemoryProvider::new()),
        );
        let result = plan(&registry, &loc("src", "/nope"), &loc("dst", "/out"), true).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_recursive_maps_relative_paths() {
        let src = Arc::new(MemoryProvider::new());
        src.put("/data/a.txt", "a");
        src.put("/data/sub/b.txt", "bb");
        src.put("/data/sub/deeper/c.txt", "ccc");
        src.put("/database.txt", "not under /data");
        let registry = registry(src, Arc::new(MemoryProvider::new()));

        let tasks = plan(&registry, &loc("src", "/data"), &loc("dst", "/mirror"), true)
            .await
            .unwrap();

        assert_eq!(
            destinations(&tasks),
            vec![
                "/mirror/a.txt",
                "/mirror/sub/b.txt",
                "/mirror/sub/deeper/c.txt"
            ]
        );
        assert!(tasks.iter().all(|t| t.kind == TaskKind::Copy));
    }

    #[tokio::test]
    async fn test_recursive_emits_directories_when_required() {
        let src = Arc::new(MemoryProvider::new());
        src.put("/data/a.txt", "a");
        src.put("/data/sub/b.txt", "bb");
        src.add_directory("/data/empty");
        let dst = Arc::new(MemoryProvider::new().with_directories());
        let registry = registry(src, dst);

        let tasks = plan(&registry, &loc("src", "/data"), &loc("dst", "/mirror"), true)
            .await
            .unwrap();

        let dirs: Vec<_> = tasks
            .iter()
            .filter(|t| t.kind == TaskKind::EnsureDirectory)
            .map(|t| t.destination.path.as_str())
            .collect();
        assert_eq!(dirs, vec!["/mirror/empty", "/mirror/sub"]);
        assert_eq!(tasks.len(), 4);
    }

    #[tokio::test]
    async fn test_listing_error_aborts_plan() {
        let mut src = MockProviderAdapter::new();
        src.expect_stat()
            .returning(|l| Ok(ObjectDescriptor::directory(l.clone())));
        src.expect_list()
            .returning(|l, _| Err(Error::PermissionDenied(l.to_string())));

        let mut dst = MockProviderAdapter::new();
        dst.expect_capabilities().returning(Capabilities::default);

        let result = plan_with(
            &src,
            &dst,
            &loc("src", "/private"),
            &loc("dst", "/out"),
            true,
        )
        .await;
        assert!(matches!(result, Err(Error::PermissionDenied(_))));
    }
}

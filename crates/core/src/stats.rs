//! Aggregated size and count metrics for a location

use std::collections::BTreeMap;

use futures::TryStreamExt;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::path::LocationRef;
use crate::provider::{ListOptions, ObjectDescriptor, ProviderAdapter};

/// Key used for files without an extension
pub const NO_EXTENSION: &str = "(none)";

/// Totals for one file extension
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionStats {
    pub files: u64,
    pub bytes: u64,
}

/// Largest object seen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LargestObject {
    pub path: String,
    pub size: u64,
}

/// Metrics over everything below a location
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationStats {
    pub location: String,
    pub files: u64,
    pub directories: u64,
    pub total_bytes: u64,
    pub largest: Option<LargestObject>,
    /// Lowercased extension -> totals
    pub by_extension: BTreeMap<String, ExtensionStats>,
}

impl LocationStats {
    fn new(location: &LocationRef) -> Self {
        Self {
            location: location.to_string(),
            ..Default::default()
        }
    }

    /// Fold one descriptor into the totals
    pub fn record(&mut self, entry: &ObjectDescriptor) {
        if entry.is_directory {
            self.directories += 1;
            return;
        }

        self.files += 1;
        self.total_bytes += entry.size;

        let ext = entry
            .reference
            .file_name()
            .and_then(extension)
            .unwrap_or_else(|| NO_EXTENSION.to_string());
        let bucket = self.by_extension.entry(ext).or_default();
        bucket.files += 1;
        bucket.bytes += entry.size;

        if self.largest.as_ref().is_none_or(|l| entry.size > l.size) {
            self.largest = Some(LargestObject {
                path: entry.reference.path.clone(),
                size: entry.size,
            });
        }
    }

    /// Mean file size in bytes
    pub fn average_size(&self) -> u64 {
        self.total_bytes.checked_div(self.files).unwrap_or(0)
    }
}

impl std::fmt::Display for LocationStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} files, {} directories, {}",
            self.location,
            self.files,
            self.directories,
            humansize::format_size(self.total_bytes, humansize::BINARY)
        )
    }
}

/// Lowercased extension of a file name; dotfiles have none
fn extension(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Collect stats from one recursive listing of `location`
///
/// A location that is a single file yields stats for that file alone.
pub async fn collect_stats(
    adapter: &dyn ProviderAdapter,
    location: &LocationRef,
) -> Result<LocationStats> {
    let mut stats = LocationStats::new(location);

    let root = adapter.stat(location).await?;
    if !root.is_directory {
        stats.record(&root);
        return Ok(stats);
    }

    let mut entries = adapter
        .list(location, ListOptions { recursive: true })
        .await?;
    while let Some(entry) = entries.try_next().await? {
        stats.record(&entry);
    }

    tracing::debug!(
        %location,
        files = stats.files,
        bytes = stats.total_bytes,
        "collected stats"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MemoryProvider;

    #[test]
    fn test_extension() {
        assert_eq!(extension("a.TXT").as_deref(), Some("txt"));
        assert_eq!(extension("archive.tar.gz").as_deref(), Some("gz"));
        assert_eq!(extension("Makefile"), None);
        assert_eq!(extension(".bashrc"), None);
        assert_eq!(extension("trailing."), None);
    }

    #[tokio::test]
    async fn test_collect_tree() {
        let provider = MemoryProvider::new();
        provider.put("/photos/a.jpg", vec![0u8; 100]);
        provider.put("/photos/2024/b.JPG", vec![0u8; 300]);
        provider.put("/photos/2024/notes.txt", vec![0u8; 10]);
        provider.put("/photos/README", vec![0u8; 5]);

        let stats = collect_stats(&provider, &LocationRef::new("mem", "/photos"))
            .await
            .unwrap();

        assert_eq!(stats.files, 4);
        assert_eq!(stats.directories, 1);
        assert_eq!(stats.total_bytes, 415);
        assert_eq!(stats.average_size(), 103);
        assert_eq!(
            stats.largest,
            Some(LargestObject {
                path: "/photos/2024/b.JPG".into(),
                size: 300
            })
        );
        assert_eq!(
            stats.by_extension["jpg"],
            ExtensionStats {
                files: 2,
                bytes: 400
            }
        );
        assert_eq!(stats.by_extension[NO_EXTENSION].files, 1);
        assert_eq!(stats.to_string(), "mem:/photos: 4 files, 1 directories, 415 B");
    }

    #[tokio::test]
    async fn test_collect_single_file() {
        let provider = MemoryProvider::new();
        provider.put("/a.bin", vec![0u8; 7]);

        let stats = collect_stats(&provider, &LocationRef::new("mem", "/a.bin"))
            .await
            .unwrap();
        assert_eq!(stats.files, 1);
        assert_eq!(stats.directories, 0);
        assert_eq!(stats.total_bytes, 7);
    }

    #[tokio::test]
    async fn test_collect_missing() {
        let provider = MemoryProvider::new();
        let result = collect_stats(&provider, &LocationRef::new("mem", "/nope")).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_average() {
        assert_eq!(LocationStats::default().average_size(), 0);
    }
}

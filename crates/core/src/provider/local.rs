//! Local filesystem provider
//!
//! Maps `local:/some/path` onto a directory tree rooted at a configurable
//! directory. Writes go to a `.arc-partial` sibling and are renamed into
//! place on commit.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{
    AdapterFactory, Capabilities, Checksum, DescriptorStream, ListOptions, ObjectDescriptor,
    ObjectReader, ObjectSink, ProviderAdapter,
};
use crate::config::ProviderProfile;
use crate::error::{Error, Result};
use crate::path::LocationRef;

const PARTIAL_SUFFIX: &str = ".arc-partial";

/// Provider for a local directory tree
#[derive(Debug, Clone)]
pub struct LocalProvider {
    root: PathBuf,
    checksums: bool,
}

impl LocalProvider {
    /// Create a provider rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            checksums: false,
        }
    }

    /// Compute MD5 checksums on stat/list (reads every file once)
    pub fn with_checksums(mut self, enabled: bool) -> Self {
        self.checksums = enabled;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a provider path to a filesystem path under the root
    fn fs_path(&self, location: &LocationRef) -> Result<PathBuf> {
        let relative = Path::new(location.path.trim_start_matches('/'));
        let mut path = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(Error::InvalidReference(format!(
                        "{location}: path must stay inside the provider root"
                    )));
                }
            }
        }
        Ok(path)
    }

    async fn describe(
        &self,
        location: LocationRef,
        path: &Path,
        metadata: &std::fs::Metadata,
    ) -> Result<ObjectDescriptor> {
        if metadata.is_dir() {
            return Ok(ObjectDescriptor::directory(location));
        }
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| jiff::Timestamp::try_from(t).ok());
        let checksum = if self.checksums {
            Some(Checksum::md5(md5_file(path, &location).await?))
        } else {
            None
        };
        Ok(ObjectDescriptor::file(location, metadata.len())
            .with_modified_time(modified)
            .with_checksum(checksum))
    }

    /// Read one directory, returning entries sorted by name
    ///
    /// Symbolic links are skipped, so a listing never leaves the tree it was
    /// asked for and cannot loop.
    async fn read_sorted(&self, dir: &Path, location: &LocationRef) -> Result<Vec<ObjectDescriptor>> {
        let mut reader = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| Error::from_io(&location.to_string(), e))?;

        let mut names = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| Error::from_io(&location.to_string(), e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(PARTIAL_SUFFIX) {
                continue;
            }
            names.push((name, entry.path()));
        }
        names.sort();

        let mut out = Vec::with_capacity(names.len());
        for (name, path) in names {
            let child = location.join(&name);
            let metadata = match tokio::fs::symlink_metadata(&path).await {
                Ok(m) => m,
                // Entry vanished between readdir and stat
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(Error::from_io(&child.to_string(), e)),
            };
            if metadata.file_type().is_symlink() {
                tracing::debug!(entry = %child, "skipping symbolic link");
                continue;
            }
            out.push(self.describe(child, &path, &metadata).await?);
        }
        Ok(out)
    }
}

/// Stream MD5 of a file
async fn md5_file(path: &Path, location: &LocationRef) -> Result<String> {
    use md5::{Digest, Md5};

    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| Error::from_io(&location.to_string(), e))?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| Error::from_io(&location.to_string(), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Traversal state for the lazy directory walk
struct Walk {
    provider: LocalProvider,
    recursive: bool,
    /// Directories still to be read, popped from the back
    pending: Vec<(PathBuf, LocationRef)>,
    /// Entries of the directory currently being yielded
    ready: std::collections::VecDeque<ObjectDescriptor>,
}

#[async_trait]
impl ProviderAdapter for LocalProvider {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            requires_directories: true,
            checksum_algorithm: self.checksums.then(|| "md5".to_string()),
        }
    }

    async fn list(
        &self,
        location: &LocationRef,
        options: ListOptions,
    ) -> Result<DescriptorStream> {
        let root = self.fs_path(location)?;
        let metadata = tokio::fs::metadata(&root)
            .await
            .map_err(|e| Error::from_io(&location.to_string(), e))?;
        if !metadata.is_dir() {
            return Err(Error::NotFound(format!("{location} is not a directory")));
        }

        let walk = Walk {
            provider: self.clone(),
            recursive: options.recursive,
            pending: vec![(root, location.clone())],
            ready: Default::default(),
        };

        let entries = stream::try_unfold(walk, |mut walk| async move {
            loop {
                if let Some(descriptor) = walk.ready.pop_front() {
                    return Ok::<_, Error>(Some((descriptor, walk)));
                }
                let Some((dir, location)) = walk.pending.pop() else {
                    return Ok(None);
                };
                let entries = walk.provider.read_sorted(&dir, &location).await?;
                if walk.recursive {
                    // Reverse so the alphabetically first subdirectory is read next
                    for entry in entries.iter().rev().filter(|e| e.is_directory) {
                        let name = entry.reference.file_name().unwrap_or_default().to_string();
                        walk.pending.push((dir.join(name), entry.reference.clone()));
                    }
                }
                walk.ready.extend(entries);
            }
        });

        Ok(Box::pin(entries))
    }

    async fn stat(&self, location: &LocationRef) -> Result<ObjectDescriptor> {
        let path = self.fs_path(location)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| Error::from_io(&location.to_string(), e))?;
        self.describe(location.clone(), &path, &metadata).await
    }

    async fn open_read(&self, location: &LocationRef) -> Result<ObjectReader> {
        let path = self.fs_path(location)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| Error::from_io(&location.to_string(), e))?;
        if metadata.is_dir() {
            return Err(Error::IsDirectory(location.to_string()));
        }
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| Error::from_io(&location.to_string(), e))?;
        Ok(Box::new(tokio::io::BufReader::new(file)))
    }

    async fn open_write(
        &self,
        location: &LocationRef,
        _size_hint: Option<u64>,
    ) -> Result<Box<dyn ObjectSink>> {
        let target = self.fs_path(location)?;
        let Some(file_name) = target.file_name() else {
            return Err(Error::IsDirectory(location.to_string()));
        };
        if tokio::fs::metadata(&target).await.is_ok_and(|m| m.is_dir()) {
            return Err(Error::IsDirectory(location.to_string()));
        }

        let mut partial_name = file_name.to_os_string();
        partial_name.push(PARTIAL_SUFFIX);
        let partial = target.with_file_name(partial_name);

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::from_io(&location.to_string(), e))?;
        }
        let file = tokio::fs::File::create(&partial)
            .await
            .map_err(|e| Error::from_io(&location.to_string(), e))?;

        Ok(Box::new(LocalSink {
            display: location.to_string(),
            file,
            partial,
            target,
            written: 0,
        }))
    }

    async fn delete(&self, location: &LocationRef) -> Result<()> {
        let path = self.fs_path(location)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| Error::from_io(&location.to_string(), e))?;
        let result = if metadata.is_dir() {
            tokio::fs::remove_dir(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        result.map_err(|e| Error::from_io(&location.to_string(), e))
    }

    async fn ensure_directory(&self, location: &LocationRef) -> Result<()> {
        let path = self.fs_path(location)?;
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| Error::from_io(&location.to_string(), e))
    }
}

struct LocalSink {
    display: String,
    file: tokio::fs::File,
    partial: PathBuf,
    target: PathBuf,
    written: u64,
}

#[async_trait]
impl ObjectSink for LocalSink {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.file
            .write_all(chunk)
            .await
            .map_err(|e| Error::from_io(&self.display, e))?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<u64> {
        let LocalSink {
            display,
            mut file,
            partial,
            target,
            written,
        } = *self;
        file.flush()
            .await
            .map_err(|e| Error::from_io(&display, e))?;
        file.sync_all()
            .await
            .map_err(|e| Error::from_io(&display, e))?;
        drop(file);
        tokio::fs::rename(&partial, &target)
            .await
            .map_err(|e| Error::from_io(&display, e))?;
        Ok(written)
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        let LocalSink { file, partial, .. } = *self;
        drop(file);
        match tokio::fs::remove_file(&partial).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::from_io(&partial.display().to_string(), e)),
        }
    }
}

/// Options of a `kind = "local"` provider profile
#[derive(Debug, Deserialize)]
struct LocalSettings {
    #[serde(default = "default_root")]
    root: PathBuf,
    #[serde(default)]
    checksums: bool,
}

fn default_root() -> PathBuf {
    PathBuf::from("/")
}

/// Factory for [`LocalProvider`]
#[derive(Debug, Clone)]
pub struct LocalFactory {
    provider: LocalProvider,
}

impl LocalFactory {
    pub fn new(root: impl Into<PathBuf>, checksums: bool) -> Self {
        Self {
            provider: LocalProvider::new(root).with_checksums(checksums),
        }
    }

    /// Build from a profile with optional `root` and `checksums` options
    pub fn from_profile(profile: &ProviderProfile) -> Result<Self> {
        let settings: LocalSettings = profile.settings()?;
        Ok(Self::new(settings.root, settings.checksums))
    }
}

#[async_trait]
impl AdapterFactory for LocalFactory {
    fn kind(&self) -> &str {
        "local"
    }

    fn describe(&self) -> String {
        format!("local filesystem at {}", self.provider.root().display())
    }

    async fn create(&self) -> Result<Arc<dyn ProviderAdapter>> {
        Ok(Arc::new(self.provider.clone()))
    }
}

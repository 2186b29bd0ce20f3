//! In-memory provider
//!
//! Keeps objects in a process-local map. Used for dry experiments and as the
//! backend of the engine's test suites.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use jiff::Timestamp;
use serde::Deserialize;

use super::{
    AdapterFactory, Capabilities, DescriptorStream, ListOptions, ObjectDescriptor, ObjectReader,
    ObjectSink, ProviderAdapter, md5_hex,
};
use crate::config::ProviderProfile;
use crate::error::{Error, Result};
use crate::path::LocationRef;
use crate::provider::Checksum;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Arc<Vec<u8>>,
    modified: Timestamp,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, StoredObject>,
    directories: BTreeSet<String>,
}

/// Provider backed by a shared in-process map
#[derive(Debug, Default)]
pub struct MemoryProvider {
    state: Arc<Mutex<State>>,
    requires_directories: bool,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behave like a hierarchical store that needs explicit directories
    pub fn with_directories(mut self) -> Self {
        self.requires_directories = true;
        self
    }

    /// Store an object directly, bypassing the sink
    pub fn put(&self, path: &str, data: impl Into<Vec<u8>>) {
        let key = normalize(path);
        self.lock().objects.insert(
            key,
            StoredObject {
                data: Arc::new(data.into()),
                modified: Timestamp::now(),
            },
        );
    }

    /// Register an explicit (possibly empty) directory
    pub fn add_directory(&self, path: &str) {
        self.lock().directories.insert(normalize(path));
    }

    /// Read an object back
    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.lock()
            .objects
            .get(&normalize(path))
            .map(|o| o.data.as_ref().clone())
    }

    /// Whether an explicit directory has been created at `path`
    pub fn has_directory(&self, path: &str) -> bool {
        self.lock().directories.contains(&normalize(path))
    }

    /// All object paths, sorted
    pub fn paths(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        lock_state(&self.state)
    }

    fn is_directory(state: &State, key: &str) -> bool {
        if key.is_empty() || state.directories.contains(key) {
            return true;
        }
        let prefix = format!("{key}/");
        state
            .objects
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(k, _)| k.starts_with(&prefix))
            || state.directories.iter().any(|d| d.starts_with(&prefix))
    }

    fn describe(location: &LocationRef, object: &StoredObject) -> ObjectDescriptor {
        ObjectDescriptor::file(location.clone(), object.data.len() as u64)
            .with_checksum(Some(Checksum::md5(md5_hex(&object.data))))
            .with_modified_time(Some(object.modified))
    }
}

fn lock_state(state: &Mutex<State>) -> MutexGuard<'_, State> {
    // A panicking writer cannot leave the map half-updated
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Canonical key: no leading or trailing slashes
fn normalize(path: &str) -> String {
    path.trim_matches('/').to_string()
}

/// Key relative to `base`, if it lies strictly underneath it
fn child_of<'a>(base: &str, key: &'a str) -> Option<&'a str> {
    if base.is_empty() {
        return (!key.is_empty()).then_some(key);
    }
    key.strip_prefix(base)?.strip_prefix('/')
}

#[async_trait]
impl ProviderAdapter for MemoryProvider {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            requires_directories: self.requires_directories,
            checksum_algorithm: Some("md5".to_string()),
        }
    }

    async fn list(
        &self,
        location: &LocationRef,
        options: ListOptions,
    ) -> Result<DescriptorStream> {
        let base = normalize(&location.path);
        let state = self.lock();

        if state.objects.contains_key(&base) || !Self::is_directory(&state, &base) {
            return Err(Error::NotFound(location.to_string()));
        }

        // relative path -> descriptor; BTreeMap keeps listing order stable
        let mut entries: BTreeMap<String, ObjectDescriptor> = BTreeMap::new();

        for (key, object) in &state.objects {
            let Some(rel) = child_of(&base, key) else {
                continue;
            };
            let segments: Vec<&str> = rel.split('/').collect();
            if !options.recursive && segments.len() > 1 {
                let dir = segments[0].to_string();
                entries
                    .entry(dir.clone())
                    .or_insert_with(|| ObjectDescriptor::directory(location.join(&dir)));
                continue;
            }
            for depth in 1..segments.len() {
                let dir = segments[..depth].join("/");
                entries
                    .entry(dir.clone())
                    .or_insert_with(|| ObjectDescriptor::directory(location.join(&dir)));
            }
            entries.insert(rel.to_string(), Self::describe(&location.join(rel), object));
        }

        for dir in &state.directories {
            let Some(rel) = child_of(&base, dir) else {
                continue;
            };
            let segments: Vec<&str> = rel.split('/').collect();
            let depth_limit = if options.recursive { segments.len() } else { 1 };
            for depth in 1..=depth_limit {
                let dir = segments[..depth].join("/");
                entries
                    .entry(dir.clone())
                    .or_insert_with(|| ObjectDescriptor::directory(location.join(&dir)));
            }
        }

        let items: Vec<Result<ObjectDescriptor>> = entries.into_values().map(Ok).collect();
        Ok(Box::pin(futures::stream::iter(items)))
    }

    async fn stat(&self, location: &LocationRef) -> Result<ObjectDescriptor> {
        let key = normalize(&location.path);
        let state = self.lock();
        if let Some(object) = state.objects.get(&key) {
            return Ok(Self::describe(location, object));
        }
        if Self::is_directory(&state, &key) {
            return Ok(ObjectDescriptor::directory(location.clone()));
        }
        Err(Error::NotFound(location.to_string()))
    }

    async fn open_read(&self, location: &LocationRef) -> Result<ObjectReader> {
        let key = normalize(&location.path);
        let state = self.lock();
        match state.objects.get(&key) {
            Some(object) => Ok(Box::new(std::io::Cursor::new(object.data.as_ref().clone()))),
            None if Self::is_directory(&state, &key) => {
                Err(Error::IsDirectory(location.to_string()))
            }
            None => Err(Error::NotFound(location.to_string())),
        }
    }

    async fn open_write(
        &self,
        location: &LocationRef,
        size_hint: Option<u64>,
    ) -> Result<Box<dyn ObjectSink>> {
        let key = normalize(&location.path);
        if key.is_empty() {
            return Err(Error::IsDirectory(location.to_string()));
        }
        let capacity = size_hint.unwrap_or(0).min(16 * 1024 * 1024) as usize;
        Ok(Box::new(MemorySink {
            state: Arc::clone(&self.state),
            key,
            buffer: Vec::with_capacity(capacity),
        }))
    }

    async fn delete(&self, location: &LocationRef) -> Result<()> {
        let key = normalize(&location.path);
        let mut state = self.lock();
        if state.objects.remove(&key).is_some() || state.directories.remove(&key) {
            Ok(())
        } else {
            Err(Error::NotFound(location.to_string()))
        }
    }

    async fn ensure_directory(&self, location: &LocationRef) -> Result<()> {
        let key = normalize(&location.path);
        let mut state = self.lock();
        if state.objects.contains_key(&key) {
            return Err(Error::General(format!(
                "{location} exists and is not a directory"
            )));
        }
        if self.requires_directories && !key.is_empty() {
            state.directories.insert(key);
        }
        Ok(())
    }
}

struct MemorySink {
    state: Arc<Mutex<State>>,
    key: String,
    buffer: Vec<u8>,
}

#[async_trait]
impl ObjectSink for MemorySink {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<u64> {
        let written = self.buffer.len() as u64;
        let MemorySink { state, key, buffer } = *self;
        lock_state(&state).objects.insert(
            key,
            StoredObject {
                data: Arc::new(buffer),
                modified: Timestamp::now(),
            },
        );
        Ok(written)
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct MemorySettings {
    #[serde(default)]
    directories: bool,
}

/// Factory handing out one shared [`MemoryProvider`]
#[derive(Debug, Default, Clone)]
pub struct MemoryFactory {
    provider: Arc<MemoryProvider>,
}

impl MemoryFactory {
    pub fn new(provider: Arc<MemoryProvider>) -> Self {
        Self { provider }
    }

    /// Build an empty store from a profile; `directories = true` makes it
    /// require explicit directory creation
    pub fn from_profile(profile: &ProviderProfile) -> Result<Self> {
        let settings: MemorySettings = profile.settings()?;
        let provider = if settings.directories {
            MemoryProvider::new().with_directories()
        } else {
            MemoryProvider::new()
        };
        Ok(Self::new(Arc::new(provider)))
    }

    /// The provider instance this factory hands out
    pub fn provider(&self) -> Arc<MemoryProvider> {
        Arc::clone(&self.provider)
    }
}

#[async_trait]
impl AdapterFactory for MemoryFactory {
    fn kind(&self) -> &str {
        "memory"
    }

    fn describe(&self) -> String {
        format!("in-memory ({} objects)", self.provider.len())
    }

    async fn create(&self) -> Result<Arc<dyn ProviderAdapter>> {
        Ok(self.provider.clone())
    }
}

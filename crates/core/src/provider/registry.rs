//! Provider registry
//!
//! Maps provider ids (the part before the colon in `google:/file`) to
//! factories. Adapters are instantiated lazily on first use and cached, so a
//! provider that is never touched never opens a connection.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::ProviderAdapter;
use crate::error::{Error, Result};

/// Builds adapters for one configured provider
///
/// Settings and credentials are captured at construction time; nothing is
/// read from ambient global state.
#[async_trait]
pub trait AdapterFactory: Send + Sync {
    /// Backend kind, e.g. "local" or "s3"
    fn kind(&self) -> &str;

    /// One-line description for listings (must not include secrets)
    fn describe(&self) -> String;

    /// Instantiate the adapter
    async fn create(&self) -> Result<Arc<dyn ProviderAdapter>>;
}

/// Factory wrapping an already constructed adapter
struct InstanceFactory {
    kind: String,
    adapter: Arc<dyn ProviderAdapter>,
}

#[async_trait]
impl AdapterFactory for InstanceFactory {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn describe(&self) -> String {
        format!("{} (pre-built)", self.kind)
    }

    async fn create(&self) -> Result<Arc<dyn ProviderAdapter>> {
        Ok(Arc::clone(&self.adapter))
    }
}

/// Registry of available providers
#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, Arc<dyn AdapterFactory>>,
    instances: Mutex<HashMap<String, Arc<dyn ProviderAdapter>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a provider id
    pub fn register(&mut self, provider_id: impl Into<String>, factory: Arc<dyn AdapterFactory>) {
        let provider_id = provider_id.into();
        self.instances.get_mut().remove(&provider_id);
        self.factories.insert(provider_id, factory);
    }

    /// Register an adapter instance directly
    pub fn register_adapter(
        &mut self,
        provider_id: impl Into<String>,
        kind: impl Into<String>,
        adapter: Arc<dyn ProviderAdapter>,
    ) {
        self.register(
            provider_id,
            Arc::new(InstanceFactory {
                kind: kind.into(),
                adapter,
            }),
        );
    }

    /// Check if a provider id is registered
    pub fn contains(&self, provider_id: &str) -> bool {
        self.factories.contains_key(provider_id)
    }

    /// All registered provider ids, sorted
    pub fn provider_ids(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Registered factories, sorted by provider id
    pub fn factories(&self) -> impl Iterator<Item = (&str, &dyn AdapterFactory)> {
        self.factories
            .iter()
            .map(|(id, factory)| (id.as_str(), factory.as_ref()))
    }

    /// Get the adapter for a provider id, creating it on first use
    pub async fn adapter(&self, provider_id: &str) -> Result<Arc<dyn ProviderAdapter>> {
        let factory = self.factories.get(provider_id).ok_or_else(|| {
            Error::InvalidReference(format!("Unknown provider '{provider_id}'"))
        })?;

        let mut instances = self.instances.lock().await;
        if let Some(adapter) = instances.get(provider_id) {
            return Ok(Arc::clone(adapter));
        }

        tracing::debug!(provider = provider_id, kind = factory.kind(), "creating adapter");
        let adapter = factory.create().await?;
        instances.insert(provider_id.to_string(), Arc::clone(&adapter));
        Ok(adapter)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.provider_ids())
            .finish()
    }
}

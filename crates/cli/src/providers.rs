//! Provider registry construction
//!
//! Turns the `[[providers]]` profiles of the loaded config into a registry of
//! adapter factories. Adapters themselves are created lazily on first use.

use std::sync::Arc;

use arc_core::{
    AdapterFactory, Config, Error, LocalFactory, MemoryFactory, ProviderProfile, ProviderRegistry,
    Result,
};
use arc_s3::S3Factory;

/// Provider id that always exists, rooted at `/`
pub const BUILTIN_LOCAL: &str = "local";

/// Provider kinds this binary knows how to build
pub const KINDS: &[&str] = &["local", "memory", "s3"];

/// Build the factory for one profile
pub fn factory_for(profile: &ProviderProfile) -> Result<Arc<dyn AdapterFactory>> {
    let factory: Arc<dyn AdapterFactory> = match profile.kind.as_str() {
        "local" => Arc::new(LocalFactory::from_profile(profile)?),
        "memory" => Arc::new(MemoryFactory::from_profile(profile)?),
        "s3" => Arc::new(S3Factory::from_profile(profile)?),
        other => {
            return Err(Error::Config(format!(
                "Provider '{}' has unknown kind '{other}'. Supported kinds: {}",
                profile.name,
                KINDS.join(", ")
            )));
        }
    };
    Ok(factory)
}

/// Registry with every configured provider plus the built-in `local`
pub fn build_registry(config: &Config) -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();

    for profile in &config.providers {
        registry.register(profile.name.clone(), factory_for(profile)?);
        tracing::debug!(name = %profile.name, kind = %profile.kind, "registered provider");
    }

    if !registry.contains(BUILTIN_LOCAL) {
        registry.register(BUILTIN_LOCAL, Arc::new(LocalFactory::new("/", false)));
    }

    Ok(registry)
}

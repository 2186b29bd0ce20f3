//! Location parsing and resolution
//!
//! Handles parsing of locations in the format: provider:path
//! (`google:/reports/q1.pdf`, `s3://bucket/key`, `local:/home/me/file.txt`).
//! The path part is provider-native and kept exactly as given.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::provider::ProviderRegistry;

/// A parsed location pointing into one provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocationRef {
    /// Registered provider id
    pub provider_id: String,
    /// Provider-native path
    pub path: String,
}

impl LocationRef {
    /// Create a new LocationRef without validation
    pub fn new(provider_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            path: path.into(),
        }
    }

    /// Whether the path ends with a slash (directory semantics)
    pub fn is_dir_like(&self) -> bool {
        self.path.ends_with('/')
    }

    /// Last path component, ignoring a trailing slash
    pub fn file_name(&self) -> Option<&str> {
        self.path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
    }

    /// Join a relative, forward-slash separated path onto this location
    pub fn join(&self, relative: &str) -> Self {
        let relative = relative.trim_start_matches('/');
        if relative.is_empty() {
            return self.clone();
        }
        let path = if self.path.ends_with('/') {
            format!("{}{relative}", self.path)
        } else {
            format!("{}/{relative}", self.path)
        };
        Self {
            provider_id: self.provider_id.clone(),
            path,
        }
    }

    /// Path of this location relative to `root`, if it lies underneath it
    ///
    /// Returns an empty string when both point to the same place.
    pub fn relative_to(&self, root: &LocationRef) -> Option<String> {
        if self.provider_id != root.provider_id {
            return None;
        }
        let base = root.path.trim_end_matches('/');
        let rest = self.path.strip_prefix(base)?;
        if rest.is_empty() {
            return Some(String::new());
        }
        // "/data/ab" must not count as lying under "/data/a"
        if !base.is_empty() && !rest.starts_with('/') {
            return None;
        }
        Some(rest.trim_start_matches('/').to_string())
    }
}

impl std::fmt::Display for LocationRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.provider_id, self.path)
    }
}

/// Parse `provider:path` syntax without consulting a registry
///
/// Surrounding whitespace is trimmed; nothing else is normalized.
pub fn parse_location(raw: &str) -> Result<LocationRef> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidReference("Location cannot be empty".into()));
    }

    let (provider_id, path) = trimmed.split_once(':').ok_or_else(|| {
        Error::InvalidReference(format!(
            "'{trimmed}' has no provider prefix. Use format: provider:/path"
        ))
    })?;

    if !is_valid_provider_id(provider_id) {
        return Err(Error::InvalidReference(format!(
            "'{provider_id}' is not a valid provider id"
        )));
    }

    if path.is_empty() {
        return Err(Error::InvalidReference(format!(
            "'{trimmed}' has an empty path. Use format: provider:/path"
        )));
    }

    Ok(LocationRef::new(provider_id, path))
}

/// Resolve a user-supplied location against the active provider registry
pub fn resolve(raw: &str, registry: &ProviderRegistry) -> Result<LocationRef> {
    let location = parse_location(raw)?;
    if !registry.contains(&location.provider_id) {
        return Err(Error::InvalidReference(format!(
            "Unknown provider '{}'. Known providers: {}",
            location.provider_id,
            registry.provider_ids().join(", ")
        )));
    }
    Ok(location)
}

/// Check if a string is a valid provider id
fn is_valid_provider_id(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

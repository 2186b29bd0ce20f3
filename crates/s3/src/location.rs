//! Bucket/key addressing
//!
//! `s3://bucket/key` parses (at the first colon) into the path
//! `//bucket/key`; `/bucket/key` and `bucket/key` are accepted as well.
//! Listing results keep the leading slashes of the location they came from,
//! so relative paths computed by the planner line up.

use arc_core::{Error, LocationRef, Result};

/// A location split into bucket and key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Path {
    lead: String,
    pub bucket: String,
    pub key: String,
}

impl S3Path {
    pub fn parse(location: &LocationRef) -> Result<Self> {
        let path = location.path.as_str();
        let rest = path.trim_start_matches('/');
        let lead = path[..path.len() - rest.len()].to_string();

        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(Error::InvalidReference(format!(
                "{location} has no bucket. Use format: {}://bucket/key",
                location.provider_id
            )));
        }

        Ok(Self {
            lead,
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    /// Whether this points at the bucket itself
    pub fn is_bucket(&self) -> bool {
        self.key.trim_matches('/').is_empty()
    }

    /// Key prefix selecting everything below this path
    pub fn prefix(&self) -> String {
        let key = self.key.trim_end_matches('/');
        if key.is_empty() {
            String::new()
        } else {
            format!("{key}/")
        }
    }

    /// Location of another key in the same bucket, in the caller's style
    pub fn location_of(&self, provider_id: &str, key: &str) -> LocationRef {
        LocationRef::new(provider_id, format!("{}{}/{key}", self.lead, self.bucket))
    }
}

impl std::fmt::Display for S3Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

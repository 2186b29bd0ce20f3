//! S3 provider implementation
//!
//! Wraps aws-sdk-s3 and implements the ProviderAdapter trait from arc-core.

use std::sync::Arc;

use arc_core::provider::{DescriptorStream, ObjectReader};
use arc_core::{
    AdapterFactory, Capabilities, Checksum, Error, ListOptions, LocationRef, ObjectDescriptor,
    ObjectSink, ProviderAdapter, ProviderProfile, Result,
};
use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use futures::{StreamExt, TryStreamExt, stream};
use serde::Deserialize;

use crate::location::S3Path;
use crate::multipart::{MultipartConfig, UploadSink};

/// Connection settings for one S3 provider
#[derive(Clone, Deserialize)]
pub struct S3Settings {
    /// Custom endpoint for S3-compatible services
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_region")]
    pub region: String,

    /// Static credentials; the default AWS chain is used when absent
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,

    /// "path", "dns" or "auto"
    #[serde(default = "default_bucket_lookup")]
    pub bucket_lookup: String,

    /// Multipart part size in bytes
    #[serde(default)]
    pub part_size: Option<u64>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_bucket_lookup() -> String {
    "auto".to_string()
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: default_region(),
            access_key: None,
            secret_key: None,
            bucket_lookup: default_bucket_lookup(),
            part_size: None,
        }
    }
}

impl std::fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Settings")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key", &self.access_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("bucket_lookup", &self.bucket_lookup)
            .field("part_size", &self.part_size)
            .finish()
    }
}

/// Storage provider backed by an S3-compatible service
pub struct S3Provider {
    inner: aws_sdk_s3::Client,
    multipart: MultipartConfig,
}

impl S3Provider {
    /// Create a new provider from explicit settings
    pub async fn new(settings: S3Settings) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(settings.region.clone()));

        match (&settings.access_key, &settings.secret_key) {
            (Some(access_key), Some(secret_key)) => {
                let credentials = aws_credential_types::Credentials::new(
                    access_key,
                    secret_key,
                    None, // session token
                    None, // expiry
                    "arc-static-credentials",
                );
                loader = loader.credentials_provider(credentials);
            }
            (None, None) => {}
            _ => {
                return Err(Error::Config(
                    "S3 access_key and secret_key must be set together".into(),
                ));
            }
        }

        if let Some(endpoint) = &settings.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let config = loader.load().await;

        // Path-style addressing keeps S3-compatible servers working
        let force_path_style = match settings.bucket_lookup.as_str() {
            "path" => true,
            "dns" => false,
            _ => settings.endpoint.is_some(),
        };
        let s3_config = aws_sdk_s3::config::Builder::from(&config)
            .force_path_style(force_path_style)
            .build();

        let multipart = match settings.part_size {
            Some(size) => MultipartConfig::new().part_size(size),
            None => MultipartConfig::default(),
        };

        Ok(Self {
            inner: aws_sdk_s3::Client::from_conf(s3_config),
            multipart,
        })
    }

    /// Whether any object lives below `prefix`
    async fn has_children(&self, path: &S3Path, location: &LocationRef) -> Result<bool> {
        let response = self
            .inner
            .list_objects_v2()
            .bucket(&path.bucket)
            .prefix(path.prefix())
            .max_keys(1)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, location))?;
        Ok(!response.contents().is_empty() || !response.common_prefixes().is_empty())
    }
}

/// One page of a listing: the entries plus the token for the next page
struct Page {
    entries: Vec<ObjectDescriptor>,
    next: Option<String>,
}

async fn list_page(
    client: aws_sdk_s3::Client,
    path: S3Path,
    location: LocationRef,
    recursive: bool,
    token: Option<String>,
) -> Result<Page> {
    let mut request = client
        .list_objects_v2()
        .bucket(&path.bucket)
        .prefix(path.prefix());
    if !recursive {
        request = request.delimiter("/");
    }
    if let Some(token) = token {
        request = request.continuation_token(token);
    }

    let response = request
        .send()
        .await
        .map_err(|e| map_sdk_error(e, &location))?;

    let mut entries = Vec::new();

    // Common prefixes (directories) only appear in delimited listings
    for prefix in response.common_prefixes() {
        if let Some(p) = prefix.prefix() {
            let child = path.location_of(&location.provider_id, p.trim_end_matches('/'));
            entries.push(ObjectDescriptor::directory(child));
        }
    }

    for object in response.contents() {
        let key = object.key().unwrap_or_default();
        // Zero-byte "folder" markers
        if key.ends_with('/') {
            continue;
        }
        let size = object.size().unwrap_or(0).max(0) as u64;
        let info = ObjectDescriptor::file(path.location_of(&location.provider_id, key), size)
            .with_checksum(object.e_tag().and_then(etag_checksum))
            .with_modified_time(object.last_modified().and_then(to_timestamp));
        entries.push(info);
    }

    let next = if response.is_truncated().unwrap_or(false) {
        response.next_continuation_token().map(str::to_string)
    } else {
        None
    };
    Ok(Page { entries, next })
}

#[async_trait]
impl ProviderAdapter for S3Provider {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            requires_directories: false,
            checksum_algorithm: Some("md5".to_string()),
        }
    }

    async fn list(
        &self,
        location: &LocationRef,
        options: ListOptions,
    ) -> Result<DescriptorStream> {
        let path = S3Path::parse(location)?;
        let client = self.inner.clone();
        let location = location.clone();
        let recursive = options.recursive;

        // State: Some(token) while pages remain, None once exhausted
        let pages = stream::try_unfold(Some(None), move |state: Option<Option<String>>| {
            let client = client.clone();
            let path = path.clone();
            let location = location.clone();
            async move {
                let Some(token) = state else {
                    return Ok::<_, Error>(None);
                };
                let page = list_page(client, path, location, recursive, token).await?;
                let next_state = page.next.map(Some);
                Ok(Some((page.entries, next_state)))
            }
        });

        let entries = pages
            .map_ok(|entries| stream::iter(entries.into_iter().map(Ok)))
            .try_flatten();
        Ok(entries.boxed())
    }

    async fn stat(&self, location: &LocationRef) -> Result<ObjectDescriptor> {
        let path = S3Path::parse(location)?;

        if path.is_bucket() {
            self.inner
                .head_bucket()
                .bucket(&path.bucket)
                .send()
                .await
                .map_err(|e| map_sdk_error(e, location))?;
            return Ok(ObjectDescriptor::directory(location.clone()));
        }

        if !path.key.ends_with('/') {
            match self
                .inner
                .head_object()
                .bucket(&path.bucket)
                .key(&path.key)
                .send()
                .await
            {
                Ok(response) => {
                    let size = response.content_length().unwrap_or(0).max(0) as u64;
                    return Ok(ObjectDescriptor::file(location.clone(), size)
                        .with_checksum(response.e_tag().and_then(etag_checksum))
                        .with_modified_time(response.last_modified().and_then(to_timestamp)));
                }
                Err(e) => match map_sdk_error(e, location) {
                    Error::NotFound(_) => {}
                    other => return Err(other),
                },
            }
        }

        // No object with this exact key: maybe a prefix
        if self.has_children(&path, location).await? {
            Ok(ObjectDescriptor::directory(location.clone()))
        } else {
            Err(Error::NotFound(location.to_string()))
        }
    }

    async fn open_read(&self, location: &LocationRef) -> Result<ObjectReader> {
        let path = S3Path::parse(location)?;
        if path.is_bucket() {
            return Err(Error::IsDirectory(location.to_string()));
        }

        let response = self
            .inner
            .get_object()
            .bucket(&path.bucket)
            .key(&path.key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, location))?;

        Ok(Box::new(Box::pin(response.body.into_async_read())))
    }

    async fn open_write(
        &self,
        location: &LocationRef,
        size_hint: Option<u64>,
    ) -> Result<Box<dyn ObjectSink>> {
        let path = S3Path::parse(location)?;
        if path.is_bucket() || path.key.ends_with('/') {
            return Err(Error::IsDirectory(location.to_string()));
        }

        let part_size = self.multipart.calculate_part_size(size_hint);
        Ok(Box::new(UploadSink::new(
            self.inner.clone(),
            location.clone(),
            path.bucket,
            path.key,
            part_size,
        )))
    }

    async fn delete(&self, location: &LocationRef) -> Result<()> {
        let path = S3Path::parse(location)?;
        self.inner
            .delete_object()
            .bucket(&path.bucket)
            .key(&path.key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, location))?;
        Ok(())
    }

    async fn ensure_directory(&self, _location: &LocationRef) -> Result<()> {
        // Flat namespace: prefixes exist implicitly
        Ok(())
    }
}

/// Factory building [`S3Provider`]s from a provider profile
#[derive(Debug, Clone)]
pub struct S3Factory {
    settings: S3Settings,
}

impl S3Factory {
    pub fn new(settings: S3Settings) -> Self {
        Self { settings }
    }

    /// Build from the `[[providers]]` entry of the config file
    pub fn from_profile(profile: &ProviderProfile) -> Result<Self> {
        Ok(Self::new(profile.settings()?))
    }

    pub fn settings(&self) -> &S3Settings {
        &self.settings
    }
}

#[async_trait]
impl AdapterFactory for S3Factory {
    fn kind(&self) -> &str {
        "s3"
    }

    fn describe(&self) -> String {
        let endpoint = self.settings.endpoint.as_deref().unwrap_or("aws");
        format!("s3 ({endpoint}, {})", self.settings.region)
    }

    async fn create(&self) -> Result<Arc<dyn ProviderAdapter>> {
        Ok(Arc::new(S3Provider::new(self.settings.clone()).await?))
    }
}

/// A plain (single-part) ETag is the MD5 of the object
fn etag_checksum(etag: &str) -> Option<Checksum> {
    let value = etag.trim_matches('"');
    let is_md5 = value.len() == 32 && value.chars().all(|c| c.is_ascii_hexdigit());
    is_md5.then(|| Checksum::md5(value))
}

fn to_timestamp(time: &aws_smithy_types::DateTime) -> Option<jiff::Timestamp> {
    jiff::Timestamp::from_second(time.secs()).ok()
}

/// Map an SDK failure onto the engine's error taxonomy
pub(crate) fn map_sdk_error<E>(err: SdkError<E, HttpResponse>, location: &LocationRef) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let code = err.code().map(str::to_string);
    classify(
        code.as_deref(),
        status,
        DisplayErrorContext(&err).to_string(),
        location,
    )
}

fn classify(code: Option<&str>, status: Option<u16>, detail: String, location: &LocationRef) -> Error {
    match (code, status) {
        (Some("NoSuchKey" | "NoSuchBucket" | "NotFound" | "NoSuchUpload"), _) | (_, Some(404)) => {
            Error::NotFound(location.to_string())
        }
        (
            Some(
                "AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch" | "AllAccessDisabled",
            ),
            _,
        )
        | (_, Some(401 | 403)) => Error::PermissionDenied(format!("{location}: {detail}")),
        (Some("EntityTooLarge" | "QuotaExceeded"), _) | (_, Some(507)) => {
            Error::QuotaExceeded(format!("{location}: {detail}"))
        }
        (Some("InvalidBucketName" | "InvalidArgument" | "KeyTooLongError"), _) => {
            Error::InvalidReference(format!("{location}: {detail}"))
        }
        _ => Error::Transient(format!("{location}: {detail}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> LocationRef {
        LocationRef::new("s3", "//bucket/key")
    }

    #[test]
    fn test_classify_not_found() {
        let err = classify(Some("NoSuchKey"), Some(404), "gone".into(), &loc());
        assert!(matches!(err, Error::NotFound(_)));

        // HEAD responses carry no error code
        let err = classify(None, Some(404), "gone".into(), &loc());
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_classify_permission() {
        let err = classify(Some("AccessDenied"), Some(403), "nope".into(), &loc());
        assert!(matches!(err, Error::PermissionDenied(_)));
    }

    #[test]
    fn test_classify_transient() {
        let err = classify(Some("SlowDown"), Some(503), "busy".into(), &loc());
        assert!(err.is_retryable());

        // Dispatch failures have neither code nor response
        let err = classify(None, None, "connection reset".into(), &loc());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_etag_checksum() {
        let md5 = etag_checksum("\"5d41402abc4b2a76b9719d911017c592\"").unwrap();
        assert_eq!(md5, Checksum::md5("5d41402abc4b2a76b9719d911017c592"));

        // Multipart ETags are not content hashes
        assert!(etag_checksum("\"5d41402abc4b2a76b9719d911017c592-3\"").is_none());
    }

    #[test]
    fn test_settings_from_profile() {
        let profile = ProviderProfile::new("minio", "s3")
            .with_option("endpoint", "http://localhost:9000")
            .with_option("access_key", "minioadmin")
            .with_option("secret_key", "minioadmin");

        let factory = S3Factory::from_profile(&profile).unwrap();
        assert_eq!(factory.settings().region, "us-east-1");
        assert_eq!(factory.settings().bucket_lookup, "auto");
        assert_eq!(factory.describe(), "s3 (http://localhost:9000, us-east-1)");

        let debug = format!("{:?}", factory.settings());
        assert!(debug.contains("<redacted>"));
        assert_eq!(debug.matches("minioadmin").count(), 1);
    }

    #[test]
    fn test_settings_reject_unknown_types() {
        let profile = ProviderProfile::new("bad", "s3").with_option("part_size", "big");
        assert!(matches!(
            S3Factory::from_profile(&profile),
            Err(Error::Config(_))
        ));
    }
}

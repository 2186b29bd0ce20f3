//! Streaming uploads
//!
//! Objects are written through a sink that buffers at most one part. Small
//! objects go out as a single `PutObject`; anything larger than one part
//! becomes a multipart upload that is aborted if the transfer fails.

use arc_core::{Error, LocationRef, ObjectSink, Result};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};

use crate::client::map_sdk_error;

/// Default part size: 16 MiB
pub const DEFAULT_PART_SIZE: u64 = 16 * 1024 * 1024;

/// Minimum part size: 5 MiB (S3 requirement)
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Maximum part size: 5 GiB
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Maximum number of parts: 10,000 (S3 limit)
pub const MAX_PARTS: usize = 10_000;

/// Multipart upload configuration
#[derive(Debug, Clone)]
pub struct MultipartConfig {
    /// Part size in bytes
    pub part_size: u64,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
        }
    }
}

impl MultipartConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn part_size(mut self, size: u64) -> Self {
        self.part_size = size.clamp(MIN_PART_SIZE, MAX_PART_SIZE);
        self
    }

    /// Calculate appropriate part size for an object of `size` bytes
    ///
    /// Unknown sizes use the configured part size.
    pub fn calculate_part_size(&self, size: Option<u64>) -> u64 {
        let Some(size) = size else {
            return self.part_size;
        };

        // If the object fits in one part, use minimum
        if size <= MIN_PART_SIZE {
            return MIN_PART_SIZE;
        }

        let parts = size.div_ceil(self.part_size);
        if parts <= MAX_PARTS as u64 {
            self.part_size
        } else {
            // Need larger parts to fit within 10,000 limit
            let required_size = size.div_ceil(MAX_PARTS as u64);
            required_size.clamp(MIN_PART_SIZE, MAX_PART_SIZE)
        }
    }
}

/// Calculate number of parts for an object
pub fn calculate_parts(size: u64, part_size: u64) -> usize {
    size.div_ceil(part_size) as usize
}

/// Sink that uploads an object part by part
pub struct UploadSink {
    client: aws_sdk_s3::Client,
    location: LocationRef,
    bucket: String,
    key: String,
    part_size: usize,
    buffer: Vec<u8>,
    upload_id: Option<String>,
    parts: Vec<CompletedPart>,
    written: u64,
}

impl UploadSink {
    pub(crate) fn new(
        client: aws_sdk_s3::Client,
        location: LocationRef,
        bucket: String,
        key: String,
        part_size: u64,
    ) -> Self {
        let part_size = usize::try_from(part_size).unwrap_or(usize::MAX);
        Self {
            client,
            location,
            bucket,
            key,
            part_size,
            buffer: Vec::new(),
            upload_id: None,
            parts: Vec::new(),
            written: 0,
        }
    }

    async fn upload_id(&mut self) -> Result<String> {
        if let Some(id) = &self.upload_id {
            return Ok(id.clone());
        }

        let response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &self.location))?;
        let id = response
            .upload_id()
            .ok_or_else(|| Error::General("S3 returned no upload id".into()))?
            .to_string();

        tracing::debug!(bucket = %self.bucket, key = %self.key, "started multipart upload");
        self.upload_id = Some(id.clone());
        Ok(id)
    }

    async fn upload_part(&mut self, data: Vec<u8>) -> Result<()> {
        let upload_id = self.upload_id().await?;
        let part_number = i32::try_from(self.parts.len() + 1)
            .map_err(|_| Error::QuotaExceeded("too many parts".into()))?;

        let response = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &self.location))?;

        self.parts.push(
            CompletedPart::builder()
                .part_number(part_number)
                .set_e_tag(response.e_tag().map(str::to_string))
                .build(),
        );
        Ok(())
    }
}

#[async_trait]
impl ObjectSink for UploadSink {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(chunk);
        self.written += chunk.len() as u64;

        while self.buffer.len() >= self.part_size {
            let rest = self.buffer.split_off(self.part_size);
            let part = std::mem::replace(&mut self.buffer, rest);
            self.upload_part(part).await?;
        }
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<u64> {
        let mut sink = *self;

        if sink.upload_id.is_none() {
            let body = std::mem::take(&mut sink.buffer);
            sink.client
                .put_object()
                .bucket(&sink.bucket)
                .key(&sink.key)
                .body(ByteStream::from(body))
                .send()
                .await
                .map_err(|e| map_sdk_error(e, &sink.location))?;
            return Ok(sink.written);
        }

        if !sink.buffer.is_empty() {
            let last = std::mem::take(&mut sink.buffer);
            sink.upload_part(last).await?;
        }

        let parts = std::mem::take(&mut sink.parts);
        let upload_id = sink.upload_id().await?;
        sink.client
            .complete_multipart_upload()
            .bucket(&sink.bucket)
            .key(&sink.key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &sink.location))?;

        tracing::debug!(
            bucket = %sink.bucket,
            key = %sink.key,
            bytes = sink.written,
            "completed multipart upload"
        );
        Ok(sink.written)
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        let Some(upload_id) = &self.upload_id else {
            return Ok(());
        };
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &self.location))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MultipartConfig::default();
        assert_eq!(config.part_size, DEFAULT_PART_SIZE);
    }

    #[test]
    fn test_part_size_clamping() {
        // Too small
        let config = MultipartConfig::new().part_size(1024);
        assert_eq!(config.part_size, MIN_PART_SIZE);

        // Too large
        let config = MultipartConfig::new().part_size(10 * 1024 * 1024 * 1024);
        assert_eq!(config.part_size, MAX_PART_SIZE);
    }

    #[test]
    fn test_calculate_part_size_small_object() {
        let config = MultipartConfig::default();
        assert_eq!(config.calculate_part_size(Some(1024 * 1024)), MIN_PART_SIZE);
    }

    #[test]
    fn test_calculate_part_size_unknown_size() {
        let config = MultipartConfig::default();
        assert_eq!(config.calculate_part_size(None), DEFAULT_PART_SIZE);
    }

    #[test]
    fn test_calculate_part_size_large_object() {
        let config = MultipartConfig::default();
        // Object that would need more than 10,000 parts with default size
        let huge = DEFAULT_PART_SIZE * 20_000;
        let size = config.calculate_part_size(Some(huge));
        assert!(calculate_parts(huge, size) <= MAX_PARTS);
    }

    #[test]
    fn test_calculate_parts() {
        assert_eq!(calculate_parts(100, 10), 10);
        assert_eq!(calculate_parts(101, 10), 11);
        assert_eq!(calculate_parts(99, 10), 10);
    }
}

//! arc-s3: S3 provider adapter for the arc CLI
//!
//! This crate implements the `ProviderAdapter` trait from arc-core using
//! the aws-sdk-s3 crate. It is the only crate that directly depends on the
//! AWS SDK.

pub mod client;
pub mod location;
pub mod multipart;

pub use client::{S3Factory, S3Provider, S3Settings};
pub use location::S3Path;

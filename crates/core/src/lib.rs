//! arc-core: Core library for the arc transfer tool
//!
//! This crate provides the provider-agnostic engine behind the arc CLI:
//! - Configuration management
//! - Location parsing and resolution
//! - The `ProviderAdapter` trait, a provider registry and the local and
//!   in-memory adapters
//! - Transfer planning, execution, verification and reporting
//! - Aggregated statistics over a location
//!
//! Concrete cloud adapters live in their own crates and plug in through
//! `AdapterFactory`, so the engine can be tested with mock adapters.

pub mod config;
pub mod error;
pub mod path;
pub mod provider;
pub mod stats;
pub mod transfer;

pub use config::{Config, ConfigManager, ProviderProfile, TransferConfig};
pub use error::{Error, FailureKind, Result};
pub use path::{LocationRef, parse_location, resolve};
pub use provider::{
    AdapterFactory, Capabilities, Checksum, DescriptorStream, ListOptions, LocalFactory,
    LocalProvider, MemoryFactory, MemoryProvider, ObjectDescriptor, ObjectReader, ObjectSink,
    ProviderAdapter, ProviderRegistry,
};
pub use stats::{LocationStats, collect_stats};
pub use transfer::{
    Executor, ExecutorOptions, MigrationReport, TaskKind, TaskStatus, TransferObserver,
    TransferTask, plan,
};

//! # strapi-transfer
//!
//! Streaming data-transfer engine that moves CMS content between a source
//! and a destination provider.
//!
//! This library provides:
//!
//! - **Staged transfers** of schemas, configuration, entities, links and media
//! - **Integrity checks** (version strategy, schema diff with user confirmation)
//! - **Providers** for tar archives (compressed, encrypted), local instances
//!   and remote instances over HTTP
//! - **Diagnostics and progress** as broadcast channels
//! - **Cooperative abort** that closes providers exactly once
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strapi_transfer::providers::{
//!     DirectoryStore, FileDestination, FileDestinationOptions, LocalSource,
//! };
//! use strapi_transfer::{TransferEngine, TransferEngineOptions};
//!
//! #[tokio::main]
//! async fn main() -> strapi_transfer::Result<()> {
//!     let source = LocalSource::new(Arc::new(DirectoryStore::new("./data")));
//!     let destination = FileDestination::new(FileDestinationOptions {
//!         path: "export".into(),
//!         compress: true,
//!         encrypt: false,
//!         encryption_key: None,
//!         jsonl_chunk_bytes: 256 * 1024 * 1024,
//!     });
//!     let mut engine = TransferEngine::new(
//!         Box::new(source),
//!         Box::new(destination),
//!         TransferEngineOptions::default(),
//!     )?;
//!     engine.bootstrap().await?;
//!     let results = engine.transfer().await?;
//!     println!("Transferred {} records", results.total_count());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod progress;
pub mod providers;
pub mod schema;
pub mod strategy;

// Re-exports for convenient access
pub use config::{Config, InstanceConfig, TransferConfig};
pub use core::{
    DestinationProvider, Provider, ProviderMetadata, SourceProvider, StageRecord, StageResult,
    TransferStage,
};
pub use diagnostics::{Diagnostic, DiagnosticKind, DiagnosticLogFile, DiagnosticsBus, Severity};
pub use engine::{
    EngineHandle, EngineStatus, SchemaStrategy, TransferEngine, TransferEngineOptions,
    TransferGroupFilter, TransferResults, VersionStrategy,
};
pub use error::{ErrorCode, Result, TransferError};
pub use progress::{ProgressEvent, ProgressStream};
pub use strategy::{ConflictStrategy, EntityScope, RestoreConfiguration};

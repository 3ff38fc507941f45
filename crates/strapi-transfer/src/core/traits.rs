//! Provider contract shared by every source and destination.
//!
//! - [`Provider`]: identity, lifecycle, metadata and schema snapshot
//! - [`SourceProvider`]: per-stage lazy record streams
//! - [`DestinationProvider`]: per-stage push-oriented writes
//!
//! The engine only ever talks to providers through these traits; connections,
//! file handles and HTTP clients stay private to each implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::mpsc;

use crate::diagnostics::WarningReporter;
use crate::error::Result;

use super::metadata::ProviderMetadata;
use super::record::{SchemaMap, StageRecord};
use super::stage::TransferStage;

/// Direction of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Source,
    Destination,
}

/// Lazy, finite, non-restartable sequence of records for one stage.
///
/// Producers run in a background task and block on a bounded channel, so the
/// engine awaiting each write is what paces the source.
pub type RecordStream = mpsc::Receiver<Result<StageRecord>>;

/// Channel capacity used by providers for their record streams.
pub const STREAM_BUFFER: usize = 16;

/// Create a bounded record channel.
pub fn record_channel() -> (mpsc::Sender<Result<StageRecord>>, RecordStream) {
    mpsc::channel(STREAM_BUFFER)
}

/// Output file of a file destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileResult {
    pub path: PathBuf,
}

/// Destination-specific information returned with the transfer results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DestinationResults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileResult>,
}

/// Capabilities common to sources and destinations.
#[async_trait]
pub trait Provider: Send {
    /// Stable identifier used in diagnostics.
    fn name(&self) -> &str;

    fn provider_type(&self) -> ProviderType;

    /// Acquire files, connections or sessions.
    ///
    /// Failures are reported by the engine as provider initialization errors
    /// and abort the transfer before any stage begins.
    async fn bootstrap(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release everything acquired in [`Provider::bootstrap`].
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Instance description used for the version check.
    async fn get_metadata(&mut self) -> Result<Option<ProviderMetadata>>;

    /// Schema snapshot used for the schema diff. `None` if unavailable.
    async fn get_schemas(&mut self) -> Result<Option<SchemaMap>>;

    /// Slot for mid-stream warnings. The engine fills it before bootstrap.
    fn set_warning_reporter(&mut self, _reporter: WarningReporter) {}
}

/// Produces records, one stream per stage.
#[async_trait]
pub trait SourceProvider: Provider {
    /// Open the stream for a stage. `None` if the source has no such data.
    async fn stream(&mut self, stage: TransferStage) -> Result<Option<RecordStream>>;
}

/// Consumes records pushed by the engine.
#[async_trait]
pub trait DestinationProvider: Provider {
    /// Receive the source description (file destinations embed it).
    fn set_source_metadata(&mut self, _metadata: Option<ProviderMetadata>) {}

    /// Prepare the destination once, after the integrity checks passed.
    async fn before_transfer(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called once after every selected stage finished. Never called for a
    /// failed or aborted transfer.
    async fn after_transfer(&mut self) -> Result<()> {
        Ok(())
    }

    /// Open the writer for a stage. Returns `false` if the destination does
    /// not accept this stage, in which case the engine skips it.
    async fn start_stage(&mut self, stage: TransferStage) -> Result<bool>;

    /// Write one record of the currently open stage.
    async fn write(&mut self, record: StageRecord) -> Result<()>;

    /// Flush and close the writer of a stage.
    async fn finish_stage(&mut self, stage: TransferStage) -> Result<()>;

    /// Destination-specific results (output file, ...).
    fn results(&self) -> DestinationResults {
        DestinationResults::default()
    }
}

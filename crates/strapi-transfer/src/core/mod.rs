//! Core data model and provider contract.

pub mod metadata;
pub mod record;
pub mod stage;
pub mod traits;

pub use metadata::{InstanceInfo, ProviderMetadata, Version};
pub use record::{
    Asset, AssetStats, ConfigurationItem, ConfigurationKind, Entity, Link, LinkSide, Schema,
    SchemaMap, StageRecord,
};
pub use stage::{Aggregate, StageResult, StageStatus, TransferStage};
pub use traits::{
    record_channel, DestinationProvider, DestinationResults, FileResult, Provider, ProviderType,
    RecordStream, SourceProvider, STREAM_BUFFER,
};

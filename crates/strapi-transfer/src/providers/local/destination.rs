//! Local instance destination.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::core::{
    DestinationProvider, Provider, ProviderMetadata, ProviderType, SchemaMap, StageRecord,
    TransferStage,
};
use crate::diagnostics::WarningReporter;
use crate::error::{Result, TransferError};
use crate::strategy::{ConflictStrategy, RestoreConfiguration};

use super::store::{ContentStore, EntityKey};
use super::PROVIDER_NAME;

/// Records buffered before they are appended to the store.
const WRITE_BATCH: usize = 64;

/// Options of a [`LocalDestination`].
#[derive(Debug, Clone, Default)]
pub struct LocalDestinationOptions {
    pub strategy: ConflictStrategy,

    /// What a restore deletes. Ignored by the additive strategy.
    pub restore: RestoreConfiguration,
}

pub struct LocalDestination {
    store: Arc<dyn ContentStore>,
    options: LocalDestinationOptions,
    reporter: Option<WarningReporter>,
    existing: HashSet<EntityKey>,
    pending: Vec<StageRecord>,
    open_stage: Option<TransferStage>,
    backup: Option<PathBuf>,
    bootstrapped: bool,
}

impl LocalDestination {
    pub fn new(store: Arc<dyn ContentStore>, options: LocalDestinationOptions) -> Self {
        Self {
            store,
            options,
            reporter: None,
            existing: HashSet::new(),
            pending: Vec::new(),
            open_stage: None,
            backup: None,
            bootstrapped: false,
        }
    }

    fn warn(&self, message: String) {
        if let Some(reporter) = &self.reporter {
            reporter.warn(message);
        }
    }

    async fn flush(&mut self, stage: TransferStage) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.store
            .append(stage, &self.pending)
            .await
            .map_err(|e| TransferError::stage_integrity(stage, e.to_string()))?;
        self.pending.clear();
        Ok(())
    }

    /// Reject an entity colliding with existing data.
    fn claim(&mut self, stage: TransferStage, record: &StageRecord) -> Result<()> {
        let StageRecord::Entity(entity) = record else {
            return Ok(());
        };
        let key = (entity.content_type.clone(), entity.id);
        if self.existing.contains(&key) {
            return Err(TransferError::transfer(
                stage,
                format!(
                    "entity {} #{} already exists on the destination",
                    entity.content_type, entity.id
                ),
            ));
        }
        self.existing.insert(key);
        Ok(())
    }
}

#[async_trait]
impl Provider for LocalDestination {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Destination
    }

    async fn bootstrap(&mut self) -> Result<()> {
        self.store
            .open(true)
            .await
            .map_err(|e| TransferError::provider_init(PROVIDER_NAME, e.to_string()))?;
        self.bootstrapped = true;
        info!(
            "Local instance opened as destination ({} strategy)",
            self.options.strategy
        );
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let Some(backup) = self.backup.take() else {
            return Ok(());
        };
        if self.open_stage.is_none() {
            self.store.remove_backup(&backup).await?;
            debug!("Removed assets backup {}", backup.display());
        } else {
            self.warn(format!(
                "Transfer did not complete, previous assets were kept in {}",
                backup.display()
            ));
        }
        Ok(())
    }

    async fn get_metadata(&mut self) -> Result<Option<ProviderMetadata>> {
        self.store.metadata().await
    }

    async fn get_schemas(&mut self) -> Result<Option<SchemaMap>> {
        self.store.schemas().await
    }

    fn set_warning_reporter(&mut self, reporter: WarningReporter) {
        self.reporter = Some(reporter);
    }
}

#[async_trait]
impl DestinationProvider for LocalDestination {
    async fn before_transfer(&mut self) -> Result<()> {
        if !self.bootstrapped {
            return Err(TransferError::provider_init(
                PROVIDER_NAME,
                "destination is not bootstrapped",
            ));
        }
        if self.options.strategy != ConflictStrategy::Restore {
            return Ok(());
        }

        let restore = &self.options.restore;
        let entities = self.store.delete_entities(&restore.entities).await?;
        let configuration = self.store.delete_configuration(&restore.configuration).await?;
        info!(
            "Restore: deleted {} entities and {} configuration items",
            entities, configuration
        );
        Ok(())
    }

    async fn start_stage(&mut self, stage: TransferStage) -> Result<bool> {
        match stage {
            TransferStage::Schemas => return Ok(false),
            TransferStage::Entities => {
                self.existing = self.store.entity_keys().await?;
            }
            TransferStage::Media
                if self.options.strategy == ConflictStrategy::Restore
                    && self.options.restore.assets
                    && self.backup.is_none() =>
            {
                self.backup = Some(self.store.backup_assets().await?);
            }
            _ => {}
        }
        self.open_stage = Some(stage);
        Ok(true)
    }

    async fn write(&mut self, record: StageRecord) -> Result<()> {
        let stage = record.stage();
        if self.open_stage != Some(stage) {
            return Err(TransferError::transfer(
                stage,
                "record received outside of its stage",
            ));
        }

        if let StageRecord::Asset(asset) = &record {
            return self
                .store
                .put_asset(asset)
                .await
                .map_err(|e| match e {
                    TransferError::StageIntegrity { .. } => e,
                    other => TransferError::stage_integrity(stage, other.to_string()),
                });
        }

        self.claim(stage, &record)?;
        self.pending.push(record);
        if self.pending.len() >= WRITE_BATCH {
            if let Err(e) = self.flush(stage).await {
                // The engine retries with the same record.
                if let Some(StageRecord::Entity(entity)) = self.pending.pop() {
                    self.existing.remove(&(entity.content_type, entity.id));
                }
                return Err(e);
            }
        }
        Ok(())
    }

    async fn finish_stage(&mut self, stage: TransferStage) -> Result<()> {
        self.flush(stage).await?;
        self.existing.clear();
        self.open_stage = None;
        Ok(())
    }
}

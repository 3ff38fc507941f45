//! Local instance source.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::core::{
    Provider, ProviderMetadata, ProviderType, RecordStream, SchemaMap, SourceProvider,
    TransferStage,
};
use crate::error::{Result, TransferError};

use super::store::ContentStore;
use super::PROVIDER_NAME;

pub struct LocalSource {
    store: Arc<dyn ContentStore>,
    bootstrapped: bool,
}

impl LocalSource {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self {
            store,
            bootstrapped: false,
        }
    }
}

#[async_trait]
impl Provider for LocalSource {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Source
    }

    async fn bootstrap(&mut self) -> Result<()> {
        self.store
            .open(false)
            .await
            .map_err(|e| TransferError::provider_init(PROVIDER_NAME, e.to_string()))?;
        self.bootstrapped = true;
        info!("Local instance opened as source");
        Ok(())
    }

    async fn get_metadata(&mut self) -> Result<Option<ProviderMetadata>> {
        self.store.metadata().await
    }

    async fn get_schemas(&mut self) -> Result<Option<SchemaMap>> {
        self.store.schemas().await
    }
}

#[async_trait]
impl SourceProvider for LocalSource {
    async fn stream(&mut self, stage: TransferStage) -> Result<Option<RecordStream>> {
        if !self.bootstrapped {
            return Err(TransferError::transfer(stage, "source is not bootstrapped"));
        }
        Ok(Some(self.store.stream(stage).await?))
    }
}

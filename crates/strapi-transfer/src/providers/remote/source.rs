//! Remote instance source (pull transfer).

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::{
    record_channel, Provider, ProviderMetadata, ProviderType, RecordStream, SchemaMap,
    SourceProvider, TransferStage,
};
use crate::diagnostics::WarningReporter;
use crate::error::{Result, TransferError};

use super::client::RemoteClient;
use super::protocol::{
    decode_record, Action, InitRequest, Message, PullBatch, StartReply, Step, TransferKind,
};
use super::{RemoteOptions, PROVIDER_NAME};

pub struct RemoteSource {
    options: RemoteOptions,
    client: Option<RemoteClient>,
    reporter: Option<WarningReporter>,
}

impl RemoteSource {
    pub fn new(options: RemoteOptions) -> Self {
        Self {
            options,
            client: None,
            reporter: None,
        }
    }

    fn client(&self) -> Result<&RemoteClient> {
        self.client.as_ref().ok_or_else(|| {
            TransferError::provider_init(PROVIDER_NAME, "remote source is not bootstrapped")
        })
    }
}

#[async_trait]
impl Provider for RemoteSource {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Source
    }

    async fn bootstrap(&mut self) -> Result<()> {
        if self.client.is_some() {
            return Ok(());
        }
        let mut client = self.options.client(TransferKind::Pull)?;
        client
            .init(&InitRequest {
                transfer: TransferKind::Pull,
                options: None,
            })
            .await?;
        client
            .send::<Value>(&Message::action(Action::Bootstrap))
            .await
            .map_err(|e| TransferError::provider_init(PROVIDER_NAME, e.to_string()))?;
        self.client = Some(client);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.send::<Value>(&Message::action(Action::End)).await {
                warn!("Could not end the remote transfer: {}", e);
            }
        }
        Ok(())
    }

    async fn get_metadata(&mut self) -> Result<Option<ProviderMetadata>> {
        self.client()?
            .send(&Message::action(Action::GetMetadata))
            .await
    }

    async fn get_schemas(&mut self) -> Result<Option<SchemaMap>> {
        self.client()?.send(&Message::action(Action::GetSchemas)).await
    }

    fn set_warning_reporter(&mut self, reporter: WarningReporter) {
        self.reporter = Some(reporter);
    }
}

#[async_trait]
impl SourceProvider for RemoteSource {
    async fn stream(&mut self, stage: TransferStage) -> Result<Option<RecordStream>> {
        let client = self.client()?.clone();
        let start: Option<StartReply> = client.send(&Message::step(Step::Start, stage)).await?;
        if start.is_some_and(|reply| !reply.accepted) {
            if let Some(reporter) = &self.reporter {
                reporter.info(format!("Remote source has no {} to send", stage));
            }
            return Ok(None);
        }

        let (tx, rx) = record_channel();
        tokio::spawn(async move {
            let mut cursor = 0;
            'pull: loop {
                let batch = match client.send::<PullBatch>(&Message::pull(stage, cursor)).await {
                    Ok(batch) => batch.unwrap_or(PullBatch {
                        records: Vec::new(),
                        next: None,
                    }),
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                };
                debug!("Pulled {} {} records", batch.records.len(), stage);
                for value in batch.records {
                    let record = decode_record(stage, value);
                    let failed = record.is_err();
                    if tx.send(record).await.is_err() || failed {
                        return;
                    }
                }
                match batch.next {
                    Some(next) => cursor = next,
                    None => break 'pull,
                }
            }
            if let Err(e) = client.send::<Value>(&Message::step(Step::End, stage)).await {
                let _ = tx.send(Err(e)).await;
            }
        });
        Ok(Some(rx))
    }
}

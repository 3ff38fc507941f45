//! Remote instance destination (push transfer).

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::{
    DestinationProvider, Provider, ProviderMetadata, ProviderType, SchemaMap, StageRecord,
    TransferStage,
};
use crate::diagnostics::WarningReporter;
use crate::error::{Result, TransferError};
use crate::strategy::{ConflictStrategy, RestoreConfiguration};

use super::client::RemoteClient;
use super::protocol::{
    encode_record, Action, InitRequest, Message, MessageBody, PushOptions, StartReply, Step,
    TransferKind,
};
use super::{RemoteOptions, PROVIDER_NAME};

/// Records waiting to be pushed.
#[derive(Default)]
struct Batch {
    records: Vec<Value>,
    bytes: usize,
}

pub struct RemoteDestination {
    options: RemoteOptions,
    push: PushOptions,
    client: Option<RemoteClient>,
    batch: Batch,
    /// Last stream message that failed. Resent with the same uuid while the
    /// batch is unchanged, so the remote side can drop a replay it already
    /// applied.
    pending: Option<Message>,
    reporter: Option<WarningReporter>,
}

fn replays(message: &Message, stage: TransferStage, records: &[Value]) -> bool {
    matches!(
        &message.body,
        MessageBody::Transfer { step: Step::Stream, stage: s, data: Some(data), .. }
            if *s == stage && data.as_slice() == records
    )
}

impl RemoteDestination {
    pub fn new(
        options: RemoteOptions,
        strategy: ConflictStrategy,
        restore: RestoreConfiguration,
    ) -> Self {
        Self {
            options,
            push: PushOptions { strategy, restore },
            client: None,
            batch: Batch::default(),
            pending: None,
            reporter: None,
        }
    }

    fn client(&self) -> Result<&RemoteClient> {
        self.client.as_ref().ok_or_else(|| {
            TransferError::provider_init(PROVIDER_NAME, "remote destination is not bootstrapped")
        })
    }

    async fn flush(&mut self, stage: TransferStage) -> Result<()> {
        if self.batch.records.is_empty() {
            return Ok(());
        }
        let message = match self.pending.take() {
            Some(message) if replays(&message, stage, &self.batch.records) => message,
            _ => Message::stream(stage, self.batch.records.clone()),
        };
        if let Err(e) = self.client()?.send::<Value>(&message).await {
            self.pending = Some(message);
            return Err(e);
        }
        debug!(
            "Pushed {} {} records ({} bytes)",
            self.batch.records.len(),
            stage,
            self.batch.bytes
        );
        self.batch = Batch::default();
        Ok(())
    }
}

#[async_trait]
impl Provider for RemoteDestination {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Destination
    }

    async fn bootstrap(&mut self) -> Result<()> {
        if self.client.is_some() {
            return Ok(());
        }
        let mut client = self.options.client(TransferKind::Push)?;
        client
            .init(&InitRequest {
                transfer: TransferKind::Push,
                options: Some(self.push.clone()),
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
                if let Some(reporter) = &self.reporter {
                    reporter.warn(format!("Could not end the remote transfer: {}", e));
                }
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
impl DestinationProvider for RemoteDestination {
    async fn before_transfer(&mut self) -> Result<()> {
        self.client()?
            .send::<Value>(&Message::action(Action::BeforeTransfer))
            .await?;
        Ok(())
    }

    async fn start_stage(&mut self, stage: TransferStage) -> Result<bool> {
        self.batch = Batch::default();
        self.pending = None;
        let reply: Option<StartReply> = self
            .client()?
            .send(&Message::step(Step::Start, stage))
            .await?;
        Ok(reply.map_or(true, |r| r.accepted))
    }

    async fn write(&mut self, record: StageRecord) -> Result<()> {
        let stage = record.stage();
        let value = encode_record(&record)?;
        let size = serde_json::to_vec(&value)?.len();

        self.batch.records.push(value);
        self.batch.bytes += size;
        if self.batch.bytes >= self.options.batch_bytes {
            if let Err(e) = self.flush(stage).await {
                // The engine retries with the same record.
                self.batch.records.pop();
                self.batch.bytes -= size;
                return Err(e);
            }
        }
        Ok(())
    }

    async fn finish_stage(&mut self, stage: TransferStage) -> Result<()> {
        self.flush(stage).await?;
        self.client()?
            .send::<Value>(&Message::step(Step::End, stage))
            .await?;
        Ok(())
    }
}

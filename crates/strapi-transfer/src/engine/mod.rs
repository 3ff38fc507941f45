//! Transfer engine - drives one source into one destination.
//!
//! The engine runs in two phases:
//!
//! 1. [`TransferEngine::bootstrap`]: option validation, provider bootstrap,
//!    version check and schema diff resolution.
//! 2. [`TransferEngine::transfer`]: the selected stages in fixed order, each
//!    streaming records from the source through the transforms into the
//!    destination, one record at a time.
//!
//! Progress and diagnostics are published on broadcast channels; the engine
//! never waits for subscribers. Abort is cooperative and takes effect between
//! records.

mod filters;
mod handlers;
mod integrity;
mod options;
mod transforms;

pub use filters::{selected_stages, should_skip_stage};
pub use handlers::{
    AbortHandle, EngineHandle, ErrorContext, ErrorHandler, SchemaDiffContext, SchemaDiffHandler,
};
pub use integrity::check_versions;
pub use options::{
    validate_filters, SchemaStrategy, TransferEngineOptions, TransferGroupFilter, VersionStrategy,
};
pub use transforms::{TransformStep, Transforms, DEFAULT_IGNORED_CONTENT_TYPES};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::core::{
    DestinationProvider, DestinationResults, RecordStream, SourceProvider, StageRecord,
    StageResult, StageStatus, TransferStage,
};
use crate::diagnostics::{Diagnostic, DiagnosticsBus, Severity};
use crate::error::{ErrorCode, Result, TransferError};
use crate::progress::{ProgressEvent, ProgressStream};
use crate::schema::{compute_diffs, unresolved};

/// Base delay between write retries. Linear backoff: delay * attempt.
const RETRY_DELAY_MS: u64 = 50;

/// Lifecycle of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    Idle,
    Bootstrapped,
    Running,
    Finished,
    Failed,
    Aborted,
}

/// Aggregated outcome of a transfer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TransferResults {
    /// Per-stage counters.
    pub engine: BTreeMap<TransferStage, StageResult>,

    /// Destination-specific results (output file, ...).
    pub destination: DestinationResults,
}

impl TransferResults {
    pub fn total_count(&self) -> u64 {
        self.engine.values().map(|r| r.count).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.engine.values().map(|r| r.bytes).sum()
    }
}

/// How a stage ended without error.
enum StageOutcome {
    Completed,
    /// A recoverable condition was ignored by the error handlers.
    Ignored,
}

/// Transfer engine.
pub struct TransferEngine {
    source: Box<dyn SourceProvider>,
    destination: Box<dyn DestinationProvider>,
    options: TransferEngineOptions,
    diagnostics: DiagnosticsBus,
    progress: ProgressStream,
    abort: AbortHandle,
    schema_diff_handlers: Vec<Arc<dyn SchemaDiffHandler>>,
    error_handlers: HashMap<ErrorCode, Vec<Arc<dyn ErrorHandler>>>,
    status: EngineStatus,
    results: BTreeMap<TransferStage, StageResult>,
    closed: bool,
}

impl TransferEngine {
    /// Create an engine. Fails before touching either provider if the
    /// options are invalid.
    pub fn new(
        source: Box<dyn SourceProvider>,
        destination: Box<dyn DestinationProvider>,
        options: TransferEngineOptions,
    ) -> Result<Self> {
        options.validate()?;

        Ok(Self {
            source,
            destination,
            options,
            diagnostics: DiagnosticsBus::new(),
            progress: ProgressStream::new(),
            abort: AbortHandle::new(),
            schema_diff_handlers: Vec::new(),
            error_handlers: HashMap::new(),
            status: EngineStatus::Idle,
            results: BTreeMap::new(),
            closed: false,
        })
    }

    pub fn options(&self) -> &TransferEngineOptions {
        &self.options
    }

    pub fn status(&self) -> EngineStatus {
        self.status
    }

    pub fn diagnostics(&self) -> &DiagnosticsBus {
        &self.diagnostics
    }

    pub fn subscribe_diagnostics(&self) -> broadcast::Receiver<Diagnostic> {
        self.diagnostics.subscribe()
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    /// Handle for handlers, signal listeners and prompts.
    pub fn handle(&self) -> EngineHandle {
        EngineHandle::new(self.diagnostics.clone(), self.abort.clone())
    }

    /// Abort trigger usable while [`TransferEngine::transfer`] is running.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn add_schema_diff_handler(&mut self, handler: impl SchemaDiffHandler + 'static) {
        self.schema_diff_handlers.push(Arc::new(handler));
    }

    pub fn add_error_handler(&mut self, code: ErrorCode, handler: impl ErrorHandler + 'static) {
        self.error_handlers
            .entry(code)
            .or_default()
            .push(Arc::new(handler));
    }

    pub fn report_warning(&self, message: impl Into<String>, origin: Option<&str>) {
        self.diagnostics.warning(message, origin);
    }

    pub fn report_info(&self, message: impl Into<String>, origin: Option<&str>) {
        self.diagnostics.info(message, origin);
    }

    /// Publish a fatal diagnostic and return the error for the caller to raise.
    pub fn panic(&self, error: TransferError) -> TransferError {
        self.handle().panic(error)
    }

    /// Results accumulated so far, also available after a failure.
    pub fn results(&self) -> TransferResults {
        TransferResults {
            engine: self.results.clone(),
            destination: self.destination.results(),
        }
    }

    /// Abort the transfer and release the providers.
    ///
    /// Safe to call more than once; only the first call has an effect. A
    /// concurrent `transfer()` should be aborted through
    /// [`TransferEngine::abort_handle`] instead, it closes the providers itself.
    pub async fn abort_transfer(&mut self) {
        if !self.abort.abort() {
            debug!("Abort already requested");
            return;
        }
        info!("Aborting transfer");
        if self.status != EngineStatus::Finished {
            self.status = EngineStatus::Aborted;
        }
        self.close_providers().await;
    }

    /// Bootstrap providers and run the integrity checks. Idempotent.
    pub async fn bootstrap(&mut self) -> Result<()> {
        match self.status {
            EngineStatus::Idle => {}
            EngineStatus::Bootstrapped => return Ok(()),
            EngineStatus::Aborted => return Err(TransferError::Aborted),
            other => {
                return Err(TransferError::Validation(format!(
                    "engine cannot be bootstrapped in state {:?}",
                    other
                )))
            }
        }

        match self.run_bootstrap().await {
            Ok(()) => {
                self.status = EngineStatus::Bootstrapped;
                Ok(())
            }
            Err(e) => {
                self.fail(&e);
                self.close_providers().await;
                Err(e)
            }
        }
    }

    async fn run_bootstrap(&mut self) -> Result<()> {
        self.options.validate()?;
        if self.abort.is_aborted() {
            return Err(TransferError::Aborted);
        }

        let source_origin = format!("source::{}", self.source.name());
        let destination_origin = format!("destination::{}", self.destination.name());
        self.source
            .set_warning_reporter(self.diagnostics.reporter(source_origin));
        self.destination
            .set_warning_reporter(self.diagnostics.reporter(destination_origin));

        info!(
            "Bootstrapping providers: {} -> {}",
            self.source.name(),
            self.destination.name()
        );
        let source_name = self.source.name().to_string();
        self.source
            .bootstrap()
            .await
            .map_err(|e| initialization_error(&source_name, e))?;
        let destination_name = self.destination.name().to_string();
        self.destination
            .bootstrap()
            .await
            .map_err(|e| initialization_error(&destination_name, e))?;

        let source_metadata = self.source.get_metadata().await?;
        let destination_metadata = self.destination.get_metadata().await?;
        self.destination
            .set_source_metadata(source_metadata.clone());

        check_versions(
            self.options.version_strategy,
            source_metadata.as_ref(),
            destination_metadata.as_ref(),
            &self.handle(),
        )?;

        self.check_schemas().await
    }

    async fn check_schemas(&mut self) -> Result<()> {
        if self.options.schema_strategy == SchemaStrategy::Ignore {
            return Ok(());
        }

        let source = self.source.get_schemas().await?;
        let destination = self.destination.get_schemas().await?;
        let (Some(source), Some(destination)) = (source, destination) else {
            self.report_warning(
                "Schemas are not available on both sides, skipping the schema check",
                Some("Schema Integrity"),
            );
            return Ok(());
        };

        let diffs = compute_diffs(&source, &destination, self.options.schema_strategy);
        if diffs.is_empty() {
            debug!("Schemas match");
            return Ok(());
        }

        info!("Found schema differences in {} content types", diffs.len());
        if self.schema_diff_handlers.is_empty() {
            return Err(self.panic(TransferError::Integrity(format!(
                "Schema differences found in {} and no handler can resolve them",
                diffs.keys().cloned().collect::<Vec<_>>().join(", ")
            ))));
        }

        let mut context = SchemaDiffContext {
            diffs,
            ignored_diffs: Default::default(),
        };
        let handle = self.handle();
        for handler in self.schema_diff_handlers.clone() {
            handler.handle(&mut context, &handle).await?;
        }

        let remaining = unresolved(&context.diffs, &context.ignored_diffs);
        if !remaining.is_empty() {
            return Err(TransferError::Integrity(format!(
                "Unresolved schema differences in {}",
                remaining.keys().cloned().collect::<Vec<_>>().join(", ")
            )));
        }
        Ok(())
    }

    /// Run the whole transfer. Bootstraps first if needed.
    pub async fn transfer(&mut self) -> Result<TransferResults> {
        self.progress.emit(ProgressEvent::TransferInit);

        if let Err(e) = self.bootstrap().await {
            self.emit_failure(&e);
            return Err(e);
        }

        self.status = EngineStatus::Running;
        let outcome = match self.run_stages().await {
            Ok(()) => self.close_providers_checked().await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                self.status = EngineStatus::Finished;
                let results = self.results();
                info!(
                    "Transfer finished: {} records, {} bytes",
                    results.total_count(),
                    results.total_bytes()
                );
                self.progress.emit(ProgressEvent::TransferFinish {
                    results: results.clone(),
                });
                Ok(results)
            }
            Err(e) => {
                self.fail(&e);
                self.emit_failure(&e);
                self.close_providers().await;
                Err(e)
            }
        }
    }

    async fn run_stages(&mut self) -> Result<()> {
        self.progress.emit(ProgressEvent::TransferStart);
        self.destination.before_transfer().await?;

        for stage in selected_stages(&self.options.exclude, &self.options.only) {
            if self.abort.is_aborted() {
                return Err(TransferError::Aborted);
            }
            self.transfer_stage(stage).await?;
        }
        self.destination.after_transfer().await
    }

    async fn transfer_stage(&mut self, stage: TransferStage) -> Result<()> {
        let Some(stream) = self.source.stream(stage).await? else {
            debug!("Source has no {} stream", stage);
            self.skip_stage(stage);
            return Ok(());
        };

        match self.destination.start_stage(stage).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("Destination does not accept {}", stage);
                self.skip_stage(stage);
                return Ok(());
            }
            Err(e) => {
                self.resolve_recoverable(stage, e).await?;
                self.skip_stage(stage);
                return Ok(());
            }
        }

        info!("Stage {} started", stage);
        let mut result = StageResult::default();
        result.mark_running();
        self.results.insert(stage, result.clone());
        self.progress.emit(ProgressEvent::StageStart {
            stage,
            data: result.clone(),
        });

        let outcome = match self.pump(stage, stream, &mut result).await {
            Ok(outcome) => self.destination.finish_stage(stage).await.map(|_| outcome),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(outcome) => {
                result.mark(StageStatus::Finished);
                if matches!(outcome, StageOutcome::Ignored) {
                    debug!("Stage {} ended early", stage);
                }
                info!(
                    "Stage {} finished: {} records, {} bytes",
                    stage, result.count, result.bytes
                );
                self.results.insert(stage, result.clone());
                self.progress.emit(ProgressEvent::StageFinish {
                    stage,
                    data: result,
                });
                Ok(())
            }
            Err(e) => {
                result.mark(StageStatus::Error);
                self.results.insert(stage, result);
                let e = escalate(stage, e);
                if !matches!(e, TransferError::Aborted) {
                    error!("Stage {} failed: {}", stage, e);
                    self.progress.emit(ProgressEvent::StageError {
                        stage,
                        error: e.to_string(),
                    });
                }
                Err(e)
            }
        }
    }

    /// Move records from `stream` into the destination until the stream ends.
    async fn pump(
        &mut self,
        stage: TransferStage,
        mut stream: RecordStream,
        result: &mut StageResult,
    ) -> Result<StageOutcome> {
        let cancel = self.abort.token();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransferError::Aborted),
                next = stream.recv() => next,
            };
            let Some(record) = next else {
                return Ok(StageOutcome::Completed);
            };
            let record = record?;

            if record.stage() != stage {
                return Err(TransferError::transfer(
                    stage,
                    format!("source produced a {} record", record.stage()),
                ));
            }

            let Some(record) = self.options.transforms.apply(record) else {
                continue;
            };
            let size = record.size();
            let key = record.aggregate_key();

            if let Err(e) = self.write_with_retry(stage, record).await {
                self.resolve_recoverable(stage, e).await?;
                return Ok(StageOutcome::Ignored);
            }

            result.record(size, key.as_deref());
            self.results.insert(stage, result.clone());
            self.progress.emit(ProgressEvent::StageProgress {
                stage,
                data: result.clone(),
            });

            if let Some(delay) = self.options.throttle {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(TransferError::Aborted),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    async fn write_with_retry(&mut self, stage: TransferStage, record: StageRecord) -> Result<()> {
        let mut retries = 0;
        loop {
            if self.abort.is_aborted() {
                return Err(TransferError::Aborted);
            }
            match self.destination.write(record.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && retries < self.options.max_retries => {
                    retries += 1;
                    warn!(
                        "Write failed in stage {}, retry {}/{}: {}",
                        stage, retries, self.options.max_retries, e
                    );
                    tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS * retries as u64))
                        .await;
                }
                Err(e) if e.is_retryable() => {
                    return Err(TransferError::transfer(
                        stage,
                        format!("{} (gave up after {} retries)", e, retries),
                    ));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run the error handlers registered for a recoverable error.
    ///
    /// Returns `Ok` if the handlers chose to ignore it, and the original error
    /// otherwise.
    async fn resolve_recoverable(&mut self, stage: TransferStage, err: TransferError) -> Result<()> {
        let Some(code) = err.code() else {
            return Err(err);
        };
        let handlers = self.error_handlers.get(&code).cloned().unwrap_or_default();
        if handlers.is_empty() {
            return Err(err);
        }

        let mut context = ErrorContext {
            code,
            error: err.to_string(),
            stage: Some(stage),
            ignore: false,
        };
        let handle = self.handle();
        for handler in handlers {
            handler.handle(&mut context, &handle).await?;
        }

        if context.ignore {
            self.report_warning(
                format!("Ignoring {} in stage {}: {}", code, stage, context.error),
                Some("engine"),
            );
            return Ok(());
        }
        Err(err)
    }

    fn skip_stage(&mut self, stage: TransferStage) {
        let mut result = StageResult::default();
        result.mark(StageStatus::Skipped);
        self.results.insert(stage, result);
        self.progress.emit(ProgressEvent::StageSkip { stage });
    }

    fn fail(&mut self, err: &TransferError) {
        if matches!(err, TransferError::Aborted) || self.abort.is_aborted() {
            self.status = EngineStatus::Aborted;
        } else {
            self.status = EngineStatus::Failed;
            self.diagnostics
                .error(err.to_string(), Severity::Fatal, Some("engine"));
        }
    }

    fn emit_failure(&self, err: &TransferError) {
        if self.status == EngineStatus::Aborted {
            self.progress.emit(ProgressEvent::TransferAbort);
        } else {
            self.progress.emit(ProgressEvent::TransferError {
                error: err.to_string(),
            });
        }
    }

    /// Close both providers, failing on the first error. Runs at most once.
    async fn close_providers_checked(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let destination = self.destination.close().await;
        let source = self.source.close().await;
        destination.and(source)
    }

    /// Close both providers, logging errors. Runs at most once.
    async fn close_providers(&mut self) {
        if let Err(e) = self.close_providers_checked().await {
            warn!("Failed to close providers: {}", e);
        }
    }
}

fn initialization_error(provider: &str, err: TransferError) -> TransferError {
    match err {
        TransferError::ProviderInitialization { .. } | TransferError::Aborted => err,
        other => TransferError::provider_init(provider, other.to_string()),
    }
}

/// Anything that ends a stage other than an abort surfaces as a transfer error.
fn escalate(stage: TransferStage, err: TransferError) -> TransferError {
    match err {
        TransferError::Aborted | TransferError::Transfer { .. } => err,
        other => TransferError::transfer(stage, other.to_string()),
    }
}

#[cfg(test)]
mod tests;

//! Handler contracts and the engine handle passed to them.
//!
//! Handlers never reach into globals: each call receives its context and an
//! [`EngineHandle`] for reporting diagnostics, panicking or aborting. Handlers
//! registered for the same hook run in registration order; returning `Ok`
//! continues with the next one, returning `Err` stops the chain and fails the
//! transfer.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::core::TransferStage;
use crate::diagnostics::{DiagnosticsBus, Severity};
use crate::error::{ErrorCode, Result, TransferError};
use crate::schema::{DiffReporter, SchemaDiffs};

/// Context of the schema diff hook.
#[derive(Debug, Clone, Default)]
pub struct SchemaDiffContext {
    /// Differences found between source and destination.
    pub diffs: SchemaDiffs,

    /// Differences accepted so far. Every diff must end up here for the
    /// transfer to proceed.
    pub ignored_diffs: SchemaDiffs,
}

/// Context of a recoverable error hook.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub code: ErrorCode,

    /// Human-readable description of the failure.
    pub error: String,

    /// Stage during which the condition occurred.
    pub stage: Option<TransferStage>,

    /// Set to `true` to skip the rest of the stage and continue the transfer.
    pub ignore: bool,
}

#[async_trait]
pub trait SchemaDiffHandler: Send + Sync {
    async fn handle(&self, context: &mut SchemaDiffContext, engine: &EngineHandle) -> Result<()>;
}

#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn handle(&self, context: &mut ErrorContext, engine: &EngineHandle) -> Result<()>;
}

/// Cancellation shared between the engine, signal handlers and prompts.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    token: CancellationToken,
    aborted: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the abort. Returns `true` only for the call that flipped the
    /// state; later calls are no-ops.
    pub fn abort(&self) -> bool {
        let first = !self.aborted.swap(true, Ordering::SeqCst);
        if first {
            self.token.cancel();
        }
        first
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Token cancelled once the abort is requested.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

/// What handlers get to act on the running engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    diagnostics: DiagnosticsBus,
    abort: AbortHandle,
}

impl EngineHandle {
    pub fn new(diagnostics: DiagnosticsBus, abort: AbortHandle) -> Self {
        Self { diagnostics, abort }
    }

    pub fn report_warning(&self, message: impl Into<String>, origin: Option<&str>) {
        self.diagnostics.warning(message, origin);
    }

    pub fn report_info(&self, message: impl Into<String>, origin: Option<&str>) {
        self.diagnostics.info(message, origin);
    }

    /// Publish `error` as a fatal diagnostic and hand it back for the caller
    /// to return.
    pub fn panic(&self, error: TransferError) -> TransferError {
        self.diagnostics
            .error(error.to_string(), Severity::Fatal, Some("engine"));
        error
    }

    /// Request the abort of the running transfer.
    pub fn abort(&self) -> bool {
        self.abort.abort()
    }

    pub fn abort_handle(&self) -> &AbortHandle {
        &self.abort
    }

    pub fn diagnostics(&self) -> &DiagnosticsBus {
        &self.diagnostics
    }
}

impl DiffReporter for EngineHandle {
    fn warn(&self, message: &str) {
        self.report_warning(message, Some("Schema Integrity"));
    }

    fn panic(&self, error: TransferError) -> TransferError {
        EngineHandle::panic(self, error)
    }
}

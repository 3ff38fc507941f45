//! Progress stream.
//!
//! Typed lifecycle events for the transfer and each stage. Like the
//! diagnostics bus, any number of subscribers can listen and the engine never
//! waits for them.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::core::{StageResult, TransferStage};
use crate::engine::TransferResults;

/// Buffered events per subscriber.
pub const PROGRESS_BUFFER: usize = 4096;

/// One progress event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    TransferInit,
    TransferStart,
    StageStart {
        stage: TransferStage,
        data: StageResult,
    },
    StageProgress {
        stage: TransferStage,
        data: StageResult,
    },
    StageFinish {
        stage: TransferStage,
        data: StageResult,
    },
    StageSkip {
        stage: TransferStage,
    },
    StageError {
        stage: TransferStage,
        error: String,
    },
    TransferFinish {
        results: TransferResults,
    },
    TransferError {
        error: String,
    },
    TransferAbort,
}

impl ProgressEvent {
    /// Namespaced event name (`stage::start`, `transfer::finish`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            ProgressEvent::TransferInit => "transfer::init",
            ProgressEvent::TransferStart => "transfer::start",
            ProgressEvent::StageStart { .. } => "stage::start",
            ProgressEvent::StageProgress { .. } => "stage::progress",
            ProgressEvent::StageFinish { .. } => "stage::finish",
            ProgressEvent::StageSkip { .. } => "stage::skip",
            ProgressEvent::StageError { .. } => "stage::error",
            ProgressEvent::TransferFinish { .. } => "transfer::finish",
            ProgressEvent::TransferError { .. } => "transfer::error",
            ProgressEvent::TransferAbort => "transfer::abort",
        }
    }

    /// Stage the event refers to, if any.
    pub fn stage(&self) -> Option<TransferStage> {
        match self {
            ProgressEvent::StageStart { stage, .. }
            | ProgressEvent::StageProgress { stage, .. }
            | ProgressEvent::StageFinish { stage, .. }
            | ProgressEvent::StageSkip { stage }
            | ProgressEvent::StageError { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Publishing side of the progress channel.
#[derive(Debug, Clone)]
pub struct ProgressStream {
    tx: broadcast::Sender<ProgressEvent>,
}

impl Default for ProgressStream {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressStream {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(PROGRESS_BUFFER);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

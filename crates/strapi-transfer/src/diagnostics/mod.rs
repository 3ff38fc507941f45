//! Diagnostics bus.
//!
//! Providers, the engine and handlers publish structured `info` / `warning` /
//! `error` records here. Any number of subscribers (console, log file) can
//! listen; publishing never waits for them. A subscriber that falls behind
//! loses the oldest records rather than slowing the transfer down.

mod logfile;

pub use logfile::DiagnosticLogFile;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// Buffered diagnostics per subscriber.
pub const DIAGNOSTICS_BUFFER: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticKind {
    Info,
    Warning,
    Error,
}

impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticKind::Info => "info",
            DiagnosticKind::Warning => "warning",
            DiagnosticKind::Error => "error",
        }
    }
}

/// Severity attached to error diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Fatal,
    Error,
    Silly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticDetails {
    pub message: String,

    pub created_at: DateTime<Utc>,

    /// Component that produced the diagnostic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// One diagnostic record. Immutable once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub details: DiagnosticDetails,
}

impl Diagnostic {
    fn new(kind: DiagnosticKind, message: impl Into<String>, origin: Option<&str>) -> Self {
        Self {
            kind,
            details: DiagnosticDetails {
                message: message.into(),
                created_at: Utc::now(),
                origin: origin.map(str::to_string),
                severity: None,
                params: None,
            },
        }
    }

    pub fn info(message: impl Into<String>, origin: Option<&str>) -> Self {
        Self::new(DiagnosticKind::Info, message, origin)
    }

    pub fn warning(message: impl Into<String>, origin: Option<&str>) -> Self {
        Self::new(DiagnosticKind::Warning, message, origin)
    }

    pub fn error(message: impl Into<String>, severity: Severity, origin: Option<&str>) -> Self {
        let mut diagnostic = Self::new(DiagnosticKind::Error, message, origin);
        diagnostic.details.severity = Some(severity);
        diagnostic
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.details.params = Some(params);
        self
    }

    pub fn message(&self) -> &str {
        &self.details.message
    }
}

/// Publishing side of the diagnostics channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DiagnosticsBus {
    tx: broadcast::Sender<Diagnostic>,
}

impl Default for DiagnosticsBus {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticsBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(DIAGNOSTICS_BUFFER);
        Self { tx }
    }

    /// Register a new subscriber. It only sees diagnostics published after
    /// this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Diagnostic> {
        self.tx.subscribe()
    }

    /// Publish a diagnostic. Dropped silently when nobody listens.
    pub fn report(&self, diagnostic: Diagnostic) {
        let _ = self.tx.send(diagnostic);
    }

    pub fn info(&self, message: impl Into<String>, origin: Option<&str>) {
        self.report(Diagnostic::info(message, origin));
    }

    pub fn warning(&self, message: impl Into<String>, origin: Option<&str>) {
        self.report(Diagnostic::warning(message, origin));
    }

    pub fn error(&self, message: impl Into<String>, severity: Severity, origin: Option<&str>) {
        self.report(Diagnostic::error(message, severity, origin));
    }

    /// Reporter bound to a fixed origin, handed to providers.
    pub fn reporter(&self, origin: impl Into<String>) -> WarningReporter {
        WarningReporter {
            bus: self.clone(),
            origin: origin.into(),
        }
    }
}

/// Warning sink handed to providers so they can report mid-stream problems
/// without failing the stage.
#[derive(Debug, Clone)]
pub struct WarningReporter {
    bus: DiagnosticsBus,
    origin: String,
}

impl WarningReporter {
    pub fn warn(&self, message: impl Into<String>) {
        self.bus.warning(message, Some(&self.origin));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.bus.info(message, Some(&self.origin));
    }
}

//! Diagnostic log file subscriber.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{Diagnostic, DiagnosticKind};

/// Appends diagnostics to `<operation>_<unixMillis>.log`.
///
/// The file name is fixed when the logger is created; the file itself is only
/// created on the first diagnostic that passes the filter, then kept open.
pub struct DiagnosticLogFile {
    path: PathBuf,
    include_info: bool,
    writer: Option<BufWriter<File>>,
    written: usize,
}

impl DiagnosticLogFile {
    /// Create a logger for `operation` inside `dir`.
    pub fn new(dir: impl AsRef<Path>, operation: &str, include_info: bool) -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        let path = dir.as_ref().join(format!("{}_{}.log", operation, millis));
        Self {
            path,
            include_info,
            writer: None,
            written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file has been created.
    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Number of diagnostics written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Append one diagnostic. Returns `false` if it was filtered out.
    pub fn write(&mut self, diagnostic: &Diagnostic) -> std::io::Result<bool> {
        if diagnostic.kind == DiagnosticKind::Info && !self.include_info {
            return Ok(false);
        }

        if self.writer.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            debug!("Opened diagnostic log {:?}", self.path);
            self.writer = Some(BufWriter::new(file));
        }

        if let Some(writer) = self.writer.as_mut() {
            let origin = diagnostic
                .details
                .origin
                .as_deref()
                .map(|o| format!(" ({})", o))
                .unwrap_or_default();
            writeln!(
                writer,
                "[{}] [{}]{} {}",
                diagnostic.details.created_at.to_rfc3339(),
                diagnostic.kind.as_str(),
                origin,
                diagnostic.details.message
            )?;
            writer.flush()?;
            self.written += 1;
        }

        Ok(true)
    }

    /// Consume diagnostics from a subscription until every publisher is gone.
    pub fn spawn(mut self, mut rx: broadcast::Receiver<Diagnostic>) -> JoinHandle<Self> {
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(diagnostic) => {
                        if let Err(e) = self.write(&diagnostic) {
                            warn!("Failed to write diagnostic log {:?}: {}", self.path, e);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Diagnostic log fell behind, {} entries skipped", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            self
        })
    }
}

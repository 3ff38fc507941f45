//! The `export`, `import` and `transfer` commands and what they share:
//! engine options, diagnostics forwarding, abort wiring and the summary.

pub mod export;
pub mod import;
pub mod transfer;

use std::fmt;
use std::time::Duration;
use strapi_transfer::engine::{Transforms, DEFAULT_IGNORED_CONTENT_TYPES};
use strapi_transfer::{
    Config, Diagnostic, DiagnosticKind, DiagnosticLogFile, EngineStatus, Result, SchemaStrategy,
    TransferEngine, TransferEngineOptions, TransferError, TransferResults, VersionStrategy,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::options::Filters;
use crate::progress;
use crate::signals::SignalHandlers;
use crate::summary::results_table;

/// How long to wait for the log file and progress tasks once the engine is gone.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything a command needs besides its own arguments.
pub struct CommandContext {
    pub config: Config,
    pub signals: SignalHandlers,
    pub progress_json: bool,
    pub output_json: bool,
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Export,
    Import,
    Transfer,
}

impl Operation {
    /// Prefix of the diagnostic log file.
    pub fn log_name(&self) -> &'static str {
        match self {
            Operation::Export => "export",
            Operation::Import => "import",
            Operation::Transfer => "transfer",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Export => "Export",
            Operation::Import => "Import",
            Operation::Transfer => "Transfer",
        })
    }
}

/// Engine options of a command. Strategies set in the configuration file
/// take precedence over the command's own.
pub fn engine_options(
    ctx: &CommandContext,
    filters: &Filters,
    version_strategy: VersionStrategy,
    schema_strategy: SchemaStrategy,
) -> TransferEngineOptions {
    TransferEngineOptions {
        version_strategy: ctx
            .config
            .transfer
            .version_strategy
            .unwrap_or(version_strategy),
        schema_strategy: ctx.config.transfer.schema_strategy.unwrap_or(schema_strategy),
        exclude: filters.exclude.clone(),
        only: filters.only.clone(),
        throttle: filters.throttle,
        transforms: Transforms::ignoring_content_types(DEFAULT_IGNORED_CONTENT_TYPES),
        max_retries: ctx.config.transfer.max_retries,
    }
}

fn log_diagnostic(diagnostic: &Diagnostic, verbose: bool) {
    let origin = diagnostic.details.origin.as_deref().unwrap_or("engine");
    match diagnostic.kind {
        DiagnosticKind::Error => error!("[{}] {}", origin, diagnostic.message()),
        DiagnosticKind::Warning => warn!("[{}] {}", origin, diagnostic.message()),
        DiagnosticKind::Info if verbose => info!("[{}] {}", origin, diagnostic.message()),
        DiagnosticKind::Info => debug!("[{}] {}", origin, diagnostic.message()),
    }
}

fn forward_diagnostics(mut rx: broadcast::Receiver<Diagnostic>, verbose: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(diagnostic) => log_diagnostic(&diagnostic, verbose),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("{} diagnostics were dropped", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Run a configured engine to completion and report the outcome.
///
/// Signals abort the engine while it runs. The diagnostic log file, the
/// console forwarding and the progress renderer are drained before the
/// summary is printed.
pub async fn run_engine(
    ctx: &CommandContext,
    operation: Operation,
    mut engine: TransferEngine,
) -> Result<TransferResults> {
    let log_file = DiagnosticLogFile::new(".", operation.log_name(), ctx.verbose)
        .spawn(engine.subscribe_diagnostics());
    let forwarder = forward_diagnostics(engine.subscribe_diagnostics(), ctx.verbose);
    let renderer = progress::spawn(engine.subscribe_progress(), ctx.progress_json);

    let abort = engine.abort_handle();
    let scope = ctx.signals.scope(move || {
        if abort.abort() {
            eprintln!("\nAborting, waiting for the providers to close...");
        }
    });

    let outcome = engine.transfer().await;
    let results = engine.results();
    let aborted = engine.status() == EngineStatus::Aborted;
    drop(scope);
    drop(engine);

    match tokio::time::timeout(DRAIN_TIMEOUT, log_file).await {
        Ok(Ok(file)) if file.written() > 0 => {
            info!("Diagnostics were written to {}", file.path().display())
        }
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!("Diagnostic log task failed: {}", e),
        Err(_) => warn!("Timed out waiting for the diagnostic log file"),
    }
    for task in [forwarder, renderer] {
        if tokio::time::timeout(DRAIN_TIMEOUT, task).await.is_err() {
            debug!("Timed out draining an output task");
        }
    }

    match outcome {
        Ok(results) => {
            print_results(ctx, &results)?;
            Ok(results)
        }
        Err(e) => {
            if aborted || matches!(e, TransferError::Aborted) {
                eprintln!("{} process has been aborted", operation);
            } else {
                eprintln!("{} process failed.", operation);
            }
            if !results.engine.is_empty() && !ctx.output_json {
                eprintln!("{}", results_table(&results));
            }
            Err(e)
        }
    }
}

fn print_results(ctx: &CommandContext, results: &TransferResults) -> Result<()> {
    if ctx.output_json {
        println!("{}", serde_json::to_string_pretty(results)?);
    } else {
        println!("{}", results_table(results));
    }
    Ok(())
}

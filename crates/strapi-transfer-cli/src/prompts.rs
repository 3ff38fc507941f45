//! Interactive prompts, each under its own signal-handler scope.

use async_trait::async_trait;
use dialoguer::{Confirm, Password};
use std::io::{self, IsTerminal};
use strapi_transfer::engine::{AbortHandle, EngineHandle, ErrorContext, ErrorHandler};
use strapi_transfer::schema::Confirmation;
use strapi_transfer::{Result, TransferError};

use crate::signals::SignalHandlers;

/// Whether prompts can be shown.
pub fn is_interactive() -> bool {
    std::io::stdin().is_terminal() && std::io::stderr().is_terminal()
}

fn prompt_scope(signals: &SignalHandlers) -> crate::signals::SignalScope {
    signals.scope(|| {
        eprintln!("\nAborted by user");
        std::process::exit(1);
    })
}

/// Ask a yes/no question, defaulting to no.
pub async fn confirm(signals: &SignalHandlers, message: &str) -> Result<bool> {
    if !is_interactive() {
        return Err(TransferError::Validation(
            "confirmation required but no terminal is attached, use --force".into(),
        ));
    }
    let _scope = prompt_scope(signals);
    let message = message.to_string();
    tokio::task::spawn_blocking(move || {
        Confirm::new()
            .with_prompt(message)
            .default(false)
            .interact()
    })
    .await
    .map_err(|e| TransferError::Validation(e.to_string()))?
    .map_err(|e| TransferError::Validation(format!("prompt failed: {}", e)))
}

/// Run a blocking prompt while a transfer is in progress. A termination
/// signal aborts the transfer through `abort` instead of exiting, so the
/// engine still closes its providers.
async fn prompt_during_transfer<T, F>(
    signals: &SignalHandlers,
    abort: &AbortHandle,
    prompt: F,
) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> std::result::Result<T, dialoguer::Error> + Send + 'static,
{
    if abort.is_aborted() {
        return Err(TransferError::Aborted);
    }
    let _scope = {
        let abort = abort.clone();
        signals.scope(move || {
            abort.abort();
        })
    };
    let cancelled = abort.token();

    // A plain thread: an abandoned prompt must not hold up runtime shutdown.
    let (tx, rx) = tokio::sync::oneshot::channel();
    std::thread::spawn(move || {
        let _ = tx.send(prompt());
    });

    tokio::select! {
        _ = cancelled.cancelled() => Err(TransferError::Aborted),
        answer = rx => match answer {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(dialoguer::Error::IO(e))) if e.kind() == io::ErrorKind::Interrupted => {
                abort.abort();
                Err(TransferError::Aborted)
            }
            Ok(Err(e)) => Err(TransferError::Validation(format!("prompt failed: {}", e))),
            Err(_) => Err(TransferError::Validation("prompt closed without an answer".into())),
        },
    }
}

/// [`confirm`] for prompts raised by the engine itself.
pub async fn confirm_during_transfer(
    signals: &SignalHandlers,
    abort: &AbortHandle,
    message: &str,
) -> Result<bool> {
    if !is_interactive() {
        return Err(TransferError::Validation(
            "confirmation required but no terminal is attached, use --force".into(),
        ));
    }
    let message = message.to_string();
    prompt_during_transfer(signals, abort, move || {
        Confirm::new()
            .with_prompt(message)
            .default(false)
            .interact()
    })
    .await
}

/// Ask for an encryption key without echoing it.
pub async fn prompt_key(signals: &SignalHandlers, prompt: &str) -> Result<String> {
    if !is_interactive() {
        return Err(TransferError::Validation(
            "an encryption key is required, use --key".into(),
        ));
    }
    let _scope = prompt_scope(signals);
    let prompt = prompt.to_string();
    let key = tokio::task::spawn_blocking(move || Password::new().with_prompt(prompt).interact())
        .await
        .map_err(|e| TransferError::Validation(e.to_string()))?
        .map_err(|e| TransferError::Validation(format!("prompt failed: {}", e)))?;
    if key.is_empty() {
        return Err(TransferError::Validation("the encryption key is empty".into()));
    }
    Ok(key)
}

/// Confirm a destructive operation, unless forced.
pub async fn confirm_destructive(signals: &SignalHandlers, message: &str, force: bool) -> Result<bool> {
    if force {
        return Ok(true);
    }
    confirm(
        signals,
        &format!("{} Are you sure you want to proceed?", message),
    )
    .await
}

/// Confirmation backed by a terminal prompt.
#[derive(Clone)]
pub struct TerminalConfirmation {
    signals: SignalHandlers,
    abort: AbortHandle,
}

impl TerminalConfirmation {
    pub fn new(signals: SignalHandlers, abort: AbortHandle) -> Self {
        Self { signals, abort }
    }
}

#[async_trait]
impl Confirmation for TerminalConfirmation {
    async fn confirm(&self, message: &str) -> Result<bool> {
        confirm_during_transfer(&self.signals, &self.abort, message).await
    }
}

/// Lets the transfer continue without assets when the assets directory of
/// the destination cannot be prepared.
pub struct AssetsDirectoryHandler {
    signals: SignalHandlers,
    force: bool,
}

impl AssetsDirectoryHandler {
    pub fn new(signals: SignalHandlers, force: bool) -> Self {
        Self { signals, force }
    }
}

#[async_trait]
impl ErrorHandler for AssetsDirectoryHandler {
    async fn handle(&self, context: &mut ErrorContext, engine: &EngineHandle) -> Result<()> {
        if self.force {
            engine.report_warning(
                format!("{}, continuing without assets", context.error),
                Some("cli"),
            );
            context.ignore = true;
            return Ok(());
        }
        context.ignore = confirm_during_transfer(
            &self.signals,
            engine.abort_handle(),
            &format!(
                "There was an error with the assets directory: {}. Do you want to continue without assets?",
                context.error
            ),
        )
        .await?;
        Ok(())
    }
}

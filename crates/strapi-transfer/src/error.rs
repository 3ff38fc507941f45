//! Error types for the transfer engine and its providers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::TransferStage;

/// Well-known codes for recoverable conditions.
///
/// A provider raises [`TransferError::Recoverable`] with one of these codes
/// when the condition can be resolved by a registered error handler (usually
/// by asking the user whether to continue without the affected data).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// The assets directory of the destination could not be backed up or cleared.
    #[serde(rename = "ASSETS_DIRECTORY_ERR")]
    AssetsDirectory,
}

impl ErrorCode {
    /// Wire name of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AssetsDirectory => "ASSETS_DIRECTORY_ERR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for transfer operations.
#[derive(Error, Debug)]
pub enum TransferError {
    /// Invalid options or CLI usage, detected before any provider is touched.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration error (invalid YAML, out-of-range values).
    #[error("Configuration error: {0}")]
    Config(String),

    /// A provider could not be set up (missing file, bad token, unreachable host).
    #[error("Provider initialization failed ({provider}): {message}")]
    ProviderInitialization { provider: String, message: String },

    /// Source and destination are not compatible (version or schema mismatch).
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    /// A single record could not be read or written. Retryable.
    #[error("Stage integrity error in {stage}: {message}")]
    StageIntegrity {
        stage: TransferStage,
        message: String,
    },

    /// A named condition that registered error handlers may choose to ignore.
    #[error("{code}: {message}")]
    Recoverable { code: ErrorCode, message: String },

    /// Fatal stage failure.
    #[error("Transfer failed in stage {stage}: {message}")]
    Transfer {
        stage: TransferStage,
        message: String,
    },

    /// The remote instance answered with an error.
    #[error("Remote error (status {status}): {message}")]
    Remote { status: u16, message: String },

    /// The transfer was aborted (signal or explicit user abort).
    #[error("Transfer aborted")]
    Aborted,

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl TransferError {
    /// Create a ProviderInitialization error.
    pub fn provider_init(provider: impl Into<String>, message: impl Into<String>) -> Self {
        TransferError::ProviderInitialization {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a StageIntegrity error.
    pub fn stage_integrity(stage: TransferStage, message: impl Into<String>) -> Self {
        TransferError::StageIntegrity {
            stage,
            message: message.into(),
        }
    }

    /// Create a Transfer error
    pub fn transfer(stage: TransferStage, message: impl Into<String>) -> Self {
        TransferError::Transfer {
            stage,
            message: message.into(),
        }
    }

    /// Create a Recoverable error.
    pub fn recoverable(code: ErrorCode, message: impl Into<String>) -> Self {
        TransferError::Recoverable {
            code,
            message: message.into(),
        }
    }

    /// Whether a failed operation may be attempted again with the same input.
    ///
    /// Only mid-stream record failures and transient remote failures qualify.
    /// Everything else needs a decision (handler, confirmation) or is fatal.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::StageIntegrity { .. } => true,
            TransferError::Remote { status, .. } => *status >= 500 || *status == 429,
            TransferError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Code of a recoverable condition, if any.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            TransferError::Recoverable { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        1
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for transfer operations.
pub type Result<T> = std::result::Result<T, TransferError>;

//! Configuration validation.

use super::Config;
use crate::error::{Result, TransferError};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.instance.data_dir.as_os_str().is_empty() {
        return Err(TransferError::Config("instance.data_dir is required".into()));
    }

    if config.transfer.jsonl_chunk_bytes == 0 {
        return Err(TransferError::Config(
            "transfer.jsonl_chunk_bytes must be at least 1".into(),
        ));
    }
    if config.transfer.remote_batch_bytes == 0 {
        return Err(TransferError::Config(
            "transfer.remote_batch_bytes must be at least 1".into(),
        ));
    }
    if config.transfer.remote_timeout_secs == 0 {
        return Err(TransferError::Config(
            "transfer.remote_timeout_secs must be at least 1".into(),
        ));
    }

    Ok(())
}

//! Configuration types.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::engine::{SchemaStrategy, VersionStrategy};

/// Root configuration structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    /// Local instance configuration.
    #[serde(default)]
    pub instance: InstanceConfig,

    /// Transfer behavior configuration.
    #[serde(default)]
    pub transfer: TransferConfig,
}

/// Local instance configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Directory holding the content store of the local instance.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Transfer behavior configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Retries for retryable write and remote failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Maximum size of one JSONL entry inside a file archive.
    #[serde(default = "default_jsonl_chunk_bytes")]
    pub jsonl_chunk_bytes: u64,

    /// Push batch size for remote destinations.
    #[serde(default = "default_remote_batch_bytes")]
    pub remote_batch_bytes: usize,

    /// Request timeout for remote instances, in seconds.
    #[serde(default = "default_remote_timeout_secs")]
    pub remote_timeout_secs: u64,

    /// Overrides the version strategy of every command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_strategy: Option<VersionStrategy>,

    /// Overrides the schema strategy of every command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_strategy: Option<SchemaStrategy>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            jsonl_chunk_bytes: default_jsonl_chunk_bytes(),
            remote_batch_bytes: default_remote_batch_bytes(),
            remote_timeout_secs: default_remote_timeout_secs(),
            version_strategy: None,
            schema_strategy: None,
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_max_retries() -> u32 {
    3
}

fn default_jsonl_chunk_bytes() -> u64 {
    256 * 1024 * 1024
}

fn default_remote_batch_bytes() -> usize {
    1024 * 1024
}

fn default_remote_timeout_secs() -> u64 {
    300
}

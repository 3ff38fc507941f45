//! Transfer stages and stage-level result accumulators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// One logical phase of moved data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStage {
    Schemas,
    Entities,
    Links,
    Media,
    Configuration,
}

impl TransferStage {
    /// Fixed execution order. Schemas and configuration land before content
    /// references them, links need their entities, media runs last.
    pub const ORDER: [TransferStage; 5] = [
        TransferStage::Schemas,
        TransferStage::Configuration,
        TransferStage::Entities,
        TransferStage::Links,
        TransferStage::Media,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStage::Schemas => "schemas",
            TransferStage::Entities => "entities",
            TransferStage::Links => "links",
            TransferStage::Media => "media",
            TransferStage::Configuration => "configuration",
        }
    }
}

impl fmt::Display for TransferStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "schemas" => Ok(TransferStage::Schemas),
            "entities" => Ok(TransferStage::Entities),
            "links" => Ok(TransferStage::Links),
            "media" | "assets" => Ok(TransferStage::Media),
            "configuration" => Ok(TransferStage::Configuration),
            other => Err(format!("unknown transfer stage '{}'", other)),
        }
    }
}

/// Lifecycle status of a stage within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Idle,
    Running,
    Finished,
    Skipped,
    Error,
}

/// Count and size for one aggregate subkey.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Aggregate {
    pub count: u64,
    pub bytes: u64,
}

/// Per-stage accumulator, updated record by record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StageResult {
    /// Records written.
    pub count: u64,

    /// Bytes written (serialized size, or file size for assets).
    pub bytes: u64,

    /// Breakdown by subkey (content type, file extension, ...).
    pub aggregates: BTreeMap<String, Aggregate>,

    /// Current status.
    pub status: StageStatus,

    /// When the stage started.
    pub started_at: Option<DateTime<Utc>>,

    /// When the stage finished, failed or was skipped.
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageResult {
    /// Account for one written record.
    pub fn record(&mut self, bytes: u64, key: Option<&str>) {
        self.count += 1;
        self.bytes += bytes;
        if let Some(key) = key {
            let agg = self.aggregates.entry(key.to_string()).or_default();
            agg.count += 1;
            agg.bytes += bytes;
        }
    }

    pub(crate) fn mark_running(&mut self) {
        self.status = StageStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn mark(&mut self, status: StageStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }
}

//! Engine options: strategies, stage filters, throttle and transforms.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::core::TransferStage;
use crate::error::{Result, TransferError};

use super::transforms::Transforms;

/// How provider versions are compared before transferring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VersionStrategy {
    /// Full version strings must be equal.
    #[default]
    Exact,
    Major,
    Minor,
    Patch,
    Ignore,
}

impl FromStr for VersionStrategy {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "exact" => Ok(Self::Exact),
            "major" => Ok(Self::Major),
            "minor" => Ok(Self::Minor),
            "patch" => Ok(Self::Patch),
            "ignore" => Ok(Self::Ignore),
            other => Err(TransferError::Validation(format!(
                "unknown version strategy '{}'",
                other
            ))),
        }
    }
}

/// How source and destination schemas are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchemaStrategy {
    /// Structural differences only (`pluginOptions` and `info` are ignored).
    #[default]
    Strict,
    /// Every difference counts.
    Exact,
    Ignore,
}

impl FromStr for SchemaStrategy {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "strict" => Ok(Self::Strict),
            "exact" => Ok(Self::Exact),
            "ignore" => Ok(Self::Ignore),
            other => Err(TransferError::Validation(format!(
                "unknown schema strategy '{}'",
                other
            ))),
        }
    }
}

/// Data kinds accepted by `--only` / `--exclude`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferGroupFilter {
    Content,
    Files,
    Config,
    Schemas,
    Links,
}

impl TransferGroupFilter {
    pub const ALL: [TransferGroupFilter; 5] = [
        TransferGroupFilter::Content,
        TransferGroupFilter::Files,
        TransferGroupFilter::Config,
        TransferGroupFilter::Schemas,
        TransferGroupFilter::Links,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferGroupFilter::Content => "content",
            TransferGroupFilter::Files => "files",
            TransferGroupFilter::Config => "config",
            TransferGroupFilter::Schemas => "schemas",
            TransferGroupFilter::Links => "links",
        }
    }

    /// Stages covered by this group.
    pub fn stages(&self) -> &'static [TransferStage] {
        match self {
            TransferGroupFilter::Content => &[TransferStage::Entities, TransferStage::Links],
            TransferGroupFilter::Files => &[TransferStage::Media],
            TransferGroupFilter::Config => &[TransferStage::Configuration],
            TransferGroupFilter::Schemas => &[TransferStage::Schemas],
            TransferGroupFilter::Links => &[TransferStage::Links],
        }
    }

    pub fn covers(&self, stage: TransferStage) -> bool {
        self.stages().contains(&stage)
    }

    /// Parse a comma-separated list such as `content,files`.
    pub fn parse_list(input: &str) -> Result<Vec<TransferGroupFilter>> {
        let mut filters = Vec::new();
        for token in input.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let filter = token.parse()?;
            if !filters.contains(&filter) {
                filters.push(filter);
            }
        }
        Ok(filters)
    }
}

impl fmt::Display for TransferGroupFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferGroupFilter {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self> {
        TransferGroupFilter::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<_> = TransferGroupFilter::ALL.iter().map(|f| f.as_str()).collect();
                TransferError::Validation(format!(
                    "unknown data type '{}', expected one of: {}",
                    s,
                    valid.join(", ")
                ))
            })
    }
}

/// Options of one transfer run. Not changed once the engine is built.
#[derive(Debug, Clone)]
pub struct TransferEngineOptions {
    pub version_strategy: VersionStrategy,

    pub schema_strategy: SchemaStrategy,

    /// Groups to leave out.
    pub exclude: Vec<TransferGroupFilter>,

    /// Groups to restrict the transfer to. Empty means no restriction.
    pub only: Vec<TransferGroupFilter>,

    /// Delay between two records.
    pub throttle: Option<Duration>,

    /// Per-stage record transforms.
    pub transforms: Transforms,

    /// Attempts after the first failure for retryable write errors.
    pub max_retries: u32,
}

impl Default for TransferEngineOptions {
    fn default() -> Self {
        Self {
            version_strategy: VersionStrategy::default(),
            schema_strategy: SchemaStrategy::default(),
            exclude: Vec::new(),
            only: Vec::new(),
            throttle: None,
            transforms: Transforms::default(),
            max_retries: 3,
        }
    }
}

impl TransferEngineOptions {
    /// Reject option sets where a group is both excluded and the only one kept.
    pub fn validate(&self) -> Result<()> {
        validate_filters(&self.exclude, &self.only)
    }
}

/// Check that `exclude` and `only` do not share a group.
pub fn validate_filters(
    exclude: &[TransferGroupFilter],
    only: &[TransferGroupFilter],
) -> Result<()> {
    let overlap: Vec<&str> = exclude
        .iter()
        .filter(|f| only.contains(f))
        .map(|f| f.as_str())
        .collect();

    if !overlap.is_empty() {
        return Err(TransferError::Validation(format!(
            "Data types may not be used in both \"exclude\" and \"only\" in the same transfer: {}",
            overlap.join(", ")
        )));
    }
    Ok(())
}

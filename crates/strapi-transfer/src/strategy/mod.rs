//! Restore scope and conflict strategies for destinations.
//!
//! A `restore` destination wipes existing data before writing, limited to
//! what the transfer is about to bring in. The scope is derived once from the
//! `only` / `exclude` filters of the command.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::engine::{TransferGroupFilter, DEFAULT_IGNORED_CONTENT_TYPES};
use crate::error::{Result, TransferError};

/// How a destination treats data that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStrategy {
    /// Delete in-scope data before writing.
    Restore,
    /// Keep existing data; a write colliding with it fails the transfer.
    #[default]
    Additive,
}

impl ConflictStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::Restore => "restore",
            ConflictStrategy::Additive => "additive",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "restore" => Ok(Self::Restore),
            "additive" => Ok(Self::Additive),
            other => Err(TransferError::Validation(format!(
                "unknown conflict strategy '{}'",
                other
            ))),
        }
    }
}

/// Which content types a restore may delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "types", rename_all = "lowercase")]
pub enum EntityScope {
    /// No restriction.
    All,
    /// Nothing: content is not part of the transfer.
    None,
    /// Only the listed content types.
    Only(Vec<String>),
}

impl EntityScope {
    pub fn includes(&self, content_type: &str) -> bool {
        match self {
            EntityScope::All => true,
            EntityScope::None => false,
            EntityScope::Only(types) => types.iter().any(|t| t == content_type),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRestore {
    pub scope: EntityScope,

    /// Content types never deleted, whatever the scope.
    pub exclude: Vec<String>,
}

impl EntityRestore {
    pub fn should_delete(&self, content_type: &str) -> bool {
        self.scope.includes(content_type) && !self.exclude.iter().any(|t| t == content_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationRestore {
    pub webhook: bool,
    pub core_store: bool,
}

/// What a restore deletes before the transfer writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreConfiguration {
    pub entities: EntityRestore,
    pub assets: bool,
    pub configuration: ConfigurationRestore,
}

impl Default for RestoreConfiguration {
    fn default() -> Self {
        Self::from_filters(&[], &[])
    }
}

impl RestoreConfiguration {
    /// Derive the restore scope from the command filters.
    pub fn from_filters(exclude: &[TransferGroupFilter], only: &[TransferGroupFilter]) -> Self {
        let keeps = |group: TransferGroupFilter| {
            !exclude.contains(&group) && (only.is_empty() || only.contains(&group))
        };

        let scope = if keeps(TransferGroupFilter::Content) {
            EntityScope::All
        } else {
            EntityScope::None
        };
        let config = keeps(TransferGroupFilter::Config);

        Self {
            entities: EntityRestore {
                scope,
                exclude: DEFAULT_IGNORED_CONTENT_TYPES
                    .iter()
                    .map(|t| t.to_string())
                    .collect(),
            },
            assets: keeps(TransferGroupFilter::Files),
            configuration: ConfigurationRestore {
                webhook: config,
                core_store: config,
            },
        }
    }
}

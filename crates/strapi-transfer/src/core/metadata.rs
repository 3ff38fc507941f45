//! Provider metadata and version comparison.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Instance information reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct InstanceInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Description returned by `get_metadata`, checked before any data moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub strapi: InstanceInfo,
}

impl ProviderMetadata {
    pub fn with_version(version: impl Into<String>) -> Self {
        Self {
            created_at: Some(Utc::now()),
            strapi: InstanceInfo {
                version: Some(version.into()),
            },
        }
    }

    pub fn version(&self) -> Option<&str> {
        self.strapi.version.as_deref()
    }
}

/// `major.minor.patch`, pre-release and build suffixes dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    /// Parse a version string. Missing minor/patch parts default to 0.
    pub fn parse(input: &str) -> Option<Self> {
        let core = input
            .trim()
            .trim_start_matches('v')
            .split(['-', '+'])
            .next()?;
        let mut parts = core.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = match parts.next() {
            Some(p) => p.parse().ok()?,
            None => 0,
        };
        let patch = match parts.next() {
            Some(p) => p.parse().ok()?,
            None => 0,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            major,
            minor,
            patch,
        })
    }
}

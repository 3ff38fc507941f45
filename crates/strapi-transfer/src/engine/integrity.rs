//! Version compatibility check run during bootstrap.

use tracing::debug;

use crate::core::{ProviderMetadata, Version};
use crate::error::{Result, TransferError};

use super::handlers::EngineHandle;
use super::options::VersionStrategy;

/// Compare the versions reported by both providers.
///
/// A side without a version skips the check with a warning. A mismatch is an
/// [`TransferError::Integrity`] error.
pub fn check_versions(
    strategy: VersionStrategy,
    source: Option<&ProviderMetadata>,
    destination: Option<&ProviderMetadata>,
    engine: &EngineHandle,
) -> Result<()> {
    if strategy == VersionStrategy::Ignore {
        return Ok(());
    }

    let (Some(source), Some(destination)) = (
        source.and_then(ProviderMetadata::version),
        destination.and_then(ProviderMetadata::version),
    ) else {
        engine.report_warning(
            "Could not determine the version of both instances, skipping the version check",
            Some("Version Integrity"),
        );
        return Ok(());
    };

    debug!(
        "Checking versions with {:?} strategy: {} / {}",
        strategy, source, destination
    );

    if versions_match(strategy, source, destination)? {
        return Ok(());
    }

    Err(TransferError::Integrity(format!(
        "The source and destination provide incompatible versions of the CMS \
         (source: {}, destination: {}, strategy: {:?})",
        source, destination, strategy
    )))
}

fn versions_match(strategy: VersionStrategy, source: &str, destination: &str) -> Result<bool> {
    if strategy == VersionStrategy::Exact {
        return Ok(source == destination);
    }

    let parse = |v: &str| {
        Version::parse(v)
            .ok_or_else(|| TransferError::Integrity(format!("invalid version '{}'", v)))
    };
    let (a, b) = (parse(source)?, parse(destination)?);

    Ok(match strategy {
        VersionStrategy::Major => a.major == b.major,
        VersionStrategy::Minor => a.major == b.major && a.minor == b.minor,
        VersionStrategy::Patch => a == b,
        VersionStrategy::Exact | VersionStrategy::Ignore => true,
    })
}

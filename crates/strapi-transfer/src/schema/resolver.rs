//! Interactive resolution of schema differences.

use async_trait::async_trait;

use crate::engine::{EngineHandle, SchemaDiffContext, SchemaDiffHandler};
use crate::error::{Result, TransferError};

use super::diff::{merge_diffs, DiffEntry, DiffKind};

const WORKFLOW_UIDS: &[&str] = &["admin::workflow", "admin::workflow-stage"];
const WORKFLOW_FIELD_PREFIXES: &[&str] = &["strapi_stage", "strapi_assignee"];

pub const SCHEMA_CONFIRMATION_MESSAGE: &str = "There are differences in schema between the source \
     and destination, and the data listed above will be lost. Are you sure you want to continue?";

/// Sink for the warnings and the fatal outcome of the resolution.
pub trait DiffReporter: Send + Sync {
    fn warn(&self, message: &str);

    /// Report a fatal error and return it to the caller.
    fn panic(&self, error: TransferError) -> TransferError;
}

/// Yes/no question asked once for all differences.
#[async_trait]
pub trait Confirmation: Send + Sync {
    async fn confirm(&self, message: &str) -> Result<bool>;
}

/// Confirmation that always accepts (`--force`).
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysConfirm;

#[async_trait]
impl Confirmation for AlwaysConfirm {
    async fn confirm(&self, _message: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Whether a diff touches the review-workflows feature.
pub fn is_workflow_diff(uid: &str, entry: &DiffEntry) -> bool {
    if WORKFLOW_UIDS.contains(&uid) {
        return true;
    }
    entry
        .path
        .last()
        .is_some_and(|last| WORKFLOW_FIELD_PREFIXES.iter().any(|p| last.starts_with(p)))
}

/// Report every difference, then ask once whether to continue.
///
/// A modified workflow schema cannot be migrated partially: it panics without
/// asking. On confirmation all diffs are merged into `ignored_diffs`; on
/// refusal they stay unresolved and the engine fails the integrity check.
pub async fn resolve_schema_diffs(
    context: &mut SchemaDiffContext,
    reporter: &dyn DiffReporter,
    confirmation: &dyn Confirmation,
) -> Result<()> {
    if context.diffs.is_empty() {
        return Ok(());
    }

    let mut workflow_kinds: Vec<DiffKind> = Vec::new();
    for (uid, entries) in &context.diffs {
        for entry in entries {
            if is_workflow_diff(uid, entry) {
                if !workflow_kinds.contains(&entry.kind) {
                    workflow_kinds.push(entry.kind);
                }
                continue;
            }
            let path = entry.display_path(uid);
            let message = match entry.kind {
                DiffKind::Added => format!("{} does not exist on source", path),
                DiffKind::Deleted => format!("{} does not exist on destination", path),
                DiffKind::Modified => format!("{} has a different data type", path),
            };
            reporter.warn(&message);
        }
    }

    if workflow_kinds.contains(&DiffKind::Modified) {
        return Err(reporter.panic(TransferError::Integrity(
            "Review workflows schemas differ between source and destination and cannot be transferred"
                .into(),
        )));
    }
    if workflow_kinds.contains(&DiffKind::Added) {
        reporter.warn("Review workflows feature does not exist on source");
    }
    if workflow_kinds.contains(&DiffKind::Deleted) {
        reporter.warn("Review workflows feature does not exist on destination");
    }

    if confirmation.confirm(SCHEMA_CONFIRMATION_MESSAGE).await? {
        let diffs = context.diffs.clone();
        merge_diffs(&mut context.ignored_diffs, &diffs);
    }
    Ok(())
}

/// Schema diff handler that reports through the engine and asks `confirmation`.
pub struct ConfirmingDiffHandler<C> {
    confirmation: C,
    force: bool,
}

impl<C: Confirmation> ConfirmingDiffHandler<C> {
    pub fn new(confirmation: C, force: bool) -> Self {
        Self {
            confirmation,
            force,
        }
    }
}

#[async_trait]
impl<C: Confirmation> SchemaDiffHandler for ConfirmingDiffHandler<C> {
    async fn handle(&self, context: &mut SchemaDiffContext, engine: &EngineHandle) -> Result<()> {
        if self.force {
            resolve_schema_diffs(context, engine, &AlwaysConfirm).await
        } else {
            resolve_schema_diffs(context, engine, &self.confirmation).await
        }
    }
}

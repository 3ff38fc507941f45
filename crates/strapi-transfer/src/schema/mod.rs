//! Schema snapshot comparison and diff resolution.

pub mod diff;
pub mod resolver;

pub use diff::{compute_diffs, diff_values, merge_diffs, unresolved, DiffEntry, DiffKind, SchemaDiffs};
pub use resolver::{
    is_workflow_diff, resolve_schema_diffs, AlwaysConfirm, Confirmation, ConfirmingDiffHandler,
    DiffReporter, SCHEMA_CONFIRMATION_MESSAGE,
};

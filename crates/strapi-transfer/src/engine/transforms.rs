//! Per-record transforms applied between source and destination.

use std::fmt;
use std::sync::Arc;

use crate::core::{Entity, Link, StageRecord};

/// Internal content types that never leave an instance: administrator
/// accounts, roles, permissions, tokens and audit logs.
pub const DEFAULT_IGNORED_CONTENT_TYPES: &[&str] = &[
    "admin::permission",
    "admin::user",
    "admin::role",
    "admin::api-token",
    "admin::api-token-permission",
    "admin::transfer-token",
    "admin::transfer-token-permission",
    "admin::audit-log",
];

/// One step of a transform chain.
pub enum TransformStep<T> {
    /// Keep the record only if the predicate holds.
    Filter(Arc<dyn Fn(&T) -> bool + Send + Sync>),
    /// Replace the record.
    Map(Arc<dyn Fn(T) -> T + Send + Sync>),
}

impl<T> Clone for TransformStep<T> {
    fn clone(&self) -> Self {
        match self {
            TransformStep::Filter(f) => TransformStep::Filter(Arc::clone(f)),
            TransformStep::Map(m) => TransformStep::Map(Arc::clone(m)),
        }
    }
}

impl<T> TransformStep<T> {
    pub fn filter(predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        TransformStep::Filter(Arc::new(predicate))
    }

    pub fn map(function: impl Fn(T) -> T + Send + Sync + 'static) -> Self {
        TransformStep::Map(Arc::new(function))
    }
}

fn run_chain<T>(steps: &[TransformStep<T>], mut value: T) -> Option<T> {
    for step in steps {
        match step {
            TransformStep::Filter(predicate) => {
                if !predicate(&value) {
                    return None;
                }
            }
            TransformStep::Map(function) => value = function(value),
        }
    }
    Some(value)
}

/// Transform chains for the entities and links stages.
#[derive(Clone, Default)]
pub struct Transforms {
    pub entities: Vec<TransformStep<Entity>>,
    pub links: Vec<TransformStep<Link>>,
}

impl fmt::Debug for Transforms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transforms")
            .field("entities", &self.entities.len())
            .field("links", &self.links.len())
            .finish()
    }
}

impl Transforms {
    /// Drop entities of the given types and links touching them.
    pub fn ignoring_content_types<S: AsRef<str>>(types: &[S]) -> Self {
        let ignored: Arc<Vec<String>> =
            Arc::new(types.iter().map(|t| t.as_ref().to_string()).collect());
        let for_links = Arc::clone(&ignored);

        Self {
            entities: vec![TransformStep::filter(move |entity: &Entity| {
                !ignored.contains(&entity.content_type)
            })],
            links: vec![TransformStep::filter(move |link: &Link| {
                !for_links.contains(&link.left.content_type)
                    && !for_links.contains(&link.right.content_type)
            })],
        }
    }

    pub fn with_entity_step(mut self, step: TransformStep<Entity>) -> Self {
        self.entities.push(step);
        self
    }

    pub fn with_link_step(mut self, step: TransformStep<Link>) -> Self {
        self.links.push(step);
        self
    }

    /// Run the chain of the record's stage. `None` means the record is dropped.
    /// Stages without transforms pass through untouched.
    pub fn apply(&self, record: StageRecord) -> Option<StageRecord> {
        match record {
            StageRecord::Entity(entity) => {
                run_chain(&self.entities, entity).map(StageRecord::Entity)
            }
            StageRecord::Link(link) => run_chain(&self.links, link).map(StageRecord::Link),
            other => Some(other),
        }
    }
}

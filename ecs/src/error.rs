use thiserror::Error;

use crate::entity::Entity;

/// Errors reported by the [`Registry`](crate::Registry) and by system
/// parameter resolution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EcsError {
    #[error("Invalid entity {0}: handle is null, stale or already destroyed")]
    InvalidEntity(Entity),
    #[error("Missing component `{component}` on entity {entity}")]
    MissingComponent {
        entity: Entity,
        component: &'static str,
    },
    #[error("Resource `{resource}` does not exist")]
    MissingResource { resource: &'static str },
    #[error("Resource array `{resource}` does not exist")]
    MissingResourceArray { resource: &'static str },
    #[error("Cannot borrow `{type_name}`: already borrowed in a conflicting way")]
    BorrowConflict { type_name: &'static str },
    #[error("Stage `{0}` not found")]
    StageNotFound(String),
    #[error("Stage `{0}` already exists")]
    DuplicateStage(String),
    #[error("Stage `{0}` is reserved and cannot be modified")]
    ReservedStage(String),
}

pub type EcsResult<T> = Result<T, EcsError>;

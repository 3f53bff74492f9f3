use thiserror::Error;

use super::editor::EditMode;
use crate::core::models::entity::IntegrityError;
use crate::core::models::ids::AtomId;
use crate::core::models::props::PropertyError;
use crate::query::error::QueryError;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EntityError {
    #[error("Invalid handle: the {kind} no longer exists")]
    InvalidHandle { kind: &'static str },

    #[error("Atoms {first:?} and {second:?} are not connected")]
    NotConnected { first: AtomId, second: AtomId },

    #[error("{0}")]
    Integrity(IntegrityError),

    #[error("Cannot open {requested} editor: {active} editor already active")]
    EditorActive {
        requested: EditMode,
        active: EditMode,
    },

    #[error("Property error: {source}")]
    Property {
        #[from]
        source: PropertyError,
    },

    #[error("Query error: {source}")]
    Query {
        #[from]
        source: QueryError,
    },
}

impl From<IntegrityError> for EntityError {
    fn from(err: IntegrityError) -> Self {
        match err {
            IntegrityError::MissingNode { kind } => EntityError::InvalidHandle { kind },
            other => EntityError::Integrity(other),
        }
    }
}

impl EntityError {
    pub(crate) fn violation(message: impl Into<String>) -> Self {
        EntityError::Integrity(IntegrityError::Violation(message.into()))
    }
}

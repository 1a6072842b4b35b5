//! Error types for extraction and load operations.
//!
//! Everything in here is fatal: it stops the running operation. Per-record
//! insert and update failures are not errors in this sense; they are collected
//! into [`StepErrors`](crate::operation::StepErrors) and reported afterward.

use std::fmt;

use crate::identifier::RecordId;
use crate::transform::TransformError;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MigrationError>;

/// Fatal error raised while configuring or executing an operation
#[derive(Debug)]
pub enum MigrationError {
    /// A string could not be parsed as a record identifier
    InvalidIdentifier(String),
    /// An entity type is not known to the schema catalog or the operation
    UnknownEntityType(String),
    UnknownField {
        entity: String,
        field: String,
    },
    /// A field of a kind the engine cannot carry was placed in scope
    UnsupportedFieldKind {
        entity: String,
        field: String,
        kind: String,
    },
    /// Declarative configuration is inconsistent
    Config(String),
    /// Identifiers registered as required were never found in the store
    UnresolvedDependencies {
        entity: String,
        ids: Vec<RecordId>,
    },
    /// A reference left the extracted/loaded set and the field's policy is `error`
    OutsideLookup {
        entity: String,
        record_id: String,
        field: String,
        value: String,
    },
    /// The `recurse` outside-lookup policy was selected for a field that needed it
    RecurseUnsupported {
        entity: String,
        field: String,
    },
    /// Self-lookup tracing did not reach a fixed point within the pass limit
    SelfLookupLimit {
        entity: String,
        passes: usize,
    },
    /// An old identifier was already mapped to a different new identifier
    DuplicateTranslation {
        old: RecordId,
        existing: RecordId,
        attempted: RecordId,
    },
    /// The record store failed as a whole (not a single record)
    Store(String),
    /// A field transform failed while writing extracted records
    Transform(TransformError),
    Io(std::io::Error),
    Serialization(String),
}

impl fmt::Display for MigrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationError::InvalidIdentifier(value) => {
                write!(f, "Invalid record identifier '{}': identifiers must be 15 or 18 alphanumeric characters", value)
            }
            MigrationError::UnknownEntityType(name) => write!(f, "Unknown entity type: {}", name),
            MigrationError::UnknownField { entity, field } => {
                write!(f, "Field {}.{} does not exist", entity, field)
            }
            MigrationError::UnsupportedFieldKind { entity, field, kind } => {
                write!(f, "Field {}.{} has unsupported kind '{}'", entity, field, kind)
            }
            MigrationError::Config(msg) => write!(f, "Configuration error: {}", msg),
            MigrationError::UnresolvedDependencies { entity, ids } => {
                let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
                write!(
                    f,
                    "Unable to resolve dependencies for {}. The following Ids could not be found: {}",
                    entity,
                    ids.join(", ")
                )
            }
            MigrationError::OutsideLookup { entity, record_id, field, value } => write!(
                f,
                "{} {} has an outside reference in field {} ({}), which is not allowed by the configuration",
                entity, record_id, field, value
            ),
            MigrationError::RecurseUnsupported { entity, field } => write!(
                f,
                "Outside-lookup behavior 'recurse' is not supported (field {}.{})",
                entity, field
            ),
            MigrationError::SelfLookupLimit { entity, passes } => write!(
                f,
                "Self-lookup tracing for {} did not converge after {} passes",
                entity, passes
            ),
            MigrationError::DuplicateTranslation { old, existing, attempted } => write!(
                f,
                "Identifier {} is already mapped to {}; refusing to remap it to {}",
                old, existing, attempted
            ),
            MigrationError::Store(msg) => write!(f, "Store error: {}", msg),
            MigrationError::Transform(e) => write!(f, "Transform error: {}", e),
            MigrationError::Io(e) => write!(f, "IO error: {}", e),
            MigrationError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for MigrationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MigrationError::Io(e) => Some(e),
            MigrationError::Transform(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for MigrationError {
    fn from(err: std::io::Error) -> Self {
        MigrationError::Io(err)
    }
}

impl From<TransformError> for MigrationError {
    fn from(err: TransformError) -> Self {
        MigrationError::Transform(err)
    }
}

impl From<serde_json::Error> for MigrationError {
    fn from(err: serde_json::Error) -> Self {
        MigrationError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for MigrationError {
    fn from(err: serde_yaml::Error) -> Self {
        MigrationError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolved_dependencies_lists_ids() {
        let err = MigrationError::UnresolvedDependencies {
            entity: "Account".to_string(),
            ids: vec![RecordId::parse("001000000000000").unwrap()],
        };

        let msg = err.to_string();
        assert!(msg.contains("Account"));
        assert!(msg.contains("001000000000000AAA"));
    }

    #[test]
    fn test_io_error_has_source() {
        let err = MigrationError::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(std::error::Error::source(&err).is_some());
    }
}

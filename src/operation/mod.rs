//! Multi-step extraction and load operations.
//!
//! An operation owns an ordered list of steps, one per entity type, and the
//! registries those steps share. Steps run strictly in the order they were
//! added; the order also decides how each lookup field is classified (see
//! [`classify`](crate::classify::classify)).

pub mod context;
pub mod extract;
pub mod load;
pub mod report;
pub mod state;
pub mod translation;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use context::{OperationContext, OperationOptions};
pub use extract::{ExtractOperation, ExtractionRegistry, ExtractionScope, ExtractionStep};
pub use load::{LoadOperation, LoadStep};
pub use report::{EntityCounts, OperationReport, StepErrors};
pub use state::{LoadStage, RunState};
pub use translation::IdTranslationTable;

/// Whether self-lookup values are followed during extraction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelfLookupBehavior {
    /// Pull every parent and child reachable through the field
    #[default]
    TraceAll,
    /// Carry the value without pulling the referenced record
    TraceNone,
}

/// What to do with a reference that points at a record outside the operation's data set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutsideLookupBehavior {
    /// Remove the field from the record
    DropField,
    /// Keep the original value unchanged
    #[default]
    Include,
    /// Abort the operation
    Error,
    /// Pull the referenced record; not supported and always fails
    Recurse,
}

impl fmt::Display for SelfLookupBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelfLookupBehavior::TraceAll => write!(f, "trace-all"),
            SelfLookupBehavior::TraceNone => write!(f, "trace-none"),
        }
    }
}

impl fmt::Display for OutsideLookupBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutsideLookupBehavior::DropField => write!(f, "drop-field"),
            OutsideLookupBehavior::Include => write!(f, "include"),
            OutsideLookupBehavior::Error => write!(f, "error"),
            OutsideLookupBehavior::Recurse => write!(f, "recurse"),
        }
    }
}

/// A per-field lookup behavior override, of either kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LookupBehavior {
    SelfLookup(SelfLookupBehavior),
    Outside(OutsideLookupBehavior),
}

impl fmt::Display for LookupBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupBehavior::SelfLookup(b) => b.fmt(f),
            LookupBehavior::Outside(b) => b.fmt(f),
        }
    }
}

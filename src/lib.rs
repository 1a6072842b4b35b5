//! # Skein: relational data migration between record stores
//!
//! Skein copies a connected subset of records out of one store and loads it
//! into another, preserving the references between records. Stores assign
//! their own identifiers on insert, so every reference is rewritten through an
//! old-to-new translation table as the load proceeds.
//!
//! ## Features
//!
//! - **Dependency-aware extraction**: start from all records, a query, selected
//!   ids or the descendants of earlier steps, and pull in whatever the
//!   extracted records reference
//! - **Two-phase load**: insert records in step order, then patch the
//!   references that could not be resolved at insert time (self references and
//!   cycles between entity types)
//! - **Resumable runs**: the translation table and stage are saved as a state
//!   file, so an interrupted load continues where it stopped
//! - **Transform registry**: rename columns and run named value transforms on
//!   the way out or in
//!
//! ## Example operation
//!
//! ```yaml
//! version: 1
//! operation:
//!   - entity: Account
//!     field-group: smart
//!     extract: {query: "Industry = 'Energy'"}
//!     file: Account.ndjson
//!   - entity: Contact
//!     fields: [FirstName, LastName, AccountId, ReportsToId]
//!     extract: {descendants: true}
//!     file: Contact.ndjson
//!     lookup-behaviors: {ReportsToId: trace-none}
//! ```

pub mod batch;
pub mod classify;
pub mod config;
pub mod error;
pub mod identifier;
pub mod io;
pub mod operation;
pub mod record;
pub mod schema;
pub mod store;
pub mod transform;
pub mod value;

pub use classify::{classify, LookupClassification};
pub use config::{OperationConfig, StepConfig};
pub use error::{MigrationError, Result};
pub use identifier::RecordId;
pub use record::{Record, ID_FIELD};
pub use schema::{EntitySchema, FieldDescriptor, FieldGroup, FieldKind};
pub use transform::{DataMapper, TransformError, TransformFn, TransformRegistry, TransformSpec};
pub use value::FieldValue;

pub use io::{LoadResult, NdjsonFileSource, NdjsonWriter, RecordSink, RecordSource, ResultSink};
pub use operation::{
    ExtractOperation, ExtractionScope, ExtractionStep, IdTranslationTable, LoadOperation, LoadStep,
    LoadStage, OperationReport, OutsideLookupBehavior, RunState, SelfLookupBehavior,
};
pub use store::{BulkInsert, BulkQuery, BulkUpdate, MemoryStore, RecordStore, SchemaCatalog};

//! Record store capabilities consumed by the extraction and load engines.
//!
//! Each capability is its own trait so an operation only asks for what it
//! uses: extraction needs [`SchemaCatalog`] and [`BulkQuery`], load needs
//! [`SchemaCatalog`], [`BulkInsert`] and [`BulkUpdate`]. A remote client is
//! wrapped by a thin adapter implementing these traits; [`MemoryStore`] is the
//! in-process implementation used by the CLI and the tests.

pub mod memory;

use std::collections::HashMap;
use std::fmt;

use crate::batch::encode_id_list;
use crate::error::Result;
use crate::identifier::RecordId;
use crate::record::Record;
use crate::schema::EntitySchema;

pub use memory::{MemoryStore, StoreSnapshot};

/// Which records of an entity a bulk query returns
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Every record
    All,
    /// A store-specific filter expression, passed through untouched
    Filter(String),
    /// Records whose `field` holds one of `ids`
    IdIn { field: String, ids: Vec<RecordId> },
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::All => Ok(()),
            Predicate::Filter(expr) => write!(f, "{}", expr),
            Predicate::IdIn { field, ids } => write!(f, "{} IN ({})", field, encode_id_list(ids)),
        }
    }
}

/// Outcome of inserting one record: the new identifier or the store's message
pub type InsertOutcome = std::result::Result<RecordId, String>;

/// Outcome of updating one record
pub type UpdateOutcome = std::result::Result<(), String>;

/// Describes entity types
pub trait SchemaCatalog {
    /// Field descriptors and key prefix of `entity`.
    fn describe(&self, entity: &str) -> Result<EntitySchema>;

    /// Key prefix → entity type for every type the store knows.
    fn key_prefixes(&self) -> Result<HashMap<String, String>>;
}

/// Reads records in bulk
pub trait BulkQuery {
    /// Fetch `fields` of every record of `entity` matching `predicate`.
    fn query(&self, entity: &str, fields: &[String], predicate: &Predicate) -> Result<Vec<Record>>;
}

/// Creates records in bulk
pub trait BulkInsert {
    /// Insert `records`; one outcome per input record, in input order.
    ///
    /// `Err` is reserved for failures of the call as a whole.
    fn insert(&self, entity: &str, records: Vec<Record>) -> Result<Vec<InsertOutcome>>;
}

/// Updates records in bulk
pub trait BulkUpdate {
    /// Update `records`, each keyed by its `Id` field; one outcome per record, in order.
    fn update(&self, entity: &str, records: Vec<Record>) -> Result<Vec<UpdateOutcome>>;
}

/// Every capability at once
pub trait RecordStore: SchemaCatalog + BulkQuery + BulkInsert + BulkUpdate {}

impl<T: SchemaCatalog + BulkQuery + BulkInsert + BulkUpdate + ?Sized> RecordStore for T {}

impl<T: SchemaCatalog + ?Sized> SchemaCatalog for &T {
    fn describe(&self, entity: &str) -> Result<EntitySchema> {
        (**self).describe(entity)
    }

    fn key_prefixes(&self) -> Result<HashMap<String, String>> {
        (**self).key_prefixes()
    }
}

impl<T: BulkQuery + ?Sized> BulkQuery for &T {
    fn query(&self, entity: &str, fields: &[String], predicate: &Predicate) -> Result<Vec<Record>> {
        (**self).query(entity, fields, predicate)
    }
}

impl<T: BulkInsert + ?Sized> BulkInsert for &T {
    fn insert(&self, entity: &str, records: Vec<Record>) -> Result<Vec<InsertOutcome>> {
        (**self).insert(entity, records)
    }
}

impl<T: BulkUpdate + ?Sized> BulkUpdate for &T {
    fn update(&self, entity: &str, records: Vec<Record>) -> Result<Vec<UpdateOutcome>> {
        (**self).update(entity, records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicate_display() {
        let ids = vec![
            RecordId::parse("001000000000000").unwrap(),
            RecordId::parse("001000000000001").unwrap(),
        ];
        let predicate = Predicate::IdIn {
            field: "ParentId".to_string(),
            ids,
        };

        assert_eq!(
            predicate.to_string(),
            "ParentId IN ('001000000000000AAA', '001000000000001AAA')"
        );
        assert_eq!(Predicate::All.to_string(), "");
    }
}

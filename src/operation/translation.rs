//! Old-to-new identifier mapping built up while loading.

use std::collections::BTreeMap;

use crate::error::{MigrationError, Result};
use crate::identifier::RecordId;

/// Append-only map from source identifiers to the identifiers assigned by the
/// target store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdTranslationTable {
    map: BTreeMap<RecordId, RecordId>,
}

impl IdTranslationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `old` was inserted as `new`.
    ///
    /// Registering the same pair twice is a no-op; mapping `old` to a different
    /// identifier is an error and leaves the table untouched.
    pub fn register(&mut self, old: RecordId, new: RecordId) -> Result<()> {
        match self.map.get(&old) {
            Some(existing) if *existing == new => Ok(()),
            Some(existing) => Err(MigrationError::DuplicateTranslation {
                old,
                existing: existing.clone(),
                attempted: new,
            }),
            None => {
                self.map.insert(old, new);
                Ok(())
            }
        }
    }

    pub fn translate(&self, old: &RecordId) -> Option<&RecordId> {
        self.map.get(old)
    }

    pub fn contains(&self, old: &RecordId) -> bool {
        self.map.contains_key(old)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RecordId, &RecordId)> {
        self.map.iter()
    }

    pub(crate) fn to_map(&self) -> BTreeMap<RecordId, RecordId> {
        self.map.clone()
    }
}

impl From<BTreeMap<RecordId, RecordId>> for IdTranslationTable {
    fn from(map: BTreeMap<RecordId, RecordId>) -> Self {
        Self { map }
    }
}

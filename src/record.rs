//! Ordered field-name → value records.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, Result};
use crate::identifier::RecordId;
use crate::value::FieldValue;

/// Name of the identifier field every stored record carries
pub const ID_FIELD: &str = "Id";

/// A single record, with fields kept in insertion order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: IndexMap<String, FieldValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, used mostly by tests and fixtures.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Remove a field, keeping the order of the remaining ones.
    pub fn remove(&mut self, field: &str) -> Option<FieldValue> {
        self.fields.shift_remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter()
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&str, &FieldValue) -> bool) {
        self.fields.retain(|k, v| keep(k, v));
    }

    /// The raw text of the `Id` field, if any
    pub fn raw_id(&self) -> Option<&str> {
        self.get(ID_FIELD).and_then(FieldValue::as_str)
    }

    /// The parsed identifier of this record.
    pub fn id(&self) -> Result<RecordId> {
        let raw = self
            .raw_id()
            .ok_or_else(|| MigrationError::InvalidIdentifier(String::new()))?;
        RecordId::parse(raw)
    }

    /// Non-blank text value of a lookup field
    pub fn lookup(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_str)
    }

    /// Parsed identifier held in a lookup field, `None` when blank.
    pub fn lookup_id(&self, field: &str) -> Result<Option<RecordId>> {
        self.lookup(field).map(RecordId::parse).transpose()
    }

    /// A copy restricted to `fields`, in the order given.
    pub fn project<'a>(&self, fields: impl IntoIterator<Item = &'a String>) -> Record {
        let mut out = Record::new();
        for field in fields {
            let value = self.get(field).cloned().unwrap_or(FieldValue::Null);
            out.insert(field.clone(), value);
        }
        out
    }
}

impl FromIterator<(String, FieldValue)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, FieldValue)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Record {
    type Item = (String, FieldValue);
    type IntoIter = indexmap::map::IntoIter<String, FieldValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

//! In-process record store.
//!
//! Holds schemas and records in memory and can be saved to / loaded from a
//! YAML or JSON snapshot file. Inserts and updates apply the checks a real
//! store would (editability, required fields, cross-reference validity) and
//! report violations per record rather than failing the whole call.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, Result};
use crate::identifier::RecordId;
use crate::record::{Record, ID_FIELD};
use crate::schema::{EntitySchema, FieldKind};
use crate::store::{BulkInsert, BulkQuery, BulkUpdate, InsertOutcome, Predicate, SchemaCatalog, UpdateOutcome};
use crate::value::FieldValue;

/// Serializable contents of a [`MemoryStore`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StoreSnapshot {
    pub entities: Vec<EntitySchema>,
    #[serde(default)]
    pub records: IndexMap<String, Vec<Record>>,
    /// Counter used to mint identifiers for inserted records
    #[serde(default)]
    pub next_id: u64,
}

impl StoreSnapshot {
    fn schema(&self, entity: &str) -> Result<&EntitySchema> {
        self.entities
            .iter()
            .find(|e| e.name == entity)
            .ok_or_else(|| MigrationError::UnknownEntityType(entity.to_string()))
    }

    fn contains_id(&self, entity: &str, id: &RecordId) -> bool {
        self.records
            .get(entity)
            .map(|records| records.iter().any(|r| r.id().ok().as_ref() == Some(id)))
            .unwrap_or(false)
    }

    fn mint_id(&mut self, key_prefix: &str) -> Result<RecordId> {
        self.next_id += 1;
        RecordId::parse(&format!("{}N{:011}", key_prefix, self.next_id))
    }
}

/// Record store kept entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RefCell<StoreSnapshot>,
}

impl MemoryStore {
    pub fn new(entities: Vec<EntitySchema>) -> Self {
        Self::from_snapshot(StoreSnapshot {
            entities,
            ..Default::default()
        })
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            inner: RefCell::new(snapshot),
        }
    }

    /// Load a snapshot file; `.json` files are read as JSON, anything else as YAML.
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let snapshot: StoreSnapshot = if is_json(path) {
            serde_json::from_str(&contents)?
        } else {
            serde_yaml::from_str(&contents)?
        };
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn save_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let snapshot = self.inner.borrow();
        let contents = if is_json(path) {
            serde_json::to_string_pretty(&*snapshot)?
        } else {
            serde_yaml::to_string(&*snapshot)?
        };
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.inner.borrow().clone()
    }

    /// Add a record as-is, keeping its `Id`. Used to seed source data.
    pub fn seed(&self, entity: &str, record: Record) -> Result<RecordId> {
        let mut inner = self.inner.borrow_mut();
        inner.schema(entity)?;
        let id = record.id()?;
        inner.records.entry(entity.to_string()).or_default().push(record);
        Ok(id)
    }

    /// Every record of `entity`, in insertion order.
    pub fn records(&self, entity: &str) -> Vec<Record> {
        self.inner.borrow().records.get(entity).cloned().unwrap_or_default()
    }

    pub fn get(&self, entity: &str, id: &RecordId) -> Option<Record> {
        self.inner
            .borrow()
            .records
            .get(entity)
            .and_then(|records| records.iter().find(|r| r.id().ok().as_ref() == Some(id)).cloned())
    }
}

pub(crate) fn is_json(path: &Path) -> bool {
    path.extension().map(|ext| ext == "json").unwrap_or(false)
}

impl SchemaCatalog for MemoryStore {
    fn describe(&self, entity: &str) -> Result<EntitySchema> {
        self.inner.borrow().schema(entity).cloned()
    }

    fn key_prefixes(&self) -> Result<HashMap<String, String>> {
        Ok(self
            .inner
            .borrow()
            .entities
            .iter()
            .map(|e| (e.key_prefix.clone(), e.name.clone()))
            .collect())
    }
}

impl BulkQuery for MemoryStore {
    fn query(&self, entity: &str, fields: &[String], predicate: &Predicate) -> Result<Vec<Record>> {
        let inner = self.inner.borrow();
        let schema = inner.schema(entity)?;
        for field in fields {
            if !schema.has_field(field) {
                return Err(MigrationError::UnknownField {
                    entity: entity.to_string(),
                    field: field.clone(),
                });
            }
        }

        let filter = match predicate {
            Predicate::Filter(expr) => Some(Filter::parse(expr)?),
            _ => None,
        };

        let Some(records) = inner.records.get(entity) else {
            return Ok(Vec::new());
        };

        let mut results = Vec::new();
        for record in records {
            let matches = match predicate {
                Predicate::All => true,
                Predicate::Filter(_) => filter.as_ref().map(|f| f.matches(record)).unwrap_or(true),
                Predicate::IdIn { field, ids } => match record.lookup_id(field) {
                    Ok(Some(id)) => ids.contains(&id),
                    _ => false,
                },
            };
            if matches {
                results.push(record.project(fields));
            }
        }

        Ok(results)
    }
}

impl BulkInsert for MemoryStore {
    fn insert(&self, entity: &str, records: Vec<Record>) -> Result<Vec<InsertOutcome>> {
        let mut inner = self.inner.borrow_mut();
        let schema = inner.schema(entity)?.clone();

        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            if let Err(msg) = check_write(&inner, &schema, &record, true) {
                outcomes.push(Err(msg));
                continue;
            }

            let id = inner.mint_id(&schema.key_prefix)?;
            let mut stored = Record::new().with(ID_FIELD, id.as_str());
            for (field, value) in record {
                stored.insert(field, value);
            }
            inner.records.entry(entity.to_string()).or_default().push(stored);
            outcomes.push(Ok(id));
        }

        Ok(outcomes)
    }
}

impl BulkUpdate for MemoryStore {
    fn update(&self, entity: &str, records: Vec<Record>) -> Result<Vec<UpdateOutcome>> {
        let mut inner = self.inner.borrow_mut();
        let schema = inner.schema(entity)?.clone();

        let mut outcomes = Vec::with_capacity(records.len());
        for mut record in records {
            let id = match record.id() {
                Ok(id) => id,
                Err(e) => {
                    outcomes.push(Err(e.to_string()));
                    continue;
                }
            };
            record.remove(ID_FIELD);

            if let Err(msg) = check_write(&inner, &schema, &record, false) {
                outcomes.push(Err(msg));
                continue;
            }

            let target = inner
                .records
                .get_mut(entity)
                .and_then(|rs| rs.iter_mut().find(|r| r.id().ok().as_ref() == Some(&id)));

            match target {
                Some(stored) => {
                    for (field, value) in record {
                        stored.insert(field, value);
                    }
                    outcomes.push(Ok(()));
                }
                None => outcomes.push(Err(format!("Record {} does not exist", id))),
            }
        }

        Ok(outcomes)
    }
}

/// Per-record validation shared by insert and update.
fn check_write(
    snapshot: &StoreSnapshot,
    schema: &EntitySchema,
    record: &Record,
    creating: bool,
) -> std::result::Result<(), String> {
    for (name, value) in record.iter() {
        let field = schema
            .field(name)
            .ok_or_else(|| format!("No such field {}.{}", schema.name, name))?;

        if creating && !field.createable {
            return Err(format!("Field {} is not createable", name));
        }
        if !creating && !field.updateable {
            return Err(format!("Field {} is not updateable", name));
        }

        if field.kind == FieldKind::Reference && !value.is_blank() {
            let text = value.to_string();
            let valid = RecordId::parse(&text)
                .map(|id| field.reference_to.iter().any(|t| snapshot.contains_id(t, &id)))
                .unwrap_or(false);
            if !valid {
                return Err(format!("Invalid cross reference in {}: {}", name, text));
            }
        }
    }

    if creating {
        for field in &schema.fields {
            if field.nillable || !field.createable || field.kind == FieldKind::Boolean {
                continue;
            }
            let missing = record.get(&field.name).map(FieldValue::is_blank).unwrap_or(true);
            if missing {
                return Err(format!("Required field missing: {}", field.name));
            }
        }
    }

    Ok(())
}

/// Conjunction of `Field = 'value'` / `Field != null` clauses
#[derive(Debug)]
struct Filter {
    clauses: Vec<Clause>,
}

#[derive(Debug)]
struct Clause {
    field: String,
    negate: bool,
    value: Option<String>,
}

fn clause_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(\w+)\s*(=|!=)\s*(?:'((?:[^']|'')*)'|(?i:(null)))\s*$").expect("clause pattern is valid")
    })
}

fn and_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\s+AND\s+").expect("AND pattern is valid"))
}

impl Filter {
    fn parse(expr: &str) -> Result<Self> {
        let mut clauses = Vec::new();
        for part in and_pattern().split(expr.trim()) {
            let caps = clause_pattern().captures(part).ok_or_else(|| {
                MigrationError::Store(format!("Unsupported filter expression: {}", expr))
            })?;
            clauses.push(Clause {
                field: caps[1].to_string(),
                negate: &caps[2] == "!=",
                value: caps.get(3).map(|m| m.as_str().replace("''", "'")),
            });
        }
        Ok(Self { clauses })
    }

    fn matches(&self, record: &Record) -> bool {
        self.clauses.iter().all(|clause| {
            let actual = record.get(&clause.field).cloned().unwrap_or(FieldValue::Null);
            let equal = match &clause.value {
                Some(expected) => !actual.is_blank() && actual.to_string() == *expected,
                None => actual.is_blank(),
            };
            equal != clause.negate
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDescriptor;

    fn store() -> MemoryStore {
        let store = MemoryStore::new(vec![EntitySchema::new(
            "Account",
            "001",
            vec![
                FieldDescriptor::id(),
                FieldDescriptor::new("Name", FieldKind::String).required(),
                FieldDescriptor::new("Industry", FieldKind::String),
                FieldDescriptor::reference("ParentId", &["Account"]),
            ],
        )]);
        store
            .seed(
                "Account",
                Record::new().with("Id", "001000000000001").with("Name", "Alpha").with("Industry", "Energy"),
            )
            .unwrap();
        store
            .seed(
                "Account",
                Record::new()
                    .with("Id", "001000000000002")
                    .with("Name", "Beta")
                    .with("ParentId", "001000000000001"),
            )
            .unwrap();
        store
    }

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_query_projects_fields() {
        let store = store();
        let results = store.query("Account", &fields(&["Id", "Name"]), &Predicate::All).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].len(), 2);
        assert_eq!(results[0].get("Name"), Some(&FieldValue::text("Alpha")));
    }

    #[test]
    fn test_query_by_id_set_on_lookup_field() {
        let store = store();
        let predicate = Predicate::IdIn {
            field: "ParentId".to_string(),
            ids: vec![RecordId::parse("001000000000001").unwrap()],
        };
        let results = store.query("Account", &fields(&["Id"]), &predicate).unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].raw_id(), Some("001000000000002"));
    }

    #[test]
    fn test_filter_expressions() {
        let store = store();
        let by_name = Predicate::Filter("Name = 'Beta'".to_string());
        assert_eq!(store.query("Account", &fields(&["Id"]), &by_name).unwrap().len(), 1);

        let with_parent = Predicate::Filter("ParentId != null AND Name != 'Alpha'".to_string());
        assert_eq!(store.query("Account", &fields(&["Id"]), &with_parent).unwrap().len(), 1);

        let bogus = Predicate::Filter("Name LIKE 'B%'".to_string());
        assert!(store.query("Account", &fields(&["Id"]), &bogus).is_err());
    }

    #[test]
    fn test_insert_reports_per_record_failures() {
        let store = store();
        let outcomes = store
            .insert(
                "Account",
                vec![
                    Record::new().with("Name", "Gamma"),
                    Record::new().with("Industry", "Retail"),
                    Record::new().with("Name", "Delta").with("ParentId", "001000000000099"),
                ],
            )
            .unwrap();

        assert!(outcomes[0].is_ok());
        assert_eq!(outcomes[1], Err("Required field missing: Name".to_string()));
        assert!(outcomes[2].as_ref().unwrap_err().contains("Invalid cross reference"));
        assert_eq!(store.records("Account").len(), 3);
    }

    #[test]
    fn test_update_applies_fields() {
        let store = store();
        let id = RecordId::parse("001000000000001").unwrap();
        let outcomes = store
            .update(
                "Account",
                vec![Record::new().with("Id", id.as_str()).with("ParentId", "001000000000002")],
            )
            .unwrap();

        assert_eq!(outcomes, vec![Ok(())]);
        let stored = store.get("Account", &id).unwrap();
        assert_eq!(stored.lookup("ParentId"), Some("001000000000002"));
    }

    #[test]
    fn test_snapshot_file_round_trip() {
        let store = store();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.yaml");

        store.save_file(&path).unwrap();
        let reloaded = MemoryStore::load_file(&path).unwrap();

        assert_eq!(reloaded.snapshot(), store.snapshot());
    }
}

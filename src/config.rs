//! YAML operation definitions.
//!
//! One file describes an ordered list of entity steps and can build either an
//! [`ExtractOperation`] or a [`LoadOperation`] from it:
//!
//! ```yaml
//! version: 1
//! operation:
//!   - entity: Account
//!     fields: [Name, ParentId, {field: Industry, column: Sector, transforms: [strip]}]
//!     extract: {all: true}
//!     file: Account.ndjson
//!     result-file: Account.results.ndjson
//!   - entity: Contact
//!     field-group: smart
//!     extract: {descendants: true}
//!     file: Contact.ndjson
//!     lookup-behaviors: {ReportsToId: trace-none}
//! ```
//!
//! Relative file paths are resolved against the directory holding the
//! configuration file.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MigrationError, Result};
use crate::identifier::RecordId;
use crate::io::{NdjsonFileSource, NdjsonWriter, RecordSink, RecordSource, ResultSink};
use crate::operation::{
    ExtractOperation, ExtractionScope, ExtractionStep, LoadOperation, LoadStep, LookupBehavior, OperationOptions,
    OutsideLookupBehavior, SelfLookupBehavior,
};
use crate::record::ID_FIELD;
use crate::schema::{EntitySchema, FieldGroup};
use crate::store::{BulkInsert, BulkQuery, BulkUpdate, SchemaCatalog};
use crate::transform::{DataMapper, TransformRegistry, TransformSpec};

const CONFIG_VERSION: u32 = 1;

/// A complete operation definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct OperationConfig {
    pub version: u32,
    #[serde(default)]
    pub options: OptionsConfig,
    pub operation: Vec<StepConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct OptionsConfig {
    pub max_filter_length: Option<usize>,
    pub max_self_lookup_passes: Option<usize>,
}

/// One entity step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct StepConfig {
    pub entity: String,
    pub fields: Option<Vec<FieldEntry>>,
    pub field_group: Option<FieldGroup>,
    pub extract: Option<ExtractConfig>,
    pub file: PathBuf,
    pub result_file: Option<PathBuf>,
    #[serde(default)]
    pub self_lookup_behavior: SelfLookupBehavior,
    #[serde(default)]
    pub outside_lookup_behavior: OutsideLookupBehavior,
    #[serde(default)]
    pub lookup_behaviors: BTreeMap<String, LookupBehavior>,
    #[serde(default)]
    pub input_validation: InputValidation,
}

/// A field in scope, optionally written under another column name and transformed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldEntry {
    Name(String),
    Mapped {
        field: String,
        #[serde(default)]
        column: Option<String>,
        #[serde(default)]
        transforms: Vec<TransformSpec>,
    },
}

impl FieldEntry {
    pub fn field(&self) -> &str {
        match self {
            FieldEntry::Name(name) => name,
            FieldEntry::Mapped { field, .. } => field,
        }
    }

    /// File column holding this field
    pub fn column(&self) -> &str {
        match self {
            FieldEntry::Mapped {
                column: Some(column), ..
            } => column,
            _ => self.field(),
        }
    }

    fn transforms(&self) -> &[TransformSpec] {
        match self {
            FieldEntry::Name(_) => &[],
            FieldEntry::Mapped { transforms, .. } => transforms,
        }
    }
}

/// Starting scope of an extraction step; exactly one key is set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ExtractConfig {
    #[serde(default)]
    pub all: bool,
    pub query: Option<String>,
    pub ids: Option<Vec<String>>,
    #[serde(default)]
    pub descendants: bool,
}

/// How strictly a load input file's columns are checked against the field scope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputValidation {
    /// Exact match for field lists, subset for field groups
    #[default]
    Default,
    /// Exact match always
    Strict,
    None,
}

impl ExtractConfig {
    fn scope(&self, entity: &str) -> Result<ExtractionScope> {
        let chosen = [self.all, self.query.is_some(), self.ids.is_some(), self.descendants]
            .iter()
            .filter(|set| **set)
            .count();
        if chosen != 1 {
            return Err(MigrationError::Config(format!(
                "Step {}: 'extract' must set exactly one of all, query, ids or descendants",
                entity
            )));
        }

        Ok(if self.all {
            ExtractionScope::AllRecords
        } else if let Some(query) = &self.query {
            ExtractionScope::Query(query.clone())
        } else if self.ids.is_some() {
            ExtractionScope::SelectedRecords
        } else {
            ExtractionScope::Descendants
        })
    }

    fn selected_ids(&self) -> Result<Vec<RecordId>> {
        self.ids
            .iter()
            .flatten()
            .map(|raw| RecordId::parse(raw))
            .collect()
    }
}

impl StepConfig {
    /// Field names in scope, `Id` excluded
    pub fn field_scope(&self, schema: &EntitySchema, for_load: bool) -> Result<Vec<String>> {
        match (&self.fields, self.field_group) {
            (Some(fields), None) => Ok(fields
                .iter()
                .map(|f| f.field().to_string())
                .filter(|f| f != ID_FIELD)
                .collect()),
            (None, Some(group)) => Ok(schema
                .field_group(group, for_load)
                .into_iter()
                .filter(|f| f != ID_FIELD)
                .collect()),
            _ => Err(MigrationError::Config(format!(
                "Step {}: exactly one of 'fields' or 'field-group' is required",
                self.entity
            ))),
        }
    }

    fn entries(&self) -> &[FieldEntry] {
        self.fields.as_deref().unwrap_or(&[])
    }

    /// Mapper from field names to file columns
    fn extraction_mapper(&self, registry: &Arc<TransformRegistry>) -> Result<Option<DataMapper>> {
        let mut mapper = DataMapper::new(Arc::clone(registry));
        for entry in self.entries() {
            if entry.column() != entry.field() {
                mapper = mapper.rename(entry.field(), entry.column());
            }
            for spec in entry.transforms() {
                mapper = mapper.transform(entry.field(), spec.clone())?;
            }
        }
        Ok(if mapper.is_identity() { None } else { Some(mapper) })
    }

    /// Mapper from file columns to field names
    fn load_mapper(&self, registry: &Arc<TransformRegistry>) -> Result<Option<DataMapper>> {
        let mut mapper = DataMapper::new(Arc::clone(registry));
        for entry in self.entries() {
            if entry.column() != entry.field() {
                mapper = mapper.rename(entry.column(), entry.field());
            }
            for spec in entry.transforms() {
                mapper = mapper.transform(entry.column(), spec.clone())?;
            }
        }
        Ok(if mapper.is_identity() { None } else { Some(mapper) })
    }

    fn validate_input_columns(
        &self,
        source: &dyn RecordSource,
        mapper: Option<&DataMapper>,
        schema: &EntitySchema,
        scope: &[String],
    ) -> Result<()> {
        if self.input_validation == InputValidation::None {
            return Ok(());
        }

        let columns: BTreeSet<String> = source
            .columns(&self.entity)?
            .into_iter()
            .filter(|c| c != ID_FIELD)
            .map(|c| match mapper {
                Some(m) => m.map_key(&c).to_string(),
                None => c,
            })
            .collect();
        let scope: BTreeSet<String> = scope.iter().cloned().collect();

        let subset_allowed = self.field_group.is_some() && self.input_validation == InputValidation::Default;
        if subset_allowed {
            // A `smart` load file was most likely extracted as `readable`.
            let allowed: BTreeSet<String> = match self.field_group {
                Some(FieldGroup::Smart) => schema.field_group(FieldGroup::Readable, false).into_iter().collect(),
                _ => scope,
            };
            let extra: Vec<&String> = columns.difference(&allowed).collect();
            if !extra.is_empty() {
                return Err(MigrationError::Config(format!(
                    "Input file for {} contains columns not mapped to fields in scope: {}",
                    self.entity,
                    join(extra)
                )));
            }
            return Ok(());
        }

        if columns != scope {
            let extra: Vec<&String> = columns.difference(&scope).collect();
            let missing: Vec<&String> = scope.difference(&columns).collect();
            return Err(MigrationError::Config(format!(
                "Input file for {} does not match the field scope (unexpected columns: {}; missing fields: {})",
                self.entity,
                join(extra),
                join(missing)
            )));
        }
        Ok(())
    }
}

fn join(items: Vec<&String>) -> String {
    if items.is_empty() {
        return "none".to_string();
    }
    items.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
}

impl OperationConfig {
    /// Parse a configuration document; relative paths stay as written.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: OperationConfig = serde_yaml::from_str(contents)?;

        if config.version != CONFIG_VERSION {
            return Err(MigrationError::Config(format!(
                "Unsupported configuration version {}",
                config.version
            )));
        }
        if config.operation.is_empty() {
            return Err(MigrationError::Config("Operation has no steps".to_string()));
        }
        Ok(config)
    }

    /// Load a configuration file, resolving relative paths against its directory.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            MigrationError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let mut config = Self::parse(&contents)?;
        if let Some(base) = path.parent() {
            for step in &mut config.operation {
                step.file = resolve(base, &step.file);
                step.result_file = step.result_file.as_ref().map(|p| resolve(base, p));
            }
        }
        debug!("Loaded operation with {} steps from {}", config.operation.len(), path.display());
        Ok(config)
    }

    pub fn options(&self) -> OperationOptions {
        let defaults = OperationOptions::default();
        OperationOptions {
            max_filter_length: self.options.max_filter_length.unwrap_or(defaults.max_filter_length),
            max_self_lookup_passes: self
                .options
                .max_self_lookup_passes
                .unwrap_or(defaults.max_self_lookup_passes),
        }
    }

    /// Build an initialized extraction writing each step to its NDJSON `file`.
    pub fn build_extraction<S: SchemaCatalog + BulkQuery>(
        &self,
        store: S,
        registry: Arc<TransformRegistry>,
    ) -> Result<ExtractOperation<S>> {
        self.build_extraction_with(store, registry, |step| {
            Ok(Box::new(NdjsonWriter::create(&step.file)?) as Box<dyn RecordSink>)
        })
    }

    /// Build an initialized extraction with caller-supplied sinks.
    pub fn build_extraction_with<S, F>(
        &self,
        store: S,
        registry: Arc<TransformRegistry>,
        mut sink_for: F,
    ) -> Result<ExtractOperation<S>>
    where
        S: SchemaCatalog + BulkQuery,
        F: FnMut(&StepConfig) -> Result<Box<dyn RecordSink>>,
    {
        let schemas = self.describe_all(&store)?;
        let mut op = ExtractOperation::with_options(store, self.options());
        let mut selected = Vec::new();

        for (entry, schema) in self.operation.iter().zip(&schemas) {
            let extract = entry.extract.as_ref().ok_or_else(|| {
                MigrationError::Config(format!("Step {}: 'extract' is required for extraction", entry.entity))
            })?;
            let scope = extract.scope(&entry.entity)?;
            let fields = entry.field_scope(schema, false)?;

            let mut step = ExtractionStep::new(entry.entity.clone(), scope, fields, sink_for(entry)?)
                .with_self_lookup_behavior(entry.self_lookup_behavior)
                .with_outside_lookup_behavior(entry.outside_lookup_behavior);
            for (field, behavior) in &entry.lookup_behaviors {
                step = match behavior {
                    LookupBehavior::SelfLookup(b) => step.with_field_self_lookup_behavior(field.clone(), *b),
                    LookupBehavior::Outside(b) => step.with_field_outside_lookup_behavior(field.clone(), *b),
                };
            }
            if let Some(mapper) = entry.extraction_mapper(&registry)? {
                step = step.with_mapper(mapper);
            }

            op.add_step(step)?;
            for id in extract.selected_ids()? {
                selected.push((entry.entity.clone(), id));
            }
        }

        for (entity, id) in selected {
            op.add_dependency(&entity, id)?;
        }
        op.initialize()?;
        Ok(op)
    }

    /// Build an initialized load reading each step's NDJSON `file`. Result
    /// rows go to `result-file`, appended to when `append_results` is set.
    pub fn build_load<S: SchemaCatalog + BulkInsert + BulkUpdate>(
        &self,
        store: S,
        registry: Arc<TransformRegistry>,
        append_results: bool,
    ) -> Result<LoadOperation<S>> {
        self.build_load_with(store, registry, |step| match &step.result_file {
            Some(path) if append_results => Ok(Some(Box::new(NdjsonWriter::append(path)?) as Box<dyn ResultSink>)),
            Some(path) => Ok(Some(Box::new(NdjsonWriter::create(path)?) as Box<dyn ResultSink>)),
            None => Ok(None),
        })
    }

    /// Build an initialized load with caller-supplied result sinks.
    pub fn build_load_with<S, F>(
        &self,
        store: S,
        registry: Arc<TransformRegistry>,
        mut results_for: F,
    ) -> Result<LoadOperation<S>>
    where
        S: SchemaCatalog + BulkInsert + BulkUpdate,
        F: FnMut(&StepConfig) -> Result<Option<Box<dyn ResultSink>>>,
    {
        let schemas = self.describe_all(&store)?;
        let mut op = LoadOperation::with_options(store, self.options());

        for (entry, schema) in self.operation.iter().zip(&schemas) {
            let fields = entry.field_scope(schema, true)?;
            let source = NdjsonFileSource::new(&entry.file);
            let mapper = entry.load_mapper(&registry)?;
            entry.validate_input_columns(&source, mapper.as_ref(), schema, &fields)?;

            let mut step = LoadStep::new(entry.entity.clone(), fields, Box::new(source))
                .with_outside_lookup_behavior(entry.outside_lookup_behavior);
            for (field, behavior) in &entry.lookup_behaviors {
                step = match behavior {
                    LookupBehavior::Outside(b) => step.with_field_outside_lookup_behavior(field.clone(), *b),
                    LookupBehavior::SelfLookup(b) => {
                        return Err(MigrationError::Config(format!(
                            "Lookup behavior '{}' specified for field {}.{} is not valid for this lookup type",
                            b, entry.entity, field
                        )))
                    }
                };
            }
            if let Some(mapper) = mapper {
                step = step.with_mapper(mapper);
            }
            if let Some(sink) = results_for(entry)? {
                step = step.with_result_sink(sink);
            }

            op.add_step(step)?;
        }

        op.initialize()?;
        Ok(op)
    }

    fn describe_all<S: SchemaCatalog>(&self, store: &S) -> Result<Vec<EntitySchema>> {
        self.operation.iter().map(|entry| store.describe(&entry.entity)).collect()
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemorySink;
    use crate::record::Record;
    use crate::schema::{FieldDescriptor, FieldKind};
    use crate::store::MemoryStore;

    fn store() -> MemoryStore {
        MemoryStore::new(vec![
            EntitySchema::new(
                "Account",
                "001",
                vec![
                    FieldDescriptor::id(),
                    FieldDescriptor::new("Name", FieldKind::String),
                    FieldDescriptor::new("Industry", FieldKind::Picklist),
                    FieldDescriptor::reference("ParentId", &["Account"]),
                    FieldDescriptor::new("Score", FieldKind::Double).read_only(),
                ],
            ),
            EntitySchema::new(
                "Contact",
                "003",
                vec![
                    FieldDescriptor::id(),
                    FieldDescriptor::new("LastName", FieldKind::String),
                    FieldDescriptor::reference("AccountId", &["Account"]),
                ],
            ),
        ])
    }

    fn registry() -> Arc<TransformRegistry> {
        Arc::new(TransformRegistry::with_builtins())
    }

    fn memory_sinks(_: &StepConfig) -> Result<Box<dyn RecordSink>> {
        Ok(Box::new(MemorySink::new()))
    }

    const EXTRACT: &str = r#"
version: 1
options:
  max-filter-length: 500
operation:
  - entity: Account
    fields:
      - Name
      - ParentId
      - field: Industry
        column: Sector
        transforms: [strip, {name: prefix, args: {value: "X-"}}]
    extract: {ids: ["001000000000000"]}
    file: Account.ndjson
  - entity: Contact
    field-group: readable
    extract: {descendants: true}
    file: Contact.ndjson
    outside-lookup-behavior: drop-field
"#;

    #[test]
    fn test_parse_and_build_extraction() {
        let config = OperationConfig::parse(EXTRACT).unwrap();
        assert_eq!(config.options().max_filter_length, 500);
        assert_eq!(config.options().max_self_lookup_passes, 1000);

        let op = config.build_extraction_with(store(), registry(), memory_sinks).unwrap();

        let steps = op.steps();
        assert_eq!(steps[0].fields(), &["Id", "Name", "ParentId", "Industry"]);
        assert_eq!(steps[0].scope(), &ExtractionScope::SelectedRecords);
        assert_eq!(steps[1].scope(), &ExtractionScope::Descendants);
        assert!(steps[1].lookups().is_descendant_lookup("AccountId"));
        assert_eq!(
            op.registry().dependencies("Account").into_iter().collect::<Vec<_>>(),
            vec![RecordId::parse("001000000000000").unwrap()]
        );
    }

    #[test]
    fn test_step_needs_exactly_one_field_source_and_scope() {
        let both = EXTRACT.replace("field-group: readable", "field-group: readable\n    fields: [LastName]");
        let config = OperationConfig::parse(&both).unwrap();
        assert!(matches!(
            config.build_extraction_with(store(), registry(), memory_sinks),
            Err(MigrationError::Config(_))
        ));

        let two_scopes = EXTRACT.replace("{descendants: true}", "{descendants: true, all: true}");
        let config = OperationConfig::parse(&two_scopes).unwrap();
        assert!(matches!(
            config.build_extraction_with(store(), registry(), memory_sinks),
            Err(MigrationError::Config(_))
        ));
    }

    #[test]
    fn test_lookup_behavior_must_match_lookup_class() {
        let yaml = EXTRACT.replace(
            "outside-lookup-behavior: drop-field",
            "lookup-behaviors: {AccountId: trace-none}",
        );
        let config = OperationConfig::parse(&yaml).unwrap();
        assert!(matches!(
            config.build_extraction_with(store(), registry(), memory_sinks),
            Err(MigrationError::Config(_))
        ));
    }

    #[test]
    fn test_unknown_keys_and_versions_are_rejected() {
        assert!(OperationConfig::parse(&EXTRACT.replace("version: 1", "version: 3")).is_err());
        assert!(OperationConfig::parse(&EXTRACT.replace("file: Contact.ndjson", "fil: Contact.ndjson")).is_err());
    }

    fn write_input(dir: &Path, name: &str, records: &[Record]) {
        let mut writer = NdjsonWriter::create(dir.join(name)).unwrap();
        for record in records {
            RecordSink::write(&mut writer, record).unwrap();
        }
        RecordSink::flush(&mut writer).unwrap();
    }

    #[test]
    fn test_load_input_columns_are_validated() {
        let dir = tempfile::tempdir().unwrap();
        write_input(
            dir.path(),
            "Account.ndjson",
            &[Record::new().with("Id", "001000000000000").with("Name", "A").with("Sector", "Tech")],
        );
        let config_path = dir.path().join("load.yaml");

        let exact = "version: 1\noperation:\n  - entity: Account\n    fields: [Name, {field: Industry, column: Sector}]\n    file: Account.ndjson\n";
        fs::write(&config_path, exact).unwrap();
        let config = OperationConfig::load_from_file(&config_path).unwrap();
        assert_eq!(config.operation[0].file, dir.path().join("Account.ndjson"));
        let op = config.build_load_with(store(), registry(), |_| Ok(None)).unwrap();
        assert!(op.steps()[0].lookups().all_lookups.is_empty());

        let missing = "version: 1\noperation:\n  - entity: Account\n    fields: [Name, Industry, ParentId]\n    file: Account.ndjson\n";
        fs::write(&config_path, missing).unwrap();
        let config = OperationConfig::load_from_file(&config_path).unwrap();
        assert!(matches!(
            config.build_load_with(store(), registry(), |_| Ok(None)),
            Err(MigrationError::Config(_))
        ));

        let unchecked = missing.replace("file: Account.ndjson", "file: Account.ndjson\n    input-validation: none");
        fs::write(&config_path, unchecked).unwrap();
        let config = OperationConfig::load_from_file(&config_path).unwrap();
        assert!(config.build_load_with(store(), registry(), |_| Ok(None)).is_ok());
    }

    #[test]
    fn test_field_group_load_allows_missing_columns() {
        let dir = tempfile::tempdir().unwrap();
        write_input(
            dir.path(),
            "Account.ndjson",
            &[Record::new().with("Id", "001000000000000").with("Name", "A").with("Score", "1.5")],
        );
        let config_path = dir.path().join("load.yaml");

        let smart = "version: 1\noperation:\n  - entity: Account\n    field-group: smart\n    file: Account.ndjson\n";
        fs::write(&config_path, smart).unwrap();
        let config = OperationConfig::load_from_file(&config_path).unwrap();
        let op = config.build_load_with(store(), registry(), |_| Ok(None)).unwrap();
        assert!(!op.steps()[0].fields().contains(&"Score".to_string()));

        let writeable = smart.replace("smart", "writeable");
        fs::write(&config_path, writeable).unwrap();
        let config = OperationConfig::load_from_file(&config_path).unwrap();
        assert!(matches!(
            config.build_load_with(store(), registry(), |_| Ok(None)),
            Err(MigrationError::Config(_))
        ));
    }
}

//! Load: re-creating an extracted record network in another store.
//!
//! Loading runs in two phases over every step. The insert phase creates each
//! record with its descendant lookups already pointing at the new
//! identifiers of earlier types, and with self and dependent lookups left
//! out; the records they point at may not exist yet. Once every type has been
//! inserted the update phase re-reads each source and patches those deferred
//! lookups through the translation table.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::classify::{classify, LookupClassification};
use crate::error::{MigrationError, Result};
use crate::identifier::RecordId;
use crate::io::{LoadResult, RecordSource, ResultSink};
use crate::operation::context::{OperationContext, OperationOptions};
use crate::operation::report::OperationReport;
use crate::operation::state::{LoadStage, RunState};
use crate::operation::translation::IdTranslationTable;
use crate::operation::OutsideLookupBehavior;
use crate::record::{Record, ID_FIELD};
use crate::schema::EntitySchema;
use crate::store::{BulkInsert, BulkUpdate, SchemaCatalog};
use crate::transform::DataMapper;
use crate::value::coerce;

/// Load of one entity type
pub struct LoadStep {
    entity: String,
    fields: Vec<String>,
    outside_lookup_behavior: OutsideLookupBehavior,
    outside_lookup_overrides: HashMap<String, OutsideLookupBehavior>,
    mapper: Option<DataMapper>,
    source: Box<dyn RecordSource>,
    results: Option<Box<dyn ResultSink>>,
    lookups: LookupClassification,
}

impl LoadStep {
    /// A step loading `fields` of `entity` from `source`. `Id` is always read.
    pub fn new<I, F>(entity: impl Into<String>, fields: I, source: Box<dyn RecordSource>) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<String>,
    {
        let mut field_list = vec![ID_FIELD.to_string()];
        for field in fields {
            let field = field.into();
            if !field_list.contains(&field) {
                field_list.push(field);
            }
        }

        Self {
            entity: entity.into(),
            fields: field_list,
            outside_lookup_behavior: OutsideLookupBehavior::default(),
            outside_lookup_overrides: HashMap::new(),
            mapper: None,
            source,
            results: None,
            lookups: LookupClassification::default(),
        }
    }

    pub fn with_outside_lookup_behavior(mut self, behavior: OutsideLookupBehavior) -> Self {
        self.outside_lookup_behavior = behavior;
        self
    }

    pub fn with_field_outside_lookup_behavior(
        mut self,
        field: impl Into<String>,
        behavior: OutsideLookupBehavior,
    ) -> Self {
        self.outside_lookup_overrides.insert(field.into(), behavior);
        self
    }

    /// Rename/transform input records before they are loaded.
    pub fn with_mapper(mut self, mapper: DataMapper) -> Self {
        self.mapper = Some(mapper);
        self
    }

    /// Report one row per input record.
    pub fn with_result_sink(mut self, sink: Box<dyn ResultSink>) -> Self {
        self.results = Some(sink);
        self
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn lookups(&self) -> &LookupClassification {
        &self.lookups
    }

    pub fn outside_lookup_behavior_for(&self, field: &str) -> OutsideLookupBehavior {
        self.outside_lookup_overrides
            .get(field)
            .copied()
            .unwrap_or(self.outside_lookup_behavior)
    }

    fn initialize<S: SchemaCatalog>(&mut self, ctx: &OperationContext<S>) -> Result<()> {
        let schema = ctx.schema(&self.entity)?;

        for name in &self.fields {
            let field = schema.field(name).ok_or_else(|| MigrationError::UnknownField {
                entity: self.entity.clone(),
                field: name.clone(),
            })?;
            if !field.kind.is_supported() {
                return Err(MigrationError::UnsupportedFieldKind {
                    entity: self.entity.clone(),
                    field: name.clone(),
                    kind: field.kind.to_string(),
                });
            }
            if name != ID_FIELD && !field.createable {
                return Err(MigrationError::Config(format!(
                    "Field {}.{} is not createable",
                    self.entity, name
                )));
            }
        }

        let scope: BTreeSet<String> = self.fields.iter().cloned().collect();
        self.lookups = classify(&self.entity, &scope, schema, ctx.order())?;

        for name in self.lookups.deferred_lookups() {
            let updateable = schema.field(&name).map(|f| f.updateable).unwrap_or(false);
            if !updateable {
                return Err(MigrationError::Config(format!(
                    "Field {}.{} is a dependent lookup, but is not updateable",
                    self.entity, name
                )));
            }
        }

        for (field, behavior) in &self.outside_lookup_overrides {
            if !self.lookups.is_descendant_lookup(field) && !self.lookups.is_dependent_lookup(field) {
                return Err(MigrationError::Config(format!(
                    "Lookup behavior '{}' specified for field {}.{} is not valid for this lookup type",
                    behavior, self.entity, field
                )));
            }
        }

        Ok(())
    }

    /// Apply the mapper, then drop every field outside the step's scope.
    fn transform_record(&self, record: Record) -> std::result::Result<Record, String> {
        let mut record = match &self.mapper {
            Some(mapper) => mapper.apply(record).map_err(|e| e.to_string())?,
            None => record,
        };
        record.retain(|name, _| self.fields.iter().any(|f| f == name));
        Ok(record)
    }

    /// New value for a lookup: the translated identifier, or whatever the
    /// outside-lookup policy says. `None` drops the field.
    fn resolve_lookup(
        &self,
        table: &IdTranslationTable,
        record_id: &RecordId,
        field: &str,
        value: &str,
    ) -> Result<Option<String>> {
        let old = RecordId::parse(value)?;
        if let Some(new) = table.translate(&old) {
            return Ok(Some(new.to_string()));
        }

        match self.outside_lookup_behavior_for(field) {
            OutsideLookupBehavior::Include => {
                warn!("{} {}: keeping outside reference {} in {}", self.entity, record_id, value, field);
                Ok(Some(value.to_string()))
            }
            OutsideLookupBehavior::DropField => {
                warn!("{} {}: dropping outside reference {} in {}", self.entity, record_id, value, field);
                Ok(None)
            }
            OutsideLookupBehavior::Error => Err(MigrationError::OutsideLookup {
                entity: self.entity.clone(),
                record_id: record_id.to_string(),
                field: field.to_string(),
                value: value.to_string(),
            }),
            OutsideLookupBehavior::Recurse => Err(MigrationError::RecurseUnsupported {
                entity: self.entity.clone(),
                field: field.to_string(),
            }),
        }
    }

    /// Turn an input record into the record to insert, or a per-record
    /// failure message.
    fn prepare_insert(
        &self,
        schema: &EntitySchema,
        table: &IdTranslationTable,
        old_id: &RecordId,
        mut record: Record,
    ) -> Result<std::result::Result<Record, String>> {
        let deferred = self.lookups.deferred_lookups();

        record.remove(ID_FIELD);
        record.retain(|name, _| !deferred.contains(name));

        for field in &self.lookups.descendant_lookups {
            if deferred.contains(field) {
                continue;
            }
            let Some(value) = record.lookup(field).map(str::to_string) else {
                continue;
            };
            match self.resolve_lookup(table, old_id, field, &value)? {
                Some(new_value) => record.insert(field.clone(), new_value),
                None => {
                    record.remove(field);
                }
            }
        }

        let mut prepared = Record::new();
        for (name, value) in record {
            let kind = match schema.field(&name) {
                Some(field) => field.kind,
                None => {
                    return Err(MigrationError::UnknownField {
                        entity: self.entity.clone(),
                        field: name,
                    })
                }
            };
            match coerce(value, kind) {
                Ok(value) => prepared.insert(name, value),
                Err(msg) => return Ok(Err(format!("{}: {}", name, msg))),
            }
        }

        Ok(Ok(prepared))
    }

    fn write_result(&mut self, result: LoadResult) -> Result<()> {
        if let Some(sink) = &mut self.results {
            sink.write_result(&result)?;
        }
        Ok(())
    }

    fn execute_inserts<S: SchemaCatalog + BulkInsert>(
        &mut self,
        ctx: &OperationContext<S>,
        table: &mut IdTranslationTable,
        report: &mut OperationReport,
    ) -> Result<()> {
        let schema = ctx.schema(&self.entity)?;
        let mut old_ids = Vec::new();
        let mut batch = Vec::new();
        let mut failures = Vec::new();
        let mut seen = HashSet::new();

        for item in self.source.open(&self.entity)? {
            let raw = item?;
            let raw_id = raw.raw_id().unwrap_or_default().to_string();

            let record = match self.transform_record(raw) {
                Ok(record) => record,
                Err(msg) => {
                    failures.push((raw_id, msg));
                    continue;
                }
            };
            let old_id = record.id()?;

            if table.contains(&old_id) {
                debug!("{} {} was loaded by an earlier run", self.entity, old_id);
                continue;
            }
            if !seen.insert(old_id.clone()) {
                failures.push((old_id.to_string(), "Duplicate identifier in input".to_string()));
                continue;
            }

            match self.prepare_insert(schema, table, &old_id, record)? {
                Ok(prepared) => {
                    old_ids.push(old_id);
                    batch.push(prepared);
                }
                Err(msg) => failures.push((old_id.to_string(), msg)),
            }
        }

        for (original_id, msg) in failures {
            let message = format!("Failed to load {} {}: {}", self.entity, original_id, msg);
            warn!("{}", message);
            report.record_failure(&self.entity, &original_id, message.clone());
            self.write_result(LoadResult::failure(original_id, message))?;
        }

        if batch.is_empty() {
            return Ok(());
        }

        let sent = batch.len();
        debug!("{}: inserting {} records", self.entity, sent);
        let outcomes = ctx.store().insert(&self.entity, batch)?;
        if outcomes.len() != sent {
            return Err(MigrationError::Store(format!(
                "Insert of {} {} records returned {} results",
                sent,
                self.entity,
                outcomes.len()
            )));
        }

        // The batch is committed; every outcome is recorded before any error is raised.
        let mut first_error = None;
        for (old_id, outcome) in old_ids.into_iter().zip(outcomes) {
            match outcome {
                Ok(new_id) => {
                    if let Err(e) = table.register(old_id.clone(), new_id.clone()) {
                        first_error.get_or_insert(e);
                        continue;
                    }
                    report.counts_mut(&self.entity).inserted += 1;
                    if let Err(e) = self.write_result(LoadResult::success(old_id.to_string(), new_id)) {
                        first_error.get_or_insert(e);
                    }
                }
                Err(msg) => {
                    let message = format!("Failed to load {} {}: {}", self.entity, old_id, msg);
                    warn!("{}", message);
                    report.record_failure(&self.entity, old_id.as_str(), message.clone());
                    if let Err(e) = self.write_result(LoadResult::failure(old_id.to_string(), message)) {
                        first_error.get_or_insert(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn execute_dependent_updates<S: SchemaCatalog + BulkUpdate>(
        &mut self,
        ctx: &OperationContext<S>,
        table: &IdTranslationTable,
        report: &mut OperationReport,
    ) -> Result<()> {
        let deferred = self.lookups.deferred_lookups();
        if deferred.is_empty() {
            return Ok(());
        }

        let mut targets = Vec::new();
        let mut batch = Vec::new();
        let mut seen = HashSet::new();

        for item in self.source.open(&self.entity)? {
            // Records that failed to transform were reported in the insert phase.
            let Ok(record) = self.transform_record(item?) else {
                continue;
            };
            let old_id = record.id()?;
            // Repeated identifiers were rejected in the insert phase.
            if !seen.insert(old_id.clone()) {
                continue;
            }
            let Some(new_id) = table.translate(&old_id) else {
                continue;
            };

            let mut update = Record::new().with(ID_FIELD, new_id.as_str());
            for field in &deferred {
                let Some(value) = record.lookup(field) else {
                    continue;
                };
                if let Some(new_value) = self.resolve_lookup(table, &old_id, field, value)? {
                    update.insert(field.clone(), new_value);
                }
            }

            if update.len() > 1 {
                targets.push((old_id, new_id.clone()));
                batch.push(update);
            }
        }

        if batch.is_empty() {
            return Ok(());
        }

        let sent = batch.len();
        debug!("{}: updating {} records", self.entity, sent);
        let outcomes = ctx.store().update(&self.entity, batch)?;
        if outcomes.len() != sent {
            return Err(MigrationError::Store(format!(
                "Update of {} {} records returned {} results",
                sent,
                self.entity,
                outcomes.len()
            )));
        }

        for ((old_id, new_id), outcome) in targets.into_iter().zip(outcomes) {
            match outcome {
                Ok(()) => report.counts_mut(&self.entity).updated += 1,
                Err(msg) => {
                    let message = format!(
                        "Failed to execute dependent updates for {} {}: {}",
                        self.entity, old_id, msg
                    );
                    warn!("{}", message);
                    report.record_failure(&self.entity, old_id.as_str(), message.clone());
                    self.write_result(LoadResult {
                        original_id: old_id.to_string(),
                        new_id: Some(new_id),
                        error: Some(message),
                    })?;
                }
            }
        }

        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(sink) = &mut self.results {
            sink.flush()?;
        }
        Ok(())
    }
}

/// An ordered set of load steps against one store
pub struct LoadOperation<S> {
    context: OperationContext<S>,
    steps: Vec<LoadStep>,
    translations: IdTranslationTable,
    stage: LoadStage,
    initialized: bool,
}

impl<S: SchemaCatalog + BulkInsert + BulkUpdate> LoadOperation<S> {
    pub fn new(store: S) -> Self {
        Self::with_options(store, OperationOptions::default())
    }

    pub fn with_options(store: S, options: OperationOptions) -> Self {
        Self {
            context: OperationContext::new(store, options),
            steps: Vec::new(),
            translations: IdTranslationTable::new(),
            stage: LoadStage::Insert,
            initialized: false,
        }
    }

    pub fn add_step(&mut self, step: LoadStep) -> Result<()> {
        if self.initialized {
            return Err(MigrationError::Config(
                "Steps cannot be added after the operation is initialized".to_string(),
            ));
        }
        self.context.push_entity(step.entity())?;
        self.steps.push(step);
        Ok(())
    }

    /// Continue from a saved state: its translations are restored and, when it
    /// was saved in the update stage, the insert phase is skipped.
    pub fn resume_from(&mut self, state: &RunState) {
        self.translations = state.translation_table();
        self.stage = state.stage();
        info!(
            "Resuming load at stage {:?} with {} translated identifiers",
            self.stage,
            self.translations.len()
        );
    }

    /// Snapshot of the current stage and translations, suitable for resuming.
    pub fn run_state(&self) -> RunState {
        RunState::new(self.stage, &self.translations)
    }

    pub fn stage(&self) -> LoadStage {
        self.stage
    }

    pub fn translations(&self) -> &IdTranslationTable {
        &self.translations
    }

    pub fn steps(&self) -> &[LoadStep] {
        &self.steps
    }

    pub fn context(&self) -> &OperationContext<S> {
        &self.context
    }

    pub fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        self.context.load_key_prefixes()?;
        for step in &mut self.steps {
            step.initialize(&self.context)?;
        }
        self.initialized = true;
        Ok(())
    }

    pub fn execute(&mut self) -> Result<OperationReport> {
        self.initialize()?;
        info!("Starting load with entities {}", self.context.order().join(", "));

        let mut report = OperationReport::new();
        for step in &self.steps {
            report.counts_mut(step.entity());
        }

        if self.stage == LoadStage::Insert {
            for step in &mut self.steps {
                info!("Loading {}", step.entity());
                step.execute_inserts(&self.context, &mut self.translations, &mut report)?;
                let counts = report.counts(step.entity());
                info!("Inserted {} {} records ({} failed)", counts.inserted, step.entity(), counts.failed);
            }
            self.stage = LoadStage::Update;
        }

        for step in &mut self.steps {
            info!("Populating dependent and self-lookups for {}", step.entity());
            step.execute_dependent_updates(&self.context, &self.translations, &mut report)?;
            step.flush()?;
        }

        info!(
            "Load finished: {} records translated, {} errors",
            self.translations.len(),
            report.error_count()
        );
        Ok(report)
    }
}

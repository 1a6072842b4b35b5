//! Extraction: pulling a referentially complete record network out of a store.
//!
//! Each step decides which of its entity's records to pull from its
//! [`ExtractionScope`], then keeps pulling until every record some earlier
//! step depends on has been found and, when self-lookups are traced, until
//! the hierarchy is closed. Records are written to the step's sink as they
//! arrive, each at most once.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, info, warn};

use crate::classify::{classify, LookupClassification};
use crate::error::{MigrationError, Result};
use crate::identifier::RecordId;
use crate::io::RecordSink;
use crate::operation::context::{OperationContext, OperationOptions};
use crate::operation::report::OperationReport;
use crate::operation::{OutsideLookupBehavior, SelfLookupBehavior};
use crate::record::{Record, ID_FIELD};
use crate::store::{BulkQuery, Predicate, SchemaCatalog};
use crate::transform::DataMapper;

/// Which records of an entity a step starts from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionScope {
    /// Every record; no dependency resolution follows
    AllRecords,
    /// Records matching a store filter expression
    Query(String),
    /// Only records other steps (or the caller) registered as required
    SelectedRecords,
    /// Records looking up to anything already extracted
    Descendants,
}

/// Identifiers extracted so far and identifiers still required, per entity
#[derive(Debug, Clone, Default)]
pub struct ExtractionRegistry {
    extracted: HashMap<String, BTreeSet<RecordId>>,
    required: HashMap<String, BTreeSet<RecordId>>,
}

impl ExtractionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `id` of `entity`, unless it has been extracted already.
    pub fn add_dependency(&mut self, entity: &str, id: RecordId) {
        if self.is_extracted(entity, &id) {
            return;
        }
        self.required.entry(entity.to_string()).or_default().insert(id);
    }

    /// Identifiers of `entity` still outstanding
    pub fn dependencies(&self, entity: &str) -> BTreeSet<RecordId> {
        self.required.get(entity).cloned().unwrap_or_default()
    }

    pub fn extracted_ids(&self, entity: &str) -> Option<&BTreeSet<RecordId>> {
        self.extracted.get(entity)
    }

    pub fn extracted_count(&self, entity: &str) -> usize {
        self.extracted.get(entity).map(BTreeSet::len).unwrap_or(0)
    }

    pub fn is_extracted(&self, entity: &str, id: &RecordId) -> bool {
        self.extracted.get(entity).map(|ids| ids.contains(id)).unwrap_or(false)
    }

    /// Mark `id` extracted and no longer required. Returns `false` when it
    /// had been extracted before.
    pub fn store(&mut self, entity: &str, id: RecordId) -> bool {
        if let Some(required) = self.required.get_mut(entity) {
            required.remove(&id);
        }
        self.extracted.entry(entity.to_string()).or_default().insert(id)
    }
}

/// Extraction of one entity type
pub struct ExtractionStep {
    entity: String,
    scope: ExtractionScope,
    fields: Vec<String>,
    self_lookup_behavior: SelfLookupBehavior,
    outside_lookup_behavior: OutsideLookupBehavior,
    self_lookup_overrides: HashMap<String, SelfLookupBehavior>,
    outside_lookup_overrides: HashMap<String, OutsideLookupBehavior>,
    mapper: Option<DataMapper>,
    sink: Box<dyn RecordSink>,
    lookups: LookupClassification,
}

impl ExtractionStep {
    /// A step writing `fields` of `entity` to `sink`. `Id` is always extracted.
    pub fn new<I, F>(entity: impl Into<String>, scope: ExtractionScope, fields: I, sink: Box<dyn RecordSink>) -> Self
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
            scope,
            fields: field_list,
            self_lookup_behavior: SelfLookupBehavior::default(),
            outside_lookup_behavior: OutsideLookupBehavior::default(),
            self_lookup_overrides: HashMap::new(),
            outside_lookup_overrides: HashMap::new(),
            mapper: None,
            sink,
            lookups: LookupClassification::default(),
        }
    }

    pub fn with_self_lookup_behavior(mut self, behavior: SelfLookupBehavior) -> Self {
        self.self_lookup_behavior = behavior;
        self
    }

    pub fn with_outside_lookup_behavior(mut self, behavior: OutsideLookupBehavior) -> Self {
        self.outside_lookup_behavior = behavior;
        self
    }

    pub fn with_field_self_lookup_behavior(mut self, field: impl Into<String>, behavior: SelfLookupBehavior) -> Self {
        self.self_lookup_overrides.insert(field.into(), behavior);
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

    /// Rename/transform records on their way to the sink.
    pub fn with_mapper(mut self, mapper: DataMapper) -> Self {
        self.mapper = Some(mapper);
        self
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn scope(&self) -> &ExtractionScope {
        &self.scope
    }

    /// Fields pulled for each record, `Id` first
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Classification of this step's lookups; empty until the operation is initialized
    pub fn lookups(&self) -> &LookupClassification {
        &self.lookups
    }

    pub fn self_lookup_behavior_for(&self, field: &str) -> SelfLookupBehavior {
        self.self_lookup_overrides
            .get(field)
            .copied()
            .unwrap_or(self.self_lookup_behavior)
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
        }

        let scope: BTreeSet<String> = self.fields.iter().cloned().collect();
        self.lookups = classify(&self.entity, &scope, schema, ctx.order())?;

        for (field, behavior) in &self.self_lookup_overrides {
            if !self.lookups.is_self_lookup(field) {
                return Err(invalid_behavior(&self.entity, field, &behavior.to_string()));
            }
        }
        for (field, behavior) in &self.outside_lookup_overrides {
            if !self.lookups.is_descendant_lookup(field) && !self.lookups.is_dependent_lookup(field) {
                return Err(invalid_behavior(&self.entity, field, &behavior.to_string()));
            }
        }

        for field in &self.lookups.outside_lookups {
            debug!("{}: field {} references no entity in this operation", self.entity, field);
        }

        Ok(())
    }

    fn execute<S: SchemaCatalog + BulkQuery>(
        &mut self,
        ctx: &OperationContext<S>,
        registry: &mut ExtractionRegistry,
    ) -> Result<()> {
        match self.scope.clone() {
            ExtractionScope::AllRecords => {
                debug!("{}: extracting all records", self.entity);
                self.bulk_pass(ctx, registry, &Predicate::All)?;
                return Ok(());
            }
            ExtractionScope::Query(expr) => {
                debug!("{}: extracting records matching {}", self.entity, expr);
                self.bulk_pass(ctx, registry, &Predicate::Filter(expr))?;
            }
            ExtractionScope::Descendants => {
                let fields: Vec<String> = self.lookups.descendant_lookups.iter().cloned().collect();
                debug!("{}: extracting descendants through {}", self.entity, fields.join(", "));
                for field in fields {
                    let ids = self.parent_ids(ctx, registry, &field)?;
                    self.id_field_pass(ctx, registry, &field, &ids)?;
                }
            }
            ExtractionScope::SelectedRecords => {}
        }

        // Parents of everything pulled so far are registered as dependencies
        // by now, so this also covers the first upward self-lookup pass.
        self.resolve_registered_dependencies(ctx, registry)?;

        let traced: Vec<String> = self
            .lookups
            .self_lookups
            .iter()
            .filter(|f| self.self_lookup_behavior_for(f) == SelfLookupBehavior::TraceAll)
            .cloned()
            .collect();

        if traced.is_empty() {
            return Ok(());
        }

        debug!("{}: tracing self-lookups {}", self.entity, traced.join(", "));
        let max_passes = ctx.options().max_self_lookup_passes;
        for pass in 1..=max_passes {
            let before = registry.extracted_count(&self.entity);

            // Children, then parents.
            let own_ids = registry.extracted_ids(&self.entity).cloned().unwrap_or_default();
            for field in &traced {
                self.id_field_pass(ctx, registry, field, &own_ids)?;
            }
            self.resolve_registered_dependencies(ctx, registry)?;

            let after = registry.extracted_count(&self.entity);
            debug!("{}: self-lookup pass {} found {} new records", self.entity, pass, after - before);
            if after == before {
                return Ok(());
            }
        }

        Err(MigrationError::SelfLookupLimit {
            entity: self.entity.clone(),
            passes: max_passes,
        })
    }

    /// Identifiers of already-extracted records of the types earlier in the
    /// order that `field` can point at.
    fn parent_ids<S: SchemaCatalog>(
        &self,
        ctx: &OperationContext<S>,
        registry: &ExtractionRegistry,
        field: &str,
    ) -> Result<BTreeSet<RecordId>> {
        let own_index = self.own_index(ctx)?;
        let descriptor = ctx.schema(&self.entity)?.field(field).ok_or_else(|| MigrationError::UnknownField {
            entity: self.entity.clone(),
            field: field.to_string(),
        })?;

        let mut ids = BTreeSet::new();
        for target in &descriptor.reference_to {
            let earlier = ctx.index_of(target).map(|i| i < own_index).unwrap_or(false);
            if let (true, Some(extracted)) = (earlier, registry.extracted_ids(target)) {
                ids.extend(extracted.iter().cloned());
            }
        }
        Ok(ids)
    }

    fn own_index<S: SchemaCatalog>(&self, ctx: &OperationContext<S>) -> Result<usize> {
        ctx.index_of(&self.entity)
            .ok_or_else(|| MigrationError::UnknownEntityType(self.entity.clone()))
    }

    fn resolve_registered_dependencies<S: SchemaCatalog + BulkQuery>(
        &mut self,
        ctx: &OperationContext<S>,
        registry: &mut ExtractionRegistry,
    ) -> Result<()> {
        let requested = registry.dependencies(&self.entity);
        if requested.is_empty() {
            return Ok(());
        }

        self.id_field_pass(ctx, registry, ID_FIELD, &requested)?;

        let missing: Vec<RecordId> = registry
            .dependencies(&self.entity)
            .intersection(&requested)
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(MigrationError::UnresolvedDependencies {
                entity: self.entity.clone(),
                ids: missing,
            });
        }
        Ok(())
    }

    fn bulk_pass<S: SchemaCatalog + BulkQuery>(
        &mut self,
        ctx: &OperationContext<S>,
        registry: &mut ExtractionRegistry,
        predicate: &Predicate,
    ) -> Result<()> {
        let records = ctx.store().query(&self.entity, &self.fields, predicate)?;
        for record in records {
            self.store_result(ctx, registry, record)?;
        }
        Ok(())
    }

    /// Pull every record whose `field` holds one of `ids`. All chunks are
    /// fetched before any record is processed.
    fn id_field_pass<S: SchemaCatalog + BulkQuery>(
        &mut self,
        ctx: &OperationContext<S>,
        registry: &mut ExtractionRegistry,
        field: &str,
        ids: &BTreeSet<RecordId>,
    ) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let chunks = ctx.planner(field)?.plan(ids);
        debug!(
            "{}: querying {} identifiers on {} in {} chunks",
            self.entity,
            ids.len(),
            field,
            chunks.len()
        );

        let mut records = Vec::new();
        for chunk in chunks {
            let predicate = Predicate::IdIn {
                field: field.to_string(),
                ids: chunk,
            };
            records.extend(ctx.store().query(&self.entity, &self.fields, &predicate)?);
        }

        for record in records {
            self.store_result(ctx, registry, record)?;
        }
        Ok(())
    }

    fn store_result<S: SchemaCatalog>(
        &mut self,
        ctx: &OperationContext<S>,
        registry: &mut ExtractionRegistry,
        mut record: Record,
    ) -> Result<()> {
        let id = record.id()?;
        let schema = ctx.schema(&self.entity)?;
        let own_index = self.own_index(ctx)?;

        for field in &self.lookups.self_lookups {
            if self.self_lookup_behavior_for(field) == SelfLookupBehavior::TraceNone {
                continue;
            }
            let Some(target) = record.lookup_id(field)? else {
                continue;
            };
            let polymorphic = schema.field(field).map(|f| f.is_polymorphic()).unwrap_or(false);
            if polymorphic && ctx.entity_for_id(&target) != Some(self.entity.as_str()) {
                continue;
            }
            registry.add_dependency(&self.entity, target);
        }

        for field in &self.lookups.dependent_lookups {
            let Some(target) = record.lookup_id(field)? else {
                continue;
            };
            let Some(target_entity) = self.target_entity(ctx, field, &target)? else {
                continue;
            };
            // A polymorphic value may point at this type or an earlier one;
            // those are handled as self or descendant references.
            match ctx.index_of(&target_entity) {
                Some(i) if i > own_index => registry.add_dependency(&target_entity, target),
                _ => {}
            }
        }

        let descendant_fields: Vec<String> = self.lookups.descendant_lookups.iter().cloned().collect();
        for field in descendant_fields {
            let Some(target) = record.lookup_id(&field)? else {
                continue;
            };
            let target_entity = self.target_entity(ctx, &field, &target)?;

            if let Some(t) = &target_entity {
                if ctx.index_of(t).map(|i| i >= own_index).unwrap_or(false) {
                    continue;
                }
                if registry.is_extracted(t, &target) {
                    continue;
                }
            }

            match self.outside_lookup_behavior_for(&field) {
                OutsideLookupBehavior::DropField => {
                    warn!("{} {}: dropping outside reference {} in {}", self.entity, id, target, field);
                    record.remove(&field);
                }
                OutsideLookupBehavior::Include => {
                    warn!("{} {}: keeping outside reference {} in {}", self.entity, id, target, field);
                }
                OutsideLookupBehavior::Error => {
                    return Err(MigrationError::OutsideLookup {
                        entity: self.entity.clone(),
                        record_id: id.to_string(),
                        field,
                        value: target.to_string(),
                    });
                }
                OutsideLookupBehavior::Recurse => {
                    return Err(MigrationError::RecurseUnsupported {
                        entity: self.entity.clone(),
                        field,
                    });
                }
            }
        }

        debug!("{}: extracting record {}", self.entity, id);
        if registry.store(&self.entity, id) {
            let record = match &self.mapper {
                Some(mapper) => mapper.apply(record)?,
                None => record,
            };
            self.sink.write(&record)?;
        }
        Ok(())
    }

    /// Entity type a lookup value points at: the field's only target, or for
    /// polymorphic fields the type owning the value's key prefix.
    fn target_entity<S: SchemaCatalog>(
        &self,
        ctx: &OperationContext<S>,
        field: &str,
        value: &RecordId,
    ) -> Result<Option<String>> {
        let descriptor = ctx.schema(&self.entity)?.field(field).ok_or_else(|| MigrationError::UnknownField {
            entity: self.entity.clone(),
            field: field.to_string(),
        })?;

        if descriptor.is_polymorphic() {
            Ok(ctx.entity_for_id(value).map(str::to_string))
        } else {
            Ok(descriptor.reference_to.first().cloned())
        }
    }
}

fn invalid_behavior(entity: &str, field: &str, behavior: &str) -> MigrationError {
    MigrationError::Config(format!(
        "Lookup behavior '{}' specified for field {}.{} is not valid for this lookup type",
        behavior, entity, field
    ))
}

/// An ordered set of extraction steps against one store
pub struct ExtractOperation<S> {
    context: OperationContext<S>,
    steps: Vec<ExtractionStep>,
    registry: ExtractionRegistry,
    initialized: bool,
}

impl<S: SchemaCatalog + BulkQuery> ExtractOperation<S> {
    pub fn new(store: S) -> Self {
        Self::with_options(store, OperationOptions::default())
    }

    pub fn with_options(store: S, options: OperationOptions) -> Self {
        Self {
            context: OperationContext::new(store, options),
            steps: Vec::new(),
            registry: ExtractionRegistry::new(),
            initialized: false,
        }
    }

    /// Append a step. The entity is described now; steps cannot be added
    /// once the operation has been initialized.
    pub fn add_step(&mut self, step: ExtractionStep) -> Result<()> {
        if self.initialized {
            return Err(MigrationError::Config(
                "Steps cannot be added after the operation is initialized".to_string(),
            ));
        }
        self.context.push_entity(step.entity())?;
        self.steps.push(step);
        Ok(())
    }

    /// Require a specific record before execution, e.g. for `SelectedRecords` steps.
    pub fn add_dependency(&mut self, entity: &str, id: RecordId) -> Result<()> {
        if !self.context.contains(entity) {
            return Err(MigrationError::UnknownEntityType(entity.to_string()));
        }
        self.registry.add_dependency(entity, id);
        Ok(())
    }

    /// Fix the step order, fetch the key-prefix table and classify every
    /// step's lookups. Runs once; `execute` calls it when needed.
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
        info!("Starting extraction with entities {}", self.context.order().join(", "));

        let mut report = OperationReport::new();
        for step in &mut self.steps {
            info!("Extracting {}", step.entity());
            step.execute(&self.context, &mut self.registry)?;
            step.sink.flush()?;

            let count = self.registry.extracted_count(step.entity());
            report.counts_mut(step.entity()).extracted = count;
            info!("Extracted {} records from {}", count, step.entity());
        }

        Ok(report)
    }

    pub fn steps(&self) -> &[ExtractionStep] {
        &self.steps
    }

    pub fn context(&self) -> &OperationContext<S> {
        &self.context
    }

    pub fn registry(&self) -> &ExtractionRegistry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemorySink;
    use crate::schema::{EntitySchema, FieldDescriptor, FieldKind};
    use crate::store::MemoryStore;

    fn id(raw: &str) -> RecordId {
        RecordId::parse(raw).unwrap()
    }

    fn account_store() -> MemoryStore {
        let store = MemoryStore::new(vec![EntitySchema::new(
            "Account",
            "001",
            vec![
                FieldDescriptor::id(),
                FieldDescriptor::new("Name", FieldKind::String),
                FieldDescriptor::reference("ParentId", &["Account"]),
                FieldDescriptor::new("Logo", FieldKind::Base64),
            ],
        )]);
        store
            .seed("Account", Record::new().with("Id", "001000000000000").with("Name", "Root"))
            .unwrap();
        store
            .seed(
                "Account",
                Record::new()
                    .with("Id", "001000000000001")
                    .with("Name", "Child")
                    .with("ParentId", "001000000000000"),
            )
            .unwrap();
        store
            .seed(
                "Account",
                Record::new()
                    .with("Id", "001000000000002")
                    .with("Name", "Grandchild")
                    .with("ParentId", "001000000000001"),
            )
            .unwrap();
        store
    }

    #[test]
    fn test_registry_dedups_and_clears_required() {
        let mut registry = ExtractionRegistry::new();
        registry.add_dependency("Account", id("001000000000000"));

        assert!(registry.store("Account", id("001000000000000")));
        assert!(!registry.store("Account", id("001000000000000")));
        assert!(registry.dependencies("Account").is_empty());

        registry.add_dependency("Account", id("001000000000000"));
        assert!(registry.dependencies("Account").is_empty());
        assert_eq!(registry.extracted_count("Account"), 1);
    }

    #[test]
    fn test_selected_record_traces_whole_hierarchy() {
        let sink = MemorySink::new();
        let mut op = ExtractOperation::new(account_store());
        op.add_step(ExtractionStep::new(
            "Account",
            ExtractionScope::SelectedRecords,
            ["Name", "ParentId"],
            Box::new(sink.clone()),
        ))
        .unwrap();
        op.add_dependency("Account", id("001000000000001")).unwrap();

        let report = op.execute().unwrap();

        assert_eq!(report.counts("Account").extracted, 3);
        assert_eq!(sink.len(), 3);
    }

    #[test]
    fn test_trace_none_pulls_only_the_selected_record() {
        let sink = MemorySink::new();
        let mut op = ExtractOperation::new(account_store());
        op.add_step(
            ExtractionStep::new(
                "Account",
                ExtractionScope::SelectedRecords,
                ["Name", "ParentId"],
                Box::new(sink.clone()),
            )
            .with_self_lookup_behavior(SelfLookupBehavior::TraceNone),
        )
        .unwrap();
        op.add_dependency("Account", id("001000000000001")).unwrap();

        op.execute().unwrap();

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].lookup("ParentId"), Some("001000000000000"));
    }

    #[test]
    fn test_self_lookup_pass_cap() {
        let sink = MemorySink::new();
        let options = OperationOptions {
            max_self_lookup_passes: 1,
            ..OperationOptions::default()
        };
        let mut op = ExtractOperation::with_options(account_store(), options);
        op.add_step(ExtractionStep::new(
            "Account",
            ExtractionScope::Query("Name = 'Root'".to_string()),
            ["Name", "ParentId"],
            Box::new(sink),
        ))
        .unwrap();

        let err = op.execute().unwrap_err();
        assert!(matches!(err, MigrationError::SelfLookupLimit { passes: 1, .. }));
    }

    #[test]
    fn test_missing_dependency_is_fatal() {
        let mut op = ExtractOperation::new(account_store());
        op.add_step(ExtractionStep::new(
            "Account",
            ExtractionScope::SelectedRecords,
            ["Name"],
            Box::new(MemorySink::new()),
        ))
        .unwrap();
        op.add_dependency("Account", id("001000000000099")).unwrap();

        match op.execute() {
            Err(MigrationError::UnresolvedDependencies { entity, ids }) => {
                assert_eq!(entity, "Account");
                assert_eq!(ids, vec![id("001000000000099")]);
            }
            other => panic!("expected unresolved dependencies, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_initialize_rejects_bad_scopes_and_behaviors() {
        let mut op = ExtractOperation::new(account_store());
        op.add_step(ExtractionStep::new(
            "Account",
            ExtractionScope::AllRecords,
            ["Logo"],
            Box::new(MemorySink::new()),
        ))
        .unwrap();
        assert!(matches!(
            op.initialize(),
            Err(MigrationError::UnsupportedFieldKind { .. })
        ));

        let mut op = ExtractOperation::new(account_store());
        op.add_step(
            ExtractionStep::new(
                "Account",
                ExtractionScope::AllRecords,
                ["Name", "ParentId"],
                Box::new(MemorySink::new()),
            )
            .with_field_outside_lookup_behavior("ParentId", OutsideLookupBehavior::Error),
        )
        .unwrap();
        assert!(matches!(op.initialize(), Err(MigrationError::Config(_))));
    }

    #[test]
    fn test_steps_cannot_be_added_after_initialize() {
        let mut op = ExtractOperation::new(account_store());
        op.initialize().unwrap();

        let step = ExtractionStep::new("Account", ExtractionScope::AllRecords, ["Name"], Box::new(MemorySink::new()));
        assert!(matches!(op.add_step(step), Err(MigrationError::Config(_))));
    }
}

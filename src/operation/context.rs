//! State shared by every step of an operation.
//!
//! The context owns the store handle, the entity order and the schema cache.
//! Schemas are described once per entity and the key-prefix table is fetched
//! once per operation, when the operation is initialized.

use std::collections::HashMap;

use tracing::debug;

use crate::batch::{BatchPlanner, DEFAULT_MAX_FILTER_LENGTH};
use crate::error::{MigrationError, Result};
use crate::identifier::RecordId;
use crate::schema::EntitySchema;
use crate::store::SchemaCatalog;

/// Default cap on self-lookup tracing passes for one step
pub const DEFAULT_MAX_SELF_LOOKUP_PASSES: usize = 1000;

/// Tunables of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationOptions {
    /// Longest `Field IN (...)` filter sent to the store
    pub max_filter_length: usize,
    pub max_self_lookup_passes: usize,
}

impl Default for OperationOptions {
    fn default() -> Self {
        Self {
            max_filter_length: DEFAULT_MAX_FILTER_LENGTH,
            max_self_lookup_passes: DEFAULT_MAX_SELF_LOOKUP_PASSES,
        }
    }
}

#[derive(Debug)]
pub struct OperationContext<S> {
    store: S,
    options: OperationOptions,
    order: Vec<String>,
    schemas: HashMap<String, EntitySchema>,
    key_prefixes: HashMap<String, String>,
}

impl<S: SchemaCatalog> OperationContext<S> {
    pub fn new(store: S, options: OperationOptions) -> Self {
        Self {
            store,
            options,
            order: Vec::new(),
            schemas: HashMap::new(),
            key_prefixes: HashMap::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn options(&self) -> &OperationOptions {
        &self.options
    }

    /// Entity types in step order
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn index_of(&self, entity: &str) -> Option<usize> {
        self.order.iter().position(|e| e == entity)
    }

    pub fn contains(&self, entity: &str) -> bool {
        self.index_of(entity).is_some()
    }

    /// Append `entity` to the order, describing it if it hasn't been yet.
    pub(crate) fn push_entity(&mut self, entity: &str) -> Result<()> {
        if self.contains(entity) {
            return Err(MigrationError::Config(format!(
                "Entity {} appears more than once in the operation",
                entity
            )));
        }
        self.describe(entity)?;
        self.order.push(entity.to_string());
        Ok(())
    }

    /// Describe `entity` through the store, caching the result.
    pub fn describe(&mut self, entity: &str) -> Result<&EntitySchema> {
        if !self.schemas.contains_key(entity) {
            debug!("Describing {}", entity);
            let schema = self.store.describe(entity)?;
            self.schemas.insert(entity.to_string(), schema);
        }
        self.schema(entity)
    }

    /// A schema previously fetched with [`describe`](Self::describe)
    pub fn schema(&self, entity: &str) -> Result<&EntitySchema> {
        self.schemas
            .get(entity)
            .ok_or_else(|| MigrationError::UnknownEntityType(entity.to_string()))
    }

    /// Fetch the key-prefix table. Prefixes of described entities win over the
    /// store-wide table.
    pub(crate) fn load_key_prefixes(&mut self) -> Result<()> {
        let mut prefixes = self.store.key_prefixes()?;
        for schema in self.schemas.values() {
            prefixes.insert(schema.key_prefix.clone(), schema.name.clone());
        }
        self.key_prefixes = prefixes;
        Ok(())
    }

    /// Entity type an identifier belongs to, by its key prefix
    pub fn entity_for_id(&self, id: &RecordId) -> Option<&str> {
        self.key_prefixes.get(id.key_prefix()).map(String::as_str)
    }

    /// Planner for `field IN (...)` passes under the configured filter length
    pub fn planner(&self, field: &str) -> Result<BatchPlanner> {
        BatchPlanner::for_filter(self.options.max_filter_length, field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDescriptor;
    use crate::store::MemoryStore;

    fn store() -> MemoryStore {
        MemoryStore::new(vec![
            EntitySchema::new("Account", "001", vec![FieldDescriptor::id()]),
            EntitySchema::new("Contact", "003", vec![FieldDescriptor::id()]),
        ])
    }

    #[test]
    fn test_order_and_prefix_resolution() {
        let mut ctx = OperationContext::new(store(), OperationOptions::default());
        ctx.push_entity("Account").unwrap();
        ctx.load_key_prefixes().unwrap();

        assert_eq!(ctx.index_of("Account"), Some(0));
        assert_eq!(ctx.index_of("Contact"), None);

        let contact = RecordId::parse("003000000000000").unwrap();
        assert_eq!(ctx.entity_for_id(&contact), Some("Contact"));
        let unknown = RecordId::parse("a0X000000000000").unwrap();
        assert_eq!(ctx.entity_for_id(&unknown), None);
    }

    #[test]
    fn test_duplicate_and_unknown_entities_are_rejected() {
        let mut ctx = OperationContext::new(store(), OperationOptions::default());
        ctx.push_entity("Account").unwrap();

        assert!(matches!(ctx.push_entity("Account"), Err(MigrationError::Config(_))));
        assert!(matches!(
            ctx.push_entity("Opportunity"),
            Err(MigrationError::UnknownEntityType(_))
        ));
    }
}

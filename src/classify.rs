//! Lookup classification relative to an operation's processing order.
//!
//! A reference field is sorted by where its target types sit in the declared
//! order of entity types:
//!
//! | Target position        | Class       | Handling                                     |
//! |------------------------|-------------|----------------------------------------------|
//! | same type              | self        | traced to a fixed point / patched after load |
//! | earlier in the order   | descendant  | used to find children / resolved on insert   |
//! | later in the order     | dependent   | registered as required / patched after load  |
//! | not in the operation   | outside     | carried as a plain value                     |
//!
//! A polymorphic field can land in several classes; which one applies to a
//! given value is decided per record from the value's key prefix.

use std::collections::BTreeSet;

use crate::error::{MigrationError, Result};
use crate::schema::EntitySchema;

/// Lookup fields of one step, partitioned by class
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupClassification {
    /// Reference fields with at least one target inside the operation
    pub all_lookups: BTreeSet<String>,
    pub self_lookups: BTreeSet<String>,
    pub descendant_lookups: BTreeSet<String>,
    pub dependent_lookups: BTreeSet<String>,
    /// Reference fields whose targets all lie outside the operation
    pub outside_lookups: BTreeSet<String>,
}

impl LookupClassification {
    /// Fields patched in the second load phase
    pub fn deferred_lookups(&self) -> BTreeSet<String> {
        self.self_lookups.union(&self.dependent_lookups).cloned().collect()
    }

    pub fn is_self_lookup(&self, field: &str) -> bool {
        self.self_lookups.contains(field)
    }

    pub fn is_descendant_lookup(&self, field: &str) -> bool {
        self.descendant_lookups.contains(field)
    }

    pub fn is_dependent_lookup(&self, field: &str) -> bool {
        self.dependent_lookups.contains(field)
    }
}

/// Classify the reference fields in `field_scope` of `entity`.
///
/// # Errors
///
/// Fails when `entity` is not part of `order` or a field in scope is not in
/// the entity's schema.
///
/// # Example
///
/// ```
/// use std::collections::BTreeSet;
/// use skein::{classify, EntitySchema, FieldDescriptor};
///
/// let contact = EntitySchema::new("Contact", "003", vec![
///     FieldDescriptor::id(),
///     FieldDescriptor::reference("AccountId", &["Account"]),
/// ]);
/// let order = vec!["Account".to_string(), "Contact".to_string()];
/// let scope: BTreeSet<String> = ["Id", "AccountId"].iter().map(|s| s.to_string()).collect();
///
/// let lookups = classify("Contact", &scope, &contact, &order).unwrap();
/// assert!(lookups.is_descendant_lookup("AccountId"));
/// ```
pub fn classify(
    entity: &str,
    field_scope: &BTreeSet<String>,
    schema: &EntitySchema,
    order: &[String],
) -> Result<LookupClassification> {
    let own_index = order
        .iter()
        .position(|e| e == entity)
        .ok_or_else(|| MigrationError::UnknownEntityType(entity.to_string()))?;

    let mut result = LookupClassification::default();

    for name in field_scope {
        let field = schema.field(name).ok_or_else(|| MigrationError::UnknownField {
            entity: entity.to_string(),
            field: name.clone(),
        })?;

        if !field.is_reference() {
            continue;
        }

        let target_indices: Vec<usize> = field
            .reference_to
            .iter()
            .filter_map(|target| order.iter().position(|e| e == target))
            .collect();

        if target_indices.is_empty() {
            result.outside_lookups.insert(name.clone());
            continue;
        }

        result.all_lookups.insert(name.clone());

        if target_indices.contains(&own_index) {
            result.self_lookups.insert(name.clone());
        }
        if target_indices.iter().any(|&i| i < own_index) {
            result.descendant_lookups.insert(name.clone());
        }
        if target_indices.iter().any(|&i| i > own_index) {
            result.dependent_lookups.insert(name.clone());
        }
    }

    Ok(result)
}

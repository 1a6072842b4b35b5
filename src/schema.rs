//! Field descriptors and per-entity schemas as reported by a schema catalog.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Scalar kind of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Id,
    Reference,
    String,
    Picklist,
    Textarea,
    Boolean,
    Int,
    Double,
    Date,
    #[serde(rename = "datetime")]
    DateTime,
    Base64,
    Location,
    Address,
    #[serde(rename = "anytype")]
    AnyType,
}

impl FieldKind {
    /// Whether records can carry values of this kind through extraction and load
    pub fn is_supported(self) -> bool {
        !matches!(
            self,
            FieldKind::Base64 | FieldKind::Location | FieldKind::Address | FieldKind::AnyType
        )
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::Id => "id",
            FieldKind::Reference => "reference",
            FieldKind::String => "string",
            FieldKind::Picklist => "picklist",
            FieldKind::Textarea => "textarea",
            FieldKind::Boolean => "boolean",
            FieldKind::Int => "int",
            FieldKind::Double => "double",
            FieldKind::Date => "date",
            FieldKind::DateTime => "datetime",
            FieldKind::Base64 => "base64",
            FieldKind::Location => "location",
            FieldKind::Address => "address",
            FieldKind::AnyType => "anytype",
        };
        write!(f, "{}", name)
    }
}

fn default_true() -> bool {
    true
}

/// Description of a single field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    /// Target entity types; more than one for polymorphic references
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reference_to: Vec<String>,
    #[serde(default = "default_true")]
    pub createable: bool,
    #[serde(default = "default_true")]
    pub updateable: bool,
    #[serde(default = "default_true")]
    pub nillable: bool,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            reference_to: Vec::new(),
            createable: true,
            updateable: true,
            nillable: true,
        }
    }

    /// The store-assigned identifier field
    pub fn id() -> Self {
        Self {
            createable: false,
            updateable: false,
            nillable: false,
            ..Self::new("Id", FieldKind::Id)
        }
    }

    pub fn reference(name: impl Into<String>, targets: &[&str]) -> Self {
        Self {
            reference_to: targets.iter().map(|t| t.to_string()).collect(),
            ..Self::new(name, FieldKind::Reference)
        }
    }

    pub fn required(mut self) -> Self {
        self.nillable = false;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.createable = false;
        self.updateable = false;
        self
    }

    pub fn is_reference(&self) -> bool {
        self.kind == FieldKind::Reference
    }

    pub fn is_polymorphic(&self) -> bool {
        self.reference_to.len() > 1
    }
}

/// Named subsets of an entity's fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldGroup {
    /// Every field whose kind can be carried
    Readable,
    /// Createable fields whose kind can be carried
    Writeable,
    /// `readable` on extraction, `writeable` on load
    Smart,
}

/// Schema of one entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EntitySchema {
    pub name: String,
    /// Identifier prefix shared by every record of this type
    pub key_prefix: String,
    pub fields: Vec<FieldDescriptor>,
}

impl EntitySchema {
    pub fn new(name: impl Into<String>, key_prefix: impl Into<String>, fields: Vec<FieldDescriptor>) -> Self {
        Self {
            name: name.into(),
            key_prefix: key_prefix.into(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Field names belonging to `group`, resolved for extraction or load.
    pub fn field_group(&self, group: FieldGroup, for_load: bool) -> Vec<String> {
        let writeable = match group {
            FieldGroup::Readable => false,
            FieldGroup::Writeable => true,
            FieldGroup::Smart => for_load,
        };

        self.fields
            .iter()
            .filter(|f| f.kind.is_supported())
            .filter(|f| !writeable || f.createable)
            .map(|f| f.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> EntitySchema {
        EntitySchema::new(
            "Account",
            "001",
            vec![
                FieldDescriptor::id(),
                FieldDescriptor::new("Name", FieldKind::String).required(),
                FieldDescriptor::reference("ParentId", &["Account"]),
                FieldDescriptor::new("Logo", FieldKind::Base64),
                FieldDescriptor::new("Score", FieldKind::Double).read_only(),
            ],
        )
    }

    #[test]
    fn test_field_groups() {
        let schema = account();

        assert_eq!(
            schema.field_group(FieldGroup::Readable, false),
            vec!["Id", "Name", "ParentId", "Score"]
        );
        assert_eq!(schema.field_group(FieldGroup::Writeable, false), vec!["Name", "ParentId"]);
        assert_eq!(schema.field_group(FieldGroup::Smart, true), vec!["Name", "ParentId"]);
        assert_eq!(schema.field_group(FieldGroup::Smart, false).len(), 4);
    }

    #[test]
    fn test_descriptor_yaml_defaults() {
        let yaml = "name: WhatId\nkind: reference\nreference-to: [Account, Opportunity]\n";
        let field: FieldDescriptor = serde_yaml::from_str(yaml).unwrap();

        assert!(field.is_reference());
        assert!(field.is_polymorphic());
        assert!(field.createable && field.updateable && field.nillable);
    }
}

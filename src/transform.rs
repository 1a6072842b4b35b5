//! Field value transforms and the record mapper that applies them.
//!
//! Transforms are named functions from one [`FieldValue`] to another,
//! parameterised by a JSON argument map. A [`DataMapper`] applies chains of
//! them per field and renames fields to file columns (extraction) or columns
//! back to fields (load).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::Record;
use crate::value::FieldValue;

/// Error type for transform operations
#[derive(Debug, Clone, PartialEq)]
pub enum TransformError {
    NotFound(String),
    InvalidArgs(String),
    ExecutionError(String),
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformError::NotFound(name) => write!(f, "Transform not found: {}", name),
            TransformError::InvalidArgs(msg) => write!(f, "Invalid arguments: {}", msg),
            TransformError::ExecutionError(msg) => write!(f, "Execution error: {}", msg),
        }
    }
}

impl std::error::Error for TransformError {}

/// A value transform
///
/// Blank values are passed in like any other; implementations decide whether
/// to leave them alone.
pub trait TransformFn: Send + Sync {
    fn execute(&self, value: &FieldValue, args: &HashMap<String, Value>) -> Result<FieldValue, TransformError>;
}

impl<F> TransformFn for F
where
    F: Fn(&FieldValue, &HashMap<String, Value>) -> Result<FieldValue, TransformError> + Send + Sync,
{
    fn execute(&self, value: &FieldValue, args: &HashMap<String, Value>) -> Result<FieldValue, TransformError> {
        self(value, args)
    }
}

/// Registry of named transforms
pub struct TransformRegistry {
    transforms: HashMap<String, Box<dyn TransformFn>>,
}

impl TransformRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            transforms: HashMap::new(),
        }
    }

    /// A registry holding `strip`, `lowercase`, `uppercase`, `prefix`,
    /// `suffix` and `multiply`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("strip", Box::new(strip));
        registry.register("lowercase", Box::new(lowercase));
        registry.register("uppercase", Box::new(uppercase));
        registry.register("prefix", Box::new(prefix));
        registry.register("suffix", Box::new(suffix));
        registry.register("multiply", Box::new(multiply));
        registry
    }

    /// Register a transform, replacing any previous one of the same name.
    ///
    /// # Example
    ///
    /// ```
    /// use std::collections::HashMap;
    /// use serde_json::Value;
    /// use skein::{FieldValue, TransformError, TransformFn, TransformRegistry};
    ///
    /// let mut registry = TransformRegistry::new();
    /// registry.register("reverse", Box::new(|value: &FieldValue, _args: &HashMap<String, Value>| {
    ///     Ok::<_, TransformError>(FieldValue::text(value.to_string().chars().rev().collect::<String>()))
    /// }) as Box<dyn TransformFn>);
    ///
    /// let out = registry.call("reverse", &FieldValue::text("abc"), &HashMap::new()).unwrap();
    /// assert_eq!(out, FieldValue::text("cba"));
    /// ```
    pub fn register(&mut self, name: impl Into<String>, func: Box<dyn TransformFn>) {
        self.transforms.insert(name.into(), func);
    }

    /// Call a registered transform
    pub fn call(
        &self,
        name: &str,
        value: &FieldValue,
        args: &HashMap<String, Value>,
    ) -> Result<FieldValue, TransformError> {
        let transform = self
            .transforms
            .get(name)
            .ok_or_else(|| TransformError::NotFound(name.to_string()))?;

        transform.execute(value, args)
    }

    pub fn has_transform(&self, name: &str) -> bool {
        self.transforms.contains_key(name)
    }

    /// Registered names, sorted
    pub fn list_transforms(&self) -> Vec<String> {
        let mut names: Vec<String> = self.transforms.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("transforms", &self.list_transforms())
            .finish()
    }
}

fn map_text(value: &FieldValue, f: impl Fn(&str) -> String) -> FieldValue {
    match value {
        FieldValue::String(s) => FieldValue::String(f(s)),
        other => other.clone(),
    }
}

fn string_arg<'a>(args: &'a HashMap<String, Value>, key: &str) -> Result<&'a str, TransformError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| TransformError::InvalidArgs(format!("Missing string option '{}'", key)))
}

fn strip(value: &FieldValue, _args: &HashMap<String, Value>) -> Result<FieldValue, TransformError> {
    Ok(map_text(value, |s| s.trim().to_string()))
}

fn lowercase(value: &FieldValue, _args: &HashMap<String, Value>) -> Result<FieldValue, TransformError> {
    Ok(map_text(value, str::to_lowercase))
}

fn uppercase(value: &FieldValue, _args: &HashMap<String, Value>) -> Result<FieldValue, TransformError> {
    Ok(map_text(value, str::to_uppercase))
}

fn prefix(value: &FieldValue, args: &HashMap<String, Value>) -> Result<FieldValue, TransformError> {
    let prefix = string_arg(args, "value")?;
    Ok(map_text(value, |s| format!("{}{}", prefix, s)))
}

fn suffix(value: &FieldValue, args: &HashMap<String, Value>) -> Result<FieldValue, TransformError> {
    let suffix = string_arg(args, "value")?;
    Ok(map_text(value, |s| format!("{}{}", s, suffix)))
}

/// Repeat a string value `count` times
fn multiply(value: &FieldValue, args: &HashMap<String, Value>) -> Result<FieldValue, TransformError> {
    let count = args
        .get("count")
        .and_then(Value::as_u64)
        .ok_or_else(|| TransformError::InvalidArgs("Missing integer option 'count'".to_string()))?;
    let count = usize::try_from(count).map_err(|_| TransformError::InvalidArgs(format!("Count {} is too large", count)))?;

    match value {
        FieldValue::String(s) => Ok(FieldValue::String(s.repeat(count))),
        FieldValue::Null => Ok(FieldValue::Null),
        other => Err(TransformError::ExecutionError(format!(
            "multiply applies to text values, got {}",
            other
        ))),
    }
}

/// One transform invocation in a field's chain
///
/// Written either as a bare name (`strip`) or with options
/// (`{name: prefix, args: {value: "X-"}}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransformSpec {
    Named(String),
    WithArgs {
        name: String,
        #[serde(default)]
        args: HashMap<String, Value>,
    },
}

impl TransformSpec {
    pub fn name(&self) -> &str {
        match self {
            TransformSpec::Named(name) => name,
            TransformSpec::WithArgs { name, .. } => name,
        }
    }

    fn args(&self) -> Option<&HashMap<String, Value>> {
        match self {
            TransformSpec::Named(_) => None,
            TransformSpec::WithArgs { args, .. } => Some(args),
        }
    }
}

/// Renames and transforms the fields of records crossing a file boundary
///
/// Transform chains are keyed by the incoming name and run before the rename.
#[derive(Debug, Clone)]
pub struct DataMapper {
    renames: HashMap<String, String>,
    transforms: HashMap<String, Vec<TransformSpec>>,
    registry: Arc<TransformRegistry>,
}

impl DataMapper {
    pub fn new(registry: Arc<TransformRegistry>) -> Self {
        Self {
            renames: HashMap::new(),
            transforms: HashMap::new(),
            registry,
        }
    }

    pub fn rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.renames.insert(from.into(), to.into());
        self
    }

    /// Append a transform to the chain of `key`; unknown names are rejected here
    /// rather than on the first record.
    pub fn transform(mut self, key: impl Into<String>, spec: TransformSpec) -> Result<Self, TransformError> {
        if !self.registry.has_transform(spec.name()) {
            return Err(TransformError::NotFound(spec.name().to_string()));
        }
        self.transforms.entry(key.into()).or_default().push(spec);
        Ok(self)
    }

    /// The name `key` is written under
    pub fn map_key<'a>(&'a self, key: &'a str) -> &'a str {
        self.renames.get(key).map(String::as_str).unwrap_or(key)
    }

    pub fn is_identity(&self) -> bool {
        self.renames.is_empty() && self.transforms.is_empty()
    }

    /// Transform every value, then rename every key.
    pub fn apply(&self, record: Record) -> Result<Record, TransformError> {
        if self.is_identity() {
            return Ok(record);
        }

        let empty = HashMap::new();
        let mut out = Record::new();
        for (key, mut value) in record {
            if let Some(chain) = self.transforms.get(&key) {
                for spec in chain {
                    value = self.registry.call(spec.name(), &value, spec.args().unwrap_or(&empty))?;
                }
            }
            out.insert(self.map_key(&key).to_string(), value);
        }
        Ok(out)
    }
}

impl Default for DataMapper {
    fn default() -> Self {
        Self::new(Arc::new(TransformRegistry::with_builtins()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_builtin_text_transforms() {
        let registry = TransformRegistry::with_builtins();
        let value = FieldValue::text("  Acme Corp ");

        assert_eq!(
            registry.call("strip", &value, &HashMap::new()).unwrap(),
            FieldValue::text("Acme Corp")
        );
        assert_eq!(
            registry.call("uppercase", &value, &HashMap::new()).unwrap(),
            FieldValue::text("  ACME CORP ")
        );
        assert_eq!(
            registry
                .call("prefix", &FieldValue::text("1"), &args(&[("value", Value::from("X-"))]))
                .unwrap(),
            FieldValue::text("X-1")
        );
        assert_eq!(
            registry.call("lowercase", &FieldValue::Null, &HashMap::new()).unwrap(),
            FieldValue::Null
        );
    }

    #[test]
    fn test_multiply_repeats_text() {
        let registry = TransformRegistry::with_builtins();

        let out = registry
            .call("multiply", &FieldValue::text("ab"), &args(&[("count", Value::from(3))]))
            .unwrap();
        assert_eq!(out, FieldValue::text("ababab"));

        let missing = registry.call("multiply", &FieldValue::text("ab"), &HashMap::new());
        assert!(matches!(missing, Err(TransformError::InvalidArgs(_))));
    }

    #[test]
    fn test_transform_not_found() {
        let registry = TransformRegistry::new();
        let result = registry.call("nonexistent", &FieldValue::Null, &HashMap::new());

        assert!(matches!(result, Err(TransformError::NotFound(_))));
    }

    #[test]
    fn test_spec_accepts_name_or_options() {
        let specs: Vec<TransformSpec> =
            serde_yaml::from_str("- strip\n- name: suffix\n  args:\n    value: '!'\n").unwrap();

        assert_eq!(specs[0], TransformSpec::Named("strip".to_string()));
        assert_eq!(specs[1].name(), "suffix");
    }

    #[test]
    fn test_mapper_transforms_then_renames() {
        let mapper = DataMapper::default()
            .rename("Name", "Account Name")
            .transform("Name", TransformSpec::Named("strip".to_string()))
            .unwrap()
            .transform("Name", TransformSpec::Named("uppercase".to_string()))
            .unwrap();

        let record = Record::new().with("Id", "001000000000000").with("Name", " acme ");
        let mapped = mapper.apply(record).unwrap();

        assert_eq!(mapped.get("Account Name"), Some(&FieldValue::text("ACME")));
        assert!(!mapped.contains("Name"));
        assert_eq!(mapped.raw_id(), Some("001000000000000"));
    }

    #[test]
    fn test_mapper_rejects_unknown_transform() {
        let result = DataMapper::default().transform("Name", TransformSpec::Named("rot13".to_string()));
        assert!(matches!(result, Err(TransformError::NotFound(_))));
    }
}

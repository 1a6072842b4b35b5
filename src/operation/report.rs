//! Per-entity counts and per-record failures of a finished operation.

use std::collections::BTreeMap;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Per-record failures of one step: original identifier → message
pub type StepErrors = BTreeMap<String, String>;

/// Counts for a single entity type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCounts {
    pub extracted: usize,
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Outcome of an extraction or load, entities in step order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationReport {
    pub counts: IndexMap<String, EntityCounts>,
    pub errors: IndexMap<String, StepErrors>,
}

impl OperationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counts_mut(&mut self, entity: &str) -> &mut EntityCounts {
        self.counts.entry(entity.to_string()).or_default()
    }

    pub fn counts(&self, entity: &str) -> EntityCounts {
        self.counts.get(entity).cloned().unwrap_or_default()
    }

    /// Record a per-record failure; the first message for an identifier wins.
    pub fn record_failure(&mut self, entity: &str, original_id: &str, message: String) {
        let errors = self.errors.entry(entity.to_string()).or_default();
        if !errors.contains_key(original_id) {
            errors.insert(original_id.to_string(), message);
            self.counts_mut(entity).failed += 1;
        }
    }

    pub fn errors(&self, entity: &str) -> Option<&StepErrors> {
        self.errors.get(entity).filter(|e| !e.is_empty())
    }

    pub fn has_errors(&self) -> bool {
        self.errors.values().any(|e| !e.is_empty())
    }

    pub fn error_count(&self) -> usize {
        self.errors.values().map(BTreeMap::len).sum()
    }
}

impl fmt::Display for OperationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (entity, counts) in &self.counts {
            writeln!(
                f,
                "{}: {} extracted, {} inserted, {} updated, {} failed",
                entity, counts.extracted, counts.inserted, counts.updated, counts.failed
            )?;
        }
        for (entity, errors) in &self.errors {
            for (id, message) in errors {
                writeln!(f, "  {} {}: {}", entity, id, message)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failures_are_counted_once_per_record() {
        let mut report = OperationReport::new();
        report.record_failure("Account", "001000000000000AAA", "first".to_string());
        report.record_failure("Account", "001000000000000AAA", "second".to_string());

        assert_eq!(report.counts("Account").failed, 1);
        assert_eq!(report.errors("Account").unwrap()["001000000000000AAA"], "first");
        assert_eq!(report.error_count(), 1);
        assert!(report.errors("Contact").is_none());
    }

    #[test]
    fn test_display_lists_counts_in_step_order() {
        let mut report = OperationReport::new();
        report.counts_mut("Contact").inserted = 2;
        report.counts_mut("Account").inserted = 1;

        let text = report.to_string();
        assert!(text.find("Contact").unwrap() < text.find("Account").unwrap());
    }
}

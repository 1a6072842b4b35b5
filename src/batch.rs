//! Splitting identifier sets into bounded-size lookup batches.
//!
//! Identifier-set passes are sent to the store as `Field IN ('id', 'id', ...)`
//! predicates. Stores cap the length of a filter, so each pass is planned as a
//! series of chunks whose encoded identifier list stays under that cap.

use std::collections::BTreeSet;

use crate::error::{MigrationError, Result};
use crate::identifier::RecordId;

/// Default cap on the encoded length of one filter clause
pub const DEFAULT_MAX_FILTER_LENGTH: usize = 4000;

const SEPARATOR: &str = ", ";

/// Render identifiers as a quoted, comma-separated list.
pub fn encode_id_list(ids: &[RecordId]) -> String {
    ids.iter()
        .map(|id| format!("'{}'", id))
        .collect::<Vec<_>>()
        .join(SEPARATOR)
}

fn encoded_id_len(id: &RecordId) -> usize {
    id.as_str().len() + 2
}

/// Plans identifier chunks under a maximum encoded length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlanner {
    max_encoded_len: usize,
}

impl BatchPlanner {
    /// Planner whose chunks encode to at most `max_encoded_len` characters.
    pub fn new(max_encoded_len: usize) -> Result<Self> {
        // One quoted 18-character identifier must always fit.
        if max_encoded_len < 20 {
            return Err(MigrationError::Config(format!(
                "Maximum filter length {} cannot hold a single identifier",
                max_encoded_len
            )));
        }
        Ok(Self { max_encoded_len })
    }

    /// Planner for `id_field IN (...)` clauses under a total filter length.
    pub fn for_filter(max_filter_len: usize, id_field: &str) -> Result<Self> {
        let skeleton = format!("{} IN ()", id_field).len();
        Self::new(max_filter_len.saturating_sub(skeleton))
    }

    pub fn max_encoded_len(&self) -> usize {
        self.max_encoded_len
    }

    /// Split `ids` into chunks. Duplicates are dropped and every remaining
    /// identifier lands in exactly one chunk; chunks come out in identifier order.
    pub fn plan<'a>(&self, ids: impl IntoIterator<Item = &'a RecordId>) -> Vec<Vec<RecordId>> {
        let ordered: BTreeSet<&RecordId> = ids.into_iter().collect();

        let mut chunks = Vec::new();
        let mut current: Vec<RecordId> = Vec::new();
        let mut current_len = 0usize;

        for id in ordered {
            let added = if current.is_empty() {
                encoded_id_len(id)
            } else {
                encoded_id_len(id) + SEPARATOR.len()
            };

            if !current.is_empty() && current_len + added > self.max_encoded_len {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
                current.push(id.clone());
                current_len += encoded_id_len(id);
            } else {
                current.push(id.clone());
                current_len += added;
            }
        }

        if !current.is_empty() {
            chunks.push(current);
        }

        chunks
    }
}

impl Default for BatchPlanner {
    fn default() -> Self {
        Self {
            max_encoded_len: DEFAULT_MAX_FILTER_LENGTH,
        }
    }
}

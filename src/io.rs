//! Record sources and sinks at the edges of an operation.
//!
//! Extraction writes each entity's records to a [`RecordSink`]; load reads them
//! back through a [`RecordSource`] (twice: once per phase) and reports one
//! [`LoadResult`] row per input record to an optional [`ResultSink`]. Files
//! are NDJSON, one JSON object per line.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, Result};
use crate::identifier::RecordId;
use crate::record::Record;

/// A lazily read sequence of records
pub type RecordIter<'a> = Box<dyn Iterator<Item = Result<Record>> + 'a>;

/// Re-openable input for a load step
pub trait RecordSource {
    /// Start reading the records of `entity` from the beginning.
    fn open(&self, entity: &str) -> Result<RecordIter<'_>>;

    /// Every column name appearing in the input of `entity`.
    fn columns(&self, entity: &str) -> Result<BTreeSet<String>> {
        let mut columns = BTreeSet::new();
        for record in self.open(entity)? {
            columns.extend(record?.field_names().cloned());
        }
        Ok(columns)
    }
}

/// Append-only output of an extraction step
pub trait RecordSink {
    fn write(&mut self, record: &Record) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Outcome of loading one input record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LoadResult {
    pub original_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_id: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LoadResult {
    pub fn success(original_id: impl Into<String>, new_id: RecordId) -> Self {
        Self {
            original_id: original_id.into(),
            new_id: Some(new_id),
            error: None,
        }
    }

    pub fn failure(original_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            original_id: original_id.into(),
            new_id: None,
            error: Some(error.into()),
        }
    }
}

/// Receives per-record load outcomes
pub trait ResultSink {
    fn write_result(&mut self, result: &LoadResult) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// NDJSON (Newline Delimited JSON) writer
///
/// Writes one JSON object per line.
pub struct NdjsonWriter<W: Write> {
    writer: W,
}

impl<W: Write> NdjsonWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write a single item as an NDJSON line
    pub fn write_line<T: Serialize>(&mut self, item: &T) -> Result<()> {
        let json = serde_json::to_string(item)?;
        writeln!(self.writer, "{}", json)?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl NdjsonWriter<BufWriter<File>> {
    /// Create (or truncate) `path` for writing.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path.as_ref()).map_err(|e| {
            MigrationError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to create {}: {}", path.as_ref().display(), e),
            ))
        })?;
        Ok(Self::new(BufWriter::new(file)))
    }

    /// Open `path` for appending, creating it if missing.
    pub fn append<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .map_err(|e| {
                MigrationError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to open {} for appending: {}", path.as_ref().display(), e),
                ))
            })?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> RecordSink for NdjsonWriter<W> {
    fn write(&mut self, record: &Record) -> Result<()> {
        self.write_line(record)
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

impl<W: Write> ResultSink for NdjsonWriter<W> {
    fn write_result(&mut self, result: &LoadResult) -> Result<()> {
        self.write_line(result)
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Reads NDJSON lines, skipping blank ones
pub struct NdjsonReader<R: BufRead, T> {
    lines: std::io::Lines<R>,
    line_number: usize,
    _item: std::marker::PhantomData<T>,
}

impl<R: BufRead, T> NdjsonReader<R, T> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_number: 0,
            _item: std::marker::PhantomData,
        }
    }
}

impl<R: BufRead, T: DeserializeOwned> Iterator for NdjsonReader<R, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            self.line_number += 1;

            if line.trim().is_empty() {
                continue;
            }

            return Some(serde_json::from_str(&line).map_err(|e| {
                MigrationError::Serialization(format!("line {}: {}", self.line_number, e))
            }));
        }
    }
}

/// An NDJSON file holding the records of one entity
#[derive(Debug, Clone)]
pub struct NdjsonFileSource {
    path: PathBuf,
}

impl NdjsonFileSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSource for NdjsonFileSource {
    fn open(&self, _entity: &str) -> Result<RecordIter<'_>> {
        let file = File::open(&self.path).map_err(|e| {
            MigrationError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to open {}: {}", self.path.display(), e),
            ))
        })?;
        Ok(Box::new(NdjsonReader::<_, Record>::new(BufReader::new(file))))
    }
}

/// Records held in memory, keyed by entity type
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    records: HashMap<String, Vec<Record>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, entity: impl Into<String>, records: Vec<Record>) -> Self {
        self.records.insert(entity.into(), records);
        self
    }
}

impl RecordSource for MemorySource {
    fn open(&self, entity: &str) -> Result<RecordIter<'_>> {
        let records = self
            .records
            .get(entity)
            .ok_or_else(|| MigrationError::UnknownEntityType(entity.to_string()))?;
        Ok(Box::new(records.iter().cloned().map(Ok)))
    }
}

/// Collects written records; clones share the same buffer
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Rc<RefCell<Vec<Record>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.borrow().is_empty()
    }
}

impl RecordSink for MemorySink {
    fn write(&mut self, record: &Record) -> Result<()> {
        self.records.borrow_mut().push(record.clone());
        Ok(())
    }
}

/// Collects load results; clones share the same buffer
#[derive(Debug, Clone, Default)]
pub struct MemoryResultSink {
    results: Rc<RefCell<Vec<LoadResult>>>,
}

impl MemoryResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<LoadResult> {
        self.results.borrow().clone()
    }
}

impl ResultSink for MemoryResultSink {
    fn write_result(&mut self, result: &LoadResult) -> Result<()> {
        self.results.borrow_mut().push(result.clone());
        Ok(())
    }
}

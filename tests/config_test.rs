mod common;

use std::fs;
use std::sync::Arc;

use common::*;
use skein::{LoadResult, MemoryStore, OperationConfig, TransformRegistry};

const OPERATION: &str = r#"
version: 1
operation:
  - entity: Account
    fields:
      - field: Name
        column: AccountName
        transforms: [uppercase]
      - ParentId
      - PrimaryContactId
    extract: {query: "Name = 'Root'"}
    file: Account.ndjson
    result-file: Account.results.ndjson
  - entity: Contact
    field-group: smart
    extract: {descendants: true}
    file: Contact.ndjson
    result-file: Contact.results.ndjson
    outside-lookup-behavior: drop-field
    lookup-behaviors:
      ReportsToId: trace-all
"#;

fn read_lines(path: &std::path::Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect()
}

#[test]
fn test_extract_and_load_from_files() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("operation.yaml");
    fs::write(&config_path, OPERATION).unwrap();
    let config = OperationConfig::load_from_file(&config_path).unwrap();
    let registry = Arc::new(TransformRegistry::with_builtins());

    let source_path = dir.path().join("source.json");
    source_store().save_file(&source_path).unwrap();
    let source = MemoryStore::load_file(&source_path).unwrap();

    let mut extraction = config.build_extraction(&source, Arc::clone(&registry)).unwrap();
    let report = extraction.execute().unwrap();
    assert_eq!(report.counts("Account").extracted, 3);
    assert_eq!(report.counts("Contact").extracted, 3);

    let account_lines = read_lines(&dir.path().join("Account.ndjson"));
    assert_eq!(account_lines.len(), 3);
    assert!(account_lines.iter().any(|l| l.contains("\"AccountName\":\"ROOT\"")));
    assert!(account_lines.iter().all(|l| !l.contains("\"Name\"")));

    let target = MemoryStore::new(schemas());
    let mut load = config.build_load(&target, Arc::clone(&registry), false).unwrap();
    let report = load.execute().unwrap();
    assert!(!report.has_errors(), "{}", report);

    let root_id = load.translations().translate(&id(A0)).unwrap().clone();
    let root = target.get("Account", &root_id).unwrap();
    assert_eq!(root.lookup("Name"), Some("ROOT"));
    assert_eq!(target.records("Contact").len(), 3);

    let results: Vec<LoadResult> = read_lines(&dir.path().join("Account.results.ndjson"))
        .iter()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.new_id.is_some() && r.error.is_none()));

    // A resumed run appends to the result files instead of truncating them.
    let mut resumed = config.build_load(&target, registry, true).unwrap();
    resumed.resume_from(&load.run_state());
    resumed.execute().unwrap();
    assert_eq!(read_lines(&dir.path().join("Account.results.ndjson")).len(), 3);
}

#[test]
fn test_unknown_transform_is_rejected() {
    let yaml = OPERATION.replace("[uppercase]", "[reverse]");
    let config = OperationConfig::parse(&yaml).unwrap();
    let source = source_store();

    let err = config
        .build_extraction_with(&source, Arc::new(TransformRegistry::with_builtins()), |_| {
            Ok(Box::new(skein::io::MemorySink::new()) as Box<dyn skein::RecordSink>)
        })
        .err()
        .unwrap();
    assert!(err.to_string().contains("reverse"), "{}", err);
}

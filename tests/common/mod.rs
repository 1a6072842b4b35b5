//! Shared fixture: four related entity types and a small source data set.
//!
//! ```text
//! A0 Root <- A1 Child <- A2 Grandchild        A9 Other
//! C0 (A0) <- C1 (A1, reports to C0)           C9 (A9), C8 (A9)
//! O0 (A2)                                     O9 (A9)
//! T0 -> A1, T1 -> O0, T2 -> O9
//! ```
//! A0's primary contact is C9, which sits outside the Root hierarchy.

#![allow(dead_code)]

use skein::{EntitySchema, FieldDescriptor, FieldKind, MemoryStore, Record, RecordId};

pub const A0: &str = "001000000000000";
pub const A1: &str = "001000000000001";
pub const A2: &str = "001000000000002";
pub const A9: &str = "001000000000009";
pub const C0: &str = "003000000000000";
pub const C1: &str = "003000000000001";
pub const C8: &str = "003000000000008";
pub const C9: &str = "003000000000009";
pub const O0: &str = "006000000000000";
pub const O9: &str = "006000000000009";
pub const T0: &str = "00T000000000000";
pub const T1: &str = "00T000000000001";
pub const T2: &str = "00T000000000002";

pub fn id(raw: &str) -> RecordId {
    RecordId::parse(raw).unwrap()
}

pub fn schemas() -> Vec<EntitySchema> {
    vec![
        EntitySchema::new(
            "Account",
            "001",
            vec![
                FieldDescriptor::id(),
                FieldDescriptor::new("Name", FieldKind::String).required(),
                FieldDescriptor::reference("ParentId", &["Account"]),
                FieldDescriptor::reference("PrimaryContactId", &["Contact"]),
            ],
        ),
        EntitySchema::new(
            "Contact",
            "003",
            vec![
                FieldDescriptor::id(),
                FieldDescriptor::new("LastName", FieldKind::String).required(),
                FieldDescriptor::reference("AccountId", &["Account"]),
                FieldDescriptor::reference("ReportsToId", &["Contact"]),
            ],
        ),
        EntitySchema::new(
            "Opportunity",
            "006",
            vec![
                FieldDescriptor::id(),
                FieldDescriptor::new("Name", FieldKind::String).required(),
                FieldDescriptor::reference("AccountId", &["Account"]),
                FieldDescriptor::new("Amount", FieldKind::Double),
            ],
        ),
        EntitySchema::new(
            "Task",
            "00T",
            vec![
                FieldDescriptor::id(),
                FieldDescriptor::new("Subject", FieldKind::String),
                FieldDescriptor::reference("WhatId", &["Account", "Opportunity"]),
            ],
        ),
    ]
}

fn account(id: &str, name: &str, parent: Option<&str>, primary_contact: Option<&str>) -> Record {
    let mut record = Record::new().with("Id", id).with("Name", name);
    if let Some(parent) = parent {
        record.insert("ParentId", parent);
    }
    if let Some(contact) = primary_contact {
        record.insert("PrimaryContactId", contact);
    }
    record
}

fn contact(id: &str, last_name: &str, account: &str, reports_to: Option<&str>) -> Record {
    let mut record = Record::new()
        .with("Id", id)
        .with("LastName", last_name)
        .with("AccountId", account);
    if let Some(manager) = reports_to {
        record.insert("ReportsToId", manager);
    }
    record
}

pub fn source_store() -> MemoryStore {
    let store = MemoryStore::new(schemas());

    let accounts = [
        account(A0, "Root", None, Some(C9)),
        account(A1, "Child", Some(A0), None),
        account(A2, "Grandchild", Some(A1), None),
        account(A9, "Other", None, None),
    ];
    for record in accounts {
        store.seed("Account", record).unwrap();
    }

    let contacts = [
        contact(C0, "Smith", A0, None),
        contact(C1, "Jones", A1, Some(C0)),
        contact(C8, "Stranger", A9, None),
        contact(C9, "Outsider", A9, None),
    ];
    for record in contacts {
        store.seed("Contact", record).unwrap();
    }

    store
        .seed(
            "Opportunity",
            Record::new().with("Id", O0).with("Name", "Deal").with("AccountId", A2).with("Amount", 1200.5),
        )
        .unwrap();
    store
        .seed(
            "Opportunity",
            Record::new().with("Id", O9).with("Name", "Elsewhere").with("AccountId", A9),
        )
        .unwrap();

    for (task, subject, what) in [(T0, "Call", A1), (T1, "Email", O0), (T2, "Lunch", O9)] {
        store
            .seed("Task", Record::new().with("Id", task).with("Subject", subject).with("WhatId", what))
            .unwrap();
    }

    store
}

/// Identifiers held in a record list, sorted
pub fn ids(records: &[Record]) -> Vec<String> {
    let mut ids: Vec<String> = records.iter().filter_map(|r| r.raw_id().map(str::to_string)).collect();
    ids.sort();
    ids
}

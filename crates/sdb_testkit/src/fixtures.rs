//! Test databases and sample documents.

use sdb_core::{Document, Options, Result, DB};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tempfile::TempDir;

/// A database that cleans up after itself.
pub struct TestDatabase {
    /// The database.
    pub db: DB,
    dir: Option<TempDir>,
}

impl TestDatabase {
    /// An in-memory database.
    pub fn memory() -> Self {
        Self {
            db: DB::open("").expect("open in-memory database"),
            dir: None,
        }
    }

    /// A database in a fresh temporary directory.
    pub fn file() -> Self {
        Self::file_with(|options| options)
    }

    /// A database in a fresh temporary directory, with options adjusted by
    /// `configure`.
    pub fn file_with(configure: impl FnOnce(Options) -> Options) -> Self {
        let dir = TempDir::new().expect("create temp directory");
        let db = DB::open_with(configure(Options::new(dir.path()))).expect("open database");
        Self { db, dir: Some(dir) }
    }

    /// Root directory, or `None` for an in-memory database.
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(TempDir::path)
    }

    /// Closes the database and opens it again from the same directory.
    ///
    /// # Panics
    ///
    /// On an in-memory database, which would come back empty.
    pub fn reopen(self) -> Self {
        let Self { db, dir } = self;
        let dir = dir.expect("only on-disk databases can be reopened");
        db.close().expect("close database");
        drop(db);
        let db = DB::open(dir.path()).expect("reopen database");
        Self { db, dir: Some(dir) }
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = DB;

    fn deref(&self) -> &DB {
        &self.db
    }
}

/// Runs `f` against a throwaway in-memory database.
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&DB) -> R,
{
    let db = TestDatabase::memory();
    f(&db.db)
}

/// A sample document type with a doctype, text, a number and a flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    /// Always `"person"`.
    #[serde(rename = "Doctype")]
    pub doctype: String,
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: String,
    /// Age in years.
    pub age: u32,
    /// Whether the account is active.
    pub active: bool,
    /// Free-form attributes, indexed as `extra.<name>`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl Person {
    /// A person with the given fields, active.
    pub fn new(name: &str, email: &str, age: u32) -> Self {
        Self {
            doctype: "person".into(),
            name: name.into(),
            email: email.into(),
            age,
            active: true,
            extra: BTreeMap::new(),
        }
    }

    /// Adds a free-form attribute.
    pub fn with_extra(mut self, name: &str, value: &str) -> Self {
        self.extra.insert(name.into(), value.into());
        self
    }

    /// Storage key under the `person:` prefix.
    pub fn key(&self) -> Vec<u8> {
        format!("person:{}", self.email).into_bytes()
    }
}

/// A free-text document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Note {
    /// Always `"note"`.
    pub doctype: String,
    /// Note body.
    pub data: String,
}

impl Note {
    /// A note holding `data`.
    pub fn new(data: &str) -> Self {
        Self {
            doctype: "note".into(),
            data: data.into(),
        }
    }
}

/// Three people with distinct emails `a@x`, `b@x` and `c@x`.
pub fn sample_people() -> Vec<Person> {
    vec![
        Person::new("Ada Lovelace", "a@x", 36),
        Person::new("Brian Kernighan", "b@x", 82),
        Person::new("Claude Shannon", "c@x", 84),
    ]
}

/// Stores `people` under [`Person::key`] in one transaction.
pub fn seed_people(db: &DB, people: &[Person]) {
    let mut tx = db.new_tx(DB::READ_WRITE).expect("begin");
    for p in people {
        tx.set(&p.key(), p).expect("set person");
    }
    tx.commit().expect("commit people");
}

/// Rebuilds the index decoding every value as a generic [`Document`].
pub fn reload_documents(db: &DB) -> Result<usize> {
    db.reload_index(|tx, key| tx.get::<Document>(key))
}

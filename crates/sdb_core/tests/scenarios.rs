//! End-to-end behaviour of `DB` and `Tx`.

use sdb_core::index::{DocumentMapping, FieldMapping};
use sdb_core::{IndexMapping, Options, SearchRequest, DB};
use sdb_testkit::prelude::*;

#[test]
fn basic_lifecycle() {
    init_test_logging();
    let db = DB::open("").unwrap();
    let mut tx = db.new_tx(DB::READ_WRITE).unwrap();
    tx.set(b"k1", &Person::new("A", "a@x", 30)).unwrap();
    tx.commit().unwrap();

    let mut tx = db.new_tx(DB::READ_ONLY).unwrap();
    let p: Person = tx.get(b"k1").unwrap();
    assert_eq!(p.name, "A");
    tx.discard();
    db.close().unwrap();
}

#[test]
fn tombstone_removes_from_store_and_index() {
    let db = TestDatabase::memory();
    seed_people(&db, &sample_people());
    let key = sample_people()[0].key();

    let mut tx = db.new_tx(DB::READ_WRITE).unwrap();
    tx.delete(&key).unwrap();
    tx.commit().unwrap();

    let mut tx = db.new_tx(DB::READ_ONLY).unwrap();
    assert!(tx.get::<Person>(&key).unwrap_err().is_not_found());
    assert!(!tx.find("*", &[]).unwrap().contains(&key));
    assert!(tx.find("lovelace", &[]).unwrap().is_empty());
}

#[test]
fn discarded_writes_are_invisible() {
    let db = TestDatabase::memory();
    seed_people(&db, &sample_people());
    let kept = sample_people()[1].key();

    let mut tx = db.new_tx(DB::READ_WRITE).unwrap();
    tx.set(b"person:z@x", &Person::new("Zed", "z@x", 1)).unwrap();
    tx.delete(&kept).unwrap();
    tx.discard();

    let mut tx = db.new_tx(DB::READ_ONLY).unwrap();
    assert!(tx.get::<Person>(b"person:z@x").unwrap_err().is_not_found());
    assert_eq!(tx.get::<Person>(&kept).unwrap(), sample_people()[1]);
    assert!(tx.find("zed", &[]).unwrap().is_empty());
    assert_eq!(tx.find("kernighan", &[]).unwrap(), vec![kept]);
}

#[test]
fn find_sorts_descending_on_email() {
    let db = TestDatabase::memory();
    seed_people(&db, &sample_people());

    let tx = db.new_tx(DB::READ_ONLY).unwrap();
    let keys = tx.find("", &["-email"]).unwrap();
    assert_eq!(
        keys,
        vec![
            b"person:c@x".to_vec(),
            b"person:b@x".to_vec(),
            b"person:a@x".to_vec()
        ]
    );
    assert!(tx.find("", &[]).unwrap().is_empty());
}

#[test]
fn multiple_sort_fields_apply_in_order() {
    let db = TestDatabase::memory();
    seed_people(
        &db,
        &[
            Person::new("Old One", "o1@x", 90),
            Person::new("Young One", "y1@x", 20),
            Person::new("Old Two", "o2@x", 90),
        ],
    );
    let tx = db.new_tx(DB::READ_ONLY).unwrap();
    let keys = tx.find("*", &["-age", "-email"]).unwrap();
    assert_eq!(
        keys,
        vec![
            b"person:o2@x".to_vec(),
            b"person:o1@x".to_vec(),
            b"person:y1@x".to_vec()
        ]
    );
}

#[test]
fn query_after_reload() {
    let db = TestDatabase::file();
    seed_people(&db, &sample_people());

    // Wipe the index behind the store's back.
    for p in sample_people() {
        db.index().delete(&p.key()).unwrap();
    }
    let tx = db.new_tx(DB::READ_ONLY).unwrap();
    assert!(tx.find(r#"email:"b@x""#, &[]).unwrap().is_empty());
    drop(tx);

    assert_eq!(reload_documents(&db).unwrap(), 3);
    let tx = db.new_tx(DB::READ_ONLY).unwrap();
    assert_eq!(
        tx.find(r#"email:"b@x""#, &[]).unwrap(),
        vec![b"person:b@x".to_vec()]
    );
}

#[test]
fn reload_finds_free_text_after_reopen() {
    let db = TestDatabase::file();
    let mut tx = db.new_tx(DB::READ_WRITE).unwrap();
    tx.set(b"note:1", &Note::new("lorem ipsum dolor sit amet")).unwrap();
    tx.set(b"note:2", &Note::new("consectetur adipiscing elit")).unwrap();
    tx.commit().unwrap();
    drop(tx);

    let db = db.reopen();
    reload_documents(&db).unwrap();
    let tx = db.new_tx(DB::READ_ONLY).unwrap();
    assert_eq!(tx.find("Data:lorem", &[]).unwrap(), vec![b"note:1".to_vec()]);
    assert_eq!(tx.find("Doctype:note", &["_id"]).unwrap().len(), 2);
}

#[test]
fn malformed_stored_bytes_fail_to_decode() {
    let db = TestDatabase::memory();
    let mut tx = db.new_tx(DB::READ_WRITE).unwrap();
    tx.set_bytes(b"person:broken", b"{not cbor").unwrap();
    tx.commit().unwrap();

    let mut tx = db.new_tx(DB::READ_ONLY).unwrap();
    let err = tx.get::<Person>(b"person:broken").unwrap_err();
    assert!(err.is_encoding_error(), "{err:?}");
    assert!(err.to_string().starts_with("encoding: "), "{err}");
}

#[test]
fn data_survives_reopen() {
    let db = TestDatabase::file();
    seed_people(&db, &sample_people());
    let db = db.reopen();

    let mut tx = db.new_tx(DB::READ_ONLY).unwrap();
    for p in sample_people() {
        assert_eq!(tx.get::<Person>(&p.key()).unwrap(), p);
    }
    assert_eq!(tx.prefix(b"person:").unwrap().len(), 3);
    assert_eq!(tx.find("shannon", &[]).unwrap(), vec![b"person:c@x".to_vec()]);
}

#[test]
fn keyword_mapping_matches_whole_values() {
    let mapping = IndexMapping::new().document(
        "person",
        DocumentMapping::new().field("email", FieldMapping::keyword()),
    );
    let db = TestDatabase::file_with(|o| o.mapping(mapping));
    seed_people(&db, &[Person::new("Ada", "ada@example.com", 36)]);

    let tx = db.new_tx(DB::READ_ONLY).unwrap();
    assert!(tx.find("email:example.com", &[]).unwrap().is_empty());
    assert_eq!(tx.find("email:ada@example.com", &[]).unwrap().len(), 1);
    // Unscoped text still goes through the standard analyzer.
    assert_eq!(tx.find("ada", &[]).unwrap().len(), 1);
}

#[test]
fn extra_attributes_are_searchable() {
    let db = TestDatabase::memory();
    seed_people(
        &db,
        &[
            Person::new("Ada", "a@x", 36).with_extra("team", "engines"),
            Person::new("Bob", "b@x", 40).with_extra("team", "looms"),
        ],
    );
    let tx = db.new_tx(DB::READ_ONLY).unwrap();
    assert_eq!(tx.find("extra.team:looms", &[]).unwrap(), vec![b"person:b@x".to_vec()]);
}

#[test]
fn boolean_and_numeric_queries() {
    let db = TestDatabase::memory();
    let mut retired = Person::new("Grace Hopper", "g@x", 85);
    retired.active = false;
    seed_people(&db, &[Person::new("Ada", "a@x", 36), retired]);

    let tx = db.new_tx(DB::READ_ONLY).unwrap();
    assert_eq!(tx.find("+active:false", &[]).unwrap(), vec![b"person:g@x".to_vec()]);
    assert_eq!(tx.find("age:>=50", &[]).unwrap(), vec![b"person:g@x".to_vec()]);
    assert_eq!(tx.find("+Doctype:person -age:<50", &[]).unwrap().len(), 1);
}

#[test]
fn paged_search() {
    let db = TestDatabase::memory();
    let people: Vec<Person> = (0..10)
        .map(|i| Person::new(&format!("Member {i}"), &format!("m{i}@x"), 20 + i))
        .collect();
    seed_people(&db, &people);

    let tx = db.new_tx(DB::READ_ONLY).unwrap();
    let page = tx
        .search(&SearchRequest::new("member").sort(["age"]).offset(3).limit(4))
        .unwrap();
    assert_eq!(page.total, 10);
    assert_eq!(
        page.ids(),
        (3..7).map(|i| format!("person:m{i}@x").into_bytes()).collect::<Vec<_>>()
    );
}

#[test]
fn independent_databases_coexist() {
    let a = TestDatabase::memory();
    let b = TestDatabase::memory();
    seed_people(&a, &sample_people());

    let tx = b.new_tx(DB::READ_ONLY).unwrap();
    assert!(tx.find("*", &[]).unwrap().is_empty());
    let tx = a.new_tx(DB::READ_ONLY).unwrap();
    assert_eq!(tx.find("*", &[]).unwrap().len(), 3);
}

#[test]
fn readers_keep_their_snapshot() {
    let db = TestDatabase::memory();
    seed_people(&db, &sample_people());
    let key = sample_people()[0].key();

    let mut reader = db.new_tx(DB::READ_ONLY).unwrap();
    let mut writer = db.new_tx(DB::READ_WRITE).unwrap();
    writer.set(&key, &Person::new("Renamed", "a@x", 37)).unwrap();
    writer.commit().unwrap();

    assert_eq!(reader.get::<Person>(&key).unwrap().name, "Ada Lovelace");
    let mut fresh = db.new_tx(DB::READ_ONLY).unwrap();
    assert_eq!(fresh.get::<Person>(&key).unwrap().name, "Renamed");
}

#[test]
fn in_memory_options_leave_no_files() {
    let db = DB::open_with(Options::in_memory().log_label("scratch")).unwrap();
    assert!(db.options().is_in_memory());
    assert_eq!(db.options().log_label, "scratch");
    seed_people(&db, &sample_people());
    assert_eq!(db.index().doc_count(), 3);
}

#[test]
fn index_failure_after_commit_keeps_data_until_reload() {
    let db = TestDatabase::file();
    db.index().close().unwrap();

    let grace = Person::new("Grace", "g@x", 40);
    {
        let mut tx = db.new_tx(DB::READ_WRITE).unwrap();
        tx.set(&grace.key(), &grace).unwrap();
        let err = tx.commit().unwrap_err();
        assert!(err.is_index_error(), "{err:?}");
        assert!(!err.is_engine_error(), "{err:?}");
        assert!(!tx.is_active());

        let mut tx = db.new_tx(DB::READ_ONLY).unwrap();
        assert_eq!(tx.get::<Person>(&grace.key()).unwrap(), grace);
    }

    // A fresh index handle clears the fault; the store is still ahead of it.
    let db = db.reopen();
    {
        let tx = db.new_tx(DB::READ_ONLY).unwrap();
        assert!(tx.find("grace", &[]).unwrap().is_empty());
    }

    assert_eq!(reload_documents(&db).unwrap(), 1);
    let tx = db.new_tx(DB::READ_ONLY).unwrap();
    assert_eq!(tx.find("grace", &[]).unwrap(), vec![grace.key()]);
}

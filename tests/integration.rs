use bson::doc;
use nexustore::config::EngineConfig;
use nexustore::engine::StorageEngine;
use nexustore::{CollectionCatalog, DocumentCollection};
use std::sync::Arc;

fn open() -> (tempfile::TempDir, StorageEngine) {
    let dir = tempfile::tempdir().unwrap();
    let engine = StorageEngine::open(dir.path().join("t.db"), EngineConfig::new_16k()).unwrap();
    (dir, engine)
}

/// S4: a secondary index range over a duplicate-valued field returns every
/// matching document, ordered by primary id, and excludes non-matches.
#[test]
fn secondary_index_range_returns_duplicates_in_id_order() {
    let (_dir, engine) = open();
    let txn = engine.begin_transaction().unwrap();
    let mut collection = DocumentCollection::create(&engine, txn, "people").unwrap();
    collection.create_index(&engine, txn, "by_age", "age", false).unwrap();

    let a = collection.insert(&engine, txn, &doc! { "name": "a", "age": 30i32 }).unwrap();
    let b = collection.insert(&engine, txn, &doc! { "name": "b", "age": 30i32 }).unwrap();
    collection.insert(&engine, txn, &doc! { "name": "c", "age": 31i32 }).unwrap();
    engine.commit(txn).unwrap();

    let txn2 = engine.begin_transaction().unwrap();
    let matches = collection.find_by_index(&engine, txn2, "by_age", &bson::Bson::Int32(30)).unwrap();
    assert_eq!(matches.len(), 2);
    let names: Vec<&str> = matches.iter().map(|d| d.get_str("name").unwrap()).collect();
    assert_eq!(names, vec!["a", "b"]);
    let _ = (a, b);
}

/// A collection's catalog record, primary index, and secondary indexes all
/// survive a close/reopen cycle.
#[test]
fn collection_survives_reopen_with_indexes_intact() {
    let (_dir, engine) = open();
    {
        let txn = engine.begin_transaction().unwrap();
        let mut collection = DocumentCollection::create(&engine, txn, "events").unwrap();
        collection.create_index(&engine, txn, "by_kind", "kind", false).unwrap();
        collection.insert(&engine, txn, &doc! { "kind": "login", "at": 1 }).unwrap();
        collection.insert(&engine, txn, &doc! { "kind": "logout", "at": 2 }).unwrap();
        engine.commit(txn).unwrap();
        engine.checkpoint().unwrap();
    }

    let collection = DocumentCollection::open(&engine, "events").unwrap();
    let logins = collection.find_by_index(&engine, nexustore::TxnId(0), "by_kind", &bson::Bson::String("login".into())).unwrap();
    assert_eq!(logins.len(), 1);

    let all = CollectionCatalog::list(&engine).unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].1.name, "events");
}

/// S5: two threads committing disjoint page writes concurrently both land;
/// nothing is silently dropped.
#[test]
fn concurrent_commits_both_land() {
    let (_dir, engine) = open();
    let engine = Arc::new(engine);
    let page_a = engine.allocate_page().unwrap();
    let page_b = engine.allocate_page().unwrap();

    let e1 = Arc::clone(&engine);
    let t1 = std::thread::spawn(move || {
        let txn = e1.begin_transaction().unwrap();
        e1.write_page(page_a, txn, &vec![0xAAu8; e1.page_size() as usize]).unwrap();
        e1.commit(txn).unwrap();
    });
    let e2 = Arc::clone(&engine);
    let t2 = std::thread::spawn(move || {
        let txn = e2.begin_transaction().unwrap();
        e2.write_page(page_b, txn, &vec![0xBBu8; e2.page_size() as usize]).unwrap();
        e2.commit(txn).unwrap();
    });
    t1.join().unwrap();
    t2.join().unwrap();

    assert_eq!(engine.read_page(page_a, None).unwrap(), vec![0xAAu8; engine.page_size() as usize]);
    assert_eq!(engine.read_page(page_b, None).unwrap(), vec![0xBBu8; engine.page_size() as usize]);
}

/// S6: a cursor's already-emitted keys are never re-emitted or skipped when
/// another thread inserts further into the same tree mid-scan.
#[test]
fn cursor_is_stable_against_concurrent_inserts_beyond_its_bound() {
    use nexustore::btree::BTree;
    use nexustore::btree::cursor::Cursor;
    use nexustore::index_key::encode_i64_key;
    use nexustore::types::DocumentLocation;

    let (_dir, engine) = open();
    let txn = engine.begin_transaction().unwrap();
    let root = BTree::create_empty(&engine, txn).unwrap();
    let tree = BTree::new(root, 4);
    for i in 0..30i64 {
        tree.insert(&engine, txn, encode_i64_key(i), DocumentLocation { page_id: (i as u32) + 2, slot_index: 0 }).unwrap();
    }
    engine.commit(txn).unwrap();

    let bound = encode_i64_key(29);
    let scan_txn = engine.begin_transaction().unwrap();
    let mut cursor = Cursor::new(&engine, &tree, scan_txn);
    cursor.move_to_first().unwrap();
    let mut seen = Vec::new();
    let mut steps = 0;
    while cursor.is_valid() {
        let key = cursor.current().unwrap().key;
        if key > bound {
            break;
        }
        seen.push(key);
        steps += 1;
        if steps == 15 {
            // A concurrent transaction inserts keys past the scan's
            // declared bound; they must never show up in `seen`.
            let other_txn = engine.begin_transaction().unwrap();
            for i in 1000..1010i64 {
                tree.insert(&engine, other_txn, encode_i64_key(i), DocumentLocation { page_id: 500, slot_index: 0 }).ok();
            }
            engine.commit(other_txn).ok();
        }
        cursor.move_next().unwrap();
    }
    assert_eq!(seen.len(), 30);
    for w in seen.windows(2) {
        assert!(w[0] < w[1]);
    }
    assert!(seen.iter().all(|k| *k <= bound));
}

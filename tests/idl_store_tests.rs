//! Tests for the block-structured IDL store
//!
//! These tests verify:
//! - Leaf blocks split into continuation blocks behind an indirect header
//! - Header entries track continuation blocks' first ids
//! - Collapse to ALLIDS past the block limit, leaving no continuation blocks
//! - A missing continuation block reads as empty
//! - Deletes from collapsed keys are no-ops

use ldbm::idl::{continuation_key, Id, IdBlock, Idl, IdlStore, KeyInsert, CONT_PREFIX};
use ldbm::storage::{DbFile, OpenMode};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

const KEY: &[u8] = b"=smith";

fn setup_temp_db() -> (TempDir, DbFile) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("cn.ldbm");
    let db = DbFile::open(&path, "cn", OpenMode::Writer).unwrap();
    (temp_dir, db)
}

fn header(db: &DbFile) -> IdBlock {
    IdBlock::decode(&db.get(KEY).unwrap()).unwrap()
}

fn ids(idl: &Idl) -> Vec<Id> {
    idl.iter().collect()
}

// =============================================================================
// Basic Tests
// =============================================================================

#[test]
fn test_missing_key_reads_empty() {
    let (_temp, db) = setup_temp_db();
    let store = IdlStore::new(4, 8);

    let idl = store.fetch(&db, KEY, 100).unwrap();
    assert!(idl.is_empty());
    assert!(!idl.is_all_ids());
}

#[test]
fn test_insert_and_fetch_single_block() {
    let (_temp, db) = setup_temp_db();
    let store = IdlStore::new(4, 8);

    assert_eq!(store.insert(&db, KEY, 3).unwrap(), KeyInsert::Inserted);
    assert_eq!(store.insert(&db, KEY, 1).unwrap(), KeyInsert::Inserted);
    assert_eq!(store.insert(&db, KEY, 3).unwrap(), KeyInsert::AlreadyPresent);

    assert_eq!(ids(&store.fetch(&db, KEY, 100).unwrap()), vec![1, 3]);
    assert_eq!(header(&db), IdBlock::Leaf(vec![1, 3]));
}

// =============================================================================
// Split Tests
// =============================================================================

#[test]
fn test_full_leaf_splits_into_indirect() {
    let (_temp, db) = setup_temp_db();
    let store = IdlStore::new(4, 8);

    for id in 1..=5 {
        store.insert(&db, KEY, id).unwrap();
    }

    // Header keys equal the two blocks' first ids
    assert_eq!(header(&db), IdBlock::Indirect(vec![1, 5]));

    let left = IdBlock::decode(&db.get(&continuation_key(KEY, 1)).unwrap()).unwrap();
    let right = IdBlock::decode(&db.get(&continuation_key(KEY, 5)).unwrap()).unwrap();
    assert_eq!(left, IdBlock::Leaf(vec![1, 2, 3, 4]));
    assert_eq!(right, IdBlock::Leaf(vec![5]));

    assert_eq!(ids(&store.fetch(&db, KEY, 100).unwrap()), vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_insert_below_first_rekeys_block() {
    let (_temp, db) = setup_temp_db();
    let store = IdlStore::new(4, 8);

    for id in [10, 20, 30, 40, 50] {
        store.insert(&db, KEY, id).unwrap();
    }
    assert_eq!(header(&db), IdBlock::Indirect(vec![10, 50]));

    // Make room in the first block, then insert below its first id
    assert!(store.delete(&db, KEY, 20).unwrap());
    store.insert(&db, KEY, 5).unwrap();

    assert_eq!(header(&db), IdBlock::Indirect(vec![5, 50]));
    assert!(db.contains(&continuation_key(KEY, 5)));
    assert!(!db.contains(&continuation_key(KEY, 10)));

    // The first block is full again; 45 splits it at the end
    store.insert(&db, KEY, 45).unwrap();
    assert_eq!(header(&db), IdBlock::Indirect(vec![5, 45, 50]));

    assert_eq!(
        ids(&store.fetch(&db, KEY, 100).unwrap()),
        vec![5, 10, 30, 40, 45, 50]
    );
}

#[test]
fn test_many_inserts_stay_sorted() {
    let (_temp, db) = setup_temp_db();
    let store = IdlStore::new(8, 64);

    let mut expected = Vec::new();
    for i in 0..200u64 {
        // Scatter the insertion order
        let id = (i * 37) % 200 + 1;
        store.insert(&db, KEY, id).unwrap();
        expected.push(id);
    }
    expected.sort_unstable();

    assert_eq!(ids(&store.fetch(&db, KEY, 1000).unwrap()), expected);
    assert!(matches!(header(&db), IdBlock::Indirect(_)));
}

// =============================================================================
// Collapse Tests
// =============================================================================

#[test]
fn test_collapse_to_all_ids() {
    let (_temp, db) = setup_temp_db();
    let store = IdlStore::new(2, 2);

    store.insert(&db, KEY, 1).unwrap();
    store.insert(&db, KEY, 2).unwrap();
    store.insert(&db, KEY, 3).unwrap(); // split: [1,2] [3]
    store.insert(&db, KEY, 4).unwrap(); // [1,2] [3,4]
    assert_eq!(header(&db), IdBlock::Indirect(vec![1, 3]));

    // A third block would exceed the limit
    assert_eq!(store.insert(&db, KEY, 5).unwrap(), KeyInsert::Collapsed);

    assert_eq!(header(&db), IdBlock::AllIds);
    assert!(db.keys_with_prefix(&[CONT_PREFIX]).is_empty());
    assert!(store.fetch(&db, KEY, 100).unwrap().is_all_ids());
}

#[test]
fn test_collapse_is_permanent() {
    let (_temp, db) = setup_temp_db();
    let store = IdlStore::new(2, 1);

    store.insert(&db, KEY, 1).unwrap();
    store.insert(&db, KEY, 2).unwrap();
    assert_eq!(store.insert(&db, KEY, 3).unwrap(), KeyInsert::Collapsed);

    // Membership is unknown: deletes do nothing, inserts are absorbed
    assert!(!store.delete(&db, KEY, 1).unwrap());
    assert_eq!(store.insert(&db, KEY, 9).unwrap(), KeyInsert::AlreadyPresent);
    assert!(store.fetch(&db, KEY, 10).unwrap().is_all_ids());
}

// =============================================================================
// Delete Tests
// =============================================================================

#[test]
fn test_delete_from_leaf() {
    let (_temp, db) = setup_temp_db();
    let store = IdlStore::new(4, 8);

    store.insert(&db, KEY, 1).unwrap();
    store.insert(&db, KEY, 2).unwrap();

    assert!(store.delete(&db, KEY, 1).unwrap());
    assert!(!store.delete(&db, KEY, 1).unwrap());
    assert!(store.delete(&db, KEY, 2).unwrap());

    // Empty list removes the key
    assert!(!db.contains(KEY));
}

#[test]
fn test_delete_empties_continuation_block() {
    let (_temp, db) = setup_temp_db();
    let store = IdlStore::new(2, 8);

    for id in 1..=3 {
        store.insert(&db, KEY, id).unwrap();
    }
    assert_eq!(header(&db), IdBlock::Indirect(vec![1, 3]));

    assert!(store.delete(&db, KEY, 3).unwrap());
    assert_eq!(header(&db), IdBlock::Indirect(vec![1]));
    assert!(!db.contains(&continuation_key(KEY, 3)));

    assert!(store.delete(&db, KEY, 1).unwrap());
    assert_eq!(header(&db), IdBlock::Indirect(vec![2]));
    assert!(store.delete(&db, KEY, 2).unwrap());
    assert!(!db.contains(KEY));
}

// =============================================================================
// Inconsistency Tests
// =============================================================================

#[test]
fn test_missing_continuation_block_reads_as_empty() {
    let (_temp, db) = setup_temp_db();
    let store = IdlStore::new(2, 8);

    for id in 1..=4 {
        store.insert(&db, KEY, id).unwrap();
    }
    assert_eq!(header(&db), IdBlock::Indirect(vec![1, 3]));

    db.delete(&continuation_key(KEY, 1)).unwrap();

    let idl = store.fetch(&db, KEY, 100).unwrap();
    assert_eq!(ids(&idl), vec![3, 4]);
}

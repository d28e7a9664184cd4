//! Tests for the DN scope index
//!
//! These tests verify:
//! - Base, one-level and subtree scopes read back the right ids
//! - Delete removes an entry from every family
//! - Duplicate DNs are rejected without writing
//! - Rename moves the subtree and one-level memberships
//! - Collapsed families read as ALLIDS

use ldbm::dn::DnIndex;
use ldbm::idl::{Id, Idl, IdlStore};
use ldbm::storage::DbPool;
use ldbm::{LdbmError, Scope};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

const NEXT_ID: Id = 100;

fn setup_index(dir: &TempDir) -> DnIndex {
    DnIndex::new(DbPool::new(dir.path(), 4), IdlStore::new(8, 4), "o=y")
}

/// o=y(1) ─ ou=x(2) ─┬─ cn=a(3)
///                   └─ cn=b(4)
fn populate(index: &DnIndex) {
    index.add("o=y", 1).unwrap();
    index.add("ou=x,o=y", 2).unwrap();
    index.add("cn=a,ou=x,o=y", 3).unwrap();
    index.add("cn=b,ou=x,o=y", 4).unwrap();
}

fn scope(index: &DnIndex, base: &str, scope: Scope) -> Vec<Id> {
    index
        .scope_candidates(base, scope, NEXT_ID)
        .unwrap()
        .iter()
        .collect()
}

// =============================================================================
// Scope Tests
// =============================================================================

#[test]
fn test_scopes_over_small_tree() {
    let dir = TempDir::new().unwrap();
    let index = setup_index(&dir);
    populate(&index);

    assert_eq!(scope(&index, "ou=x,o=y", Scope::Base), vec![2]);
    assert_eq!(scope(&index, "ou=x,o=y", Scope::OneLevel), vec![3, 4]);
    assert_eq!(scope(&index, "ou=x,o=y", Scope::Subtree), vec![2, 3, 4]);

    assert_eq!(scope(&index, "o=y", Scope::OneLevel), vec![2]);
    assert_eq!(scope(&index, "o=y", Scope::Subtree), vec![1, 2, 3, 4]);

    // A leaf's subtree is itself
    assert_eq!(scope(&index, "cn=a,ou=x,o=y", Scope::Subtree), vec![3]);
    assert!(scope(&index, "cn=a,ou=x,o=y", Scope::OneLevel).is_empty());
}

#[test]
fn test_unknown_base_is_empty() {
    let dir = TempDir::new().unwrap();
    let index = setup_index(&dir);
    populate(&index);

    assert!(scope(&index, "ou=nowhere,o=y", Scope::Subtree).is_empty());
    assert_eq!(index.lookup("ou=nowhere,o=y").unwrap(), None);
}

#[test]
fn test_empty_base_reads_everything() {
    let dir = TempDir::new().unwrap();
    let index = setup_index(&dir);
    populate(&index);

    assert!(index.scope_candidates("", Scope::Base, NEXT_ID).unwrap().is_empty());
    assert!(index
        .scope_candidates("", Scope::Subtree, NEXT_ID)
        .unwrap()
        .is_all_ids());
}

#[test]
fn test_lookup_and_children() {
    let dir = TempDir::new().unwrap();
    let index = setup_index(&dir);
    populate(&index);

    assert_eq!(index.lookup("cn=b,ou=x,o=y").unwrap(), Some(4));
    assert!(index.has_children("ou=x,o=y").unwrap());
    assert!(!index.has_children("cn=b,ou=x,o=y").unwrap());
    assert_eq!(
        index.children("o=y", NEXT_ID).unwrap(),
        Idl::from_ids([2])
    );
}

// =============================================================================
// Update Tests
// =============================================================================

#[test]
fn test_duplicate_dn_rejected() {
    let dir = TempDir::new().unwrap();
    let index = setup_index(&dir);
    populate(&index);

    let result = index.add("cn=a,ou=x,o=y", 9);
    assert!(matches!(result, Err(LdbmError::Duplicate(_))));

    // Nothing about id 9 was written
    assert!(!scope(&index, "ou=x,o=y", Scope::OneLevel).contains(&9));
    assert!(!scope(&index, "o=y", Scope::Subtree).contains(&9));
}

#[test]
fn test_delete_removes_every_family() {
    let dir = TempDir::new().unwrap();
    let index = setup_index(&dir);
    populate(&index);

    index.delete("cn=a,ou=x,o=y", 3).unwrap();

    assert_eq!(index.lookup("cn=a,ou=x,o=y").unwrap(), None);
    assert_eq!(scope(&index, "ou=x,o=y", Scope::OneLevel), vec![4]);
    assert_eq!(scope(&index, "ou=x,o=y", Scope::Subtree), vec![2, 4]);
    assert_eq!(scope(&index, "o=y", Scope::Subtree), vec![1, 2, 4]);
    assert!(scope(&index, "cn=a,ou=x,o=y", Scope::Subtree).is_empty());
}

#[test]
fn test_rename_moves_memberships() {
    let dir = TempDir::new().unwrap();
    let index = setup_index(&dir);
    populate(&index);

    index.rename("cn=b,ou=x,o=y", "cn=b,o=y", 4).unwrap();

    assert_eq!(index.lookup("cn=b,ou=x,o=y").unwrap(), None);
    assert_eq!(index.lookup("cn=b,o=y").unwrap(), Some(4));
    assert_eq!(scope(&index, "ou=x,o=y", Scope::OneLevel), vec![3]);
    assert_eq!(scope(&index, "ou=x,o=y", Scope::Subtree), vec![2, 3]);
    assert_eq!(scope(&index, "o=y", Scope::OneLevel), vec![2, 4]);
    // Shared ancestor untouched
    assert_eq!(scope(&index, "o=y", Scope::Subtree), vec![1, 2, 3, 4]);
}

#[test]
fn test_rename_onto_existing_dn_fails() {
    let dir = TempDir::new().unwrap();
    let index = setup_index(&dir);
    populate(&index);

    let result = index.rename("cn=b,ou=x,o=y", "cn=a,ou=x,o=y", 4);
    assert!(matches!(result, Err(LdbmError::Duplicate(_))));
    assert_eq!(index.lookup("cn=b,ou=x,o=y").unwrap(), Some(4));
}

// =============================================================================
// Collapse Tests
// =============================================================================

#[test]
fn test_collapsed_family_reads_as_all_ids() {
    let dir = TempDir::new().unwrap();
    let index = DnIndex::new(DbPool::new(dir.path(), 4), IdlStore::new(2, 1), "o=y");

    index.add("o=y", 1).unwrap();
    for (i, cn) in ["a", "b", "c", "d"].iter().enumerate() {
        index.add(&format!("cn={},o=y", cn), i as Id + 2).unwrap();
    }

    assert!(index
        .scope_candidates("o=y", Scope::OneLevel, NEXT_ID)
        .unwrap()
        .is_all_ids());
    assert!(index.has_children("o=y").unwrap());

    // Base keys hold a single id and never collapse
    assert_eq!(index.lookup("cn=d,o=y").unwrap(), Some(5));
}

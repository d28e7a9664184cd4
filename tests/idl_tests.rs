//! Tests for the ID list algebra
//!
//! These tests verify:
//! - Find / insert / delete on literal blocks
//! - Splitting a full block around the inserted id
//! - ALLIDS as absorbing for union and identity for intersection
//! - Set-algebra laws over arbitrary id sets (proptest)

use ldbm::idl::{DeleteOutcome, Id, Idl, InsertOutcome, FIRST_ID};
use proptest::prelude::*;

// =============================================================================
// Helper Functions
// =============================================================================

fn ids(idl: &Idl) -> Vec<Id> {
    idl.iter().collect()
}

// =============================================================================
// Block Operation Tests
// =============================================================================

#[test]
fn test_find_returns_insertion_point() {
    let idl = Idl::from_ids([2, 4, 6]);

    assert_eq!(idl.find(4), Ok(1));
    assert_eq!(idl.find(1), Err(0));
    assert_eq!(idl.find(5), Err(2));
    assert_eq!(idl.find(9), Err(3));
}

#[test]
fn test_insert_reports_first_change() {
    let mut idl = Idl::from_ids([5, 7]);

    assert_eq!(idl.insert(6, 10), InsertOutcome::Inserted);
    assert_eq!(idl.insert(3, 10), InsertOutcome::InsertedFirstChanged);
    assert_eq!(idl.insert(6, 10), InsertOutcome::AlreadyPresent);
    assert_eq!(ids(&idl), vec![3, 5, 6, 7]);
}

#[test]
fn test_insert_into_full_block_needs_split() {
    let mut idl = Idl::from_ids([1, 2, 3]);

    assert_eq!(idl.insert(4, 3), InsertOutcome::NeedsSplit);
    // Present ids are still reported as present
    assert_eq!(idl.insert(2, 3), InsertOutcome::AlreadyPresent);
    assert_eq!(idl.len(), 3);
}

#[test]
fn test_insert_then_find_then_delete() {
    let mut idl = Idl::alloc(16);
    for id in [9, 3, 12, 1, 7] {
        idl.insert(id, 16);
    }
    for id in [9, 3, 12, 1, 7] {
        assert!(idl.contains(id));
    }

    assert_eq!(idl.delete(7), DeleteOutcome::Deleted);
    assert_eq!(idl.delete(1), DeleteOutcome::DeletedFirstChanged);
    assert_eq!(idl.delete(1), DeleteOutcome::NotPresent);
    assert!(!idl.contains(7));
    assert_eq!(ids(&idl), vec![3, 9, 12]);
}

#[test]
fn test_delete_last_id_empties_block() {
    let mut idl = Idl::from_ids([4]);
    assert_eq!(idl.delete(4), DeleteOutcome::DeletedEmpty);
    assert!(idl.is_empty());
}

#[test]
fn test_split_keeps_every_id() {
    let full = Idl::from_ids([10, 20, 30, 40]);

    let (left, right) = full.split_insert(25).unwrap();
    assert_eq!(left, vec![10, 20]);
    assert_eq!(right, vec![25, 30, 40]);

    let mut joined = left.clone();
    joined.extend(&right);
    assert_eq!(joined, vec![10, 20, 25, 30, 40]);
}

#[test]
fn test_split_at_edges() {
    let full = Idl::from_ids([10, 20, 30]);

    let (left, right) = full.split_insert(5).unwrap();
    assert_eq!((left, right), (vec![5], vec![10, 20, 30]));

    let (left, right) = full.split_insert(35).unwrap();
    assert_eq!((left, right), (vec![10, 20, 30], vec![35]));

    assert!(full.split_insert(20).is_none());
}

// =============================================================================
// ALLIDS Tests
// =============================================================================

#[test]
fn test_all_ids_iterates_range() {
    let all = Idl::all_ids(5);
    assert_eq!(ids(&all), vec![1, 2, 3, 4]);
    assert_eq!(all.len(), 4);
    assert_eq!(all.first(), Some(FIRST_ID));
    assert_eq!(all.last(), Some(4));
}

#[test]
fn test_all_ids_insert_and_delete_are_noops() {
    let mut all = Idl::all_ids(10);
    assert_eq!(all.insert(3, 4), InsertOutcome::AlreadyPresent);
    assert_eq!(all.delete(3), DeleteOutcome::NotPresent);
    assert!(all.is_all_ids());
}

#[test]
fn test_union_with_all_ids_absorbs() {
    let a = Idl::from_ids([1, 2, 8]);
    let all = Idl::all_ids(5);

    let u = Idl::union(&a, &all);
    assert!(u.is_all_ids());
    // The range grows to cover every literal id
    assert!(u.contains(8));
}

#[test]
fn test_intersection_with_all_ids_is_identity() {
    let a = Idl::from_ids([1, 2, 8]);
    assert_eq!(Idl::intersection(&a, &Idl::all_ids(100)), a);
    assert_eq!(Idl::intersection(&Idl::all_ids(100), &a), a);
}

#[test]
fn test_notin_from_all_ids_materializes() {
    let all = Idl::all_ids(6);
    let b = Idl::from_ids([2, 4]);
    assert_eq!(ids(&Idl::notin(&all, &b)), vec![1, 3, 5]);
}

#[test]
fn test_literal_algebra() {
    let a = Idl::from_ids([1, 3, 5]);
    let b = Idl::from_ids([2, 3]);

    assert_eq!(ids(&Idl::union(&a, &b)), vec![1, 2, 3, 5]);
    assert_eq!(ids(&Idl::intersection(&a, &b)), vec![3]);
    assert_eq!(ids(&Idl::notin(&a, &b)), vec![1, 5]);
}

// =============================================================================
// Property Tests
// =============================================================================

fn id_set() -> impl Strategy<Value = Vec<Id>> {
    prop::collection::vec(1u64..500, 0..64)
}

proptest! {
    #[test]
    fn prop_intersection_and_notin_partition(a in id_set(), b in id_set()) {
        let a = Idl::from_ids(a);
        let b = Idl::from_ids(b);

        let inter = Idl::intersection(&a, &b);
        let diff = Idl::notin(&a, &b);

        prop_assert!(Idl::intersection(&inter, &diff).is_empty());
        prop_assert_eq!(Idl::union(&inter, &diff), a);
    }

    #[test]
    fn prop_all_ids_laws(a in id_set(), bound in 1u64..600) {
        let a = Idl::from_ids(a);
        let all = Idl::all_ids(bound);

        prop_assert!(Idl::union(&a, &all).is_all_ids());
        prop_assert_eq!(Idl::intersection(&a, &all), a);
    }

    #[test]
    fn prop_inserted_ids_are_found(mut raw in id_set()) {
        let mut idl = Idl::empty();
        for id in &raw {
            idl.insert(*id, usize::MAX);
        }
        for id in &raw {
            prop_assert!(idl.contains(*id));
        }

        raw.sort_unstable();
        raw.dedup();
        prop_assert_eq!(idl.as_slice().unwrap(), raw.as_slice());

        for id in &raw {
            idl.delete(*id);
            prop_assert!(!idl.contains(*id));
        }
        prop_assert!(idl.is_empty());
    }

    #[test]
    fn prop_split_concatenates_to_old_plus_new(raw in prop::collection::vec(1u64..1000, 1..32), new in 1u64..1000) {
        let full = Idl::from_ids(raw);
        prop_assume!(!full.contains(new));

        let (left, right) = full.split_insert(new).unwrap();
        prop_assert!(!left.is_empty() && !right.is_empty());

        let mut joined = left;
        joined.extend(right);
        let mut expected = full.as_slice().unwrap().to_vec();
        expected.push(new);
        expected.sort_unstable();
        prop_assert_eq!(joined, expected);
    }
}

//! Tests for the entry cache
//!
//! These tests verify:
//! - Entries become visible only after commit and release
//! - Abandoned (uncommitted) entries disappear on release
//! - Deleted entries are unreachable at once but freed only when unreferenced
//! - LRU eviction skips referenced entries
//! - Blocking lookups wait for an entry to settle

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ldbm::cache::{CacheLookup, EntryCache, EntryState};
use ldbm::{Entry, LdbmError};

// =============================================================================
// Helper Functions
// =============================================================================

fn entry(id: u64, dn: &str) -> Entry {
    let mut e = Entry::new(dn).with_attr("objectclass", &["person"]);
    e.id = id;
    e
}

/// Add, commit and release: leaves the entry READY and unreferenced
fn insert_ready(cache: &EntryCache, id: u64, dn: &str) {
    let e = cache.add(entry(id, dn), true).unwrap();
    cache.commit(&e);
    cache.release(e);
}

fn is_hit(lookup: CacheLookup) -> bool {
    matches!(lookup, CacheLookup::Hit(_))
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_committed_entry_visible_after_release() {
    let cache = EntryCache::new(10, 10);
    let e = cache.add(entry(1, "cn=a,o=x"), true).unwrap();

    assert_eq!(cache.state_of(1), Some((EntryState::Creating, 1)));
    assert!(matches!(cache.try_lookup_by_id(1, false), CacheLookup::NotReady));

    cache.commit(&e);
    assert_eq!(cache.state_of(1), Some((EntryState::Committed, 1)));
    assert!(matches!(cache.try_lookup_by_dn("cn=a,o=x", false), CacheLookup::NotReady));

    cache.release(e);
    assert_eq!(cache.state_of(1), Some((EntryState::Ready, 0)));

    match cache.try_lookup_by_dn("cn=a,o=x", false) {
        CacheLookup::Hit(found) => {
            assert_eq!(found.id(), 1);
            assert_eq!(found.values("objectclass"), &["person".to_string()]);
        }
        _ => panic!("expected a hit"),
    }
}

#[test]
fn test_release_without_commit_drops_entry() {
    let cache = EntryCache::new(10, 10);
    let e = cache.add(entry(1, "cn=a,o=x"), true).unwrap();
    cache.release(e);

    assert!(matches!(cache.try_lookup_by_id(1, false), CacheLookup::Miss));
    assert!(cache.state_of(1).is_none());
    assert_eq!(cache.stats().resident, 0);
}

#[test]
fn test_drop_releases_reference() {
    let cache = EntryCache::new(10, 10);
    insert_ready(&cache, 1, "cn=a,o=x");

    {
        let _held = cache.lookup_by_id(1, false).unwrap();
        assert_eq!(cache.state_of(1), Some((EntryState::Ready, 1)));
    }
    assert_eq!(cache.state_of(1), Some((EntryState::Ready, 0)));
}

#[test]
fn test_delete_while_referenced() {
    let cache = EntryCache::new(10, 10);
    insert_ready(&cache, 1, "cn=a,o=x");

    let held = cache.lookup_by_id(1, true).unwrap();
    cache.delete(&held);

    // Unreachable at once
    assert!(matches!(cache.try_lookup_by_id(1, false), CacheLookup::Miss));
    assert!(matches!(cache.try_lookup_by_dn("cn=a,o=x", false), CacheLookup::Miss));

    // Still resident until the last reference goes
    let stats = cache.stats();
    assert_eq!(stats.entries, 0);
    assert_eq!(stats.resident, 1);
    assert_eq!(held.dn, "cn=a,o=x");

    cache.release(held);
    assert_eq!(cache.stats().resident, 0);
}

#[test]
fn test_duplicate_add_rejected() {
    let cache = EntryCache::new(10, 10);
    insert_ready(&cache, 1, "cn=a,o=x");

    let same_dn = cache.add(entry(2, "cn=a,o=x"), true);
    assert!(matches!(same_dn, Err(LdbmError::Duplicate(_))));

    let same_id = cache.add(entry(1, "cn=b,o=x"), true);
    assert!(matches!(same_id, Err(LdbmError::Duplicate(_))));

    // Nothing changed
    assert_eq!(cache.len(), 1);
    assert!(matches!(cache.try_lookup_by_dn("cn=b,o=x", false), CacheLookup::Miss));
}

#[test]
fn test_dn_reusable_after_delete() {
    let cache = EntryCache::new(10, 10);
    insert_ready(&cache, 1, "cn=a,o=x");

    let held = cache.lookup_by_id(1, true).unwrap();
    cache.delete(&held);

    // The old slot is still referenced but no longer owns the DN
    insert_ready(&cache, 2, "cn=a,o=x");
    match cache.try_lookup_by_dn("cn=a,o=x", false) {
        CacheLookup::Hit(found) => assert_eq!(found.id(), 2),
        _ => panic!("expected the new entry"),
    }
    drop(held);
    assert!(is_hit(cache.try_lookup_by_id(2, false)));
}

// =============================================================================
// Eviction Tests
// =============================================================================

#[test]
fn test_lru_evicts_least_recently_used() {
    let cache = EntryCache::new(2, 10);
    insert_ready(&cache, 1, "cn=a,o=x");
    insert_ready(&cache, 2, "cn=b,o=x");

    // Touch 1 so 2 becomes the tail
    drop(cache.lookup_by_id(1, false).unwrap());

    insert_ready(&cache, 3, "cn=c,o=x");

    assert_eq!(cache.len(), 2);
    assert!(matches!(cache.try_lookup_by_id(2, false), CacheLookup::Miss));
    assert!(is_hit(cache.try_lookup_by_id(1, false)));
    assert!(is_hit(cache.try_lookup_by_id(3, false)));
    assert_eq!(cache.stats().evictions, 1);
}

#[test]
fn test_referenced_tail_is_skipped() {
    let cache = EntryCache::new(2, 10);
    insert_ready(&cache, 1, "cn=a,o=x");
    let held = cache.lookup_by_id(1, false).unwrap();
    insert_ready(&cache, 2, "cn=b,o=x");

    // Tail (1) is referenced, so the next candidate (2) goes
    insert_ready(&cache, 3, "cn=c,o=x");

    assert!(matches!(cache.try_lookup_by_id(2, false), CacheLookup::Miss));
    assert!(is_hit(cache.try_lookup_by_id(1, false)));
    drop(held);
}

#[test]
fn test_over_capacity_when_everything_referenced() {
    let cache = EntryCache::new(1, 10);
    let a = cache.add(entry(1, "cn=a,o=x"), true).unwrap();
    let b = cache.add(entry(2, "cn=b,o=x"), true).unwrap();

    // Neither can be evicted while being created
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.stats().evictions, 0);

    cache.release(a);
    cache.release(b);
    assert_eq!(cache.len(), 0);
}

#[test]
fn test_clear_keeps_referenced_entries() {
    let cache = EntryCache::new(10, 10);
    insert_ready(&cache, 1, "cn=a,o=x");
    insert_ready(&cache, 2, "cn=b,o=x");
    let held = cache.lookup_by_id(2, false).unwrap();

    cache.clear();

    assert_eq!(cache.len(), 1);
    assert!(matches!(cache.try_lookup_by_id(1, false), CacheLookup::Miss));
    drop(held);
}

// =============================================================================
// Update Tests
// =============================================================================

#[test]
fn test_update_moves_dn_mapping() {
    let cache = EntryCache::new(10, 10);
    insert_ready(&cache, 1, "cn=a,o=x");

    let mut held = cache.lookup_by_id(1, true).unwrap();
    cache.update(&mut held, entry(1, "cn=renamed,o=x")).unwrap();
    assert_eq!(held.dn, "cn=renamed,o=x");
    cache.release(held);

    assert!(matches!(cache.try_lookup_by_dn("cn=a,o=x", false), CacheLookup::Miss));
    assert!(is_hit(cache.try_lookup_by_dn("cn=renamed,o=x", false)));
}

#[test]
fn test_update_onto_taken_dn_fails() {
    let cache = EntryCache::new(10, 10);
    insert_ready(&cache, 1, "cn=a,o=x");
    insert_ready(&cache, 2, "cn=b,o=x");

    let mut held = cache.lookup_by_id(1, true).unwrap();
    let result = cache.update(&mut held, entry(1, "cn=b,o=x"));
    assert!(matches!(result, Err(LdbmError::Duplicate(_))));
    assert_eq!(held.dn, "cn=a,o=x");
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_blocking_lookup_waits_for_commit() {
    let cache = EntryCache::new(10, 10);
    let creating = cache.add(entry(1, "cn=a,o=x"), true).unwrap();
    let found = Arc::new(AtomicBool::new(false));

    let reader = {
        let cache = cache.clone();
        let found = Arc::clone(&found);
        thread::spawn(move || {
            let e = cache.lookup_by_dn("cn=a,o=x", false);
            found.store(e.is_some(), Ordering::SeqCst);
        })
    };

    thread::sleep(Duration::from_millis(100));
    assert!(!found.load(Ordering::SeqCst));

    cache.commit(&creating);
    cache.release(creating);
    reader.join().unwrap();
    assert!(found.load(Ordering::SeqCst));
}

#[test]
fn test_blocking_lookup_sees_abandoned_entry_as_miss() {
    let cache = EntryCache::new(10, 10);
    let creating = cache.add(entry(1, "cn=a,o=x"), true).unwrap();

    let reader = {
        let cache = cache.clone();
        thread::spawn(move || cache.lookup_by_id(1, false).is_none())
    };

    thread::sleep(Duration::from_millis(50));
    cache.release(creating);
    assert!(reader.join().unwrap());
}

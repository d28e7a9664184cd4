//! Entry cache implementation
//!
//! One mutex guards both lookup maps, the LRU list and every slot's state
//! and refcount. It is never held across I/O. A condition variable wakes
//! lookups waiting on an entry that is not READY yet.

use std::collections::HashMap;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::{Condvar, Mutex};

use crate::entry::Entry;
use crate::error::{LdbmError, Result};
use crate::idl::Id;

use super::EntryState;

/// Internal slot identity; ids and DNs can be reused across a delete or
/// rename while an old slot is still referenced
type SlotKey = u64;

struct Slot {
    entry: Arc<Entry>,
    state: EntryState,
    refcnt: usize,
}

/// Counters exposed for tests and the tool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Entries reachable by lookups
    pub entries: usize,
    /// Slots not yet freed (reachable or deleted-but-referenced)
    pub resident: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct CacheInner {
    slots: HashMap<SlotKey, Slot>,
    by_id: HashMap<Id, SlotKey>,
    by_dn: HashMap<String, SlotKey>,
    /// Reachable slots, most recently used first
    lru: LruCache<SlotKey, ()>,
    next_slot: SlotKey,
    stats: CacheStats,
}

struct CacheShared {
    inner: Mutex<CacheInner>,
    settled: Condvar,
    max_entries: usize,
    evict_scan: usize,
}

/// Outcome of a non-blocking lookup
pub enum CacheLookup {
    Hit(CachedEntry),
    /// Present but not READY; retry later
    NotReady,
    Miss,
}

/// Bounded entry cache
///
/// Cheap to clone; clones share the same cache.
#[derive(Clone)]
pub struct EntryCache {
    shared: Arc<CacheShared>,
}

/// A referenced cache entry
///
/// Release it with [`EntryCache::release`]; dropping it releases it too.
pub struct CachedEntry {
    entry: Arc<Entry>,
    slot: SlotKey,
    for_write: bool,
    shared: Option<Arc<CacheShared>>,
}

impl EntryCache {
    pub fn new(max_entries: usize, evict_scan: usize) -> Self {
        Self {
            shared: Arc::new(CacheShared {
                inner: Mutex::new(CacheInner {
                    slots: HashMap::new(),
                    by_id: HashMap::new(),
                    by_dn: HashMap::new(),
                    lru: LruCache::unbounded(),
                    next_slot: 1,
                    stats: CacheStats::default(),
                }),
                settled: Condvar::new(),
                max_entries: max_entries.max(1),
                evict_scan: evict_scan.max(1),
            }),
        }
    }

    // =========================================================================
    // Add
    // =========================================================================

    /// Insert a new entry in CREATING state with one reference held by the
    /// caller. Fails with `Duplicate`, changing nothing, if its id or DN is
    /// already cached.
    pub fn add(&self, entry: Entry, for_write: bool) -> Result<CachedEntry> {
        let mut inner = self.shared.inner.lock();

        if inner.by_dn.contains_key(&entry.dn) {
            return Err(LdbmError::Duplicate(format!("DN {} already cached", entry.dn)));
        }
        if inner.by_id.contains_key(&entry.id) {
            return Err(LdbmError::Duplicate(format!("id {} already cached", entry.id)));
        }

        let key = inner.next_slot;
        inner.next_slot += 1;

        let entry = Arc::new(entry);
        inner.by_id.insert(entry.id, key);
        inner.by_dn.insert(entry.dn.clone(), key);
        inner.lru.push(key, ());
        inner.slots.insert(
            key,
            Slot {
                entry: Arc::clone(&entry),
                state: EntryState::Creating,
                refcnt: 1,
            },
        );

        if inner.lru.len() > self.shared.max_entries {
            self.evict(&mut inner);
        }

        Ok(CachedEntry {
            entry,
            slot: key,
            for_write,
            shared: Some(Arc::clone(&self.shared)),
        })
    }

    /// Drop unreferenced READY entries from the LRU tail, inspecting at most
    /// `evict_scan` entries; referenced ones are skipped, never forced out
    fn evict(&self, inner: &mut CacheInner) {
        let excess = inner.lru.len().saturating_sub(self.shared.max_entries);
        let victims: Vec<SlotKey> = inner
            .lru
            .iter()
            .rev()
            .take(self.shared.evict_scan)
            .map(|(k, _)| *k)
            .filter(|k| {
                inner
                    .slots
                    .get(k)
                    .map(|s| s.refcnt == 0 && s.state == EntryState::Ready)
                    .unwrap_or(false)
            })
            .take(excess)
            .collect();

        for key in victims {
            if let Some(slot) = inner.slots.remove(&key) {
                Self::unlink(inner, key, &slot.entry);
                inner.stats.evictions += 1;
                tracing::trace!(id = slot.entry.id, "entry evicted");
            }
        }

        if inner.lru.len() > self.shared.max_entries {
            tracing::debug!(
                entries = inner.lru.len(),
                max = self.shared.max_entries,
                "entry cache over capacity, LRU tail in use"
            );
        }
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Non-blocking lookup by id
    pub fn try_lookup_by_id(&self, id: Id, for_write: bool) -> CacheLookup {
        let mut inner = self.shared.inner.lock();
        let key = inner.by_id.get(&id).copied();
        self.acquire(&mut inner, key, for_write)
    }

    /// Non-blocking lookup by normalized DN
    pub fn try_lookup_by_dn(&self, dn: &str, for_write: bool) -> CacheLookup {
        let mut inner = self.shared.inner.lock();
        let key = inner.by_dn.get(dn).copied();
        self.acquire(&mut inner, key, for_write)
    }

    /// Lookup by id, waiting while the entry is not READY
    pub fn lookup_by_id(&self, id: Id, for_write: bool) -> Option<CachedEntry> {
        let mut inner = self.shared.inner.lock();
        loop {
            let key = inner.by_id.get(&id).copied();
            match self.acquire(&mut inner, key, for_write) {
                CacheLookup::Hit(e) => return Some(e),
                CacheLookup::Miss => return None,
                CacheLookup::NotReady => self.shared.settled.wait(&mut inner),
            }
        }
    }

    /// Lookup by normalized DN, waiting while the entry is not READY
    pub fn lookup_by_dn(&self, dn: &str, for_write: bool) -> Option<CachedEntry> {
        let mut inner = self.shared.inner.lock();
        loop {
            let key = inner.by_dn.get(dn).copied();
            match self.acquire(&mut inner, key, for_write) {
                CacheLookup::Hit(e) => return Some(e),
                CacheLookup::Miss => return None,
                CacheLookup::NotReady => self.shared.settled.wait(&mut inner),
            }
        }
    }

    fn acquire(&self, inner: &mut CacheInner, key: Option<SlotKey>, for_write: bool) -> CacheLookup {
        let Some(key) = key else {
            inner.stats.misses += 1;
            return CacheLookup::Miss;
        };
        let Some(slot) = inner.slots.get_mut(&key) else {
            inner.stats.misses += 1;
            return CacheLookup::Miss;
        };
        if slot.state != EntryState::Ready {
            return CacheLookup::NotReady;
        }

        slot.refcnt += 1;
        let entry = Arc::clone(&slot.entry);
        inner.lru.promote(&key);
        inner.stats.hits += 1;

        CacheLookup::Hit(CachedEntry {
            entry,
            slot: key,
            for_write,
            shared: Some(Arc::clone(&self.shared)),
        })
    }

    // =========================================================================
    // State Transitions
    // =========================================================================

    /// CREATING → COMMITTED: the entry has been durably written. It becomes
    /// visible on its next release.
    pub fn commit(&self, e: &CachedEntry) {
        let mut inner = self.shared.inner.lock();
        if let Some(slot) = inner.slots.get_mut(&e.slot) {
            if slot.state == EntryState::Creating {
                slot.state = EntryState::Committed;
            }
        }
    }

    /// Give up a reference
    pub fn release(&self, mut e: CachedEntry) {
        if let Some(shared) = e.shared.take() {
            shared.release(e.slot, e.for_write);
        }
    }

    /// Make the entry unreachable now; it is freed once unreferenced
    pub fn delete(&self, e: &CachedEntry) {
        let mut inner = self.shared.inner.lock();
        let Some(slot) = inner.slots.get_mut(&e.slot) else {
            return;
        };
        slot.state = EntryState::Deleted;
        let entry = Arc::clone(&slot.entry);
        let free = slot.refcnt == 0;

        Self::unlink(&mut inner, e.slot, &entry);
        if free {
            inner.slots.remove(&e.slot);
        }
        self.shared.settled.notify_all();
    }

    /// Replace the cached record (modify, rename). The handle is refreshed
    /// to the new record. Fails with `Duplicate` if a different cached
    /// entry already owns the new DN.
    pub fn update(&self, e: &mut CachedEntry, new: Entry) -> Result<()> {
        let mut inner = self.shared.inner.lock();

        if let Some(owner) = inner.by_dn.get(&new.dn) {
            if *owner != e.slot {
                return Err(LdbmError::Duplicate(format!("DN {} already cached", new.dn)));
            }
        }

        let Some(slot) = inner.slots.get_mut(&e.slot) else {
            return Err(LdbmError::Internal("updating a freed cache entry".into()));
        };
        let old = std::mem::replace(&mut slot.entry, Arc::new(new));
        let new = Arc::clone(&slot.entry);
        let reachable = slot.state != EntryState::Deleted;

        if reachable {
            if inner.by_dn.get(&old.dn) == Some(&e.slot) {
                inner.by_dn.remove(&old.dn);
            }
            inner.by_dn.insert(new.dn.clone(), e.slot);
            if old.id != new.id {
                if inner.by_id.get(&old.id) == Some(&e.slot) {
                    inner.by_id.remove(&old.id);
                }
                inner.by_id.insert(new.id, e.slot);
            }
        }

        e.entry = new;
        Ok(())
    }

    /// Drop every unreferenced READY entry
    pub fn clear(&self) {
        let mut inner = self.shared.inner.lock();
        let idle: Vec<SlotKey> = inner
            .slots
            .iter()
            .filter(|(_, s)| s.refcnt == 0 && s.state == EntryState::Ready)
            .map(|(k, _)| *k)
            .collect();
        for key in idle {
            if let Some(slot) = inner.slots.remove(&key) {
                Self::unlink(&mut inner, key, &slot.entry);
            }
        }
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Entries reachable by lookups
    pub fn len(&self) -> usize {
        self.shared.inner.lock().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_entries(&self) -> usize {
        self.shared.max_entries
    }

    /// State and refcount of whatever the id currently maps to
    pub fn state_of(&self, id: Id) -> Option<(EntryState, usize)> {
        let inner = self.shared.inner.lock();
        let key = inner.by_id.get(&id)?;
        inner.slots.get(key).map(|s| (s.state, s.refcnt))
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.shared.inner.lock();
        let mut stats = inner.stats;
        stats.entries = inner.lru.len();
        stats.resident = inner.slots.len();
        stats
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Remove a slot from both lookup maps and the LRU list
    fn unlink(inner: &mut CacheInner, key: SlotKey, entry: &Entry) {
        if inner.by_id.get(&entry.id) == Some(&key) {
            inner.by_id.remove(&entry.id);
        }
        if inner.by_dn.get(&entry.dn) == Some(&key) {
            inner.by_dn.remove(&entry.dn);
        }
        inner.lru.pop(&key);
    }
}

impl CacheShared {
    fn release(&self, key: SlotKey, for_write: bool) {
        let mut inner = self.inner.lock();
        let Some(slot) = inner.slots.get_mut(&key) else {
            return;
        };

        slot.refcnt = slot.refcnt.saturating_sub(1);
        let entry = Arc::clone(&slot.entry);

        match slot.state {
            EntryState::Committed => {
                slot.state = EntryState::Ready;
            }
            EntryState::Creating => {
                // Construction abandoned
                slot.state = EntryState::Deleted;
                EntryCache::unlink(&mut inner, key, &entry);
                tracing::debug!(id = entry.id, "abandoned entry dropped from cache");
            }
            EntryState::Ready | EntryState::Deleted => {}
        }

        let free = inner
            .slots
            .get(&key)
            .map(|s| s.state == EntryState::Deleted && s.refcnt == 0)
            .unwrap_or(false);
        if free {
            inner.slots.remove(&key);
            tracing::trace!(id = entry.id, for_write, "cache entry freed");
        }

        self.settled.notify_all();
    }
}

impl CachedEntry {
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Shared pointer to the record, usable after release
    pub fn to_arc(&self) -> Arc<Entry> {
        Arc::clone(&self.entry)
    }

    pub fn id(&self) -> Id {
        self.entry.id
    }

    pub fn for_write(&self) -> bool {
        self.for_write
    }
}

impl std::ops::Deref for CachedEntry {
    type Target = Entry;

    fn deref(&self) -> &Entry {
        &self.entry
    }
}

impl Drop for CachedEntry {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.release(self.slot, self.for_write);
        }
    }
}

impl std::fmt::Debug for CachedEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedEntry")
            .field("id", &self.entry.id)
            .field("dn", &self.entry.dn)
            .field("for_write", &self.for_write)
            .finish()
    }
}

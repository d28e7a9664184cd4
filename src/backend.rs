//! Backend Module
//!
//! The directory backend that ties the containers, indexes and entry cache
//! together.
//!
//! ## Responsibilities
//! - Assign ids and persist the next-id counter
//! - Keep `id2entry`, the DN index and the attribute indexes in step on
//!   add/delete/modify/rename
//! - Answer searches: scope ∩ filter candidates, then a row-level re-check
//! - Drive write-back of dirty containers (per write or periodically)
//!
//! ## Containers
//! ```text
//!   id2entry   u64 BE id        → encoded entry
//!   dn2id      DN families      → ID lists
//!   nextid     "nextid"         → u64 BE next unassigned id
//!   {attr}     index keys       → ID lists
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::cache::{CacheStats, CachedEntry, EntryCache};
use crate::config::{Config, SyncStrategy};
use crate::dn::{self, DnIndex, Scope};
use crate::entry::Entry;
use crate::error::{LdbmError, Result};
use crate::filter::{self, in_scope, Filter, IndexSource};
use crate::idl::{Id, Idl, IdlStore, FIRST_ID};
use crate::index::{normalize_value, IndexOp, IndexStore};
use crate::schema::AttributeTypes;
use crate::storage::{DbPool, OpenMode, PoolStats, Syncer};

/// Container of encoded entries, keyed by id
pub const ID2ENTRY: &str = "id2entry";

/// Single-key container holding the next unassigned id
pub const NEXTID: &str = "nextid";
const NEXTID_KEY: &[u8] = b"nextid";

/// Give up on a cache fill that keeps colliding
const FETCH_RETRIES: usize = 8;

/// One change to an entry's attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modification {
    /// Add values, keeping existing ones
    Add(String, Vec<String>),
    /// Remove the listed values, or the whole attribute if none are listed
    Delete(String, Vec<String>),
    /// Replace every value; an empty list removes the attribute
    Replace(String, Vec<String>),
}

impl Modification {
    pub fn attr(&self) -> &str {
        match self {
            Modification::Add(a, _) | Modification::Delete(a, _) | Modification::Replace(a, _) => a,
        }
    }
}

/// Search controls
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Stop after this many entries; 0 means no limit
    pub size_limit: usize,
    /// Checked between candidates; a set flag ends the search
    pub abandon: Option<Arc<AtomicBool>>,
}

/// Entries returned by a search
#[derive(Debug, Clone, Default)]
pub struct SearchResult {
    pub entries: Vec<Arc<Entry>>,
    /// The size limit was hit with more matches pending
    pub truncated: bool,
}

/// Point-in-time counters
#[derive(Debug, Clone, Copy)]
pub struct BackendStats {
    pub next_id: Id,
    pub cache: CacheStats,
    pub pool: PoolStats,
}

/// A directory backend instance
///
/// ## Concurrency Model
///
/// - **Writes** (add/delete/modify/rename): exclusive `giant` lock for the
///   whole operation, so index updates never interleave
/// - **Reads** (search/compare/get): shared `giant` lock; readers run in
///   parallel and meet only in the cache and handle-pool mutexes
/// - At most one container handle is held at a time by any operation, so
///   a full handle pool never deadlocks against itself
pub struct Backend {
    config: Config,

    /// Backend-wide operation lock
    giant: RwLock<()>,

    pool: DbPool,
    cache: EntryCache,
    indexes: IndexStore,
    dn_index: DnIndex,

    /// Next id to hand out (mirrors the `nextid` container)
    next_id: AtomicU64,

    /// Present under the periodic sync strategy
    syncer: Mutex<Option<Syncer>>,

    closed: AtomicBool,
}

fn id_key(id: Id) -> [u8; 8] {
    id.to_be_bytes()
}

impl Backend {
    /// Open or create a backend in `config.data_dir`
    ///
    /// On startup:
    /// 1. Validate config, create the data directory
    /// 2. Build the handle pool, indexes and cache
    /// 3. Load the next-id counter (raised past the highest stored id)
    /// 4. Start the background syncer if configured
    pub fn open(mut config: Config) -> Result<Self> {
        // Step 1: Validate and prepare the directory
        config.validate()?;
        config.suffix = dn::normalize(&config.suffix);
        fs::create_dir_all(&config.data_dir)?;

        // Step 2: Components
        let pool = DbPool::new(&config.data_dir, config.max_open_handles);
        let idl = IdlStore::new(config.max_ids_per_block, config.max_indirect);
        let types = AttributeTypes::new(&config.supertypes);
        let indexes = IndexStore::new(pool.clone(), idl, types, &config.indexes);
        let dn_index = DnIndex::new(pool.clone(), idl, config.suffix.clone());
        let cache = EntryCache::new(config.cache_max_entries, config.cache_evict_scan);

        // Step 3: Id counter
        let next_id = Self::load_next_id(&pool)?;

        // Step 4: Background write-back
        let syncer = match config.sync_strategy {
            SyncStrategy::Periodic { interval_ms } => Some(Syncer::spawn(
                pool.clone(),
                Duration::from_millis(interval_ms),
            )?),
            SyncStrategy::EveryWrite => None,
        };

        tracing::info!(
            data_dir = %config.data_dir.display(),
            suffix = %config.suffix,
            next_id,
            "backend opened"
        );

        Ok(Self {
            config,
            giant: RwLock::new(()),
            pool,
            cache,
            indexes,
            dn_index,
            next_id: AtomicU64::new(next_id),
            syncer: Mutex::new(syncer),
            closed: AtomicBool::new(false),
        })
    }

    fn load_next_id(pool: &DbPool) -> Result<Id> {
        let stored = {
            let db = pool.open(NEXTID, OpenMode::Reader)?;
            match db.get(NEXTID_KEY) {
                Some(bytes) => {
                    let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                        LdbmError::Corruption(format!("next id record has {} bytes", bytes.len()))
                    })?;
                    Id::from_be_bytes(raw)
                }
                None => FIRST_ID,
            }
        };

        // The counter and id2entry are written back independently
        let highest = {
            let db = pool.open(ID2ENTRY, OpenMode::Reader)?;
            db.last_key()
                .and_then(|k| <[u8; 8]>::try_from(k.as_slice()).ok())
                .map(Id::from_be_bytes)
        };
        match highest {
            Some(h) if h >= stored => {
                tracing::warn!(stored, highest = h, "next id behind stored entries, advancing");
                Ok(h + 1)
            }
            _ => Ok(stored.max(FIRST_ID)),
        }
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Add a new entry; returns its id
    ///
    /// The parent must exist unless the entry is the suffix itself (or a
    /// top-level entry when no suffix is configured).
    pub fn add(&self, entry: Entry) -> Result<Id> {
        let _write_guard = self.giant.write();

        let mut entry = entry;
        entry.dn = dn::normalize(&entry.dn);
        let dn = entry.dn.clone();

        // Step 1: Placement checks
        self.check_placement(&dn)?;
        if self.dn_index.lookup(&dn)?.is_some() {
            return Err(LdbmError::Duplicate(dn));
        }
        if dn != self.config.suffix {
            if let Some(parent) = dn::parent(&dn) {
                if self.dn_index.lookup(parent)?.is_none() {
                    return Err(LdbmError::NoSuchParent(parent.to_string()));
                }
            }
        }

        // Step 2: Id and a CREATING cache slot
        let id = self.allocate_id()?;
        entry.id = id;
        let handle = self.cache.add(entry, true)?;

        // Step 3: Indexes and record; the slot is dropped if this fails
        if let Err(e) = self.write_new(&handle) {
            self.cache.release(handle);
            return Err(e);
        }

        // Step 4: Visible from the next release on
        self.cache.commit(&handle);
        self.cache.release(handle);

        tracing::debug!(dn = %dn, id, "entry added");
        self.after_write()?;
        Ok(id)
    }

    fn write_new(&self, entry: &Entry) -> Result<()> {
        let id = entry.id;
        self.dn_index.add(&entry.dn, id)?;

        let mut done: Vec<(&str, &[String])> = Vec::new();
        for (attr, values) in entry.attrs() {
            if let Err(e) = self.indexes.index_values(IndexOp::Add, attr, values, id) {
                self.undo_index(IndexOp::Add, &done, id);
                self.undo_dn_add(&entry.dn, id);
                return Err(Self::internal("index", &entry.dn, e));
            }
            done.push((attr, values));
        }

        if let Err(e) = self.put_entry(entry) {
            self.undo_index(IndexOp::Add, &done, id);
            self.undo_dn_add(&entry.dn, id);
            return Err(Self::internal("id2entry", &entry.dn, e));
        }
        Ok(())
    }

    /// Delete a leaf entry
    pub fn delete(&self, dn: &str) -> Result<()> {
        let _write_guard = self.giant.write();
        let dn = dn::normalize(dn);

        // Step 1: Locate; refuse non-leaves
        let id = self
            .dn_index
            .lookup(&dn)?
            .ok_or_else(|| LdbmError::NoSuchObject(dn.clone()))?;
        if self.dn_index.has_children(&dn)? {
            return Err(LdbmError::NotAllowedOnNonLeaf(dn));
        }
        let cached = self
            .fetch_entry(id, true)?
            .ok_or_else(|| LdbmError::NoSuchObject(dn.clone()))?;

        // Step 2: Attribute indexes, then DN families, then the record
        for (attr, values) in cached.attrs() {
            self.indexes
                .index_values(IndexOp::Delete, attr, values, id)
                .map_err(|e| Self::internal("index", &dn, e))?;
        }
        self.dn_index
            .delete(&dn, id)
            .map_err(|e| Self::internal("dn index", &dn, e))?;
        {
            let db = self.pool.open(ID2ENTRY, OpenMode::Writer)?;
            db.delete(&id_key(id))
                .map_err(|e| Self::internal("id2entry", &dn, e))?;
        }

        // Step 3: Unreachable now, freed on last release
        self.cache.delete(&cached);
        self.cache.release(cached);

        tracing::debug!(dn = %dn, id, "entry deleted");
        self.after_write()
    }

    /// Apply `mods` to an entry, moving its index keys accordingly
    pub fn modify(&self, dn: &str, mods: &[Modification]) -> Result<()> {
        let _write_guard = self.giant.write();
        let dn = dn::normalize(dn);

        let id = self
            .dn_index
            .lookup(&dn)?
            .ok_or_else(|| LdbmError::NoSuchObject(dn.clone()))?;
        let mut cached = self
            .fetch_entry(id, true)?
            .ok_or_else(|| LdbmError::NoSuchObject(dn.clone()))?;

        // Step 1: New record
        let old = cached.entry().clone();
        let mut new = old.clone();
        for m in mods {
            match m {
                Modification::Add(attr, values) => new.add_values(attr, values.iter().cloned()),
                Modification::Delete(attr, values) => {
                    new.remove_values(attr, values);
                }
                Modification::Replace(attr, values) => {
                    new.replace_values(attr, values.clone());
                }
            }
        }

        // Step 2: Index diff per touched attribute
        let touched: BTreeSet<String> = mods.iter().map(|m| m.attr().to_ascii_lowercase()).collect();
        self.reindex(&dn, &old, &new, &touched)?;

        // Step 3: Record and cache
        self.put_entry(&new).map_err(|e| {
            self.undo_reindex(&old, &new, &touched);
            Self::internal("id2entry", &dn, e)
        })?;
        self.cache.update(&mut cached, new)?;
        self.cache.release(cached);

        tracing::debug!(dn = %dn, id, mods = mods.len(), "entry modified");
        self.after_write()
    }

    /// Rename an entry and, when it has any, move its subtree along
    ///
    /// `new_rdn` replaces the leading RDN; `new_superior` (if given) becomes
    /// the new parent. With `delete_old_rdn` the old RDN values are removed
    /// from the entry's attributes. Returns the new normalized DN.
    pub fn rename(
        &self,
        dn: &str,
        new_rdn: &str,
        new_superior: Option<&str>,
        delete_old_rdn: bool,
    ) -> Result<String> {
        let _write_guard = self.giant.write();
        let old_dn = dn::normalize(dn);

        // Step 1: Compute and check the target
        let id = self
            .dn_index
            .lookup(&old_dn)?
            .ok_or_else(|| LdbmError::NoSuchObject(old_dn.clone()))?;

        let rdn = dn::normalize(new_rdn);
        if rdn.is_empty() || dn::parent(&rdn).is_some() || !rdn.contains('=') {
            return Err(LdbmError::InvalidDn(format!("bad new RDN {:?}", new_rdn)));
        }

        let superior = match new_superior {
            Some(s) => dn::normalize(s),
            None => dn::parent(&old_dn).unwrap_or("").to_string(),
        };
        if new_superior.is_some() {
            if dn::is_descendant_or_self(&superior, &old_dn) && !superior.is_empty() {
                return Err(LdbmError::InvalidDn(format!(
                    "cannot move {} below itself",
                    old_dn
                )));
            }
            if !superior.is_empty() && self.dn_index.lookup(&superior)?.is_none() {
                return Err(LdbmError::NoSuchParent(superior));
            }
        }

        let new_dn = if superior.is_empty() {
            rdn.clone()
        } else {
            format!("{},{}", rdn, superior)
        };
        if new_dn == old_dn {
            return Ok(new_dn);
        }
        self.check_placement(&new_dn)?;
        if self.dn_index.lookup(&new_dn)?.is_some() {
            return Err(LdbmError::Duplicate(new_dn));
        }

        // Step 2: Gather the entry and its descendants
        let mut cached = self
            .fetch_entry(id, true)?
            .ok_or_else(|| LdbmError::NoSuchObject(old_dn.clone()))?;

        let mut moved = Vec::new();
        let subtree = self
            .dn_index
            .scope_candidates(&old_dn, Scope::Subtree, self.next_id())?;
        for did in subtree.iter().filter(|d| *d != id) {
            let Some(child) = self.fetch_entry(did, true)? else {
                continue;
            };
            if let Some(child_dn) = dn::rebase(&child.dn, &old_dn, &new_dn) {
                moved.push((child, child_dn));
            }
        }

        // Step 3: The entry itself
        let old = cached.entry().clone();
        let mut new = old.clone();
        new.dn = new_dn.clone();
        let touched = Self::apply_rdn_change(&mut new, &old_dn, new_rdn, delete_old_rdn);

        self.dn_index.rename(&old_dn, &new_dn, id)?;
        if let Err(e) = self.reindex(&new_dn, &old, &new, &touched) {
            self.undo_dn_rename(&new_dn, &old_dn, id);
            return Err(e);
        }
        if let Err(e) = self.put_entry(&new) {
            self.undo_reindex(&old, &new, &touched);
            self.undo_dn_rename(&new_dn, &old_dn, id);
            return Err(Self::internal("id2entry", &new_dn, e));
        }

        // Step 4: Descendants only change DN
        let mut renamed: Vec<(&Entry, &str)> = Vec::new();
        for (child, child_dn) in &moved {
            let mut updated = child.entry().clone();
            updated.dn = child_dn.clone();

            let step = self
                .dn_index
                .rename(&child.dn, child_dn, child.id)
                .map_err(|e| Self::internal("dn index", child_dn, e))
                .and_then(|()| {
                    self.put_entry(&updated).map_err(|e| {
                        self.undo_dn_rename(child_dn, &child.dn, child.id);
                        Self::internal("id2entry", child_dn, e)
                    })
                });
            if let Err(e) = step {
                self.undo_moved(&renamed);
                self.undo_entry_write(&old);
                self.undo_reindex(&old, &new, &touched);
                self.undo_dn_rename(&new_dn, &old_dn, id);
                return Err(e);
            }
            renamed.push((child.entry(), child_dn.as_str()));
        }

        // Step 5: Cache; everything durable already names the new DNs
        self.recache(&mut cached, new);
        self.cache.release(cached);
        for (mut child, child_dn) in moved {
            let mut updated = child.entry().clone();
            updated.dn = child_dn;
            self.recache(&mut child, updated);
            self.cache.release(child);
        }

        tracing::debug!(old_dn = %old_dn, new_dn = %new_dn, id, "entry renamed");
        self.after_write()?;
        Ok(new_dn)
    }

    /// Put the new RDN's values on the entry, and drop the old RDN's values
    /// if asked; returns the attributes touched
    fn apply_rdn_change(
        entry: &mut Entry,
        old_dn: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
    ) -> BTreeSet<String> {
        let mut touched = BTreeSet::new();

        if delete_old_rdn {
            for (attr, value) in rdn_avas(dn::rdn(old_dn)) {
                let doomed: Vec<String> = entry
                    .values(&attr)
                    .iter()
                    .filter(|v| normalize_value(v) == normalize_value(&value))
                    .cloned()
                    .collect();
                if !doomed.is_empty() {
                    entry.remove_values(&attr, &doomed);
                    touched.insert(attr);
                }
            }
        }

        for (attr, value) in rdn_avas(new_rdn.trim()) {
            let present = entry
                .values(&attr)
                .iter()
                .any(|v| normalize_value(v) == normalize_value(&value));
            if !present {
                entry.add_values(&attr, [value]);
                touched.insert(attr);
            }
        }

        touched
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// Entry by DN; the returned reference releases on drop
    pub fn get_by_dn(&self, dn: &str) -> Result<Option<CachedEntry>> {
        let _read_guard = self.giant.read();
        let dn = dn::normalize(dn);

        if let Some(hit) = self.cache.lookup_by_dn(&dn, false) {
            return Ok(Some(hit));
        }
        match self.dn_index.lookup(&dn)? {
            Some(id) => self.fetch_entry(id, false),
            None => Ok(None),
        }
    }

    /// Entry by id; the returned reference releases on drop
    pub fn get_by_id(&self, id: Id) -> Result<Option<CachedEntry>> {
        let _read_guard = self.giant.read();
        self.fetch_entry(id, false)
    }

    /// Give back a reference obtained from `get_by_dn`/`get_by_id`
    pub fn release(&self, entry: CachedEntry) {
        self.cache.release(entry);
    }

    /// Does the entry at `dn` hold `value` for `attr`?
    pub fn compare(&self, dn: &str, attr: &str, value: &str) -> Result<bool> {
        let _read_guard = self.giant.read();
        let dn = dn::normalize(dn);

        let id = self
            .dn_index
            .lookup(&dn)?
            .ok_or_else(|| LdbmError::NoSuchObject(dn.clone()))?;
        let entry = self
            .fetch_entry(id, false)?
            .ok_or_else(|| LdbmError::NoSuchObject(dn.clone()))?;

        Ok(Filter::eq(attr, value).matches(&entry, self.indexes.attribute_types()))
    }

    /// Candidate ids for a search: scope ∩ filter, before the re-check
    pub fn candidates(&self, base: &str, scope: Scope, filter: &Filter) -> Result<Idl> {
        let _read_guard = self.giant.read();
        Ok(self.candidates_locked(&dn::normalize(base), scope, filter))
    }

    fn candidates_locked(&self, base: &str, scope: Scope, filter: &Filter) -> Idl {
        let scoped = Filter::And(vec![Filter::Scope(scope, base.to_string()), filter.clone()]);
        let src = IndexSource {
            indexes: &self.indexes,
            dn_index: &self.dn_index,
            next_id: self.next_id(),
        };
        filter::candidates(&scoped, &src)
    }

    /// Entries within `scope` of `base` matching `filter`
    pub fn search(
        &self,
        base: &str,
        scope: Scope,
        filter: &Filter,
        opts: &SearchOptions,
    ) -> Result<SearchResult> {
        let _read_guard = self.giant.read();
        let base = dn::normalize(base);

        if !base.is_empty() && self.dn_index.lookup(&base)?.is_none() {
            return Err(LdbmError::NoSuchObject(base));
        }

        let idl = self.candidates_locked(&base, scope, filter);
        let types = self.indexes.attribute_types();
        let mut result = SearchResult::default();
        let mut examined = 0usize;

        for id in idl.iter() {
            if let Some(flag) = &opts.abandon {
                if flag.load(Ordering::Acquire) {
                    tracing::debug!(base = %base, examined, "search abandoned");
                    return Err(LdbmError::Abandoned);
                }
            }

            let entry = match self.fetch_entry(id, false) {
                Ok(Some(e)) => e,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(id, error = %e, "candidate unreadable, skipping");
                    continue;
                }
            };
            examined += 1;

            if !in_scope(&entry.dn, &base, scope) || !filter.matches(&entry, types) {
                continue;
            }
            if opts.size_limit > 0 && result.entries.len() >= opts.size_limit {
                result.truncated = true;
                break;
            }
            result.entries.push(entry.to_arc());
        }

        tracing::debug!(
            base = %base,
            %filter,
            candidates = idl.len(),
            examined,
            returned = result.entries.len(),
            "search done"
        );
        Ok(result)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Write back every dirty container now; returns how many were written
    pub fn sync(&self) -> Result<usize> {
        let _read_guard = self.giant.read();
        let written = self.pool.sync_dirty()?;
        tracing::info!(containers = written, "sync");
        Ok(written)
    }

    /// Close the backend gracefully
    ///
    /// Stops the syncer, writes back dirty containers and closes handles.
    pub fn close(self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&self) -> Result<()> {
        let _write_guard = self.giant.write();
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(mut syncer) = self.syncer.lock().take() {
            syncer.stop();
        }
        self.cache.clear();
        self.pool.sync_dirty()?;
        self.pool.close_all()?;
        tracing::info!(next_id = self.next_id(), "backend closed");
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn next_id(&self) -> Id {
        self.next_id.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> BackendStats {
        BackendStats {
            next_id: self.next_id(),
            cache: self.cache.stats(),
            pool: self.pool.stats(),
        }
    }

    pub fn cache(&self) -> &EntryCache {
        &self.cache
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn dn_index(&self) -> &DnIndex {
        &self.dn_index
    }

    pub fn indexes(&self) -> &IndexStore {
        &self.indexes
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn check_placement(&self, dn: &str) -> Result<()> {
        if dn.is_empty() {
            return Err(LdbmError::InvalidDn("empty DN".into()));
        }
        let suffix = &self.config.suffix;
        if !suffix.is_empty() && !dn::is_suffix_of(suffix, dn) {
            return Err(LdbmError::NoSuchObject(format!(
                "{} is outside naming context {}",
                dn, suffix
            )));
        }
        Ok(())
    }

    /// Hand out the next id, persisting the counter first
    fn allocate_id(&self) -> Result<Id> {
        let id = self.next_id();
        {
            let db = self.pool.open(NEXTID, OpenMode::Writer)?;
            db.put(NEXTID_KEY, &(id + 1).to_be_bytes())?;
        }
        self.next_id.store(id + 1, Ordering::Release);
        Ok(id)
    }

    fn put_entry(&self, entry: &Entry) -> Result<()> {
        let bytes = entry.encode()?;
        let db = self.pool.open(ID2ENTRY, OpenMode::Writer)?;
        db.put(&id_key(entry.id), &bytes)
    }

    /// Entry `id` via the cache, reading `id2entry` on a miss
    fn fetch_entry(&self, id: Id, for_write: bool) -> Result<Option<CachedEntry>> {
        for _ in 0..FETCH_RETRIES {
            if let Some(hit) = self.cache.lookup_by_id(id, for_write) {
                return Ok(Some(hit));
            }

            let bytes = {
                let db = self.pool.open(ID2ENTRY, OpenMode::Reader)?;
                db.get(&id_key(id))
            };
            let Some(bytes) = bytes else {
                return Ok(None);
            };
            let mut entry = Entry::decode(&bytes)?;
            entry.id = id;

            match self.cache.add(entry, for_write) {
                Ok(fresh) => {
                    // Loaded from disk: already durable
                    self.cache.commit(&fresh);
                    self.cache.release(fresh);
                }
                // Another reader filled it first
                Err(LdbmError::Duplicate(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Err(LdbmError::Internal(format!(
            "entry {} could not be brought into the cache",
            id
        )))
    }

    /// Move index keys of `touched` attributes from `old`'s values to `new`'s
    fn reindex(
        &self,
        dn: &str,
        old: &Entry,
        new: &Entry,
        touched: &BTreeSet<String>,
    ) -> Result<()> {
        self.indexes
            .change_entry(old, new, touched)
            .map(|_| ())
            .map_err(|e| Self::internal("index", dn, e))
    }

    fn undo_reindex(&self, old: &Entry, new: &Entry, touched: &BTreeSet<String>) {
        if let Err(e) = self.indexes.change_entry(new, old, touched) {
            tracing::error!(id = new.id, error = %e, "index rollback failed");
        }
    }

    /// Point a cached entry at its rewritten record, or drop it from the
    /// cache so the next read loads the record from `id2entry`
    fn recache(&self, cached: &mut CachedEntry, entry: Entry) {
        if let Err(e) = self.cache.update(cached, entry) {
            tracing::warn!(id = cached.id, error = %e, "cache update failed, evicting entry");
            self.cache.delete(cached);
        }
    }

    fn undo_entry_write(&self, old: &Entry) {
        if let Err(e) = self.put_entry(old) {
            tracing::error!(dn = %old.dn, id = old.id, error = %e, "id2entry rollback failed");
        }
    }

    /// Put renamed descendants back under their old DNs, last first
    fn undo_moved(&self, renamed: &[(&Entry, &str)]) {
        for (old, new_dn) in renamed.iter().rev() {
            self.undo_entry_write(old);
            self.undo_dn_rename(new_dn, &old.dn, old.id);
        }
    }

    fn undo_index(&self, op: IndexOp, done: &[(&str, &[String])], id: Id) {
        let inverse = match op {
            IndexOp::Add => IndexOp::Delete,
            IndexOp::Delete => IndexOp::Add,
        };
        for (attr, values) in done.iter().rev() {
            if let Err(e) = self.indexes.index_values(inverse, attr, values, id) {
                tracing::error!(attr, id, error = %e, "index rollback failed");
            }
        }
    }

    fn undo_dn_add(&self, dn: &str, id: Id) {
        if let Err(e) = self.dn_index.delete(dn, id) {
            tracing::error!(dn, id, error = %e, "dn index rollback failed");
        }
    }

    fn undo_dn_rename(&self, new_dn: &str, old_dn: &str, id: Id) {
        if let Err(e) = self.dn_index.rename(new_dn, old_dn, id) {
            tracing::error!(old_dn, new_dn, id, error = %e, "dn index rollback failed");
        }
    }

    /// A write could not finish all of its updates
    fn internal(stage: &str, dn: &str, e: LdbmError) -> LdbmError {
        match e {
            LdbmError::Internal(_) => e,
            other => {
                tracing::error!(stage, dn, error = %other, "write failed part way");
                LdbmError::Internal(format!("{} update for {} failed: {}", stage, dn, other))
            }
        }
    }

    fn after_write(&self) -> Result<()> {
        if self.config.sync_strategy == SyncStrategy::EveryWrite {
            self.pool.sync_dirty()?;
        }
        Ok(())
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!(error = %e, "backend shutdown failed");
        }
    }
}

/// `(attr, value)` pairs of one RDN, attribute lower-cased
fn rdn_avas(rdn: &str) -> Vec<(String, String)> {
    rdn.split('+')
        .filter_map(|ava| ava.split_once('='))
        .map(|(a, v)| (a.trim().to_ascii_lowercase(), v.trim().to_string()))
        .filter(|(a, v)| !a.is_empty() && !v.is_empty())
        .collect()
}

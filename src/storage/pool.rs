//! DB Handle Pool
//!
//! Bounds the number of containers open at once.
//!
//! ## Admission
//! ```text
//!   open(name, mode)
//!     ├── already open, compatible mode  → refcount += 1
//!     ├── free slot                      → open file, register
//!     ├── pool full, idle handle exists  → evict least recently referenced
//!     └── pool full, all referenced      → wait on `freed`, retry
//! ```
//! Handles are released by dropping the returned [`DbHandle`]; a release
//! that brings a refcount to zero wakes blocked openers. The container stays
//! open until its slot is needed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::error::{LdbmError, Result};

use super::{DbFile, OpenMode, CONTAINER_EXT};

/// Counters exposed for tests and the tool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Containers currently open
    pub open: usize,
    /// Handles currently referenced
    pub referenced: usize,
    /// Files opened since start
    pub opens: u64,
    /// Idle handles closed to make room
    pub evictions: u64,
    /// Times an opener had to wait for a slot
    pub waits: u64,
}

struct Slot {
    name: String,
    db: Arc<DbFile>,
    mode: OpenMode,
    refcnt: usize,
    last_ref: Instant,
}

struct PoolState {
    slots: Vec<Slot>,
    stats: PoolStats,
}

struct PoolShared {
    dir: PathBuf,
    max_open: usize,
    state: Mutex<PoolState>,
    freed: Condvar,
}

/// Bounded pool of open containers
///
/// Cheap to clone; clones share the same pool.
#[derive(Clone)]
pub struct DbPool {
    shared: Arc<PoolShared>,
}

/// A referenced container; dropping it releases the reference
pub struct DbHandle {
    db: Arc<DbFile>,
    shared: Arc<PoolShared>,
}

impl DbPool {
    pub fn new(dir: &Path, max_open: usize) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                dir: dir.to_path_buf(),
                max_open: max_open.max(1),
                state: Mutex::new(PoolState {
                    slots: Vec::new(),
                    stats: PoolStats::default(),
                }),
                freed: Condvar::new(),
            }),
        }
    }

    /// Path of the container file for `name`
    pub fn container_path(&self, name: &str) -> PathBuf {
        self.shared
            .dir
            .join(format!("{}.{}", name, CONTAINER_EXT))
    }

    /// Open (or reference) container `name`, blocking while the pool is full
    /// of referenced handles
    pub fn open(&self, name: &str, mode: OpenMode) -> Result<DbHandle> {
        let shared = &self.shared;
        let mut state = shared.state.lock();

        loop {
            // Step 1: Already open?
            if let Some(i) = state.slots.iter().position(|s| s.name == name) {
                let slot = &mut state.slots[i];
                if slot.mode.satisfies(mode) {
                    return Ok(self.reference(slot));
                }
                if slot.refcnt > 0 {
                    // Cannot reopen a handle others are using; upgrade in place
                    tracing::debug!(container = name, "mode upgrade on referenced handle");
                    slot.mode = mode;
                    slot.db.allow_writes();
                    return Ok(self.reference(slot));
                }
                // Idle with the wrong mode: close and reopen below
                Self::retire(&state.slots[i])?;
                state.slots.remove(i);
            }

            // Step 2: Free slot?
            if state.slots.len() < shared.max_open {
                let db = self.open_file(name, mode)?;
                state.stats.opens += 1;
                state.slots.push(Slot {
                    name: name.to_string(),
                    db: Arc::new(db),
                    mode,
                    refcnt: 0,
                    last_ref: Instant::now(),
                });
                let slot = state.slots.last_mut().ok_or_else(|| {
                    LdbmError::Internal("handle slot vanished after insert".into())
                })?;
                return Ok(self.reference(slot));
            }

            // Step 3: Evict the least recently referenced idle handle
            let victim = state
                .slots
                .iter()
                .enumerate()
                .filter(|(_, s)| s.refcnt == 0)
                .min_by_key(|(_, s)| s.last_ref)
                .map(|(i, _)| i);

            if let Some(i) = victim {
                let slot = state.slots.remove(i);
                tracing::debug!(container = %slot.name, wanted = name, "evicting idle handle");
                state.stats.evictions += 1;
                if let Err(e) = Self::retire(&slot) {
                    // Keep the handle rather than lose its dirty data
                    state.slots.insert(i, slot);
                    return Err(e);
                }
                continue;
            }

            // Step 4: Everything is referenced; wait for a release
            state.stats.waits += 1;
            tracing::debug!(container = name, "handle pool full, waiting");
            shared.freed.wait(&mut state);
        }
    }

    /// Release a handle explicitly (same as dropping it)
    pub fn close(&self, handle: DbHandle) {
        drop(handle);
    }

    /// Write back every dirty open container; returns how many were written
    pub fn sync_dirty(&self) -> Result<usize> {
        let dbs: Vec<Arc<DbFile>> = {
            let state = self.shared.state.lock();
            state
                .slots
                .iter()
                .filter(|s| s.db.is_dirty())
                .map(|s| Arc::clone(&s.db))
                .collect()
        };

        let mut written = 0;
        for db in dbs {
            if db.sync()? {
                written += 1;
            }
        }
        Ok(written)
    }

    /// Sync and close every idle container
    pub fn close_all(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        let mut first_err = None;
        let slots = std::mem::take(&mut state.slots);
        for slot in slots {
            if slot.refcnt > 0 {
                tracing::warn!(container = %slot.name, refs = slot.refcnt, "still referenced at close");
                state.slots.push(slot);
                continue;
            }
            if let Err(e) = Self::retire(&slot) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        let mut stats = state.stats;
        stats.open = state.slots.len();
        stats.referenced = state.slots.iter().filter(|s| s.refcnt > 0).count();
        stats
    }

    pub fn max_open(&self) -> usize {
        self.shared.max_open
    }

    /// Is `name` currently open?
    pub fn is_open(&self, name: &str) -> bool {
        self.shared.state.lock().slots.iter().any(|s| s.name == name)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn reference(&self, slot: &mut Slot) -> DbHandle {
        slot.refcnt += 1;
        slot.last_ref = Instant::now();
        DbHandle {
            db: Arc::clone(&slot.db),
            shared: Arc::clone(&self.shared),
        }
    }

    fn open_file(&self, name: &str, mode: OpenMode) -> Result<DbFile> {
        let path = self.container_path(name);
        DbFile::open(&path, name, mode).map_err(|e| match e {
            LdbmError::Io(io) => {
                LdbmError::StorageUnavailable(format!("open {}: {}", path.display(), io))
            }
            other => other,
        })
    }

    /// Flush an idle slot before it leaves the pool
    fn retire(slot: &Slot) -> Result<()> {
        slot.db.sync()?;
        tracing::trace!(container = %slot.name, "handle closed");
        Ok(())
    }
}

impl PoolShared {
    fn release(&self, db: &Arc<DbFile>) {
        let mut state = self.state.lock();
        if let Some(slot) = state.slots.iter_mut().find(|s| Arc::ptr_eq(&s.db, db)) {
            slot.refcnt = slot.refcnt.saturating_sub(1);
            slot.last_ref = Instant::now();
            if slot.refcnt == 0 {
                self.freed.notify_all();
            }
        }
    }
}

impl DbHandle {
    pub fn db(&self) -> &DbFile {
        &self.db
    }
}

impl std::ops::Deref for DbHandle {
    type Target = DbFile;

    fn deref(&self) -> &DbFile {
        &self.db
    }
}

impl Drop for DbHandle {
    fn drop(&mut self) {
        self.shared.release(&self.db);
    }
}

//! Entry Cache Module
//!
//! Bounded, reference-counted cache of materialized entries, reachable by id
//! and by DN.
//!
//! ## Entry Lifecycle
//! ```text
//!            add()              commit()              release()
//!   ─────▶ CREATING ─────────▶ COMMITTED ──────────▶ READY
//!             │                                        │
//!             │ release() without commit               │ delete() / evict
//!             ▼                                        ▼
//!          DELETED ◀───────────────────────────────  DELETED
//!             │
//!             │ refcount reaches 0
//!             ▼
//!           freed
//! ```
//!
//! ## Rules
//! - Only READY entries are handed out by lookups; a lookup that finds an
//!   entry in any other live state waits for it to settle
//! - A DELETED entry is unreachable by lookups at once, but freed only when
//!   its last reference is released
//! - Eviction only takes unreferenced READY entries from the LRU tail

mod entry_cache;

pub use entry_cache::{CacheLookup, CacheStats, CachedEntry, EntryCache};

/// Lifecycle state of a cached entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Being built by a writer; not visible
    Creating,
    /// Durably written; becomes READY on the next release
    Committed,
    /// Visible to lookups
    Ready,
    /// Unreachable; freed when the refcount reaches 0
    Deleted,
}

//! Index Module
//!
//! Per-attribute indexes: which index types are configured for an attribute,
//! how values turn into keys, and applying or reading ID lists under those
//! keys.
//!
//! ## Responsibilities
//! - Resolve an attribute's configured index types (falling back to the
//!   `default` directive)
//! - Walk supertypes so a subtype's values land in each indexed supertype
//! - Add/remove an id under every key a set of values produces
//! - Report `NotIndexed` (a capability signal, not an error) when the
//!   attribute/type pair has no index
//!
//! Each attribute lives in its own container, so updates to different
//! attributes never contend on a container write lock.

mod keys;

pub use keys::{
    approx_keys, equality_key, index_keys, normalize_value, phonetic, presence_key,
    substring_index_keys, substring_query_keys, APPROX_PREFIX, EQ_PREFIX, PRES_PREFIX,
    SUBLEN, SUB_PREFIX,
};

use std::collections::{BTreeSet, HashMap};

use crate::config::IndexDirective;
use crate::entry::Entry;
use crate::error::Result;
use crate::idl::{Id, Idl, IdlStore};
use crate::schema::AttributeTypes;
use crate::storage::{DbPool, OpenMode};

/// Attribute name of the catch-all directive
pub const DEFAULT_INDEX_ATTR: &str = "default";

/// Kind of index maintained for an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexType {
    Presence,
    Equality,
    Approximate,
    Substring,
}

impl IndexType {
    pub const ALL: [IndexType; 4] = [
        IndexType::Presence,
        IndexType::Equality,
        IndexType::Approximate,
        IndexType::Substring,
    ];

    /// Parse the short names used by the tool (`pres`, `eq`, `approx`, `sub`)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pres" | "presence" => Some(IndexType::Presence),
            "eq" | "equality" => Some(IndexType::Equality),
            "approx" | "approximate" => Some(IndexType::Approximate),
            "sub" | "substr" | "substring" => Some(IndexType::Substring),
            _ => None,
        }
    }
}

/// Whether an index update applies ids or removes them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOp {
    Add,
    Delete,
}

/// Outcome of an index update request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    /// At least one index was updated
    Indexed,
    /// No index is configured for the attribute or its supertypes
    NotIndexed,
}

/// Result of reading an index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexLookup {
    /// No index for this attribute/type; the caller must widen to ALLIDS
    NotIndexed,
    /// Indexed; the (possibly empty) ID list
    Found(Idl),
}

impl IndexLookup {
    /// Collapse to an ID list, widening `NotIndexed` to ALLIDS
    pub fn or_all_ids(self, next_id: Id) -> Idl {
        match self {
            IndexLookup::NotIndexed => Idl::all_ids(next_id),
            IndexLookup::Found(idl) => idl,
        }
    }
}

/// Attribute indexes over the handle pool
pub struct IndexStore {
    pool: DbPool,
    idl: IdlStore,
    types: AttributeTypes,
    /// attribute → configured index types
    masks: HashMap<String, BTreeSet<IndexType>>,
    default_mask: BTreeSet<IndexType>,
}

impl IndexStore {
    pub fn new(
        pool: DbPool,
        idl: IdlStore,
        types: AttributeTypes,
        directives: &[IndexDirective],
    ) -> Self {
        let mut masks: HashMap<String, BTreeSet<IndexType>> = HashMap::new();
        let mut default_mask = BTreeSet::new();
        for d in directives {
            let slot = if d.attr == DEFAULT_INDEX_ATTR {
                &mut default_mask
            } else {
                masks.entry(d.attr.to_ascii_lowercase()).or_default()
            };
            slot.extend(d.types.iter().copied());
        }

        Self {
            pool,
            idl,
            types,
            masks,
            default_mask,
        }
    }

    pub fn attribute_types(&self) -> &AttributeTypes {
        &self.types
    }

    /// Index types configured for `attr` (not counting supertypes)
    pub fn index_types(&self, attr: &str) -> BTreeSet<IndexType> {
        match self.masks.get(&attr.to_ascii_lowercase()) {
            Some(mask) => mask.clone(),
            None => self.default_mask.clone(),
        }
    }

    pub fn is_indexed(&self, attr: &str, ty: IndexType) -> bool {
        self.index_types(attr).contains(&ty)
    }

    // =========================================================================
    // Updates
    // =========================================================================

    /// Add or remove `id` under every key `values` produce, for `attr` and
    /// each indexed supertype.
    pub fn index_values(
        &self,
        op: IndexOp,
        attr: &str,
        values: &[String],
        id: Id,
    ) -> Result<IndexOutcome> {
        let mut outcome = IndexOutcome::NotIndexed;

        for name in self.types.chain(attr) {
            let mask = self.index_types(&name);
            if mask.is_empty() {
                continue;
            }

            let keys: BTreeSet<Vec<u8>> = mask
                .iter()
                .flat_map(|ty| index_keys(*ty, values))
                .collect();
            self.apply(&name, op, keys.iter(), id)?;
            outcome = IndexOutcome::Indexed;
        }

        Ok(outcome)
    }

    /// Move `old`'s id from the keys `old` produces to the keys `new`
    /// produces, in every index container a `touched` attribute feeds.
    ///
    /// A container's key sets are built from every attribute of the entry
    /// that maps into it, so a supertype index shared by several subtypes
    /// keeps a key while any of them still supplies it. Keys common to both
    /// sets are left alone. If a container fails, the containers already
    /// changed are moved back before the error is returned.
    pub fn change_entry(
        &self,
        old: &Entry,
        new: &Entry,
        touched: &BTreeSet<String>,
    ) -> Result<IndexOutcome> {
        let containers: BTreeSet<String> = touched
            .iter()
            .flat_map(|attr| self.types.chain(attr))
            .filter(|name| !self.index_types(name).is_empty())
            .collect();

        let mut done: Vec<(&str, BTreeSet<Vec<u8>>, BTreeSet<Vec<u8>>)> = Vec::new();
        for name in &containers {
            let before = self.container_keys(old, name);
            let after = self.container_keys(new, name);

            if let Err(e) = self.move_keys(name, &before, &after, old.id) {
                for (prev, before, after) in done.iter().rev() {
                    if let Err(undo) = self.move_keys(prev, after, before, old.id) {
                        tracing::error!(
                            container = %prev,
                            id = old.id,
                            error = %undo,
                            "index rollback failed"
                        );
                    }
                }
                return Err(e);
            }
            done.push((name.as_str(), before, after));
        }

        Ok(if containers.is_empty() {
            IndexOutcome::NotIndexed
        } else {
            IndexOutcome::Indexed
        })
    }

    /// Every key `entry` produces in `container`'s configured indexes
    fn container_keys(&self, entry: &Entry, container: &str) -> BTreeSet<Vec<u8>> {
        let mask = self.index_types(container);
        let mut keys = BTreeSet::new();
        for (attr, values) in entry.attrs() {
            if !self.types.is_subtype_or_self(attr, container) {
                continue;
            }
            for ty in &mask {
                keys.extend(index_keys(*ty, values));
            }
        }
        keys
    }

    fn move_keys(
        &self,
        container: &str,
        before: &BTreeSet<Vec<u8>>,
        after: &BTreeSet<Vec<u8>>,
        id: Id,
    ) -> Result<()> {
        self.apply(container, IndexOp::Delete, before.difference(after), id)?;
        self.apply(container, IndexOp::Add, after.difference(before), id)
    }

    fn apply<'k>(
        &self,
        container: &str,
        op: IndexOp,
        keys: impl Iterator<Item = &'k Vec<u8>>,
        id: Id,
    ) -> Result<()> {
        let mut keys = keys.peekable();
        if keys.peek().is_none() {
            return Ok(());
        }

        let db = self.pool.open(container, OpenMode::Writer)?;
        for key in keys {
            match op {
                IndexOp::Add => {
                    self.idl.insert(&db, key, id)?;
                }
                IndexOp::Delete => {
                    self.idl.delete(&db, key, id)?;
                }
            }
            tracing::trace!(container, ?op, id, "index key updated");
        }
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Read the ID list under one key of `attr`'s `ty` index
    pub fn key_read(&self, attr: &str, ty: IndexType, key: &[u8], next_id: Id) -> Result<IndexLookup> {
        if !self.is_indexed(attr, ty) {
            return Ok(IndexLookup::NotIndexed);
        }
        let db = self.pool.open(&attr.to_ascii_lowercase(), OpenMode::Reader)?;
        Ok(IndexLookup::Found(self.idl.fetch(&db, key, next_id)?))
    }

    /// Read and intersect the ID lists under several keys of one index
    ///
    /// An empty key set cannot narrow anything and reads as `NotIndexed`.
    pub fn keys_read_all(
        &self,
        attr: &str,
        ty: IndexType,
        keys: &[Vec<u8>],
        next_id: Id,
    ) -> Result<IndexLookup> {
        if !self.is_indexed(attr, ty) || keys.is_empty() {
            return Ok(IndexLookup::NotIndexed);
        }
        let db = self.pool.open(&attr.to_ascii_lowercase(), OpenMode::Reader)?;

        let mut acc: Option<Idl> = None;
        for key in keys {
            let idl = self.idl.fetch(&db, key, next_id)?;
            let merged = match acc {
                None => idl,
                Some(prev) => Idl::intersection(&prev, &idl),
            };
            if merged.is_empty() {
                return Ok(IndexLookup::Found(merged));
            }
            acc = Some(merged);
        }
        Ok(IndexLookup::Found(acc.unwrap_or_default()))
    }
}

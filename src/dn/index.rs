//! DN scope index
//!
//! Every entry is recorded in the `dn2id` container under four key families:
//!
//! ```text
//!   =<dn>          base          the entry itself (exactly one id)
//!   %<parent>      one-level     every immediate child of <parent>
//!   @<dn>          subtree/self  the entry, as the root of its own subtree
//!   @<ancestor>    subtree       one key per ancestor up to the suffix
//! ```
//!
//! A scoped search reads a single key instead of walking the tree.
//!
//! Updating the families touches several keys and is not crash-atomic. If
//! a step fails, the steps already applied are undone in memory. If the
//! undo fails too, the index is left inconsistent and `Internal` is
//! returned.

use std::collections::BTreeSet;

use crate::error::{LdbmError, Result};
use crate::idl::{Id, Idl, IdlStore, KeyInsert};
use crate::storage::{DbFile, DbPool, OpenMode};

use super::{ancestors, parent, Scope};

/// Container holding the DN families
pub const DN2ID: &str = "dn2id";

pub const DN_BASE_PREFIX: u8 = b'=';
pub const DN_ONE_PREFIX: u8 = b'%';
pub const DN_SUBTREE_PREFIX: u8 = b'@';

/// One applied key update, kept so a failed multi-key update can be undone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Added,
    Removed,
}

/// Base/one-level/subtree families over the DN space
pub struct DnIndex {
    pool: DbPool,
    idl: IdlStore,
    suffix: String,
}

fn family_key(prefix: u8, dn: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + dn.len());
    key.push(prefix);
    key.extend_from_slice(dn.as_bytes());
    key
}

impl DnIndex {
    pub fn new(pool: DbPool, idl: IdlStore, suffix: impl Into<String>) -> Self {
        Self {
            pool,
            idl,
            suffix: suffix.into(),
        }
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Every key `dn` is recorded under, base key first
    pub fn family_keys(&self, dn: &str) -> Vec<Vec<u8>> {
        let mut keys = vec![family_key(DN_BASE_PREFIX, dn)];
        if let Some(p) = parent(dn) {
            keys.push(family_key(DN_ONE_PREFIX, p));
        }
        keys.push(family_key(DN_SUBTREE_PREFIX, dn));
        for a in ancestors(dn, &self.suffix) {
            keys.push(family_key(DN_SUBTREE_PREFIX, a));
        }
        keys
    }

    // =========================================================================
    // Updates
    // =========================================================================

    /// Record `dn` → `id` under all four families
    ///
    /// Fails with `Duplicate`, writing nothing, if the DN is already present.
    pub fn add(&self, dn: &str, id: Id) -> Result<()> {
        let db = self.pool.open(DN2ID, OpenMode::Writer)?;

        if let Some(existing) = self.base_id(&db, dn)? {
            return Err(LdbmError::Duplicate(format!(
                "DN {} already indexed as id {}",
                dn, existing
            )));
        }

        let keys = self.family_keys(dn);
        let mut applied = Vec::with_capacity(keys.len());
        for key in &keys {
            match self.idl.insert(&db, key, id) {
                Ok(KeyInsert::Inserted) => applied.push((Step::Added, key.clone())),
                Ok(KeyInsert::AlreadyPresent) | Ok(KeyInsert::Collapsed) => {}
                Err(e) => return Err(self.repair(&db, dn, id, &applied, e)),
            }
        }

        tracing::trace!(dn, id, "dn indexed");
        Ok(())
    }

    /// Remove `dn` → `id` from all four families
    pub fn delete(&self, dn: &str, id: Id) -> Result<()> {
        let db = self.pool.open(DN2ID, OpenMode::Writer)?;

        let keys = self.family_keys(dn);
        let mut applied = Vec::with_capacity(keys.len());
        for key in &keys {
            match self.idl.delete(&db, key, id) {
                Ok(true) => applied.push((Step::Removed, key.clone())),
                Ok(false) => {}
                Err(e) => return Err(self.repair(&db, dn, id, &applied, e)),
            }
        }

        tracing::trace!(dn, id, "dn unindexed");
        Ok(())
    }

    /// Move `id` from the families of `old_dn` to those of `new_dn`
    ///
    /// Keys both DNs share (common ancestors) are left alone. Fails with
    /// `Duplicate` if `new_dn` is already indexed.
    pub fn rename(&self, old_dn: &str, new_dn: &str, id: Id) -> Result<()> {
        if old_dn == new_dn {
            return Ok(());
        }
        let db = self.pool.open(DN2ID, OpenMode::Writer)?;

        if let Some(existing) = self.base_id(&db, new_dn)? {
            return Err(LdbmError::Duplicate(format!(
                "DN {} already indexed as id {}",
                new_dn, existing
            )));
        }

        let old: BTreeSet<Vec<u8>> = self.family_keys(old_dn).into_iter().collect();
        let new: BTreeSet<Vec<u8>> = self.family_keys(new_dn).into_iter().collect();

        let mut applied = Vec::new();
        for key in old.difference(&new) {
            match self.idl.delete(&db, key, id) {
                Ok(true) => applied.push((Step::Removed, key.clone())),
                Ok(false) => {}
                Err(e) => return Err(self.repair(&db, old_dn, id, &applied, e)),
            }
        }
        for key in new.difference(&old) {
            match self.idl.insert(&db, key, id) {
                Ok(KeyInsert::Inserted) => applied.push((Step::Added, key.clone())),
                Ok(_) => {}
                Err(e) => return Err(self.repair(&db, old_dn, id, &applied, e)),
            }
        }

        tracing::trace!(old_dn, new_dn, id, "dn re-indexed");
        Ok(())
    }

    /// Undo `applied` in reverse after `cause` interrupted a multi-key update
    fn repair(
        &self,
        db: &DbFile,
        dn: &str,
        id: Id,
        applied: &[(Step, Vec<u8>)],
        cause: LdbmError,
    ) -> LdbmError {
        tracing::warn!(dn, id, steps = applied.len(), error = %cause, "dn index update failed, repairing");

        for (step, key) in applied.iter().rev() {
            let undone = match step {
                Step::Added => self.idl.delete(db, key, id).map(|_| ()),
                Step::Removed => self.idl.insert(db, key, id).map(|_| ()),
            };
            if let Err(e) = undone {
                tracing::error!(dn, id, error = %e, "dn index repair failed");
                return LdbmError::Internal(format!(
                    "dn index for {} left inconsistent: {} (repair: {})",
                    dn, cause, e
                ));
            }
        }
        cause
    }

    // =========================================================================
    // Reads
    // =========================================================================

    fn base_id(&self, db: &DbFile, dn: &str) -> Result<Option<Id>> {
        let idl = self.idl.fetch(db, &family_key(DN_BASE_PREFIX, dn), 0)?;
        if idl.is_all_ids() {
            return Ok(None);
        }
        Ok(idl.first())
    }

    /// Id recorded for `dn`, if any
    pub fn lookup(&self, dn: &str) -> Result<Option<Id>> {
        let db = self.pool.open(DN2ID, OpenMode::Reader)?;
        self.base_id(&db, dn)
    }

    /// Ids of the immediate children of `dn`
    pub fn children(&self, dn: &str, next_id: Id) -> Result<Idl> {
        let db = self.pool.open(DN2ID, OpenMode::Reader)?;
        self.idl.fetch(&db, &family_key(DN_ONE_PREFIX, dn), next_id)
    }

    pub fn has_children(&self, dn: &str) -> Result<bool> {
        let idl = self.children(dn, 0)?;
        Ok(idl.is_all_ids() || !idl.is_empty())
    }

    /// Ids within `scope` of `base`
    ///
    /// An empty base names the root above every naming context: a base
    /// search there finds nothing and wider scopes read as ALLIDS.
    pub fn scope_candidates(&self, base: &str, scope: Scope, next_id: Id) -> Result<Idl> {
        if base.is_empty() {
            return Ok(match scope {
                Scope::Base => Idl::empty(),
                Scope::OneLevel | Scope::Subtree => Idl::all_ids(next_id),
            });
        }

        let prefix = match scope {
            Scope::Base => DN_BASE_PREFIX,
            Scope::OneLevel => DN_ONE_PREFIX,
            Scope::Subtree => DN_SUBTREE_PREFIX,
        };
        let db = self.pool.open(DN2ID, OpenMode::Reader)?;
        self.idl.fetch(&db, &family_key(prefix, base), next_id)
    }
}

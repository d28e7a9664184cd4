//! IDL Store
//!
//! Reads and updates the ID list stored under one key of a container,
//! splitting full blocks into continuation blocks behind an indirect header
//! and collapsing the key to ALLIDS once it has too many blocks.
//!
//! All mutations of a container go through its write lock, so one container
//! is never changed by two IDL operations at once.

use crate::error::Result;
use crate::storage::DbFile;

use super::{DeleteOutcome, Id, IdBlock, Idl, InsertOutcome};

/// Prefix of continuation block keys
pub const CONT_PREFIX: u8 = b'\\';

/// Key of the continuation block starting at `first` under `key`
pub fn continuation_key(key: &[u8], first: Id) -> Vec<u8> {
    let mut k = Vec::with_capacity(1 + 8 + key.len());
    k.push(CONT_PREFIX);
    k.extend_from_slice(&first.to_be_bytes());
    k.extend_from_slice(key);
    k
}

/// Result of adding an id under a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyInsert {
    Inserted,
    AlreadyPresent,
    /// The key now holds ALLIDS
    Collapsed,
}

/// Block-structured IDL access with the configured thresholds
#[derive(Debug, Clone, Copy)]
pub struct IdlStore {
    max_ids_per_block: usize,
    max_indirect: usize,
}

impl IdlStore {
    pub fn new(max_ids_per_block: usize, max_indirect: usize) -> Self {
        Self {
            max_ids_per_block: max_ids_per_block.max(2),
            max_indirect,
        }
    }

    pub fn max_ids_per_block(&self) -> usize {
        self.max_ids_per_block
    }

    pub fn max_indirect(&self) -> usize {
        self.max_indirect
    }

    // =========================================================================
    // Read
    // =========================================================================

    /// The full ID list stored under `key`
    ///
    /// A missing or unreadable continuation block contributes nothing; it is
    /// logged and the rest of the list is still returned.
    pub fn fetch(&self, db: &DbFile, key: &[u8], next_id: Id) -> Result<Idl> {
        let block = match self.read_block(db, key)? {
            Some(b) => b,
            None => return Ok(Idl::empty()),
        };

        match block {
            IdBlock::Empty => Ok(Idl::empty()),
            IdBlock::AllIds => Ok(Idl::all_ids(next_id)),
            IdBlock::Leaf(ids) => Ok(Idl::Ids(ids)),
            IdBlock::Indirect(firsts) => {
                let mut ids = Vec::new();
                for first in firsts {
                    match self.read_block(db, &continuation_key(key, first)) {
                        Ok(Some(IdBlock::Leaf(part))) => ids.extend(part),
                        Ok(other) => tracing::warn!(
                            container = db.name(),
                            first,
                            found = ?other,
                            "continuation block missing, treating as empty"
                        ),
                        Err(e) => tracing::warn!(
                            container = db.name(),
                            first,
                            error = %e,
                            "continuation block unreadable, treating as empty"
                        ),
                    }
                }
                // Blocks are keyed by ascending first id; a stale header could
                // still leave them overlapping, so normalize.
                if ids.windows(2).any(|w| w[0] >= w[1]) {
                    return Ok(Idl::from_ids(ids));
                }
                Ok(Idl::Ids(ids))
            }
        }
    }

    // =========================================================================
    // Insert
    // =========================================================================

    /// Add `id` to the list under `key`
    pub fn insert(&self, db: &DbFile, key: &[u8], id: Id) -> Result<KeyInsert> {
        let _guard = db.lock_writes();

        match self.read_block(db, key)? {
            None | Some(IdBlock::Empty) => {
                self.write_block(db, key, &IdBlock::Leaf(vec![id]))?;
                Ok(KeyInsert::Inserted)
            }
            Some(IdBlock::AllIds) => Ok(KeyInsert::AlreadyPresent),
            Some(IdBlock::Leaf(ids)) => self.insert_leaf(db, key, Idl::Ids(ids), id),
            Some(IdBlock::Indirect(firsts)) => self.insert_indirect(db, key, firsts, id),
        }
    }

    fn insert_leaf(&self, db: &DbFile, key: &[u8], mut idl: Idl, id: Id) -> Result<KeyInsert> {
        match idl.insert(id, self.max_ids_per_block) {
            InsertOutcome::AlreadyPresent => Ok(KeyInsert::AlreadyPresent),
            InsertOutcome::Inserted | InsertOutcome::InsertedFirstChanged => {
                self.write_idl(db, key, &idl)?;
                Ok(KeyInsert::Inserted)
            }
            InsertOutcome::NeedsSplit => {
                // A split leaf becomes two continuation blocks
                if self.max_indirect < 2 {
                    return self.collapse(db, key, &[]);
                }
                let Some((left, right)) = idl.split_insert(id) else {
                    return Ok(KeyInsert::AlreadyPresent);
                };
                let header = vec![left[0], right[0]];
                self.write_block(db, &continuation_key(key, left[0]), &IdBlock::Leaf(left))?;
                self.write_block(db, &continuation_key(key, right[0]), &IdBlock::Leaf(right))?;
                self.write_block(db, key, &IdBlock::Indirect(header))?;
                tracing::trace!(container = db.name(), "leaf split into indirect block");
                Ok(KeyInsert::Inserted)
            }
        }
    }

    fn insert_indirect(
        &self,
        db: &DbFile,
        key: &[u8],
        mut firsts: Vec<Id>,
        id: Id,
    ) -> Result<KeyInsert> {
        let slot = Self::locate(&firsts, id);
        let old_first = firsts[slot];
        let cont_key = continuation_key(key, old_first);

        let mut block = match self.read_block(db, &cont_key)? {
            Some(IdBlock::Leaf(ids)) => Idl::Ids(ids),
            other => {
                tracing::warn!(
                    container = db.name(),
                    first = old_first,
                    found = ?other,
                    "continuation block missing on insert, rebuilding it"
                );
                Idl::empty()
            }
        };

        match block.insert(id, self.max_ids_per_block) {
            InsertOutcome::AlreadyPresent => Ok(KeyInsert::AlreadyPresent),
            InsertOutcome::Inserted => {
                self.write_idl(db, &cont_key, &block)?;
                Ok(KeyInsert::Inserted)
            }
            InsertOutcome::InsertedFirstChanged => {
                // Block is keyed by its first id, so it moves
                let new_first = block.first().unwrap_or(id);
                db.delete(&cont_key)?;
                self.write_idl(db, &continuation_key(key, new_first), &block)?;
                firsts[slot] = new_first;
                self.write_block(db, key, &IdBlock::Indirect(firsts))?;
                Ok(KeyInsert::Inserted)
            }
            InsertOutcome::NeedsSplit => {
                if firsts.len() + 1 > self.max_indirect {
                    return self.collapse(db, key, &firsts);
                }
                let Some((left, right)) = block.split_insert(id) else {
                    return Ok(KeyInsert::AlreadyPresent);
                };
                db.delete(&cont_key)?;
                let (l0, r0) = (left[0], right[0]);
                self.write_block(db, &continuation_key(key, l0), &IdBlock::Leaf(left))?;
                self.write_block(db, &continuation_key(key, r0), &IdBlock::Leaf(right))?;
                firsts.splice(slot..=slot, [l0, r0]);
                self.write_block(db, key, &IdBlock::Indirect(firsts))?;
                Ok(KeyInsert::Inserted)
            }
        }
    }

    /// Replace the key's header and continuation blocks with ALLIDS
    fn collapse(&self, db: &DbFile, key: &[u8], firsts: &[Id]) -> Result<KeyInsert> {
        for first in firsts {
            db.delete(&continuation_key(key, *first))?;
        }
        self.write_block(db, key, &IdBlock::AllIds)?;
        tracing::warn!(
            container = db.name(),
            blocks = firsts.len(),
            "index key exceeded block limit, collapsed to ALLIDS"
        );
        Ok(KeyInsert::Collapsed)
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Remove `id` from the list under `key`; returns whether it was removed.
    ///
    /// A collapsed key stays ALLIDS: it no longer knows its members.
    pub fn delete(&self, db: &DbFile, key: &[u8], id: Id) -> Result<bool> {
        let _guard = db.lock_writes();

        match self.read_block(db, key)? {
            None | Some(IdBlock::Empty) | Some(IdBlock::AllIds) => Ok(false),
            Some(IdBlock::Leaf(ids)) => {
                let mut idl = Idl::Ids(ids);
                match idl.delete(id) {
                    DeleteOutcome::NotPresent => Ok(false),
                    DeleteOutcome::DeletedEmpty => {
                        db.delete(key)?;
                        Ok(true)
                    }
                    DeleteOutcome::Deleted | DeleteOutcome::DeletedFirstChanged => {
                        self.write_idl(db, key, &idl)?;
                        Ok(true)
                    }
                }
            }
            Some(IdBlock::Indirect(firsts)) => self.delete_indirect(db, key, firsts, id),
        }
    }

    fn delete_indirect(&self, db: &DbFile, key: &[u8], mut firsts: Vec<Id>, id: Id) -> Result<bool> {
        let slot = Self::locate(&firsts, id);
        let old_first = firsts[slot];
        let cont_key = continuation_key(key, old_first);

        let mut block = match self.read_block(db, &cont_key)? {
            Some(IdBlock::Leaf(ids)) => Idl::Ids(ids),
            other => {
                tracing::warn!(
                    container = db.name(),
                    first = old_first,
                    found = ?other,
                    "continuation block missing on delete"
                );
                return Ok(false);
            }
        };

        match block.delete(id) {
            DeleteOutcome::NotPresent => Ok(false),
            DeleteOutcome::Deleted => {
                self.write_idl(db, &cont_key, &block)?;
                Ok(true)
            }
            DeleteOutcome::DeletedFirstChanged => {
                let new_first = block.first().unwrap_or(old_first);
                db.delete(&cont_key)?;
                self.write_idl(db, &continuation_key(key, new_first), &block)?;
                firsts[slot] = new_first;
                self.write_block(db, key, &IdBlock::Indirect(firsts))?;
                Ok(true)
            }
            DeleteOutcome::DeletedEmpty => {
                db.delete(&cont_key)?;
                firsts.remove(slot);
                if firsts.is_empty() {
                    db.delete(key)?;
                } else {
                    self.write_block(db, key, &IdBlock::Indirect(firsts))?;
                }
                Ok(true)
            }
        }
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Index of the continuation block that does or would hold `id`
    fn locate(firsts: &[Id], id: Id) -> usize {
        match firsts.binary_search(&id) {
            Ok(i) => i,
            Err(0) => 0,
            Err(i) => i - 1,
        }
    }

    fn read_block(&self, db: &DbFile, key: &[u8]) -> Result<Option<IdBlock>> {
        match db.get(key) {
            Some(bytes) => Ok(Some(IdBlock::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_block(&self, db: &DbFile, key: &[u8], block: &IdBlock) -> Result<()> {
        db.put(key, &block.encode())
    }

    fn write_idl(&self, db: &DbFile, key: &[u8], idl: &Idl) -> Result<()> {
        let block = match idl {
            Idl::AllIds { .. } => IdBlock::AllIds,
            Idl::Ids(ids) if ids.is_empty() => IdBlock::Empty,
            Idl::Ids(ids) => IdBlock::Leaf(ids.clone()),
        };
        self.write_block(db, key, &block)
    }
}

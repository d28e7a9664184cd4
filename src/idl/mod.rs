//! ID List Module
//!
//! Sorted sets of entry ids and the block structure they are stored in.
//!
//! ## Responsibilities
//! - In-memory id sets with union / intersection / difference
//! - The ALLIDS sentinel: "every id below the next id to be issued"
//! - Block-level insert/delete with split signalling
//! - On-disk blocks (leaf, indirect header, ALLIDS) and their codec
//! - Per-key block splitting and ALLIDS collapse on a container
//!
//! ## Key Layout on Disk
//! ```text
//!   key                     → Leaf [id, id, ...]            (small key)
//!   key                     → Indirect [first0, first1, ..] (split key)
//!   '\' + first0 + key      → Leaf [first0, ...]            (continuation)
//!   '\' + first1 + key      → Leaf [first1, ...]
//!   key                     → AllIds                        (collapsed key)
//! ```

mod block;
mod store;

pub use block::IdBlock;
pub use store::{continuation_key, IdlStore, KeyInsert, CONT_PREFIX};

/// Entry identifier
pub type Id = u64;

/// Reserved "no id" value
pub const NOID: Id = u64::MAX;

/// First id ever issued; 0 is never a valid id
pub const FIRST_ID: Id = 1;

/// Outcome of inserting an id into a leaf block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Inserted, first id unchanged
    Inserted,
    /// Inserted at slot 0; the block's continuation key changed
    InsertedFirstChanged,
    /// Id was already a member
    AlreadyPresent,
    /// Block is full; nothing was changed
    NeedsSplit,
}

/// Outcome of deleting an id from a leaf block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// Deleted from slot 0; the block's continuation key changed
    DeletedFirstChanged,
    /// Deleted the last id; the block is now empty
    DeletedEmpty,
    NotPresent,
}

/// A set of entry ids
///
/// `AllIds` carries the exclusive upper bound so it can be iterated
/// without literal membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Idl {
    /// Sorted, duplicate-free ids
    Ids(Vec<Id>),
    /// Every id in `FIRST_ID..next_id`
    AllIds { next_id: Id },
}

impl Default for Idl {
    fn default() -> Self {
        Idl::Ids(Vec::new())
    }
}

impl Idl {
    // =========================================================================
    // Construction
    // =========================================================================

    /// Empty list with room for `n` ids
    pub fn alloc(n: usize) -> Self {
        Idl::Ids(Vec::with_capacity(n))
    }

    pub fn empty() -> Self {
        Idl::Ids(Vec::new())
    }

    pub fn all_ids(next_id: Id) -> Self {
        Idl::AllIds { next_id }
    }

    /// Build from arbitrary ids (sorted and deduplicated)
    pub fn from_ids(ids: impl IntoIterator<Item = Id>) -> Self {
        let mut v: Vec<Id> = ids.into_iter().collect();
        v.sort_unstable();
        v.dedup();
        Idl::Ids(v)
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn is_all_ids(&self) -> bool {
        matches!(self, Idl::AllIds { .. })
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Idl::Ids(v) => v.is_empty(),
            Idl::AllIds { next_id } => *next_id <= FIRST_ID,
        }
    }

    /// Number of ids (implicit count for ALLIDS)
    pub fn len(&self) -> usize {
        match self {
            Idl::Ids(v) => v.len(),
            Idl::AllIds { next_id } => next_id.saturating_sub(FIRST_ID) as usize,
        }
    }

    /// Literal ids, `None` for ALLIDS
    pub fn as_slice(&self) -> Option<&[Id]> {
        match self {
            Idl::Ids(v) => Some(v),
            Idl::AllIds { .. } => None,
        }
    }

    /// Binary search. `Ok(pos)` if present, `Err(pos)` = insertion point.
    ///
    /// For ALLIDS the position is the id's offset in the implicit range.
    pub fn find(&self, id: Id) -> std::result::Result<usize, usize> {
        match self {
            Idl::Ids(v) => v.binary_search(&id),
            Idl::AllIds { next_id } => {
                if id >= FIRST_ID && id < *next_id {
                    Ok((id - FIRST_ID) as usize)
                } else if id < FIRST_ID {
                    Err(0)
                } else {
                    Err(self.len())
                }
            }
        }
    }

    pub fn contains(&self, id: Id) -> bool {
        self.find(id).is_ok()
    }

    /// Smallest member
    pub fn first(&self) -> Option<Id> {
        self.iter().next()
    }

    /// Largest member
    pub fn last(&self) -> Option<Id> {
        match self {
            Idl::Ids(v) => v.last().copied(),
            Idl::AllIds { next_id } if *next_id > FIRST_ID => Some(next_id - 1),
            Idl::AllIds { .. } => None,
        }
    }

    /// Forward iterator, valid for literal lists and ALLIDS alike
    pub fn iter(&self) -> IdlIter<'_> {
        match self {
            Idl::Ids(v) => IdlIter::Literal(v.iter()),
            Idl::AllIds { next_id } => IdlIter::Range(FIRST_ID..*next_id),
        }
    }

    // =========================================================================
    // Block Mutation
    // =========================================================================

    /// Insert `id` keeping order, refusing to grow past `max_ids`.
    ///
    /// ALLIDS already contains everything, so inserting is a no-op.
    pub fn insert(&mut self, id: Id, max_ids: usize) -> InsertOutcome {
        let ids = match self {
            Idl::Ids(v) => v,
            Idl::AllIds { .. } => return InsertOutcome::AlreadyPresent,
        };

        match ids.binary_search(&id) {
            Ok(_) => InsertOutcome::AlreadyPresent,
            Err(_) if ids.len() >= max_ids => InsertOutcome::NeedsSplit,
            Err(pos) => {
                ids.insert(pos, id);
                if pos == 0 {
                    InsertOutcome::InsertedFirstChanged
                } else {
                    InsertOutcome::Inserted
                }
            }
        }
    }

    /// Remove `id`. Deleting from ALLIDS is a no-op: membership is unknown.
    pub fn delete(&mut self, id: Id) -> DeleteOutcome {
        let ids = match self {
            Idl::Ids(v) => v,
            Idl::AllIds { .. } => return DeleteOutcome::NotPresent,
        };

        match ids.binary_search(&id) {
            Err(_) => DeleteOutcome::NotPresent,
            Ok(pos) => {
                ids.remove(pos);
                if ids.is_empty() {
                    DeleteOutcome::DeletedEmpty
                } else if pos == 0 {
                    DeleteOutcome::DeletedFirstChanged
                } else {
                    DeleteOutcome::Deleted
                }
            }
        }
    }

    /// Split a full block around `id`, returning `(left, right)`.
    ///
    /// The split happens at `id`'s insertion point, so `id` starts the right
    /// half, except when it would be the first id overall, in which case it
    /// is the whole left half. Both halves are non-empty and their
    /// concatenation is the old block plus `id`.
    pub fn split_insert(&self, id: Id) -> Option<(Vec<Id>, Vec<Id>)> {
        let ids = self.as_slice()?;
        let pos = match ids.binary_search(&id) {
            Ok(_) => return None,
            Err(pos) => pos,
        };

        let mut merged = Vec::with_capacity(ids.len() + 1);
        merged.extend_from_slice(&ids[..pos]);
        merged.push(id);
        merged.extend_from_slice(&ids[pos..]);

        let at = pos.max(1).min(merged.len() - 1).max(1);
        let right = merged.split_off(at);
        Some((merged, right))
    }

    // =========================================================================
    // Set Algebra
    // =========================================================================

    /// a ∪ b. ALLIDS absorbs.
    pub fn union(a: &Idl, b: &Idl) -> Idl {
        match (a, b) {
            (Idl::AllIds { next_id: x }, Idl::AllIds { next_id: y }) => Idl::all_ids(*x.max(y)),
            (Idl::AllIds { next_id }, other) | (other, Idl::AllIds { next_id }) => {
                let bound = other.last().map(|l| l + 1).unwrap_or(0);
                Idl::all_ids((*next_id).max(bound))
            }
            (Idl::Ids(x), Idl::Ids(y)) => {
                let mut out = Vec::with_capacity(x.len() + y.len());
                let (mut i, mut j) = (0, 0);
                while i < x.len() && j < y.len() {
                    match x[i].cmp(&y[j]) {
                        std::cmp::Ordering::Less => {
                            out.push(x[i]);
                            i += 1;
                        }
                        std::cmp::Ordering::Greater => {
                            out.push(y[j]);
                            j += 1;
                        }
                        std::cmp::Ordering::Equal => {
                            out.push(x[i]);
                            i += 1;
                            j += 1;
                        }
                    }
                }
                out.extend_from_slice(&x[i..]);
                out.extend_from_slice(&y[j..]);
                Idl::Ids(out)
            }
        }
    }

    /// a ∩ b. ALLIDS is the identity.
    pub fn intersection(a: &Idl, b: &Idl) -> Idl {
        match (a, b) {
            (Idl::AllIds { next_id: x }, Idl::AllIds { next_id: y }) => Idl::all_ids(*x.min(y)),
            (Idl::AllIds { .. }, other) | (other, Idl::AllIds { .. }) => other.clone(),
            (Idl::Ids(x), Idl::Ids(y)) => {
                let mut out = Vec::with_capacity(x.len().min(y.len()));
                let (mut i, mut j) = (0, 0);
                while i < x.len() && j < y.len() {
                    match x[i].cmp(&y[j]) {
                        std::cmp::Ordering::Less => i += 1,
                        std::cmp::Ordering::Greater => j += 1,
                        std::cmp::Ordering::Equal => {
                            out.push(x[i]);
                            i += 1;
                            j += 1;
                        }
                    }
                }
                Idl::Ids(out)
            }
        }
    }

    /// a ∖ b. Subtracting from ALLIDS materializes the range.
    pub fn notin(a: &Idl, b: &Idl) -> Idl {
        match (a, b) {
            (_, Idl::AllIds { next_id }) => match a {
                Idl::Ids(x) => Idl::Ids(x.iter().copied().filter(|id| *id >= *next_id).collect()),
                Idl::AllIds { next_id: x } => {
                    Idl::Ids((*next_id.max(&FIRST_ID)..*x).collect())
                }
            },
            (Idl::AllIds { next_id }, Idl::Ids(y)) => Idl::Ids(
                (FIRST_ID..*next_id)
                    .filter(|id| y.binary_search(id).is_err())
                    .collect(),
            ),
            (Idl::Ids(x), Idl::Ids(y)) => {
                let mut out = Vec::with_capacity(x.len());
                let mut j = 0;
                for &id in x {
                    while j < y.len() && y[j] < id {
                        j += 1;
                    }
                    if j >= y.len() || y[j] != id {
                        out.push(id);
                    }
                }
                Idl::Ids(out)
            }
        }
    }
}

/// Iterator over an [`Idl`]
pub enum IdlIter<'a> {
    Literal(std::slice::Iter<'a, Id>),
    Range(std::ops::Range<Id>),
}

impl Iterator for IdlIter<'_> {
    type Item = Id;

    fn next(&mut self) -> Option<Id> {
        match self {
            IdlIter::Literal(it) => it.next().copied(),
            IdlIter::Range(r) => r.next(),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self {
            IdlIter::Literal(it) => it.size_hint(),
            IdlIter::Range(r) => r.size_hint(),
        }
    }
}

impl<'a> IntoIterator for &'a Idl {
    type Item = Id;
    type IntoIter = IdlIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

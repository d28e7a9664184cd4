//! Filter-to-candidates compiler
//!
//! Lowers a filter to one ID list that is a superset of the true matches.
//! Anything the indexes cannot answer widens to ALLIDS and is left to the
//! row-level re-check.
//!
//! ```text
//!   AND        intersection of every child (all children evaluated)
//!   OR         union of children
//!   NOT        ALLIDS
//!   leaf       index keys of the assertion, intersected; ALLIDS if unindexed
//!   >= / <=    ALLIDS (no ordering index)
//!   scope      DN index
//!   (&) (|)    ALLIDS / empty
//! ```

use crate::dn::{DnIndex, Scope};
use crate::error::Result;
use crate::idl::{Id, Idl};
use crate::index::{
    approx_keys, equality_key, presence_key, substring_query_keys, IndexLookup, IndexStore,
    IndexType,
};

use super::{Computed, Filter};

/// Where the compiler reads ID lists from
pub trait CandidateSource {
    /// Upper bound for ALLIDS ranges
    fn next_id(&self) -> Id;

    /// Intersection of the ID lists under `keys` of `attr`'s `ty` index
    fn index_read(&self, attr: &str, ty: IndexType, keys: &[Vec<u8>]) -> Result<IndexLookup>;

    /// Ids within `scope` of `base`
    fn scope_read(&self, base: &str, scope: Scope) -> Result<Idl>;
}

/// Candidate source over the attribute indexes and the DN index
pub struct IndexSource<'a> {
    pub indexes: &'a IndexStore,
    pub dn_index: &'a DnIndex,
    pub next_id: Id,
}

impl CandidateSource for IndexSource<'_> {
    fn next_id(&self) -> Id {
        self.next_id
    }

    fn index_read(&self, attr: &str, ty: IndexType, keys: &[Vec<u8>]) -> Result<IndexLookup> {
        self.indexes.keys_read_all(attr, ty, keys, self.next_id)
    }

    fn scope_read(&self, base: &str, scope: Scope) -> Result<Idl> {
        self.dn_index.scope_candidates(base, scope, self.next_id)
    }
}

/// Candidate ids for `filter`
pub fn candidates(filter: &Filter, src: &dyn CandidateSource) -> Idl {
    let idl = lower(filter, src);
    tracing::trace!(%filter, count = idl.len(), all_ids = idl.is_all_ids(), "filter candidates");
    idl
}

fn lower(filter: &Filter, src: &dyn CandidateSource) -> Idl {
    match filter {
        Filter::And(children) => {
            let mut acc: Option<Idl> = None;
            for c in children {
                let idl = lower(c, src);
                acc = Some(match acc {
                    None => idl,
                    Some(prev) => Idl::intersection(&prev, &idl),
                });
            }
            acc.unwrap_or_else(|| Idl::all_ids(src.next_id()))
        }
        Filter::Or(children) => {
            let mut acc = Idl::empty();
            for c in children {
                acc = Idl::union(&acc, &lower(c, src));
            }
            acc
        }
        Filter::Not(_) => Idl::all_ids(src.next_id()),

        Filter::Present(attr) => leaf(src, attr, IndexType::Presence, vec![presence_key()]),
        Filter::Equality(attr, value) => {
            leaf(src, attr, IndexType::Equality, vec![equality_key(value)])
        }
        Filter::Approx(attr, value) => leaf(src, attr, IndexType::Approximate, approx_keys(value)),
        Filter::Substring {
            attr,
            initial,
            any,
            final_,
        } => leaf(
            src,
            attr,
            IndexType::Substring,
            substring_query_keys(initial.as_deref(), any, final_.as_deref()),
        ),
        Filter::GreaterOrEqual(..) | Filter::LessOrEqual(..) => Idl::all_ids(src.next_id()),

        Filter::Scope(scope, base) => match src.scope_read(base, *scope) {
            Ok(idl) => idl,
            Err(e) => {
                tracing::warn!(base = %base, error = %e, "scope index unreadable, using ALLIDS");
                Idl::all_ids(src.next_id())
            }
        },

        Filter::Computed(Computed::True) => Idl::all_ids(src.next_id()),
        Filter::Computed(Computed::False) | Filter::Computed(Computed::Undefined) => Idl::empty(),
    }
}

fn leaf(src: &dyn CandidateSource, attr: &str, ty: IndexType, keys: Vec<Vec<u8>>) -> Idl {
    match src.index_read(attr, ty, &keys) {
        Ok(lookup) => lookup.or_all_ids(src.next_id()),
        Err(e) => {
            tracing::warn!(attr, ?ty, error = %e, "index unreadable, using ALLIDS");
            Idl::all_ids(src.next_id())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LdbmError;
    use std::collections::HashMap;

    /// In-memory source: equality index on `cn` only
    struct FakeSource {
        eq: HashMap<Vec<u8>, Vec<Id>>,
        fail: bool,
    }

    impl FakeSource {
        fn scenario() -> Self {
            let mut eq = HashMap::new();
            eq.insert(equality_key("a"), vec![1, 3, 5]);
            eq.insert(equality_key("b"), vec![2, 3]);
            Self { eq, fail: false }
        }
    }

    impl CandidateSource for FakeSource {
        fn next_id(&self) -> Id {
            10
        }

        fn index_read(&self, attr: &str, ty: IndexType, keys: &[Vec<u8>]) -> Result<IndexLookup> {
            if self.fail {
                return Err(LdbmError::StorageUnavailable("down".into()));
            }
            if attr != "cn" || ty != IndexType::Equality || keys.is_empty() {
                return Ok(IndexLookup::NotIndexed);
            }
            let mut acc: Option<Idl> = None;
            for k in keys {
                let idl = Idl::from_ids(self.eq.get(k).cloned().unwrap_or_default());
                acc = Some(match acc {
                    None => idl,
                    Some(prev) => Idl::intersection(&prev, &idl),
                });
            }
            Ok(IndexLookup::Found(acc.unwrap_or_default()))
        }

        fn scope_read(&self, _base: &str, _scope: Scope) -> Result<Idl> {
            Ok(Idl::from_ids([3, 4]))
        }
    }

    fn ids(idl: &Idl) -> Vec<Id> {
        idl.iter().collect()
    }

    #[test]
    fn and_or_not_scenario() {
        let src = FakeSource::scenario();

        let and = Filter::parse("(&(cn=a)(cn=b))").unwrap();
        assert_eq!(ids(&candidates(&and, &src)), vec![3]);

        let or = Filter::parse("(|(cn=a)(cn=b))").unwrap();
        assert_eq!(ids(&candidates(&or, &src)), vec![1, 2, 3, 5]);

        let not = Filter::parse("(!(cn=a))").unwrap();
        assert!(candidates(&not, &src).is_all_ids());
    }

    #[test]
    fn unindexed_and_ordering_leaves_widen() {
        let src = FakeSource::scenario();
        assert!(candidates(&Filter::parse("(sn=a)").unwrap(), &src).is_all_ids());
        assert!(candidates(&Filter::parse("(cn>=a)").unwrap(), &src).is_all_ids());
        // AND with an unindexed side narrows to the indexed side
        let f = Filter::parse("(&(sn=x)(cn=b))").unwrap();
        assert_eq!(ids(&candidates(&f, &src)), vec![2, 3]);
    }

    #[test]
    fn indexed_miss_is_empty_not_all_ids() {
        let src = FakeSource::scenario();
        let idl = candidates(&Filter::parse("(cn=zzz)").unwrap(), &src);
        assert!(idl.is_empty());
        assert!(!idl.is_all_ids());
    }

    #[test]
    fn computed_and_scope_nodes() {
        let src = FakeSource::scenario();
        assert!(candidates(&Filter::parse("(&)").unwrap(), &src).is_all_ids());
        assert!(candidates(&Filter::parse("(|)").unwrap(), &src).is_empty());
        assert!(candidates(&Filter::Computed(Computed::Undefined), &src).is_empty());

        let f = Filter::And(vec![
            Filter::scope(Scope::Subtree, "o=y"),
            Filter::parse("(cn=a)").unwrap(),
        ]);
        assert_eq!(ids(&candidates(&f, &src)), vec![3]);
    }

    #[test]
    fn read_errors_widen_to_all_ids() {
        let mut src = FakeSource::scenario();
        src.fail = true;
        assert!(candidates(&Filter::parse("(cn=a)").unwrap(), &src).is_all_ids());
    }
}

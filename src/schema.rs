//! Attribute type hierarchy
//!
//! The only schema knowledge the engine needs: which attribute types are
//! subtypes of which. Values of a subtype are indexed under each indexed
//! supertype and match filters written against the supertype.

use std::collections::HashMap;

/// Subtype → supertype registry
#[derive(Debug, Clone, Default)]
pub struct AttributeTypes {
    sup: HashMap<String, String>,
}

impl AttributeTypes {
    pub fn new(pairs: &[(String, String)]) -> Self {
        let mut sup = HashMap::new();
        for (sub, parent) in pairs {
            sup.insert(sub.to_ascii_lowercase(), parent.to_ascii_lowercase());
        }
        Self { sup }
    }

    /// `attr` followed by its supertypes, nearest first
    pub fn chain(&self, attr: &str) -> Vec<String> {
        let mut out = vec![attr.to_ascii_lowercase()];
        while let Some(parent) = out.last().and_then(|a| self.sup.get(a)) {
            // A cyclic registry would loop forever
            if out.contains(parent) {
                break;
            }
            out.push(parent.clone());
        }
        out
    }

    /// True if `attr` is `ancestor` or one of its subtypes
    pub fn is_subtype_or_self(&self, attr: &str, ancestor: &str) -> bool {
        let ancestor = ancestor.to_ascii_lowercase();
        self.chain(attr).iter().any(|a| *a == ancestor)
    }
}

//! Entry records
//!
//! The materialized record stored in `id2entry` and held by the entry cache.
//! Attribute names are case-insensitive and kept lower-cased; values keep
//! their original form and are normalized by the matching code when needed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::idl::{Id, NOID};

/// A directory entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Assigned on add; `NOID` until then
    pub id: Id,

    /// Normalized DN
    pub dn: String,

    /// attribute name (lower-case) → values
    attrs: BTreeMap<String, Vec<String>>,
}

impl Entry {
    /// Create an empty entry; the DN is normalized
    pub fn new(dn: impl AsRef<str>) -> Self {
        Self {
            id: NOID,
            dn: crate::dn::normalize(dn.as_ref()),
            attrs: BTreeMap::new(),
        }
    }

    /// Builder-style helper used heavily by tests and the tool
    pub fn with_attr(mut self, attr: &str, values: &[&str]) -> Self {
        self.add_values(attr, values.iter().map(|v| v.to_string()));
        self
    }

    /// Values of `attr`, empty if absent
    pub fn values(&self, attr: &str) -> &[String] {
        self.attrs
            .get(&attr.to_ascii_lowercase())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_attr(&self, attr: &str) -> bool {
        self.attrs.contains_key(&attr.to_ascii_lowercase())
    }

    /// Iterate `(attr, values)` in attribute-name order
    pub fn attrs(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Add values, skipping ones already present
    pub fn add_values(&mut self, attr: &str, values: impl IntoIterator<Item = String>) {
        let slot = self.attrs.entry(attr.to_ascii_lowercase()).or_default();
        for v in values {
            if !slot.contains(&v) {
                slot.push(v);
            }
        }
        if slot.is_empty() {
            self.attrs.remove(&attr.to_ascii_lowercase());
        }
    }

    /// Remove the given values; an empty `values` removes the attribute.
    /// Returns the values actually removed.
    pub fn remove_values(&mut self, attr: &str, values: &[String]) -> Vec<String> {
        let name = attr.to_ascii_lowercase();
        let Some(slot) = self.attrs.get_mut(&name) else {
            return Vec::new();
        };

        let removed = if values.is_empty() {
            std::mem::take(slot)
        } else {
            let mut removed = Vec::new();
            slot.retain(|v| {
                if values.contains(v) {
                    removed.push(v.clone());
                    false
                } else {
                    true
                }
            });
            removed
        };

        if slot.is_empty() {
            self.attrs.remove(&name);
        }
        removed
    }

    /// Replace all values of `attr`; returns the previous values
    pub fn replace_values(&mut self, attr: &str, values: Vec<String>) -> Vec<String> {
        let name = attr.to_ascii_lowercase();
        let old = self.attrs.remove(&name).unwrap_or_default();
        if !values.is_empty() {
            self.attrs.insert(name, Vec::new());
            self.add_values(attr, values);
        }
        old
    }

    // =========================================================================
    // Encoding (id2entry values)
    // =========================================================================

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_names_are_case_insensitive() {
        let e = Entry::new("CN=Foo, O=Bar").with_attr("CN", &["Foo"]);
        assert_eq!(e.dn, "cn=foo,o=bar");
        assert_eq!(e.values("cn"), &["Foo".to_string()]);
        assert!(e.has_attr("Cn"));
    }

    #[test]
    fn remove_last_value_drops_attribute() {
        let mut e = Entry::new("cn=a").with_attr("mail", &["x@y"]);
        let removed = e.remove_values("mail", &["x@y".to_string()]);
        assert_eq!(removed, vec!["x@y".to_string()]);
        assert!(!e.has_attr("mail"));
    }

    #[test]
    fn encode_decode_keeps_id() {
        let mut e = Entry::new("cn=a,o=b").with_attr("sn", &["one", "two"]);
        e.id = 42;
        let back = Entry::decode(&e.encode().unwrap()).unwrap();
        assert_eq!(back, e);
    }
}

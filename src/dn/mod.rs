//! DN Module
//!
//! Normalized distinguished names and the scope index built over them.
//!
//! ## Normal Form
//! - RDNs separated by `,` with no surrounding whitespace
//! - attribute types and values lower-cased, inner whitespace collapsed
//! - escaped separators (`\,`) are kept as written
//!
//! ```text
//!   "CN=John  Smith, OU=People ,O=Example"  →  "cn=john smith,ou=people,o=example"
//! ```

mod index;

pub use index::{DnIndex, DN2ID, DN_BASE_PREFIX, DN_ONE_PREFIX, DN_SUBTREE_PREFIX};

/// Search scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The base entry only
    Base,
    /// Immediate children of the base
    OneLevel,
    /// The base and all of its descendants
    Subtree,
}

/// Normalize a DN string
pub fn normalize(dn: &str) -> String {
    split_rdns(dn)
        .into_iter()
        .map(normalize_rdn)
        .filter(|r| !r.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

fn normalize_rdn(rdn: &str) -> String {
    rdn.split('+')
        .map(|ava| match ava.split_once('=') {
            Some((ty, val)) => format!("{}={}", collapse(ty), collapse(val)),
            None => collapse(ava),
        })
        .collect::<Vec<_>>()
        .join("+")
}

fn collapse(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Split on unescaped commas
fn split_rdns(dn: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in dn.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            ',' if !escaped => {
                parts.push(&dn[start..i]);
                start = i + 1;
            }
            _ => escaped = false,
        }
    }
    parts.push(&dn[start..]);
    parts
}

/// Byte offset of the first unescaped comma
fn first_separator(dn: &str) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in dn.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            ',' if !escaped => return Some(i),
            _ => escaped = false,
        }
    }
    None
}

/// Parent of a normalized DN, `None` for a single-RDN DN
pub fn parent(dn: &str) -> Option<&str> {
    first_separator(dn).map(|i| &dn[i + 1..])
}

/// Leading RDN of a normalized DN
pub fn rdn(dn: &str) -> &str {
    match first_separator(dn) {
        Some(i) => &dn[..i],
        None => dn,
    }
}

/// True if `dn` equals `ancestor` or lies below it
pub fn is_descendant_or_self(dn: &str, ancestor: &str) -> bool {
    if ancestor.is_empty() || dn == ancestor {
        return true;
    }
    dn.len() > ancestor.len()
        && dn.ends_with(ancestor)
        && dn[..dn.len() - ancestor.len()].ends_with(',')
        && !dn[..dn.len() - ancestor.len() - 1].ends_with('\\')
}

/// True if `suffix` is `dn` itself or one of its ancestors
pub fn is_suffix_of(suffix: &str, dn: &str) -> bool {
    is_descendant_or_self(dn, suffix)
}

/// Proper ancestors of `dn`, nearest first, stopping at `suffix`
/// (inclusive). With an empty suffix the walk runs to the top-level RDN.
pub fn ancestors<'a>(dn: &'a str, suffix: &str) -> Vec<&'a str> {
    let mut out = Vec::new();
    if !suffix.is_empty() && dn == suffix {
        return out;
    }
    let mut cur = dn;
    while let Some(p) = parent(cur) {
        if !suffix.is_empty() && !is_descendant_or_self(p, suffix) {
            break;
        }
        out.push(p);
        if p == suffix {
            break;
        }
        cur = p;
    }
    out
}

/// Replace the `old_base` tail of `dn` with `new_base`
pub fn rebase(dn: &str, old_base: &str, new_base: &str) -> Option<String> {
    if dn == old_base {
        return Some(new_base.to_string());
    }
    if !is_descendant_or_self(dn, old_base) {
        return None;
    }
    let head = &dn[..dn.len() - old_base.len() - 1];
    Some(format!("{},{}", head, new_base))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_case_and_space() {
        assert_eq!(
            normalize("CN=John  Smith, OU=People ,O=Example"),
            "cn=john smith,ou=people,o=example"
        );
    }

    #[test]
    fn escaped_comma_is_not_a_separator() {
        let dn = normalize("cn=Smith\\, John,o=x");
        assert_eq!(dn, "cn=smith\\, john,o=x");
        assert_eq!(parent(&dn), Some("o=x"));
        assert_eq!(rdn(&dn), "cn=smith\\, john");
    }

    #[test]
    fn ancestors_stop_at_suffix() {
        assert_eq!(
            ancestors("cn=a,ou=x,o=y,c=z", "o=y,c=z"),
            vec!["ou=x,o=y,c=z", "o=y,c=z"]
        );
        assert_eq!(ancestors("cn=a,ou=x", ""), vec!["ou=x"]);
        assert!(ancestors("o=y", "o=y").is_empty());
    }

    #[test]
    fn descendant_check_respects_rdn_boundary() {
        assert!(is_descendant_or_self("ou=x,o=y", "o=y"));
        assert!(!is_descendant_or_self("ou=x,oo=y", "o=y"));
        assert!(is_descendant_or_self("o=y", "o=y"));
    }

    #[test]
    fn rebase_moves_subtree() {
        assert_eq!(
            rebase("cn=a,ou=old,o=y", "ou=old,o=y", "ou=new,o=y").as_deref(),
            Some("cn=a,ou=new,o=y")
        );
        assert_eq!(rebase("cn=a,o=z", "ou=old,o=y", "ou=new,o=y"), None);
    }
}

//! Filter Module
//!
//! Search filters: the tree, a textual parser, row-level evaluation and
//! lowering to candidate ID lists.
//!
//! ## Text Form
//! ```text
//!   (&(objectclass=person)(|(cn=smi*)(sn~=smith))(!(mail=*)))
//! ```
//! - `(&)` is absolute true, `(|)` absolute false
//! - a bare item such as `cn=a` is accepted at the top level
//! - `\xx` hex escapes in values; `\2a` is a literal `*`
//!
//! Evaluation is three-valued: a computed `Undefined` node is neither
//! true nor false, and `!` of undefined stays undefined.

mod candidates;

pub use candidates::{candidates, CandidateSource, IndexSource};

use std::cmp::Ordering;
use std::fmt;

use crate::dn::{self, Scope};
use crate::entry::Entry;
use crate::error::{LdbmError, Result};
use crate::index::{normalize_value, phonetic};
use crate::schema::AttributeTypes;

/// Constant filter nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Computed {
    True,
    False,
    Undefined,
}

/// A search filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Present(String),
    Equality(String, String),
    Approx(String, String),
    Substring {
        attr: String,
        initial: Option<String>,
        any: Vec<String>,
        final_: Option<String>,
    },
    GreaterOrEqual(String, String),
    LessOrEqual(String, String),
    /// Scope pseudo-filter; the DN is normalized
    Scope(Scope, String),
    Computed(Computed),
}

impl Filter {
    /// Parse the textual form
    pub fn parse(text: &str) -> Result<Filter> {
        let text = text.trim();
        if text.is_empty() {
            return Err(LdbmError::FilterSyntax("empty filter".into()));
        }

        let wrapped;
        let src = if text.starts_with('(') {
            text
        } else {
            wrapped = format!("({})", text);
            &wrapped
        };

        let mut p = Parser {
            src: src.as_bytes(),
            pos: 0,
        };
        let filter = p.filter()?;
        if p.pos != p.src.len() {
            return Err(p.error("trailing characters after filter"));
        }
        Ok(filter)
    }

    pub fn eq(attr: &str, value: &str) -> Filter {
        Filter::Equality(attr.to_ascii_lowercase(), value.to_string())
    }

    pub fn present(attr: &str) -> Filter {
        Filter::Present(attr.to_ascii_lowercase())
    }

    pub fn scope(scope: Scope, base: &str) -> Filter {
        Filter::Scope(scope, dn::normalize(base))
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    /// Row-level check of `entry` against the filter
    pub fn matches(&self, entry: &Entry, types: &AttributeTypes) -> bool {
        self.evaluate(entry, types) == Some(true)
    }

    /// Three-valued evaluation; `None` is undefined
    pub fn evaluate(&self, entry: &Entry, types: &AttributeTypes) -> Option<bool> {
        match self {
            Filter::And(children) => {
                let mut result = Some(true);
                for c in children {
                    match c.evaluate(entry, types) {
                        Some(false) => return Some(false),
                        None => result = None,
                        Some(true) => {}
                    }
                }
                result
            }
            Filter::Or(children) => {
                let mut result = Some(false);
                for c in children {
                    match c.evaluate(entry, types) {
                        Some(true) => return Some(true),
                        None => result = None,
                        Some(false) => {}
                    }
                }
                result
            }
            Filter::Not(inner) => inner.evaluate(entry, types).map(|b| !b),
            Filter::Present(attr) => Some(values_of(entry, types, attr).next().is_some()),
            Filter::Equality(attr, value) => {
                let want = normalize_value(value);
                Some(values_of(entry, types, attr).any(|v| normalize_value(v) == want))
            }
            Filter::Approx(attr, value) => {
                Some(values_of(entry, types, attr).any(|v| approx_match(v, value)))
            }
            Filter::Substring {
                attr,
                initial,
                any,
                final_,
            } => Some(values_of(entry, types, attr).any(|v| {
                substring_match(v, initial.as_deref(), any, final_.as_deref())
            })),
            Filter::GreaterOrEqual(attr, value) => Some(
                values_of(entry, types, attr).any(|v| compare_values(v, value) != Ordering::Less),
            ),
            Filter::LessOrEqual(attr, value) => Some(
                values_of(entry, types, attr)
                    .any(|v| compare_values(v, value) != Ordering::Greater),
            ),
            Filter::Scope(scope, base) => Some(in_scope(&entry.dn, base, *scope)),
            Filter::Computed(Computed::True) => Some(true),
            Filter::Computed(Computed::False) => Some(false),
            Filter::Computed(Computed::Undefined) => None,
        }
    }
}

/// True if `dn` lies within `scope` of `base`
pub fn in_scope(dn: &str, base: &str, scope: Scope) -> bool {
    match scope {
        Scope::Base => dn == base,
        Scope::OneLevel => dn::parent(dn).map(|p| p == base).unwrap_or(base.is_empty()),
        Scope::Subtree => dn::is_descendant_or_self(dn, base),
    }
}

/// Values of `attr` and of every subtype of it present in the entry
fn values_of<'e>(
    entry: &'e Entry,
    types: &'e AttributeTypes,
    attr: &'e str,
) -> impl Iterator<Item = &'e String> + 'e {
    entry
        .attrs()
        .filter(move |(name, _)| types.is_subtype_or_self(name, attr))
        .flat_map(|(_, values)| values.iter())
}

/// Every word of the assertion sounds like some word of the value
fn approx_match(value: &str, assertion: &str) -> bool {
    let words: Vec<String> = normalize_value(value)
        .split(' ')
        .map(str::to_string)
        .collect();
    let codes: Vec<Option<String>> = words.iter().map(|w| phonetic(w)).collect();

    normalize_value(assertion).split(' ').all(|want| match phonetic(want) {
        Some(code) => codes.iter().any(|c| c.as_deref() == Some(code.as_str())),
        None => words.iter().any(|w| w == want),
    })
}

fn substring_match(value: &str, initial: Option<&str>, any: &[String], final_: Option<&str>) -> bool {
    let value = normalize_value(value);
    let mut rest = value.as_str();

    if let Some(init) = initial {
        let init = normalize_value(init);
        match rest.strip_prefix(init.as_str()) {
            Some(r) => rest = r,
            None => return false,
        }
    }

    let final_ = final_.map(normalize_value);
    if let Some(fin) = &final_ {
        match rest.strip_suffix(fin.as_str()) {
            Some(r) => rest = r,
            None => return false,
        }
    }

    for part in any {
        let part = normalize_value(part);
        match rest.find(part.as_str()) {
            Some(i) => rest = &rest[i + part.len()..],
            None => return false,
        }
    }
    true
}

/// Integer comparison when both sides are integers, case-ignore otherwise
fn compare_values(value: &str, assertion: &str) -> Ordering {
    match (value.trim().parse::<i64>(), assertion.trim().parse::<i64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => normalize_value(value).cmp(&normalize_value(assertion)),
    }
}

// =============================================================================
// Parser
// =============================================================================

struct Parser<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, msg: &str) -> LdbmError {
        LdbmError::FilterSyntax(format!("{} at offset {}", msg, self.pos))
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn expect(&mut self, c: u8) -> Result<()> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", c as char)))
        }
    }

    fn filter(&mut self) -> Result<Filter> {
        self.expect(b'(')?;
        let f = match self.peek() {
            Some(b'&') => {
                self.pos += 1;
                let list = self.filter_list()?;
                if list.is_empty() {
                    Filter::Computed(Computed::True)
                } else {
                    Filter::And(list)
                }
            }
            Some(b'|') => {
                self.pos += 1;
                let list = self.filter_list()?;
                if list.is_empty() {
                    Filter::Computed(Computed::False)
                } else {
                    Filter::Or(list)
                }
            }
            Some(b'!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.filter()?))
            }
            Some(_) => self.item()?,
            None => return Err(self.error("unexpected end of filter")),
        };
        self.expect(b')')?;
        Ok(f)
    }

    fn filter_list(&mut self) -> Result<Vec<Filter>> {
        let mut list = Vec::new();
        while self.peek() == Some(b'(') {
            list.push(self.filter()?);
        }
        Ok(list)
    }

    fn item(&mut self) -> Result<Filter> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'-' || c == b'.' || c == b';' {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(self.error("missing attribute description"));
        }
        let attr = String::from_utf8_lossy(&self.src[start..self.pos]).to_ascii_lowercase();

        let op = match (self.peek(), self.src.get(self.pos + 1).copied()) {
            (Some(b'~'), Some(b'=')) => {
                self.pos += 2;
                b'~'
            }
            (Some(b'>'), Some(b'=')) => {
                self.pos += 2;
                b'>'
            }
            (Some(b'<'), Some(b'=')) => {
                self.pos += 2;
                b'<'
            }
            (Some(b'='), _) => {
                self.pos += 1;
                b'='
            }
            (Some(b':'), _) => return Err(self.error("extensible match is not supported")),
            _ => return Err(self.error("expected a filter operator")),
        };

        let raw = self.raw_value()?;
        match op {
            b'~' => Ok(Filter::Approx(attr, unescape(raw, self)?)),
            b'>' => Ok(Filter::GreaterOrEqual(attr, unescape(raw, self)?)),
            b'<' => Ok(Filter::LessOrEqual(attr, unescape(raw, self)?)),
            _ if raw == b"*" => Ok(Filter::Present(attr)),
            _ if raw.contains(&b'*') => self.substring(attr, raw),
            _ => Ok(Filter::Equality(attr, unescape(raw, self)?)),
        }
    }

    /// Bytes up to the closing parenthesis, escapes left in place
    fn raw_value(&mut self) -> Result<&'a [u8]> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            match c {
                b')' => break,
                b'(' => return Err(self.error("unescaped '(' in value")),
                _ => self.pos += 1,
            }
        }
        Ok(&self.src[start..self.pos])
    }

    fn substring(&self, attr: String, raw: &[u8]) -> Result<Filter> {
        let parts: Vec<&[u8]> = raw.split(|c| *c == b'*').collect();
        let last = parts.len() - 1;

        let mut initial = None;
        let mut any = Vec::new();
        let mut final_ = None;
        for (i, part) in parts.iter().enumerate() {
            if part.is_empty() {
                continue;
            }
            let value = unescape(part, self)?;
            if i == 0 {
                initial = Some(value);
            } else if i == last {
                final_ = Some(value);
            } else {
                any.push(value);
            }
        }

        Ok(Filter::Substring {
            attr,
            initial,
            any,
            final_,
        })
    }
}

fn unescape(raw: &[u8], p: &Parser<'_>) -> Result<String> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'\\' {
            let hex = raw
                .get(i + 1..i + 3)
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| p.error("bad escape in value"))?;
            out.push(hex);
            i += 3;
        } else {
            out.push(raw[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| p.error("value is not UTF-8"))
}

// =============================================================================
// Display
// =============================================================================

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '*' => out.push_str("\\2a"),
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '\\' => out.push_str("\\5c"),
            '\0' => out.push_str("\\00"),
            _ => out.push(c),
        }
    }
    out
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::And(children) => {
                write!(f, "(&")?;
                for c in children {
                    write!(f, "{}", c)?;
                }
                write!(f, ")")
            }
            Filter::Or(children) => {
                write!(f, "(|")?;
                for c in children {
                    write!(f, "{}", c)?;
                }
                write!(f, ")")
            }
            Filter::Not(inner) => write!(f, "(!{})", inner),
            Filter::Present(a) => write!(f, "({}=*)", a),
            Filter::Equality(a, v) => write!(f, "({}={})", a, escape(v)),
            Filter::Approx(a, v) => write!(f, "({}~={})", a, escape(v)),
            Filter::Substring {
                attr,
                initial,
                any,
                final_,
            } => {
                write!(f, "({}=", attr)?;
                if let Some(i) = initial {
                    write!(f, "{}", escape(i))?;
                }
                write!(f, "*")?;
                for a in any {
                    write!(f, "{}*", escape(a))?;
                }
                if let Some(fin) = final_ {
                    write!(f, "{}", escape(fin))?;
                }
                write!(f, ")")
            }
            Filter::GreaterOrEqual(a, v) => write!(f, "({}>={})", a, escape(v)),
            Filter::LessOrEqual(a, v) => write!(f, "({}<={})", a, escape(v)),
            Filter::Scope(scope, base) => write!(f, "(@{:?}:{})", scope, base),
            Filter::Computed(Computed::True) => write!(f, "(&)"),
            Filter::Computed(Computed::False) => write!(f, "(|)"),
            Filter::Computed(Computed::Undefined) => write!(f, "(?undefined)"),
        }
    }
}

//! Index key functions
//!
//! Turn attribute values (when indexing) and assertion values (when
//! searching) into index keys. Every key is a one-byte tag followed by the
//! value fragment; the attribute is identified by the container the key is
//! stored in.
//!
//! | Tag | Index type  | Fragment                                 |
//! |-----|-------------|------------------------------------------|
//! | `+` | presence    | none                                     |
//! | `=` | equality    | case-ignore normalized value             |
//! | `~` | approximate | phonetic code of one word                |
//! | `*` | substring   | 3-character gram, `^`/`$` mark the ends  |

use super::IndexType;

pub const PRES_PREFIX: u8 = b'+';
pub const EQ_PREFIX: u8 = b'=';
pub const APPROX_PREFIX: u8 = b'~';
pub const SUB_PREFIX: u8 = b'*';

/// Substring gram length
pub const SUBLEN: usize = 3;

const SUB_START: char = '^';
const SUB_END: char = '$';

/// Case-ignore normal form: lower-cased, whitespace collapsed
pub fn normalize_value(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn tagged(tag: u8, fragment: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + fragment.len());
    key.push(tag);
    key.extend_from_slice(fragment.as_bytes());
    key
}

pub fn presence_key() -> Vec<u8> {
    vec![PRES_PREFIX]
}

pub fn equality_key(value: &str) -> Vec<u8> {
    tagged(EQ_PREFIX, &normalize_value(value))
}

/// One key per word that has a phonetic code
pub fn approx_keys(value: &str) -> Vec<Vec<u8>> {
    let mut keys: Vec<Vec<u8>> = value
        .split_whitespace()
        .filter_map(phonetic)
        .map(|code| tagged(APPROX_PREFIX, &code))
        .collect();
    keys.sort();
    keys.dedup();
    keys
}

/// Keys to index a stored value under: every gram of `^value$`
pub fn substring_index_keys(value: &str) -> Vec<Vec<u8>> {
    let mut padded = vec![SUB_START];
    padded.extend(normalize_value(value).chars());
    padded.push(SUB_END);
    grams(&padded)
}

/// Keys an entry must carry to match a substring assertion.
/// Components too short to form a gram contribute nothing.
pub fn substring_query_keys(
    initial: Option<&str>,
    any: &[String],
    final_: Option<&str>,
) -> Vec<Vec<u8>> {
    let mut keys = Vec::new();

    if let Some(init) = initial {
        let mut chars = vec![SUB_START];
        chars.extend(normalize_value(init).chars());
        keys.extend(grams(&chars));
    }
    for part in any {
        let chars: Vec<char> = normalize_value(part).chars().collect();
        keys.extend(grams(&chars));
    }
    if let Some(fin) = final_ {
        let mut chars: Vec<char> = normalize_value(fin).chars().collect();
        chars.push(SUB_END);
        keys.extend(grams(&chars));
    }

    keys.sort();
    keys.dedup();
    keys
}

fn grams(chars: &[char]) -> Vec<Vec<u8>> {
    if chars.len() < SUBLEN {
        return Vec::new();
    }
    chars
        .windows(SUBLEN)
        .map(|w| tagged(SUB_PREFIX, &w.iter().collect::<String>()))
        .collect()
}

/// All keys for indexing `values` under one index type
pub fn index_keys(ty: IndexType, values: &[String]) -> Vec<Vec<u8>> {
    let mut keys: Vec<Vec<u8>> = match ty {
        IndexType::Presence if values.is_empty() => Vec::new(),
        IndexType::Presence => vec![presence_key()],
        IndexType::Equality => values.iter().map(|v| equality_key(v)).collect(),
        IndexType::Approximate => values.iter().flat_map(|v| approx_keys(v)).collect(),
        IndexType::Substring => values
            .iter()
            .flat_map(|v| substring_index_keys(v))
            .collect(),
    };
    keys.sort();
    keys.dedup();
    keys
}

/// Soundex-style phonetic code of a word; `None` if it has no letters
pub fn phonetic(word: &str) -> Option<String> {
    fn digit(c: char) -> Option<char> {
        match c {
            'b' | 'f' | 'p' | 'v' => Some('1'),
            'c' | 'g' | 'j' | 'k' | 'q' | 's' | 'x' | 'z' => Some('2'),
            'd' | 't' => Some('3'),
            'l' => Some('4'),
            'm' | 'n' => Some('5'),
            'r' => Some('6'),
            _ => None,
        }
    }

    let mut letters = word
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_lowercase());

    let first = letters.next()?;
    let mut code = String::with_capacity(4);
    code.push(first.to_ascii_uppercase());

    let mut last = digit(first);
    for c in letters {
        let d = digit(c);
        if let Some(d) = d {
            if last != Some(d) {
                code.push(d);
                if code.len() == 4 {
                    break;
                }
            }
        }
        // 'h' and 'w' do not separate equal codes; vowels do
        if c != 'h' && c != 'w' {
            last = d;
        }
    }

    while code.len() < 4 {
        code.push('0');
    }
    Some(code)
}

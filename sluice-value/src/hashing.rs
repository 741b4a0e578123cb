//! Canonical JSON serialization and the 32-bit content hash derived from it.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::value::{Opaque, Value};

/// Serializes a `Value` to compact, sorted-key JSON text. Mappings are
/// already key-sorted (`Value::Map` is a `BTreeMap`); this just controls
/// whitespace and leaf rendering so two structurally equal trees always
/// produce byte-identical output.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Int(i) => out.push_str(&i.to_string()),
        Value::Float(v) => out.push_str(&v.to_string()),
        Value::String(s) => write_json_string(s, out),
        Value::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Map(map) => {
            out.push('{');
            for (i, (k, v)) in map.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json_string(k, out);
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        Value::Link(link) => write_json_string(&link.to_string(), out),
        Value::Opaque(opaque) => match opaque {
            Opaque::Encoded(bytes) => write_json_string(&hash32_bytes(bytes), out),
            Opaque::Identity(id) => write_json_string(&format!("id:{id:x}"), out),
            Opaque::Callable(f) => {
                let ptr = std::sync::Arc::as_ptr(f) as *const () as usize;
                write_json_string(&format!("id:{:x}", identity_fingerprint(&ptr)), out)
            }
        },
    }
}

fn write_json_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

/// `MurmurHash32` of `bytes`, rendered as lowercase hex with no zero
/// padding (matching the source system's `format(hash & 0xffffffff, 'x')`).
pub fn hash32_bytes(bytes: &[u8]) -> String {
    let mut cursor = std::io::Cursor::new(bytes);
    let h = murmur3::murmur3_32(&mut cursor, 0).unwrap_or(0);
    format!("{h:x}")
}

/// `MurmurHash32` of a value's canonical JSON form: the content hash used
/// for `Node::hash`.
pub fn hash32_value(value: &Value) -> String {
    hash32_bytes(canonical_json(value).as_bytes())
}

/// `MurmurHash32` of an arbitrary string (flow hash: sorted slugs joined by
/// `|`).
pub fn hash32_str(s: &str) -> String {
    hash32_bytes(s.as_bytes())
}

/// Identity-based fallback fingerprint for opaque values with no canonical
/// encoding (documented as volatile: it will differ across processes).
pub fn identity_fingerprint<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Explicit `_hash` override must match this shape before it is trusted.
pub fn is_valid_explicit_hash(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 8
        && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use std::collections::BTreeMap;

    #[test]
    fn hash_is_deterministic_under_key_order() {
        let mut a = BTreeMap::new();
        a.insert("a".to_string(), Value::String("a".into()));
        a.insert("b".to_string(), Value::String("b".into()));
        let mut b = BTreeMap::new();
        b.insert("b".to_string(), Value::String("b".into()));
        b.insert("a".to_string(), Value::String("a".into()));
        assert_eq!(
            hash32_value(&Value::Map(a)),
            hash32_value(&Value::Map(b))
        );
    }

    #[test]
    fn explicit_hash_validation() {
        assert!(is_valid_explicit_hash("6c9cc6b0"));
        assert!(is_valid_explicit_hash("a"));
        assert!(!is_valid_explicit_hash(""));
        assert!(!is_valid_explicit_hash("123456789"));
        assert!(!is_valid_explicit_hash("ABCDEF"));
    }
}

use std::{collections::BTreeMap, fmt::Display};

use crate::link::Link;

/// An untyped, JSON-like configuration value with [`Link`] leaves.
///
/// This is the tree that every stage of the rewrite pipeline operates on:
/// the raw configuration as the user wrote it, the base view after link
/// extraction, the node view after default injection, and so on are all
/// `Value` trees, distinguished only by which rewrite produced them.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    /// Ordered by key so two structurally identical mappings compare and
    /// hash the same regardless of the order keys were inserted in.
    Map(BTreeMap<String, Value>),
    Link(Link),
    /// A value that did not originate as plain JSON: an already-resolved
    /// object, a captured callable, or similar. Opaque values serialize via
    /// [`Opaque::canonical_bytes`] when possible, and otherwise only ever
    /// compare equal to themselves (treated as volatile for hashing).
    Opaque(Opaque),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// True for keys beginning with `#`: comments, dropped before any
    /// rewrite descends into them.
    pub fn is_comment_key(key: &str) -> bool {
        key.starts_with('#')
    }

    /// True for keys beginning with `_`: metadata, never forwarded to the
    /// underlying function unless it explicitly declares such a parameter.
    pub fn is_meta_key(key: &str) -> bool {
        key.starts_with('_')
    }

    /// Invokes a by-reference link's deferred thunk, or returns a plain
    /// value unchanged. Functions that declare a `&`-linked parameter call
    /// this themselves instead of being handed an already-resolved value.
    pub fn call_ref(&self) -> anyhow::Result<Value> {
        match self {
            Value::Opaque(Opaque::Callable(f)) => f(),
            other => Ok(other.clone()),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(a) => Value::List(a.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(o) => {
                Value::Map(o.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&serde_yaml::Value> for Value {
    fn from(v: &serde_yaml::Value) -> Self {
        match v {
            serde_yaml::Value::Null => Value::Null,
            serde_yaml::Value::Bool(b) => Value::Bool(*b),
            serde_yaml::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_yaml::Value::String(s) => Value::String(s.clone()),
            serde_yaml::Value::Sequence(a) => Value::List(a.iter().map(Value::from).collect()),
            serde_yaml::Value::Mapping(o) => Value::Map(
                o.iter()
                    .filter_map(|(k, v)| k.as_str().map(|k| (k.to_owned(), Value::from(v))))
                    .collect(),
            ),
            serde_yaml::Value::Tagged(t) => Value::from(&t.value),
        }
    }
}

/// A foreign (non-JSON-origin) value carried through the rewrite pipeline.
///
/// Three kinds exist: values with a deterministic canonical encoding (hashed
/// the same way every run), values with only identity (hashed from their
/// address, documented by the spec as a volatile, best-effort fallback), and
/// deferred thunks backing by-reference links.
#[derive(Clone)]
pub enum Opaque {
    /// Canonical bytes that hash deterministically across runs.
    Encoded(Vec<u8>),
    /// No canonical encoding is available; identity is used instead.
    Identity(u64),
    /// A by-reference (`&`) link's upstream value, deferred behind a
    /// closure so the receiving function decides if and when to call it
    /// rather than always being handed a materialized value.
    Callable(std::sync::Arc<dyn Fn() -> anyhow::Result<Value> + Send + Sync>),
}

impl Opaque {
    pub fn canonical_bytes(&self) -> Option<&[u8]> {
        match self {
            Opaque::Encoded(b) => Some(b),
            Opaque::Identity(_) => None,
            Opaque::Callable(_) => None,
        }
    }
}

impl std::fmt::Debug for Opaque {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Opaque::Encoded(b) => f.debug_tuple("Encoded").field(b).finish(),
            Opaque::Identity(id) => f.debug_tuple("Identity").field(id).finish(),
            Opaque::Callable(_) => write!(f, "Callable(..)"),
        }
    }
}

impl PartialEq for Opaque {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Opaque::Encoded(a), Opaque::Encoded(b)) => a == b,
            (Opaque::Identity(a), Opaque::Identity(b)) => a == b,
            _ => false,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "{s}"),
            Value::List(_) | Value::Map(_) => {
                write!(f, "{}", crate::hashing::canonical_json(self))
            }
            Value::Link(link) => write!(f, "{link}"),
            Value::Opaque(_) => write!(f, "<opaque>"),
        }
    }
}

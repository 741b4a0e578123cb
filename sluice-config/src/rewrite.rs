//! A generic depth-bounded tree rewriter. Every concrete view in this
//! crate (base, args, hash, dump, flow) is this same walk, configured with
//! a `discard` predicate (drop an entry before descending into it) and a
//! `leaf` transform (replace or elide a non-container value).
//!
//! A leaf transform returning `Ok(None)` elides the value entirely — the
//! equivalent of the source system's `StopRewrite` signal, without needing
//! an actual exception type.

use anyhow::Result;
use sluice_value::Value;
use std::collections::BTreeMap;

pub struct RewriteOptions<'a> {
    /// Entries at a depth greater than this are passed through unchanged.
    pub max_depth: usize,
    /// Called for each `(key, value)` pair of a mapping before descending;
    /// returning `true` drops the entry.
    pub discard: &'a dyn Fn(&str, &Value, usize) -> bool,
    /// Called for every non-container value; `Ok(None)` elides it from its
    /// parent container.
    pub leaf: &'a dyn Fn(&Value, usize) -> Result<Option<Value>>,
}

/// Rewrites `value`, starting at `depth` (normally 0).
pub fn rewrite(value: &Value, depth: usize, opts: &RewriteOptions) -> Result<Option<Value>> {
    match value {
        Value::Map(map) => {
            let mut out = BTreeMap::new();
            for (k, v) in map {
                if depth <= opts.max_depth && (opts.discard)(k, v, depth) {
                    continue;
                }
                if let Some(rewritten) = rewrite(v, depth + 1, opts)? {
                    out.insert(k.clone(), rewritten);
                }
            }
            Ok(Some(Value::Map(out)))
        }
        Value::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                if let Some(rewritten) = rewrite(item, depth + 1, opts)? {
                    out.push(rewritten);
                }
            }
            Ok(Some(Value::List(out)))
        }
        other => (opts.leaf)(other, depth),
    }
}

/// `true` for comment (`#`) and metadata (`_`) keys — the pattern shared by
/// almost every concrete view's `discard` predicate.
pub fn is_comment_or_meta(key: &str, _value: &Value, _depth: usize) -> bool {
    Value::is_comment_key(key) || Value::is_meta_key(key)
}

pub fn never_discard(_key: &str, _value: &Value, _depth: usize) -> bool {
    false
}

pub fn keep_leaf(value: &Value, _depth: usize) -> Result<Option<Value>> {
    Ok(Some(value.clone()))
}

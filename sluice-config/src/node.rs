//! A single node's resolved state after `setup_node` has run: every `*_conf`
//! view, its function, and its content hash.

use std::{collections::BTreeMap, sync::Arc};

use sluice_value::{
    hashing::{hash32_value, is_valid_explicit_hash},
    NodeFunc, Value,
};

#[derive(Clone, Debug)]
pub struct Node {
    pub scope: String,
    pub name: String,
    pub base_name: Option<String>,
    pub func: Option<Arc<NodeFunc>>,

    pub init_conf: Value,
    pub base_conf: Value,
    pub node_conf: Value,
    pub args_conf: Value,
    pub hash_conf: Value,
    pub hash: String,
    pub slug: String,

    pub cachable: bool,
    pub dumpable: bool,
    pub readonly: bool,
    pub requires: Vec<String>,
    pub tqdm: bool,
    pub run: bool,
    pub agent: Option<String>,
}

impl Node {
    /// Canonical id used as a graph node / map key: `scope.name`.
    pub fn id(&self) -> String {
        format!("{}.{}", self.scope, self.name)
    }

    /// `<base>.<hash>`, used for all on-disk artifact paths.
    pub fn compute_slug(base: &str, hash: &str) -> String {
        format!("{base}.{hash}")
    }

    pub fn meta_bool(conf: &Value, key: &str, default: bool) -> bool {
        conf.as_map()
            .and_then(|m| m.get(key))
            .and_then(|v| match v {
                Value::Bool(b) => Some(*b),
                _ => None,
            })
            .unwrap_or(default)
    }

    pub fn meta_str(conf: &Value, key: &str) -> Option<String> {
        conf.as_map()
            .and_then(|m| m.get(key))
            .and_then(|v| v.as_str())
            .map(str::to_owned)
    }

    pub fn meta_list_str(conf: &Value, key: &str) -> Vec<String> {
        conf.as_map()
            .and_then(|m| m.get(key))
            .map(|v| match v {
                Value::List(items) => items.iter().filter_map(|i| i.as_str().map(str::to_owned)).collect(),
                Value::String(s) => vec![s.clone()],
                _ => Vec::new(),
            })
            .unwrap_or_default()
    }

    /// Resolves the final hash: an explicit, validated `_hash` override, or
    /// `MurmurHash32(canonical_json({base: hash_conf}))`. The `base` wrapper
    /// matters: two identically-configured nodes under different bases must
    /// not collide, since the function name itself isn't otherwise hashed.
    pub fn resolve_hash(init_conf: &Value, base: &str, hash_conf: &Value) -> anyhow::Result<String> {
        if let Some(explicit) = Node::meta_str(init_conf, "_hash") {
            anyhow::ensure!(
                is_valid_explicit_hash(&explicit),
                "_hash {explicit:?} must match [a-z0-9]{{1,8}}"
            );
            Ok(explicit)
        } else {
            let mut wrapped = BTreeMap::new();
            wrapped.insert(base.to_string(), hash_conf.clone());
            Ok(hash32_value(&Value::Map(wrapped)))
        }
    }

    pub fn defaults_from(func: &Option<Arc<NodeFunc>>) -> BTreeMap<String, Value> {
        func.as_ref().map(|f| f.sig.defaults()).unwrap_or_default()
    }
}

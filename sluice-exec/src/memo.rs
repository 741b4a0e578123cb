//! Three-tier memoization: in-memory cache, on-disk dump, then invocation.
//! Generator results are never cached at any tier — re-evaluating a
//! generator node always restarts it from its originally bound arguments.

use std::{collections::HashMap, sync::Mutex};

use anyhow::{Context, Result};
use camino::Utf8Path;
use sluice_config::{views::dump_view, Node};
use sluice_value::{
    registry::{split_args, BoundArgs, FuncShape},
    Value,
};

use crate::coroutine::{drive_async, restart_generator};

/// Process-wide in-memory tier, keyed by slug.
#[derive(Default)]
pub struct MemoCache {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoCache {
    pub fn new() -> Self {
        MemoCache::default()
    }

    pub fn get(&self, slug: &str) -> Option<Value> {
        self.values.lock().unwrap().get(slug).cloned()
    }

    pub fn put(&self, slug: &str, value: Value) {
        self.values.lock().unwrap().insert(slug.to_string(), value);
    }
}

/// Resolves a node's value through the three memoization tiers, invoking
/// its function only when neither the in-memory cache nor an on-disk dump
/// already holds an answer.
pub fn resolve(
    cache: &MemoCache,
    node: &Node,
    data_file: &Utf8Path,
    conf_file: &Utf8Path,
    args: &[Value],
    kwargs: &std::collections::BTreeMap<String, Value>,
) -> Result<Value> {
    let is_generator = node.func.as_ref().map(|f| f.shape == FuncShape::Generator).unwrap_or(false);

    if !is_generator {
        if let Some(v) = cache.get(&node.slug) {
            return Ok(v);
        }
        if node.dumpable && data_file.exists() {
            let text = std::fs::read_to_string(data_file).with_context(|| format!("reading {data_file}"))?;
            let v: serde_json::Value = serde_json::from_str(&text)?;
            let v = Value::from(v);
            cache.put(&node.slug, v.clone());
            return Ok(v);
        }
    }

    let func = node
        .func
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("node {} has no resolved function", node.id()))?;
    let bound = split_args(&func.sig, args, kwargs);
    if !bound.missing.is_empty() {
        anyhow::bail!("{}: missing required arguments: {}", node.id(), bound.missing.join(", "));
    }

    let value = call_shaped(func, bound)?;

    // The conf file records the node's dump-view configuration for every
    // freshly computed node, independent of whether its result is itself
    // dumpable — it's what a sync peer or a later `run` uses to confirm
    // what configuration actually produced this slug's artifacts.
    let conf_json = serde_json::to_string_pretty(&to_json(&dump_view(&node.node_conf)))?;
    sluice_store::write_atomic_str(conf_file, &conf_json)?;

    if !is_generator {
        cache.put(&node.slug, value.clone());
        if node.dumpable {
            let json = serde_json::to_string_pretty(&to_json(&value))?;
            sluice_store::write_atomic_str(data_file, &json)?;
        }
    }
    Ok(value)
}

fn call_shaped(func: &sluice_value::NodeFunc, bound: BoundArgs) -> Result<Value> {
    match func.shape {
        FuncShape::Plain => func.invoke(bound),
        FuncShape::Generator => restart_generator(func, bound),
        FuncShape::Async => drive_async(func, bound),
    }
}

fn to_json(value: &Value) -> serde_json::Value {
    serde_json::from_str(&sluice_value::hashing::canonical_json(value)).unwrap_or(serde_json::Value::Null)
}

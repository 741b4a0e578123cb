//! A scope: a named, path-scoped container of nodes that can inherit from
//! another scope via `name@base`.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use regex::Regex;
use sluice_value::Value;

use crate::node::Node;

/// A node's configuration before `setup_node` has resolved it: its
/// base-name (from `name@base` syntax, defaulting to the node's own name)
/// and its raw mapping.
#[derive(Clone, Debug)]
pub struct RawNode {
    pub base_name: String,
    pub conf: Value,
}

#[derive(Debug)]
pub struct Scope {
    pub name: String,
    pub base: String,
    pub path: String,
    pub raw_nodes: BTreeMap<String, RawNode>,
    pub nodes: BTreeMap<String, Node>,
}

fn split_name(spelled: &str) -> (String, Option<String>) {
    match spelled.split_once('@') {
        Some((name, base)) => (name.to_string(), Some(base.to_string())),
        None => (spelled.to_string(), None),
    }
}

fn valid_ident(name: &str) -> bool {
    static PATTERN: once_cell::sync::Lazy<Regex> =
        once_cell::sync::Lazy::new(|| Regex::new(r"^\w+$").unwrap());
    PATTERN.is_match(name)
}

impl Scope {
    pub fn from_conf(spelled_name: &str, conf: &Value) -> Result<Scope> {
        let (name, base_from_at) = split_name(spelled_name);
        if !valid_ident(&name) {
            bail!("{spelled_name}: invalid scope name");
        }
        let map = conf.as_map().cloned().unwrap_or_default();

        let base = base_from_at
            .or_else(|| Node::meta_str(conf, "_base"))
            .unwrap_or_else(|| name.clone());
        let path = Node::meta_str(conf, "_path").unwrap_or_else(|| name.clone());

        let mut raw_nodes = BTreeMap::new();
        for (spelled_node, node_conf) in &map {
            if Value::is_comment_key(spelled_node) || Value::is_meta_key(spelled_node) {
                continue;
            }
            let (node_name, node_base_at) = split_name(spelled_node);
            if !valid_ident(&node_name) {
                bail!("{name}.{spelled_node}: invalid node name");
            }
            let node_map = node_conf.as_map().cloned().unwrap_or_default();
            let node_base = node_base_at
                .or_else(|| Node::meta_str(node_conf, "_base"))
                .unwrap_or_else(|| node_name.clone());
            raw_nodes.insert(
                node_name,
                RawNode {
                    base_name: node_base,
                    conf: Value::Map(node_map),
                },
            );
        }

        Ok(Scope {
            name,
            base,
            path,
            raw_nodes,
            nodes: BTreeMap::new(),
        })
    }

    /// Adopts every node of `base` not already defined in this scope,
    /// copying its raw configuration as a starting point for this scope's
    /// own (possibly overriding) definition.
    pub fn adopt_from_base(&mut self, base: &Scope) {
        for (name, raw) in &base.raw_nodes {
            self.raw_nodes.entry(name.clone()).or_insert_with(|| raw.clone());
        }
    }

    pub fn is_self_based(&self) -> bool {
        self.base == self.name
    }
}

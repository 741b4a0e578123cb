//! A flow: a named collection of scopes, assembled from one configuration
//! source and fully resolved (base chains, node bases, links, hashes) in
//! three passes mirroring `_setup_flow`: `merge_scope`, `merge_nodes`,
//! `setup_nodes`.

use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use anyhow::{anyhow, bail, Result};
use sluice_graph::{Direction, Graph, UntilDone};
use sluice_value::{
    link::{Link, TargetSpelling},
    FuncRegistry, NodeFunc, Value,
};

use crate::{
    node::Node,
    scope::Scope,
    views::{args_view, base_view, dump_view, hash_view, node_view, LinkResolver},
};

/// A node's merged init configuration, resolved function, and slug base
/// (the node's own name if it is a chain's root, or the base propagated
/// down from whichever node it inherits from).
type MergeResult = (Value, Option<Arc<NodeFunc>>, String);

#[derive(Debug)]
pub struct Flow {
    pub file: Option<String>,
    pub scopes: BTreeMap<String, Scope>,
    pub props: BTreeMap<String, Value>,
    pub readonly: bool,
    pub requires: Vec<String>,
    pub hash: Option<String>,
}

impl Flow {
    /// Parses scopes and nodes out of `conf`, merges in `overrides` (the
    /// three-wave `flow-global` / `scope.` / `scope.node.` props), then
    /// fully resolves base chains, links and hashes.
    pub fn from_conf(
        file: Option<String>,
        conf: &Value,
        overrides: &BTreeMap<String, Value>,
        registry: &FuncRegistry,
    ) -> Result<Flow> {
        let mut scopes = BTreeMap::new();
        if let Some(map) = conf.as_map() {
            for (spelled, scope_conf) in map {
                if Value::is_comment_key(spelled) || Value::is_meta_key(spelled) {
                    continue;
                }
                let scope = Scope::from_conf(spelled, scope_conf)?;
                scopes.insert(scope.name.clone(), scope);
            }
        }

        let readonly = Node::meta_bool(conf, "_readonly", false);
        let requires = Node::meta_list_str(conf, "_requires");
        let props = conf
            .as_map()
            .and_then(|m| m.get("_props"))
            .and_then(Value::as_map)
            .cloned()
            .unwrap_or_default();

        let mut flow = Flow {
            file,
            scopes,
            props,
            readonly,
            requires,
            hash: None,
        };
        flow.apply_props(overrides);
        flow.merge_scopes()?;
        flow.merge_nodes(registry)?;
        flow.setup_nodes()?;
        flow.compute_flow_hash();
        Ok(flow)
    }

    /// Applies dotted override props: `param` (every node of every scope),
    /// `scope.param` (every node of one scope) or `scope.node.param` (one
    /// node), each overriding the corresponding raw node configuration.
    fn apply_props(&mut self, overrides: &BTreeMap<String, Value>) {
        for (key, val) in overrides {
            let parts: Vec<&str> = key.splitn(3, '.').collect();
            match parts.as_slice() {
                [scope, node, param] => {
                    if let Some(s) = self.scopes.get_mut(*scope) {
                        if let Some(raw) = s.raw_nodes.get_mut(*node) {
                            set_top_level(&mut raw.conf, param, val.clone());
                        }
                    }
                }
                [scope, param] => {
                    if let Some(s) = self.scopes.get_mut(*scope) {
                        for raw in s.raw_nodes.values_mut() {
                            set_top_level(&mut raw.conf, param, val.clone());
                        }
                    }
                }
                [param] => {
                    for s in self.scopes.values_mut() {
                        for raw in s.raw_nodes.values_mut() {
                            set_top_level(&mut raw.conf, param, val.clone());
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// Pass 1: resolves every scope's `@base` chain, adopting unshadowed
    /// base-scope nodes.
    fn merge_scopes(&mut self) -> Result<()> {
        let mut resolved = HashSet::new();
        let names: Vec<String> = self.scopes.keys().cloned().collect();
        for name in names {
            self.merge_scope(&name, &mut resolved, &mut Vec::new())?;
        }
        Ok(())
    }

    fn merge_scope(&mut self, name: &str, resolved: &mut HashSet<String>, stack: &mut Vec<String>) -> Result<()> {
        if resolved.contains(name) {
            return Ok(());
        }
        if let Some(pos) = stack.iter().position(|n| n == name) {
            bail!("{}", render_scope_cycle(&stack[pos..], name));
        }
        let base_name = self
            .scopes
            .get(name)
            .map(|s| s.base.clone())
            .ok_or_else(|| anyhow!("scope not found: {name}"))?;
        if base_name != name {
            if !self.scopes.contains_key(&base_name) {
                bail!("scope not found: {base_name}");
            }
            stack.push(name.to_string());
            self.merge_scope(&base_name, resolved, stack)?;
            stack.pop();

            let base_raw_nodes = self.scopes[&base_name].raw_nodes.clone();
            let scope = self.scopes.get_mut(name).unwrap();
            for (node_name, raw) in base_raw_nodes {
                scope.raw_nodes.entry(node_name).or_insert(raw);
            }
        }
        resolved.insert(name.to_string());
        Ok(())
    }

    /// Pass 2: resolves every node's `_base` to a sibling node, a base-scope
    /// node, or a registered function, merging missing top-level keys down
    /// the chain and recording the resolved function.
    fn merge_nodes(&mut self, registry: &FuncRegistry) -> Result<()> {
        let mut cache: BTreeMap<(String, String), MergeResult> = BTreeMap::new();
        let scope_names: Vec<String> = self.scopes.keys().cloned().collect();
        for scope_name in &scope_names {
            let node_names: Vec<String> = self.scopes[scope_name].raw_nodes.keys().cloned().collect();
            for node_name in node_names {
                self.merge_node(scope_name, &node_name, registry, &mut cache, &mut Vec::new())?;
            }
        }
        for ((scope_name, node_name), (init_conf, func, base_name)) in cache {
            let scope = self.scopes.get_mut(&scope_name).unwrap();
            scope.nodes.insert(
                node_name.clone(),
                Node {
                    scope: scope_name.clone(),
                    name: node_name,
                    base_name: Some(base_name),
                    func,
                    init_conf,
                    base_conf: Value::Null,
                    node_conf: Value::Null,
                    args_conf: Value::Null,
                    hash_conf: Value::Null,
                    hash: String::new(),
                    slug: String::new(),
                    cachable: true,
                    dumpable: false,
                    readonly: false,
                    requires: Vec::new(),
                    tqdm: false,
                    run: false,
                    agent: None,
                },
            );
        }
        Ok(())
    }

    /// Resolves one node's merged configuration, function and slug base.
    /// The slug base propagates transitively down an inheritance chain: a
    /// node that inherits from an actual sibling/base-scope node adopts
    /// that node's own (already-resolved) base rather than its own name, so
    /// `pretrained_model@model` and `model` end up sharing a slug family.
    /// Only a node whose base names a registered function, not another
    /// node, is a chain's root — and its base is its own bare name.
    fn merge_node(
        &self,
        scope_name: &str,
        node_name: &str,
        registry: &FuncRegistry,
        cache: &mut BTreeMap<(String, String), MergeResult>,
        stack: &mut Vec<String>,
    ) -> Result<MergeResult> {
        let key = (scope_name.to_string(), node_name.to_string());
        if let Some(v) = cache.get(&key) {
            return Ok(v.clone());
        }
        let id = format!("{scope_name}.{node_name}");
        if stack.iter().any(|n| n == &id) {
            bail!("{}", render_cycle(stack, &id));
        }
        let scope = self.scopes.get(scope_name).ok_or_else(|| anyhow!("scope not found: {scope_name}"))?;
        let raw = scope
            .raw_nodes
            .get(node_name)
            .ok_or_else(|| anyhow!("node not found: {id}"))?;
        let base_name = raw.base_name.clone();
        let own_conf = raw.conf.clone();

        let inherited = if base_name == node_name {
            // default base: only a same-named node in the base scope counts.
            (!scope.is_self_based())
                .then(|| self.scopes.get(&scope.base))
                .flatten()
                .filter(|base_scope| base_scope.raw_nodes.contains_key(node_name))
                .map(|_| scope.base.clone())
        } else if scope.raw_nodes.contains_key(&base_name) {
            Some(scope_name.to_string())
        } else if !scope.is_self_based()
            && self
                .scopes
                .get(&scope.base)
                .map(|b| b.raw_nodes.contains_key(&base_name))
                .unwrap_or(false)
        {
            Some(scope.base.clone())
        } else {
            None
        };

        let result = if let Some(base_scope_name) = inherited {
            stack.push(id.clone());
            let (base_init, base_func, base_base_name) = self.merge_node(&base_scope_name, &base_name, registry, cache, stack)?;
            stack.pop();
            (merge_maps(&base_init, &own_conf), base_func, base_base_name)
        } else {
            (own_conf, registry.find(&base_name), node_name.to_string())
        };
        cache.insert(key, result.clone());
        Ok(result)
    }

    /// Pass 3: extracts links from every node's merged configuration,
    /// verifies the resulting link graph is acyclic, then resolves
    /// node/args/hash views and slugs in dependency order.
    fn setup_nodes(&mut self) -> Result<()> {
        let ids: Vec<String> = self
            .scopes
            .values()
            .flat_map(|s| s.nodes.keys().map(|n| format!("{}.{n}", s.name)))
            .collect();

        let mut base_views: BTreeMap<String, Value> = BTreeMap::new();
        let mut links_by_node: BTreeMap<String, Vec<Link>> = BTreeMap::new();
        let mut graph = Graph::new();
        for id in &ids {
            graph.add_node(id.clone());
        }
        for id in &ids {
            let init_conf = self.node_init_conf(id)?;
            let base = base_view(&init_conf, id, self)?;
            let mut found = Vec::new();
            collect_links(&base, &mut found);
            for link in &found {
                graph.add_link(link.clone())?;
            }
            links_by_node.insert(id.clone(), found);
            base_views.insert(id.clone(), base);
        }

        for id in &ids {
            graph.tree(Some(id), Direction::Forward, &UntilDone::Never, false)?;
        }

        let mut slugs: BTreeMap<String, String> = BTreeMap::new();
        let mut pending: Vec<String> = ids.clone();
        while !pending.is_empty() {
            let mut progressed = Vec::new();
            let mut still_pending = Vec::new();
            for id in pending {
                let deps_ready = links_by_node[&id].iter().all(|l| slugs.contains_key(&l.source) || l.source == id);
                if deps_ready {
                    progressed.push(id);
                } else {
                    still_pending.push(id);
                }
            }
            if progressed.is_empty() {
                bail!("unresolved link dependencies: {still_pending:?}");
            }
            for id in progressed {
                let slug = self.finish_node(&id, &base_views[&id], &slugs)?;
                slugs.insert(id, slug);
            }
            pending = still_pending;
        }
        Ok(())
    }

    fn node_init_conf(&self, id: &str) -> Result<Value> {
        let (scope, name) = split_id(id);
        Ok(self
            .scopes
            .get(scope)
            .and_then(|s| s.nodes.get(name))
            .ok_or_else(|| anyhow!("node not found: {id}"))?
            .init_conf
            .clone())
    }

    fn finish_node(&mut self, id: &str, base_conf: &Value, slugs: &BTreeMap<String, String>) -> Result<String> {
        let (scope_name, node_name) = split_id(id);
        let (defaults, base_name) = {
            let node = self.scopes[scope_name].nodes.get(node_name).unwrap();
            (Node::defaults_from(&node.func), node.base_name.clone().unwrap_or_else(|| node_name.to_string()))
        };
        let node_conf = node_view(base_conf, &defaults);
        let args_conf = args_view(&node_conf, &defaults);
        let resolve_slug = |source: &str| slugs.get(source).cloned();
        let hash_conf = hash_view(&node_conf, id, &resolve_slug);
        let init_conf = self.node_init_conf(id)?;
        let hash = Node::resolve_hash(&init_conf, &base_name, &hash_conf)?;
        let slug = Node::compute_slug(&base_name, &hash);

        let node = self.scopes.get_mut(scope_name).unwrap().nodes.get_mut(node_name).unwrap();
        node.base_conf = base_conf.clone();
        node.node_conf = node_conf;
        node.args_conf = args_conf;
        node.hash_conf = hash_conf;
        node.hash = hash;
        node.slug = slug.clone();
        node.cachable = Node::meta_bool(&node.node_conf, "_cachable", true);
        node.dumpable = Node::meta_bool(&node.node_conf, "_dumpable", false);
        node.readonly = Node::meta_bool(&node.node_conf, "_readonly", false);
        node.requires = Node::meta_list_str(&node.node_conf, "_requires");
        node.tqdm = Node::meta_bool(&node.node_conf, "_tqdm", false);
        node.run = Node::meta_bool(&node.node_conf, "_run", false);
        node.agent = Node::meta_str(&node.node_conf, "_agent");
        let _ = dump_view(&node.node_conf); // validated eagerly; persisted lazily by the storage layer
        Ok(slug)
    }

    /// Looks up a fully resolved node by its canonical `scope.name` id.
    pub fn node(&self, id: &str) -> Option<&Node> {
        let (scope, name) = split_id(id);
        self.scopes.get(scope)?.nodes.get(name)
    }

    /// Every link found in a node's base configuration: its direct upstream
    /// dependencies.
    pub fn upstream_links(&self, id: &str) -> Vec<Link> {
        let mut out = Vec::new();
        if let Some(node) = self.node(id) {
            collect_links(&node.base_conf, &mut out);
        }
        out
    }

    /// Every node id across every scope, in scope-then-name order.
    pub fn node_ids(&self) -> Vec<String> {
        self.scopes
            .values()
            .flat_map(|s| s.nodes.keys().map(move |n| format!("{}.{n}", s.name)))
            .collect()
    }

    fn compute_flow_hash(&mut self) {
        let mut slugs: Vec<&str> = self
            .scopes
            .values()
            .flat_map(|s| s.nodes.values().map(|n| n.slug.as_str()))
            .collect();
        slugs.sort_unstable();
        self.hash = Some(sluice_value::hashing::hash32_str(&slugs.join("|")));
    }
}

impl LinkResolver for Flow {
    fn resolve(&self, spelling: &TargetSpelling, self_id: &str) -> Result<String> {
        match spelling {
            TargetSpelling::SelfRef => Ok(self_id.to_string()),
            TargetSpelling::Name(name) => {
                let scope = self_id.split('.').next().unwrap_or_default();
                self.ensure_node(scope, name)?;
                Ok(format!("{scope}.{name}"))
            }
            TargetSpelling::ScopeName { scope, name } => {
                self.ensure_node(scope, name)?;
                Ok(format!("{scope}.{name}"))
            }
            TargetSpelling::FileScopeName { file, scope, name } => Ok(format!("{file}#{scope}.{name}")),
            TargetSpelling::FileSlug { file, slug } => Ok(format!("{file}#{slug}")),
        }
    }
}

impl Flow {
    fn ensure_node(&self, scope: &str, name: &str) -> Result<()> {
        let s = self.scopes.get(scope).ok_or_else(|| anyhow!("scope not found: {scope}"))?;
        if !s.raw_nodes.contains_key(name) {
            bail!("node not found: {scope}.{name}");
        }
        Ok(())
    }
}

fn split_id(id: &str) -> (&str, &str) {
    id.split_once('.').unwrap_or((id, ""))
}

fn set_top_level(conf: &mut Value, key: &str, value: Value) {
    if let Some(map) = conf.as_map_mut() {
        map.insert(key.to_string(), value);
    }
}

fn merge_maps(base: &Value, own: &Value) -> Value {
    let mut map = base.as_map().cloned().unwrap_or_default();
    if let Some(own_map) = own.as_map() {
        for (k, v) in own_map {
            map.insert(k.clone(), v.clone());
        }
    }
    Value::Map(map)
}

fn collect_links(value: &Value, out: &mut Vec<Link>) {
    match value {
        Value::Link(link) => out.push(link.clone()),
        Value::Map(map) => map.values().for_each(|v| collect_links(v, out)),
        Value::List(items) => items.iter().for_each(|v| collect_links(v, out)),
        _ => {}
    }
}

/// Renders `Loop detected: [a] @ b @ [a]`, matching `sluice_graph`'s format
/// for node-base-chain cycles (`cycle_trail`'s own rendering of link-graph
/// cycles uses the same capitalized wording).
fn render_cycle(stack: &[String], closing: &str) -> String {
    format!("Loop detected: {}", render_trail(stack, closing))
}

/// Renders a scope `@base`-chain cycle. Lowercase, unlike node/link-graph
/// cycles: `scope.py`'s `_merge_scope` raises `'loop detected: ...'`, a
/// distinct message from `node.py`'s capitalized `RecursionError`.
fn render_scope_cycle(stack: &[String], closing: &str) -> String {
    format!("loop detected: {}", render_trail(stack, closing))
}

fn render_trail(stack: &[String], closing: &str) -> String {
    let mut full: Vec<&str> = stack.iter().map(String::as_str).collect();
    full.push(closing);
    full.iter()
        .map(|n| if *n == closing { format!("[{n}]") } else { n.to_string() })
        .collect::<Vec<_>>()
        .join(" @ ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_value::registry::{Param, ParamKind, Signature};

    fn json(s: &str) -> Value {
        Value::from(serde_json::from_str::<serde_json::Value>(s).unwrap())
    }

    fn registry_with_identity() -> FuncRegistry {
        let mut reg = FuncRegistry::new();
        reg.register(sluice_value::NodeFunc::new(
            "test.function.identity",
            Signature::new(vec![Param {
                name: "value".into(),
                kind: ParamKind::PositionalOrKeyword,
                default: None,
            }]),
            sluice_value::FuncShape::Plain,
            |args| Ok(args.positional.get("value").cloned().unwrap_or(Value::Null)),
        ));
        reg
    }

    #[test]
    fn resolves_function_base_and_hashes() {
        let conf = json(r#"{"scope": {"foo@test.function.identity": {"value": "hi"}}}"#);
        let flow = Flow::from_conf(None, &conf, &BTreeMap::new(), &registry_with_identity()).unwrap();
        let node = &flow.scopes["scope"].nodes["foo"];
        assert!(node.func.is_some());
        assert!(!node.hash.is_empty());
        // `foo`'s base resolves to a function, not another node, so it is
        // its own chain root: the slug base is its bare name, unqualified
        // by scope.
        assert!(node.slug.starts_with("foo."));
    }

    #[test]
    fn by_value_link_resolves_to_producer_slug() {
        let conf = json(
            r#"{"scope": {
                "src@test.function.identity": {"value": "hi"},
                "dst@test.function.identity": {"value": "@src"}
            }}"#,
        );
        let flow = Flow::from_conf(None, &conf, &BTreeMap::new(), &registry_with_identity()).unwrap();
        let dst = &flow.scopes["scope"].nodes["dst"];
        match dst.base_conf.as_map().unwrap().get("value").unwrap() {
            Value::Link(link) => assert_eq!(link.source, "scope.src"),
            other => panic!("expected link, got {other:?}"),
        }
    }

    #[test]
    fn scope_base_cycle_is_rejected() {
        let conf = json(r#"{"a@b": {}, "b@a": {}}"#);
        let err = Flow::from_conf(None, &conf, &BTreeMap::new(), &registry_with_identity()).unwrap_err();
        assert!(err.to_string().starts_with("loop detected:"));
    }

    #[test]
    fn node_base_chain_cycle_is_rejected_with_capital_message() {
        let conf = json(r#"{"scope": {"a@b": {}, "b@a": {}}}"#);
        let err = Flow::from_conf(None, &conf, &BTreeMap::new(), &registry_with_identity()).unwrap_err();
        assert!(err.to_string().starts_with("Loop detected:"));
    }

    #[test]
    fn inherited_node_shares_base_base_slug_family() {
        let conf = json(
            r#"{"scope": {
                "model@test.function.identity": {"value": "hi"},
                "pretrained_model@model": {}
            }}"#,
        );
        let flow = Flow::from_conf(None, &conf, &BTreeMap::new(), &registry_with_identity()).unwrap();
        let model = &flow.scopes["scope"].nodes["model"];
        let pretrained = &flow.scopes["scope"].nodes["pretrained_model"];
        assert_eq!(model.base_name.as_deref(), Some("model"));
        assert_eq!(pretrained.base_name, model.base_name);
        let (model_base, _) = model.slug.rsplit_once('.').unwrap();
        let (pretrained_base, _) = pretrained.slug.rsplit_once('.').unwrap();
        assert_eq!(model_base, pretrained_base);
    }

    /// `def foo(a, b, *c, d, e=None, **f)`, matching `test.function.foo` in
    /// the original test suite: `a`/`b` positional-or-keyword, `d` a
    /// required keyword-only, `e` keyword-only defaulting to `None`.
    fn registry_with_test_function_foo() -> FuncRegistry {
        let mut reg = FuncRegistry::new();
        reg.register(sluice_value::NodeFunc::new(
            "test.function.foo",
            Signature::new(vec![
                Param { name: "a".into(), kind: ParamKind::PositionalOrKeyword, default: None },
                Param { name: "b".into(), kind: ParamKind::PositionalOrKeyword, default: None },
                Param { name: "c".into(), kind: ParamKind::VarPositional, default: None },
                Param { name: "d".into(), kind: ParamKind::KeywordOnly, default: None },
                Param { name: "e".into(), kind: ParamKind::KeywordOnly, default: Some(Value::Null) },
                Param { name: "f".into(), kind: ParamKind::VarKeyword, default: None },
            ]),
            sluice_value::FuncShape::Plain,
            |args| {
                Ok(Value::List(vec![
                    args.positional.get("a").cloned().unwrap_or(Value::Null),
                    args.positional.get("b").cloned().unwrap_or(Value::Null),
                    args.keyword.get("d").cloned().unwrap_or(Value::Null),
                    args.keyword.get("e").cloned().unwrap_or(Value::Null),
                ]))
            },
        ));
        reg
    }

    #[test]
    fn hash_matches_known_value_for_scenario_seven_conf() {
        let conf = json(r#"{"test": {"foo@test.function.foo": {"a": "a", "b": "b", "d": "d"}}}"#);
        let flow = Flow::from_conf(None, &conf, &BTreeMap::new(), &registry_with_test_function_foo()).unwrap();
        let node = &flow.scopes["test"].nodes["foo"];
        assert_eq!(node.hash, "6c9cc6b0");
    }
}

//! An insertion-ordered dependency graph with cycle-safe traversal.
//!
//! Nodes are identified by an opaque [`NodeId`] (a canonical `scope.name`
//! or `file#scope.name` string); the graph itself knows nothing about what
//! a node represents beyond its id, so this crate stays free of the
//! config/rewrite semantics built on top of it.

use std::collections::HashMap;

use anyhow::{bail, Result};
use sluice_value::Link;

pub type NodeId = String;

/// Which way a traversal walks the graph: `Forward` follows a node's
/// outgoing edges (from an upstream producer towards its consumers);
/// `Backward` follows incoming edges (from a consumer back to the
/// producers it depends on, i.e. "upstream").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
    Both,
}

/// Either a fixed yes/no, or a per-node predicate, controlling when
/// `tree()` stops expanding further from a node.
pub enum UntilDone<'a> {
    Never,
    Always,
    Predicate(&'a dyn Fn(&NodeId) -> bool),
}

impl UntilDone<'_> {
    fn is_done(&self, node: &NodeId) -> bool {
        match self {
            UntilDone::Never => false,
            UntilDone::Always => true,
            UntilDone::Predicate(f) => f(node),
        }
    }
}

#[derive(Debug, Default)]
pub struct Graph {
    nodes: Vec<NodeId>,
    known: std::collections::HashSet<NodeId>,
    outgoing: HashMap<NodeId, Vec<Link>>,
    incoming: HashMap<NodeId, Vec<Link>>,
}

impl Graph {
    pub fn new() -> Self {
        Graph::default()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.iter()
    }

    pub fn add_node(&mut self, node: impl Into<NodeId>) {
        let node = node.into();
        if self.known.insert(node.clone()) {
            self.nodes.push(node);
        }
    }

    /// Registers a link as an edge `source -> target`. Fails immediately on
    /// a self-reference, mirroring the invariant that `source != target`.
    pub fn add_link(&mut self, link: Link) -> Result<()> {
        if link.source == link.target {
            bail!("Link failed: {link} (self reference)");
        }
        self.add_node(link.source.clone());
        self.add_node(link.target.clone());
        self.outgoing
            .entry(link.source.clone())
            .or_default()
            .push(link.clone());
        self.incoming.entry(link.target.clone()).or_default().push(link);
        Ok(())
    }

    pub fn outgoing(&self, node: &NodeId) -> &[Link] {
        self.outgoing.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn incoming(&self, node: &NodeId) -> &[Link] {
        self.incoming.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Walks the graph from `node` (or from every root with no incoming
    /// edges, if `node` is `None`) in `direction`, stopping expansion at
    /// nodes for which `until_done` holds, optionally skipping internal
    /// (metadata, `_`-prefixed param) edges. Returns the visited nodes and
    /// traversed links in visitation order.
    ///
    /// A cycle fails with a breadcrumb trail of the form
    /// `Loop detected: [a] @ b @ [a]`, bracketing the node where the cycle
    /// closes.
    pub fn tree(
        &self,
        node: Option<&NodeId>,
        direction: Direction,
        until_done: &UntilDone,
        omit_internal: bool,
    ) -> Result<(Vec<NodeId>, Vec<Link>)> {
        let mut nodes = Vec::new();
        let mut seen_nodes = std::collections::HashSet::new();
        let mut links = Vec::new();
        let mut seen_links = std::collections::HashSet::new();

        match node {
            Some(n) => {
                self.walk(
                    n,
                    direction,
                    until_done,
                    omit_internal,
                    &mut nodes,
                    &mut seen_nodes,
                    &mut links,
                    &mut seen_links,
                    &mut vec![],
                )?;
            }
            None => {
                if matches!(direction, Direction::Forward | Direction::Both) {
                    for n in &self.nodes {
                        if !self.incoming.contains_key(n) {
                            self.walk(
                                n,
                                direction,
                                until_done,
                                omit_internal,
                                &mut nodes,
                                &mut seen_nodes,
                                &mut links,
                                &mut seen_links,
                                &mut vec![],
                            )?;
                        }
                    }
                }
            }
        }

        Ok((nodes, links))
    }

    #[allow(clippy::too_many_arguments)]
    fn walk(
        &self,
        node: &NodeId,
        direction: Direction,
        until_done: &UntilDone,
        omit_internal: bool,
        nodes: &mut Vec<NodeId>,
        seen_nodes: &mut std::collections::HashSet<NodeId>,
        links: &mut Vec<Link>,
        seen_links: &mut std::collections::HashSet<(NodeId, NodeId, String)>,
        branch: &mut Vec<NodeId>,
    ) -> Result<()> {
        if seen_nodes.insert(node.clone()) {
            nodes.push(node.clone());
        }
        if until_done.is_done(node) {
            return Ok(());
        }

        if matches!(direction, Direction::Forward | Direction::Both) {
            branch.push(node.clone());
            for link in self.outgoing(node) {
                if omit_internal && link.is_internal() {
                    continue;
                }
                let target = &link.target;
                if let Some(pos) = branch.iter().position(|n| n == target) {
                    bail!("{}", cycle_trail(&branch[pos..], target));
                }
                let key = (link.source.clone(), link.target.clone(), link.param.clone());
                if seen_links.insert(key) {
                    links.push(link.clone());
                }
                self.walk(
                    target, Direction::Forward, until_done, omit_internal, nodes, seen_nodes,
                    links, seen_links, branch,
                )?;
            }
            branch.pop();
        }

        if matches!(direction, Direction::Backward | Direction::Both) {
            branch.push(node.clone());
            for link in self.incoming(node) {
                if omit_internal && link.is_internal() {
                    continue;
                }
                let source = &link.source;
                if let Some(pos) = branch.iter().position(|n| n == source) {
                    bail!("{}", cycle_trail(&branch[pos..], source));
                }
                let key = (link.source.clone(), link.target.clone(), link.param.clone());
                if seen_links.insert(key) {
                    links.push(link.clone());
                }
                self.walk(
                    source, Direction::Backward, until_done, omit_internal, nodes, seen_nodes,
                    links, seen_links, branch,
                )?;
            }
            branch.pop();
        }

        Ok(())
    }
}

/// Renders `Loop detected: [a] @ b @ [a]`, bracketing the node that closes
/// the cycle (the one already present in `branch` as `closing`).
fn cycle_trail(branch: &[NodeId], closing: &NodeId) -> String {
    let mut full: Vec<&NodeId> = branch.iter().collect();
    full.push(closing);
    let rendered: Vec<String> = full
        .iter()
        .map(|n| if *n == closing { format!("[{n}]") } else { n.to_string() })
        .collect();
    format!("Loop detected: {}", rendered.join(" @ "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_value::{LinkKind, LinkSuffix, TargetSpelling};

    fn link(source: &str, target: &str, param: &str) -> Link {
        Link {
            source: source.to_string(),
            target: target.to_string(),
            param: param.to_string(),
            suffix: LinkSuffix::None,
            kind: LinkKind::ByValue,
            spelling: TargetSpelling::Name(source.to_string()),
        }
    }

    #[test]
    fn acyclic_graph_traverses_forward() {
        let mut g = Graph::new();
        g.add_link(link("test.a", "test.b", "x")).unwrap();
        let (nodes, _) = g
            .tree(Some(&"test.a".to_string()), Direction::Forward, &UntilDone::Never, false)
            .unwrap();
        assert!(nodes.contains(&"test.a".to_string()));
        assert!(nodes.contains(&"test.b".to_string()));
    }

    #[test]
    fn cycle_detection_message_format() {
        let mut g = Graph::new();
        // test.a has param a = "@b" (b produces a's value: source=b, target=a)
        g.add_link(link("test.b", "test.a", "a")).unwrap();
        g.add_link(link("test.a", "test.b", "b")).unwrap();
        let err = g
            .tree(Some(&"test.a".to_string()), Direction::Forward, &UntilDone::Never, false)
            .unwrap_err();
        assert_eq!(err.to_string(), "Loop detected: [test.a] @ test.b @ [test.a]");
    }

    #[test]
    fn self_link_rejected() {
        let mut g = Graph::new();
        let err = g.add_link(link("test.a", "test.a", "x")).unwrap_err();
        assert!(err.to_string().contains("self reference"));
    }

    #[test]
    fn omit_internal_skips_underscore_params() {
        let mut g = Graph::new();
        g.add_link(link("test.a", "test.b", "_meta")).unwrap();
        let (_, links) = g
            .tree(Some(&"test.a".to_string()), Direction::Forward, &UntilDone::Never, true)
            .unwrap();
        assert!(links.is_empty());
    }
}

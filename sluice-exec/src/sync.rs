//! Push/pull between `data_dir` and `sync_dir`, and the job-file protocol
//! an agent polls for delegated nodes.

use std::{collections::HashSet, thread, time::Duration};

use anyhow::{anyhow, Context, Result};
use camino::Utf8Path;
use sluice_config::{views::dump_view, Flow};
use sluice_store::{copy_file, copy_tree, write_atomic_str, NodePaths};
use tracing::{debug, info};

const PULL_RETRY_INTERVAL: Duration = Duration::from_secs(1);
const PULL_MAX_ATTEMPTS: usize = 30;

pub struct SyncContext<'a> {
    pub data_dir: &'a Utf8Path,
    pub sync_dir: &'a Utf8Path,
}

impl<'a> SyncContext<'a> {
    fn paths(&self, flow: &Flow, root: &Utf8Path, id: &str) -> Result<NodePaths> {
        let node = flow.node(id).ok_or_else(|| anyhow!("node not found: {id}"))?;
        let scope_path = flow.scopes.get(&node.scope).map(|s| s.path.clone()).unwrap_or_default();
        Ok(NodePaths::new(root, scope_path.as_str(), node.slug.clone()))
    }

    /// Walks `target`'s upstream dependencies, pushing every node that
    /// isn't already synced, stopping at any that is (its ancestors are
    /// assumed already pushed).
    pub fn push(&self, flow: &Flow, target: &str) -> Result<()> {
        for id in self.upstream_until(flow, target, |id| self.is_synced(flow, id))? {
            self.push_one(flow, &id)?;
        }
        Ok(())
    }

    fn push_one(&self, flow: &Flow, id: &str) -> Result<()> {
        let src = self.paths(flow, self.data_dir, id)?;
        let dst = self.paths(flow, self.sync_dir, id)?;
        if src.work_dir().exists() {
            copy_tree(src.work_dir(), dst.work_dir())?;
        }
        if src.conf_file().exists() {
            copy_file(src.conf_file(), dst.conf_file())?;
        }
        if src.data_file().exists() {
            copy_file(src.data_file(), dst.data_file())?;
        }
        // The manifest is written last: its presence is what `is_synced`
        // checks, so a reader never observes a partially pushed node.
        write_atomic_str(dst.sync_file(), &src.slug().to_string())?;
        debug!(node = id, "pushed");
        Ok(())
    }

    /// Walks `target`'s upstream dependencies, pulling every node not yet
    /// `(dumpable && dumped) || synced`, retrying briefly on files that
    /// haven't appeared yet (an agent may still be writing them).
    pub fn pull(&self, flow: &Flow, target: &str) -> Result<()> {
        for id in self.upstream_until(flow, target, |id| self.is_dumped_or_synced(flow, id))? {
            self.pull_one(flow, &id)?;
        }
        Ok(())
    }

    fn pull_one(&self, flow: &Flow, id: &str) -> Result<()> {
        let src = self.paths(flow, self.sync_dir, id)?;
        let dst = self.paths(flow, self.data_dir, id)?;
        for attempt in 0..PULL_MAX_ATTEMPTS {
            if src.sync_file().exists() {
                break;
            }
            if attempt + 1 == PULL_MAX_ATTEMPTS {
                return Err(anyhow!("timed out waiting for {id} to appear in sync_dir"));
            }
            thread::sleep(PULL_RETRY_INTERVAL);
        }
        if src.work_dir().exists() {
            copy_tree(src.work_dir(), dst.work_dir())?;
        }
        if src.conf_file().exists() {
            copy_file(src.conf_file(), dst.conf_file())?;
        }
        if src.data_file().exists() {
            copy_file(src.data_file(), dst.data_file())?;
        }
        debug!(node = id, "pulled");
        Ok(())
    }

    fn is_synced(&self, flow: &Flow, id: &str) -> bool {
        self.paths(flow, self.sync_dir, id).map(|p| p.sync_file().exists()).unwrap_or(false)
    }

    fn is_dumped_or_synced(&self, flow: &Flow, id: &str) -> bool {
        let dumped = flow
            .node(id)
            .map(|n| n.dumpable && self.paths(flow, self.data_dir, id).map(|p| p.data_file().exists()).unwrap_or(false))
            .unwrap_or(false);
        dumped || self.is_synced(flow, id)
    }

    fn upstream_until(&self, flow: &Flow, target: &str, done: impl Fn(&str) -> bool) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut stack = vec![target.to_string()];
        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            order.push(id.clone());
            if done(&id) {
                continue;
            }
            for link in flow.upstream_links(&id) {
                stack.push(link.source);
            }
        }
        order.reverse();
        Ok(order)
    }
}

/// Writes a job file (`.jobs/<slug>.<agent>.json`) containing the node's
/// dump-view configuration, for an agent to later pull and act on.
pub fn write_job(data_dir: &Utf8Path, flow: &Flow, node_id: &str, agent: &str) -> Result<camino::Utf8PathBuf> {
    let node = flow.node(node_id).ok_or_else(|| anyhow!("node not found: {node_id}"))?;
    let scope_path = flow.scopes.get(&node.scope).map(|s| s.path.clone()).unwrap_or_default();
    let paths = NodePaths::new(data_dir, scope_path.as_str(), node.slug.clone());
    let job_path = paths.job_file(agent);
    let conf = dump_view(&node.node_conf);
    let json = serde_json::to_string_pretty(&value_to_json(&conf)).with_context(|| format!("encoding job for {node_id}"))?;
    write_atomic_str(&job_path, &json)?;
    info!(node = node_id, agent, "wrote job file");
    Ok(job_path)
}

/// Marks a job file as handled by renaming it with a `.done` suffix, the
/// terminal state of the agent polling loop.
pub fn complete_job(job_path: &Utf8Path) -> Result<()> {
    let done = job_path.with_extension("json.done");
    std::fs::rename(job_path, &done)?;
    Ok(())
}

fn value_to_json(value: &sluice_value::Value) -> serde_json::Value {
    serde_json::from_str(&sluice_value::hashing::canonical_json(value)).unwrap_or(serde_json::Value::Null)
}

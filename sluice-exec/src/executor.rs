//! The parallel dependency executor: `call()` resolves a target node by
//! walking its upstream frontier, submitting ready nodes to a work-stealing
//! pool as their dependencies complete.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{anyhow, bail, Result};
use camino::{Utf8Path, Utf8PathBuf};
use sluice_config::Flow;
use sluice_store::{KeyedLocks, NodePaths};
use sluice_value::{LinkKind, Opaque, Value};
use tracing::{debug, instrument};

use crate::memo::{self, MemoCache};

pub struct Executor {
    data_dir: Utf8PathBuf,
    cache: MemoCache,
    locks: KeyedLocks,
    pool: rayon::ThreadPool,
}

impl Executor {
    pub fn new(data_dir: impl Into<Utf8PathBuf>, threads: Option<usize>) -> Result<Self> {
        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(n) = threads {
            builder = builder.num_threads(n);
        }
        Ok(Executor {
            data_dir: data_dir.into(),
            cache: MemoCache::new(),
            locks: KeyedLocks::new(),
            pool: builder.build()?,
        })
    }

    /// Resolves `target`'s value, executing every unresolved upstream
    /// dependency first. Fails immediately if `target` is agent-delegated:
    /// callers must go through the push/pull protocol for those instead.
    #[instrument(skip(self, flow))]
    pub fn call(&self, flow: &Flow, target: &str) -> Result<Value> {
        let node = flow.node(target).ok_or_else(|| anyhow!("node not found: {target}"))?;
        if let Some(agent) = &node.agent {
            bail!("{target} is delegated to agent {agent:?}; use push/pull instead of call()");
        }

        let frontier = self.frontier(flow, target);
        let mut pending: HashMap<String, AtomicUsize> = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for id in &frontier {
            let deps: Vec<String> = flow
                .upstream_links(id)
                .into_iter()
                .map(|l| l.source)
                .filter(|s| frontier.contains(s))
                .collect();
            pending.insert(id.clone(), AtomicUsize::new(deps.len()));
            for dep in deps {
                dependents.entry(dep).or_default().push(id.clone());
            }
        }

        let results: Mutex<HashMap<String, Value>> = Mutex::new(HashMap::new());
        let errors: Mutex<Vec<anyhow::Error>> = Mutex::new(Vec::new());
        let ctx = TaskCtx {
            executor: self,
            flow,
            pending: &pending,
            dependents: &dependents,
            results: &results,
            errors: &errors,
        };

        self.pool.scope(|scope| {
            for id in &frontier {
                if ctx.pending[id].load(Ordering::SeqCst) == 0 {
                    spawn_task(scope, &ctx, id.clone());
                }
            }
        });

        if let Some(e) = errors.into_inner().unwrap().pop() {
            return Err(e);
        }
        results
            .into_inner()
            .unwrap()
            .remove(target)
            .ok_or_else(|| anyhow!("{target} never resolved (disconnected frontier?)"))
    }

    /// Every id `target` transitively depends on, plus `target` itself.
    fn frontier(&self, flow: &Flow, target: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut stack = vec![target.to_string()];
        let mut order = Vec::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            order.push(id.clone());
            for link in flow.upstream_links(&id) {
                stack.push(link.source);
            }
        }
        order
    }

    fn paths(&self, flow: &Flow, id: &str) -> NodePaths {
        let node = flow.node(id).expect("node resolved during frontier walk");
        let scope_path = flow.scopes.get(&node.scope).map(|s| s.path.clone()).unwrap_or_default();
        NodePaths::new(&self.data_dir, scope_path.as_str(), node.slug.clone())
    }
}

struct TaskCtx<'a> {
    executor: &'a Executor,
    flow: &'a Flow,
    pending: &'a HashMap<String, AtomicUsize>,
    dependents: &'a HashMap<String, Vec<String>>,
    results: &'a Mutex<HashMap<String, Value>>,
    errors: &'a Mutex<Vec<anyhow::Error>>,
}

fn spawn_task<'s>(scope: &rayon::Scope<'s>, ctx: &'s TaskCtx<'s>, id: String) {
    scope.spawn(move |scope| {
        if !ctx.errors.lock().unwrap().is_empty() {
            return;
        }
        match run_one(ctx, &id) {
            Ok(value) => {
                ctx.results.lock().unwrap().insert(id.clone(), value);
                if let Some(deps) = ctx.dependents.get(&id) {
                    for dep in deps {
                        if ctx.pending[dep].fetch_sub(1, Ordering::SeqCst) == 1 {
                            spawn_task(scope, ctx, dep.clone());
                        }
                    }
                }
            }
            Err(e) => ctx.errors.lock().unwrap().push(e),
        }
    });
}

fn run_one(ctx: &TaskCtx, id: &str) -> Result<Value> {
    let node = ctx.flow.node(id).ok_or_else(|| anyhow!("node not found: {id}"))?;
    let paths = ctx.executor.paths(ctx.flow, id);

    let lock_key = ctx.executor.locks.get(&node.slug);
    let _guard = lock_key.lock();
    let _file_lock = sluice_store::try_lock(paths.lock_file())?;
    if _file_lock.is_none() {
        debug!(node = id, "waiting on held file lock");
    }

    let resolved: HashMap<String, Value> = {
        let results = ctx.results.lock().unwrap();
        ctx.flow
            .upstream_links(id)
            .into_iter()
            .filter_map(|l| results.get(&l.source).map(|v| (l.source.clone(), v.clone())))
            .collect()
    };
    let kwargs = build_kwargs(&node.node_conf, &resolved);

    memo::resolve(&ctx.executor.cache, node, &paths.data_file(), &paths.conf_file(), &[], &kwargs)
}

fn build_kwargs(node_conf: &Value, resolved: &HashMap<String, Value>) -> BTreeMap<String, Value> {
    let substituted = substitute_links(node_conf, resolved);
    substituted
        .as_map()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter(|(k, _)| !Value::is_meta_key(k) && !Value::is_comment_key(k))
        .collect()
}

/// Replaces every link leaf with its producer's resolved value. Suffix
/// expressions (`:expr`, `/.`) are a black-box concern left to the
/// evaluator this crate doesn't implement.
///
/// A by-value (`@`) link substitutes its source's plain value. A
/// by-reference (`&`) link substitutes a deferred thunk instead: the
/// receiving function decides whether and when to materialize it via
/// `Value::call_ref`, rather than always being handed the value eagerly.
fn substitute_links(value: &Value, resolved: &HashMap<String, Value>) -> Value {
    match value {
        Value::Link(link) => {
            let upstream = resolved.get(&link.source).cloned().unwrap_or(Value::Null);
            match link.kind {
                LinkKind::ByValue => upstream,
                LinkKind::ByRef => Value::Opaque(Opaque::Callable(Arc::new(move || Ok(upstream.clone())))),
            }
        }
        Value::Map(m) => Value::Map(m.iter().map(|(k, v)| (k.clone(), substitute_links(v, resolved))).collect()),
        Value::List(items) => Value::List(items.iter().map(|v| substitute_links(v, resolved)).collect()),
        other => other.clone(),
    }
}

#[allow(dead_code)]
fn work_dir(root: &Utf8Path, scope_path: &str, slug: &str) -> Utf8PathBuf {
    NodePaths::new(root, scope_path, slug).work_dir()
}

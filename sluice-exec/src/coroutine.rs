//! Stand-ins for the source system's generator and async-coroutine
//! protocols, neither of which Rust has a native equivalent for.
//!
//! A generator-like [`NodeFunc`] is simply re-invoked with its originally
//! bound arguments every time its node is re-evaluated — the memoization
//! layer never caches a generator's result, so this re-invocation already
//! gives "restart from scratch" semantics without a literal resumable
//! iterator object. An async-like `NodeFunc` still exposes a synchronous
//! `invoke`, but is driven through the shared background runtime so it runs
//! under a live Tokio context the way a real `.await`-using function would
//! need.

use anyhow::Result;
use once_cell::sync::Lazy;
use sluice_value::{registry::BoundArgs, NodeFunc, Value};
use tokio::runtime::Runtime;

/// A single-threaded background runtime shared by every async-shaped node
/// function in the process, mirroring the source system's dedicated
/// event-loop thread.
static BACKGROUND_RUNTIME: Lazy<Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("failed to start background async runtime")
});

pub fn restart_generator(func: &NodeFunc, bound: BoundArgs) -> Result<Value> {
    func.invoke(bound)
}

pub fn drive_async(func: &NodeFunc, bound: BoundArgs) -> Result<Value> {
    BACKGROUND_RUNTIME.block_on(async { func.invoke(bound) })
}

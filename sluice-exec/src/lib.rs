//! The parallel dependency executor, its memoization tiers, coroutine/async
//! equivalents, the sync/agent protocol, and the prune operation.

pub mod coroutine;
pub mod executor;
pub mod memo;
pub mod prune;
pub mod sync;

pub use executor::Executor;
pub use memo::MemoCache;
pub use sync::SyncContext;

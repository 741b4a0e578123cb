//! The storage layer: on-disk paths, atomic writes, file copying and
//! advisory locking, shared by the executor and the sync/agent protocol.

pub mod atomic;
pub mod copy;
pub mod locks;
pub mod paths;

pub use atomic::{write_atomic, write_atomic_str};
pub use copy::{copy_file, copy_tree};
pub use locks::{try_lock, FileLock, KeyedLocks};
pub use paths::{flow_snapshot_path, NodePaths};

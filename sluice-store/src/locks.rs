//! Advisory locking: one file lock per slug for cross-process coordination,
//! and an in-process `KeyedLocks` map for nodes with no durable work
//! directory to lock against.

use std::{
    collections::HashMap,
    fs::{File, OpenOptions},
    sync::{Arc, Weak},
};

use camino::Utf8Path;
use nix::fcntl::{flock, FlockArg};
use parking_lot::{Mutex, ReentrantMutex};
use std::os::unix::io::AsRawFd;

/// A held advisory file lock; releases (`flock(UN)`) when dropped.
pub struct FileLock {
    _file: File,
}

/// Attempts to acquire a non-blocking exclusive lock on `path` (the file is
/// created if absent). Returns `Ok(None)` if another process already holds
/// it — the caller logs a "waiting" message and retries or, for readonly
/// callers, treats this as informational only.
pub fn try_lock(path: impl AsRef<Utf8Path>) -> anyhow::Result<Option<FileLock>> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).write(true).open(path)?;
    match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(()) => Ok(Some(FileLock { _file: file })),
        Err(nix::errno::Errno::EWOULDBLOCK) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = flock(self._file.as_raw_fd(), FlockArg::Unlock);
    }
}

/// A process-wide map from slug to a re-entrant mutex, held via weak
/// references so entries are pruned once nothing holds the lock anymore.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Weak<ReentrantMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        KeyedLocks::default()
    }

    /// Returns the re-entrant mutex for `key`, creating it if this is the
    /// first live reference.
    pub fn get(&self, key: &str) -> Arc<ReentrantMutex<()>> {
        let mut locks = self.locks.lock();
        if let Some(existing) = locks.get(key).and_then(Weak::upgrade) {
            return existing;
        }
        let fresh = Arc::new(ReentrantMutex::new(()));
        locks.insert(key.to_string(), Arc::downgrade(&fresh));
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyed_locks_reuses_live_entry() {
        let locks = KeyedLocks::new();
        let a = locks.get("test.a");
        let b = locks.get("test.a");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn keyed_locks_drops_dead_entry() {
        let locks = KeyedLocks::new();
        {
            let _a = locks.get("test.a");
        }
        let b = locks.get("test.a");
        assert_eq!(Arc::strong_count(&b), 1);
    }
}

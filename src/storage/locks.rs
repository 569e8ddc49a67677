//! Path locks
//!
//! Serializes mutations of the same logical path. Lock entries are created on
//! demand and pruned once no task holds or waits on them.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Table of per-path async locks
#[derive(Debug, Default)]
pub struct PathLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock key for a user's logical path
    pub fn key(owner: &str, logical: &str) -> String {
        format!("{owner}:{logical}")
    }

    /// Acquires a single path lock
    pub async fn lock(&self, key: String) -> PathGuard<'_> {
        self.lock_many(vec![key]).await
    }

    /// Acquires several path locks in a fixed order so two tasks locking the
    /// same pair can never deadlock.
    pub async fn lock_many(&self, mut keys: Vec<String>) -> PathGuard<'_> {
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            let lock = Arc::clone(
                self.locks
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(())))
                    .value(),
            );
            guards.push(lock.lock_owned().await);
        }

        PathGuard {
            table: self,
            keys,
            guards,
        }
    }

    /// Number of live lock entries
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Held path locks, released on drop
#[derive(Debug)]
pub struct PathGuard<'a> {
    table: &'a PathLocks,
    keys: Vec<String>,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        self.guards.clear();
        for key in &self.keys {
            self.table
                .locks
                .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
        }
    }
}

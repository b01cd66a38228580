//! Per-upload mutual exclusion.
//!
//! Each key maps to its own `RwLock`, so contention never spans unrelated
//! uploads. Entries are held weakly and swept once the table grows, which
//! keeps the map bounded by the number of uploads with in-flight requests.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

const SWEEP_THRESHOLD: usize = 1024;

#[derive(Clone, Default)]
pub struct KeyedLocks {
    table: Arc<Mutex<HashMap<String, Weak<RwLock<()>>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclusive access to `key`.
    pub async fn write(&self, key: &str) -> OwnedRwLockWriteGuard<()> {
        self.entry(key).write_owned().await
    }

    /// Shared access to `key`; excludes writers but not other readers.
    pub async fn read(&self, key: &str) -> OwnedRwLockReadGuard<()> {
        self.entry(key).read_owned().await
    }

    fn entry(&self, key: &str) -> Arc<RwLock<()>> {
        let mut table = self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(lock) = table.get(key).and_then(Weak::upgrade) {
            return lock;
        }

        if table.len() >= SWEEP_THRESHOLD {
            table.retain(|_, weak| weak.strong_count() > 0);
        }

        let lock = Arc::new(RwLock::new(()));
        table.insert(key.to_string(), Arc::downgrade(&lock));
        lock
    }

    #[cfg(test)]
    fn live_entries(&self) -> usize {
        let table = self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        table.values().filter(|weak| weak.strong_count() > 0).count()
    }
}

//! Named read/write locks shared by every execution of an engine.
//!
//! A lock is created on first use of its key and removed again once no guard or waiter
//! refers to it. Guards are owned, so they can be held across the evaluation of a code
//! block and are released when dropped.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::debug;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("Timed out waiting for lock {0}")]
    Timeout(String),
}

type LockMap = DashMap<String, Arc<RwLock<()>>>;

/// Holds a key's lock and prunes the key's entry when released.
pub struct KeyedGuard<G> {
    guard: Option<G>,
    key: String,
    locks: Arc<LockMap>,
}

impl<G> Drop for KeyedGuard<G> {
    fn drop(&mut self) {
        self.guard.take();
        prune(&self.locks, &self.key);
    }
}

pub type ReadGuard = KeyedGuard<OwnedRwLockReadGuard<()>>;
pub type WriteGuard = KeyedGuard<OwnedRwLockWriteGuard<()>>;

// Only the map itself holds the lock: no guard and no task waiting on it.
fn prune(locks: &LockMap, key: &str) {
    locks.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
}

#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: Arc<LockMap>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, key: &str) -> Arc<RwLock<()>> {
        self.locks.entry(key.to_string()).or_default().clone()
    }

    fn guard<G>(&self, key: &str, guard: G) -> KeyedGuard<G> {
        KeyedGuard {
            guard: Some(guard),
            key: key.to_string(),
            locks: self.locks.clone(),
        }
    }

    pub async fn read(&self, key: &str, timeout: Duration) -> Result<ReadGuard, LockError> {
        let lock = self.lock_for(key);
        debug!(key, "acquiring read lock");
        match tokio::time::timeout(timeout, lock.read_owned()).await {
            Ok(guard) => Ok(self.guard(key, guard)),
            Err(_) => {
                prune(&self.locks, key);
                Err(LockError::Timeout(key.to_string()))
            }
        }
    }

    pub async fn write(&self, key: &str, timeout: Duration) -> Result<WriteGuard, LockError> {
        let lock = self.lock_for(key);
        debug!(key, "acquiring write lock");
        match tokio::time::timeout(timeout, lock.write_owned()).await {
            Ok(guard) => Ok(self.guard(key, guard)),
            Err(_) => {
                prune(&self.locks, key);
                Err(LockError::Timeout(key.to_string()))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

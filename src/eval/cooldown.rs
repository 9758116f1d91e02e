//! Per-tag cooldowns and the clock they are measured against.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Source of "now". Injected so cooldown checks are deterministic under test.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let millis = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn set(&self, to: DateTime<Utc>) {
        self.millis.store(to.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let millis = self.millis.load(Ordering::SeqCst);
        DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Identity a cooldown is tracked under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CooldownKey {
    pub is_cc: bool,
    pub guild_id: String,
    pub tag_name: String,
    pub user_id: String,
}

#[async_trait]
pub trait CooldownManager: Send + Sync {
    /// The earliest instant `key` may run again given a cooldown of `cooldown`.
    async fn get(&self, key: &CooldownKey, cooldown: Duration) -> DateTime<Utc>;

    /// Records that `key` has just run.
    async fn set(&self, key: &CooldownKey);
}

pub struct InMemoryCooldownManager {
    clock: Arc<dyn Clock>,
    last_run: DashMap<CooldownKey, DateTime<Utc>>,
}

impl InMemoryCooldownManager {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            last_run: DashMap::new(),
        }
    }
}

#[async_trait]
impl CooldownManager for InMemoryCooldownManager {
    async fn get(&self, key: &CooldownKey, cooldown: Duration) -> DateTime<Utc> {
        let Some(last) = self.last_run.get(key).map(|entry| *entry) else {
            return DateTime::<Utc>::MIN_UTC;
        };
        match chrono::Duration::from_std(cooldown) {
            Ok(cooldown) => last
                .checked_add_signed(cooldown)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            Err(_) => DateTime::<Utc>::MAX_UTC,
        }
    }

    async fn set(&self, key: &CooldownKey) {
        self.last_run.insert(key.clone(), self.clock.now());
    }
}

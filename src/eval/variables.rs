//! # Tag Variables
//!
//! Variables are addressed by a [`VariableKey`]: a storage scope derived from the name's
//! prefix plus the bare name.
//!
//! | Prefix | Scope |
//! |---|---|
//! | `_` | shared by every tag or command in the guild |
//! | `@` | bound to the invoking user |
//! | `*` | global |
//! | `~` | temporary, never leaves the execution |
//! | none | local to the tag, or to the custom command within its guild |
//!
//! [`VariableCache`] sits between an execution and its [`VariableStore`]. Reads are
//! fetched once and then served from memory; writes only mark the entry dirty and are
//! flushed together by [`VariableCache::persist`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{OnceCell, RwLock};
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VariableScope {
    Tag { tag_name: String },
    CustomCommand { guild_id: String, tag_name: String },
    Guild { guild_id: String },
    Author { user_id: String },
    Global,
    Temporary,
}

impl VariableScope {
    fn prefix(&self) -> &'static str {
        match self {
            VariableScope::Tag { .. } | VariableScope::CustomCommand { .. } => "",
            VariableScope::Guild { .. } => "_",
            VariableScope::Author { .. } => "@",
            VariableScope::Global => "*",
            VariableScope::Temporary => "~",
        }
    }
}

/// Who a local (unprefixed) or user-scoped variable belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VariableOwner {
    pub is_cc: bool,
    pub tag_name: String,
    pub guild_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariableKey {
    pub scope: VariableScope,
    pub name: String,
}

impl VariableKey {
    pub fn new(scope: VariableScope, name: impl Into<String>) -> Self {
        Self {
            scope,
            name: name.into(),
        }
    }

    /// Maps a name as written in a script to its storage key.
    pub fn resolve(raw: &str, owner: &VariableOwner) -> Self {
        let mut chars = raw.chars();
        let scope = match chars.next() {
            Some('_') => VariableScope::Guild {
                guild_id: owner.guild_id.clone(),
            },
            Some('@') => VariableScope::Author {
                user_id: owner.user_id.clone(),
            },
            Some('*') => VariableScope::Global,
            Some('~') => VariableScope::Temporary,
            _ => return Self::new(local_scope(owner), raw),
        };
        Self::new(scope, chars.as_str())
    }

    pub fn is_temporary(&self) -> bool {
        self.scope == VariableScope::Temporary
    }

    /// Identity of the key including its owning tag, guild or user.
    pub fn qualified_id(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn local_scope(owner: &VariableOwner) -> VariableScope {
    if owner.is_cc {
        VariableScope::CustomCommand {
            guild_id: owner.guild_id.clone(),
            tag_name: owner.tag_name.clone(),
        }
    } else {
        VariableScope::Tag {
            tag_name: owner.tag_name.clone(),
        }
    }
}

impl std::fmt::Display for VariableKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.scope.prefix(), self.name)
    }
}

/// Renders a stored value the way `{get}` prints it: strings verbatim, everything else as JSON.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// One write in a persisted batch. `value: None` deletes the variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableEntry {
    pub scope: VariableScope,
    pub name: String,
    pub value: Option<Value>,
}

/// Persistence backend for tag variables.
#[async_trait]
pub trait VariableStore: Send + Sync {
    /// Loads a single variable. `Ok(None)` means the variable has never been set.
    async fn get(&self, scope: &VariableScope, name: &str) -> Result<Option<Value>, StoreError>;

    /// Applies a batch of writes. Called at most once per root execution.
    async fn set(&self, entries: Vec<VariableEntry>) -> Result<(), StoreError>;
}

/// In-memory [`VariableStore`] with call counters, used by tests and the CLI.
#[derive(Debug, Default)]
pub struct InMemoryVariableStore {
    values: DashMap<VariableKey, Value>,
    fetches: AtomicUsize,
    batches: AtomicUsize,
    latency: Option<Duration>,
}

impl InMemoryVariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every fetch, so that overlapping reads can be observed.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    pub fn insert(&self, key: VariableKey, value: Value) {
        self.values.insert(key, value);
    }

    pub fn value(&self, key: &VariableKey) -> Option<Value> {
        self.values.get(key).map(|value| value.clone())
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn batch_count(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VariableStore for InMemoryVariableStore {
    async fn get(&self, scope: &VariableScope, name: &str) -> Result<Option<Value>, StoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let key = VariableKey::new(scope.clone(), name);
        Ok(self.value(&key))
    }

    async fn set(&self, entries: Vec<VariableEntry>) -> Result<(), StoreError> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        for entry in entries {
            let key = VariableKey::new(entry.scope, entry.name);
            match entry.value {
                Some(value) => {
                    self.values.insert(key, value);
                }
                None => {
                    self.values.remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct EntryState {
    current: Option<Value>,
    dirty: bool,
}

type Slot = Arc<OnceCell<RwLock<EntryState>>>;

/// Read-through, write-behind cache over a [`VariableStore`].
///
/// Each key owns a [`OnceCell`], so concurrent first reads of the same key share one
/// in-flight fetch. Map guards are never held across an `.await`.
pub struct VariableCache {
    store: Arc<dyn VariableStore>,
    entries: DashMap<VariableKey, Slot>,
}

impl std::fmt::Debug for VariableCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl VariableCache {
    pub fn new(store: Arc<dyn VariableStore>) -> Self {
        Self {
            store,
            entries: DashMap::new(),
        }
    }

    fn slot(&self, key: &VariableKey) -> Slot {
        self.entries.entry(key.clone()).or_default().clone()
    }

    pub async fn get(&self, key: &VariableKey) -> Result<Option<Value>, StoreError> {
        let slot = self.slot(key);
        let state = if key.is_temporary() {
            slot.get_or_init(|| async { RwLock::new(EntryState::default()) })
                .await
        } else {
            slot.get_or_try_init(|| async {
                debug!(variable = %key, "fetching variable");
                let current = self.store.get(&key.scope, &key.name).await?;
                Ok::<_, StoreError>(RwLock::new(EntryState {
                    current,
                    dirty: false,
                }))
            })
            .await?
        };
        let value = state.read().await.current.clone();
        Ok(value)
    }

    /// Replaces the in-memory value and marks it for the next [`persist`](Self::persist).
    /// `None` deletes the variable.
    pub async fn set(&self, key: &VariableKey, value: Option<Value>) {
        let slot = self.slot(key);
        let state = slot
            .get_or_init(|| async { RwLock::new(EntryState::default()) })
            .await;
        let mut state = state.write().await;
        state.current = value;
        state.dirty = true;
    }

    /// Drops the in-memory state of `keys`; the next read fetches again and any
    /// unpersisted write to them is discarded.
    pub fn reset(&self, keys: &[VariableKey]) {
        for key in keys {
            self.entries.remove(key);
        }
    }

    /// Writes every dirty, non-temporary entry to the store in a single batch and
    /// returns how many entries were written.
    pub async fn persist(&self) -> Result<usize, StoreError> {
        let slots: Vec<(VariableKey, Slot)> = self
            .entries
            .iter()
            .filter(|entry| !entry.key().is_temporary())
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut batch = Vec::new();
        let mut written = Vec::new();
        for (key, slot) in slots {
            let Some(state) = slot.get() else { continue };
            let state = state.read().await;
            if state.dirty {
                batch.push(VariableEntry {
                    scope: key.scope.clone(),
                    name: key.name.clone(),
                    value: state.current.clone(),
                });
                written.push(slot.clone());
            }
        }

        if batch.is_empty() {
            return Ok(0);
        }

        let count = batch.len();
        self.store.set(batch).await?;
        for slot in written {
            if let Some(state) = slot.get() {
                state.write().await.dirty = false;
            }
        }
        debug!(count, "persisted variables");
        Ok(count)
    }

    /// Snapshot of every loaded entry.
    pub async fn list(&self) -> HashMap<VariableKey, Option<Value>> {
        let slots: Vec<(VariableKey, Slot)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut result = HashMap::with_capacity(slots.len());
        for (key, slot) in slots {
            if let Some(state) = slot.get() {
                result.insert(key, state.read().await.current.clone());
            }
        }
        result
    }
}

//! # Host Collaborators
//!
//! The engine talks to the chat platform and to storage only through the traits in
//! this module. Expected failure modes (not found, missing permissions) are values,
//! never panics: lookups return `Ok(None)` for "not found" and [`ServiceError`] for
//! everything the platform refused.
//!
//! [`Services`] bundles one implementation of each contract and is cloned into every
//! execution. [`Services::in_memory`] wires the in-memory implementations used by the
//! tests and the CLI.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::eval::cooldown::{Clock, CooldownManager, InMemoryCooldownManager, SystemClock};
use crate::eval::side_effects::{Attachment, Embed, MentionPolicy};
use crate::eval::variables::{InMemoryVariableStore, VariableStore};
use crate::lock::KeyedLocks;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Missing permission: {0}")]
    Permission(String),
    #[error("Platform error: {0}")]
    Platform(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Guild {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub guild_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub channel_id: String,
    pub author: User,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Read access to platform entities.
#[async_trait]
pub trait EntityResolver: Send + Sync {
    async fn channel(&self, channel_id: &str) -> Result<Option<Channel>, ServiceError>;
    async fn guild(&self, guild_id: &str) -> Result<Option<Guild>, ServiceError>;
    async fn message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> Result<Option<Message>, ServiceError>;
    /// Resolves a user as a member of `guild_id`; `None` when they are not a member.
    async fn member(&self, guild_id: &str, user_id: &str) -> Result<Option<User>, ServiceError>;
}

/// Everything the platform needs to post the final output of an execution.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OutputRequest {
    pub channel_id: String,
    pub content: String,
    pub reply_to: Option<String>,
    pub embeds: Vec<Embed>,
    pub file: Option<Attachment>,
    pub reactions: Vec<String>,
    pub mentions: MentionPolicy,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutputSender: Send + Sync {
    /// Posts a message and returns its id, or `None` if nothing was posted.
    async fn send(&self, request: OutputRequest) -> Result<Option<String>, ServiceError>;

    /// Posts an out-of-band notice, e.g. a cooldown warning.
    async fn notify(&self, channel_id: &str, text: &str) -> Result<(), ServiceError>;
}

#[derive(Clone)]
pub struct Services {
    pub variables: Arc<dyn VariableStore>,
    pub cooldowns: Arc<dyn CooldownManager>,
    pub clock: Arc<dyn Clock>,
    pub entities: Arc<dyn EntityResolver>,
    pub output: Arc<dyn OutputSender>,
    pub locks: Arc<KeyedLocks>,
}

impl Services {
    pub fn in_memory() -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            variables: Arc::new(InMemoryVariableStore::new()),
            cooldowns: Arc::new(InMemoryCooldownManager::new(clock.clone())),
            clock,
            entities: Arc::new(InMemoryEntities::new()),
            output: Arc::new(RecordingOutputSender::new()),
            locks: Arc::new(KeyedLocks::new()),
        }
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryEntities {
    channels: DashMap<String, Channel>,
    guilds: DashMap<String, Guild>,
    messages: DashMap<(String, String), Message>,
    members: DashMap<(String, String), User>,
}

impl InMemoryEntities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_guild(&self, guild: Guild) {
        self.guilds.insert(guild.id.clone(), guild);
    }

    pub fn add_channel(&self, channel: Channel) {
        self.channels.insert(channel.id.clone(), channel);
    }

    pub fn add_member(&self, guild_id: &str, user: User) {
        self.members
            .insert((guild_id.to_string(), user.id.clone()), user);
    }

    pub fn add_message(&self, message: Message) {
        self.messages
            .insert((message.channel_id.clone(), message.id.clone()), message);
    }

    /// Registers a message together with its channel, guild and author membership.
    pub fn add_message_context(&self, guild: Guild, channel: Channel, message: Message) {
        self.add_member(&guild.id, message.author.clone());
        self.add_guild(guild);
        self.add_channel(channel);
        self.add_message(message);
    }
}

#[async_trait]
impl EntityResolver for InMemoryEntities {
    async fn channel(&self, channel_id: &str) -> Result<Option<Channel>, ServiceError> {
        Ok(self.channels.get(channel_id).map(|c| c.clone()))
    }

    async fn guild(&self, guild_id: &str) -> Result<Option<Guild>, ServiceError> {
        Ok(self.guilds.get(guild_id).map(|g| g.clone()))
    }

    async fn message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> Result<Option<Message>, ServiceError> {
        let key = (channel_id.to_string(), message_id.to_string());
        Ok(self.messages.get(&key).map(|m| m.clone()))
    }

    async fn member(&self, guild_id: &str, user_id: &str) -> Result<Option<User>, ServiceError> {
        let key = (guild_id.to_string(), user_id.to_string());
        Ok(self.members.get(&key).map(|u| u.clone()))
    }
}

/// [`OutputSender`] that records every request and answers with a fresh id.
#[derive(Debug, Default)]
pub struct RecordingOutputSender {
    sent: Mutex<Vec<OutputRequest>>,
    notices: Mutex<Vec<(String, String)>>,
}

impl RecordingOutputSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<OutputRequest> {
        self.sent.lock().await.clone()
    }

    pub async fn notices(&self) -> Vec<(String, String)> {
        self.notices.lock().await.clone()
    }
}

#[async_trait]
impl OutputSender for RecordingOutputSender {
    async fn send(&self, request: OutputRequest) -> Result<Option<String>, ServiceError> {
        self.sent.lock().await.push(request);
        Ok(Some(Uuid::new_v4().to_string()))
    }

    async fn notify(&self, channel_id: &str, text: &str) -> Result<(), ServiceError> {
        self.notices
            .lock()
            .await
            .push((channel_id.to_string(), text.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_entities_lookup() {
        let entities = InMemoryEntities::new();
        let author = User {
            id: "u1".to_string(),
            name: "alice".to_string(),
        };
        entities.add_message_context(
            Guild {
                id: "g1".to_string(),
                name: "guild".to_string(),
            },
            Channel {
                id: "c1".to_string(),
                guild_id: "g1".to_string(),
                name: "general".to_string(),
            },
            Message {
                id: "m1".to_string(),
                channel_id: "c1".to_string(),
                author: author.clone(),
                content: "!cc".to_string(),
                timestamp: Utc::now(),
            },
        );

        assert!(entities.channel("c1").await.unwrap().is_some());
        assert!(entities.message("c1", "m1").await.unwrap().is_some());
        assert!(entities.message("c2", "m1").await.unwrap().is_none());
        assert_eq!(entities.member("g1", "u1").await.unwrap(), Some(author));
    }

    #[tokio::test]
    async fn test_recording_sender_assigns_ids() {
        let sender = RecordingOutputSender::new();
        let first = sender.send(OutputRequest::default()).await.unwrap();
        let second = sender.send(OutputRequest::default()).await.unwrap();
        assert!(first.is_some());
        assert_ne!(first, second);
        assert_eq!(sender.sent().await.len(), 2);
    }
}

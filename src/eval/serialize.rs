//! Snapshot and restore of an [`ExecutionContext`] for executions that have to survive a
//! restart, e.g. while waiting on a reaction.
//!
//! The record keeps what a resumed execution can observe: the message it was triggered
//! by, who ran it, the ambient modifiers of the current scope, temporary variables, quota
//! usage and the cooldown. The call stack and nesting depth are not kept; a restored
//! context starts at depth 0 and is never held back by the cooldown.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::eval::context::{ContextOptions, ExecutionContext};
use crate::eval::engine::Engine;
use crate::eval::limits::{self, LimitState};
use crate::eval::scope::{ScopeFrame, ScopeManager};
use crate::eval::variables::StoreError;
use crate::services::{Message, ServiceError};

#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("Channel {0} no longer exists")]
    MissingChannel(String),
    #[error("Guild {0} no longer exists")]
    MissingGuild(String),
    #[error("Message {0} no longer exists")]
    MissingMessage(String),
    #[error("User {0} is no longer a member")]
    MissingMember(String),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Ambient modifiers of the innermost scope.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScopeSnapshot {
    pub quiet: bool,
    pub reason: Option<String>,
    pub fallback: Option<String>,
    pub no_lookup_errors: bool,
}

impl From<&ScopeFrame> for ScopeSnapshot {
    fn from(frame: &ScopeFrame) -> Self {
        Self {
            quiet: frame.quiet,
            reason: frame.reason.clone(),
            fallback: frame.fallback.clone(),
            no_lookup_errors: frame.no_lookup_errors,
        }
    }
}

impl From<ScopeSnapshot> for ScopeFrame {
    fn from(snapshot: ScopeSnapshot) -> Self {
        Self {
            quiet: snapshot.quiet,
            reason: snapshot.reason,
            fallback: snapshot.fallback,
            no_lookup_errors: snapshot.no_lookup_errors,
            ..ScopeFrame::tag()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedContext {
    pub message: Message,
    pub guild_id: String,
    pub is_cc: bool,
    pub tag_name: String,
    pub root_tag_name: String,
    pub author_id: Option<String>,
    pub authorizer_id: Option<String>,
    pub input: String,
    pub scope: ScopeSnapshot,
    /// Temporary variables keyed by their script name, e.g. `~count`.
    pub temp_vars: BTreeMap<String, Value>,
    pub limit: LimitState,
    #[serde(with = "crate::config::duration_ms")]
    pub cooldown: Duration,
    #[serde(default)]
    pub silent: bool,
}

impl SerializedContext {
    pub fn to_json(&self) -> Result<String, SerializationError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, SerializationError> {
        Ok(serde_json::from_str(json)?)
    }
}

impl ExecutionContext {
    pub async fn serialize(&self) -> SerializedContext {
        let temp_vars = self
            .variables
            .list()
            .await
            .into_iter()
            .filter(|(key, _)| key.is_temporary())
            .filter_map(|(key, value)| value.map(|value| (key.to_string(), value)))
            .collect();

        SerializedContext {
            message: self.message.clone(),
            guild_id: self.guild.id.clone(),
            is_cc: self.identity.is_cc,
            tag_name: self.identity.tag_name.clone(),
            root_tag_name: self.identity.root_tag_name.clone(),
            author_id: self.identity.author_id.clone(),
            authorizer_id: self.identity.authorizer_id.clone(),
            input: self.input.clone(),
            scope: ScopeSnapshot::from(self.scopes.local()),
            temp_vars,
            limit: self.limit.state(),
            cooldown: self.cooldown,
            silent: self.silent,
        }
    }

    /// Rebuilds a context, re-resolving the channel, guild, message and invoking member
    /// through the engine's entity resolver.
    pub async fn deserialize(
        engine: &Arc<Engine>,
        record: SerializedContext,
    ) -> Result<ExecutionContext, SerializationError> {
        let entities = &engine.services().entities;
        let channel_id = record.message.channel_id.clone();
        let channel = entities
            .channel(&channel_id)
            .await?
            .ok_or_else(|| SerializationError::MissingChannel(channel_id.clone()))?;
        let guild = entities
            .guild(&record.guild_id)
            .await?
            .ok_or_else(|| SerializationError::MissingGuild(record.guild_id.clone()))?;
        let message = entities
            .message(&channel_id, &record.message.id)
            .await?
            .ok_or_else(|| SerializationError::MissingMessage(record.message.id.clone()))?;
        entities
            .member(&guild.id, &message.author.id)
            .await?
            .ok_or_else(|| SerializationError::MissingMember(message.author.id.clone()))?;

        let limit = limits::restore(record.limit, &engine.config().limits);
        let options = ContextOptions {
            message,
            channel,
            guild,
            input: record.input,
            tag_name: record.tag_name,
            root_tag_name: Some(record.root_tag_name),
            is_cc: record.is_cc,
            author_id: record.author_id,
            authorizer_id: record.authorizer_id,
            cooldown: Some(record.cooldown),
            limit: None,
            silent: record.silent,
        };
        let mut ctx = ExecutionContext::new(
            engine.clone(),
            options,
            limit,
            record.cooldown,
            DateTime::<Utc>::MIN_UTC,
        );
        ctx.scopes = ScopeManager::new(record.scope.into());
        for (name, value) in record.temp_vars {
            let key = ctx.variable_key(&name);
            ctx.variables.set(&key, Some(value)).await;
        }
        debug!(tag = %ctx.identity.tag_name, "context restored");
        Ok(ctx)
    }
}

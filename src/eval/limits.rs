//! Runtime quotas.
//!
//! The engine consults the context's [`RuntimeLimit`] with the bare subtag name before
//! every invocation, and loop subtags consult it with a `<subtag>:loops` key before every
//! iteration. All loop keys count against one shared group, so nesting loops does not
//! multiply the budget.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::LimitConfig;
use crate::eval::context::ExecutionContext;
use crate::eval::error::{RuntimeError, RuntimeErrorKind};

pub const LOOP_GROUP: &str = "loops";
pub const LOOP_KEYS: &[&str] = &["for:loops", "foreach:loops", "repeat:loops", "while:loops"];

/// Serializable snapshot of a limit, enough to rebuild it with [`restore`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LimitState {
    pub kind: String,
    pub counts: HashMap<String, u32>,
}

pub trait RuntimeLimit: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> &str;

    /// Records one use of `key` and rejects it if a rule for `key` is exhausted.
    fn check(&self, ctx: &ExecutionContext, key: &str) -> Result<(), RuntimeError>;

    fn state(&self) -> LimitState;
}

/// Policy for executions that run without quotas.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLimit;

impl RuntimeLimit for NoLimit {
    fn kind(&self) -> &str {
        "none"
    }

    fn check(&self, _ctx: &ExecutionContext, _key: &str) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn state(&self) -> LimitState {
        LimitState {
            kind: self.kind().to_string(),
            counts: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitRule {
    /// At most `max` uses per execution, counted per `group`.
    Quota {
        group: String,
        max: u32,
        message: String,
    },
    Disabled {
        message: String,
    },
}

#[derive(Debug)]
pub struct QuotaLimit {
    kind: String,
    rules: HashMap<String, LimitRule>,
    used: DashMap<String, u32>,
}

impl QuotaLimit {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            rules: HashMap::new(),
            used: DashMap::new(),
        }
    }

    pub fn with_rule(mut self, key: impl Into<String>, rule: LimitRule) -> Self {
        self.rules.insert(key.into(), rule);
        self
    }

    /// Limits for tags run by name.
    pub fn tag(config: &LimitConfig) -> Self {
        Self::preset("tag", config.tag_loops, config)
    }

    /// Limits for guild custom commands.
    pub fn custom_command(config: &LimitConfig) -> Self {
        Self::preset("custom_command", config.custom_command_loops, config)
    }

    fn preset(kind: &str, loops: u32, config: &LimitConfig) -> Self {
        let mut limit = Self::new(kind);
        for key in LOOP_KEYS {
            limit.rules.insert(
                key.to_string(),
                LimitRule::Quota {
                    group: LOOP_GROUP.to_string(),
                    max: loops,
                    message: "Too many loops".to_string(),
                },
            );
        }
        for (name, max) in &config.subtag_quotas {
            let name = name.to_lowercase();
            limit.rules.insert(
                name.clone(),
                LimitRule::Quota {
                    group: name.clone(),
                    max: *max,
                    message: format!("Too many {} calls", name),
                },
            );
        }
        for name in &config.disabled_subtags {
            let name = name.to_lowercase();
            limit.rules.insert(
                name.clone(),
                LimitRule::Disabled {
                    message: format!("{} is disabled", name),
                },
            );
        }
        limit
    }

    fn load(&self, counts: HashMap<String, u32>) {
        for (group, count) in counts {
            self.used.insert(group, count);
        }
    }

    pub fn used(&self, group: &str) -> u32 {
        self.used.get(group).map(|count| *count).unwrap_or(0)
    }
}

impl RuntimeLimit for QuotaLimit {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn check(&self, _ctx: &ExecutionContext, key: &str) -> Result<(), RuntimeError> {
        match self.rules.get(key) {
            None => Ok(()),
            Some(LimitRule::Disabled { message }) => Err(RuntimeErrorKind::LimitExceeded {
                rule: key.to_string(),
                message: message.clone(),
            }
            .into()),
            Some(LimitRule::Quota {
                group,
                max,
                message,
            }) => {
                let used = {
                    let mut count = self.used.entry(group.clone()).or_insert(0);
                    *count += 1;
                    *count
                };
                if used > *max {
                    Err(RuntimeErrorKind::LimitExceeded {
                        rule: key.to_string(),
                        message: message.clone(),
                    }
                    .into())
                } else {
                    Ok(())
                }
            }
        }
    }

    fn state(&self) -> LimitState {
        LimitState {
            kind: self.kind.clone(),
            counts: self
                .used
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
        }
    }
}

/// Rebuilds a limit from a snapshot taken by [`RuntimeLimit::state`].
pub fn restore(state: LimitState, config: &LimitConfig) -> Arc<dyn RuntimeLimit> {
    let limit = match state.kind.as_str() {
        "none" => return Arc::new(NoLimit),
        "tag" => QuotaLimit::tag(config),
        "custom_command" => QuotaLimit::custom_command(config),
        other => {
            warn!(kind = other, "unknown limit kind, restoring as tag limit");
            QuotaLimit::tag(config)
        }
    };
    limit.load(state.counts);
    Arc::new(limit)
}

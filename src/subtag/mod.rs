//! # Subtags
//!
//! A subtag is one named unit of BBTag functionality. Implementations receive the raw,
//! unevaluated [`SubtagCall`] and decide which arguments to evaluate and when, which is
//! what makes loops and conditionals possible. Output is written to an [`OutputSink`]
//! chunk by chunk; whatever was written before a failure is kept.
//!
//! Subtags are registered through [`SubtagDescriptor`] values rather than by reflection:
//! the descriptor names the subtag, its aliases and category, and carries a factory that
//! builds the instance from the engine's [`SubtagDeps`].

pub mod builtins;
pub mod middleware;
pub mod registry;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ast::SubtagCall;
use crate::config::EngineConfig;
use crate::eval::context::ExecutionContext;
use crate::eval::error::{RuntimeError, RuntimeErrorKind, SubtagResult};
use crate::services::Services;

pub use middleware::{MetricsMiddleware, Next, SubtagInvocation, SubtagMiddleware};
pub use registry::{RegisteredSubtag, RegistryError, SubtagRegistry};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
pub enum SubtagCategory {
    Simple,
    Complex,
    Array,
    Math,
    Loops,
    Bot,
    Message,
    Channel,
    User,
    Role,
    Guild,
    Misc,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Deprecation {
    pub replacement: Option<String>,
}

/// Collects the output of a single subtag invocation.
#[derive(Debug, Default)]
pub struct OutputSink {
    chunks: Vec<String>,
}

impl OutputSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: impl Into<String>) {
        let chunk = chunk.into();
        if !chunk.is_empty() {
            self.chunks.push(chunk);
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn into_string(self) -> String {
        self.chunks.concat()
    }
}

#[async_trait]
pub trait Subtag: Send + Sync {
    /// Runs one invocation. `name` is the lower-cased name the call resolved through,
    /// which differs from the descriptor name for aliases and dotted families.
    async fn execute(
        &self,
        ctx: &mut ExecutionContext,
        name: &str,
        call: &SubtagCall,
        out: &mut OutputSink,
    ) -> SubtagResult<()>;
}

/// What a subtag factory may depend on.
pub struct SubtagDeps<'a> {
    pub config: &'a EngineConfig,
    pub services: &'a Services,
}

pub type SubtagFactory = Arc<dyn Fn(&SubtagDeps<'_>) -> Arc<dyn Subtag> + Send + Sync>;

#[derive(Clone)]
pub struct SubtagDescriptor {
    pub name: String,
    pub aliases: Vec<String>,
    pub category: SubtagCategory,
    pub deprecated: Option<Deprecation>,
    pub build: SubtagFactory,
}

impl SubtagDescriptor {
    pub fn new<F>(name: impl Into<String>, category: SubtagCategory, build: F) -> Self
    where
        F: Fn(&SubtagDeps<'_>) -> Arc<dyn Subtag> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            category,
            deprecated: None,
            build: Arc::new(build),
        }
    }

    /// Descriptor for an already-built instance.
    pub fn instance(
        name: impl Into<String>,
        category: SubtagCategory,
        subtag: Arc<dyn Subtag>,
    ) -> Self {
        Self::new(name, category, move |_| subtag.clone())
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn deprecated(mut self, replacement: Option<&str>) -> Self {
        self.deprecated = Some(Deprecation {
            replacement: replacement.map(str::to_string),
        });
        self
    }
}

impl std::fmt::Debug for SubtagDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubtagDescriptor")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("category", &self.category)
            .field("deprecated", &self.deprecated)
            .finish()
    }
}

/// Rejects calls whose argument count falls outside `min..=max`.
pub fn check_args(call: &SubtagCall, min: usize, max: Option<usize>) -> Result<(), RuntimeError> {
    let got = call.args.len();
    if got < min {
        return Err(RuntimeErrorKind::MissingArguments { expected: min, got }.into());
    }
    match max {
        Some(max) if got > max => {
            Err(RuntimeErrorKind::TooManyArguments { expected: max, got }.into())
        }
        _ => Ok(()),
    }
}

/// Parses the boolean spellings scripts commonly use.
pub fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

//! # Execution Context
//!
//! One [`ExecutionContext`] is threaded mutably through the evaluation of a script. It
//! owns the control-flow state, scope stack, call stack, error list and debug trail, and
//! holds shared handles to the things that outlive a single evaluation step: the
//! variable cache, the runtime limit, side effects and the output slot.
//!
//! ## Child contexts
//!
//! [`ExecutionContext::fork`] builds a context for evaluating a snippet against a
//! different message or tag name. The child shares the variable cache, limit, side
//! effects and output slot with its parent, but gets its own scope stack, error list,
//! debug trail and state. [`ExecutionContext::absorb`] merges the child's bookkeeping
//! back into the parent.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

use crate::ast::{Statement, SubtagCall};
use crate::eval::cooldown::CooldownKey;
use crate::eval::engine::Engine;
use crate::eval::error::{FatalError, LocatedError, RuntimeError};
use crate::eval::limits::RuntimeLimit;
use crate::eval::scope::{ScopeManager, ScopeToken};
use crate::eval::side_effects::SideEffects;
use crate::eval::state::{CallFrame, Counters, DebugEntry, ExecutionState};
use crate::eval::variables::{StoreError, VariableCache, VariableKey, VariableOwner};
use crate::services::{Channel, Guild, Message, OutputRequest, ServiceError, User};

/// Who is running what.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContextIdentity {
    /// Name of the tag or command the execution started from.
    pub root_tag_name: String,
    /// Name of the tag currently being evaluated.
    pub tag_name: String,
    pub is_cc: bool,
    /// Owner of the tag; `@` variables belong to them.
    pub author_id: Option<String>,
    /// User whose permissions the tag runs with.
    pub authorizer_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    pub message: Message,
    pub channel: Channel,
    pub guild: Guild,
    /// Raw text the tag was invoked with.
    pub input: String,
    pub tag_name: String,
    pub root_tag_name: Option<String>,
    pub is_cc: bool,
    pub author_id: Option<String>,
    pub authorizer_id: Option<String>,
    /// Defaults to the engine's configured cooldown.
    pub cooldown: Option<Duration>,
    /// Defaults to the tag or custom-command quota preset.
    pub limit: Option<Arc<dyn RuntimeLimit>>,
    /// Evaluate without posting the output.
    pub silent: bool,
}

/// Overrides for [`ExecutionContext::fork`]. Unset fields are inherited.
#[derive(Debug, Clone, Default)]
pub struct ForkOptions {
    pub message: Option<Message>,
    pub channel: Option<Channel>,
    pub tag_name: Option<String>,
    pub input: Option<String>,
}

pub struct ExecutionContext {
    pub(super) engine: Arc<Engine>,
    pub(super) identity: ContextIdentity,
    pub(super) message: Message,
    pub(super) channel: Channel,
    pub(super) guild: Guild,
    pub(super) input: String,
    pub(super) scopes: ScopeManager,
    pub(super) variables: Arc<VariableCache>,
    pub(super) limit: Arc<dyn RuntimeLimit>,
    pub(super) state: ExecutionState,
    pub(super) call_stack: Vec<CallFrame>,
    /// Calls whose names are being evaluated; counted with the call stack for the depth limit.
    pub(super) name_depth: usize,
    /// Nesting depth of tag runs; 0 once the outermost run has finished.
    pub(super) stack_size: usize,
    pub(super) counters: Counters,
    pub(super) errors: Vec<LocatedError>,
    pub(super) debug: Vec<DebugEntry>,
    pub(super) side_effects: Arc<Mutex<SideEffects>>,
    pub(super) output: Arc<OnceCell<Option<String>>>,
    pub(super) cooldown: Duration,
    pub(super) cooldown_end: DateTime<Utc>,
    pub(super) silent: bool,
    pub(super) database_committed: bool,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("identity", &self.identity)
            .field("state", &self.state)
            .field("stack_size", &self.stack_size)
            .field("call_depth", &self.call_stack.len())
            .field("errors", &self.errors.len())
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    pub(super) fn new(
        engine: Arc<Engine>,
        options: ContextOptions,
        limit: Arc<dyn RuntimeLimit>,
        cooldown: Duration,
        cooldown_end: DateTime<Utc>,
    ) -> Self {
        let variables = Arc::new(VariableCache::new(engine.services().variables.clone()));
        let tag_name = options.tag_name;
        Self {
            engine,
            identity: ContextIdentity {
                root_tag_name: options.root_tag_name.unwrap_or_else(|| tag_name.clone()),
                tag_name,
                is_cc: options.is_cc,
                author_id: options.author_id,
                authorizer_id: options.authorizer_id,
            },
            message: options.message,
            channel: options.channel,
            guild: options.guild,
            input: options.input,
            scopes: ScopeManager::default(),
            variables,
            limit,
            state: ExecutionState::Running,
            call_stack: Vec::new(),
            name_depth: 0,
            stack_size: 0,
            counters: Counters::default(),
            errors: Vec::new(),
            debug: Vec::new(),
            side_effects: Arc::new(Mutex::new(SideEffects::default())),
            output: Arc::new(OnceCell::new()),
            cooldown,
            cooldown_end,
            silent: options.silent,
            database_committed: false,
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn identity(&self) -> &ContextIdentity {
        &self.identity
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn guild(&self) -> &Guild {
        &self.guild
    }

    /// The invoking user.
    pub fn user(&self) -> &User {
        &self.message.author
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn limit(&self) -> &Arc<dyn RuntimeLimit> {
        &self.limit
    }

    pub fn variables(&self) -> &Arc<VariableCache> {
        &self.variables
    }

    pub fn side_effects(&self) -> &Arc<Mutex<SideEffects>> {
        &self.side_effects
    }

    pub fn scopes(&self) -> &ScopeManager {
        &self.scopes
    }

    pub fn scopes_mut(&mut self) -> &mut ScopeManager {
        &mut self.scopes
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    pub fn set_state(&mut self, state: ExecutionState) {
        debug!(from = %self.state, to = %state, "state transition");
        self.state = state;
    }

    pub fn errors(&self) -> &[LocatedError] {
        &self.errors
    }

    pub fn debug_entries(&self) -> &[DebugEntry] {
        &self.debug
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn call_stack(&self) -> &[CallFrame] {
        &self.call_stack
    }

    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    pub fn is_silent(&self) -> bool {
        self.silent
    }

    pub fn cooldown_key(&self) -> CooldownKey {
        CooldownKey {
            is_cc: self.identity.is_cc,
            guild_id: self.guild.id.clone(),
            tag_name: self.identity.root_tag_name.clone(),
            user_id: self.message.author.id.clone(),
        }
    }

    /// Pushes a scope frame. Every call must be paired with [`exit_scope`](Self::exit_scope)
    /// on all paths.
    pub fn enter_scope(&mut self, is_tag: bool) -> ScopeToken {
        self.scopes.push(is_tag)
    }

    /// Pops the frame for `token`. Leaving a tag boundary consumes `ReturnLocal`.
    pub fn exit_scope(&mut self, token: ScopeToken) {
        self.scopes.pop(token);
        if token.is_tag() && self.state == ExecutionState::ReturnLocal {
            self.set_state(ExecutionState::Running);
        }
    }

    pub(super) fn push_frame(&mut self, name: String, call: Arc<SubtagCall>) {
        *self.counters.invocations.entry(name.clone()).or_default() += 1;
        self.call_stack.push(CallFrame { name, call });
    }

    pub(super) fn pop_frame(&mut self) {
        self.call_stack.pop();
    }

    /// Counts one unit of work and yields to the scheduler every `yield_interval` units.
    pub async fn step(&mut self) {
        self.counters.steps += 1;
        let interval = self.engine.config().yield_interval;
        if interval > 0 && self.counters.steps % interval == 0 {
            self.counters.yields += 1;
            tokio::task::yield_now().await;
        }
    }

    /// Evaluates a statement in this context.
    pub async fn eval(&mut self, statement: &Statement) -> Result<String, FatalError> {
        let engine = self.engine.clone();
        engine.eval_statement(self, statement).await
    }

    /// Evaluates argument `index` of `call`, or returns an empty string if it is absent.
    pub async fn eval_arg(&mut self, call: &SubtagCall, index: usize) -> Result<String, FatalError> {
        match call.args.get(index) {
            Some(arg) => self.eval(arg).await,
            None => Ok(String::new()),
        }
    }

    /// Records `error` against `call` and returns the text to show in its place: the
    /// error's own display override, else the scope fallback, else `` `message` ``.
    pub fn add_error(&mut self, call: Option<&Arc<SubtagCall>>, error: RuntimeError) -> String {
        let text = match (&error.display, &self.scopes.local().fallback) {
            (Some(display), _) => display.clone(),
            (None, Some(fallback)) => fallback.clone(),
            (None, None) => format!("`{}`", error.message()),
        };
        debug!(error = %error, "subtag error");
        self.errors.push(LocatedError {
            subtag: call.cloned(),
            error,
        });
        text
    }

    pub fn add_debug(&mut self, text: impl Into<String>) {
        let frame = self.call_stack.last();
        self.debug.push(DebugEntry {
            subtag: frame.map(|frame| frame.name.clone()),
            span: frame.map(|frame| frame.call.span()),
            text: text.into(),
        });
    }

    pub fn variable_owner(&self) -> VariableOwner {
        VariableOwner {
            is_cc: self.identity.is_cc,
            tag_name: self.identity.tag_name.clone(),
            guild_id: self.guild.id.clone(),
            user_id: self
                .identity
                .author_id
                .clone()
                .unwrap_or_else(|| self.message.author.id.clone()),
        }
    }

    pub fn variable_key(&self, name: &str) -> VariableKey {
        VariableKey::resolve(name, &self.variable_owner())
    }

    /// Reads a variable, preferring the nearest scope binding of `name`.
    pub async fn get_variable(&self, name: &str) -> Result<Option<Value>, StoreError> {
        if let Some(value) = self.scopes.binding(name) {
            return Ok(Some(value.clone()));
        }
        self.variables.get(&self.variable_key(name)).await
    }

    /// Writes a variable. A name bound in scope is updated in that scope only.
    pub async fn set_variable(&mut self, name: &str, value: Option<Value>) {
        if self.scopes.binding(name).is_some() {
            self.scopes.assign(name, value.unwrap_or(Value::Null));
            return;
        }
        let key = self.variable_key(name);
        self.variables.set(&key, value).await;
    }

    /// Delivers `content` through the output sender at most once per execution. Later
    /// calls, including calls from child contexts, return the first result.
    pub async fn send_output(&self, content: &str) -> Result<Option<String>, ServiceError> {
        let id = self
            .output
            .get_or_try_init(|| async {
                if self.silent {
                    return Ok(None);
                }
                let effects = self.side_effects.lock().await.clone();
                let request = OutputRequest {
                    channel_id: self.channel.id.clone(),
                    content: content.to_string(),
                    reply_to: None,
                    embeds: effects.embeds,
                    file: effects.file,
                    reactions: effects.reactions,
                    mentions: effects.mentions,
                };
                self.engine.services().output.send(request).await
            })
            .await?;
        Ok(id.clone())
    }

    pub fn output_id(&self) -> Option<String> {
        self.output.get().cloned().flatten()
    }

    pub fn fork(&self, options: ForkOptions) -> ExecutionContext {
        let mut identity = self.identity.clone();
        if let Some(tag_name) = options.tag_name {
            identity.tag_name = tag_name;
        }
        ExecutionContext {
            engine: self.engine.clone(),
            identity,
            message: options.message.unwrap_or_else(|| self.message.clone()),
            channel: options.channel.unwrap_or_else(|| self.channel.clone()),
            guild: self.guild.clone(),
            input: options.input.unwrap_or_else(|| self.input.clone()),
            scopes: ScopeManager::new(self.scopes.local().child(true)),
            variables: self.variables.clone(),
            limit: self.limit.clone(),
            state: ExecutionState::Running,
            call_stack: self.call_stack.clone(),
            name_depth: self.name_depth,
            stack_size: self.stack_size,
            counters: Counters::default(),
            errors: Vec::new(),
            debug: Vec::new(),
            side_effects: self.side_effects.clone(),
            output: self.output.clone(),
            cooldown: self.cooldown,
            cooldown_end: self.cooldown_end,
            silent: self.silent,
            database_committed: false,
        }
    }

    /// Merges a finished child back in. Terminal states propagate to the parent.
    pub fn absorb(&mut self, child: ExecutionContext) {
        self.errors.extend(child.errors);
        self.debug.extend(child.debug);
        if child.state.is_terminal() {
            self.set_state(child.state);
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::services::Services;

    pub fn options() -> ContextOptions {
        let author = User {
            id: "u1".to_string(),
            name: "alice".to_string(),
        };
        ContextOptions {
            message: Message {
                id: "m1".to_string(),
                channel_id: "c1".to_string(),
                author,
                content: "!t".to_string(),
                timestamp: Utc::now(),
            },
            channel: Channel {
                id: "c1".to_string(),
                guild_id: "g1".to_string(),
                name: "general".to_string(),
            },
            guild: Guild {
                id: "g1".to_string(),
                name: "guild".to_string(),
            },
            tag_name: "test".to_string(),
            ..ContextOptions::default()
        }
    }

    pub async fn context_with(services: Services) -> ExecutionContext {
        let engine = Engine::builder(services).build().unwrap();
        engine.create_context(options()).await
    }

    pub async fn context() -> ExecutionContext {
        context_with(Services::in_memory()).await
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::eval::error::RuntimeErrorKind;
    use crate::services::{MockOutputSender, Services};
    use serde_json::json;

    #[tokio::test]
    async fn test_send_output_is_idempotent() {
        let mut sender = MockOutputSender::new();
        sender
            .expect_send()
            .times(1)
            .returning(|_| Ok(Some("msg-1".to_string())));
        let services = Services {
            output: Arc::new(sender),
            ..Services::in_memory()
        };
        let ctx = context_with(services).await;

        assert_eq!(ctx.send_output("hi").await.unwrap(), Some("msg-1".to_string()));
        assert_eq!(ctx.send_output("hi").await.unwrap(), Some("msg-1".to_string()));
        assert_eq!(ctx.output_id(), Some("msg-1".to_string()));
    }

    #[tokio::test]
    async fn test_silent_output_caches_nothing_sent() {
        let mut sender = MockOutputSender::new();
        sender.expect_send().times(0);
        let services = Services {
            output: Arc::new(sender),
            ..Services::in_memory()
        };
        let engine = Engine::builder(services).build().unwrap();
        let ctx = engine
            .create_context(ContextOptions {
                silent: true,
                ..options()
            })
            .await;

        assert_eq!(ctx.send_output("hi").await.unwrap(), None);
        let child = ctx.fork(ForkOptions::default());
        assert_eq!(child.send_output("again").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_error_rendering_precedence() {
        let mut ctx = context().await;
        let plain = ctx.add_error(None, RuntimeError::custom("boom"));
        assert_eq!(plain, "`boom`");

        ctx.scopes_mut().local_mut().fallback = Some("fb".to_string());
        assert_eq!(ctx.add_error(None, RuntimeError::custom("boom")), "fb");
        assert_eq!(
            ctx.add_error(None, RuntimeError::custom("boom").with_display("shown")),
            "shown"
        );
        assert_eq!(ctx.errors().len(), 3);
    }

    #[tokio::test]
    async fn test_scope_bindings_shadow_variables() {
        let mut ctx = context().await;
        ctx.set_variable("a", Some(json!("outer"))).await;

        let token = ctx.enter_scope(false);
        ctx.scopes_mut().bind("a", json!("loop"));
        assert_eq!(ctx.get_variable("a").await.unwrap(), Some(json!("loop")));
        ctx.set_variable("a", Some(json!("changed in loop"))).await;
        ctx.exit_scope(token);

        assert_eq!(ctx.get_variable("a").await.unwrap(), Some(json!("outer")));
    }

    #[tokio::test]
    async fn test_exit_tag_scope_consumes_return_local() {
        let mut ctx = context().await;
        let tag = ctx.enter_scope(true);
        let block = ctx.enter_scope(false);
        ctx.set_state(ExecutionState::ReturnLocal);
        ctx.exit_scope(block);
        assert_eq!(ctx.state(), ExecutionState::ReturnLocal);
        ctx.exit_scope(tag);
        assert_eq!(ctx.state(), ExecutionState::Running);

        ctx.set_state(ExecutionState::ReturnAll);
        let tag = ctx.enter_scope(true);
        ctx.exit_scope(tag);
        assert_eq!(ctx.state(), ExecutionState::ReturnAll);
    }

    #[tokio::test]
    async fn test_fork_isolates_bookkeeping_and_absorb_merges() {
        let mut parent = context().await;
        parent.scopes_mut().local_mut().quiet = true;

        let mut child = parent.fork(ForkOptions {
            tag_name: Some("other".to_string()),
            ..ForkOptions::default()
        });
        assert!(child.scopes().local().quiet);
        assert_eq!(child.identity().tag_name, "other");
        assert_eq!(child.identity().root_tag_name, "test");

        child.add_error(None, RuntimeErrorKind::NotANumber { value: "x".into() }.into());
        child.set_state(ExecutionState::Abort);
        assert!(parent.errors().is_empty());
        assert_eq!(parent.state(), ExecutionState::Running);

        parent.absorb(child);
        assert_eq!(parent.errors().len(), 1);
        assert_eq!(parent.state(), ExecutionState::Abort);
    }

    #[tokio::test]
    async fn test_fork_shares_variable_cache() {
        let parent = context().await;
        let mut child = parent.fork(ForkOptions::default());
        child.set_variable("~shared", Some(json!("v"))).await;
        assert_eq!(
            parent.get_variable("~shared").await.unwrap(),
            Some(json!("v"))
        );
    }
}

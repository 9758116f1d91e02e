//! # Execution Engine
//!
//! Walks a parsed [`Statement`] and expands every call into text.
//!
//! ## Evaluation
//!
//! * Text nodes are copied to the output.
//! * A call's name is evaluated first (names may be computed), trimmed and lower-cased,
//!   then resolved through the [`SubtagRegistry`].
//! * The runtime limit is consulted with the subtag name and the call stack depth is
//!   checked before a frame is pushed. Calls whose names are still being evaluated count
//!   towards the same depth, so nested dynamic names are bounded too.
//! * Statement futures grow the native stack when needed (see [`GrowStack`]).
//! * The subtag runs behind the middleware chain. Its output is kept even when it fails;
//!   a recoverable failure appends its rendered error after the partial output.
//! * After every node the walk stops if the context left [`ExecutionState::Running`].
//!
//! ## Runs
//!
//! [`Engine::run`] wraps an evaluation with the cooldown gate, the tag-nesting guard and,
//! for the outermost run only, output replacement, variable persistence and delivery.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_recursion::async_recursion;
use chrono::{DateTime, Utc};
use tracing::{debug, error, instrument, warn};

use crate::ast::{Statement, StatementNode, SubtagCall};
use crate::config::EngineConfig;
use crate::eval::context::{ContextOptions, ExecutionContext};
use crate::eval::error::{
    FatalError, LocatedError, RuntimeError, RuntimeErrorKind, SubtagError,
};
use crate::eval::limits::{QuotaLimit, RuntimeLimit};
use crate::eval::stack::GrowStack;
use crate::eval::state::{DebugEntry, ExecutionState};
use crate::parser::parse;
use crate::services::Services;
use crate::subtag::builtins;
use crate::subtag::middleware::{Next, SubtagInvocation, SubtagMiddleware};
use crate::subtag::registry::{RegistryError, SubtagRegistry};
use crate::subtag::{OutputSink, SubtagDeps, SubtagDescriptor};

/// What a caller gets back from [`Engine::execute`].
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub content: String,
    pub errors: Vec<LocatedError>,
    pub debug: Vec<DebugEntry>,
    pub duration: Duration,
    pub output_id: Option<String>,
    pub state: ExecutionState,
    /// Whether dirty variables were written to the store.
    pub database_committed: bool,
}

pub struct EngineBuilder {
    services: Services,
    config: EngineConfig,
    descriptors: Vec<SubtagDescriptor>,
    middleware: Vec<Arc<dyn SubtagMiddleware>>,
    builtins: bool,
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn subtag(mut self, descriptor: SubtagDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    pub fn subtags<I: IntoIterator<Item = SubtagDescriptor>>(mut self, descriptors: I) -> Self {
        self.descriptors.extend(descriptors);
        self
    }

    /// Appends a middleware layer. Layers added first run outermost.
    pub fn middleware(mut self, middleware: Arc<dyn SubtagMiddleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Leaves the built-in control subtags out of the registry.
    pub fn without_builtins(mut self) -> Self {
        self.builtins = false;
        self
    }

    pub fn build(self) -> Result<Arc<Engine>, RegistryError> {
        let mut descriptors = if self.builtins {
            builtins::descriptors()
        } else {
            Vec::new()
        };
        descriptors.extend(self.descriptors);

        let registry = {
            let deps = SubtagDeps {
                config: &self.config,
                services: &self.services,
            };
            SubtagRegistry::new(descriptors, &deps)?
        };

        Ok(Arc::new(Engine {
            config: self.config,
            services: self.services,
            registry,
            middleware: self.middleware,
        }))
    }
}

pub struct Engine {
    config: EngineConfig,
    services: Services,
    registry: SubtagRegistry,
    middleware: Vec<Arc<dyn SubtagMiddleware>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("subtags", &self.registry.len())
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

impl Engine {
    pub fn builder(services: Services) -> EngineBuilder {
        EngineBuilder {
            services,
            config: EngineConfig::default(),
            descriptors: Vec::new(),
            middleware: Vec::new(),
            builtins: true,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn registry(&self) -> &SubtagRegistry {
        &self.registry
    }

    /// Builds a root context. The cooldown end is looked up once here, so nested runs
    /// within the same execution are never blocked by the cooldown they started.
    pub async fn create_context(self: &Arc<Self>, mut options: ContextOptions) -> ExecutionContext {
        let limit: Arc<dyn RuntimeLimit> = match options.limit.take() {
            Some(limit) => limit,
            None if options.is_cc => Arc::new(QuotaLimit::custom_command(&self.config.limits)),
            None => Arc::new(QuotaLimit::tag(&self.config.limits)),
        };
        let cooldown = options.cooldown.unwrap_or(self.config.default_cooldown);

        let mut ctx =
            ExecutionContext::new(self.clone(), options, limit, cooldown, DateTime::<Utc>::MIN_UTC);
        if !cooldown.is_zero() {
            ctx.cooldown_end = self.services.cooldowns.get(&ctx.cooldown_key(), cooldown).await;
        }
        ctx
    }

    /// Parses and runs `source` in a fresh root context.
    pub async fn execute(
        self: &Arc<Self>,
        source: &str,
        options: ContextOptions,
    ) -> Result<ExecutionResult, FatalError> {
        let mut ctx = self.create_context(options).await;
        self.execute_with(&mut ctx, source).await
    }

    /// Runs `source` in an existing context, e.g. one restored from a serialized record.
    pub async fn execute_with(
        &self,
        ctx: &mut ExecutionContext,
        source: &str,
    ) -> Result<ExecutionResult, FatalError> {
        let started = Instant::now();
        let content = self.run(ctx, source, false).await?;
        Ok(ExecutionResult {
            content,
            errors: ctx.errors.clone(),
            debug: ctx.debug.clone(),
            duration: started.elapsed(),
            output_id: ctx.output_id(),
            state: ctx.state,
            database_committed: ctx.database_committed,
        })
    }

    /// Parses `source` and evaluates it as one tag run inside `ctx`. `permissive` is set
    /// for code produced while the script is running.
    #[instrument(level = "debug", skip(self, ctx, source), fields(tag = %ctx.identity.tag_name))]
    pub async fn run(
        &self,
        ctx: &mut ExecutionContext,
        source: &str,
        permissive: bool,
    ) -> Result<String, FatalError> {
        let statement = parse(source, permissive);
        self.run_statement(ctx, &statement).await
    }

    pub async fn run_statement(
        &self,
        ctx: &mut ExecutionContext,
        statement: &Statement,
    ) -> Result<String, FatalError> {
        let now = self.services.clock.now();
        if ctx.cooldown_end > now {
            let remaining_ms = (ctx.cooldown_end - now).num_milliseconds().max(0) as u64;
            let error = RuntimeError::new(RuntimeErrorKind::Cooldown {
                remaining_ms,
                is_cc: ctx.identity.is_cc,
            });
            if ctx.stack_size == 0 {
                let notice = error.message();
                if let Err(e) = self.services.output.notify(&ctx.channel.id, &notice).await {
                    warn!("failed to send cooldown notice: {}", e);
                }
            }
            return Ok(ctx.add_error(None, error));
        }

        ctx.stack_size += 1;
        if ctx.stack_size > self.config.max_stack_depth {
            ctx.stack_size -= 1;
            ctx.set_state(ExecutionState::Abort);
            let error = RuntimeErrorKind::StackOverflow {
                depth: self.config.max_stack_depth,
            };
            return Ok(ctx.add_error(None, error.into()));
        }
        if ctx.stack_size == 1 && !ctx.cooldown.is_zero() {
            self.services.cooldowns.set(&ctx.cooldown_key()).await;
        }

        let token = ctx.enter_scope(true);
        let result = self.eval_statement(ctx, statement).await;
        ctx.exit_scope(token);
        ctx.stack_size -= 1;

        let mut content = result?;
        if ctx.stack_size == 0 {
            let replace = ctx.side_effects.lock().await.replace.clone();
            if let Some(replace) = replace {
                content = replace.apply(&content).into_owned();
            }
            match ctx.variables.persist().await {
                Ok(count) => {
                    ctx.database_committed = true;
                    debug!(count, "variables committed");
                }
                Err(e) => error!("failed to persist variables: {}", e),
            }
            if let Err(e) = ctx.send_output(&content).await {
                error!("failed to send output: {}", e);
            }
        }
        Ok(content)
    }

    pub fn eval_statement<'a>(
        &'a self,
        ctx: &'a mut ExecutionContext,
        statement: &'a Statement,
    ) -> GrowStack<'a, Result<String, FatalError>> {
        GrowStack::new(self.walk_statement(ctx, statement))
    }

    #[async_recursion]
    async fn walk_statement(
        &self,
        ctx: &mut ExecutionContext,
        statement: &Statement,
    ) -> Result<String, FatalError> {
        let mut output = String::new();
        for node in &statement.nodes {
            if !ctx.state.is_running() {
                break;
            }
            match node {
                StatementNode::Text(text) => output.push_str(text),
                StatementNode::Call(call) => output.push_str(&self.eval_call(ctx, call).await?),
            }
        }
        Ok(output)
    }

    #[instrument(level = "debug", skip(self, ctx, call), fields(at = %call.start))]
    pub async fn eval_call(
        &self,
        ctx: &mut ExecutionContext,
        call: &Arc<SubtagCall>,
    ) -> Result<String, FatalError> {
        if call.name.calls().next().is_some() {
            if let Some(error) = self.depth_exceeded(ctx, call) {
                return Ok(error);
            }
        }
        ctx.name_depth += 1;
        let name = self.eval_statement(ctx, &call.name).await;
        ctx.name_depth -= 1;
        let name = name?.trim().to_lowercase();
        if name.is_empty() || !ctx.state.is_running() {
            return Ok(String::new());
        }

        let Some(registered) = self.registry.resolve(&name).cloned() else {
            let error = RuntimeErrorKind::UnknownSubtag { name };
            return Ok(ctx.add_error(Some(call), error.into()));
        };
        if let Some(deprecation) = &registered.deprecated {
            let text = match &deprecation.replacement {
                Some(replacement) => format!("{{{}}} is deprecated. Use {{{}}} instead", name, replacement),
                None => format!("{{{}}} is deprecated", name),
            };
            ctx.debug.push(DebugEntry {
                subtag: Some(name.clone()),
                span: Some(call.span()),
                text,
            });
        }

        if let Err(error) = ctx.limit.check(ctx, &name) {
            return Ok(ctx.add_error(Some(call), error));
        }

        if let Some(error) = self.depth_exceeded(ctx, call) {
            return Ok(error);
        }

        ctx.push_frame(name.clone(), call.clone());
        ctx.step().await;

        let mut out = OutputSink::new();
        let invocation = SubtagInvocation {
            name: &name,
            call: call.as_ref(),
        };
        let result = Next::new(&self.middleware, registered.subtag.as_ref())
            .run(ctx, invocation, &mut out)
            .await;
        ctx.pop_frame();

        let mut output = out.into_string();
        match result {
            Ok(()) => {}
            Err(SubtagError::Recoverable(error)) => {
                output.push_str(&ctx.add_error(Some(call), error));
            }
            Err(SubtagError::Internal(detail)) => {
                error!(subtag = %name, at = %call.span(), "internal error: {}", detail);
                let error = RuntimeError::custom(self.config.internal_error_message.clone())
                    .with_detail(detail);
                output.push_str(&ctx.add_error(Some(call), error));
            }
            Err(SubtagError::Fatal(error)) => {
                error!(subtag = %name, "fatal error: {}", error);
                return Err(error);
            }
        }
        Ok(output)
    }

    /// Aborts the execution once open calls plus pending dynamic names reach the limit.
    fn depth_exceeded(&self, ctx: &mut ExecutionContext, call: &Arc<SubtagCall>) -> Option<String> {
        if ctx.call_stack.len() + ctx.name_depth < self.config.max_stack_depth {
            return None;
        }
        ctx.set_state(ExecutionState::Abort);
        let error = RuntimeErrorKind::StackOverflow {
            depth: self.config.max_stack_depth,
        };
        Some(ctx.add_error(Some(call), error.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::context::test_support::options;

    fn engine() -> Arc<Engine> {
        Engine::builder(Services::in_memory()).build().unwrap()
    }

    #[tokio::test]
    async fn test_plain_text_passes_through() {
        let result = engine().execute("hello", options()).await.unwrap();
        assert_eq!(result.content, "hello");
        assert!(result.errors.is_empty());
        assert_eq!(result.state, ExecutionState::Running);
        assert!(result.output_id.is_some());
    }

    #[tokio::test]
    async fn test_unknown_subtag_is_inline_and_located() {
        let source = "a{nope;x}b";
        let result = engine().execute(source, options()).await.unwrap();
        assert_eq!(result.content, "a`Unknown subtag nope`b");
        assert_eq!(result.errors.len(), 1);
        let call = result.errors[0].subtag.as_ref().unwrap();
        assert_eq!(call.source(source), "{nope;x}");
    }

    #[tokio::test]
    async fn test_dynamic_names_are_trimmed_and_lower_cased() {
        let result = engine()
            .execute("{set;~n; GET }{{get;~n};~n}", options())
            .await
            .unwrap();
        assert_eq!(result.content, " GET ");
    }

    #[tokio::test]
    async fn test_dynamic_name_nesting_counts_towards_depth() {
        let engine = Engine::builder(Services::in_memory())
            .config(EngineConfig {
                max_stack_depth: 5,
                ..EngineConfig::default()
            })
            .build()
            .unwrap();
        let result = engine.execute("{{{{{{{x}}}}}}}", options()).await.unwrap();
        assert_eq!(result.content, "");
        assert_eq!(result.state, ExecutionState::Abort);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(
            result.errors[0].error.kind,
            RuntimeErrorKind::StackOverflow { depth: 5 }
        );
    }

    #[tokio::test]
    async fn test_empty_name_is_a_no_op() {
        let result = engine().execute("x{}y", options()).await.unwrap();
        assert_eq!(result.content, "xy");
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn test_state_stops_sibling_nodes() {
        let result = engine().execute("a{abort}b{nope}", options()).await.unwrap();
        assert_eq!(result.content, "a");
        assert_eq!(result.state, ExecutionState::Abort);
        assert!(result.errors.is_empty());
    }
}

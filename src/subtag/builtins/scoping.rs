use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::ast::SubtagCall;
use crate::eval::context::ExecutionContext;
use crate::eval::error::{RuntimeError, SubtagError, SubtagResult};
use crate::lock::KeyedLocks;
use crate::subtag::{check_args, parse_bool, OutputSink, Subtag};

const FUNCTION_PREFIX: &str = "func.";

/// `{quiet;[enabled]}` turns quiet mode on (or off) for the rest of the current scope.
pub struct Quiet;

#[async_trait]
impl Subtag for Quiet {
    async fn execute(
        &self,
        ctx: &mut ExecutionContext,
        _name: &str,
        call: &SubtagCall,
        _out: &mut OutputSink,
    ) -> SubtagResult<()> {
        check_args(call, 0, Some(1))?;
        let quiet = if call.args.is_empty() {
            true
        } else {
            let text = ctx.eval_arg(call, 0).await?;
            parse_bool(&text).unwrap_or(true)
        };
        ctx.scopes_mut().local_mut().quiet = quiet;
        Ok(())
    }
}

/// `{fallback;[message]}` sets the text shown in place of errors. Without arguments the
/// fallback is cleared.
pub struct Fallback;

#[async_trait]
impl Subtag for Fallback {
    async fn execute(
        &self,
        ctx: &mut ExecutionContext,
        _name: &str,
        call: &SubtagCall,
        _out: &mut OutputSink,
    ) -> SubtagResult<()> {
        check_args(call, 0, Some(1))?;
        let fallback = if call.args.is_empty() {
            None
        } else {
            Some(ctx.eval_arg(call, 0).await?)
        };
        ctx.scopes_mut().local_mut().fallback = fallback;
        Ok(())
    }
}

/// `{function;name;code}` defines `{func.name}` for the rest of the tag.
pub struct Function;

#[async_trait]
impl Subtag for Function {
    async fn execute(
        &self,
        ctx: &mut ExecutionContext,
        _name: &str,
        call: &SubtagCall,
        _out: &mut OutputSink,
    ) -> SubtagResult<()> {
        check_args(call, 2, Some(2))?;
        let name = ctx.eval_arg(call, 0).await?.trim().to_lowercase();
        let name = name.strip_prefix(FUNCTION_PREFIX).unwrap_or(&name);
        if name.is_empty() {
            return Err(RuntimeError::custom("Must provide a name").into());
        }
        let body = Arc::new(call.args[1].clone());
        ctx.scopes_mut().define_function(name, body);
        Ok(())
    }
}

/// Handles every `{func.<name>;args...}` call. The arguments are exposed to the body as
/// the `params` array.
pub struct CallFunction;

#[async_trait]
impl Subtag for CallFunction {
    async fn execute(
        &self,
        ctx: &mut ExecutionContext,
        name: &str,
        call: &SubtagCall,
        out: &mut OutputSink,
    ) -> SubtagResult<()> {
        let function = name.strip_prefix(FUNCTION_PREFIX).unwrap_or(name);
        let Some(body) = ctx.scopes().function(function) else {
            return Err(RuntimeError::custom(format!("Unknown function {}", function)).into());
        };

        let mut params = Vec::with_capacity(call.args.len());
        for index in 0..call.args.len() {
            params.push(Value::String(ctx.eval_arg(call, index).await?));
        }

        let token = ctx.enter_scope(false);
        ctx.scopes_mut().bind("params", Value::Array(params));
        let result = ctx.eval(&body).await;
        ctx.exit_scope(token);
        out.push(result?);
        Ok(())
    }
}

/// `{lock;read|write;key;code}` evaluates `code` while holding the named lock. Locks are
/// shared by every execution on the same engine.
pub struct Lock {
    locks: Arc<KeyedLocks>,
    timeout: Duration,
}

impl Lock {
    pub fn new(locks: Arc<KeyedLocks>, timeout: Duration) -> Self {
        Self { locks, timeout }
    }
}

#[async_trait]
impl Subtag for Lock {
    async fn execute(
        &self,
        ctx: &mut ExecutionContext,
        _name: &str,
        call: &SubtagCall,
        out: &mut OutputSink,
    ) -> SubtagResult<()> {
        check_args(call, 3, Some(3))?;
        let mode = ctx.eval_arg(call, 0).await?.trim().to_lowercase();
        let key = ctx.eval_arg(call, 1).await?;
        let key = ctx
            .variable_key(key.trim())
            .qualified_id()
            .map_err(|e| SubtagError::Internal(e.to_string()))?;
        let lock_error = |e: crate::lock::LockError| RuntimeError::custom(e.to_string());

        let content = match mode.as_str() {
            "read" => {
                let _guard = self.locks.read(&key, self.timeout).await.map_err(lock_error)?;
                ctx.eval(&call.args[2]).await?
            }
            "write" => {
                let _guard = self.locks.write(&key, self.timeout).await.map_err(lock_error)?;
                ctx.eval(&call.args[2]).await?
            }
            _ => return Err(RuntimeError::custom("Mode must be 'read' or 'write'").into()),
        };
        out.push(content);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::EngineConfig;
    use crate::eval::context::test_support::options;
    use crate::eval::engine::{Engine, ExecutionResult};
    use crate::eval::state::ExecutionState;
    use crate::services::Services;

    fn engine() -> Arc<Engine> {
        Engine::builder(Services::in_memory()).build().unwrap()
    }

    async fn run(source: &str) -> ExecutionResult {
        engine().execute(source, options()).await.unwrap()
    }

    #[tokio::test]
    async fn test_quiet_and_fallback_are_scoped() {
        assert_eq!(run("{fallback;?}{nope}").await.content, "?");
        assert_eq!(run("{fallback;?}{fallback}{nope}").await.content, "`Unknown subtag nope`");
        let result = run("{foreach;i;[1];{fallback;!}{nope}}{nope}").await;
        assert_eq!(result.content, "!`Unknown subtag nope`");
        assert_eq!(result.errors.len(), 2);
    }

    #[tokio::test]
    async fn test_functions_receive_params() {
        let result = run("{function;greet;Hello {get;params;0}!}{func.greet;bob}|{func.Greet;amy}").await;
        assert_eq!(result.content, "Hello bob!|Hello amy!");
    }

    #[tokio::test]
    async fn test_function_prefix_and_unknown_function() {
        assert_eq!(run("{function;func.a;x}{func.a}").await.content, "x");
        assert_eq!(run("{func.missing}").await.content, "`Unknown function missing`");
        assert_eq!(run("{function; ;x}").await.content, "`Must provide a name`");
    }

    #[tokio::test]
    async fn test_unbounded_recursion_aborts() {
        let engine = Engine::builder(Services::in_memory())
            .config(EngineConfig {
                max_stack_depth: 20,
                ..EngineConfig::default()
            })
            .build()
            .unwrap();
        let result = engine
            .execute("{function;r;x{func.r}}{func.r}", options())
            .await
            .unwrap();
        assert_eq!(result.state, ExecutionState::Abort);
        let expected = format!("{}`Terminated recursive tag after 20 execs.`", "x".repeat(20));
        assert_eq!(result.content, expected);
    }

    #[tokio::test]
    async fn test_lock_wraps_code() {
        assert_eq!(run("{lock;write;k;{set;~a;1}{get;~a}}").await.content, "1");
        assert_eq!(
            run("{lock;sideways;k;x}").await.content,
            "`Mode must be 'read' or 'write'`"
        );
    }

    #[tokio::test]
    async fn test_concurrent_writers_serialize() {
        let engine = engine();
        let slow = engine.execute("{lock;write;k;{repeat;a;3}}", options());
        let fast = engine.execute("{lock;write;k;b}", options());
        let (slow, fast) = tokio::join!(slow, fast);
        assert_eq!(slow.unwrap().content, "aaa");
        assert_eq!(fast.unwrap().content, "b");
    }

    #[tokio::test]
    async fn test_lock_entries_released_after_block() {
        let services = Services::in_memory();
        let locks = services.locks.clone();
        let engine = Engine::builder(services).build().unwrap();
        let result = engine
            .execute("{lock;write;a;1}{lock;read;b;2}{lock;write;_c;3}", options())
            .await
            .unwrap();
        assert_eq!(result.content, "123");
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_lock_timeout_is_an_error() {
        let services = Services::in_memory();
        let locks = services.locks.clone();
        let engine = Engine::builder(services)
            .config(EngineConfig {
                lock_timeout: Duration::from_millis(10),
                ..EngineConfig::default()
            })
            .build()
            .unwrap();

        let key = engine
            .create_context(options())
            .await
            .variable_key("k")
            .qualified_id()
            .unwrap();
        let _guard = locks.write(&key, Duration::from_millis(10)).await.unwrap();

        let result = engine.execute("{lock;read;k;x}", options()).await.unwrap();
        assert!(result.content.starts_with("`Timed out waiting for lock"));
    }
}

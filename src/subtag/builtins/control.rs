use async_trait::async_trait;

use crate::ast::SubtagCall;
use crate::eval::context::ExecutionContext;
use crate::eval::error::{RuntimeError, RuntimeErrorKind, SubtagResult};
use crate::eval::state::ExecutionState;
use crate::subtag::{check_args, parse_bool, OutputSink, Subtag};

/// `{break}`
pub struct Break;

#[async_trait]
impl Subtag for Break {
    async fn execute(
        &self,
        ctx: &mut ExecutionContext,
        _name: &str,
        call: &SubtagCall,
        _out: &mut OutputSink,
    ) -> SubtagResult<()> {
        check_args(call, 0, Some(0))?;
        ctx.set_state(ExecutionState::Break);
        Ok(())
    }
}

/// `{continue}`
pub struct Continue;

#[async_trait]
impl Subtag for Continue {
    async fn execute(
        &self,
        ctx: &mut ExecutionContext,
        _name: &str,
        call: &SubtagCall,
        _out: &mut OutputSink,
    ) -> SubtagResult<()> {
        check_args(call, 0, Some(0))?;
        ctx.set_state(ExecutionState::Continue);
        Ok(())
    }
}

/// `{return;[force]}` stops the current tag, or with `force` (the default) every tag
/// up to the root.
pub struct Return;

#[async_trait]
impl Subtag for Return {
    async fn execute(
        &self,
        ctx: &mut ExecutionContext,
        _name: &str,
        call: &SubtagCall,
        _out: &mut OutputSink,
    ) -> SubtagResult<()> {
        check_args(call, 0, Some(1))?;
        let force = if call.args.is_empty() {
            true
        } else {
            let text = ctx.eval_arg(call, 0).await?;
            parse_bool(&text).ok_or_else(|| {
                RuntimeError::new(RuntimeErrorKind::NotABoolean { value: text.clone() })
            })?
        };
        ctx.set_state(if force {
            ExecutionState::ReturnAll
        } else {
            ExecutionState::ReturnLocal
        });
        Ok(())
    }
}

/// `{abort}` ends the whole execution, keeping what was produced so far.
pub struct Abort;

#[async_trait]
impl Subtag for Abort {
    async fn execute(
        &self,
        ctx: &mut ExecutionContext,
        _name: &str,
        call: &SubtagCall,
        _out: &mut OutputSink,
    ) -> SubtagResult<()> {
        check_args(call, 0, Some(0))?;
        ctx.set_state(ExecutionState::Abort);
        Ok(())
    }
}

/// `{throw;[message];[display]}` raises a custom error. In a quiet scope the error
/// renders as nothing unless `display` is given.
pub struct Throw;

#[async_trait]
impl Subtag for Throw {
    async fn execute(
        &self,
        ctx: &mut ExecutionContext,
        _name: &str,
        call: &SubtagCall,
        _out: &mut OutputSink,
    ) -> SubtagResult<()> {
        check_args(call, 0, Some(2))?;
        let message = match ctx.eval_arg(call, 0).await? {
            message if message.is_empty() => "A custom error occurred".to_string(),
            message => message,
        };
        let mut error = RuntimeError::custom(message);
        if call.args.len() > 1 {
            error = error.with_display(ctx.eval_arg(call, 1).await?);
        } else if ctx.scopes().local().quiet {
            error = error.with_display("");
        }
        Err(error.into())
    }
}

#[cfg(test)]
mod tests {
    use crate::eval::context::test_support::options;
    use crate::eval::engine::Engine;
    use crate::eval::state::ExecutionState;
    use crate::services::Services;

    async fn run(source: &str) -> crate::eval::engine::ExecutionResult {
        Engine::builder(Services::in_memory())
            .build()
            .unwrap()
            .execute(source, options())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_throw_renders_inline() {
        let result = run("a{throw;Not a number}b").await;
        assert_eq!(result.content, "a`Not a number`b");
        assert_eq!(result.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_throw_display_and_quiet() {
        assert_eq!(run("{throw;oops;shown}").await.content, "shown");
        assert_eq!(run("{quiet}[{throw;oops}]").await.content, "[]");
        assert_eq!(run("{throw}").await.content, "`A custom error occurred`");
    }

    #[tokio::test]
    async fn test_return_forced_by_default() {
        let result = run("a{return}b").await;
        assert_eq!(result.content, "a");
        assert_eq!(result.state, ExecutionState::ReturnAll);
    }

    #[tokio::test]
    async fn test_local_return_stops_only_the_injected_tag() {
        let result = run(r"a{inject;x\{return\;false\}y}b").await;
        assert_eq!(result.content, "axb");
        assert_eq!(result.state, ExecutionState::Running);
    }

    #[tokio::test]
    async fn test_return_rejects_non_boolean() {
        let result = run("{return;maybe}").await;
        assert_eq!(result.content, "`Not a boolean`");
        assert_eq!(result.state, ExecutionState::Running);
    }

    #[tokio::test]
    async fn test_argument_count_is_checked() {
        assert_eq!(run("{break;x}").await.content, "`Too many arguments`");
    }
}

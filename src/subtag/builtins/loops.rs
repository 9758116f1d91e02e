use async_trait::async_trait;
use serde_json::Value;

use crate::ast::{Statement, SubtagCall};
use crate::eval::context::ExecutionContext;
use crate::eval::error::{RuntimeError, RuntimeErrorKind, SubtagError, SubtagResult};
use crate::eval::state::ExecutionState;
use crate::subtag::{check_args, OutputSink, Subtag};

enum Flow {
    Next,
    Stop,
}

/// Evaluates one pass of a loop body and consumes `Break` and `Continue`.
async fn iteration(
    ctx: &mut ExecutionContext,
    body: &Statement,
    out: &mut OutputSink,
) -> SubtagResult<Flow> {
    out.push(ctx.eval(body).await?);
    let flow = match ctx.state() {
        ExecutionState::Running => Flow::Next,
        ExecutionState::Continue => {
            ctx.set_state(ExecutionState::Running);
            Flow::Next
        }
        ExecutionState::Break => {
            ctx.set_state(ExecutionState::Running);
            Flow::Stop
        }
        _ => Flow::Stop,
    };
    Ok(flow)
}

/// Accepts a JSON array literal or the name of a variable holding one.
async fn resolve_array(ctx: &ExecutionContext, text: &str) -> SubtagResult<Vec<Value>> {
    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(text) {
        return Ok(items);
    }
    match ctx.get_variable(text.trim()).await? {
        Some(Value::Array(items)) => Ok(items),
        Some(Value::String(stored)) => match serde_json::from_str::<Value>(&stored) {
            Ok(Value::Array(items)) => Ok(items),
            _ => Err(not_an_array(text)),
        },
        _ => Err(not_an_array(text)),
    }
}

fn not_an_array(text: &str) -> SubtagError {
    RuntimeError::new(RuntimeErrorKind::NotAnArray {
        value: text.to_string(),
    })
    .into()
}

/// `{foreach;variable;array;code}` evaluates `code` once per element with `variable`
/// bound to it. The binding lives in the loop's own scope.
pub struct ForEach;

#[async_trait]
impl Subtag for ForEach {
    async fn execute(
        &self,
        ctx: &mut ExecutionContext,
        _name: &str,
        call: &SubtagCall,
        out: &mut OutputSink,
    ) -> SubtagResult<()> {
        check_args(call, 3, Some(3))?;
        let variable = ctx.eval_arg(call, 0).await?;
        let source = ctx.eval_arg(call, 1).await?;
        let items = resolve_array(ctx, &source).await?;

        let token = ctx.enter_scope(false);
        let result = each(ctx, &variable, items, &call.args[2], out).await;
        ctx.exit_scope(token);
        result
    }
}

async fn each(
    ctx: &mut ExecutionContext,
    variable: &str,
    items: Vec<Value>,
    body: &Statement,
    out: &mut OutputSink,
) -> SubtagResult<()> {
    for item in items {
        ctx.limit().check(ctx, "foreach:loops")?;
        ctx.step().await;
        ctx.scopes_mut().bind(variable, item);
        if let Flow::Stop = iteration(ctx, body, out).await? {
            break;
        }
    }
    Ok(())
}

/// `{repeat;code;amount}`
pub struct Repeat;

#[async_trait]
impl Subtag for Repeat {
    async fn execute(
        &self,
        ctx: &mut ExecutionContext,
        _name: &str,
        call: &SubtagCall,
        out: &mut OutputSink,
    ) -> SubtagResult<()> {
        check_args(call, 2, Some(2))?;
        let amount = ctx.eval_arg(call, 1).await?;
        let amount: i64 = amount
            .trim()
            .parse()
            .map_err(|_| RuntimeError::not_a_number(amount.clone()))?;
        if amount < 0 {
            return Err(RuntimeError::custom("Can't be negative").into());
        }

        for _ in 0..amount {
            ctx.limit().check(ctx, "repeat:loops")?;
            ctx.step().await;
            if let Flow::Stop = iteration(ctx, &call.args[0], out).await? {
                break;
            }
        }
        Ok(())
    }
}

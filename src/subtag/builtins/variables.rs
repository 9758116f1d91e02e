use async_trait::async_trait;
use serde_json::Value;

use crate::ast::SubtagCall;
use crate::eval::context::ExecutionContext;
use crate::eval::error::{RuntimeError, RuntimeErrorKind, SubtagResult};
use crate::eval::variables::render_value;
use crate::subtag::{check_args, OutputSink, Subtag};

/// `{get;name;[index]}`
pub struct Get;

#[async_trait]
impl Subtag for Get {
    async fn execute(
        &self,
        ctx: &mut ExecutionContext,
        _name: &str,
        call: &SubtagCall,
        out: &mut OutputSink,
    ) -> SubtagResult<()> {
        check_args(call, 1, Some(2))?;
        let name = ctx.eval_arg(call, 0).await?;
        let name = name.trim();
        let value = ctx.get_variable(name).await?;
        if call.args.len() == 1 {
            out.push(value.as_ref().map(render_value).unwrap_or_default());
            return Ok(());
        }

        let index = ctx.eval_arg(call, 1).await?;
        let Some(Value::Array(items)) = value else {
            return Err(RuntimeError::new(RuntimeErrorKind::NotAnArray {
                value: name.to_string(),
            }).into());
        };
        let position: usize = index
            .trim()
            .parse()
            .map_err(|_| RuntimeError::not_a_number(index.clone()))?;
        match items.get(position) {
            Some(item) => out.push(render_value(item)),
            None => return Err(RuntimeError::custom("Index out of range").into()),
        }
        Ok(())
    }
}

/// `{set;name;[value...]}` stores a value, an array of values, or deletes `name` when no
/// value is given.
pub struct Set;

#[async_trait]
impl Subtag for Set {
    async fn execute(
        &self,
        ctx: &mut ExecutionContext,
        _name: &str,
        call: &SubtagCall,
        _out: &mut OutputSink,
    ) -> SubtagResult<()> {
        check_args(call, 1, None)?;
        let name = ctx.eval_arg(call, 0).await?;
        let value = match call.args.len() {
            1 => None,
            2 => {
                let text = ctx.eval_arg(call, 1).await?;
                match serde_json::from_str::<Value>(&text) {
                    Ok(array @ Value::Array(_)) => Some(array),
                    _ => Some(Value::String(text)),
                }
            }
            count => {
                let mut items = Vec::with_capacity(count - 1);
                for index in 1..count {
                    items.push(Value::String(ctx.eval_arg(call, index).await?));
                }
                Some(Value::Array(items))
            }
        };
        ctx.set_variable(name.trim(), value).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use crate::eval::context::test_support::options;
    use crate::eval::engine::{Engine, ExecutionResult};
    use crate::eval::variables::{InMemoryVariableStore, VariableKey, VariableScope};
    use crate::services::Services;

    async fn run_with(store: Arc<InMemoryVariableStore>, source: &str) -> ExecutionResult {
        let services = Services {
            variables: store,
            ..Services::in_memory()
        };
        Engine::builder(services)
            .build()
            .unwrap()
            .execute(source, options())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let store = Arc::new(InMemoryVariableStore::new());
        let result = run_with(store.clone(), "{set;greeting;hi}{get;greeting}").await;
        assert_eq!(result.content, "hi");
        assert!(result.database_committed);

        let key = VariableKey::new(
            VariableScope::Tag {
                tag_name: "test".to_string(),
            },
            "greeting",
        );
        assert_eq!(store.value(&key), Some(json!("hi")));
    }

    #[tokio::test]
    async fn test_padded_names_address_the_same_variable() {
        let store = Arc::new(InMemoryVariableStore::new());
        let result = run_with(store, "{set; a ;1}{get; a }|{get;a}|{set;~t;[\"p\"]}{get; ~t ;0}").await;
        assert_eq!(result.content, "1|1|p");
    }

    #[tokio::test]
    async fn test_arrays_and_indexes() {
        let store = Arc::new(InMemoryVariableStore::new());
        let result = run_with(
            store,
            r#"{set;~a;["x","y"]}{get;~a;1}|{set;~b;p;q}{get;~b}|{get;~a;5}|{get;~a;z}"#,
        )
        .await;
        assert_eq!(
            result.content,
            r#"y|["p","q"]|`Index out of range`|`Not a number`"#
        );
    }

    #[tokio::test]
    async fn test_set_without_value_deletes() {
        let store = Arc::new(InMemoryVariableStore::new());
        let result = run_with(store, "{set;~a;1}{set;~a}[{get;~a}]").await;
        assert_eq!(result.content, "[]");
    }

    #[tokio::test]
    async fn test_temporary_variables_are_not_stored() {
        let store = Arc::new(InMemoryVariableStore::new());
        run_with(store.clone(), "{set;~tmp;1}").await;
        assert_eq!(store.batch_count(), 0);
        assert_eq!(store.fetch_count(), 0);
    }
}

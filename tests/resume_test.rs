mod common;

use std::sync::Arc;

use bbtag::eval::{ExecutionContext, SerializationError, SerializedContext};
use bbtag::services::InMemoryEntities;
use bbtag::{Engine, Services};
use common::options;
use pretty_assertions::assert_eq;

fn engine() -> Arc<Engine> {
    let entities = Arc::new(InMemoryEntities::new());
    let options = options();
    entities.add_message_context(options.guild, options.channel, options.message);
    Engine::builder(Services {
        entities,
        ..Services::in_memory()
    })
    .build()
    .unwrap()
}

#[tokio::test]
async fn test_paused_execution_resumes_from_json() {
    let engine = engine();
    let mut ctx = engine.create_context(options()).await;
    engine
        .run(&mut ctx, "{set;~step;waiting}", false)
        .await
        .unwrap();
    ctx.scopes_mut().local_mut().quiet = true;
    let json = ctx.serialize().await.to_json().unwrap();
    drop(ctx);

    let record = SerializedContext::from_json(&json).unwrap();
    assert!(record.scope.quiet);
    let mut resumed = ExecutionContext::deserialize(&engine, record).await.unwrap();
    let result = engine
        .execute_with(&mut resumed, "{get;~step}[{throw;hidden}]")
        .await
        .unwrap();

    assert_eq!(result.content, "waiting[]");
    assert_eq!(result.errors.len(), 1);
}

#[tokio::test]
async fn test_resume_fails_when_channel_is_gone() {
    let engine = engine();
    let ctx = engine.create_context(options()).await;
    let mut record = ctx.serialize().await;
    record.message.channel_id = "deleted".to_string();

    let error = ExecutionContext::deserialize(&engine, record)
        .await
        .unwrap_err();
    assert!(matches!(error, SerializationError::MissingChannel(id) if id == "deleted"));
}

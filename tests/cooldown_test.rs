mod common;

use std::sync::Arc;
use std::time::Duration;

use bbtag::eval::cooldown::{Clock, InMemoryCooldownManager, ManualClock};
use bbtag::eval::{ContextOptions, ExecutionState};
use bbtag::services::RecordingOutputSender;
use bbtag::subtag::MetricsMiddleware;
use bbtag::{Engine, Services};
use chrono::Utc;
use common::{nest, options, upper};
use pretty_assertions::assert_eq;

struct Fixture {
    engine: Arc<Engine>,
    clock: Arc<ManualClock>,
    output: Arc<RecordingOutputSender>,
    metrics: Arc<MetricsMiddleware>,
}

fn fixture() -> Fixture {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let output = Arc::new(RecordingOutputSender::new());
    let metrics = Arc::new(MetricsMiddleware::new());
    let shared_clock: Arc<dyn Clock> = clock.clone();
    let services = Services {
        cooldowns: Arc::new(InMemoryCooldownManager::new(shared_clock.clone())),
        clock: shared_clock,
        output: output.clone(),
        ..Services::in_memory()
    };
    let engine = Engine::builder(services)
        .subtag(upper())
        .subtag(nest())
        .middleware(metrics.clone())
        .build()
        .unwrap();
    Fixture {
        engine,
        clock,
        output,
        metrics,
    }
}

fn with_cooldown() -> ContextOptions {
    ContextOptions {
        cooldown: Some(Duration::from_secs(5)),
        ..options()
    }
}

#[tokio::test]
async fn test_cooldown_blocks_without_running_subtags() {
    let fixture = fixture();

    let first = fixture
        .engine
        .execute("{upper;hi}", with_cooldown())
        .await
        .unwrap();
    assert_eq!(first.content, "HI");

    fixture.clock.advance(Duration::from_millis(1500));
    let blocked = fixture
        .engine
        .execute("{upper;hi}", with_cooldown())
        .await
        .unwrap();

    assert_eq!(
        blocked.content,
        "`This tag is currently under cooldown. Please try again in 4 seconds.`"
    );
    assert_eq!(blocked.errors.len(), 1);
    assert_eq!(blocked.state, ExecutionState::Running);
    assert_eq!(fixture.metrics.snapshot()["upper"].calls, 1);
    assert_eq!(fixture.output.sent().await.len(), 1);

    let notices = fixture.output.notices().await;
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].0, "c1");
}

#[tokio::test]
async fn test_cooldown_expires() {
    let fixture = fixture();
    fixture
        .engine
        .execute("a", with_cooldown())
        .await
        .unwrap();

    fixture.clock.advance(Duration::from_secs(5));
    let again = fixture
        .engine
        .execute("b", with_cooldown())
        .await
        .unwrap();

    assert_eq!(again.content, "b");
    assert!(fixture.output.notices().await.is_empty());
}

#[tokio::test]
async fn test_nested_runs_ignore_their_own_cooldown() {
    let fixture = fixture();
    let result = fixture
        .engine
        .execute("{nest;3}", with_cooldown())
        .await
        .unwrap();

    assert_eq!(result.content, "done");
    assert!(result.errors.is_empty());
    assert!(fixture.output.notices().await.is_empty());
}

#[tokio::test]
async fn test_cooldowns_are_per_user() {
    let fixture = fixture();
    fixture
        .engine
        .execute("a", with_cooldown())
        .await
        .unwrap();

    let mut other = with_cooldown();
    other.message.author.id = "u2".to_string();
    let result = fixture.engine.execute("b", other).await.unwrap();

    assert_eq!(result.content, "b");
}

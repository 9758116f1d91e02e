#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use bbtag::ast::SubtagCall;
use bbtag::eval::{ContextOptions, ExecutionContext, RuntimeError, SubtagResult};
use bbtag::services::{Channel, Guild, Message, User};
use bbtag::subtag::{check_args, OutputSink, Subtag, SubtagCategory, SubtagDescriptor};
use chrono::Utc;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[ctor::ctor]
fn init_tests() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

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

/// `{nest;n}` runs `{nest;n-1}` as a nested tag until `n` reaches zero.
pub struct Nest;

#[async_trait]
impl Subtag for Nest {
    async fn execute(
        &self,
        ctx: &mut ExecutionContext,
        _name: &str,
        call: &SubtagCall,
        out: &mut OutputSink,
    ) -> SubtagResult<()> {
        check_args(call, 1, Some(1))?;
        let text = ctx.eval_arg(call, 0).await?;
        let depth: u32 = text
            .parse()
            .map_err(|_| RuntimeError::not_a_number(text.clone()))?;
        if depth == 0 {
            out.push("done");
            return Ok(());
        }
        let engine = ctx.engine().clone();
        let code = format!("{{nest;{}}}", depth - 1);
        out.push(engine.run(ctx, &code, true).await?);
        Ok(())
    }
}

pub fn nest() -> SubtagDescriptor {
    SubtagDescriptor::instance("nest", SubtagCategory::Misc, Arc::new(Nest))
}

/// `{upper;text}`
pub struct Upper;

#[async_trait]
impl Subtag for Upper {
    async fn execute(
        &self,
        ctx: &mut ExecutionContext,
        _name: &str,
        call: &SubtagCall,
        out: &mut OutputSink,
    ) -> SubtagResult<()> {
        check_args(call, 1, Some(1))?;
        out.push(ctx.eval_arg(call, 0).await?.to_uppercase());
        Ok(())
    }
}

pub fn upper() -> SubtagDescriptor {
    SubtagDescriptor::instance("upper", SubtagCategory::Simple, Arc::new(Upper))
}

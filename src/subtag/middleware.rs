//! Interceptors around every subtag invocation.
//!
//! Middleware is stored in registration order; the first entry is the outermost layer
//! and the subtag itself is the innermost. Each layer decides whether and when to call
//! [`Next::run`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{OutputSink, Subtag};
use crate::ast::SubtagCall;
use crate::eval::context::ExecutionContext;
use crate::eval::error::SubtagResult;

#[derive(Debug, Clone, Copy)]
pub struct SubtagInvocation<'a> {
    pub name: &'a str,
    pub call: &'a SubtagCall,
}

#[async_trait]
pub trait SubtagMiddleware: Send + Sync {
    async fn handle(
        &self,
        ctx: &mut ExecutionContext,
        invocation: SubtagInvocation<'_>,
        out: &mut OutputSink,
        next: Next<'_>,
    ) -> SubtagResult<()>;
}

/// The remainder of the pipeline.
pub struct Next<'a> {
    middleware: &'a [Arc<dyn SubtagMiddleware>],
    subtag: &'a dyn Subtag,
}

impl<'a> Next<'a> {
    pub fn new(middleware: &'a [Arc<dyn SubtagMiddleware>], subtag: &'a dyn Subtag) -> Self {
        Self { middleware, subtag }
    }

    pub async fn run(
        self,
        ctx: &mut ExecutionContext,
        invocation: SubtagInvocation<'_>,
        out: &mut OutputSink,
    ) -> SubtagResult<()> {
        match self.middleware.split_first() {
            Some((layer, rest)) => {
                let next = Next {
                    middleware: rest,
                    subtag: self.subtag,
                };
                layer.handle(ctx, invocation, out, next).await
            }
            None => {
                self.subtag
                    .execute(ctx, invocation.name, invocation.call, out)
                    .await
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubtagStats {
    pub calls: u64,
    pub failures: u64,
    pub total_time: Duration,
}

/// Counts invocations and accumulates latency per subtag name.
#[derive(Debug, Default)]
pub struct MetricsMiddleware {
    stats: DashMap<String, SubtagStats>,
}

impl MetricsMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> HashMap<String, SubtagStats> {
        self.stats
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}

#[async_trait]
impl SubtagMiddleware for MetricsMiddleware {
    async fn handle(
        &self,
        ctx: &mut ExecutionContext,
        invocation: SubtagInvocation<'_>,
        out: &mut OutputSink,
        next: Next<'_>,
    ) -> SubtagResult<()> {
        let started = Instant::now();
        let result = next.run(ctx, invocation, out).await;
        let elapsed = started.elapsed();

        let mut stats = self.stats.entry(invocation.name.to_string()).or_default();
        stats.calls += 1;
        stats.total_time += elapsed;
        if result.is_err() {
            stats.failures += 1;
        }
        result
    }
}

//! Built-in subtags that drive the engine itself: control flow, loops, variables,
//! scoping and runtime evaluation. Everything else is registered by the host.

pub mod control;
pub mod loops;
pub mod runtime;
pub mod scoping;
pub mod variables;

use std::sync::Arc;

use super::{SubtagCategory, SubtagDescriptor};

pub fn descriptors() -> Vec<SubtagDescriptor> {
    vec![
        SubtagDescriptor::new("get", SubtagCategory::Simple, |_| Arc::new(variables::Get)),
        SubtagDescriptor::new("set", SubtagCategory::Simple, |_| Arc::new(variables::Set)),
        SubtagDescriptor::new("foreach", SubtagCategory::Loops, |_| Arc::new(loops::ForEach)),
        SubtagDescriptor::new("repeat", SubtagCategory::Loops, |_| Arc::new(loops::Repeat))
            .alias("loop"),
        SubtagDescriptor::new("break", SubtagCategory::Simple, |_| Arc::new(control::Break)),
        SubtagDescriptor::new("continue", SubtagCategory::Simple, |_| {
            Arc::new(control::Continue)
        }),
        SubtagDescriptor::new("return", SubtagCategory::Simple, |_| Arc::new(control::Return)),
        SubtagDescriptor::new("abort", SubtagCategory::Simple, |_| Arc::new(control::Abort)),
        SubtagDescriptor::new("throw", SubtagCategory::Simple, |_| Arc::new(control::Throw)),
        SubtagDescriptor::new("quiet", SubtagCategory::Simple, |_| Arc::new(scoping::Quiet)),
        SubtagDescriptor::new("fallback", SubtagCategory::Simple, |_| {
            Arc::new(scoping::Fallback)
        }),
        SubtagDescriptor::new("function", SubtagCategory::Simple, |_| {
            Arc::new(scoping::Function)
        })
        .alias("func"),
        SubtagDescriptor::new("func.", SubtagCategory::Simple, |_| {
            Arc::new(scoping::CallFunction)
        }),
        SubtagDescriptor::new("lock", SubtagCategory::Simple, |deps| {
            Arc::new(scoping::Lock::new(
                deps.services.locks.clone(),
                deps.config.lock_timeout,
            ))
        }),
        SubtagDescriptor::new("inject", SubtagCategory::Misc, |_| Arc::new(runtime::Inject)),
        SubtagDescriptor::new("regexreplace", SubtagCategory::Misc, |_| {
            Arc::new(runtime::RegexReplace)
        }),
        SubtagDescriptor::new("debug", SubtagCategory::Misc, |_| Arc::new(runtime::Debug)),
    ]
}

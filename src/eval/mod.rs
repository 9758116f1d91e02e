//! BBTag Evaluation System
//!
//! The evaluation system turns a parsed [`Statement`](crate::ast::Statement) into the
//! text a tag produces, together with its side effects.
//!
//! # Core Components
//!
//! ## Engine
//! Owns the subtag registry, middleware chain and host services, and walks statements
//! node by node ([`engine`]).
//!
//! ## Execution Context
//! Per-execution state: control-flow state, scopes, call stack, errors, debug trail and
//! shared handles to variables, limits and side effects ([`context`]).
//!
//! ## Variables
//! Read-through, write-behind cache over the host's variable store, flushed in one batch
//! when the outermost tag finishes ([`variables`]).
//!
//! ## Limits and Cooldowns
//! Quotas consulted before every call and loop iteration ([`limits`]), and the per-user
//! cooldown gate checked before a tag runs ([`cooldown`]).
//!
//! ## Stack Growth
//! Statement futures grow the native stack on demand so deep nesting does not depend on
//! the size of the polling thread's stack ([`stack`]).
//!
//! # Evaluation Pipeline
//!
//! 1. [`Engine::execute`] builds a root context and parses the source
//! 2. The engine checks the cooldown and nesting depth, then walks the statement
//! 3. Each call is resolved, checked against the limit and run behind the middleware
//! 4. The outermost run applies output replacement, persists variables and sends output

pub mod context;
pub mod cooldown;
pub mod engine;
pub mod error;
pub mod limits;
pub mod scope;
pub mod serialize;
pub mod side_effects;
pub mod stack;
pub mod state;
pub mod variables;

pub use context::{ContextIdentity, ContextOptions, ExecutionContext, ForkOptions};
pub use engine::{Engine, EngineBuilder, ExecutionResult};
pub use error::{FatalError, LocatedError, RuntimeError, RuntimeErrorKind, SubtagError, SubtagResult};
pub use serialize::{SerializationError, SerializedContext};
pub use state::{DebugEntry, ExecutionState};

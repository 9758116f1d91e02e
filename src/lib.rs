//! # BBTag: a template language for chat bot tags
//!
//! A BBTag script is text with embedded `{subtag;arg;...}` calls. The engine expands the
//! calls left to right into the text the tag replies with, while tracking variables,
//! quotas, cooldowns and the side effects a reply carries.
//!
//! ## Processing Pipeline
//!
//! ```text
//! Source → Tokenizer → Parser → Engine (registry + middleware) → Output
//! ```
//!
//! ### Stage 1: Tokenization
//!
//! The [`tokenizer`] module splits source into braces, separators and text, recording the
//! line and column of every token.
//!
//! ### Stage 2: Parsing
//!
//! The [`parser`] builds the [`ast`]. Malformed input never fails; unbalanced braces
//! degrade to literal text.
//!
//! ### Stage 3: Evaluation
//!
//! The [`eval`] module walks the tree. Subtags are looked up in the [`subtag`] registry and
//! run behind the middleware chain. Recoverable failures are rendered inline and recorded
//! with the source range of the call that raised them.
//!
//! ## Host Integration
//!
//! Storage, cooldowns, platform lookups and message delivery are reached through the
//! traits in [`services`]. [`config`] holds engine settings, and [`lock`] provides the
//! named locks shared between concurrent executions.

pub mod ast;
pub mod config;
pub mod error;
pub mod eval;
pub mod lock;
pub mod parser;
pub mod services;
pub mod subtag;
pub mod tokenizer;

// Re-exports
pub use ast::*;
pub use config::{EngineConfig, LimitConfig};
pub use error::*;
pub use eval::*;
pub use parser::parse;
pub use services::Services;

#[cfg(test)]
mod tests {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    #[ctor::ctor]
    fn init_tests() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .expect("Failed to set tracing subscriber");
    }
}

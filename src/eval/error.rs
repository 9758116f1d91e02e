//! Runtime error model.
//!
//! Subtags report failure through [`SubtagError`]; the engine's catch boundary is a
//! `match` on its variant:
//!
//! * [`SubtagError::Recoverable`] wraps a [`RuntimeError`] that is rendered inline at the
//!   call site and recorded as a [`LocatedError`].
//! * [`SubtagError::Internal`] is logged with full detail and surfaced as an opaque message.
//! * [`SubtagError::Fatal`] escapes the whole execution.

use std::sync::Arc;

use thiserror::Error;

use crate::ast::SubtagCall;
use crate::eval::variables::StoreError;
use crate::services::ServiceError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeErrorKind {
    #[error("Unknown subtag {name}")]
    UnknownSubtag { name: String },
    #[error("{message}")]
    LimitExceeded { rule: String, message: String },
    #[error("Terminated recursive tag after {depth} execs.")]
    StackOverflow { depth: usize },
    #[error(
        "This {} is currently under cooldown. Please try again in {} seconds.",
        cooldown_subject(.is_cc),
        whole_seconds(.remaining_ms)
    )]
    Cooldown { remaining_ms: u64, is_cc: bool },
    #[error("Not a number")]
    NotANumber { value: String },
    #[error("Not an array")]
    NotAnArray { value: String },
    #[error("Not a boolean")]
    NotABoolean { value: String },
    #[error("Not enough arguments")]
    MissingArguments { expected: usize, got: usize },
    #[error("Too many arguments")]
    TooManyArguments { expected: usize, got: usize },
    #[error("{message}")]
    Custom { message: String },
}

fn cooldown_subject(is_cc: &bool) -> &'static str {
    if *is_cc {
        "custom command"
    } else {
        "tag"
    }
}

fn whole_seconds(millis: &u64) -> u64 {
    millis.div_ceil(1000)
}

/// A structured, recoverable runtime failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}")]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    /// Replaces the default `` `message` `` rendering when set. `Some("")` is quiet.
    pub display: Option<String>,
    pub detail: Option<String>,
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind) -> Self {
        Self {
            kind,
            display: None,
            detail: None,
        }
    }

    pub fn custom(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::Custom {
            message: message.into(),
        })
    }

    pub fn not_a_number(value: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::NotANumber {
            value: value.into(),
        })
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn message(&self) -> String {
        self.kind.to_string()
    }
}

impl From<RuntimeErrorKind> for RuntimeError {
    fn from(kind: RuntimeErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Host-level failures that must end the whole execution.
#[derive(Debug, Clone, Error)]
pub enum FatalError {
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("Host failure: {0}")]
    Host(String),
}

#[derive(Debug, Error)]
pub enum SubtagError {
    #[error(transparent)]
    Recoverable(#[from] RuntimeError),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error(transparent)]
    Fatal(#[from] FatalError),
}

pub type SubtagResult<T> = Result<T, SubtagError>;

impl From<RuntimeErrorKind> for SubtagError {
    fn from(kind: RuntimeErrorKind) -> Self {
        SubtagError::Recoverable(RuntimeError::new(kind))
    }
}

impl From<StoreError> for SubtagError {
    fn from(error: StoreError) -> Self {
        SubtagError::Internal(format!("variable store: {}", error))
    }
}

impl From<ServiceError> for SubtagError {
    fn from(error: ServiceError) -> Self {
        SubtagError::Internal(format!("service: {}", error))
    }
}

/// An error together with the call it was raised by. `subtag` is `None` for failures
/// that happen before any call is evaluated (cooldown, stack overflow at entry).
#[derive(Debug, Clone)]
pub struct LocatedError {
    pub subtag: Option<Arc<SubtagCall>>,
    pub error: RuntimeError,
}

impl std::fmt::Display for LocatedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.subtag {
            Some(call) => write!(
                f,
                "{} ({}..{})",
                self.error, call.start, call.end
            ),
            None => write!(f, "{}", self.error),
        }
    }
}

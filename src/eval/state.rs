use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ast::{SourceSpan, SubtagCall};

/// Control-flow state of an execution.
///
/// Anything other than `Running` stops the statement walk at every level until the
/// construct that owns the state consumes it: loops consume `Break` and `Continue`, a
/// tag boundary consumes `ReturnLocal`. `ReturnAll` and `Abort` are never consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, Serialize, Deserialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    #[default]
    Running,
    Break,
    Continue,
    ReturnLocal,
    ReturnAll,
    Abort,
}

impl ExecutionState {
    pub fn is_running(self) -> bool {
        self == ExecutionState::Running
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionState::ReturnAll | ExecutionState::Abort)
    }
}

#[derive(Debug, Clone)]
pub struct CallFrame {
    pub name: String,
    pub call: Arc<SubtagCall>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugEntry {
    pub subtag: Option<String>,
    pub span: Option<SourceSpan>,
    pub text: String,
}

/// Per-execution bookkeeping that is not part of control flow.
#[derive(Debug, Clone, Default)]
pub struct Counters {
    /// Subtag invocations and loop iterations so far.
    pub steps: u64,
    pub yields: u64,
    /// Calls evaluated per subtag name.
    pub invocations: HashMap<String, u32>,
}

//! Lexical scopes.
//!
//! Every tag invocation, loop body and function call runs inside a [`ScopeFrame`].
//! Ambient modifiers (`quiet`, `reason`, `fallback`, `no_lookup_errors`) are copied
//! forward when a frame is pushed, so changing them inside a block never leaks out of it.
//! Loop variables and function parameters live in a frame's `bindings` and are found by
//! walking from the innermost frame outwards; popping the frame discards them.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::ast::Statement;

#[derive(Debug, Clone, Default)]
pub struct ScopeFrame {
    /// Marks a tag boundary: `{return}` unwinds to here and functions are defined here.
    pub is_tag: bool,
    pub quiet: bool,
    pub reason: Option<String>,
    pub fallback: Option<String>,
    pub no_lookup_errors: bool,
    pub bindings: HashMap<String, Value>,
    pub functions: HashMap<String, Arc<Statement>>,
}

impl ScopeFrame {
    pub fn tag() -> Self {
        Self {
            is_tag: true,
            ..Self::default()
        }
    }

    /// A fresh frame that inherits this frame's ambient modifiers.
    pub fn child(&self, is_tag: bool) -> Self {
        Self {
            is_tag,
            quiet: self.quiet,
            reason: self.reason.clone(),
            fallback: self.fallback.clone(),
            no_lookup_errors: self.no_lookup_errors,
            bindings: HashMap::new(),
            functions: HashMap::new(),
        }
    }
}

/// Returned by [`ScopeManager::push`]; hand it back to [`ScopeManager::pop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct ScopeToken {
    depth: usize,
    is_tag: bool,
}

impl ScopeToken {
    pub fn is_tag(&self) -> bool {
        self.is_tag
    }
}

#[derive(Debug, Clone)]
pub struct ScopeManager {
    frames: Vec<ScopeFrame>,
}

impl Default for ScopeManager {
    fn default() -> Self {
        Self::new(ScopeFrame::tag())
    }
}

impl ScopeManager {
    pub fn new(root: ScopeFrame) -> Self {
        Self { frames: vec![root] }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn root(&self) -> &ScopeFrame {
        &self.frames[0]
    }

    /// The innermost frame.
    pub fn local(&self) -> &ScopeFrame {
        self.frames.last().unwrap_or(&self.frames[0])
    }

    pub fn local_mut(&mut self) -> &mut ScopeFrame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    pub fn push(&mut self, is_tag: bool) -> ScopeToken {
        let token = ScopeToken {
            depth: self.frames.len(),
            is_tag,
        };
        let frame = self.local().child(is_tag);
        self.frames.push(frame);
        token
    }

    /// Pops the frame `token` was issued for, together with anything pushed after it.
    /// The root frame is never popped.
    pub fn pop(&mut self, token: ScopeToken) {
        self.frames.truncate(token.depth.max(1));
    }

    pub fn binding(&self, name: &str) -> Option<&Value> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.bindings.get(name))
    }

    /// Binds `name` in the innermost frame, shadowing outer bindings.
    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.local_mut().bindings.insert(name.into(), value);
    }

    /// Overwrites the nearest existing binding of `name`. Returns `false` when no frame
    /// binds it.
    pub fn assign(&mut self, name: &str, value: Value) -> bool {
        match self
            .frames
            .iter_mut()
            .rev()
            .find_map(|frame| frame.bindings.get_mut(name))
        {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Defines a function in the nearest tag frame.
    pub fn define_function(&mut self, name: impl Into<String>, body: Arc<Statement>) {
        let frame = self
            .frames
            .iter_mut()
            .rev()
            .find(|frame| frame.is_tag);
        if let Some(frame) = frame {
            frame.functions.insert(name.into(), body);
        }
    }

    pub fn function(&self, name: &str) -> Option<Arc<Statement>> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.functions.get(name).cloned())
    }
}

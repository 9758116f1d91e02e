//! # BBTag Syntax Tree
//!
//! The parser produces a [`Statement`]: an ordered list of literal text fragments and
//! [`SubtagCall`] nodes. A call's name is itself a statement, so `{{get;name};arg}`
//! resolves the subtag name at runtime.
//!
//! Trees are immutable once built. Calls are reference counted so that the engine can
//! hand the same node to the call stack and to located errors without copying it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A position in the source text. `index` is a byte offset, `line` and `column` are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceMarker {
    pub index: usize,
    pub line: usize,
    pub column: usize,
}

impl SourceMarker {
    pub fn new(index: usize, line: usize, column: usize) -> Self {
        Self {
            index,
            line,
            column,
        }
    }
}

impl std::fmt::Display for SourceMarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A half-open `start..end` range of source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceSpan {
    pub start: SourceMarker,
    pub end: SourceMarker,
}

impl std::fmt::Display for SourceSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementNode {
    Text(String),
    Call(Arc<SubtagCall>),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Statement {
    pub nodes: Vec<StatementNode>,
    pub start: SourceMarker,
    pub end: SourceMarker,
}

impl Statement {
    pub fn new(nodes: Vec<StatementNode>, start: SourceMarker, end: SourceMarker) -> Self {
        Self { nodes, start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the text of a statement that contains no calls.
    pub fn as_literal(&self) -> Option<String> {
        let mut text = String::new();
        for node in &self.nodes {
            match node {
                StatementNode::Text(fragment) => text.push_str(fragment),
                StatementNode::Call(_) => return None,
            }
        }
        Some(text)
    }

    /// Iterates over the calls directly contained in this statement.
    pub fn calls(&self) -> impl Iterator<Item = &Arc<SubtagCall>> {
        self.nodes.iter().filter_map(|node| match node {
            StatementNode::Call(call) => Some(call),
            StatementNode::Text(_) => None,
        })
    }

    pub fn source<'a>(&self, source: &'a str) -> &'a str {
        source.get(self.start.index..self.end.index).unwrap_or_default()
    }
}

// Nesting depth is unbounded, so tear trees down with a worklist instead of recursion.
impl Drop for Statement {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.nodes);
        while let Some(node) = pending.pop() {
            let StatementNode::Call(call) = node else {
                continue;
            };
            if let Ok(mut call) = Arc::try_unwrap(call) {
                pending.append(&mut call.name.nodes);
                for arg in &mut call.args {
                    pending.append(&mut arg.nodes);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubtagCall {
    pub name: Statement,
    pub args: Vec<Statement>,
    pub start: SourceMarker,
    pub end: SourceMarker,
}

impl SubtagCall {
    /// The slice of `source` this call was parsed from, braces included.
    pub fn source<'a>(&self, source: &'a str) -> &'a str {
        source.get(self.start.index..self.end.index).unwrap_or_default()
    }

    /// The name as written, when it does not depend on other calls.
    pub fn static_name(&self) -> Option<String> {
        self.name.as_literal()
    }

    pub fn span(&self) -> SourceSpan {
        SourceSpan {
            start: self.start,
            end: self.end,
        }
    }
}

/// Writes text so that strict parsing reads it back as the same literal.
fn write_escaped(f: &mut std::fmt::Formatter<'_>, text: &str) -> std::fmt::Result {
    for c in text.chars() {
        if matches!(c, '{' | '}' | ';' | '\\') {
            write!(f, "\\")?;
        }
        write!(f, "{}", c)?;
    }
    Ok(())
}

impl std::fmt::Display for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for node in &self.nodes {
            match node {
                StatementNode::Text(text) => write_escaped(f, text)?,
                StatementNode::Call(call) => write!(f, "{}", call)?,
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for SubtagCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}", self.name)?;
        for arg in &self.args {
            write!(f, ";{}", arg)?;
        }
        write!(f, "}}")
    }
}

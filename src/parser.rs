//! # BBTag Parser
//!
//! Builds a [`Statement`] from a token stream. Parsing never fails: malformed input
//! degrades to literal text.
//!
//! The parser is a single left-to-right pass over the tokens with an explicit stack of
//! open calls, so nesting depth is bounded by memory rather than by the thread stack.
//!
//! * `{` opens a call whose first part is the name.
//! * `;` inside a call starts the next argument; outside any call it is text.
//! * `}` closes the innermost open call; outside any call it is text.
//! * A call still open at the end of input is flattened back into its parent as
//!   `{name;arg;...`, keeping any complete calls nested inside it.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::{
    ast::{SourceMarker, Statement, StatementNode, SubtagCall},
    tokenizer::{Token, TokenSpan, Tokenizer},
};

/// Parses `source` into a statement tree.
///
/// `permissive` is used for code that is produced while a script is already running:
/// backslash escapes are not interpreted and whitespace may follow `{`.
#[instrument(level = "debug", skip(source))]
pub fn parse(source: &str, permissive: bool) -> Statement {
    let mut tokenizer = Tokenizer::new(permissive);
    let tokens = tokenizer.tokenize(source);

    let statement = StatementParser::new(tokenizer.position()).run(&tokens);
    debug!(nodes = statement.nodes.len(), "parsed statement");
    statement
}

#[derive(Debug)]
struct StatementBuilder {
    nodes: Vec<StatementNode>,
    start: SourceMarker,
}

impl StatementBuilder {
    fn new(start: SourceMarker) -> Self {
        Self {
            nodes: Vec::new(),
            start,
        }
    }

    fn text(&mut self, text: &str) {
        if let Some(StatementNode::Text(last)) = self.nodes.last_mut() {
            last.push_str(text);
        } else {
            self.nodes.push(StatementNode::Text(text.to_string()));
        }
    }

    fn push(&mut self, node: StatementNode) {
        match node {
            StatementNode::Text(text) => self.text(&text),
            call => self.nodes.push(call),
        }
    }

    fn finish(self, end: SourceMarker) -> Statement {
        Statement::new(self.nodes, self.start, end)
    }
}

#[derive(Debug)]
struct OpenCall {
    start: SourceMarker,
    parts: Vec<StatementBuilder>,
    finished: Vec<Statement>,
}

struct StatementParser {
    root: StatementBuilder,
    open: Vec<OpenCall>,
    end: SourceMarker,
}

impl StatementParser {
    fn new(end: SourceMarker) -> Self {
        Self {
            root: StatementBuilder::new(SourceMarker::new(0, 1, 1)),
            open: Vec::new(),
            end,
        }
    }

    fn current(&mut self) -> &mut StatementBuilder {
        match self.open.last_mut().and_then(|call| call.parts.last_mut()) {
            Some(builder) => builder,
            None => &mut self.root,
        }
    }

    fn run(mut self, tokens: &[TokenSpan]) -> Statement {
        for span in tokens {
            match &span.token {
                Token::Text(text) => self.current().text(text),
                Token::Open => {
                    let start = span.start_marker();
                    self.open.push(OpenCall {
                        start,
                        parts: vec![StatementBuilder::new(after(span))],
                        finished: Vec::new(),
                    });
                }
                Token::Separator => match self.open.last_mut() {
                    Some(call) => {
                        if let Some(part) = call.parts.pop() {
                            call.finished.push(part.finish(span.start_marker()));
                        }
                        call.parts.push(StatementBuilder::new(after(span)));
                    }
                    None => self.root.text(";"),
                },
                Token::Close => match self.open.pop() {
                    Some(mut call) => {
                        if let Some(part) = call.parts.pop() {
                            call.finished.push(part.finish(span.start_marker()));
                        }
                        let mut parts = call.finished.into_iter();
                        let name = parts.next().unwrap_or_default();
                        let call = SubtagCall {
                            name,
                            args: parts.collect(),
                            start: call.start,
                            end: after(span),
                        };
                        self.current().push(StatementNode::Call(Arc::new(call)));
                    }
                    None => self.root.text("}"),
                },
            }
        }

        while let Some(call) = self.open.pop() {
            self.flatten(call);
        }

        let end = self.end;
        self.root.finish(end)
    }

    /// Re-emits an unterminated call into its parent as literal text plus whatever
    /// complete calls it contained.
    fn flatten(&mut self, call: OpenCall) {
        let parts = call
            .finished
            .into_iter()
            .map(|mut statement| std::mem::take(&mut statement.nodes))
            .chain(call.parts.into_iter().map(|builder| builder.nodes));

        let parent = self.current();
        parent.text("{");
        for (index, nodes) in parts.enumerate() {
            if index > 0 {
                parent.text(";");
            }
            for node in nodes {
                parent.push(node);
            }
        }
    }
}

/// Marker for the position right after a single-character token.
fn after(span: &TokenSpan) -> SourceMarker {
    SourceMarker::new(span.end, span.line, span.column + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn only_call(statement: &Statement) -> Arc<SubtagCall> {
        let calls: Vec<_> = statement.calls().cloned().collect();
        assert_eq!(calls.len(), 1, "expected exactly one call in {:?}", statement);
        calls[0].clone()
    }

    #[test]
    fn test_plain_text() {
        let statement = parse("hello world", false);
        assert_eq!(statement.as_literal(), Some("hello world".to_string()));
    }

    #[test]
    fn test_simple_call() {
        let statement = parse("a{get;b;c}d", false);
        assert_eq!(statement.nodes.len(), 3);
        let call = only_call(&statement);
        assert_eq!(call.static_name(), Some("get".to_string()));
        assert_eq!(call.args.len(), 2);
        assert_eq!(call.args[0].as_literal(), Some("b".to_string()));
        assert_eq!(call.args[1].as_literal(), Some("c".to_string()));
        assert_eq!(call.start, SourceMarker::new(1, 1, 2));
        assert_eq!(call.end, SourceMarker::new(10, 1, 11));
        assert_eq!(call.source("a{get;b;c}d"), "{get;b;c}");
    }

    #[test]
    fn test_nested_calls() {
        let source = "{if;{get;x};yes}";
        let statement = parse(source, false);
        let call = only_call(&statement);
        let inner = only_call(&call.args[0]);
        assert_eq!(inner.source(source), "{get;x}");
        assert_eq!(inner.static_name(), Some("get".to_string()));
    }

    #[test]
    fn test_dynamic_name() {
        let statement = parse("{{get;name};x}", false);
        let call = only_call(&statement);
        assert_eq!(call.static_name(), None);
        assert_eq!(call.name.calls().count(), 1);
    }

    #[test]
    fn test_top_level_separators_and_closers_are_text() {
        let statement = parse("a;b}c", false);
        assert_eq!(statement.as_literal(), Some("a;b}c".to_string()));
    }

    #[test]
    fn test_unclosed_call_degrades_to_text() {
        let statement = parse("x{get;a", false);
        assert_eq!(statement.as_literal(), Some("x{get;a".to_string()));
    }

    #[test]
    fn test_unclosed_call_keeps_inner_calls() {
        let source = "{a;{b;c}";
        let statement = parse(source, false);
        assert_eq!(statement.nodes.len(), 2);
        assert_eq!(
            statement.nodes[0],
            StatementNode::Text("{a;".to_string())
        );
        let call = only_call(&statement);
        assert_eq!(call.source(source), "{b;c}");
    }

    #[test]
    fn test_multiline_markers() {
        let source = "line1\n  {x;\ny}";
        let statement = parse(source, false);
        let call = only_call(&statement);
        assert_eq!(call.start, SourceMarker::new(8, 2, 3));
        assert_eq!(call.end.line, 3);
        assert_eq!(call.source(source), "{x;\ny}");
        assert_eq!(statement.end.index, source.len());
    }

    #[test]
    fn test_escapes_only_in_strict_mode() {
        let strict = parse(r"\{x\}", false);
        assert_eq!(strict.as_literal(), Some("{x}".to_string()));

        let permissive = parse(r"\{x}", true);
        assert_eq!(permissive.calls().count(), 1);
    }

    #[test]
    fn test_deep_nesting_parses_and_drops() {
        let depth = 100_000;
        let source = format!("{}{}", "{".repeat(depth), "}".repeat(depth));
        let statement = parse(&source, false);
        let call = only_call(&statement);
        assert_eq!(call.name.calls().count(), 1);
        assert_eq!(call.source(&source), source);
    }

    #[test]
    fn test_empty_call() {
        let statement = parse("{}", false);
        let call = only_call(&statement);
        assert!(call.name.is_empty());
        assert!(call.args.is_empty());
    }

    proptest! {
        #[test]
        fn prop_call_spans_recover_source(
            prefix in "[a-z <>]{0,8}",
            name in "[a-z]{1,8}",
            args in proptest::collection::vec("[a-z0-9 ]{0,6}", 0..4),
            suffix in "[a-z <>]{0,8}",
        ) {
            let mut call_source = format!("{{{}", name);
            for arg in &args {
                call_source.push(';');
                call_source.push_str(arg);
            }
            call_source.push('}');
            let source = format!("{}{}{}", prefix, call_source, suffix);

            let statement = parse(&source, false);
            let calls: Vec<_> = statement.calls().collect();
            prop_assert_eq!(calls.len(), 1);
            prop_assert_eq!(calls[0].source(&source), call_source.as_str());
            prop_assert_eq!(calls[0].args.len(), args.len());
            for (parsed, arg) in calls[0].args.iter().zip(&args) {
                prop_assert_eq!(parsed.source(&source), arg.as_str());
            }
        }
    }
}

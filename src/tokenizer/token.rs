use nom::{
    branch::alt,
    bytes::complete::take_till1,
    character::complete::{char, one_of, satisfy},
    combinator::{map, not, peek, value},
    error::{context, VerboseError},
    sequence::{preceded, terminated},
    IResult,
};

use crate::ast::SourceMarker;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Open,
    Close,
    Separator,
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenSpan {
    pub token: Token,
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

impl TokenSpan {
    pub fn start_marker(&self) -> SourceMarker {
        SourceMarker::new(self.start, self.line, self.column)
    }
}

pub type ParserResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

#[derive(Debug, Clone)]
pub struct Tokenizer {
    permissive: bool,
    current_position: usize,
    current_line: usize,
    current_column: usize,
}

impl Tokenizer {
    pub fn new(permissive: bool) -> Self {
        Self {
            permissive,
            current_position: 0,
            current_line: 1,   // 1-based
            current_column: 1, // 1-based
        }
    }

    /// Marker for the position right after the last consumed token.
    pub fn position(&self) -> SourceMarker {
        SourceMarker::new(
            self.current_position,
            self.current_line,
            self.current_column,
        )
    }

    #[tracing::instrument(level = "debug", skip(self, input))]
    pub fn tokenize(&mut self, input: &str) -> Vec<TokenSpan> {
        let mut tokens = Vec::new();
        let mut remaining = input;

        while !remaining.is_empty() {
            let start_position = self.current_position;
            let start_line = self.current_line;
            let start_column = self.current_column;

            let result = if self.permissive {
                alt((parse_text, parse_open, parse_close, parse_separator))(remaining)
            } else {
                alt((
                    parse_text,
                    parse_escape,
                    parse_strict_open,
                    parse_close,
                    parse_separator,
                ))(remaining)
            };
            // Anything no rule accepts (a stray `\`, `{ ` in strict mode) is a literal char.
            let (new_remaining, token) = result.unwrap_or_else(|_| split_char(remaining));

            let consumed = &remaining[..(remaining.len() - new_remaining.len())];
            self.update_position(consumed);

            tokens.push(TokenSpan {
                token,
                start: start_position,
                end: self.current_position,
                line: start_line,
                column: start_column,
            });

            remaining = new_remaining;
        }

        tokens
    }

    fn update_position(&mut self, text: &str) {
        for c in text.chars() {
            self.current_position += c.len_utf8();
            if c == '\n' {
                self.current_line += 1;
                self.current_column = 1;
            } else {
                self.current_column += 1;
            }
        }
    }
}

fn is_special(c: char) -> bool {
    matches!(c, '{' | '}' | ';' | '\\')
}

fn parse_text(input: &str) -> ParserResult<Token> {
    context(
        "text",
        map(take_till1(is_special), |text: &str| {
            Token::Text(text.to_string())
        }),
    )(input)
}

fn parse_escape(input: &str) -> ParserResult<Token> {
    context(
        "escape",
        map(preceded(char('\\'), one_of("{};\\")), |c: char| {
            Token::Text(c.to_string())
        }),
    )(input)
}

fn parse_open(input: &str) -> ParserResult<Token> {
    context("open", value(Token::Open, char('{')))(input)
}

fn parse_strict_open(input: &str) -> ParserResult<Token> {
    context(
        "open",
        value(
            Token::Open,
            terminated(char('{'), not(peek(satisfy(|c: char| c.is_whitespace())))),
        ),
    )(input)
}

fn parse_close(input: &str) -> ParserResult<Token> {
    context("close", value(Token::Close, char('}')))(input)
}

fn parse_separator(input: &str) -> ParserResult<Token> {
    context("separator", value(Token::Separator, char(';')))(input)
}

fn split_char(input: &str) -> (&str, Token) {
    let mut chars = input.chars();
    let text = chars.next().map(String::from).unwrap_or_default();
    (chars.as_str(), Token::Text(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str, permissive: bool) -> Vec<Token> {
        Tokenizer::new(permissive)
            .tokenize(input)
            .into_iter()
            .map(|span| span.token)
            .collect()
    }

    #[test]
    fn test_basic_call() {
        assert_eq!(
            kinds("{get;a}", false),
            vec![
                Token::Open,
                Token::Text("get".to_string()),
                Token::Separator,
                Token::Text("a".to_string()),
                Token::Close,
            ]
        );
    }

    #[test]
    fn test_strict_escapes() {
        assert_eq!(
            kinds(r"a\{b\;", false),
            vec![
                Token::Text("a".to_string()),
                Token::Text("{".to_string()),
                Token::Text("b".to_string()),
                Token::Text(";".to_string()),
            ]
        );
    }

    #[test]
    fn test_strict_brace_followed_by_whitespace_is_text() {
        assert_eq!(
            kinds("{ x}", false),
            vec![
                Token::Text("{".to_string()),
                Token::Text(" x".to_string()),
                Token::Close,
            ]
        );
    }

    #[test]
    fn test_permissive_keeps_backslashes_and_opens() {
        assert_eq!(
            kinds(r"\{ x}", true),
            vec![
                Token::Text("\\".to_string()),
                Token::Open,
                Token::Text(" x".to_string()),
                Token::Close,
            ]
        );
    }

    #[test]
    fn test_positions() {
        let mut tokenizer = Tokenizer::new(false);
        let tokens = tokenizer.tokenize("ab\n{c}");

        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[0].column, 1);

        let open = &tokens[1];
        assert_eq!(open.token, Token::Open);
        assert_eq!(open.start, 3);
        assert_eq!(open.line, 2);
        assert_eq!(open.column, 1);

        assert_eq!(tokenizer.position(), SourceMarker::new(6, 2, 4));
    }

    #[test]
    fn test_lone_backslash_is_text() {
        assert_eq!(
            kinds("a\\", false),
            vec![Token::Text("a".to_string()), Token::Text("\\".to_string())]
        );
        assert_eq!(
            kinds("\\x", false),
            vec![Token::Text("\\".to_string()), Token::Text("x".to_string())]
        );
    }

    #[test]
    fn test_multibyte_offsets() {
        let tokens = Tokenizer::new(false).tokenize("é{x}");
        assert_eq!(tokens[1].start, 2);
        assert_eq!(tokens[1].column, 2);
    }
}

//! # Tokenizer Component
//!
//! Lexical analysis for BBTag source. The tokenizer splits raw text into the four
//! token kinds the parser cares about: `{`, `}`, `;` and text. Every token carries its
//! byte range and 1-based line/column so that parse nodes can be mapped back to source.
//!
//! Two modes exist:
//!
//! * **strict** (authored scripts): `\{`, `\}`, `\;` and `\\` are escapes for literal
//!   characters, and a `{` directly followed by whitespace is literal text.
//! * **permissive** (code produced at runtime, e.g. `{inject}`): backslashes are plain
//!   text and any `{` opens a call.
//!
//! The tokenizer never rejects input; unmatched characters fall through to text.

pub mod token;

pub use token::{Token, TokenSpan, Tokenizer};

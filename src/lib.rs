//! Ember: front end for a small Rust-like expression language.
//!
//! Pipeline:
//! ```text
//! bytes -> raw tokens -> cooked tokens -> AST -> borrow-checked AST
//!          (lexer::raw)   (lexer)        (parser)  (borrowck)
//! ```
//!
//! The low-level lexer encodes problems as token flags and never fails; the
//! parser aborts on the first syntax error; the borrow checker accumulates
//! violations and the first one is surfaced. A compile is accepted or
//! rejected, never partial.

pub mod borrowck;
pub mod cli;
pub mod error;
pub mod hash;
pub mod lexer;
pub mod parser;
pub mod serialize;

pub use error::{CompileError, Result};
pub use parser::{ParsedProgram, Parser};

use tracing::debug;

/// Compile a source string to a borrow-checked AST.
///
/// The first lexer diagnostic, the first syntax error, or the first borrow
/// violation aborts with a `Line N: <message>` error.
pub fn parse(source: &str) -> Result<ParsedProgram> {
    let (tokens, lex_errors) = lexer::Lexer::tokenize(source);
    debug!(tokens = tokens.len(), "tokenized");
    if let Some(err) = lex_errors.first() {
        return Err(CompileError::parse(err.line, err.message.clone()));
    }
    Parser::new(tokens).parse()
}

/// Compile a source string, discarding the AST.
pub fn check(source: &str) -> Result<()> {
    parse(source).map(|_| ())
}

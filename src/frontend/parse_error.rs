use thiserror::Error;

use crate::frontend::lexer::LexError;
use crate::frontend::token::Loc;

/// Error raised by the parser. Lexer errors encountered while pulling
/// tokens are converted into this type, so the whole front half of the
/// pipeline bubbles a single error channel.
#[derive(Debug, Clone, Error)]
#[error("{line}:{col}: {message}")]
pub struct ParseError {
    pub message: String,
    pub line: u32,
    pub col: u32,
}

impl ParseError {
    pub fn at(loc: Loc, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            line: loc.line,
            col: loc.col,
        }
    }
}

impl From<LexError> for ParseError {
    fn from(err: LexError) -> ParseError {
        ParseError {
            message: err.message,
            line: err.line,
            col: err.col,
        }
    }
}

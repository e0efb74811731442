use thiserror::Error;

use crate::frontend::token::Loc;

/// Error raised by the type checker; carries the location of the node
/// that failed.
#[derive(Debug, Clone, Error)]
#[error("{line}:{col}: {message}")]
pub struct SemaError {
    pub message: String,
    pub line: u32,
    pub col: u32,
}

impl SemaError {
    pub fn at(loc: Loc, message: impl Into<String>) -> SemaError {
        SemaError {
            message: message.into(),
            line: loc.line,
            col: loc.col,
        }
    }
}

//! Parser error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Unexpected token at position {position}: expected {expected}, found {found}")]
    UnexpectedToken {
        position: usize,
        expected: String,
        found: String,
    },

    #[error("Unexpected end of input: expected {expected}")]
    UnexpectedEof { expected: String },

    #[error("Invalid token at position {position}: {text}")]
    InvalidToken { position: usize, text: String },

    #[error("Unclosed delimiter {delimiter} starting at position {position}")]
    UnclosedDelimiter { delimiter: String, position: usize },

    #[error("Invalid syntax at position {position}: {message}")]
    InvalidSyntax { position: usize, message: String },

    #[error("Maximum parsing depth exceeded: depth {depth} exceeds limit of {max_depth}")]
    MaxDepthExceeded { depth: usize, max_depth: usize },

    #[error("Syntax tree error: {0}")]
    Tree(#[from] psyringe_core::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnexpectedToken,
    UnexpectedEof,
    InvalidToken,
    UnclosedDelimiter,
    InvalidSyntax,
    MaxDepthExceeded,
    Tree,
}

impl ParseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ParseError::UnexpectedToken { .. } => ErrorKind::UnexpectedToken,
            ParseError::UnexpectedEof { .. } => ErrorKind::UnexpectedEof,
            ParseError::InvalidToken { .. } => ErrorKind::InvalidToken,
            ParseError::UnclosedDelimiter { .. } => ErrorKind::UnclosedDelimiter,
            ParseError::InvalidSyntax { .. } => ErrorKind::InvalidSyntax,
            ParseError::MaxDepthExceeded { .. } => ErrorKind::MaxDepthExceeded,
            ParseError::Tree(_) => ErrorKind::Tree,
        }
    }

    /// Byte offset in the source the error points at, when known
    pub fn position(&self) -> Option<usize> {
        match self {
            ParseError::UnexpectedToken { position, .. }
            | ParseError::InvalidToken { position, .. }
            | ParseError::UnclosedDelimiter { position, .. }
            | ParseError::InvalidSyntax { position, .. } => Some(*position),
            ParseError::UnexpectedEof { .. }
            | ParseError::MaxDepthExceeded { .. }
            | ParseError::Tree(_) => None,
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;

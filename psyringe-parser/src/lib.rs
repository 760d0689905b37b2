//! Parser for PowerShell-style scripts
//!
//! Produces a [`SyntaxTree`] arena from script source:
//! - Token stream from a logos lexer
//! - Recursive descent with a depth guard against stack exhaustion
//! - Optional recovery mode that keeps broken statements as `Error` nodes

pub mod error;
pub mod lexer;
pub mod parser;


#[cfg(test)]
mod recovery_tests;

pub use error::{ErrorKind, ParseError};
pub use parser::{ParseResult, Parser};

use psyringe_core::ast::SyntaxTree;
use tracing::debug;

/// Parse script source into a syntax tree
pub fn parse(source: &str) -> ParseResult<SyntaxTree> {
    Parser::new(source).parse()
}

/// Parse script source, keeping statements that fail to parse as `Error` nodes.
///
/// The returned list holds every lexer and parser error in source order of discovery.
pub fn parse_recovering(source: &str) -> (SyntaxTree, Vec<ParseError>) {
    let (tree, errors) = Parser::new(source).parse_recovering();
    if !errors.is_empty() {
        debug!(errors = errors.len(), "parsed script with errors");
    }
    (tree, errors)
}

/// Parse with a custom nesting limit
pub fn parse_with_depth_limit(source: &str, max_depth: usize) -> ParseResult<SyntaxTree> {
    Parser::new(source).with_max_depth(max_depth).parse()
}

/// Prefixes `source` with one `using namespace` line per namespace.
///
/// Spans of a tree parsed from the result are offsets into the prepared text; subtract
/// `prepared.len() - source.len()` to map them back.
pub fn prepare<S: AsRef<str>>(source: &str, namespaces: &[S]) -> String {
    let mut prepared = String::with_capacity(source.len() + namespaces.len() * 32);
    for namespace in namespaces {
        prepared.push_str("using namespace ");
        prepared.push_str(namespace.as_ref());
        prepared.push_str(";\n");
    }
    prepared.push_str(source);
    prepared
}

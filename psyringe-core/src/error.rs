//! Error types for syntax tree operations

use thiserror::Error;

use crate::ast::NodeId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Syntax tree node ID overflow: maximum number of nodes reached")]
    NodeIdOverflow,

    #[error("Node {0} does not exist in the syntax tree")]
    MissingNode(NodeId),

    #[error("Syntax tree has no root node")]
    MissingRoot,
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;

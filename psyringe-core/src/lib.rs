//! Core types shared by the PSyringe toolchain
//!
//! This crate provides the syntax tree that the parser produces and that the
//! language layer analyzes, rewrites and prints back to script text:
//! - [`ast::SyntaxTree`], an arena of [`ast::Node`]s addressed by [`ast::NodeId`]
//! - Error types for tree operations

pub mod ast;
pub mod error;

pub use ast::{Node, NodeId, Span, SyntaxTree, TypeName};
pub use error::{Error, Result};

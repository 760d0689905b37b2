//! Error types for the injection pipeline

use psyringe_core::ast::Span;
use psyringe_parser::ParseError;
use std::fmt;
use thiserror::Error;

use crate::vocabulary::Role;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, ScriptError>;

/// Errors that can occur while compiling a script
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    /// The script failed to parse
    #[error("Script syntax error: {0}")]
    ScriptSyntax(#[from] ParseError),

    /// A second startup function was registered
    #[error("Startup function already defined by {existing}; {duplicate} cannot also be the startup function")]
    DuplicateStartup { existing: String, duplicate: String },

    /// An injected parameter belongs to a function that is not an injection site
    #[error("Parameter {parameter} is injected but {owner} is not an injection site")]
    OrphanParameter { parameter: String, owner: String },

    /// One node carries two roles that exclude each other
    #[error("{node} cannot be both {first} and {second}")]
    ConflictingRoles {
        node: String,
        first: Role,
        second: Role,
    },

    /// The builder was used after `build()`
    #[error("Element builder has already been finalized")]
    BuilderFinalized,

    /// The same annotation slot was given by name and by position
    #[error("Conflicting {slot} on {element}: given both by name and by position")]
    ConflictingTarget { element: String, slot: String },

    /// An annotation argument has a value of the wrong form
    #[error("Invalid {argument} on {element}: {reason}")]
    InvalidAnnotationArgument {
        element: String,
        argument: String,
        reason: String,
    },

    /// Required providers that the registry could not resolve
    #[error("Missing required providers: {}", .targets.join(", "))]
    MissingProvider { targets: Vec<String> },

    /// A node could not be turned back into source text
    #[error("Cannot generate source for {kind} at {span}")]
    CodeGeneration { kind: String, span: Span },

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// Arena errors from the syntax tree
    #[error("Syntax tree error: {0}")]
    Tree(#[from] psyringe_core::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ScriptSyntax,
    DuplicateStartup,
    OrphanParameter,
    ConflictingRoles,
    BuilderFinalized,
    ConflictingTarget,
    InvalidAnnotationArgument,
    MissingProvider,
    CodeGeneration,
    Config,
    Tree,
}

impl ScriptError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScriptError::ScriptSyntax(_) => ErrorKind::ScriptSyntax,
            ScriptError::DuplicateStartup { .. } => ErrorKind::DuplicateStartup,
            ScriptError::OrphanParameter { .. } => ErrorKind::OrphanParameter,
            ScriptError::ConflictingRoles { .. } => ErrorKind::ConflictingRoles,
            ScriptError::BuilderFinalized => ErrorKind::BuilderFinalized,
            ScriptError::ConflictingTarget { .. } => ErrorKind::ConflictingTarget,
            ScriptError::InvalidAnnotationArgument { .. } => ErrorKind::InvalidAnnotationArgument,
            ScriptError::MissingProvider { .. } => ErrorKind::MissingProvider,
            ScriptError::CodeGeneration { .. } => ErrorKind::CodeGeneration,
            ScriptError::Config(_) => ErrorKind::Config,
            ScriptError::Tree(_) => ErrorKind::Tree,
        }
    }
}

/// Every error a failed compilation produced. Never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileErrors {
    errors: Vec<ScriptError>,
}

impl CompileErrors {
    /// Wraps a list of errors; `None` when the list is empty
    pub fn new(errors: Vec<ScriptError>) -> Option<Self> {
        if errors.is_empty() {
            None
        } else {
            Some(Self { errors })
        }
    }

    pub fn errors(&self) -> &[ScriptError] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn kinds(&self) -> Vec<ErrorKind> {
        self.errors.iter().map(ScriptError::kind).collect()
    }

    pub fn into_inner(self) -> Vec<ScriptError> {
        self.errors
    }

    /// Wraps the error list of a stage that only fails with at least one error
    pub(crate) fn collected(errors: Vec<ScriptError>) -> Self {
        debug_assert!(!errors.is_empty());
        Self { errors }
    }
}

impl From<ScriptError> for CompileErrors {
    fn from(error: ScriptError) -> Self {
        Self {
            errors: vec![error],
        }
    }
}

impl fmt::Display for CompileErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Compilation failed with {} error(s)", self.errors.len())?;
        for error in &self.errors {
            write!(f, "\n  - {}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileErrors {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;

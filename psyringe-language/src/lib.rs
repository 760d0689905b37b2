//! Dependency injection for PowerShell-style scripts
//!
//! This crate finds the injection annotations in a parsed script, resolves them against a
//! provider registry and prints a rewritten script that fetches every dependency from an
//! explicit context parameter.
//!
//! The stages, in pipeline order:
//! - [`visitor`] classifies annotated nodes against the [`vocabulary`]
//! - [`builder`] assembles a validated [`ScriptDefinition`]
//! - [`target`] works out what each element needs and looks it up in a [`ProviderRegistry`]
//! - [`rewriter`] and [`injection`] produce the rewritten tree
//! - [`codegen`] prints it back to source text
//!
//! [`ScriptCompiler`] runs all of them.

pub mod builder;
pub mod codegen;
pub mod compiler;
pub mod config;
pub mod elements;
pub mod error;
pub mod injection;
pub mod registry;
pub mod rewriter;
pub mod target;
pub mod visitor;
pub mod vocabulary;

pub use builder::ElementBuilder;
pub use codegen::{generate, generate_script};
pub use compiler::{CompiledScript, EntrypointMap, InjectionSiteEntry, ScriptCompiler};
pub use config::{CompilerConfig, ProviderConfig};
pub use elements::{Element, ElementId, InjectionSiteElement, ScriptDefinition};
pub use error::{CompileErrors, ErrorKind, Result, ScriptError};
pub use injection::InjectionRewrite;
pub use registry::{
    InMemoryRegistry, ProviderDescriptor, ProviderHandle, ProviderKey, ProviderLifetime,
    ProviderRegistry,
};
pub use rewriter::{rewrite, rewrite_with, RewriteContext, RewriteRule};
pub use target::{InjectionTarget, ResolvedBinding, TargetResolver, TargetSource};
pub use visitor::{Candidate, ScriptVisitor, VisitResult};
pub use vocabulary::{Marker, Role, Site, PREPARED_NAMESPACES};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::{
        CompileErrors, CompiledScript, CompilerConfig, EntrypointMap, InMemoryRegistry,
        ProviderDescriptor, ProviderKey, ProviderRegistry, ScriptCompiler, ScriptError,
    };
}

//! The compile pipeline: prepare, parse, visit, build, resolve, rewrite, generate

use std::sync::Arc;

use psyringe_core::ast::{Node, NodeId, Span, SyntaxTree};
use psyringe_parser::{parse, prepare, ParseError};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::builder::ElementBuilder;
use crate::codegen::generate_script;
use crate::config::CompilerConfig;
use crate::elements::{declared_variable, node_label, ElementId, ScriptDefinition};
use crate::error::{CompileErrors, Result, ScriptError};
use crate::injection::InjectionRewrite;
use crate::registry::ProviderRegistry;
use crate::rewriter::rewrite_with;
use crate::target::{ResolvedBinding, TargetResolver};
use crate::visitor::visit;

/// An injection site as the executor sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectionSiteEntry {
    pub function: String,
    #[serde(default)]
    pub scope: Option<String>,
    /// Injected parameter names, in declaration order
    #[serde(default)]
    pub parameters: Vec<String>,
}

/// The functions and templates a compiled script exposes to its executor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntrypointMap {
    pub startup: Option<String>,
    pub injection_sites: Vec<InjectionSiteEntry>,
    pub on_error: Vec<String>,
    pub on_loaded: Vec<String>,
    pub before_unload: Vec<String>,
    /// One entry per template, with the name it was registered under
    pub templates: Vec<Option<String>>,
}

impl EntrypointMap {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn injection_site(&self, function: &str) -> Option<&InjectionSiteEntry> {
        self.injection_sites
            .iter()
            .find(|site| site.function.eq_ignore_ascii_case(function))
    }
}

/// Output of a successful compilation
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledScript {
    /// Regenerated source; its first script parameter is the execution context
    pub source: String,
    pub entrypoints: EntrypointMap,
    pub bindings: Vec<ResolvedBinding>,
}

impl CompiledScript {
    /// Provider ids the script fetches, in binding order
    pub fn providers(&self) -> Vec<&str> {
        self.bindings
            .iter()
            .filter_map(|binding| binding.provider.as_ref().map(|p| p.id.as_str()))
            .collect()
    }
}

/// Compiles annotated scripts against a provider registry.
///
/// A compiler holds no per-script state; one instance can compile from several threads.
pub struct ScriptCompiler {
    registry: Arc<dyn ProviderRegistry>,
    config: CompilerConfig,
}

impl ScriptCompiler {
    pub fn new(registry: Arc<dyn ProviderRegistry>, config: CompilerConfig) -> Self {
        Self { registry, config }
    }

    /// A compiler with the default configuration
    pub fn with_registry(registry: Arc<dyn ProviderRegistry>) -> Self {
        Self::new(registry, CompilerConfig::default())
    }

    /// A compiler over a registry holding the configured providers
    pub fn from_config(config: CompilerConfig) -> Self {
        let registry = Arc::new(config.registry());
        Self::new(registry, config)
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Compiles `source`. Either every stage succeeds or all errors of the first failing
    /// stage are returned; a partial script is never produced.
    pub fn compile(&self, source: &str) -> std::result::Result<CompiledScript, CompileErrors> {
        debug!("Compiling script of {} bytes", source.len());
        let prepared = prepare(source, &self.config.namespaces);
        let offset = prepared.len() - source.len();

        let tree = parse(&prepared)
            .map_err(|err| ScriptError::ScriptSyntax(unprepared_parse_error(err, offset)))?;
        let tree = Arc::new(tree);

        let visited = visit(&tree)?;
        let definition =
            ElementBuilder::from_visit(tree, &visited).map_err(CompileErrors::collected)?;

        let resolver =
            TargetResolver::new(&definition).strict_arguments(self.config.strict_arguments);
        let bindings = resolver
            .resolve(&*self.registry)
            .map_err(CompileErrors::collected)?;
        let entrypoints = entrypoints(&resolver, &definition)?;

        let rule = InjectionRewrite::new(
            &definition,
            &bindings,
            self.config.context_variable.as_str(),
            &self.config.namespaces,
        );
        let rewritten = rewrite_with(definition.tree(), &rule)?;
        let source = generate_script(&rewritten).map_err(|err| unprepared_error(err, offset))?;

        debug!(
            "Compiled script: {} element(s), {} binding(s), {} injection site(s)",
            definition.len(),
            bindings.len(),
            entrypoints.injection_sites.len()
        );
        Ok(CompiledScript {
            source,
            entrypoints,
            bindings,
        })
    }
}

fn entrypoints(resolver: &TargetResolver<'_>, definition: &ScriptDefinition) -> Result<EntrypointMap> {
    let tree = definition.tree();
    let function = |id: ElementId| -> String {
        definition
            .element(id)
            .map(|element| function_name(tree, element.node))
            .unwrap_or_else(|| id.to_string())
    };
    let functions = |ids: &[ElementId]| -> Vec<String> { ids.iter().map(|id| function(*id)).collect() };

    let mut injection_sites = Vec::with_capacity(definition.injection_sites().len());
    for site in definition.injection_sites() {
        let parameters = site
            .parameters
            .iter()
            .filter_map(|id| definition.element(*id))
            .filter_map(|element| declared_variable(tree, element.node))
            .map(str::to_string)
            .collect();
        injection_sites.push(InjectionSiteEntry {
            function: function(site.element),
            scope: resolver.site_scope(site)?,
            parameters,
        });
    }

    let templates = definition
        .templates()
        .iter()
        .map(|id| resolver.template_name(*id))
        .collect::<Result<Vec<_>>>()?;

    Ok(EntrypointMap {
        startup: definition.startup().map(&function),
        injection_sites,
        on_error: functions(definition.on_error()),
        on_loaded: functions(definition.on_loaded()),
        before_unload: functions(definition.before_unload()),
        templates,
    })
}

fn function_name(tree: &SyntaxTree, id: NodeId) -> String {
    match tree.get_node(id) {
        Some(Node::FunctionDefinition { name, .. }) => name.clone(),
        _ => node_label(tree, id),
    }
}

/// Maps positions in the prepared text back to the caller's source
fn unprepared_parse_error(err: ParseError, offset: usize) -> ParseError {
    match err {
        ParseError::UnexpectedToken {
            position,
            expected,
            found,
        } => ParseError::UnexpectedToken {
            position: position.saturating_sub(offset),
            expected,
            found,
        },
        ParseError::InvalidToken { position, text } => ParseError::InvalidToken {
            position: position.saturating_sub(offset),
            text,
        },
        ParseError::UnclosedDelimiter {
            delimiter,
            position,
        } => ParseError::UnclosedDelimiter {
            delimiter,
            position: position.saturating_sub(offset),
        },
        ParseError::InvalidSyntax { position, message } => ParseError::InvalidSyntax {
            position: position.saturating_sub(offset),
            message,
        },
        other => other,
    }
}

fn unprepared_error(err: ScriptError, offset: usize) -> ScriptError {
    match err {
        ScriptError::CodeGeneration { kind, span } => ScriptError::CodeGeneration {
            kind,
            span: Span::new(
                span.start.saturating_sub(offset),
                span.end.saturating_sub(offset),
            ),
        },
        other => other,
    }
}

#[cfg(test)]
#[path = "compiler_tests.rs"]
mod tests;

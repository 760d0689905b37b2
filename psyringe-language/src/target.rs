//! Injection targets: what each annotation asks for, and whether the registry has it
//!
//! A target comes from, in order of precedence:
//! 1. the named `Target` argument
//! 2. the first positional argument
//! 3. the declaration's type constraint
//! 4. the declared variable's name
//!
//! Giving the same slot both by name and by position is an error rather than a silent
//! choice. The same rule covers `Optional` (position 1) and an injection site's `Scope`
//! (position 0).

use psyringe_core::ast::{Node, NodeId, SyntaxTree};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::elements::{declared_variable, Element, ElementId, InjectionSiteElement, ScriptDefinition};
use crate::error::{Result, ScriptError};
use crate::registry::{ProviderHandle, ProviderKey, ProviderRegistry};
use crate::vocabulary::Role;

/// Where a target's key came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetSource {
    Named,
    Positional,
    TypeConstraint,
    DeclarationName,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectionTarget {
    pub key: ProviderKey,
    pub source: TargetSource,
    /// An optional target without a provider keeps its declared default
    pub optional: bool,
    /// Scope of the injection site, for parameters of a scoped site
    pub scope: Option<String>,
    pub connection_string: Option<String>,
}

/// An injectable element with its target and the provider found for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBinding {
    pub element: ElementId,
    pub target: InjectionTarget,
    pub provider: Option<ProviderHandle>,
}

impl ResolvedBinding {
    pub fn is_resolved(&self) -> bool {
        self.provider.is_some()
    }
}

enum Slot {
    Named(Option<NodeId>),
    Positional(NodeId),
}

enum Value {
    Text(String),
    Type(String),
    Flag(bool),
}

/// Arguments of one annotation
struct Arguments<'t> {
    element: String,
    positional: &'t [NodeId],
    named: Vec<(&'t str, Option<NodeId>)>,
}

impl<'t> Arguments<'t> {
    fn slot(&self, name: &str, position: Option<usize>) -> Result<Option<Slot>> {
        let named = self
            .named
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, value)| *value);
        let positional = position.and_then(|i| self.positional.get(i)).copied();

        match (named, positional) {
            (Some(_), Some(_)) => Err(ScriptError::ConflictingTarget {
                element: self.element.clone(),
                slot: name.to_string(),
            }),
            (Some(value), None) => Ok(Some(Slot::Named(value))),
            (None, Some(node)) => Ok(Some(Slot::Positional(node))),
            (None, None) => Ok(None),
        }
    }

    fn value(&self, tree: &SyntaxTree, slot: &Slot, argument: &str) -> Result<Value> {
        let node = match slot {
            Slot::Named(None) => return Ok(Value::Flag(true)),
            Slot::Named(Some(node)) | Slot::Positional(node) => *node,
        };

        match tree.node(node)? {
            Node::StringConstant { value, .. } => Ok(Value::Text(value.clone())),
            Node::TypeExpression { type_name } => Ok(Value::Type(type_name.full_name())),
            Node::Variable {
                path,
                splatted: false,
            } if path.eq_ignore_ascii_case("true") => Ok(Value::Flag(true)),
            Node::Variable {
                path,
                splatted: false,
            } if path.eq_ignore_ascii_case("false") => Ok(Value::Flag(false)),
            Node::Number { text } => Ok(Value::Flag(
                text.parse::<f64>().map(|n| n != 0.0).unwrap_or(true),
            )),
            other => Err(self.invalid(argument, format!("unsupported {} value", other.kind_name()))),
        }
    }

    fn invalid(&self, argument: &str, reason: impl Into<String>) -> ScriptError {
        ScriptError::InvalidAnnotationArgument {
            element: self.element.clone(),
            argument: argument.to_string(),
            reason: reason.into(),
        }
    }
}

/// Named arguments each role understands
fn known_arguments(role: Role) -> &'static [&'static str] {
    match role {
        Role::InjectDatabase => &["Target", "Optional", "ConnectionString"],
        Role::InjectVariable | Role::InjectSecret | Role::InjectConstant | Role::InjectParameter => {
            &["Target", "Optional"]
        }
        Role::InjectionSite => &["Scope"],
        Role::InjectTemplate => &["Target"],
        Role::Startup | Role::OnError | Role::OnLoaded | Role::BeforeUnload => &[],
    }
}

fn positional_slots(role: Role) -> usize {
    match role {
        Role::InjectVariable
        | Role::InjectSecret
        | Role::InjectDatabase
        | Role::InjectConstant
        | Role::InjectParameter => 2,
        Role::InjectionSite | Role::InjectTemplate => 1,
        Role::Startup | Role::OnError | Role::OnLoaded | Role::BeforeUnload => 0,
    }
}

/// First type constraint on a parameter or along an attribute/convert chain
fn type_constraint(tree: &SyntaxTree, node: NodeId) -> Option<String> {
    let constraint_name = |id: &NodeId| match tree.get_node(*id) {
        Some(Node::TypeConstraint { type_name }) => Some(type_name.full_name()),
        _ => None,
    };

    if let Some(Node::Parameter { attributes, .. }) = tree.get_node(node) {
        return attributes.iter().find_map(constraint_name);
    }
    let mut current = node;
    loop {
        match tree.get_node(current)? {
            Node::AttributedExpression { child, .. } => current = *child,
            Node::Convert {
                type_constraint,
                child,
            } => match constraint_name(type_constraint) {
                Some(name) => return Some(name),
                None => current = *child,
            },
            _ => return None,
        }
    }
}

pub struct TargetResolver<'d> {
    definition: &'d ScriptDefinition,
    strict_arguments: bool,
}

impl<'d> TargetResolver<'d> {
    pub fn new(definition: &'d ScriptDefinition) -> Self {
        Self {
            definition,
            strict_arguments: false,
        }
    }

    /// Treat unknown annotation arguments as errors instead of warnings
    pub fn strict_arguments(mut self, strict: bool) -> Self {
        self.strict_arguments = strict;
        self
    }

    /// Target of an injectable element
    pub fn target_for(&self, element: &Element, scope: Option<&str>) -> Result<InjectionTarget> {
        let tree = self.definition.tree();
        let args = self.arguments(element)?;

        let (key, source) = match args.slot("Target", Some(0))? {
            Some(slot) => {
                let source = match slot {
                    Slot::Named(_) => TargetSource::Named,
                    Slot::Positional(_) => TargetSource::Positional,
                };
                let key = match args.value(tree, &slot, "Target")? {
                    Value::Text(name) => ProviderKey::Name(name),
                    Value::Type(type_name) => ProviderKey::Type(type_name),
                    Value::Flag(_) => {
                        return Err(args.invalid("Target", "expected a provider name or type"))
                    }
                };
                (key, source)
            }
            None => self.inferred_key(element, &args)?,
        };

        let optional = match args.slot("Optional", Some(1))? {
            Some(slot) => match args.value(tree, &slot, "Optional")? {
                Value::Flag(flag) => flag,
                _ => return Err(args.invalid("Optional", "expected $true or $false")),
            },
            None => false,
        };

        let connection_string = if element.role == Role::InjectDatabase {
            match args.slot("ConnectionString", None)? {
                Some(slot) => match args.value(tree, &slot, "ConnectionString")? {
                    Value::Text(text) => Some(text),
                    _ => return Err(args.invalid("ConnectionString", "expected a string")),
                },
                None => None,
            }
        } else {
            None
        };

        Ok(InjectionTarget {
            key,
            source,
            optional,
            scope: scope.map(str::to_string),
            connection_string,
        })
    }

    /// Scope string of an injection site, if it declares one
    pub fn site_scope(&self, site: &InjectionSiteElement) -> Result<Option<String>> {
        let element = self.element(site.element)?;
        self.text_slot(element, "Scope")
    }

    /// Name a template was registered under, if any
    pub fn template_name(&self, id: ElementId) -> Result<Option<String>> {
        let element = self.element(id)?;
        self.text_slot(element, "Target")
    }

    /// Targets of every injectable element, or every error found while reading them
    pub fn targets(&self) -> std::result::Result<Vec<(ElementId, InjectionTarget)>, Vec<ScriptError>> {
        let definition = self.definition;
        let mut targets = Vec::new();
        let mut errors = Vec::new();

        for site in definition.injection_sites() {
            let scope = match self.site_scope(site) {
                Ok(scope) => scope,
                Err(err) => {
                    errors.push(err);
                    continue;
                }
            };
            for parameter in &site.parameters {
                match self
                    .element(*parameter)
                    .and_then(|element| self.target_for(element, scope.as_deref()))
                {
                    Ok(target) => targets.push((*parameter, target)),
                    Err(err) => errors.push(err),
                }
            }
        }

        for variable in definition.variables() {
            match self
                .element(*variable)
                .and_then(|element| self.target_for(element, None))
            {
                Ok(target) => targets.push((*variable, target)),
                Err(err) => errors.push(err),
            }
        }

        for template in definition.templates() {
            if let Err(err) = self.template_name(*template) {
                errors.push(err);
            }
        }

        let lifecycle = definition
            .startup()
            .into_iter()
            .chain(definition.on_error().iter().copied())
            .chain(definition.on_loaded().iter().copied())
            .chain(definition.before_unload().iter().copied());
        for id in lifecycle {
            if let Err(err) = self.element(id).and_then(|element| self.arguments(element)) {
                errors.push(err);
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }
        targets.sort_by_key(|(id, _)| *id);
        Ok(targets)
    }

    /// Looks every target up in `registry`.
    ///
    /// All required targets without a provider are reported together in one
    /// `MissingProvider` error.
    pub fn resolve(
        &self,
        registry: &dyn ProviderRegistry,
    ) -> std::result::Result<Vec<ResolvedBinding>, Vec<ScriptError>> {
        let targets = self.targets()?;
        let mut bindings = Vec::with_capacity(targets.len());
        let mut missing: Vec<String> = Vec::new();

        for (element, target) in targets {
            let provider = registry.resolve(&target.key, target.scope.as_deref());
            match &provider {
                Some(handle) => debug!("Resolved {} to provider {}", target.key, handle.id),
                None if target.optional => {
                    debug!("No provider for optional {}; keeping its default", target.key)
                }
                None => {
                    let id = target.key.to_string();
                    if !missing.contains(&id) {
                        missing.push(id);
                    }
                }
            }
            bindings.push(ResolvedBinding {
                element,
                target,
                provider,
            });
        }

        if !missing.is_empty() {
            return Err(vec![ScriptError::MissingProvider { targets: missing }]);
        }
        Ok(bindings)
    }

    fn element(&self, id: ElementId) -> Result<&'d Element> {
        self.definition
            .element(id)
            .ok_or_else(|| ScriptError::InvalidAnnotationArgument {
                element: id.to_string(),
                argument: "element".to_string(),
                reason: "not part of this script".to_string(),
            })
    }

    fn text_slot(&self, element: &Element, name: &str) -> Result<Option<String>> {
        let args = self.arguments(element)?;
        match args.slot(name, Some(0))? {
            Some(slot) => match args.value(self.definition.tree(), &slot, name)? {
                Value::Text(text) => Ok(Some(text)),
                _ => Err(args.invalid(name, "expected a string")),
            },
            None => Ok(None),
        }
    }

    fn arguments(&self, element: &Element) -> Result<Arguments<'d>> {
        let tree = self.definition.tree();
        let label = crate::elements::node_label(tree, element.node);
        let Node::Attribute {
            positional, named, ..
        } = tree.node(element.annotation)?
        else {
            return Err(ScriptError::InvalidAnnotationArgument {
                element: label,
                argument: "annotation".to_string(),
                reason: "not an attribute".to_string(),
            });
        };

        let mut pairs = Vec::with_capacity(named.len());
        for id in named {
            if let Node::NamedArgument { name, value } = tree.node(*id)? {
                pairs.push((name.as_str(), *value));
            }
        }
        let args = Arguments {
            element: label,
            positional,
            named: pairs,
        };

        let known = known_arguments(element.role);
        for (name, _) in &args.named {
            if !known.iter().any(|k| k.eq_ignore_ascii_case(name)) {
                self.unknown_argument(&args, name)?;
            }
        }
        let slots = positional_slots(element.role);
        if args.positional.len() > slots {
            self.unknown_argument(&args, &format!("positional argument {}", slots + 1))?;
        }
        Ok(args)
    }

    fn unknown_argument(&self, args: &Arguments<'_>, argument: &str) -> Result<()> {
        if self.strict_arguments {
            return Err(args.invalid(argument, "unknown argument"));
        }
        warn!("Ignoring unknown argument {} on {}", argument, args.element);
        Ok(())
    }

    fn inferred_key(&self, element: &Element, args: &Arguments<'_>) -> Result<(ProviderKey, TargetSource)> {
        let tree = self.definition.tree();
        if let Some(type_name) = type_constraint(tree, element.node) {
            return Ok((ProviderKey::Type(type_name), TargetSource::TypeConstraint));
        }
        match declared_variable(tree, element.node) {
            Some(path) => {
                let name = path.rsplit(':').next().unwrap_or(path);
                Ok((ProviderKey::Name(name.to_string()), TargetSource::DeclarationName))
            }
            None => Err(args.invalid("Target", "no target given and none can be inferred")),
        }
    }
}

#[cfg(test)]
#[path = "target_tests.rs"]
mod tests;

//! The rewrite that turns an annotated script into one that fetches its dependencies
//!
//! - resolved declarations become `$<ctx>.<Fetch>('<id>'[, '<scope>'])` assignments
//! - resolved site parameters get the fetch as their default value
//! - every vocabulary attribute is stripped, so unresolved optional declarations keep
//!   their written default
//! - the prepared `using namespace` lines are dropped
//! - the root script gains a leading `$<ctx>` parameter

use psyringe_core::ast::{AssignmentOperator, Node, NodeId, StringKind, SyntaxTree, UsingKind};
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::elements::{declared_variable, ScriptDefinition};
use crate::error::Result;
use crate::rewriter::{RewriteContext, RewriteRule};
use crate::target::ResolvedBinding;
use crate::vocabulary::{Marker, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    /// Replaces a declaring statement with `$name = fetch`
    Statement,
    /// Replaces an attribute chain used inside a larger expression
    Expression,
    /// Becomes a parameter's default value
    Parameter,
}

#[derive(Debug, Clone)]
struct Fetch {
    method: &'static str,
    variable: Option<String>,
    arguments: Vec<String>,
    placement: Placement,
}

/// Rewrite rule applying resolved bindings to a script tree
pub struct InjectionRewrite {
    context_variable: String,
    namespaces: Vec<String>,
    root: Option<NodeId>,
    fetches: FxHashMap<NodeId, Fetch>,
}

impl InjectionRewrite {
    pub fn new(
        definition: &ScriptDefinition,
        bindings: &[ResolvedBinding],
        context_variable: impl Into<String>,
        namespaces: &[String],
    ) -> Self {
        let tree = definition.tree();
        let mut fetches = FxHashMap::default();

        for binding in bindings {
            let (Some(provider), Some(element)) =
                (binding.provider.as_ref(), definition.element(binding.element))
            else {
                continue;
            };
            let Some(method) = element.role.fetch_method() else {
                continue;
            };

            let (node, placement) = match (element.role, element.declaration) {
                (Role::InjectParameter, _) => (element.node, Placement::Parameter),
                (_, Some(declaration)) => (declaration, Placement::Statement),
                (_, None) => (element.node, Placement::Expression),
            };

            let mut arguments = vec![provider.id.clone()];
            arguments.extend(binding.target.scope.iter().cloned());
            arguments.extend(binding.target.connection_string.iter().cloned());

            trace!("Injecting {} into {} with {}", provider.id, node, method);
            fetches.insert(
                node,
                Fetch {
                    method,
                    variable: declared_variable(tree, element.node).map(str::to_string),
                    arguments,
                    placement,
                },
            );
        }

        Self {
            context_variable: context_variable.into(),
            namespaces: namespaces.to_vec(),
            root: tree.root().ok(),
            fetches,
        }
    }

    fn is_marker(tree: &SyntaxTree, attribute: NodeId) -> bool {
        matches!(
            tree.get_node(attribute),
            Some(Node::Attribute { type_name, .. })
                if Marker::from_attribute_name(&type_name.full_name()).is_some()
        )
    }

    fn has_markers(tree: &SyntaxTree, attributes: &[NodeId]) -> bool {
        attributes.iter().any(|a| Self::is_marker(tree, *a))
    }

    fn kept_attributes(ctx: &mut RewriteContext<'_>, attributes: &[NodeId]) -> Result<Vec<NodeId>> {
        let source = ctx.source();
        attributes
            .iter()
            .filter(|a| !Self::is_marker(source, **a))
            .map(|a| ctx.rewrite(*a))
            .collect()
    }

    fn is_prepared_using(&self, tree: &SyntaxTree, using: NodeId) -> bool {
        matches!(
            tree.get_node(using),
            Some(Node::UsingStatement { kind: UsingKind::Namespace, name })
                if self.namespaces.iter().any(|n| n.eq_ignore_ascii_case(name))
        )
    }

    /// `$<ctx>.<Method>('<arg>', ...)`
    fn fetch_call(&self, ctx: &mut RewriteContext<'_>, fetch: &Fetch) -> Result<NodeId> {
        let target = ctx.add(Node::Variable {
            path: self.context_variable.clone(),
            splatted: false,
        })?;
        let member = ctx.add(Node::StringConstant {
            value: fetch.method.to_string(),
            kind: StringKind::BareWord,
        })?;
        let arguments = fetch
            .arguments
            .iter()
            .map(|value| {
                ctx.add(Node::StringConstant {
                    value: value.clone(),
                    kind: StringKind::SingleQuoted,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        ctx.add(Node::InvokeMember {
            target,
            member,
            arguments,
            is_static: false,
            null_conditional: false,
        })
    }

    fn context_parameter(&self, ctx: &mut RewriteContext<'_>) -> Result<NodeId> {
        let name = ctx.add(Node::Variable {
            path: self.context_variable.clone(),
            splatted: false,
        })?;
        ctx.add(Node::Parameter {
            attributes: Vec::new(),
            name,
            default_value: None,
        })
    }

    fn root_param_block(&self, ctx: &mut RewriteContext<'_>, existing: Option<NodeId>) -> Result<NodeId> {
        let context = self.context_parameter(ctx)?;
        let Some(existing) = existing else {
            return ctx.add(Node::ParamBlock {
                attributes: Vec::new(),
                parameters: vec![context],
            });
        };

        let Node::ParamBlock {
            attributes,
            parameters,
        } = ctx.source().node(existing)?
        else {
            return ctx.rebuild(existing);
        };
        let attributes = Self::kept_attributes(ctx, attributes)?;
        let mut all = vec![context];
        all.extend(ctx.rewrite_all(parameters)?);
        ctx.add_like(
            Node::ParamBlock {
                attributes,
                parameters: all,
            },
            existing,
        )
    }

    fn apply_fetch(
        &self,
        ctx: &mut RewriteContext<'_>,
        id: NodeId,
        node: &Node,
        fetch: &Fetch,
    ) -> Result<Option<NodeId>> {
        let call = self.fetch_call(ctx, fetch)?;
        match fetch.placement {
            Placement::Expression => Ok(Some(call)),
            Placement::Statement => {
                let Some(path) = &fetch.variable else {
                    return Ok(Some(call));
                };
                let left = ctx.add(Node::Variable {
                    path: path.clone(),
                    splatted: false,
                })?;
                let expression = ctx.add(Node::CommandExpression { expression: call })?;
                let right = ctx.add(Node::Pipeline {
                    elements: vec![expression],
                })?;
                ctx.add_like(
                    Node::Assignment {
                        left,
                        operator: AssignmentOperator::Assign,
                        right,
                    },
                    id,
                )
                .map(Some)
            }
            Placement::Parameter => {
                let Node::Parameter {
                    attributes, name, ..
                } = node
                else {
                    return Ok(None);
                };
                let attributes = Self::kept_attributes(ctx, attributes)?;
                let name = ctx.rewrite(*name)?;
                ctx.add_like(
                    Node::Parameter {
                        attributes,
                        name,
                        default_value: Some(call),
                    },
                    id,
                )
                .map(Some)
            }
        }
    }
}

impl RewriteRule for InjectionRewrite {
    fn matches(&self, tree: &SyntaxTree, id: NodeId, node: &Node) -> bool {
        if self.fetches.contains_key(&id) || self.root == Some(id) {
            return true;
        }
        match node {
            Node::ParamBlock { attributes, .. } | Node::Parameter { attributes, .. } => {
                Self::has_markers(tree, attributes)
            }
            Node::AttributedExpression { attribute, .. } => Self::is_marker(tree, *attribute),
            _ => false,
        }
    }

    fn replace(&self, ctx: &mut RewriteContext<'_>, id: NodeId, node: &Node) -> Result<Option<NodeId>> {
        if let Some(fetch) = self.fetches.get(&id) {
            return self.apply_fetch(ctx, id, node, fetch);
        }

        match node {
            Node::ScriptBlock {
                usings,
                param_block,
                blocks,
            } if self.root == Some(id) => {
                let source = ctx.source();
                let usings: Vec<NodeId> = usings
                    .iter()
                    .copied()
                    .filter(|u| !self.is_prepared_using(source, *u))
                    .collect();
                let usings = ctx.rewrite_all(&usings)?;
                let param_block = self.root_param_block(ctx, *param_block)?;
                let blocks = ctx.rewrite_all(blocks)?;
                ctx.add_like(
                    Node::ScriptBlock {
                        usings,
                        param_block: Some(param_block),
                        blocks,
                    },
                    id,
                )
                .map(Some)
            }
            Node::ParamBlock {
                attributes,
                parameters,
            } => {
                let attributes = Self::kept_attributes(ctx, attributes)?;
                let parameters = ctx.rewrite_all(parameters)?;
                ctx.add_like(
                    Node::ParamBlock {
                        attributes,
                        parameters,
                    },
                    id,
                )
                .map(Some)
            }
            Node::Parameter {
                attributes,
                name,
                default_value,
            } => {
                let attributes = Self::kept_attributes(ctx, attributes)?;
                let name = ctx.rewrite(*name)?;
                let default_value = ctx.rewrite_opt(*default_value)?;
                ctx.add_like(
                    Node::Parameter {
                        attributes,
                        name,
                        default_value,
                    },
                    id,
                )
                .map(Some)
            }
            Node::AttributedExpression { child, .. } => ctx.rewrite(*child).map(Some),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
#[path = "injection_tests.rs"]
mod tests;

//! Script elements: annotated nodes classified by role
//!
//! Elements never own syntax; they hold [`NodeId`]s into the shared tree of their
//! [`ScriptDefinition`].

use psyringe_core::ast::{Node, NodeId, SyntaxTree};
use std::fmt;
use std::sync::Arc;

use crate::vocabulary::Role;

/// Index of an element within its definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub(crate) u32);

impl ElementId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// An annotated node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub role: Role,
    /// The annotated node: a function, a parameter, an attribute chain or a script block
    pub node: NodeId,
    /// The attribute that gave the node its role
    pub annotation: NodeId,
    /// Statement or parameter that declares the injected variable, if any
    pub declaration: Option<NodeId>,
}

/// An injection site function and the parameters injected into it, in declaration order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionSiteElement {
    pub element: ElementId,
    pub parameters: Vec<ElementId>,
}

/// Every element found in one script, grouped by role
#[derive(Debug, Clone)]
pub struct ScriptDefinition {
    pub(crate) tree: Arc<SyntaxTree>,
    pub(crate) elements: Vec<Element>,
    pub(crate) injection_sites: Vec<InjectionSiteElement>,
    pub(crate) startup: Option<ElementId>,
    pub(crate) variables: Vec<ElementId>,
    pub(crate) templates: Vec<ElementId>,
    pub(crate) on_error: Vec<ElementId>,
    pub(crate) on_loaded: Vec<ElementId>,
    pub(crate) before_unload: Vec<ElementId>,
}

impl ScriptDefinition {
    pub fn tree(&self) -> &SyntaxTree {
        &self.tree
    }

    pub fn shared_tree(&self) -> Arc<SyntaxTree> {
        Arc::clone(&self.tree)
    }

    pub fn element(&self, id: ElementId) -> Option<&Element> {
        self.elements.get(id.index())
    }

    pub fn elements(&self) -> impl Iterator<Item = (ElementId, &Element)> + '_ {
        self.elements
            .iter()
            .enumerate()
            .map(|(index, element)| (ElementId(index as u32), element))
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn injection_sites(&self) -> &[InjectionSiteElement] {
        &self.injection_sites
    }

    pub fn startup(&self) -> Option<ElementId> {
        self.startup
    }

    /// Injected variables of every kind, in discovery order
    pub fn variables(&self) -> &[ElementId] {
        &self.variables
    }

    pub fn templates(&self) -> &[ElementId] {
        &self.templates
    }

    pub fn on_error(&self) -> &[ElementId] {
        &self.on_error
    }

    pub fn on_loaded(&self) -> &[ElementId] {
        &self.on_loaded
    }

    pub fn before_unload(&self) -> &[ElementId] {
        &self.before_unload
    }

    /// Elements with the given role, in discovery order
    pub fn of_role(&self, role: Role) -> Vec<ElementId> {
        self.elements()
            .filter(|(_, element)| element.role == role)
            .map(|(id, _)| id)
            .collect()
    }

    /// Human readable name of an element's node for diagnostics
    pub fn label(&self, id: ElementId) -> String {
        match self.element(id) {
            Some(element) => node_label(&self.tree, element.node),
            None => id.to_string(),
        }
    }
}

/// Variable at the end of an attribute/convert chain
pub fn chain_variable(tree: &SyntaxTree, mut id: NodeId) -> Option<NodeId> {
    loop {
        match tree.get_node(id)? {
            Node::AttributedExpression { child, .. } | Node::Convert { child, .. } => id = *child,
            Node::Variable { .. } => return Some(id),
            _ => return None,
        }
    }
}

/// Path of the variable a node declares: a parameter's name or a chain's variable
pub fn declared_variable(tree: &SyntaxTree, id: NodeId) -> Option<&str> {
    let variable = match tree.get_node(id)? {
        Node::Parameter { name, .. } => *name,
        Node::Assignment { left, .. } => chain_variable(tree, *left)?,
        _ => chain_variable(tree, id)?,
    };
    match tree.get_node(variable)? {
        Node::Variable { path, .. } => Some(path.as_str()),
        _ => None,
    }
}

/// Short description of a node, such as `function Main` or `$logger`
pub fn node_label(tree: &SyntaxTree, id: NodeId) -> String {
    match tree.get_node(id) {
        Some(Node::FunctionDefinition { name, .. }) => format!("function {}", name),
        Some(Node::ScriptBlock { .. }) => "script".to_string(),
        Some(Node::ScriptBlockExpression { .. }) => "script block".to_string(),
        Some(node) => match declared_variable(tree, id) {
            Some(path) => format!("${}", path),
            None => node.kind_name().to_string(),
        },
        None => id.to_string(),
    }
}

#[cfg(test)]
#[path = "elements_tests.rs"]
mod tests;

//! Single pass over a syntax tree that collects annotated nodes
//!
//! The visitor only classifies. It never mutates the tree and never decides whether two
//! annotations conflict; that is the builder's job.

use psyringe_core::ast::{Node, NodeId, SyntaxTree};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use crate::elements::{chain_variable, node_label};
use crate::error::Result;
use crate::vocabulary::{Marker, Role, Site};

/// An annotated node found by the visitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub node: NodeId,
    pub annotation: NodeId,
    pub declaration: Option<NodeId>,
}

/// Everything the visitor found, in pre-order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisitResult {
    /// Annotated functions, variables and script blocks
    pub candidates: Vec<(Role, Candidate)>,
    /// Injected parameters keyed by the function (or script block) that declares them
    pub parameters: Vec<(NodeId, Candidate)>,
    pub usings: Vec<NodeId>,
}

impl VisitResult {
    pub fn of_role(&self, role: Role) -> impl Iterator<Item = &Candidate> + '_ {
        self.candidates
            .iter()
            .filter(move |(r, _)| *r == role)
            .map(|(_, candidate)| candidate)
    }

    pub fn parameters_of(&self, owner: NodeId) -> impl Iterator<Item = &Candidate> + '_ {
        self.parameters
            .iter()
            .filter(move |(o, _)| *o == owner)
            .map(|(_, candidate)| candidate)
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty() && self.parameters.is_empty()
    }
}

pub struct ScriptVisitor<'t> {
    tree: &'t SyntaxTree,
    result: VisitResult,
    /// Chain heads whose statement has already been seen
    declarations: FxHashMap<NodeId, NodeId>,
    /// Inner chain links and function param blocks, already classified through their owner
    consumed: FxHashSet<NodeId>,
}

impl<'t> ScriptVisitor<'t> {
    pub fn new(tree: &'t SyntaxTree) -> Self {
        Self {
            tree,
            result: VisitResult::default(),
            declarations: FxHashMap::default(),
            consumed: FxHashSet::default(),
        }
    }

    /// Walks the whole tree once, depth first, from the root
    pub fn visit(mut self) -> Result<VisitResult> {
        let tree = self.tree;
        let root = tree.root()?;
        let mut stack = vec![(root, root)];

        while let Some((id, owner)) = stack.pop() {
            let node = tree.node(id)?;
            self.visit_node(id, node, owner)?;

            let child_owner = match node {
                Node::FunctionDefinition { .. } | Node::ScriptBlockExpression { .. } => id,
                _ => owner,
            };
            for child in node.children().into_iter().rev() {
                stack.push((child, child_owner));
            }
        }

        debug!(
            "Visited script: {} annotated nodes, {} injected parameters, {} usings",
            self.result.candidates.len(),
            self.result.parameters.len(),
            self.result.usings.len()
        );
        Ok(self.result)
    }

    fn visit_node(&mut self, id: NodeId, node: &Node, owner: NodeId) -> Result<()> {
        match node {
            Node::UsingStatement { .. } => self.result.usings.push(id),
            Node::FunctionDefinition { body, .. } => self.visit_function(id, *body)?,
            Node::ParamBlock { attributes, .. } if !self.consumed.contains(&id) => {
                for attribute in attributes {
                    if let Some(marker) = self.marker(*attribute) {
                        self.ignore(marker, owner);
                    }
                }
            }
            Node::Parameter { attributes, .. } => {
                for attribute in attributes {
                    let Some(marker) = self.marker(*attribute) else {
                        continue;
                    };
                    if marker.applies_to(Site::Parameter).is_some() {
                        let candidate = Candidate {
                            node: id,
                            annotation: *attribute,
                            declaration: Some(id),
                        };
                        self.result.parameters.push((owner, candidate));
                    } else {
                        self.ignore(marker, id);
                    }
                }
            }
            Node::Pipeline { elements } => {
                if let [element] = elements.as_slice() {
                    if let Some(Node::CommandExpression { expression }) = self.tree.get_node(*element)
                    {
                        if self.is_chain(*expression) {
                            self.declarations.insert(*expression, id);
                        }
                    }
                }
            }
            Node::Assignment { left, .. } => {
                if self.is_chain(*left) {
                    self.declarations.insert(*left, id);
                }
            }
            Node::AttributedExpression { .. } | Node::Convert { .. }
                if !self.consumed.contains(&id) =>
            {
                self.visit_chain(id)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// A function's markers live on its body's `param()` block
    fn visit_function(&mut self, id: NodeId, body: NodeId) -> Result<()> {
        let tree = self.tree;
        let Node::ScriptBlock {
            param_block: Some(param_block),
            ..
        } = tree.node(body)?
        else {
            return Ok(());
        };
        self.consumed.insert(*param_block);

        let Node::ParamBlock { attributes, .. } = tree.node(*param_block)? else {
            return Ok(());
        };
        for attribute in attributes {
            let Some(marker) = self.marker(*attribute) else {
                continue;
            };
            match marker.applies_to(Site::Function) {
                Some(role) => self.result.candidates.push((
                    role,
                    Candidate {
                        node: id,
                        annotation: *attribute,
                        declaration: None,
                    },
                )),
                None => self.ignore(marker, id),
            }
        }
        Ok(())
    }

    /// Classifies a whole `[A()][T]...$x` chain from its outermost link
    fn visit_chain(&mut self, head: NodeId) -> Result<()> {
        let tree = self.tree;
        let mut attributes = Vec::new();
        let mut current = head;
        loop {
            let child = match tree.node(current)? {
                Node::AttributedExpression { attribute, child } => {
                    attributes.push(*attribute);
                    *child
                }
                Node::Convert { child, .. } => *child,
                _ => break,
            };
            if !self.is_chain(child) {
                current = child;
                break;
            }
            self.consumed.insert(child);
            current = child;
        }

        let site = if chain_variable(tree, head).is_some() {
            Some(Site::Variable)
        } else if matches!(tree.node(current)?, Node::ScriptBlockExpression { .. }) {
            Some(Site::ScriptBlock)
        } else {
            None
        };
        let declaration = match site {
            Some(Site::Variable) => self.declarations.get(&head).copied(),
            _ => None,
        };

        for attribute in attributes {
            let Some(marker) = self.marker(attribute) else {
                continue;
            };
            match site.and_then(|site| marker.applies_to(site)) {
                Some(role) => self.result.candidates.push((
                    role,
                    Candidate {
                        node: head,
                        annotation: attribute,
                        declaration,
                    },
                )),
                None => self.ignore(marker, head),
            }
        }
        Ok(())
    }

    fn is_chain(&self, id: NodeId) -> bool {
        matches!(
            self.tree.get_node(id),
            Some(Node::AttributedExpression { .. } | Node::Convert { .. })
        )
    }

    fn marker(&self, attribute: NodeId) -> Option<Marker> {
        match self.tree.get_node(attribute)? {
            Node::Attribute { type_name, .. } => Marker::from_attribute_name(&type_name.full_name()),
            _ => None,
        }
    }

    fn ignore(&self, marker: Marker, node: NodeId) {
        warn!(
            "Ignoring [{}] on {}: the annotation does not apply there",
            marker,
            node_label(self.tree, node)
        );
    }
}

/// Runs a [`ScriptVisitor`] over `tree`
pub fn visit(tree: &SyntaxTree) -> Result<VisitResult> {
    ScriptVisitor::new(tree).visit()
}

#[cfg(test)]
#[path = "visitor_tests.rs"]
mod tests;

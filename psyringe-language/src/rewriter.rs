//! Tree-to-tree rewriting
//!
//! A rewrite copies the source tree into a fresh arena. Nodes a rule matches are replaced
//! by whatever the rule builds; every other node is copied with its children rewritten.
//! The source tree is never modified, so elements pointing into it stay valid.

use psyringe_core::ast::{Node, NodeId, SyntaxTree};

use crate::error::Result;

pub trait RewriteRule {
    fn matches(&self, tree: &SyntaxTree, id: NodeId, node: &Node) -> bool;

    /// Builds the replacement for a matched node in `ctx`'s output tree.
    ///
    /// Returning `None` falls back to the structural copy.
    fn replace(&self, ctx: &mut RewriteContext<'_>, id: NodeId, node: &Node) -> Result<Option<NodeId>>;
}

/// State of one rewrite: the source tree, the rule and the tree being built
pub struct RewriteContext<'a> {
    source: &'a SyntaxTree,
    rule: &'a dyn RewriteRule,
    output: SyntaxTree,
}

impl<'a> RewriteContext<'a> {
    pub fn source(&self) -> &'a SyntaxTree {
        self.source
    }

    /// Rewrites a source node, applying the rule to it and its descendants
    pub fn rewrite(&mut self, id: NodeId) -> Result<NodeId> {
        let source = self.source;
        let rule = self.rule;
        let node = source.node(id)?;
        if rule.matches(source, id, node) {
            if let Some(replacement) = rule.replace(self, id, node)? {
                return Ok(replacement);
            }
        }
        self.rebuild(id)
    }

    /// Copies a source node without applying the rule to it; its children are rewritten
    pub fn rebuild(&mut self, id: NodeId) -> Result<NodeId> {
        let source = self.source;
        let node = source.node(id)?;
        let copy = node.try_map_children(|child| self.rewrite(child))?;
        self.add_like(copy, id)
    }

    pub fn rewrite_all(&mut self, ids: &[NodeId]) -> Result<Vec<NodeId>> {
        ids.iter().map(|id| self.rewrite(*id)).collect()
    }

    pub fn rewrite_opt(&mut self, id: Option<NodeId>) -> Result<Option<NodeId>> {
        id.map(|id| self.rewrite(id)).transpose()
    }

    /// Adds a synthesized node to the output; it has no span
    pub fn add(&mut self, node: Node) -> Result<NodeId> {
        Ok(self.output.add_node(node)?)
    }

    /// Adds a node that stands in for `original`, keeping the original's span
    pub fn add_like(&mut self, node: Node, original: NodeId) -> Result<NodeId> {
        match self.source.span(original) {
            Some(span) => Ok(self.output.add_node_with_span(node, span)?),
            None => self.add(node),
        }
    }
}

/// Rewrites `tree` with `rule`, producing a new tree
pub fn rewrite_with(tree: &SyntaxTree, rule: &dyn RewriteRule) -> Result<SyntaxTree> {
    let root = tree.root()?;
    let mut ctx = RewriteContext {
        source: tree,
        rule,
        output: SyntaxTree::new(),
    };
    let new_root = ctx.rewrite(root)?;
    let mut output = ctx.output;
    output.set_root(new_root);
    Ok(output)
}

/// A rule made of two closures
pub struct FnRule<P, F> {
    predicate: P,
    replace: F,
}

impl<P, F> FnRule<P, F>
where
    P: Fn(&SyntaxTree, NodeId, &Node) -> bool,
    F: Fn(&mut RewriteContext<'_>, NodeId, &Node) -> Result<Option<NodeId>>,
{
    pub fn new(predicate: P, replace: F) -> Self {
        Self { predicate, replace }
    }
}

impl<P, F> RewriteRule for FnRule<P, F>
where
    P: Fn(&SyntaxTree, NodeId, &Node) -> bool,
    F: Fn(&mut RewriteContext<'_>, NodeId, &Node) -> Result<Option<NodeId>>,
{
    fn matches(&self, tree: &SyntaxTree, id: NodeId, node: &Node) -> bool {
        (self.predicate)(tree, id, node)
    }

    fn replace(&self, ctx: &mut RewriteContext<'_>, id: NodeId, node: &Node) -> Result<Option<NodeId>> {
        (self.replace)(ctx, id, node)
    }
}

/// Rewrites every node `predicate` accepts with `replace`
pub fn rewrite<P, F>(tree: &SyntaxTree, predicate: P, replace: F) -> Result<SyntaxTree>
where
    P: Fn(&SyntaxTree, NodeId, &Node) -> bool,
    F: Fn(&mut RewriteContext<'_>, NodeId, &Node) -> Result<Option<NodeId>>,
{
    rewrite_with(tree, &FnRule::new(predicate, replace))
}

#[cfg(test)]
#[path = "rewriter_tests.rs"]
mod tests;

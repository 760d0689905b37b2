#[cfg(test)]
mod tests {
    use crate::elements::*;
    use psyringe_core::ast::Node;
    use psyringe_parser::parse;

    fn first(tree: &psyringe_core::ast::SyntaxTree, predicate: impl FnMut(&Node) -> bool) -> psyringe_core::ast::NodeId {
        tree.find_nodes(predicate)[0]
    }

    #[test]
    fn test_chain_variable_walks_attributes_and_converts() {
        let tree = parse("[Inject()][ILogger]$Logger").unwrap();
        let chain = first(&tree, |n| matches!(n, Node::AttributedExpression { .. }));
        let variable = chain_variable(&tree, chain).unwrap();
        assert!(matches!(tree.node(variable).unwrap(), Node::Variable { path, .. } if path == "Logger"));
    }

    #[test]
    fn test_chain_variable_rejects_other_expressions() {
        let tree = parse("[Inject()]{ 1 }").unwrap();
        let chain = first(&tree, |n| matches!(n, Node::AttributedExpression { .. }));
        assert_eq!(chain_variable(&tree, chain), None);
    }

    #[test]
    fn test_declared_variable_of_assignment_and_parameter() {
        let tree = parse("function f { param([Inject()]$Db) }\n[Inject()]$Cache = 1").unwrap();
        let assignment = first(&tree, |n| matches!(n, Node::Assignment { .. }));
        assert_eq!(declared_variable(&tree, assignment), Some("Cache"));

        let parameter = first(&tree, |n| matches!(n, Node::Parameter { .. }));
        assert_eq!(declared_variable(&tree, parameter), Some("Db"));
    }

    #[test]
    fn test_node_labels() {
        let tree = parse("function Main { }\n[Inject()]$Logger").unwrap();
        let function = first(&tree, |n| matches!(n, Node::FunctionDefinition { .. }));
        assert_eq!(node_label(&tree, function), "function Main");

        let chain = first(&tree, |n| matches!(n, Node::AttributedExpression { .. }));
        assert_eq!(node_label(&tree, chain), "$Logger");

        let number = parse("1").unwrap();
        let id = first(&number, |n| matches!(n, Node::Number { .. }));
        assert_eq!(node_label(&number, id), "number");
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::*;
    use crate::error::Error;
    use pretty_assertions::assert_eq;

    fn var(tree: &mut SyntaxTree, name: &str) -> NodeId {
        tree.add_node(Node::Variable {
            path: name.to_string(),
            splatted: false,
        })
        .unwrap()
    }

    fn number(tree: &mut SyntaxTree, text: &str) -> NodeId {
        tree.add_node(Node::Number {
            text: text.to_string(),
        })
        .unwrap()
    }

    /// `$x = 1` wrapped in an unnamed end block
    fn assignment_script(name: &str, value: &str) -> SyntaxTree {
        let mut tree = SyntaxTree::new();
        let left = var(&mut tree, name);
        let right = number(&mut tree, value);
        let right = tree
            .add_node(Node::CommandExpression { expression: right })
            .unwrap();
        let assign = tree
            .add_node(Node::Assignment {
                left,
                operator: AssignmentOperator::Assign,
                right,
            })
            .unwrap();
        let block = tree
            .add_node(Node::NamedBlock {
                kind: BlockKind::End,
                unnamed: true,
                statements: vec![assign],
                traps: vec![],
            })
            .unwrap();
        let root = tree
            .add_node(Node::ScriptBlock {
                usings: vec![],
                param_block: None,
                blocks: vec![block],
            })
            .unwrap();
        tree.set_root(root);
        tree
    }

    // ===== NodeId Tests =====

    #[test]
    fn test_node_id_creation() {
        let id = NodeId::new(1).unwrap();
        assert_eq!(id.get(), 1);

        assert!(NodeId::new(0).is_none());

        let large_id = NodeId::new(u32::MAX).unwrap();
        assert_eq!(large_id.get(), u32::MAX);
    }

    #[test]
    fn test_node_id_display() {
        let id = NodeId::new(42).unwrap();
        assert_eq!(format!("{}", id), "n42");
    }

    #[test]
    fn test_option_node_id_is_niche_optimized() {
        assert_eq!(
            std::mem::size_of::<Option<NodeId>>(),
            std::mem::size_of::<NodeId>()
        );
    }

    // ===== Span Tests =====

    #[test]
    fn test_span_merge_and_len() {
        let a = Span::new(4, 9);
        let b = Span::new(1, 6);
        assert_eq!(a.merge(b), Span::new(1, 9));
        assert_eq!(a.len(), 5);
        assert!(Span::new(3, 3).is_empty());
        assert_eq!(a.to_string(), "4..9");
    }

    // ===== TypeName Tests =====

    #[test]
    fn test_type_name_full_name() {
        assert_eq!(TypeName::simple("string").full_name(), "string");

        let generic = TypeName::Generic {
            name: "System.Collections.Generic.List".to_string(),
            arguments: vec![TypeName::simple("string")],
        };
        assert_eq!(generic.full_name(), "System.Collections.Generic.List[string]");
        assert_eq!(generic.short_name(), "List");

        let array = TypeName::Array {
            element: Box::new(TypeName::simple("int")),
            rank: 2,
        };
        assert_eq!(array.full_name(), "int[][]");
        assert_eq!(array.to_string(), "[int[][]]");
    }

    // ===== Operator Tests =====

    #[test]
    fn test_binary_operator_lookup_is_case_insensitive() {
        assert_eq!(BinaryOperator::from_dash_word("EQ"), Some(BinaryOperator::Equal));
        assert_eq!(BinaryOperator::from_dash_word("notin"), Some(BinaryOperator::NotIn));
        assert_eq!(BinaryOperator::from_dash_word("Force"), None);
        assert_eq!(BinaryOperator::Replace.text(), "-replace");
    }

    #[test]
    fn test_block_kind_keywords() {
        assert_eq!(BlockKind::from_keyword("Process"), Some(BlockKind::Process));
        assert_eq!(BlockKind::from_keyword("finally"), None);
        assert_eq!(BlockKind::DynamicParam.keyword(), "dynamicparam");
    }

    // ===== SyntaxTree Tests =====

    #[test]
    fn test_tree_creation() {
        let tree = SyntaxTree::new();
        assert!(tree.is_empty());
        assert!(tree.root_id().is_none());
        assert_eq!(tree.root(), Err(Error::MissingRoot));
    }

    #[test]
    fn test_add_node_assigns_sequential_ids() {
        let mut tree = SyntaxTree::new();
        let a = number(&mut tree, "1");
        let b = number(&mut tree, "2");
        assert_eq!(a.get(), 1);
        assert_eq!(b.get(), 2);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_spans_are_optional() {
        let mut tree = SyntaxTree::new();
        let spanned = tree
            .add_node_with_span(
                Node::Number {
                    text: "7".to_string(),
                },
                Span::new(10, 11),
            )
            .unwrap();
        let synthetic = number(&mut tree, "8");
        assert_eq!(tree.span(spanned), Some(Span::new(10, 11)));
        assert_eq!(tree.span(synthetic), None);
    }

    #[test]
    fn test_node_lookup_reports_missing_ids() {
        let tree = SyntaxTree::new();
        let id = NodeId::new(3).unwrap();
        assert_eq!(tree.node(id), Err(Error::MissingNode(id)));
    }

    #[test]
    fn test_children_in_source_order() {
        let tree = assignment_script("x", "1");
        let assignment = tree.find_nodes(|n| matches!(n, Node::Assignment { .. }))[0];
        let children = tree.get_node(assignment).unwrap().children();
        assert_eq!(children.len(), 2);
        assert!(matches!(
            tree.get_node(children[0]),
            Some(Node::Variable { .. })
        ));
        assert!(matches!(
            tree.get_node(children[1]),
            Some(Node::CommandExpression { .. })
        ));
    }

    #[test]
    fn test_if_clauses_flatten_in_order() {
        let mut tree = SyntaxTree::new();
        let c1 = var(&mut tree, "a");
        let b1 = number(&mut tree, "1");
        let c2 = var(&mut tree, "b");
        let b2 = number(&mut tree, "2");
        let e = number(&mut tree, "3");
        let node = Node::If {
            clauses: vec![(c1, b1), (c2, b2)],
            else_body: Some(e),
        };
        assert_eq!(node.children(), vec![c1, b1, c2, b2, e]);
    }

    #[test]
    fn test_dfs_is_pre_order() {
        let tree = assignment_script("x", "1");
        let mut kinds = Vec::new();
        tree.dfs_from(tree.root().unwrap(), |_, node| kinds.push(node.kind_name()));
        assert_eq!(
            kinds,
            vec![
                "script block",
                "named block",
                "assignment",
                "variable",
                "command expression",
                "number",
            ]
        );
    }

    #[test]
    fn test_map_children_rewrites_ids_only() {
        let mut tree = SyntaxTree::new();
        let left = var(&mut tree, "a");
        let right = var(&mut tree, "b");
        let node = Node::Binary {
            operator: BinaryOperator::Add,
            left,
            right,
        };
        let swapped = node.map_children(|id| if id == left { right } else { left });
        assert_eq!(
            swapped,
            Node::Binary {
                operator: BinaryOperator::Add,
                left: right,
                right: left,
            }
        );
        assert!(node.same_kind_and_data(&swapped));
    }

    #[test]
    fn test_try_map_children_propagates_errors() {
        let mut tree = SyntaxTree::new();
        let child = number(&mut tree, "1");
        let node = Node::Paren { statement: child };
        let result: std::result::Result<Node, &str> = node.try_map_children(|_| Err("boom"));
        assert_eq!(result, Err("boom"));
    }

    #[test]
    fn test_same_shape_ignores_ids() {
        let a = assignment_script("x", "1");
        let mut b = SyntaxTree::new();
        // Offset the ids so both trees differ in numbering
        number(&mut b, "0");
        let shifted = assignment_script("x", "1");
        let root = copy_into(&shifted, shifted.root().unwrap(), &mut b);
        b.set_root(root);

        assert!(a.same_shape_as(&b));
        assert!(!a.same_shape_as(&assignment_script("y", "1")));
        assert!(!a.same_shape_as(&assignment_script("x", "2")));
        assert!(!a.same_shape_as(&SyntaxTree::new()));
    }

    fn copy_into(source: &SyntaxTree, id: NodeId, target: &mut SyntaxTree) -> NodeId {
        let node = source
            .get_node(id)
            .unwrap()
            .map_children(|child| copy_into(source, child, target));
        target.add_node(node).unwrap()
    }

    #[test]
    fn test_validate() {
        let tree = assignment_script("x", "1");
        assert!(tree.validate().is_ok());

        let mut broken = SyntaxTree::new();
        let dangling = NodeId::new(99).unwrap();
        let root = broken.add_node(Node::Paren { statement: dangling }).unwrap();
        broken.set_root(root);
        assert_eq!(broken.validate(), Err(Error::MissingNode(dangling)));
    }
}

//! Tests for error recovery in `parse_recovering`

#[cfg(test)]
mod tests {
    use crate::{parse_recovering, ErrorKind};
    use psyringe_core::ast::{Node, NodeId, SyntaxTree};

    fn root_statements(tree: &SyntaxTree) -> Vec<NodeId> {
        let Some(Node::ScriptBlock { blocks, .. }) = tree.root().ok().and_then(|r| tree.get_node(r))
        else {
            panic!("missing root");
        };
        match tree.get_node(blocks[0]) {
            Some(Node::NamedBlock { statements, .. }) => statements.clone(),
            other => panic!("expected block, got {:?}", other),
        }
    }

    fn error_texts(tree: &SyntaxTree) -> Vec<String> {
        tree.find_nodes(|node| matches!(node, Node::Error { .. }))
            .into_iter()
            .filter_map(|id| match tree.get_node(id) {
                Some(Node::Error { text }) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_clean_script_has_no_errors() {
        let (tree, errors) = parse_recovering("$a = 1\n$b = 2");
        assert!(errors.is_empty());
        assert_eq!(root_statements(&tree).len(), 2);
        assert!(error_texts(&tree).is_empty());
    }

    #[test]
    fn test_broken_statement_becomes_error_node() {
        let (tree, errors) = parse_recovering("$a = 1\n$b = )\n$c = 3");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind(), ErrorKind::UnexpectedToken);

        let statements = root_statements(&tree);
        assert_eq!(statements.len(), 3);
        assert!(matches!(tree.get_node(statements[0]), Some(Node::Assignment { .. })));
        assert_eq!(
            tree.get_node(statements[1]),
            Some(&Node::Error {
                text: "$b = )".to_string()
            })
        );
        assert!(matches!(tree.get_node(statements[2]), Some(Node::Assignment { .. })));
    }

    #[test]
    fn test_recovery_inside_blocks_keeps_the_block() {
        let (tree, errors) = parse_recovering("function f {\n  $x = \n  ok\n}\n$y = 1");
        assert_eq!(errors.len(), 0, "a dangling '=' continues on the next line");
        assert_eq!(root_statements(&tree).len(), 2);

        let (tree, errors) = parse_recovering("function f {\n  $x = (1\n}\n$y = 1");
        assert_eq!(errors.len(), 1);
        assert_eq!(error_texts(&tree), vec!["$x = (1".to_string()]);
        let statements = root_statements(&tree);
        assert!(matches!(
            tree.get_node(statements[0]),
            Some(Node::FunctionDefinition { .. })
        ));
        assert_eq!(statements.len(), 2);
    }

    #[test]
    fn test_lexer_errors_are_reported() {
        let (tree, errors) = parse_recovering("$a = 1 ~\n$b = 2");
        assert_eq!(errors[0].kind(), ErrorKind::InvalidToken);
        assert_eq!(root_statements(&tree).len(), 2);
    }

    #[test]
    fn test_error_spans_cover_skipped_text() {
        let source = "$ok = 1; [int[,]]$bad; $fine = 2";
        let (tree, errors) = parse_recovering(source);
        assert_eq!(errors.len(), 1);
        let error = tree
            .find_nodes(|node| matches!(node, Node::Error { .. }))
            .pop()
            .unwrap();
        let span = tree.span(error).unwrap();
        assert_eq!(&source[span.start..span.end], "[int[,]]$bad");
    }
}

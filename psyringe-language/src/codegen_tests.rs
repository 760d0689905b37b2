#[cfg(test)]
mod tests {
    use crate::codegen::*;
    use crate::error::{ErrorKind, ScriptError};
    use pretty_assertions::assert_eq;
    use psyringe_core::ast::{Node, NodeId, StringKind, SyntaxTree};
    use psyringe_parser::{parse, parse_recovering};

    fn regenerate(source: &str) -> String {
        let tree = parse(source).unwrap();
        generate_script(&tree).unwrap()
    }

    fn assert_round_trip(source: &str) {
        let tree = parse(source).unwrap();
        let generated = generate_script(&tree).unwrap();
        let reparsed = parse(&generated)
            .unwrap_or_else(|e| panic!("generated text does not parse: {}\n{}", e, generated));
        assert!(
            reparsed.same_shape_as(&tree),
            "shape changed for:\n{}\ngenerated:\n{}",
            source,
            generated
        );
    }

    #[test]
    fn test_statements_are_terminated_and_separated() {
        assert_eq!(regenerate("$a = 1\n$b = 2"), "$a = 1;\n$b = 2;");
    }

    #[test]
    fn test_arrays_are_parenthesized() {
        assert_eq!(regenerate("$a = 1, 2"), "$a = (1, 2);");
        assert_eq!(regenerate("$a = ,1"), "$a = (, 1);");
    }

    #[test]
    fn test_single_quotes_are_escaped() {
        assert_eq!(regenerate("'it''s'"), "'it''s';");
    }

    #[test]
    fn test_here_strings_keep_their_lines() {
        assert_eq!(
            regenerate("$q = @'\nSELECT 1\n'@"),
            "$q = @'\nSELECT 1\n'@;"
        );
    }

    #[test]
    fn test_named_blocks() {
        assert_eq!(
            regenerate("begin { $a = 1 }\nend { }"),
            "begin {\n$a = 1;\n}\nend {}"
        );
    }

    #[test]
    fn test_param_block_and_attributes() {
        assert_eq!(
            regenerate("[CmdletBinding()]\nparam([Parameter(Mandatory, Position = 0)][string]$Name = 'x')"),
            "[CmdletBinding()]\nparam([Parameter(Mandatory, Position = 0)][string]$Name = 'x')"
        );
    }

    #[test]
    fn test_function_definition() {
        assert_eq!(
            regenerate("function Get-Thing($a, $b) { return $a }"),
            "function Get-Thing($a, $b) {\nreturn $a;\n};"
        );
        assert_eq!(regenerate("filter Pass { }"), "filter Pass {};");
    }

    #[test]
    fn test_members_and_calls() {
        assert_eq!(
            regenerate("[Math]::Max($a.Count, $b?.Length)"),
            "[Math]::Max($a.Count, ${b}?.Length);"
        );
        assert_eq!(regenerate("$ctx.GetProvider('Id', 'Scope')"), "$ctx.GetProvider('Id', 'Scope');");
    }

    #[test]
    fn test_unary_spacing() {
        assert_eq!(regenerate("-not $a"), "-not $a;");
        assert_eq!(regenerate("$i++"), "$i++;");
        assert_eq!(regenerate("- -1"), "- -1;");
    }

    #[test]
    fn test_control_flow_layout() {
        assert_eq!(
            regenerate("if ($a) { 1 } elseif ($b) { 2 } else { 3 }"),
            "if ($a) {\n1;\n} elseif ($b) {\n2;\n} else {\n3;\n};"
        );
        assert_eq!(regenerate("for (;;) { break }"), "for (; ; ) {\nbreak;\n};");
    }

    #[test]
    fn test_error_nodes_cannot_be_generated() {
        let (tree, errors) = parse_recovering("$ok = 1\n$x = )\n$y = 2");
        assert!(!errors.is_empty());

        let err = generate_script(&tree).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CodeGeneration);
        let ScriptError::CodeGeneration { span, .. } = err else {
            panic!("unexpected error");
        };
        assert_eq!(span.start, 8);
    }

    #[test]
    fn test_generate_subtree() {
        let tree = parse("$x = @{ Name = 'a'; Count = 2 }").unwrap();
        let table = tree.find_nodes(|n| matches!(n, Node::Hashtable { .. }))[0];
        assert_eq!(generate(&tree, table).unwrap(), "@{Name = 'a'; Count = 2}");
    }

    #[test]
    fn test_synthesized_nodes_generate() {
        let mut tree = SyntaxTree::new();
        let target = tree
            .add_node(Node::Variable {
                path: "PSyringeContext".to_string(),
                splatted: false,
            })
            .unwrap();
        let member = tree
            .add_node(Node::StringConstant {
                value: "GetSecret".to_string(),
                kind: StringKind::BareWord,
            })
            .unwrap();
        let argument = tree
            .add_node(Node::StringConstant {
                value: "Api'Key".to_string(),
                kind: StringKind::SingleQuoted,
            })
            .unwrap();
        let call: NodeId = tree
            .add_node(Node::InvokeMember {
                target,
                member,
                arguments: vec![argument],
                is_static: false,
                null_conditional: false,
            })
            .unwrap();
        assert_eq!(
            generate(&tree, call).unwrap(),
            "$PSyringeContext.GetSecret('Api''Key')"
        );
    }

    #[test]
    fn test_round_trips() {
        let sources = [
            "using namespace System.Text\nparam($a)\n$a",
            "[CmdletBinding()]\nparam([Parameter(Mandatory)][string]$Name)\nbegin { $x = 1 }\nprocess { $_ | Out-Host }\nend { }",
            "function Get-Total($items) {\n$total = 0\nforeach ($item in $items) { $total += $item }\nreturn $total\n}\nGet-Total 1, '2', 3 | Out-Host",
            ":outer while ($true) { do { continue outer } until ($false) }",
            "try { throw 'x' } catch [System.IO.IOException], [System.Exception] { $_ } finally { }",
            "trap [Exception] { continue }\n$x = $a ? 'yes' : 'no'",
            "$h = @{ a = 1; 'b' = @(1, 2); c = { param($p) $p * 2 } }",
            "$list = [System.Collections.Generic.List[string]]::new()\n$list.Add(\"item $x\")",
            "$s = $(Get-Date) -f 'yyyy'\n$r = 1..10 -join ','",
            "& $cmd -Verbose:$false -Name value\n. .\\helper.ps1",
            "$a[0]?[1] = $env:PATH\n${weird name} = $using:other",
            "[Inject()][ILogger]$Logger = $null\n[InjectTemplate('T')]{ Write-Output 1 }",
            "for ($i = 0; $i -lt 10; $i++) { if (-not ($i % 2)) { $i } }",
            "$q = @\"\nHello $name\n\"@\n$e = @'\nraw\n'@",
        ];
        for source in sources {
            assert_round_trip(source);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::builder::ElementBuilder;
    use crate::error::ErrorKind;
    use crate::visitor::{visit, Candidate, VisitResult};
    use crate::vocabulary::Role;
    use psyringe_core::ast::SyntaxTree;
    use psyringe_parser::parse;
    use std::sync::Arc;

    fn visited(source: &str) -> (Arc<SyntaxTree>, VisitResult) {
        let tree = Arc::new(parse(source).unwrap());
        let result = visit(&tree).unwrap();
        (tree, result)
    }

    fn candidate(result: &VisitResult, role: Role) -> Candidate {
        *result.of_role(role).next().unwrap()
    }

    const SITE: &str = "function Site {\n[InjectionSite()]\nparam([Inject()]$A, [Inject('B')]$B)\n}";

    #[test]
    fn test_from_visit_groups_elements() {
        let source = format!(
            "{}\nfunction Main {{\n[Startup()]\nparam()\n}}\n[Inject()]$Logger\n[InjectSecret()]$Key\n[InjectTemplate()]{{ }}",
            SITE
        );
        let (tree, result) = visited(&source);
        let definition = ElementBuilder::from_visit(tree, &result).unwrap();

        assert!(definition.startup().is_some());
        assert_eq!(definition.injection_sites().len(), 1);
        assert_eq!(definition.injection_sites()[0].parameters.len(), 2);
        assert_eq!(definition.variables().len(), 2);
        assert_eq!(definition.templates().len(), 1);
        assert_eq!(definition.of_role(Role::InjectParameter).len(), 2);
        assert_eq!(definition.len(), 7);
    }

    #[test]
    fn test_parameters_keep_declaration_order() {
        let (tree, result) = visited(SITE);
        let definition = ElementBuilder::from_visit(tree, &result).unwrap();
        let site = &definition.injection_sites()[0];
        let labels: Vec<String> = site
            .parameters
            .iter()
            .map(|id| definition.label(*id))
            .collect();
        assert_eq!(labels, vec!["$A", "$B"]);
    }

    #[test]
    fn test_duplicate_startup_fails_every_time() {
        let (tree, result) = visited("function Main {\n[Startup()]\nparam()\n}");
        let startup = candidate(&result, Role::Startup);
        let mut builder = ElementBuilder::new(tree);

        assert!(builder.set_startup_function(&startup).is_ok());
        for _ in 0..2 {
            let err = builder.set_startup_function(&startup).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::DuplicateStartup);
        }
    }

    #[test]
    fn test_two_startup_functions_are_rejected() {
        let (tree, result) = visited(
            "function A {\n[Startup()]\nparam()\n}\nfunction B {\n[Startup()]\nparam()\n}",
        );
        let errors = ElementBuilder::from_visit(tree, &result).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind(), ErrorKind::DuplicateStartup);
        assert!(errors[0].to_string().contains("function A"));
    }

    #[test]
    fn test_orphan_parameter() {
        let (tree, result) = visited("function Plain {\nparam([Inject()]$A)\n}");
        let errors = ElementBuilder::from_visit(tree, &result).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind(), ErrorKind::OrphanParameter);
        assert!(errors[0].to_string().contains("function Plain"));
    }

    #[test]
    fn test_parameter_before_site_is_orphan() {
        let (tree, result) = visited(SITE);
        let (owner, parameter) = result.parameters[0];
        let mut builder = ElementBuilder::new(tree);
        let err = builder
            .add_parameter_to_injection_site(owner, &parameter)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OrphanParameter);

        builder
            .add_injection_site(&candidate(&result, Role::InjectionSite))
            .unwrap();
        assert!(builder.add_parameter_to_injection_site(owner, &parameter).is_ok());
    }

    #[test]
    fn test_site_cannot_also_be_startup() {
        let (tree, result) = visited("function Main {\n[InjectionSite()][Startup()]\nparam()\n}");
        let errors = ElementBuilder::from_visit(tree, &result).unwrap_err();
        assert_eq!(errors[0].kind(), ErrorKind::ConflictingRoles);
    }

    #[test]
    fn test_same_role_twice_is_idempotent() {
        let (tree, result) = visited("[Inject()]$Logger");
        let variable = candidate(&result, Role::InjectVariable);
        let mut builder = ElementBuilder::new(tree);

        let first = builder.add_inject_variable(&variable).unwrap();
        let second = builder.add_inject_variable(&variable).unwrap();
        assert_eq!(first, second);

        let definition = builder.build().unwrap();
        assert_eq!(definition.variables().len(), 1);
    }

    #[test]
    fn test_variable_cannot_have_two_kinds() {
        let (tree, result) = visited("[Inject()][InjectSecret()]$Key");
        let errors = ElementBuilder::from_visit(tree, &result).unwrap_err();
        assert_eq!(errors[0].kind(), ErrorKind::ConflictingRoles);
    }

    #[test]
    fn test_builder_is_single_use() {
        let (tree, result) = visited("[Inject()]$Logger");
        let variable = candidate(&result, Role::InjectVariable);
        let mut builder = ElementBuilder::new(tree);
        builder.build().unwrap();

        assert_eq!(
            builder.add_inject_variable(&variable).unwrap_err().kind(),
            ErrorKind::BuilderFinalized
        );
        assert_eq!(builder.build().unwrap_err().kind(), ErrorKind::BuilderFinalized);
    }

    #[test]
    fn test_errors_are_collected() {
        let (tree, result) = visited(
            "function A {\n[Startup()]\nparam()\n}\nfunction B {\n[Startup()]\nparam([Inject()]$x)\n}",
        );
        let errors = ElementBuilder::from_visit(tree, &result).unwrap_err();
        let kinds: Vec<ErrorKind> = errors.iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![ErrorKind::DuplicateStartup, ErrorKind::OrphanParameter]
        );
    }
}

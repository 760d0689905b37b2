#[cfg(test)]
mod tests {
    use crate::builder::ElementBuilder;
    use crate::elements::ScriptDefinition;
    use crate::error::{ErrorKind, ScriptError};
    use crate::registry::{InMemoryRegistry, ProviderDescriptor, ProviderKey};
    use crate::target::*;
    use crate::visitor::visit;
    use psyringe_parser::parse;
    use std::sync::Arc;

    fn definition(source: &str) -> ScriptDefinition {
        let tree = Arc::new(parse(source).unwrap());
        let result = visit(&tree).unwrap();
        ElementBuilder::from_visit(tree, &result).unwrap()
    }

    fn only_target(source: &str) -> InjectionTarget {
        let definition = definition(source);
        let mut targets = TargetResolver::new(&definition).targets().unwrap();
        assert_eq!(targets.len(), 1);
        targets.remove(0).1
    }

    fn target_error(source: &str) -> ScriptError {
        let definition = definition(source);
        let mut errors = TargetResolver::new(&definition).targets().unwrap_err();
        errors.remove(0)
    }

    fn name(value: &str) -> ProviderKey {
        ProviderKey::Name(value.to_string())
    }

    #[test]
    fn test_named_target() {
        let target = only_target("[Inject(Target = 'LoggerProvider')]$Variable");
        assert_eq!(target.key, name("LoggerProvider"));
        assert_eq!(target.source, TargetSource::Named);
        assert!(!target.optional);
    }

    #[test]
    fn test_positional_target_and_optional() {
        let target = only_target("[Inject('LoggerProvider', $true)]$Variable = 'value'");
        assert_eq!(target.key, name("LoggerProvider"));
        assert_eq!(target.source, TargetSource::Positional);
        assert!(target.optional);
    }

    #[test]
    fn test_named_optional_flag_forms() {
        assert!(only_target("[Inject(Target = 'X', Optional = $true)]$v").optional);
        assert!(only_target("[Inject(Target = 'X', Optional)]$v").optional);
        assert!(!only_target("[Inject(Target = 'X', Optional = $false)]$v").optional);
        assert!(only_target("[Inject('X', 1)]$v").optional);
        assert!(!only_target("[Inject('X', 0)]$v").optional);
    }

    #[test]
    fn test_type_target() {
        let target = only_target("[Inject(Target = [ILogger])]$Variable");
        assert_eq!(target.key, ProviderKey::Type("ILogger".to_string()));
    }

    #[test]
    fn test_type_constraint_fallback() {
        let target = only_target("[Inject()][MyApp.ILogger]$Variable = 'value'");
        assert_eq!(target.key, ProviderKey::Type("MyApp.ILogger".to_string()));
        assert_eq!(target.source, TargetSource::TypeConstraint);
    }

    #[test]
    fn test_declaration_name_fallback() {
        let target = only_target("[Inject()]$Variable;");
        assert_eq!(target.key, name("Variable"));
        assert_eq!(target.source, TargetSource::DeclarationName);

        let scoped = only_target("[Inject()]$script:Cache");
        assert_eq!(scoped.key, name("Cache"));
    }

    #[test]
    fn test_named_and_positional_target_conflict() {
        let err = target_error("[Inject('A', Target = 'B')]$v");
        assert_eq!(err.kind(), ErrorKind::ConflictingTarget);
        assert!(err.to_string().contains("Target"));
    }

    #[test]
    fn test_mixed_named_target_and_positional_flag_conflict() {
        let err = target_error("[Inject(Target = 'LoggerProvider', $true)]$v");
        assert_eq!(err.kind(), ErrorKind::ConflictingTarget);
    }

    #[test]
    fn test_invalid_argument_values() {
        let err = target_error("[Inject($true)]$v");
        assert_eq!(err.kind(), ErrorKind::InvalidAnnotationArgument);

        let err = target_error("[Inject('X', 'yes')]$v");
        assert_eq!(err.kind(), ErrorKind::InvalidAnnotationArgument);

        let err = target_error("[Inject(\"$name\")]$v");
        assert_eq!(err.kind(), ErrorKind::InvalidAnnotationArgument);
    }

    #[test]
    fn test_database_connection_string() {
        let target = only_target("[InjectDatabase(ConnectionString = 'Server=.;Db=app')]$Db");
        assert_eq!(target.key, name("Db"));
        assert_eq!(target.connection_string.as_deref(), Some("Server=.;Db=app"));
    }

    #[test]
    fn test_unknown_arguments_warn_or_fail() {
        let source = "[Inject(Target = 'X', Lifetime = 'Scoped')]$v";
        let definition = definition(source);
        assert!(TargetResolver::new(&definition).targets().is_ok());

        let errors = TargetResolver::new(&definition)
            .strict_arguments(true)
            .targets()
            .unwrap_err();
        assert_eq!(errors[0].kind(), ErrorKind::InvalidAnnotationArgument);
    }

    #[test]
    fn test_site_scope_reaches_parameters() {
        let source = "function Site {\n[InjectionSite(Scope = 'Tenant')]\nparam([InjectParameter('Name')]$Parameter)\n}";
        let target = only_target(source);
        assert_eq!(target.key, name("Name"));
        assert_eq!(target.scope.as_deref(), Some("Tenant"));

        let positional = only_target(
            "function Site {\n[InjectionSite('Tenant')]\nparam([Inject()]$Parameter)\n}",
        );
        assert_eq!(positional.scope.as_deref(), Some("Tenant"));
    }

    #[test]
    fn test_site_scope_conflict() {
        let err = target_error(
            "function Site {\n[InjectionSite('A', Scope = 'B')]\nparam([Inject()]$p)\n}",
        );
        assert_eq!(err.kind(), ErrorKind::ConflictingTarget);
    }

    #[test]
    fn test_template_name() {
        let definition = definition("[InjectTemplate('Template')]{ }\n[InjectTemplate()]{ }");
        let resolver = TargetResolver::new(&definition);
        let names: Vec<Option<String>> = definition
            .templates()
            .iter()
            .map(|id| resolver.template_name(*id).unwrap())
            .collect();
        assert_eq!(names, vec![Some("Template".to_string()), None]);
    }

    #[test]
    fn test_resolve_reports_all_missing_providers_at_once() {
        let definition = definition("[Inject('A')]$a\n[Inject('B')]$b\n[Inject('C')]$c");
        let registry = InMemoryRegistry::new();
        registry.register_provider("B", None, ProviderDescriptor::new());

        let errors = TargetResolver::new(&definition)
            .resolve(&registry)
            .unwrap_err();
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            ScriptError::MissingProvider { targets } => assert_eq!(targets, &["A", "C"]),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_missing_provider_lists_each_target_once() {
        let definition =
            definition("[Inject('Cache')]$a\n[Inject('Cache')]$b\n[InjectSecret('Cache')]$c");
        let errors = TargetResolver::new(&definition)
            .resolve(&InMemoryRegistry::new())
            .unwrap_err();
        assert_eq!(
            errors,
            vec![ScriptError::MissingProvider {
                targets: vec!["Cache".to_string()]
            }]
        );
    }

    #[test]
    fn test_optional_targets_may_stay_unresolved() {
        let definition = definition("[Inject('A', $true)]$a = 1\n[Inject('B')]$b");
        let registry = InMemoryRegistry::new();
        registry.register_provider("B", None, ProviderDescriptor::new());

        let bindings = TargetResolver::new(&definition).resolve(&registry).unwrap();
        assert_eq!(bindings.len(), 2);
        assert!(!bindings[0].is_resolved());
        assert!(bindings[1].is_resolved());
    }

    #[test]
    fn test_scoped_site_resolves_scoped_provider() {
        let definition = definition(
            "function Site {\n[InjectionSite('Tenant')]\nparam([Inject('Store')]$store)\n}",
        );
        let registry = InMemoryRegistry::new();
        registry.register_provider("Store", Some("Tenant"), ProviderDescriptor::new());

        let bindings = TargetResolver::new(&definition).resolve(&registry).unwrap();
        let provider = bindings[0].provider.as_ref().unwrap();
        assert_eq!(provider.scope.as_deref(), Some("Tenant"));
    }
}

#[cfg(test)]
mod tests {
    use crate::compiler::*;
    use crate::config::CompilerConfig;
    use crate::error::{ErrorKind, ScriptError};
    use crate::registry::{InMemoryRegistry, ProviderDescriptor};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn compiler(providers: &[&str]) -> ScriptCompiler {
        let registry = InMemoryRegistry::new();
        for name in providers {
            registry.register_provider(*name, None, ProviderDescriptor::new());
        }
        ScriptCompiler::with_registry(Arc::new(registry))
    }

    const SITES: &str = "function Get-A {
[InjectionSite()]
param([Inject('Clock')]$Clock, $Plain)
$Clock
}
function Get-B {
[InjectionSite(Scope = 'Jobs')]
param()
}
function Main {
[Startup()]
param()
}";

    #[test]
    fn test_inject_variable_by_name() {
        let compiled = compiler(&["Variable"]).compile("[Inject()]$Variable;").unwrap();
        assert_eq!(
            compiled.source,
            "param($PSyringeContext)\n$Variable = $PSyringeContext.GetProvider('Variable');"
        );
        assert!(!compiled.source.contains("Inject"));
        assert_eq!(compiled.providers(), vec!["Variable"]);
    }

    #[test]
    fn test_entrypoints() {
        let compiled = compiler(&["Clock"]).compile(SITES).unwrap();
        let entrypoints = &compiled.entrypoints;

        assert_eq!(entrypoints.startup.as_deref(), Some("Main"));
        assert_eq!(entrypoints.injection_sites.len(), 2);
        assert_eq!(
            entrypoints.injection_sites[0],
            InjectionSiteEntry {
                function: "Get-A".to_string(),
                scope: None,
                parameters: vec!["Clock".to_string()],
            }
        );
        let jobs = entrypoints.injection_site("get-b").unwrap();
        assert_eq!(jobs.scope.as_deref(), Some("Jobs"));
        assert!(jobs.parameters.is_empty());
    }

    #[test]
    fn test_second_startup_fails() {
        let source = format!("{}\nfunction Other {{\n[Startup()]\nparam()\n}}", SITES);
        let errors = compiler(&["Clock"]).compile(&source).unwrap_err();
        assert_eq!(errors.kinds(), vec![ErrorKind::DuplicateStartup]);
    }

    #[test]
    fn test_lifecycle_and_templates() {
        let source = "function Fail {\n[OnError()]\nparam()\n}\nfunction Ready {\n[OnLoaded()]\nparam()\n}\nfunction Bye {\n[BeforeUnload()]\nparam()\n}\n[InjectTemplate('Greeting')]{ 'hi' }\n[InjectTemplate()]{ 'anon' }";
        let compiled = compiler(&[]).compile(source).unwrap();
        let entrypoints = compiled.entrypoints;

        assert_eq!(entrypoints.startup, None);
        assert_eq!(entrypoints.on_error, vec!["Fail"]);
        assert_eq!(entrypoints.on_loaded, vec!["Ready"]);
        assert_eq!(entrypoints.before_unload, vec!["Bye"]);
        assert_eq!(
            entrypoints.templates,
            vec![Some("Greeting".to_string()), None]
        );
        assert!(!compiled.source.contains("InjectTemplate"));
    }

    #[test]
    fn test_entrypoint_map_json() {
        let compiled = compiler(&["Clock"]).compile(SITES).unwrap();
        let json = compiled.entrypoints.to_json().unwrap();
        assert!(json.contains("\"startup\": \"Main\""));
        assert_eq!(EntrypointMap::from_json(&json).unwrap(), compiled.entrypoints);

        let partial = EntrypointMap::from_json(r#"{ "startup": "Main" }"#).unwrap();
        assert!(partial.injection_sites.is_empty());
    }

    #[test]
    fn test_missing_named_target() {
        let errors = compiler(&[])
            .compile("[Inject(Target = 'X')]$V = 'default'")
            .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors.errors()[0],
            ScriptError::MissingProvider {
                targets: vec!["X".to_string()]
            }
        );
    }

    #[test]
    fn test_missing_providers_are_batched() {
        let errors = compiler(&[])
            .compile("[Inject('A')]$a\n[Inject('B')]$b\n[InjectSecret('A')]$c\n[Inject('C')]$d")
            .unwrap_err();
        assert_eq!(errors.len(), 1);
        let ScriptError::MissingProvider { targets } = &errors.errors()[0] else {
            panic!("expected MissingProvider");
        };
        assert_eq!(targets, &vec!["A", "B", "C"]);
    }

    #[test]
    fn test_comment_based_help_is_skipped() {
        let compiler = compiler(&["Variable"]);
        for source in [
            "<# help #>\n[Inject()]$Variable",
            "<#\n.SYNOPSIS\n    Help\n#>\n[Inject()]$Variable",
            "<##>\n[Inject()]$Variable",
        ] {
            let compiled = compiler.compile(source).unwrap();
            assert!(compiled
                .source
                .contains("$Variable = $PSyringeContext.GetProvider('Variable');"));
            assert!(!compiled.source.contains("Help"));
        }
    }

    #[test]
    fn test_conflicts_are_reported_together() {
        let errors = compiler(&["A", "B"])
            .compile("[Inject('A', Target = 'B')]$a\n[Inject(Target = 'B', 'A')]$b")
            .unwrap_err();
        assert_eq!(
            errors.kinds(),
            vec![ErrorKind::ConflictingTarget, ErrorKind::ConflictingTarget]
        );
    }

    #[test]
    fn test_optional_unresolved_keeps_default() {
        let compiled = compiler(&[])
            .compile("[Inject('Missing', $true)]$Cache = 'local'")
            .unwrap();
        assert_eq!(compiled.source, "param($PSyringeContext)\n$Cache = 'local';");
        assert_eq!(compiled.bindings.len(), 1);
        assert!(!compiled.bindings[0].is_resolved());
        assert!(compiled.providers().is_empty());
    }

    #[test]
    fn test_syntax_error_points_into_caller_source() {
        let errors = compiler(&[]).compile("$x = )").unwrap_err();
        assert_eq!(errors.kinds(), vec![ErrorKind::ScriptSyntax]);
        let ScriptError::ScriptSyntax(parse_error) = &errors.errors()[0] else {
            panic!("expected a syntax error");
        };
        assert_eq!(parse_error.position(), Some(5));
    }

    #[test]
    fn test_strict_arguments() {
        let source = "[Inject(Target = 'Clock', Lifetime = 'Scoped')]$c";
        assert!(compiler(&["Clock"]).compile(source).is_ok());

        let config = CompilerConfig {
            strict_arguments: true,
            ..CompilerConfig::default()
        };
        let registry = InMemoryRegistry::new();
        registry.register_provider("Clock", None, ProviderDescriptor::new());
        let strict = ScriptCompiler::new(Arc::new(registry), config);
        let errors = strict.compile(source).unwrap_err();
        assert_eq!(errors.kinds(), vec![ErrorKind::InvalidAnnotationArgument]);
    }

    #[test]
    fn test_from_config() {
        let config = CompilerConfig::from_toml(
            r#"
            context_variable = "Services"

            [[providers]]
            name = "Clock"
            "#,
        )
        .unwrap();
        let compiled = ScriptCompiler::from_config(config)
            .compile("[Inject()]$Clock")
            .unwrap();
        assert_eq!(
            compiled.source,
            "param($Services)\n$Clock = $Services.GetProvider('Clock');"
        );
    }

    #[test]
    fn test_compiles_from_several_threads() {
        let compiler = compiler(&["Clock"]);
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| compiler.compile(SITES).map(|c| c.source)))
                .collect();
            let sources: Vec<String> = handles
                .into_iter()
                .map(|h| h.join().unwrap().unwrap())
                .collect();
            assert!(sources.windows(2).all(|w| w[0] == w[1]));
        });
    }
}

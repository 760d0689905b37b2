//! End-to-end compilation of annotated scripts

use anyhow::Result;
use psyringe_core::ast::Node;
use psyringe_language::prelude::*;
use psyringe_language::visitor::visit;
use psyringe_language::{
    rewrite_with, ElementBuilder, ErrorKind, InjectionRewrite, ProviderLifetime, TargetResolver,
};
use psyringe_parser::parse;
use std::sync::Arc;

const SCRIPT: &str = r#"
[CmdletBinding()]
param(
    [string]$Environment = 'dev'
)

[Inject()][ILogger]$Logger
[InjectSecret('ApiKey')]$Key = 'not-a-secret'
[InjectConstant('Retries')]$Retries = 3
[Inject('Metrics', $true)]$Metrics = $null

function Invoke-Job {
    [InjectionSite(Scope = 'Jobs')]
    param(
        [InjectParameter('Queue')]$Queue,
        [int]$Count = 1
    )
    foreach ($i in 1..$Count) {
        $Queue.Send("job $i")
    }
}

function Start-App {
    [Startup()]
    param()
    $Logger.Info("Starting in $Environment")
    Invoke-Job -Count $Retries
}

function Write-Failure {
    [OnError()]
    param($ErrorRecord)
    $Logger.Error($ErrorRecord)
}

[InjectTemplate('Report')]{ param($Data) $Data | Format-Table }
"#;

fn registry() -> InMemoryRegistry {
    let registry = InMemoryRegistry::new();
    registry.register_provider(
        "ConsoleLogger",
        None,
        ProviderDescriptor::new().with_type("Contoso.Logging.ILogger"),
    );
    registry.register_provider("ApiKey", None, ProviderDescriptor::new());
    registry.register_provider("Retries", None, ProviderDescriptor::new());
    registry.register_provider(
        "Queue",
        Some("Jobs"),
        ProviderDescriptor::new().with_lifetime(ProviderLifetime::Scoped),
    );
    registry
}

fn count(source: &str, predicate: impl FnMut(&Node) -> bool) -> Result<usize> {
    Ok(parse(source)?.find_nodes(predicate).len())
}

#[test]
fn test_full_script() -> Result<()> {
    let compiler = ScriptCompiler::with_registry(Arc::new(registry()));
    let compiled = compiler.compile(SCRIPT)?;
    let source = &compiled.source;

    assert!(source.starts_with("[CmdletBinding()]\nparam($PSyringeContext, [string]$Environment = 'dev')"));
    assert!(source.contains("$Logger = $PSyringeContext.GetProvider('ConsoleLogger');"));
    assert!(source.contains("$Key = $PSyringeContext.GetSecret('ApiKey');"));
    assert!(source.contains("$Retries = $PSyringeContext.GetConstant('Retries');"));
    assert!(source.contains("$Metrics = $null;"));
    assert!(source.contains(
        "param($Queue = $PSyringeContext.GetProvider('Queue', 'Jobs'), [int]$Count = 1)"
    ));
    for marker in ["Inject", "Startup", "OnError", "using namespace PSyringe"] {
        assert!(!source.contains(marker), "{} left in:\n{}", marker, source);
    }

    // The output is itself a valid script with no annotations left
    let fetches = count(source, |n| matches!(n, Node::InvokeMember { .. }))?;
    assert_eq!(fetches, 7);
    assert_eq!(count(source, |n| matches!(n, Node::AttributedExpression { .. }))?, 0);

    let entrypoints = &compiled.entrypoints;
    assert_eq!(entrypoints.startup.as_deref(), Some("Start-App"));
    assert_eq!(entrypoints.on_error, vec!["Write-Failure"]);
    assert_eq!(entrypoints.templates, vec![Some("Report".to_string())]);
    let site = entrypoints
        .injection_site("Invoke-Job")
        .expect("Invoke-Job is an injection site");
    assert_eq!(site.scope.as_deref(), Some("Jobs"));
    assert_eq!(site.parameters, vec!["Queue"]);

    assert_eq!(
        compiled.providers(),
        vec!["ConsoleLogger", "ApiKey", "Retries", "Queue"]
    );
    Ok(())
}

#[test]
fn test_missing_providers_block_compilation() {
    let registry = InMemoryRegistry::new();
    let compiler = ScriptCompiler::with_registry(Arc::new(registry));
    let errors = compiler.compile(SCRIPT).unwrap_err();

    assert_eq!(errors.kinds(), vec![ErrorKind::MissingProvider]);
    let ScriptError::MissingProvider { targets } = &errors.errors()[0] else {
        panic!("expected MissingProvider");
    };
    assert_eq!(targets, &vec!["[ILogger]", "ApiKey", "Retries", "Queue"]);
    assert!(errors.to_string().starts_with("Compilation failed with 1 error(s)"));
}

#[test]
fn test_scoped_provider_is_invisible_outside_its_scope() {
    let registry = InMemoryRegistry::new();
    registry.register_provider("Queue", Some("Jobs"), ProviderDescriptor::new());
    let compiler = ScriptCompiler::with_registry(Arc::new(registry));

    assert!(compiler.compile("[Inject('Queue')]$q").is_err());
    let compiled = compiler.compile(
        "function Run {\n[InjectionSite(Scope = 'Jobs')]\nparam([Inject('Queue')]$q)\n}",
    );
    assert!(compiled.is_ok());
}

#[test]
fn test_configured_compiler() -> Result<()> {
    let config = CompilerConfig::from_toml(
        r#"
        context_variable = "Ctx"

        [[providers]]
        name = "ConsoleLogger"
        types = ["ILogger"]
        "#,
    )?;
    let compiled = ScriptCompiler::from_config(config).compile("[Inject()][ILogger]$Log")?;
    assert_eq!(
        compiled.source,
        "param($Ctx)\n$Log = $Ctx.GetProvider('ConsoleLogger');"
    );
    Ok(())
}

#[test]
fn test_compilation_is_repeatable() -> Result<()> {
    let compiler = ScriptCompiler::with_registry(Arc::new(registry()));
    let first = compiler.compile(SCRIPT)?;
    let second = compiler.compile(SCRIPT)?;
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn test_rewriting_is_pure() -> Result<()> {
    let tree = Arc::new(parse("[Inject('ApiKey')]$Key = 'x'\nWrite-Host $Key")?);
    let visited = visit(&tree)?;
    let definition =
        ElementBuilder::from_visit(tree, &visited).map_err(|e| anyhow::anyhow!("{:?}", e))?;
    let bindings = TargetResolver::new(&definition)
        .resolve(&registry())
        .map_err(|e| anyhow::anyhow!("{:?}", e))?;

    let rule = InjectionRewrite::new(&definition, &bindings, "PSyringeContext", &[]);
    let first = rewrite_with(definition.tree(), &rule)?;
    let second = rewrite_with(definition.tree(), &rule)?;
    assert!(first.same_shape_as(&second));
    assert!(!first.same_shape_as(definition.tree()));
    Ok(())
}

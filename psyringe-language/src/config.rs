//! Compiler configuration, loadable from TOML or JSON

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ScriptError};
use crate::registry::{InMemoryRegistry, ProviderDescriptor, ProviderLifetime};
use crate::vocabulary::PREPARED_NAMESPACES;

/// A provider entry of the `[[providers]]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Registered name, and the id compiled scripts fetch
    pub name: String,
    /// Injection-site scope the provider is limited to
    #[serde(default)]
    pub scope: Option<String>,
    /// Types the provider can stand in for
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub lifetime: ProviderLifetime,
}

impl ProviderConfig {
    fn descriptor(&self) -> ProviderDescriptor {
        let mut descriptor = ProviderDescriptor::new().with_lifetime(self.lifetime);
        for type_name in &self.types {
            descriptor = descriptor.with_type(type_name.clone());
        }
        descriptor
    }
}

/// Compiler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Name of the script parameter that receives the execution context
    pub context_variable: String,
    /// Namespaces prepended as `using namespace` lines before parsing
    pub namespaces: Vec<String>,
    /// Reject unknown named annotation arguments instead of warning
    pub strict_arguments: bool,
    pub providers: Vec<ProviderConfig>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            context_variable: "PSyringeContext".to_string(),
            namespaces: PREPARED_NAMESPACES.iter().map(|n| n.to_string()).collect(),
            strict_arguments: false,
            providers: Vec::new(),
        }
    }
}

impl CompilerConfig {
    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| ScriptError::Config(format!("Failed to parse TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from JSON string
    pub fn from_json(json_str: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json_str)
            .map_err(|e| ScriptError::Config(format!("Failed to parse JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let valid_name = !self.context_variable.is_empty()
            && self
                .context_variable
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_');
        if !valid_name {
            return Err(ScriptError::Config(format!(
                "Invalid context variable name '{}'",
                self.context_variable
            )));
        }
        if let Some(provider) = self.providers.iter().find(|p| p.name.trim().is_empty()) {
            return Err(ScriptError::Config(format!(
                "Provider with types {:?} has no name",
                provider.types
            )));
        }
        Ok(())
    }

    /// Registers every configured provider in `registry`
    pub fn apply_to_registry(&self, registry: &InMemoryRegistry) {
        for provider in &self.providers {
            registry.register_provider(
                provider.name.clone(),
                provider.scope.as_deref(),
                provider.descriptor(),
            );
        }
        debug!("Applied {} configured provider(s)", self.providers.len());
    }

    /// A fresh registry holding the configured providers
    pub fn registry(&self) -> InMemoryRegistry {
        let registry = InMemoryRegistry::new();
        self.apply_to_registry(&registry);
        registry
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

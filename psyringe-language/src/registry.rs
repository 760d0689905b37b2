//! Provider registry: the lookup the compiler uses to check that injected values exist
//!
//! Registries only describe providers. Constructing values is the host's business at run
//! time, through the context variable the compiled script receives.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// What an injection asks for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKey {
    /// A provider registered under a name
    Name(String),
    /// Any provider that declares the type
    Type(String),
}

impl ProviderKey {
    /// Name or type name without decoration
    pub fn id(&self) -> &str {
        match self {
            ProviderKey::Name(name) | ProviderKey::Type(name) => name,
        }
    }
}

impl fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKey::Name(name) => f.write_str(name),
            ProviderKey::Type(name) => write!(f, "[{}]", name),
        }
    }
}

/// How long a provided value lives once the host creates it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderLifetime {
    Transient,
    Scoped,
    #[default]
    Singleton,
}

/// Registration data for a provider
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// Type names the provider can satisfy
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub lifetime: ProviderLifetime,
}

impl ProviderDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.types.push(type_name.into());
        self
    }

    pub fn with_lifetime(mut self, lifetime: ProviderLifetime) -> Self {
        self.lifetime = lifetime;
        self
    }

    fn provides(&self, type_name: &str) -> bool {
        self.types.iter().any(|t| {
            t.eq_ignore_ascii_case(type_name) || short(t).eq_ignore_ascii_case(short(type_name))
        })
    }
}

fn short(type_name: &str) -> &str {
    type_name.rsplit('.').next().unwrap_or(type_name)
}

/// A provider the registry found for a key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderHandle {
    /// Registered name; this is what the compiled script fetches
    pub id: String,
    /// Scope of the registration, `None` for a global provider
    pub scope: Option<String>,
    pub lifetime: ProviderLifetime,
}

/// Resolves provider keys at compile time
pub trait ProviderRegistry: Send + Sync {
    /// Finds a provider for `key`. A scoped lookup prefers a registration in that scope and
    /// falls back to global ones; global lookups never see scoped registrations.
    fn resolve(&self, key: &ProviderKey, scope: Option<&str>) -> Option<ProviderHandle>;
}

impl<T: ProviderRegistry + ?Sized> ProviderRegistry for Arc<T> {
    fn resolve(&self, key: &ProviderKey, scope: Option<&str>) -> Option<ProviderHandle> {
        (**self).resolve(key, scope)
    }
}

#[derive(Debug, Clone)]
struct Registration {
    name: String,
    scope: Option<String>,
    descriptor: ProviderDescriptor,
}

impl Registration {
    fn matches(&self, key: &ProviderKey) -> bool {
        match key {
            ProviderKey::Name(name) => self.name.eq_ignore_ascii_case(name),
            ProviderKey::Type(type_name) => self.descriptor.provides(type_name),
        }
    }

    fn handle(&self) -> ProviderHandle {
        ProviderHandle {
            id: self.name.clone(),
            scope: self.scope.clone(),
            lifetime: self.descriptor.lifetime,
        }
    }
}

/// Thread-safe registry kept in memory, in registration order
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    registrations: RwLock<Vec<Registration>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider. Re-registering a name in the same scope replaces it.
    pub fn register_provider(
        &self,
        name: impl Into<String>,
        scope: Option<&str>,
        descriptor: ProviderDescriptor,
    ) {
        let registration = Registration {
            name: name.into(),
            scope: scope.map(str::to_string),
            descriptor,
        };
        trace!(
            "Registering provider {} (scope: {:?})",
            registration.name,
            registration.scope
        );

        let mut registrations = self.registrations.write();
        let existing = registrations.iter_mut().find(|r| {
            r.name.eq_ignore_ascii_case(&registration.name) && r.scope == registration.scope
        });
        match existing {
            Some(slot) => *slot = registration,
            None => registrations.push(registration),
        }
    }

    pub fn len(&self) -> usize {
        self.registrations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.read().is_empty()
    }

    pub fn clear(&self) {
        self.registrations.write().clear();
    }
}

impl ProviderRegistry for InMemoryRegistry {
    fn resolve(&self, key: &ProviderKey, scope: Option<&str>) -> Option<ProviderHandle> {
        let registrations = self.registrations.read();
        let scoped = scope.and_then(|scope| {
            registrations
                .iter()
                .find(|r| r.scope.as_deref() == Some(scope) && r.matches(key))
        });
        scoped
            .or_else(|| {
                registrations
                    .iter()
                    .find(|r| r.scope.is_none() && r.matches(key))
            })
            .map(Registration::handle)
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;

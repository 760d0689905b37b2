//! Annotation vocabulary: the attribute names that mark injection points

use serde::{Deserialize, Serialize};
use std::fmt;

/// Namespaces prepended to every script before parsing so the markers resolve in the host
pub const PREPARED_NAMESPACES: [&str; 2] = ["PSyringe.Language.Attributes", "PSyringe.Common.Providers"];

/// Semantic role of an element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    InjectVariable,
    InjectSecret,
    InjectDatabase,
    InjectConstant,
    InjectParameter,
    InjectionSite,
    InjectTemplate,
    Startup,
    OnError,
    OnLoaded,
    BeforeUnload,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::InjectVariable => "InjectVariable",
            Role::InjectSecret => "InjectSecret",
            Role::InjectDatabase => "InjectDatabase",
            Role::InjectConstant => "InjectConstant",
            Role::InjectParameter => "InjectParameter",
            Role::InjectionSite => "InjectionSite",
            Role::InjectTemplate => "InjectTemplate",
            Role::Startup => "Startup",
            Role::OnError => "OnError",
            Role::OnLoaded => "OnLoaded",
            Role::BeforeUnload => "BeforeUnload",
        }
    }

    /// Roles carried by function definitions and located by the executor
    pub fn is_entrypoint(&self) -> bool {
        matches!(
            self,
            Role::InjectionSite | Role::Startup | Role::OnError | Role::OnLoaded | Role::BeforeUnload
        )
    }

    /// Roles whose declaration receives a provider value
    pub fn is_injectable(&self) -> bool {
        self.fetch_method().is_some()
    }

    /// Method of the execution context that fetches a value for this role
    pub fn fetch_method(&self) -> Option<&'static str> {
        match self {
            Role::InjectVariable | Role::InjectParameter => Some("GetProvider"),
            Role::InjectSecret => Some("GetSecret"),
            Role::InjectDatabase => Some("GetDatabase"),
            Role::InjectConstant => Some("GetConstant"),
            Role::InjectionSite
            | Role::InjectTemplate
            | Role::Startup
            | Role::OnError
            | Role::OnLoaded
            | Role::BeforeUnload => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of node an annotation is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Site {
    /// An attribute/convert chain ending in a variable
    Variable,
    Parameter,
    /// A function definition, through its body's `param()` block
    Function,
    ScriptBlock,
}

/// Recognized attribute names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    Inject,
    InjectParameter,
    InjectSecret,
    InjectDatabase,
    InjectConstant,
    InjectionSite,
    Startup,
    OnError,
    OnLoaded,
    BeforeUnload,
    InjectTemplate,
}

impl Marker {
    pub const ALL: [Marker; 11] = [
        Marker::Inject,
        Marker::InjectParameter,
        Marker::InjectSecret,
        Marker::InjectDatabase,
        Marker::InjectConstant,
        Marker::InjectionSite,
        Marker::Startup,
        Marker::OnError,
        Marker::OnLoaded,
        Marker::BeforeUnload,
        Marker::InjectTemplate,
    ];

    /// Canonical attribute name
    pub fn name(&self) -> &'static str {
        match self {
            Marker::Inject => "Inject",
            Marker::InjectParameter => "InjectParameter",
            Marker::InjectSecret => "InjectSecret",
            Marker::InjectDatabase => "InjectDatabase",
            Marker::InjectConstant => "InjectConstant",
            Marker::InjectionSite => "InjectionSite",
            Marker::Startup => "Startup",
            Marker::OnError => "OnError",
            Marker::OnLoaded => "OnLoaded",
            Marker::BeforeUnload => "BeforeUnload",
            Marker::InjectTemplate => "InjectTemplate",
        }
    }

    /// Looks up an attribute type name.
    ///
    /// Matching ignores case, any namespace qualification and an `Attribute` suffix, so
    /// `PSyringe.Language.Attributes.InjectAttribute` and `inject` are the same marker.
    pub fn from_attribute_name(name: &str) -> Option<Marker> {
        let short = name.rsplit('.').next().unwrap_or(name);
        let lower = short.to_ascii_lowercase();
        let lower = match lower.strip_suffix("attribute") {
            Some(stripped) if !stripped.is_empty() => stripped,
            _ => lower.as_str(),
        };

        let marker = match lower {
            "inject" => Marker::Inject,
            "injectparameter" => Marker::InjectParameter,
            "injectsecret" | "injectcredential" => Marker::InjectSecret,
            "injectdatabase" => Marker::InjectDatabase,
            "injectconstant" => Marker::InjectConstant,
            "injectionsite" => Marker::InjectionSite,
            "startup" => Marker::Startup,
            "onerror" => Marker::OnError,
            "onloaded" | "onload" => Marker::OnLoaded,
            "beforeunload" => Marker::BeforeUnload,
            "injecttemplate" => Marker::InjectTemplate,
            _ => return None,
        };
        Some(marker)
    }

    /// Role this marker gives to a node of the given kind, if it applies there at all
    pub fn applies_to(&self, site: Site) -> Option<Role> {
        match (self, site) {
            (Marker::Inject, Site::Variable) => Some(Role::InjectVariable),
            (Marker::Inject | Marker::InjectParameter, Site::Parameter) => {
                Some(Role::InjectParameter)
            }
            (Marker::InjectSecret, Site::Variable) => Some(Role::InjectSecret),
            (Marker::InjectDatabase, Site::Variable) => Some(Role::InjectDatabase),
            (Marker::InjectConstant, Site::Variable) => Some(Role::InjectConstant),
            (Marker::InjectionSite, Site::Function) => Some(Role::InjectionSite),
            (Marker::Startup, Site::Function) => Some(Role::Startup),
            (Marker::OnError, Site::Function) => Some(Role::OnError),
            (Marker::OnLoaded, Site::Function) => Some(Role::OnLoaded),
            (Marker::BeforeUnload, Site::Function) => Some(Role::BeforeUnload),
            (Marker::InjectTemplate, Site::ScriptBlock) => Some(Role::InjectTemplate),
            _ => None,
        }
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
#[path = "vocabulary_tests.rs"]
mod tests;

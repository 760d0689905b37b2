//! Incremental construction of a [`ScriptDefinition`]
//!
//! The builder enforces the structural rules of a script:
//! - at most one startup function
//! - an injected parameter needs an injection site to belong to
//! - a node carries at most one role; adding the same node under the same role again is a no-op
//! - nothing can be added once the definition is built

use psyringe_core::ast::{NodeId, SyntaxTree};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::elements::{node_label, Element, ElementId, InjectionSiteElement, ScriptDefinition};
use crate::error::{Result, ScriptError};
use crate::visitor::{Candidate, VisitResult};
use crate::vocabulary::Role;

pub struct ElementBuilder {
    tree: Arc<SyntaxTree>,
    elements: Vec<Element>,
    by_node: FxHashMap<NodeId, ElementId>,
    injection_sites: Vec<InjectionSiteElement>,
    site_index: FxHashMap<NodeId, usize>,
    startup: Option<ElementId>,
    variables: Vec<ElementId>,
    templates: Vec<ElementId>,
    on_error: Vec<ElementId>,
    on_loaded: Vec<ElementId>,
    before_unload: Vec<ElementId>,
    finalized: bool,
}

impl ElementBuilder {
    pub fn new(tree: Arc<SyntaxTree>) -> Self {
        Self {
            tree,
            elements: Vec::new(),
            by_node: FxHashMap::default(),
            injection_sites: Vec::new(),
            site_index: FxHashMap::default(),
            startup: None,
            variables: Vec::new(),
            templates: Vec::new(),
            on_error: Vec::new(),
            on_loaded: Vec::new(),
            before_unload: Vec::new(),
            finalized: false,
        }
    }

    /// Builds a definition from a visit, registering functions before the parameters
    /// that refer to them.
    ///
    /// Every structural error is collected rather than stopping at the first one.
    pub fn from_visit(
        tree: Arc<SyntaxTree>,
        visit: &VisitResult,
    ) -> std::result::Result<ScriptDefinition, Vec<ScriptError>> {
        let mut builder = Self::new(tree);
        let mut errors = Vec::new();

        let (functions, others): (Vec<&(Role, Candidate)>, Vec<_>) = visit
            .candidates
            .iter()
            .partition(|(role, _)| role.is_entrypoint());

        for (role, candidate) in functions.into_iter().chain(others) {
            if let Err(err) = builder.add(*role, candidate) {
                errors.push(err);
            }
        }
        for (owner, candidate) in &visit.parameters {
            if let Err(err) = builder.add_parameter_to_injection_site(*owner, candidate) {
                errors.push(err);
            }
        }

        if !errors.is_empty() {
            debug!("Element builder rejected script with {} error(s)", errors.len());
            return Err(errors);
        }
        builder.build().map_err(|err| vec![err])
    }

    /// Dispatches a visited candidate to the matching `add_*` operation
    pub fn add(&mut self, role: Role, candidate: &Candidate) -> Result<ElementId> {
        match role {
            Role::InjectionSite => self.add_injection_site(candidate),
            Role::Startup => self.set_startup_function(candidate),
            Role::OnError => self.add_on_error_function(candidate),
            Role::OnLoaded => self.add_on_loaded_function(candidate),
            Role::BeforeUnload => self.add_before_unload_function(candidate),
            Role::InjectTemplate => self.add_inject_template(candidate),
            Role::InjectVariable => self.add_inject_variable(candidate),
            Role::InjectSecret => self.add_inject_secret(candidate),
            Role::InjectDatabase => self.add_inject_database(candidate),
            Role::InjectConstant => self.add_inject_constant(candidate),
            Role::InjectParameter => Err(ScriptError::OrphanParameter {
                parameter: node_label(&self.tree, candidate.node),
                owner: "script".to_string(),
            }),
        }
    }

    pub fn add_injection_site(&mut self, candidate: &Candidate) -> Result<ElementId> {
        let (id, added) = self.register(Role::InjectionSite, candidate)?;
        if added {
            self.site_index
                .insert(candidate.node, self.injection_sites.len());
            self.injection_sites.push(InjectionSiteElement {
                element: id,
                parameters: Vec::new(),
            });
        }
        Ok(id)
    }

    /// Registers a parameter of the injection site defined by `function`
    pub fn add_parameter_to_injection_site(
        &mut self,
        function: NodeId,
        candidate: &Candidate,
    ) -> Result<ElementId> {
        self.ensure_open()?;
        let Some(&site) = self.site_index.get(&function) else {
            return Err(ScriptError::OrphanParameter {
                parameter: node_label(&self.tree, candidate.node),
                owner: node_label(&self.tree, function),
            });
        };

        let (id, added) = self.register(Role::InjectParameter, candidate)?;
        if added {
            self.injection_sites[site].parameters.push(id);
        }
        Ok(id)
    }

    /// Fails with `DuplicateStartup` on every call after the first
    pub fn set_startup_function(&mut self, candidate: &Candidate) -> Result<ElementId> {
        self.ensure_open()?;
        if let Some(existing) = self.startup {
            let existing_node = self.elements[existing.index()].node;
            return Err(ScriptError::DuplicateStartup {
                existing: node_label(&self.tree, existing_node),
                duplicate: node_label(&self.tree, candidate.node),
            });
        }

        let (id, _) = self.register(Role::Startup, candidate)?;
        self.startup = Some(id);
        Ok(id)
    }

    pub fn add_on_error_function(&mut self, candidate: &Candidate) -> Result<ElementId> {
        let (id, added) = self.register(Role::OnError, candidate)?;
        if added {
            self.on_error.push(id);
        }
        Ok(id)
    }

    pub fn add_on_loaded_function(&mut self, candidate: &Candidate) -> Result<ElementId> {
        let (id, added) = self.register(Role::OnLoaded, candidate)?;
        if added {
            self.on_loaded.push(id);
        }
        Ok(id)
    }

    pub fn add_before_unload_function(&mut self, candidate: &Candidate) -> Result<ElementId> {
        let (id, added) = self.register(Role::BeforeUnload, candidate)?;
        if added {
            self.before_unload.push(id);
        }
        Ok(id)
    }

    pub fn add_inject_template(&mut self, candidate: &Candidate) -> Result<ElementId> {
        let (id, added) = self.register(Role::InjectTemplate, candidate)?;
        if added {
            self.templates.push(id);
        }
        Ok(id)
    }

    pub fn add_inject_variable(&mut self, candidate: &Candidate) -> Result<ElementId> {
        self.add_variable(Role::InjectVariable, candidate)
    }

    pub fn add_inject_secret(&mut self, candidate: &Candidate) -> Result<ElementId> {
        self.add_variable(Role::InjectSecret, candidate)
    }

    pub fn add_inject_database(&mut self, candidate: &Candidate) -> Result<ElementId> {
        self.add_variable(Role::InjectDatabase, candidate)
    }

    pub fn add_inject_constant(&mut self, candidate: &Candidate) -> Result<ElementId> {
        self.add_variable(Role::InjectConstant, candidate)
    }

    /// Finalizes the builder. Any later call fails with `BuilderFinalized`.
    pub fn build(&mut self) -> Result<ScriptDefinition> {
        self.ensure_open()?;
        self.finalized = true;

        debug!(
            "Built script definition: {} elements, {} injection sites, startup: {}",
            self.elements.len(),
            self.injection_sites.len(),
            self.startup.is_some()
        );
        Ok(ScriptDefinition {
            tree: Arc::clone(&self.tree),
            elements: std::mem::take(&mut self.elements),
            injection_sites: std::mem::take(&mut self.injection_sites),
            startup: self.startup.take(),
            variables: std::mem::take(&mut self.variables),
            templates: std::mem::take(&mut self.templates),
            on_error: std::mem::take(&mut self.on_error),
            on_loaded: std::mem::take(&mut self.on_loaded),
            before_unload: std::mem::take(&mut self.before_unload),
        })
    }

    fn add_variable(&mut self, role: Role, candidate: &Candidate) -> Result<ElementId> {
        let (id, added) = self.register(role, candidate)?;
        if added {
            self.variables.push(id);
        }
        Ok(id)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.finalized {
            Err(ScriptError::BuilderFinalized)
        } else {
            Ok(())
        }
    }

    /// Adds an element for `candidate`, or returns the existing one if the node already
    /// has this role. The flag is true when a new element was created.
    fn register(&mut self, role: Role, candidate: &Candidate) -> Result<(ElementId, bool)> {
        self.ensure_open()?;

        if let Some(&existing) = self.by_node.get(&candidate.node) {
            let first = self.elements[existing.index()].role;
            if first == role {
                trace!("Node {} already registered as {}", candidate.node, role);
                return Ok((existing, false));
            }
            return Err(ScriptError::ConflictingRoles {
                node: node_label(&self.tree, candidate.node),
                first,
                second: role,
            });
        }

        let id = ElementId(self.elements.len() as u32);
        self.elements.push(Element {
            role,
            node: candidate.node,
            annotation: candidate.annotation,
            declaration: candidate.declaration,
        });
        self.by_node.insert(candidate.node, id);
        trace!("Registered {} as {}", candidate.node, role);
        Ok((id, true))
    }
}

#[cfg(test)]
#[path = "builder_tests.rs"]
mod tests;

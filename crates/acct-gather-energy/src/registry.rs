//! ---
//! acct_section: "02-energy-accounting"
//! acct_subsection: "module"
//! acct_type: "source"
//! acct_scope: "code"
//! acct_description: "Energy backend dispatch, sample codec, and sampler."
//! acct_version: "v0.0.0-prealpha"
//! acct_owner: "tbd"
//! ---
//! Name-to-factory registry used to bind an energy backend at runtime.
//!
//! Deployments differ in which power sources exist on a node, so the backend
//! is chosen by configured name. Names are accepted bare (`synthetic`) or
//! qualified with the plugin category (`acct_gather_energy/synthetic`).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::backends::{NoneBackendFactory, SyntheticBackendFactory};
use crate::error::{EnergyError, Result};
use crate::ops::EnergyOps;

/// Plugin category energy backends are registered under.
pub const ENERGY_PLUGIN_TYPE: &str = "acct_gather_energy";

/// Builds backend instances of one type.
pub trait BackendFactory: Send + Sync + 'static {
    /// Name matched against the configured backend, without the category prefix.
    fn backend_type(&self) -> &'static str;

    /// Human-readable description for listings and error messages.
    fn description(&self) -> &'static str {
        self.backend_type()
    }

    /// Instantiate a backend. Called once per successful init.
    fn build(&self) -> Result<Arc<dyn EnergyOps>>;
}

/// Factory wrapping a closure, handy for tests and embedders.
pub struct FnBackendFactory<F> {
    backend_type: &'static str,
    build: F,
}

impl<F> FnBackendFactory<F>
where
    F: Fn() -> Result<Arc<dyn EnergyOps>> + Send + Sync + 'static,
{
    pub fn new(backend_type: &'static str, build: F) -> Self {
        Self {
            backend_type,
            build,
        }
    }
}

impl<F> BackendFactory for FnBackendFactory<F>
where
    F: Fn() -> Result<Arc<dyn EnergyOps>> + Send + Sync + 'static,
{
    fn backend_type(&self) -> &'static str {
        self.backend_type
    }

    fn build(&self) -> Result<Arc<dyn EnergyOps>> {
        (self.build)()
    }
}

/// Registry of backend factories keyed by backend type.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    factories: HashMap<String, Arc<dyn BackendFactory>>,
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.names())
            .finish()
    }
}

impl BackendRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the in-tree backends (`none`, `synthetic`).
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.insert(Arc::new(NoneBackendFactory));
        registry.insert(Arc::new(SyntheticBackendFactory));
        registry
    }

    /// Register a factory. Fails if its backend type is already taken.
    pub fn register(&mut self, factory: Arc<dyn BackendFactory>) -> Result<()> {
        let key = factory.backend_type().to_ascii_lowercase();
        if self.factories.contains_key(&key) {
            return Err(EnergyError::config(format!(
                "{ENERGY_PLUGIN_TYPE} backend '{key}' registered twice"
            )));
        }
        debug!(backend = %key, description = factory.description(), "registered energy backend");
        self.factories.insert(key, factory);
        Ok(())
    }

    /// Register a closure-backed factory.
    pub fn register_fn<F>(&mut self, backend_type: &'static str, build: F) -> Result<()>
    where
        F: Fn() -> Result<Arc<dyn EnergyOps>> + Send + Sync + 'static,
    {
        self.register(Arc::new(FnBackendFactory::new(backend_type, build)))
    }

    fn insert(&mut self, factory: Arc<dyn BackendFactory>) {
        self.factories
            .insert(factory.backend_type().to_ascii_lowercase(), factory);
    }

    /// Registered backend types, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolve a configured name to a freshly built backend.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn EnergyOps>> {
        let unavailable = |reason: String| EnergyError::BackendUnavailable {
            plugin_type: ENERGY_PLUGIN_TYPE.to_owned(),
            name: name.to_owned(),
            reason,
        };
        let key = normalize_name(name).map_err(unavailable)?;
        let factory = self
            .factories
            .get(&key)
            .ok_or_else(|| unavailable(format!("no backend registered as '{key}'")))?;
        factory
            .build()
            .map_err(|err| unavailable(format!("backend '{key}' failed to build: {err}")))
    }
}

/// Strip the category prefix and lowercase the backend type.
fn normalize_name(name: &str) -> std::result::Result<String, String> {
    let trimmed = name.trim();
    let bare = match trimmed.split_once('/') {
        Some((category, rest)) if category == ENERGY_PLUGIN_TYPE => rest,
        Some((category, _)) => {
            return Err(format!(
                "plugin category '{category}' is not {ENERGY_PLUGIN_TYPE}"
            ))
        }
        None => trimmed,
    };
    if bare.is_empty() {
        return Err("empty backend name".to_owned());
    }
    Ok(bare.to_ascii_lowercase())
}

//! ---
//! acct_section: "02-energy-accounting"
//! acct_subsection: "module"
//! acct_type: "source"
//! acct_scope: "code"
//! acct_description: "Energy backend dispatch, sample codec, and sampler."
//! acct_version: "v0.0.0-prealpha"
//! acct_owner: "tbd"
//! ---
//! Lazily bound dispatcher in front of the configured energy backend.
//!
//! The context is shared as `Arc<EnergyContext>` between the daemon and the
//! sampler. Every operation initializes on demand; once bound, dispatch only
//! takes a read lock on the binding slot.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use acct_gather_common::config::EnergyConfig;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::conf::{loader_for, ConfLoader, NoConfLoader};
use crate::error::{EnergyError, Result};
use crate::metrics::{DispatchOp, DispatchOutcome, EnergyMetricsExporter};
use crate::ops::{
    ConfigList, ConfigTable, EnergyData, EnergyDataKind, EnergyOps, OptionsDescriptor,
};
use crate::registry::{BackendRegistry, ENERGY_PLUGIN_TYPE};
use crate::sample::EnergySample;

struct Binding {
    name: String,
    ops: Arc<dyn EnergyOps>,
}

#[derive(Default)]
struct InitState {
    failure: Option<EnergyError>,
}

/// Owner of the bound energy backend.
pub struct EnergyContext {
    backend_name: String,
    registry: Arc<BackendRegistry>,
    conf_loader: Box<dyn ConfLoader>,
    metrics: Option<EnergyMetricsExporter>,
    initialized: AtomicBool,
    binding: RwLock<Option<Binding>>,
    init_lock: Mutex<InitState>,
    resolutions: AtomicU64,
}

impl fmt::Debug for EnergyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnergyContext")
            .field("backend_name", &self.backend_name)
            .field("initialized", &self.is_initialized())
            .field("conf_loader", &self.conf_loader)
            .field("resolutions", &self.resolutions())
            .finish()
    }
}

impl EnergyContext {
    /// Context for `backend_name`, resolved through `registry` on first use.
    pub fn new(backend_name: impl Into<String>, registry: Arc<BackendRegistry>) -> Self {
        Self {
            backend_name: backend_name.into(),
            registry,
            conf_loader: Box::new(NoConfLoader),
            metrics: None,
            initialized: AtomicBool::new(false),
            binding: RwLock::new(None),
            init_lock: Mutex::new(InitState::default()),
            resolutions: AtomicU64::new(0),
        }
    }

    /// Context built from the daemon's `[energy]` section, including its
    /// static option source.
    pub fn from_config(config: &EnergyConfig, registry: Arc<BackendRegistry>) -> Self {
        let mut context = Self::new(config.backend.clone(), registry);
        context.conf_loader = loader_for(config);
        context
    }

    pub fn with_conf_loader(mut self, loader: impl ConfLoader + 'static) -> Self {
        self.conf_loader = Box::new(loader);
        self
    }

    pub fn with_metrics(mut self, metrics: EnergyMetricsExporter) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub(crate) fn metrics(&self) -> Option<&EnergyMetricsExporter> {
        self.metrics.as_ref()
    }

    /// Backend name as configured.
    pub fn backend_name(&self) -> &str {
        &self.backend_name
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Number of registry lookups performed so far.
    pub fn resolutions(&self) -> u64 {
        self.resolutions.load(Ordering::Relaxed)
    }

    /// Bind the configured backend if not already bound.
    ///
    /// A failure is remembered: later calls return the same error without
    /// resolving again until [`fini`](Self::fini) clears it.
    pub fn init(&self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }

        let mut state = self.init_lock.lock();
        if self.is_initialized() {
            return Ok(());
        }
        if let Some(failure) = &state.failure {
            return Err(failure.clone());
        }

        self.resolutions.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.observe_resolution();
        }

        match self.bind() {
            Ok(binding) => {
                info!(
                    plugin_type = ENERGY_PLUGIN_TYPE,
                    backend = %binding.name,
                    "energy backend bound"
                );
                *self.binding.write() = Some(binding);
                self.initialized.store(true, Ordering::Release);
                Ok(())
            }
            Err(err) => {
                warn!(backend = %self.backend_name, error = %err, "energy init failed");
                if let Some(metrics) = &self.metrics {
                    metrics.observe_init_failure();
                }
                state.failure = Some(err.clone());
                Err(err)
            }
        }
    }

    fn bind(&self) -> Result<Binding> {
        let ops = self.registry.resolve(&self.backend_name)?;
        self.conf_loader.load(ops.as_ref())?;
        Ok(Binding {
            name: self.backend_name.clone(),
            ops,
        })
    }

    /// Release the bound backend. Safe to call repeatedly or before init.
    pub fn fini(&self) -> Result<()> {
        let mut state = self.init_lock.lock();
        state.failure = None;
        self.initialized.store(false, Ordering::Release);
        match self.binding.write().take() {
            Some(binding) => info!(backend = %binding.name, "energy backend released"),
            None => debug!("energy fini with no backend bound"),
        }
        Ok(())
    }

    fn backend(&self) -> Result<Arc<dyn EnergyOps>> {
        self.init().map_err(|err| EnergyError::NotInitialized(Box::new(err)))?;
        self.bound()
    }

    /// The current binding, without initializing.
    fn bound(&self) -> Result<Arc<dyn EnergyOps>> {
        self.binding
            .read()
            .as_ref()
            .map(|binding| Arc::clone(&binding.ops))
            .ok_or_else(|| {
                EnergyError::NotInitialized(Box::new(EnergyError::BackendUnavailable {
                    plugin_type: ENERGY_PLUGIN_TYPE.to_owned(),
                    name: self.backend_name.clone(),
                    reason: "no backend bound".to_owned(),
                }))
            })
    }

    fn observe<T>(&self, op: DispatchOp, result: &Result<T>) {
        if let Some(metrics) = &self.metrics {
            let outcome = match result {
                Ok(_) => DispatchOutcome::Ok,
                Err(EnergyError::NotInitialized(_)) => DispatchOutcome::NotInitialized,
                Err(_) => DispatchOutcome::Error,
            };
            metrics.observe_dispatch(op, outcome);
        }
    }

    fn dispatch<T>(
        &self,
        op: DispatchOp,
        call: impl FnOnce(&dyn EnergyOps) -> Result<T>,
    ) -> Result<T> {
        let result = self.backend().and_then(|ops| call(ops.as_ref()));
        self.observe(op, &result);
        result
    }

    /// `set_data` against the current binding only. After [`fini`](Self::fini)
    /// this fails with `NotInitialized` instead of binding the backend again.
    pub(crate) fn bound_set_data(&self, kind: EnergyDataKind, data: EnergyData) -> Result<()> {
        let result = self.bound().and_then(|ops| ops.set_data(kind, data));
        self.observe(DispatchOp::SetData, &result);
        result
    }

    pub fn update_node_energy(&self) -> Result<()> {
        self.dispatch(DispatchOp::UpdateNodeEnergy, |ops| ops.update_node_energy())
    }

    pub fn get_data(&self, kind: EnergyDataKind) -> Result<EnergyData> {
        self.dispatch(DispatchOp::GetData, |ops| ops.get_data(kind))
    }

    pub fn set_data(&self, kind: EnergyDataKind, data: EnergyData) -> Result<()> {
        self.dispatch(DispatchOp::SetData, |ops| ops.set_data(kind, data))
    }

    pub fn conf_options(&self) -> Result<OptionsDescriptor> {
        self.dispatch(DispatchOp::ConfOptions, |ops| Ok(ops.conf_options()))
    }

    pub fn conf_set(&self, table: &ConfigTable) -> Result<()> {
        self.dispatch(DispatchOp::ConfSet, |ops| ops.conf_set(table))
    }

    pub fn get_config(&self) -> Result<ConfigList> {
        self.dispatch(DispatchOp::GetConfig, |ops| Ok(ops.get_config()))
    }

    /// The cached node sample.
    pub fn node_sample(&self) -> Result<EnergySample> {
        match self.get_data(EnergyDataKind::NodeSample)? {
            EnergyData::Sample(sample) => Ok(sample),
            other => Err(EnergyError::backend(format!(
                "node_sample answered with {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::backends::SyntheticBackend;
    use crate::conf::InlineConfLoader;

    fn counting_registry(builds: Arc<AtomicUsize>) -> Arc<BackendRegistry> {
        let mut registry = BackendRegistry::new();
        registry
            .register_fn("synthetic", move || {
                builds.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(SyntheticBackend::new()) as Arc<dyn EnergyOps>)
            })
            .unwrap();
        Arc::new(registry)
    }

    #[test]
    fn init_is_idempotent() {
        let builds = Arc::new(AtomicUsize::new(0));
        let context = EnergyContext::new("synthetic", counting_registry(Arc::clone(&builds)));
        context.init().unwrap();
        context.init().unwrap();
        context.get_config().unwrap();
        assert!(context.is_initialized());
        assert_eq!(context.resolutions(), 1);
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_init_is_sticky_until_fini() {
        let context = EnergyContext::new("rapl", Arc::new(BackendRegistry::with_builtin()));
        let first = context.init().unwrap_err();
        let second = context.init().unwrap_err();
        assert_eq!(first, second);
        assert_eq!(context.resolutions(), 1);

        context.fini().unwrap();
        assert!(context.init().is_err());
        assert_eq!(context.resolutions(), 2);
    }

    #[test]
    fn dispatch_wraps_init_failure() {
        let context = EnergyContext::new("rapl", Arc::new(BackendRegistry::with_builtin()));
        let init_err = context.init().unwrap_err();
        let err = context.update_node_energy().unwrap_err();
        assert!(matches!(err, EnergyError::NotInitialized(_)));
        assert_eq!(err.root_cause(), &init_err);
        assert!(context.conf_options().is_err());
        assert!(context.get_config().is_err());
    }

    #[test]
    fn conf_failure_discards_binding() {
        let mut options = toml::Table::new();
        options.insert("SyntheticWatts".into(), toml::Value::Integer(10));
        options.insert("SyntheticBaseWatts".into(), toml::Value::Integer(40));
        let context = EnergyContext::new("synthetic", Arc::new(BackendRegistry::with_builtin()))
            .with_conf_loader(InlineConfLoader::new(options));
        let err = context.init().unwrap_err();
        assert!(matches!(err, EnergyError::Config(_)));
        assert!(!context.is_initialized());
        assert!(context.get_data(EnergyDataKind::NodeSample).is_err());
    }

    #[test]
    fn backend_errors_pass_through_unchanged() {
        let context = EnergyContext::new("synthetic", Arc::new(BackendRegistry::with_builtin()));
        let err = context.get_data(EnergyDataKind::Reconfig).unwrap_err();
        assert_eq!(err, EnergyError::UnsupportedData(EnergyDataKind::Reconfig));
    }

    #[test]
    fn fini_releases_and_rebinds_on_next_call() {
        let builds = Arc::new(AtomicUsize::new(0));
        let context = EnergyContext::new("synthetic", counting_registry(Arc::clone(&builds)));
        context.fini().unwrap();
        assert!(!context.is_initialized());

        context.update_node_energy().unwrap();
        context.fini().unwrap();
        context.fini().unwrap();
        assert!(!context.is_initialized());

        let sample = context.node_sample().unwrap();
        assert!(sample.is_zero());
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn bound_set_data_never_rebinds_after_fini() {
        let builds = Arc::new(AtomicUsize::new(0));
        let context = EnergyContext::new("synthetic", counting_registry(Arc::clone(&builds)));
        let err = context
            .bound_set_data(EnergyDataKind::Profile, EnergyData::Interval(9))
            .unwrap_err();
        assert!(matches!(err, EnergyError::NotInitialized(_)));
        assert_eq!(context.resolutions(), 0);

        context.init().unwrap();
        context
            .bound_set_data(EnergyDataKind::Profile, EnergyData::Interval(9))
            .unwrap();

        context.fini().unwrap();
        let err = context
            .bound_set_data(EnergyDataKind::Profile, EnergyData::Interval(9))
            .unwrap_err();
        assert!(matches!(err, EnergyError::NotInitialized(_)));
        assert!(!context.is_initialized());
        assert_eq!(context.resolutions(), 1);
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }
}

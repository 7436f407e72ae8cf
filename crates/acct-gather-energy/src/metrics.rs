//! ---
//! acct_section: "02-energy-accounting"
//! acct_subsection: "module"
//! acct_type: "source"
//! acct_scope: "code"
//! acct_description: "Energy backend dispatch, sample codec, and sampler."
//! acct_version: "v0.0.0-prealpha"
//! acct_owner: "tbd"
//! ---
use std::time::Duration;

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use strum::{AsRefStr, Display};
use tracing::trace;

/// Dispatcher operations, used as the `op` metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum DispatchOp {
    UpdateNodeEnergy,
    GetData,
    SetData,
    ConfOptions,
    ConfSet,
    GetConfig,
}

/// How a dispatched call ended, used as the `outcome` metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum DispatchOutcome {
    Ok,
    Error,
    NotInitialized,
}

/// Emit a trace entry for a dispatched call.
pub fn log_dispatch(op: DispatchOp, outcome: DispatchOutcome) {
    trace!(%op, %outcome, "energy dispatch");
}

/// Prometheus metric handles for the energy accounting layer.
#[derive(Clone)]
pub struct EnergyMetricsExporter {
    dispatch: IntCounterVec,
    resolutions: IntCounter,
    init_failures: IntCounter,
    sampler_ticks: IntCounter,
    sampler_running: IntGauge,
    poll_latency: Histogram,
}

impl EnergyMetricsExporter {
    /// Register energy metrics with the provided registry.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let dispatch = IntCounterVec::new(
            Opts::new(
                "energy_dispatch_total",
                "Calls routed to the bound energy backend",
            ),
            &["op", "outcome"],
        )?;
        let resolutions = IntCounter::with_opts(Opts::new(
            "energy_backend_resolutions_total",
            "Backend lookups performed by init",
        ))?;
        let init_failures = IntCounter::with_opts(Opts::new(
            "energy_init_failures_total",
            "Init attempts that left the context without a backend",
        ))?;
        let sampler_ticks = IntCounter::with_opts(Opts::new(
            "energy_sampler_ticks_total",
            "Profile ticks delivered to the backend by the sampler",
        ))?;
        let sampler_running = IntGauge::with_opts(Opts::new(
            "energy_sampler_running",
            "Energy sampler threads currently inside their poll loop",
        ))?;
        let poll_latency = Histogram::with_opts(HistogramOpts::new(
            "energy_poll_duration_seconds",
            "Time spent by the backend handling a profile tick",
        ))?;

        registry.register(Box::new(dispatch.clone()))?;
        registry.register(Box::new(resolutions.clone()))?;
        registry.register(Box::new(init_failures.clone()))?;
        registry.register(Box::new(sampler_ticks.clone()))?;
        registry.register(Box::new(sampler_running.clone()))?;
        registry.register(Box::new(poll_latency.clone()))?;

        Ok(Self {
            dispatch,
            resolutions,
            init_failures,
            sampler_ticks,
            sampler_running,
            poll_latency,
        })
    }

    /// Record one dispatched call.
    pub fn observe_dispatch(&self, op: DispatchOp, outcome: DispatchOutcome) {
        log_dispatch(op, outcome);
        self.dispatch
            .with_label_values(&[op.as_ref(), outcome.as_ref()])
            .inc();
    }

    /// Record a registry lookup.
    pub fn observe_resolution(&self) {
        self.resolutions.inc();
    }

    /// Record a failed init.
    pub fn observe_init_failure(&self) {
        self.init_failures.inc();
    }

    /// Record a sampler tick and the time the backend took to handle it.
    pub fn observe_tick(&self, duration: Duration) {
        self.sampler_ticks.inc();
        self.poll_latency.observe(duration.as_secs_f64());
    }

    /// A sampler thread entered its poll loop.
    pub fn sampler_entered(&self) {
        self.sampler_running.inc();
    }

    /// A sampler thread left its poll loop.
    pub fn sampler_exited(&self) {
        self.sampler_running.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exporter_records_dispatch_by_label() {
        let registry = Registry::new();
        let metrics = EnergyMetricsExporter::register(&registry).expect("register metrics");
        metrics.observe_dispatch(DispatchOp::GetData, DispatchOutcome::Ok);
        metrics.observe_dispatch(DispatchOp::GetData, DispatchOutcome::NotInitialized);
        metrics.observe_resolution();
        metrics.observe_tick(Duration::from_millis(3));
        metrics.sampler_entered();
        metrics.sampler_entered();
        metrics.sampler_exited();

        let families = registry.gather();
        let dispatch = families
            .iter()
            .find(|family| family.get_name() == "energy_dispatch_total")
            .expect("dispatch family");
        assert_eq!(dispatch.get_metric().len(), 2);
        assert!(families
            .iter()
            .any(|family| family.get_name() == "energy_sampler_ticks_total"));
        let running = families
            .iter()
            .find(|family| family.get_name() == "energy_sampler_running")
            .expect("running family");
        assert_eq!(running.get_metric()[0].get_gauge().get_value() as i64, 1);
    }

    #[test]
    fn double_registration_is_rejected() {
        let registry = Registry::new();
        EnergyMetricsExporter::register(&registry).expect("first registration");
        assert!(EnergyMetricsExporter::register(&registry).is_err());
    }
}

//! ---
//! acct_section: "01-core-functionality"
//! acct_subsection: "binary"
//! acct_type: "source"
//! acct_scope: "code"
//! acct_description: "Process-level metrics for the acct-gather node daemon."
//! acct_version: "v0.0.0-prealpha"
//! acct_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::{Context, Result};
use prometheus::{GaugeVec, Histogram, HistogramOpts, IntCounter, Opts, Registry};

use crate::http::SharedRegistry;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    starts_total: IntCounter,
    config_load_seconds: Histogram,
    build_info: GaugeVec,
}

impl DaemonMetrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "acct_gatherd_starts_total",
            "Total number of times the node daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "acct_gatherd_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        let build_info = GaugeVec::new(
            Opts::new(
                "acct_gatherd_build_info",
                "Build metadata and bound energy backend of the running daemon",
            ),
            &["version", "backend"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            starts_total,
            config_load_seconds,
            build_info,
        })
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }

    pub fn set_build_info(&self, version: &str, backend: &str) {
        self.build_info
            .with_label_values(&[version, backend])
            .set(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daemon_metrics_register_once() {
        let registry = new_registry();
        let metrics = DaemonMetrics::new(&registry).expect("register");
        metrics.inc_start();
        metrics.observe_config_load(0.002);
        metrics.set_build_info("0.1.0", "acct_gather_energy/none");
        let names: Vec<_> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_owned())
            .collect();
        assert!(names.contains(&"acct_gatherd_build_info".to_owned()));
        assert!(DaemonMetrics::new(&registry).is_err());
    }
}

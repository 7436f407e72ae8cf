//! ---
//! acct_section: "02-energy-accounting"
//! acct_subsection: "module"
//! acct_type: "source"
//! acct_scope: "code"
//! acct_description: "Energy backend dispatch, sample codec, and sampler."
//! acct_version: "v0.0.0-prealpha"
//! acct_owner: "tbd"
//! ---
//! Software-modelled power meter. The node draws a constant, configurable
//! wattage and energy is integrated over wall-clock time between polls.

use std::fmt;
use std::sync::Arc;

use acct_gather_common::time::{elapsed_secs, unix_now};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{EnergyError, Result};
use crate::ops::{
    unsupported, ConfigList, ConfigTable, EnergyData, EnergyDataKind, EnergyOps, OptionKind,
    OptionsDescriptor,
};
use crate::registry::BackendFactory;
use crate::sample::EnergySample;

pub const OPT_WATTS: &str = "SyntheticWatts";
pub const OPT_BASE_WATTS: &str = "SyntheticBaseWatts";

const DEFAULT_WATTS: u32 = 100;

/// Source of unix-second timestamps.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

#[derive(Debug, Default)]
struct MeterState {
    watts: u32,
    base_watts: u32,
    sample: EnergySample,
    polls: u64,
}

pub struct SyntheticBackend {
    clock: Clock,
    state: Mutex<MeterState>,
}

impl fmt::Debug for SyntheticBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyntheticBackend")
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::with_clock(Arc::new(unix_now))
    }
}

impl SyntheticBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a meter reading time from `clock` instead of the system clock.
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            clock,
            state: Mutex::new(MeterState {
                watts: DEFAULT_WATTS,
                ..MeterState::default()
            }),
        }
    }

    /// Number of refreshes performed so far.
    pub fn polls(&self) -> u64 {
        self.state.lock().polls
    }

    pub fn sample(&self) -> EnergySample {
        self.state.lock().sample
    }

    fn poll(&self, state: &mut MeterState) {
        let now = (self.clock)();
        let sample = &mut state.sample;
        if sample.poll_time == 0 {
            sample.base_watts = state.base_watts;
            sample.base_consumed_energy = 0;
            sample.consumed_energy = 0;
            sample.previous_consumed_energy = 0;
        } else {
            let elapsed = u32::try_from(elapsed_secs(sample.poll_time, now)).unwrap_or(u32::MAX);
            sample.previous_consumed_energy = sample.consumed_energy;
            sample.consumed_energy = sample
                .consumed_energy
                .saturating_add(state.watts.saturating_mul(elapsed));
        }
        sample.current_watts = state.watts;
        sample.poll_time = now;
        state.polls += 1;
        trace!(
            consumed = sample.consumed_energy,
            watts = sample.current_watts,
            poll_time = sample.poll_time,
            "synthetic meter polled"
        );
    }

    /// Refresh unless the last poll is younger than `delta` seconds.
    fn poll_if_stale(&self, delta: i64) {
        let mut state = self.state.lock();
        let last = state.sample.poll_time;
        if last != 0 && delta > 0 {
            let age = (self.clock)().saturating_sub(last);
            if age < delta {
                trace!(age, delta, "synthetic meter fresh; skipping poll");
                return;
            }
        }
        self.poll(&mut state);
    }
}

impl EnergyOps for SyntheticBackend {
    fn update_node_energy(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.poll(&mut state);
        Ok(())
    }

    fn get_data(&self, kind: EnergyDataKind) -> Result<EnergyData> {
        match kind {
            EnergyDataKind::NodeSample | EnergyDataKind::NodeEnergy => {
                Ok(EnergyData::Sample(self.sample()))
            }
            EnergyDataKind::NodeEnergyUp => {
                let mut state = self.state.lock();
                self.poll(&mut state);
                Ok(EnergyData::Sample(state.sample))
            }
            EnergyDataKind::JoulesTask => {
                let mut state = self.state.lock();
                self.poll(&mut state);
                Ok(EnergyData::Joules(u64::from(state.sample.consumed_energy)))
            }
            EnergyDataKind::LastPoll => Ok(EnergyData::Timestamp(self.sample().poll_time)),
            EnergyDataKind::SensorCount => Ok(EnergyData::Count(1)),
            EnergyDataKind::Reconfig | EnergyDataKind::Profile => unsupported(kind),
        }
    }

    fn set_data(&self, kind: EnergyDataKind, data: EnergyData) -> Result<()> {
        match (kind, data) {
            (EnergyDataKind::Profile, EnergyData::Interval(delta)) => {
                self.poll_if_stale(delta);
                Ok(())
            }
            (EnergyDataKind::Profile, other) => Err(EnergyError::backend(format!(
                "profile tick expects an interval, got {other:?}"
            ))),
            (EnergyDataKind::Reconfig, _) => {
                let mut state = self.state.lock();
                state.sample = EnergySample::new();
                debug!("synthetic meter baseline reset");
                Ok(())
            }
            (kind, _) => unsupported(kind),
        }
    }

    fn conf_options(&self) -> OptionsDescriptor {
        OptionsDescriptor::new()
            .with(OPT_WATTS, OptionKind::U32)
            .with(OPT_BASE_WATTS, OptionKind::U32)
    }

    fn conf_set(&self, table: &ConfigTable) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(watts) = table.get_u32(OPT_WATTS) {
            state.watts = watts;
        }
        if let Some(base) = table.get_u32(OPT_BASE_WATTS) {
            state.base_watts = base;
        }
        if state.base_watts > state.watts {
            return Err(EnergyError::config(format!(
                "{OPT_BASE_WATTS} ({}) exceeds {OPT_WATTS} ({})",
                state.base_watts, state.watts
            )));
        }
        debug!(watts = state.watts, base_watts = state.base_watts, "synthetic meter configured");
        Ok(())
    }

    fn get_config(&self) -> ConfigList {
        let state = self.state.lock();
        ConfigList::from_entries([(OPT_WATTS, state.watts), (OPT_BASE_WATTS, state.base_watts)])
    }
}

#[derive(Debug, Default)]
pub struct SyntheticBackendFactory;

impl BackendFactory for SyntheticBackendFactory {
    fn backend_type(&self) -> &'static str {
        "synthetic"
    }

    fn description(&self) -> &'static str {
        "software-modelled constant-power meter"
    }

    fn build(&self) -> Result<Arc<dyn EnergyOps>> {
        Ok(Arc::new(SyntheticBackend::new()))
    }
}

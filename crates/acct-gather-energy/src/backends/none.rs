//! ---
//! acct_section: "02-energy-accounting"
//! acct_subsection: "module"
//! acct_type: "source"
//! acct_scope: "code"
//! acct_description: "Energy backend dispatch, sample codec, and sampler."
//! acct_version: "v0.0.0-prealpha"
//! acct_owner: "tbd"
//! ---
use std::sync::Arc;

use tracing::trace;

use crate::error::Result;
use crate::ops::{
    ConfigList, ConfigTable, EnergyData, EnergyDataKind, EnergyOps, OptionsDescriptor,
};
use crate::registry::BackendFactory;
use crate::sample::EnergySample;

/// Backend for nodes without an energy source. Every call succeeds and reports nothing.
#[derive(Debug, Default, Clone)]
pub struct NoneBackend;

impl EnergyOps for NoneBackend {
    fn update_node_energy(&self) -> Result<()> {
        Ok(())
    }

    fn get_data(&self, kind: EnergyDataKind) -> Result<EnergyData> {
        trace!(%kind, "none backend get_data");
        Ok(match kind {
            EnergyDataKind::NodeSample
            | EnergyDataKind::NodeEnergy
            | EnergyDataKind::NodeEnergyUp => EnergyData::Sample(EnergySample::new()),
            EnergyDataKind::JoulesTask => EnergyData::Joules(0),
            EnergyDataKind::LastPoll => EnergyData::Timestamp(0),
            EnergyDataKind::SensorCount => EnergyData::Count(0),
            EnergyDataKind::Reconfig | EnergyDataKind::Profile => EnergyData::Empty,
        })
    }

    fn set_data(&self, _kind: EnergyDataKind, _data: EnergyData) -> Result<()> {
        Ok(())
    }

    fn conf_options(&self) -> OptionsDescriptor {
        OptionsDescriptor::new()
    }

    fn conf_set(&self, _table: &ConfigTable) -> Result<()> {
        Ok(())
    }

    fn get_config(&self) -> ConfigList {
        ConfigList::default()
    }
}

#[derive(Debug, Default)]
pub struct NoneBackendFactory;

impl BackendFactory for NoneBackendFactory {
    fn backend_type(&self) -> &'static str {
        "none"
    }

    fn description(&self) -> &'static str {
        "no energy accounting"
    }

    fn build(&self) -> Result<Arc<dyn EnergyOps>> {
        Ok(Arc::new(NoneBackend))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::ConfigValue;

    #[test]
    fn reports_zeroed_payload_for_every_kind() {
        let backend = NoneBackend;
        backend.update_node_energy().unwrap();
        for kind in [
            EnergyDataKind::NodeSample,
            EnergyDataKind::NodeEnergy,
            EnergyDataKind::NodeEnergyUp,
        ] {
            assert_eq!(
                backend.get_data(kind).unwrap(),
                EnergyData::Sample(EnergySample::new())
            );
        }
        assert_eq!(
            backend.get_data(EnergyDataKind::JoulesTask).unwrap(),
            EnergyData::Joules(0)
        );
        assert_eq!(
            backend.get_data(EnergyDataKind::LastPoll).unwrap(),
            EnergyData::Timestamp(0)
        );
        assert_eq!(
            backend.get_data(EnergyDataKind::SensorCount).unwrap(),
            EnergyData::Count(0)
        );
        assert_eq!(
            backend.get_data(EnergyDataKind::Profile).unwrap(),
            EnergyData::Empty
        );
        assert_eq!(
            backend.get_data(EnergyDataKind::Reconfig).unwrap(),
            EnergyData::Empty
        );
    }

    #[test]
    fn accepts_writes_and_declares_no_options() {
        let backend = NoneBackend;
        backend
            .set_data(EnergyDataKind::Profile, EnergyData::Interval(29))
            .unwrap();
        let mut table = ConfigTable::new();
        table.insert("Anything", ConfigValue::U32(1));
        backend.conf_set(&table).unwrap();
        assert!(backend.conf_options().is_empty());
        assert!(backend.get_config().is_empty());
    }

    #[test]
    fn factory_builds_none_backend() {
        let factory = NoneBackendFactory;
        assert_eq!(factory.backend_type(), "none");
        let ops = factory.build().unwrap();
        assert!(ops.get_config().is_empty());
    }
}

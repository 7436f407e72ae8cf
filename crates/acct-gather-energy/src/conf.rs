//! ---
//! acct_section: "02-energy-accounting"
//! acct_subsection: "module"
//! acct_type: "source"
//! acct_scope: "code"
//! acct_description: "Energy backend dispatch, sample codec, and sampler."
//! acct_version: "v0.0.0-prealpha"
//! acct_owner: "tbd"
//! ---
//! Static backend configuration, applied once to each freshly bound backend.
//!
//! Options are validated against the keys the backend declares through
//! [`EnergyOps::conf_options`]; unknown keys and mistyped values fail init.

use std::fmt;
use std::path::{Path, PathBuf};

use acct_gather_common::config::EnergyConfig;
use tracing::{debug, info};

use crate::error::{EnergyError, Result};
use crate::ops::{ConfigTable, ConfigValue, EnergyOps, OptionKind, OptionsDescriptor};

/// Table holding energy options inside an options file.
pub const ENERGY_TABLE: &str = "energy";

/// Loads and applies static configuration to a bound backend.
pub trait ConfLoader: Send + Sync + fmt::Debug {
    fn load(&self, backend: &dyn EnergyOps) -> Result<()>;
}

/// Applies an empty table, leaving backend defaults in place.
#[derive(Debug, Default, Clone)]
pub struct NoConfLoader;

impl ConfLoader for NoConfLoader {
    fn load(&self, backend: &dyn EnergyOps) -> Result<()> {
        backend.conf_set(&ConfigTable::new())
    }
}

/// Applies options given inline, e.g. the daemon's `[energy.options]` table.
#[derive(Debug, Default, Clone)]
pub struct InlineConfLoader {
    options: toml::Table,
}

impl InlineConfLoader {
    pub fn new(options: toml::Table) -> Self {
        Self { options }
    }
}

impl ConfLoader for InlineConfLoader {
    fn load(&self, backend: &dyn EnergyOps) -> Result<()> {
        let table = resolve_table(&backend.conf_options(), &self.options)?;
        debug!(options = table.len(), "applying inline energy options");
        backend.conf_set(&table)
    }
}

/// Reads the `[energy]` table of a TOML options file.
#[derive(Debug, Clone)]
pub struct FileConfLoader {
    path: PathBuf,
}

impl FileConfLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_options(&self) -> Result<toml::Table> {
        let raw = std::fs::read_to_string(&self.path).map_err(|err| {
            EnergyError::config(format!("unable to read {}: {err}", self.path.display()))
        })?;
        let mut document: toml::Table = raw.parse().map_err(|err| {
            EnergyError::config(format!("failed to parse {}: {err}", self.path.display()))
        })?;
        match document.remove(ENERGY_TABLE) {
            None => Ok(toml::Table::new()),
            Some(toml::Value::Table(table)) => Ok(table),
            Some(other) => Err(EnergyError::config(format!(
                "{}: '{ENERGY_TABLE}' must be a table, found {}",
                self.path.display(),
                other.type_str()
            ))),
        }
    }
}

impl ConfLoader for FileConfLoader {
    fn load(&self, backend: &dyn EnergyOps) -> Result<()> {
        let options = self.read_options()?;
        let table = resolve_table(&backend.conf_options(), &options)?;
        info!(path = %self.path.display(), options = table.len(), "energy options loaded");
        backend.conf_set(&table)
    }
}

/// Pick the loader matching the daemon's `[energy]` section.
pub fn loader_for(config: &EnergyConfig) -> Box<dyn ConfLoader> {
    match &config.conf_file {
        Some(path) => Box::new(FileConfLoader::new(path.clone())),
        None if !config.options.is_empty() => {
            Box::new(InlineConfLoader::new(config.options.clone()))
        }
        None => Box::new(NoConfLoader),
    }
}

/// Validate raw options against a backend's descriptor and convert them.
pub fn resolve_table(descriptor: &OptionsDescriptor, raw: &toml::Table) -> Result<ConfigTable> {
    let mut table = ConfigTable::new();
    for (key, value) in raw {
        let spec = descriptor.get(key).ok_or_else(|| {
            EnergyError::config(format!("unrecognized energy option '{key}'"))
        })?;
        let converted = convert(spec.kind, value).ok_or_else(|| {
            EnergyError::config(format!(
                "option '{}' expects {:?}, found {}",
                spec.key,
                spec.kind,
                value.type_str()
            ))
        })?;
        table.insert(spec.key.clone(), converted);
    }
    Ok(table)
}

fn convert(kind: OptionKind, value: &toml::Value) -> Option<ConfigValue> {
    match (kind, value) {
        (OptionKind::String, toml::Value::String(text)) => Some(ConfigValue::String(text.clone())),
        (OptionKind::U32, toml::Value::Integer(number)) => {
            u32::try_from(*number).ok().map(ConfigValue::U32)
        }
        (OptionKind::U32, toml::Value::String(text)) => {
            text.trim().parse().ok().map(ConfigValue::U32)
        }
        (OptionKind::Bool, toml::Value::Boolean(flag)) => Some(ConfigValue::Bool(*flag)),
        (OptionKind::Bool, toml::Value::String(text)) => {
            match text.trim().to_ascii_lowercase().as_str() {
                "yes" | "true" | "1" => Some(ConfigValue::Bool(true)),
                "no" | "false" | "0" => Some(ConfigValue::Bool(false)),
                _ => None,
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SyntheticBackend;

    fn descriptor() -> OptionsDescriptor {
        OptionsDescriptor::new()
            .with("EnergyIPMIFrequency", OptionKind::U32)
            .with("EnergyIPMICalcAdjustment", OptionKind::Bool)
            .with("EnergyIPMIPowerSensors", OptionKind::String)
    }

    #[test]
    fn values_are_converted_and_keys_canonicalised() {
        let raw: toml::Table = r#"
            energyipmifrequency = 30
            EnergyIPMICalcAdjustment = "yes"
            EnergyIPMIPowerSensors = "Node=1,2"
        "#
        .parse()
        .unwrap();
        let table = resolve_table(&descriptor(), &raw).unwrap();
        assert_eq!(table.get_u32("EnergyIPMIFrequency"), Some(30));
        assert_eq!(table.get_bool("EnergyIPMICalcAdjustment"), Some(true));
        assert_eq!(table.get_str("EnergyIPMIPowerSensors"), Some("Node=1,2"));
    }

    #[test]
    fn unknown_and_mistyped_options_fail() {
        let unknown: toml::Table = "EnergyRAPLFoo = 1".parse().unwrap();
        let err = resolve_table(&descriptor(), &unknown).unwrap_err();
        assert!(err.to_string().contains("unrecognized energy option"));

        let negative: toml::Table = "EnergyIPMIFrequency = -4".parse().unwrap();
        assert!(resolve_table(&descriptor(), &negative).is_err());

        let bad_bool: toml::Table = "EnergyIPMICalcAdjustment = \"maybe\"".parse().unwrap();
        assert!(resolve_table(&descriptor(), &bad_bool).is_err());
    }

    #[test]
    fn file_loader_applies_energy_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acct_gather.toml");
        std::fs::write(
            &path,
            "[energy]\nSyntheticWatts = 420\n\n[profile]\nProfileHDF5Dir = \"/tmp\"\n",
        )
        .unwrap();
        let backend = SyntheticBackend::new();
        FileConfLoader::new(&path).load(&backend).unwrap();
        assert_eq!(backend.get_config().get("SyntheticWatts"), Some("420"));
    }

    #[test]
    fn file_loader_reports_missing_file() {
        let backend = SyntheticBackend::new();
        let err = FileConfLoader::new("/nonexistent/acct_gather.toml")
            .load(&backend)
            .unwrap_err();
        assert!(matches!(err, EnergyError::Config(_)));
    }

    #[test]
    fn loader_selection_follows_energy_config() {
        let mut config = EnergyConfig::default();
        assert!(format!("{:?}", loader_for(&config)).contains("NoConfLoader"));
        config
            .options
            .insert("SyntheticWatts".into(), toml::Value::Integer(5));
        assert!(format!("{:?}", loader_for(&config)).contains("InlineConfLoader"));
        config.conf_file = Some(PathBuf::from("/etc/acct_gather.toml"));
        assert!(format!("{:?}", loader_for(&config)).contains("FileConfLoader"));
    }
}

//! ---
//! acct_section: "02-energy-accounting"
//! acct_subsection: "module"
//! acct_type: "source"
//! acct_scope: "code"
//! acct_description: "Energy backend dispatch, sample codec, and sampler."
//! acct_version: "v0.0.0-prealpha"
//! acct_owner: "tbd"
//! ---
//! The operation contract every energy backend implements, and the typed
//! values that cross it.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::error::{EnergyError, Result};
use crate::sample::EnergySample;

/// Kinds of data exchanged through [`EnergyOps::get_data`] and [`EnergyOps::set_data`].
///
/// The set is fixed and shared by the dispatcher and every backend.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EnergyDataKind {
    /// Joules consumed by the node, refreshed on demand.
    JoulesTask,
    /// The cached node sample.
    NodeSample,
    /// Reset the accounting baseline.
    Reconfig,
    /// Profile tick carrying the refresh interval minus one, in seconds.
    Profile,
    /// Timestamp of the last poll.
    LastPoll,
    /// Number of sensors the backend reads.
    SensorCount,
    /// Node sample as last refreshed, without triggering a poll.
    NodeEnergy,
    /// Node sample after forcing a poll.
    NodeEnergyUp,
}

/// Typed payload for data exchanges with a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum EnergyData {
    Sample(EnergySample),
    Joules(u64),
    Interval(i64),
    Timestamp(i64),
    Count(u16),
    Empty,
}

/// Value type of a backend configuration option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionKind {
    String,
    U32,
    Bool,
}

/// One configuration key recognised by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionSpec {
    pub key: String,
    pub kind: OptionKind,
}

/// Configuration keys a backend recognises, merged into the daemon's option schema.
///
/// Keys compare case-insensitively, matching how operators write them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionsDescriptor {
    options: Vec<OptionSpec>,
}

impl OptionsDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration of an option.
    pub fn with(mut self, key: impl Into<String>, kind: OptionKind) -> Self {
        self.push(key, kind);
        self
    }

    /// Register an option, replacing an earlier declaration of the same key.
    pub fn push(&mut self, key: impl Into<String>, kind: OptionKind) {
        let key = key.into();
        match self
            .options
            .iter_mut()
            .find(|spec| spec.key.eq_ignore_ascii_case(&key))
        {
            Some(existing) => existing.kind = kind,
            None => self.options.push(OptionSpec { key, kind }),
        }
    }

    pub fn get(&self, key: &str) -> Option<&OptionSpec> {
        self.options
            .iter()
            .find(|spec| spec.key.eq_ignore_ascii_case(key))
    }

    /// Fold another descriptor into this one.
    pub fn merge(&mut self, other: OptionsDescriptor) {
        for spec in other.options {
            self.push(spec.key, spec.kind);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &OptionSpec> {
        self.options.iter()
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }
}

/// A resolved configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    U32(u32),
    String(String),
}

impl ConfigValue {
    pub fn kind(&self) -> OptionKind {
        match self {
            Self::Bool(_) => OptionKind::Bool,
            Self::U32(_) => OptionKind::U32,
            Self::String(_) => OptionKind::String,
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{}", if *value { "yes" } else { "no" }),
            Self::U32(value) => write!(f, "{value}"),
            Self::String(value) => f.write_str(value),
        }
    }
}

/// Resolved key/value table handed to [`EnergyOps::conf_set`].
///
/// Keys are stored in the casing the backend declared them with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigTable {
    values: IndexMap<String, ConfigValue>,
}

impl ConfigTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: ConfigValue) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        match self.get(key) {
            Some(ConfigValue::U32(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key) {
            Some(ConfigValue::Bool(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(ConfigValue::String(value)) => Some(value),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ConfigValue)> {
        self.values.iter()
    }
}

/// One line of a backend's effective configuration report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
}

/// Effective configuration reported by a backend, always sorted by key so two
/// reports of the same settings compare and display identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigList {
    entries: Vec<ConfigEntry>,
}

impl ConfigList {
    pub fn from_entries<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: ToString,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut entries: Vec<ConfigEntry> = entries
            .into_iter()
            .map(|(key, value)| ConfigEntry {
                key: key.into(),
                value: value.to_string(),
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| entry.value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for ConfigList {
    type Item = ConfigEntry;
    type IntoIter = std::vec::IntoIter<ConfigEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Operation set every energy backend provides.
///
/// Calls may arrive concurrently from the daemon thread and the sampler thread;
/// implementations own whatever locking keeps their cached sample consistent.
pub trait EnergyOps: Send + Sync {
    /// Refresh the cached sample from the energy source now.
    fn update_node_energy(&self) -> Result<()>;

    /// Read one kind of data.
    fn get_data(&self, kind: EnergyDataKind) -> Result<EnergyData>;

    /// Push a value into the backend.
    fn set_data(&self, kind: EnergyDataKind, data: EnergyData) -> Result<()>;

    /// Configuration keys this backend understands.
    fn conf_options(&self) -> OptionsDescriptor;

    /// Apply a resolved configuration table.
    fn conf_set(&self, table: &ConfigTable) -> Result<()>;

    /// Effective configuration, for display and audit.
    fn get_config(&self) -> ConfigList;
}

/// Helper for backends rejecting a data kind they do not serve.
pub fn unsupported<T>(kind: EnergyDataKind) -> Result<T> {
    Err(EnergyError::UnsupportedData(kind))
}

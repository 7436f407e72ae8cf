//! ---
//! acct_section: "02-energy-accounting"
//! acct_subsection: "module"
//! acct_type: "source"
//! acct_scope: "code"
//! acct_description: "Energy backend dispatch, sample codec, and sampler."
//! acct_version: "v0.0.0-prealpha"
//! acct_owner: "tbd"
//! ---
//! Node energy accounting: a pluggable backend bound by name, a dispatcher
//! that initializes it on demand, the versioned wire codec for node samples,
//! and the background sampler driven by the profiling timer.

pub mod backends;
pub mod codec;
pub mod conf;
pub mod context;
pub mod error;
pub mod metrics;
pub mod ops;
pub mod registry;
pub mod sample;
pub mod sampler;
pub mod timer;

pub use codec::{decode, encode, pack, record_len, unpack, ProtocolVersion};
pub use conf::{ConfLoader, FileConfLoader, InlineConfLoader, NoConfLoader};
pub use context::EnergyContext;
pub use error::{EnergyError, Result};
pub use metrics::{DispatchOp, DispatchOutcome, EnergyMetricsExporter};
pub use ops::{
    ConfigEntry, ConfigList, ConfigTable, ConfigValue, EnergyData, EnergyDataKind, EnergyOps,
    OptionKind, OptionSpec, OptionsDescriptor,
};
pub use registry::{BackendFactory, BackendRegistry, FnBackendFactory, ENERGY_PLUGIN_TYPE};
pub use sample::EnergySample;
pub use sampler::{EnergySampler, SamplerState};
pub use timer::{ProfileCategory, ProfileTimer};

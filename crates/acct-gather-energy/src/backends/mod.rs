//! ---
//! acct_section: "02-energy-accounting"
//! acct_subsection: "module"
//! acct_type: "source"
//! acct_scope: "code"
//! acct_description: "Energy backend dispatch, sample codec, and sampler."
//! acct_version: "v0.0.0-prealpha"
//! acct_owner: "tbd"
//! ---
//! In-tree energy backends. Vendor meters live out of tree and register their
//! own [`BackendFactory`](crate::registry::BackendFactory).

pub mod none;
pub mod synthetic;

pub use none::{NoneBackend, NoneBackendFactory};
pub use synthetic::{SyntheticBackend, SyntheticBackendFactory};

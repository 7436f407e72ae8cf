//! ---
//! acct_section: "01-core-functionality"
//! acct_subsection: "module"
//! acct_type: "source"
//! acct_scope: "code"
//! acct_description: "Shared primitives and utilities for the accounting runtime."
//! acct_version: "v0.0.0-prealpha"
//! acct_owner: "tbd"
//! ---
//! Shared primitives for the acct-gather workspace.
//! This crate exposes configuration loading, tracing setup, and the time
//! helpers used to stamp energy polls.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    AppConfig, EnergyConfig, LoadedAppConfig, LoggingConfig, MetricsConfig, ProfileConfig,
};
pub use logging::{init_tracing, LogFormat};

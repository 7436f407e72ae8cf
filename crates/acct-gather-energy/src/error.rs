//! ---
//! acct_section: "02-energy-accounting"
//! acct_subsection: "module"
//! acct_type: "source"
//! acct_scope: "code"
//! acct_description: "Energy backend dispatch, sample codec, and sampler."
//! acct_version: "v0.0.0-prealpha"
//! acct_owner: "tbd"
//! ---
use crate::ops::EnergyDataKind;

/// Shared result type for energy accounting operations.
pub type Result<T> = std::result::Result<T, EnergyError>;

/// Failures raised by the energy accounting layer.
///
/// Only resolution, framing and configuration failures originate here.
/// Everything a backend reports travels through unchanged as [`EnergyError::Backend`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnergyError {
    /// The configured backend name has no registered implementation, or its
    /// factory refused to build one.
    #[error("cannot create {plugin_type} context for {name}: {reason}")]
    BackendUnavailable {
        /// Plugin category that was searched.
        plugin_type: String,
        /// Backend name as configured.
        name: String,
        /// Why resolution failed.
        reason: String,
    },
    /// A dispatch call found the context uninitialized and init failed.
    #[error("energy accounting not initialized: {0}")]
    NotInitialized(Box<EnergyError>),
    /// Decode ran out of input before a whole record was available.
    #[error("truncated energy record: needed {needed} bytes, {available} available")]
    Truncated {
        /// Bytes required by the negotiated protocol revision.
        needed: usize,
        /// Bytes left in the buffer.
        available: usize,
    },
    /// Opaque failure reported by the bound backend.
    #[error("energy backend error: {0}")]
    Backend(String),
    /// The sampler was asked to start while already running.
    #[error("energy poll already started")]
    AlreadyRunning,
    /// Static backend configuration could not be loaded or applied.
    #[error("energy configuration error: {0}")]
    Config(String),
    /// The backend does not serve this data kind.
    #[error("energy data kind {0} not supported by backend")]
    UnsupportedData(EnergyDataKind),
}

impl EnergyError {
    /// Build a backend passthrough error from any displayable cause.
    pub fn backend(cause: impl std::fmt::Display) -> Self {
        Self::Backend(cause.to_string())
    }

    /// Build a configuration error from any displayable cause.
    pub fn config(cause: impl std::fmt::Display) -> Self {
        Self::Config(cause.to_string())
    }

    /// The error that ultimately caused this one, looking through `NotInitialized`.
    pub fn root_cause(&self) -> &EnergyError {
        match self {
            Self::NotInitialized(inner) => inner.root_cause(),
            other => other,
        }
    }
}

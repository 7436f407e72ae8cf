//! ---
//! acct_section: "02-energy-accounting"
//! acct_subsection: "module"
//! acct_type: "source"
//! acct_scope: "code"
//! acct_description: "Energy backend dispatch, sample codec, and sampler."
//! acct_version: "v0.0.0-prealpha"
//! acct_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};

/// Per-node energy reading exchanged between daemons and cached by backends.
///
/// Energy values are joules, power values are watts. `poll_time` is unix seconds,
/// zero when the node has never been polled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnergySample {
    /// Energy consumed at the start of the accounting window.
    pub base_consumed_energy: u32,
    /// Idle power drawn by the node before the window started.
    pub base_watts: u32,
    /// Energy consumed since the window started.
    pub consumed_energy: u32,
    /// Most recent instantaneous power reading.
    pub current_watts: u32,
    /// `consumed_energy` as of the previous poll.
    pub previous_consumed_energy: u32,
    /// When the reading was taken.
    pub poll_time: i64,
}

impl EnergySample {
    /// A zeroed sample, ready to be populated.
    pub fn new() -> Self {
        Self::default()
    }

    /// True when every field is zero, which is also how an absent sample decodes.
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// Energy consumed between the previous poll and this one.
    pub fn delta_energy(&self) -> u32 {
        self.consumed_energy
            .saturating_sub(self.previous_consumed_energy)
    }

    /// Copy with the fields unknown to legacy peers cleared.
    pub fn legacy_view(&self) -> Self {
        Self {
            previous_consumed_energy: 0,
            poll_time: 0,
            ..*self
        }
    }
}

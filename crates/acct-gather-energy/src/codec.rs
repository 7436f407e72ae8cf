//! ---
//! acct_section: "02-energy-accounting"
//! acct_subsection: "module"
//! acct_type: "source"
//! acct_scope: "code"
//! acct_description: "Energy backend dispatch, sample codec, and sampler."
//! acct_version: "v0.0.0-prealpha"
//! acct_owner: "tbd"
//! ---
//! Versioned wire codec for [`EnergySample`].
//!
//! All integers are big-endian. The record layout depends on the protocol
//! revision negotiated with the peer:
//!
//! | revision            | fields                                                            |
//! |---------------------|-------------------------------------------------------------------|
//! | `< POLL_TIME_CUTOFF`  | base_consumed_energy, base_watts, consumed_energy, current_watts |
//! | `>= POLL_TIME_CUTOFF` | the above, previous_consumed_energy (u32), poll_time (64-bit)    |
//!
//! An absent sample is written as a zero record of the same shape.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{EnergyError, Result};
use crate::sample::EnergySample;

const U32_LEN: usize = 4;
const TIME_LEN: usize = 8;
const BASE_FIELDS: usize = 4;
const LEGACY_RECORD_LEN: usize = BASE_FIELDS * U32_LEN;
const CURRENT_RECORD_LEN: usize = (BASE_FIELDS + 1) * U32_LEN + TIME_LEN;

/// Protocol revision tag, `major << 8 | minor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolVersion(pub u16);

impl ProtocolVersion {
    /// Last revision without `previous_consumed_energy` and `poll_time`.
    pub const LEGACY: Self = Self(25 << 8);
    /// First revision carrying `previous_consumed_energy` and `poll_time`.
    pub const POLL_TIME_CUTOFF: Self = Self(26 << 8);
    /// Revision spoken by this build.
    pub const CURRENT: Self = Self::POLL_TIME_CUTOFF;

    /// Whether records under this revision carry the post-cutoff fields.
    pub fn includes_poll_time(self) -> bool {
        self >= Self::POLL_TIME_CUTOFF
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.0 >> 8, self.0 & 0xff)
    }
}

/// Encoded size of one record under `version`.
pub fn record_len(version: ProtocolVersion) -> usize {
    if version.includes_poll_time() {
        CURRENT_RECORD_LEN
    } else {
        LEGACY_RECORD_LEN
    }
}

/// Append one record to `buf`. `None` writes the zero placeholder.
pub fn pack<B: BufMut>(sample: Option<&EnergySample>, version: ProtocolVersion, buf: &mut B) {
    let sample = sample.copied().unwrap_or_default();
    buf.put_u32(sample.base_consumed_energy);
    buf.put_u32(sample.base_watts);
    buf.put_u32(sample.consumed_energy);
    buf.put_u32(sample.current_watts);
    if version.includes_poll_time() {
        buf.put_u32(sample.previous_consumed_energy);
        buf.put_i64(sample.poll_time);
    }
}

/// Encode one record into a fresh buffer.
pub fn encode(sample: Option<&EnergySample>, version: ProtocolVersion) -> Bytes {
    let mut buf = BytesMut::with_capacity(record_len(version));
    pack(sample, version, &mut buf);
    buf.freeze()
}

/// Read one record from `buf`.
///
/// The whole record is length-checked before anything is read, so a truncated
/// buffer is left exactly where it was and no partial sample escapes.
pub fn unpack<B: Buf>(buf: &mut B, version: ProtocolVersion) -> Result<EnergySample> {
    let needed = record_len(version);
    let available = buf.remaining();
    if available < needed {
        return Err(EnergyError::Truncated { needed, available });
    }

    let mut sample = EnergySample::new();
    sample.base_consumed_energy = buf.get_u32();
    sample.base_watts = buf.get_u32();
    sample.consumed_energy = buf.get_u32();
    sample.current_watts = buf.get_u32();
    if version.includes_poll_time() {
        sample.previous_consumed_energy = buf.get_u32();
        sample.poll_time = buf.get_i64();
    }
    Ok(sample)
}

/// Decode one record from the front of `bytes`. Trailing bytes are ignored.
pub fn decode(bytes: &[u8], version: ProtocolVersion) -> Result<EnergySample> {
    let mut cursor = bytes;
    unpack(&mut cursor, version)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populated() -> EnergySample {
        EnergySample {
            base_consumed_energy: 1_200,
            base_watts: 85,
            consumed_energy: 48_000,
            current_watts: 310,
            previous_consumed_energy: 46_450,
            poll_time: 1_700_000_000,
        }
    }

    #[test]
    fn current_revision_roundtrip() {
        let sample = populated();
        let bytes = encode(Some(&sample), ProtocolVersion::CURRENT);
        assert_eq!(bytes.len(), 28);
        assert_eq!(decode(&bytes, ProtocolVersion::CURRENT).unwrap(), sample);
    }

    #[test]
    fn legacy_revision_carries_only_base_fields() {
        let sample = populated();
        let bytes = encode(Some(&sample), ProtocolVersion::LEGACY);
        assert_eq!(bytes.len(), 16);
        let decoded = decode(&bytes, ProtocolVersion::LEGACY).unwrap();
        assert_eq!(decoded, sample.legacy_view());
    }

    #[test]
    fn field_order_is_big_endian_and_fixed() {
        let sample = EnergySample {
            base_consumed_energy: 1,
            base_watts: 2,
            consumed_energy: 3,
            current_watts: 4,
            previous_consumed_energy: 5,
            poll_time: 6,
        };
        let bytes = encode(Some(&sample), ProtocolVersion::CURRENT);
        assert_eq!(
            &bytes[..],
            &[0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0, 4, 0, 0, 0, 5, 0, 0, 0, 0, 0, 0, 0, 6]
        );
    }

    #[test]
    fn absent_sample_is_zero_record_per_revision() {
        for version in [ProtocolVersion::LEGACY, ProtocolVersion::CURRENT] {
            let bytes = encode(None, version);
            assert_eq!(bytes.len(), record_len(version));
            assert!(bytes.iter().all(|b| *b == 0));
            assert!(decode(&bytes, version).unwrap().is_zero());
        }
    }

    #[test]
    fn truncated_buffer_is_rejected_and_not_consumed() {
        let bytes = encode(Some(&populated()), ProtocolVersion::CURRENT);
        let short = &bytes[..bytes.len() - 1];
        let mut cursor = short;
        let err = unpack(&mut cursor, ProtocolVersion::CURRENT).unwrap_err();
        assert_eq!(
            err,
            EnergyError::Truncated {
                needed: 28,
                available: 27
            }
        );
        assert_eq!(cursor.len(), 27);
    }

    #[test]
    fn legacy_peer_reads_prefix_of_current_record() {
        // A legacy decoder fed a current record sees the base fields and stops.
        let sample = populated();
        let bytes = encode(Some(&sample), ProtocolVersion::CURRENT);
        let mut cursor = &bytes[..];
        let decoded = unpack(&mut cursor, ProtocolVersion::LEGACY).unwrap();
        assert_eq!(decoded, sample.legacy_view());
        assert_eq!(cursor.len(), 12);
    }

    #[test]
    fn consecutive_records_share_a_buffer() {
        let first = populated();
        let mut buf = BytesMut::new();
        pack(Some(&first), ProtocolVersion::CURRENT, &mut buf);
        pack(None, ProtocolVersion::CURRENT, &mut buf);
        let mut frozen = buf.freeze();
        assert_eq!(unpack(&mut frozen, ProtocolVersion::CURRENT).unwrap(), first);
        assert!(unpack(&mut frozen, ProtocolVersion::CURRENT).unwrap().is_zero());
        assert!(matches!(
            unpack(&mut frozen, ProtocolVersion::CURRENT),
            Err(EnergyError::Truncated { available: 0, .. })
        ));
    }

    #[test]
    fn version_display_and_ordering() {
        assert_eq!(ProtocolVersion::POLL_TIME_CUTOFF.to_string(), "26.0");
        assert!(!ProtocolVersion::LEGACY.includes_poll_time());
        assert!(ProtocolVersion(27 << 8).includes_poll_time());
    }
}

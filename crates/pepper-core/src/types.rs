//! Shared wire/data types for the PEPPER contact-tracing core.
//!
//! Field order matters: these types round-trip through both the CBOR and
//! JSON sinks, so renaming or reordering fields is a wire-format change.

use serde::{Deserialize, Serialize};

/// 32-byte fixed-size array used for keys, EBIDs, and PETs.
pub type Bytes32 = [u8; 32];

/// A Private Encounter Token: `SHA256(prefix_byte || shared_secret)`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Pet(pub Bytes32);

/// Mirrored PET pair produced at epoch finalisation for one encounter.
///
/// `et` is this device's token for the *encounter*; `rt` is the token the
/// peer is expected to have derived for the same encounter. For cooperating
/// devices A and B, `A.et == B.rt` and `A.rt == B.et`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PetPair {
    pub et: Pet,
    pub rt: Pet,
}

/// Slice identifier, 0..=3: three data slices plus the XOR parity slice.
pub const SID_XOR: u8 = 3;

/// Pack a slice id (2 bits) and connection id (30 bits) into the on-wire
/// big-endian `sid_cid` field described in the data model.
pub fn pack_sid_cid(sid: u8, cid: u32) -> u32 {
    debug_assert!(sid <= SID_XOR, "sid out of range: {sid}");
    debug_assert!(cid <= 0x3FFF_FFFF, "cid does not fit in 30 bits: {cid}");
    ((sid as u32) << 30) | (cid & 0x3FFF_FFFF)
}

/// Inverse of [`pack_sid_cid`].
pub fn unpack_sid_cid(field: u32) -> (u8, u32) {
    let sid = (field >> 30) as u8 & 0x3;
    let cid = field & 0x3FFF_FFFF;
    (sid, cid)
}

/// The UWB MAC short address derived from a connection id.
pub fn short_addr(cid: u32) -> u16 {
    (cid & 0xFFFF) as u16
}

/// BLE exposure summary for one surviving encounter.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct BleSummary {
    pub exposure_s: u32,
    pub scan_count: u32,
    pub avg_rssi_dbm: f32,
}

/// UWB exposure summary for one surviving encounter.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct UwbSummary {
    pub exposure_s: u32,
    pub req_count: u32,
    pub avg_d_cm: f32,
    pub avg_los_pct: f32,
}

/// One finalised per-peer contact record, present iff the source ED was
/// valid (BLE and/or UWB) at finalisation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ContactRecord {
    pub pet: PetPair,
    pub ble: Option<BleSummary>,
    pub uwb: Option<UwbSummary>,
}

/// The finalised output of one epoch: up to `top_k` contacts.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EpochSummary {
    /// Absolute wall-clock epoch-seconds timestamp, for logging only.
    pub timestamp: u64,
    pub contacts: Vec<ContactRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sid_cid_roundtrip() {
        for sid in 0..=3u8 {
            for cid in [0u32, 1, 0x3FFF_FFFF, 0xCAFEBABE & 0x3FFF_FFFF] {
                let packed = pack_sid_cid(sid, cid);
                assert_eq!(unpack_sid_cid(packed), (sid, cid));
            }
        }
    }

    #[test]
    fn short_addr_masks_low_16_bits() {
        assert_eq!(short_addr(0x1234_5678), 0x5678);
    }
}

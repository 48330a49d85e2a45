//! The fixed 22-byte BLE advertisement payload (§3, §6): service UUID,
//! packed sid/cid, one EBID slice, version byte, TX power, and a seed.
//!
//! Unlike [`FrameCodec`]-style length-prefixed, variable-size
//! frames (`terrain-gossip-net::framing`), the PEPPER advertisement payload
//! is a single fixed-size AD structure, since the BLE host stack (out of
//! scope here) owns the surrounding advertising-set framing entirely — this
//! module only encodes/decodes the 22-byte service-data blob carried inside
//! it.

use pepper_core::ebid::SLICE_LEN;
use thiserror::Error;

/// Service-data UUID PEPPER advertisements are tagged with.
pub const SERVICE_UUID: u16 = 0x6666;
/// The single supported wire-format version byte.
pub const VERSION_BYTE: u8 = 0xC8;
/// Total encoded payload length.
pub const PAYLOAD_LEN: usize = 22;

/// Framing errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("advertisement payload has wrong length: expected {PAYLOAD_LEN}, got {0}")]
    WrongLength(usize),
    #[error("unrecognised service UUID: {0:#06x}")]
    WrongServiceUuid(u16),
    #[error("unsupported wire version byte: {0:#04x}")]
    UnsupportedVersion(u8),
}

/// A decoded advertisement payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdPayload {
    pub sid: u8,
    pub cid: u32,
    /// The slice bytes exactly as carried on the wire — for slice index 2
    /// (slice 3) this is the *front-padded* wire form (4 leading zero
    /// bytes, 8 meaningful bytes), not the trailing-padded storage form
    /// `pepper_core::ebid::Ebid` expects. Un-padding happens one layer up,
    /// in the encounter-datum processing that receives this payload.
    pub slice: [u8; SLICE_LEN],
    pub tx_power: i8,
    pub seed: u16,
}

impl AdPayload {
    /// Encode into the 22-byte on-wire service-data blob.
    pub fn encode(&self) -> [u8; PAYLOAD_LEN] {
        let mut out = [0u8; PAYLOAD_LEN];
        out[0..2].copy_from_slice(&SERVICE_UUID.to_be_bytes());

        let sid_cid = pepper_core::types::pack_sid_cid(self.sid, self.cid);
        out[2..6].copy_from_slice(&sid_cid.to_be_bytes());

        out[6..18].copy_from_slice(&self.slice);
        out[18] = VERSION_BYTE;
        out[19] = self.tx_power as u8;
        out[20..22].copy_from_slice(&self.seed.to_le_bytes());
        out
    }

    /// Decode a 22-byte service-data blob, rejecting anything that fails
    /// the UUID/length/version checks in §6 ("accept only... AND Service-Data
    /// of length 22 whose first 2 bytes equal 0x6666").
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() != PAYLOAD_LEN {
            return Err(FrameError::WrongLength(bytes.len()));
        }

        let uuid = u16::from_be_bytes([bytes[0], bytes[1]]);
        if uuid != SERVICE_UUID {
            return Err(FrameError::WrongServiceUuid(uuid));
        }

        let version = bytes[18];
        if version != VERSION_BYTE {
            return Err(FrameError::UnsupportedVersion(version));
        }

        let sid_cid = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
        let (sid, cid) = pepper_core::types::unpack_sid_cid(sid_cid);

        let mut slice = [0u8; SLICE_LEN];
        slice.copy_from_slice(&bytes[6..18]);

        let tx_power = bytes[19] as i8;
        let seed = u16::from_le_bytes([bytes[20], bytes[21]]);

        Ok(Self {
            sid,
            cid,
            slice,
            tx_power,
            seed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_preserves_sid_cid_slice_seed() {
        let payload = AdPayload {
            sid: 2,
            cid: 0x1234_5678 & 0x3FFF_FFFF,
            slice: [0xAB; SLICE_LEN],
            tx_power: -8,
            seed: 0xBEEF,
        };

        let encoded = payload.encode();
        assert_eq!(encoded.len(), PAYLOAD_LEN);

        let decoded = AdPayload::decode(&encoded).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn rejects_wrong_length() {
        let bytes = [0u8; 10];
        assert_eq!(AdPayload::decode(&bytes), Err(FrameError::WrongLength(10)));
    }

    #[test]
    fn rejects_wrong_service_uuid() {
        let mut payload = AdPayload {
            sid: 0,
            cid: 1,
            slice: [0u8; SLICE_LEN],
            tx_power: 0,
            seed: 0,
        }
        .encode();
        payload[0] = 0x00;
        payload[1] = 0x01;
        assert_eq!(
            AdPayload::decode(&payload),
            Err(FrameError::WrongServiceUuid(0x0001))
        );
    }

    #[test]
    fn rejects_wrong_version_byte() {
        let mut payload = AdPayload {
            sid: 0,
            cid: 1,
            slice: [0u8; SLICE_LEN],
            tx_power: 0,
            seed: 0,
        }
        .encode();
        payload[18] = 0x01;
        assert_eq!(
            AdPayload::decode(&payload),
            Err(FrameError::UnsupportedVersion(0x01))
        );
    }
}

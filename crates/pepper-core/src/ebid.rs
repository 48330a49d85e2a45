//! Ephemeral Bluetooth Identifier (C2): a 32-byte value carried as three
//! 12-byte slices plus a 12-byte XOR parity slice, reconstructible from any
//! three of the four parts.
//!
//! Slice 3 only carries 8 meaningful bytes; its storage representation here
//! is the 12-byte trailing-padded form (`meaningful[0..8] ++ [0;4]`), which
//! is what `EBID == slice1 ∥ slice2 ∥ slice3[0..8]` and the XOR invariant
//! both operate on. The *wire* representation of slice 3 pads on the other
//! side (4 leading zero bytes, for historical compatibility with the
//! reference firmware's advertisement layout) — stripping that wire padding
//! is the caller's job before handing bytes to [`Ebid::set_slice`]; see
//! `pepper-engine`'s encounter-datum processing.

use crate::error::{Error, Result};
use crate::types::Bytes32;

/// Length in bytes of each of the four EBID parts.
pub const SLICE_LEN: usize = 12;
/// Number of meaningful bytes carried by slice 3.
pub const SLICE3_MEANINGFUL_LEN: usize = 8;

/// Slice index for the first data slice.
pub const SLICE_1: u8 = 0;
/// Slice index for the second data slice.
pub const SLICE_2: u8 = 1;
/// Slice index for the third (partially padded) data slice.
pub const SLICE_3: u8 = 2;
/// Slice index for the XOR parity slice.
pub const SLICE_XOR: u8 = 3;

/// Which of the four parts are currently present, as a small bitset. No
/// `bitflags` dependency is pulled in for a single 4-bit flag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status(u8);

impl Status {
    pub const HAS_SLICE_1: Status = Status(0b0001);
    pub const HAS_SLICE_2: Status = Status(0b0010);
    pub const HAS_SLICE_3: Status = Status(0b0100);
    pub const HAS_XOR: Status = Status(0b1000);
    pub const HAS_ALL: Status = Status(0b1111);

    pub const fn empty() -> Self {
        Status(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl std::ops::BitOr for Status {
    type Output = Status;
    fn bitor(self, rhs: Status) -> Status {
        Status(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Status {
    fn bitor_assign(&mut self, rhs: Status) {
        self.0 |= rhs.0;
    }
}

/// Outcome of an attempted reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconstruction {
    /// The EBID is now fully known.
    Complete,
    /// Fewer than three parts are present; nothing changed.
    NeedMore,
}

/// An ephemeral identifier under construction or already complete.
#[derive(Debug, Clone, Default)]
pub struct Ebid {
    slice1: Option<[u8; SLICE_LEN]>,
    slice2: Option<[u8; SLICE_LEN]>,
    slice3: Option<[u8; SLICE_LEN]>,
    xor: Option<[u8; SLICE_LEN]>,
}

impl Ebid {
    /// An empty EBID with no parts present.
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate all four parts from a local key pair's public key.
    pub fn generate_from(public_key: &Bytes32) -> Self {
        let mut slice1 = [0u8; SLICE_LEN];
        let mut slice2 = [0u8; SLICE_LEN];
        let mut slice3 = [0u8; SLICE_LEN];
        slice1.copy_from_slice(&public_key[0..12]);
        slice2.copy_from_slice(&public_key[12..24]);
        slice3[..SLICE3_MEANINGFUL_LEN].copy_from_slice(&public_key[24..32]);

        let mut xor = [0u8; SLICE_LEN];
        for i in 0..SLICE_LEN {
            xor[i] = slice1[i] ^ slice2[i] ^ slice3[i];
        }

        Self {
            slice1: Some(slice1),
            slice2: Some(slice2),
            slice3: Some(slice3),
            xor: Some(xor),
        }
    }

    /// Set one of the four parts. `bytes` must already be in storage form
    /// (for slice 3: 8 meaningful bytes followed by 4 trailing padding
    /// bytes).
    pub fn set_slice(&mut self, index: u8, bytes: [u8; SLICE_LEN]) -> Result<()> {
        match index {
            SLICE_1 => self.slice1 = Some(bytes),
            SLICE_2 => self.slice2 = Some(bytes),
            SLICE_3 => self.slice3 = Some(bytes),
            SLICE_XOR => self.xor = Some(bytes),
            other => return Err(Error::InvalidSliceIndex(other)),
        }
        Ok(())
    }

    /// Read back one of the four parts, if present.
    pub fn get_slice(&self, index: u8) -> Option<[u8; SLICE_LEN]> {
        match index {
            SLICE_1 => self.slice1,
            SLICE_2 => self.slice2,
            SLICE_3 => self.slice3,
            SLICE_XOR => self.xor,
            _ => None,
        }
    }

    /// Bitflags of which parts are present.
    pub fn status(&self) -> Status {
        let mut s = Status::empty();
        if self.slice1.is_some() {
            s |= Status::HAS_SLICE_1;
        }
        if self.slice2.is_some() {
            s |= Status::HAS_SLICE_2;
        }
        if self.slice3.is_some() {
            s |= Status::HAS_SLICE_3;
        }
        if self.xor.is_some() {
            s |= Status::HAS_XOR;
        }
        s
    }

    /// Whether all four parts are known.
    pub fn is_complete(&self) -> bool {
        self.status() == Status::HAS_ALL
    }

    /// Attempt to fill in a missing part by XORing the other three.
    ///
    /// Requires exactly three of the four parts to be present; with fewer,
    /// returns [`Reconstruction::NeedMore`] without modifying state. With
    /// all four already present this is a no-op that reports `Complete`.
    pub fn reconstruct(&mut self) -> Reconstruction {
        let present = self.status();
        if present == Status::HAS_ALL {
            return Reconstruction::Complete;
        }
        if present.bits().count_ones() != 3 {
            return Reconstruction::NeedMore;
        }

        let parts = [self.slice1, self.slice2, self.slice3, self.xor];
        let missing = parts.iter().position(|p| p.is_none()).expect("exactly one missing");

        let mut computed = [0u8; SLICE_LEN];
        for (i, part) in parts.iter().enumerate() {
            if i == missing {
                continue;
            }
            let bytes = part.expect("present by construction");
            for j in 0..SLICE_LEN {
                computed[j] ^= bytes[j];
            }
        }

        match missing {
            0 => self.slice1 = Some(computed),
            1 => self.slice2 = Some(computed),
            2 => self.slice3 = Some(computed),
            3 => self.xor = Some(computed),
            _ => unreachable!(),
        }

        Reconstruction::Complete
    }

    /// The full 32-byte identifier, once complete.
    pub fn get_full(&self) -> Option<Bytes32> {
        let s1 = self.slice1?;
        let s2 = self.slice2?;
        let s3 = self.slice3?;
        let mut out = [0u8; 32];
        out[0..12].copy_from_slice(&s1);
        out[12..24].copy_from_slice(&s2);
        out[24..32].copy_from_slice(&s3[..SLICE3_MEANINGFUL_LEN]);
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair_ebid() -> (Bytes32, Ebid) {
        let pk: Bytes32 = core::array::from_fn(|i| i as u8);
        (pk, Ebid::generate_from(&pk))
    }

    #[test]
    fn generate_from_matches_public_key() {
        let (pk, ebid) = keypair_ebid();
        assert!(ebid.is_complete());
        assert_eq!(ebid.get_full().unwrap(), pk);
    }

    #[test]
    fn reconstruction_is_order_independent() {
        let (pk, full) = keypair_ebid();
        let parts = [
            (SLICE_1, full.get_slice(SLICE_1).unwrap()),
            (SLICE_2, full.get_slice(SLICE_2).unwrap()),
            (SLICE_3, full.get_slice(SLICE_3).unwrap()),
            (SLICE_XOR, full.get_slice(SLICE_XOR).unwrap()),
        ];

        let orderings: [[usize; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];

        for ordering in orderings {
            let mut ebid = Ebid::new();
            assert_eq!(ebid.reconstruct(), Reconstruction::NeedMore);
            for &idx in &ordering {
                let (slice_idx, bytes) = parts[idx];
                ebid.set_slice(slice_idx, bytes).unwrap();
            }
            assert_eq!(ebid.reconstruct(), Reconstruction::Complete);
            assert_eq!(ebid.get_full().unwrap(), pk);
        }
    }

    #[test]
    fn xor_reconstruction_from_three_parts() {
        // Boundary scenario 2: any three of {slice1, slice2, slice3, xor}
        // determine the fourth, and EBID == slice1 ++ slice2 ++ slice3[0..8].
        let slice1: [u8; 12] = [0x5c, 0x24, 0x4c, 0x6e, 0xf9, 0x7a, 0x02, 0x9c, 0x83, 0xe3, 0x67, 0xac];
        let slice2: [u8; 12] = [0x3c, 0x31, 0xd0, 0x20, 0x97, 0xdc, 0x59, 0xf8, 0xab, 0xe4, 0xa5, 0xb8];
        let slice3: [u8; 12] = [0xf6, 0xd9, 0x07, 0x11, 0x3d, 0xce, 0x90, 0x25, 0x00, 0x00, 0x00, 0x00];
        let mut xor = [0u8; 12];
        for i in 0..12 {
            xor[i] = slice1[i] ^ slice2[i] ^ slice3[i];
        }

        // Dropping the XOR slice and reconstructing it from the other three.
        let mut ebid = Ebid::new();
        ebid.set_slice(SLICE_1, slice1).unwrap();
        ebid.set_slice(SLICE_2, slice2).unwrap();
        ebid.set_slice(SLICE_3, slice3).unwrap();
        assert_eq!(ebid.reconstruct(), Reconstruction::Complete);
        assert_eq!(ebid.get_slice(SLICE_XOR).unwrap(), xor);

        // Dropping slice1 and reconstructing it from {slice2, slice3, xor}.
        let mut ebid2 = Ebid::new();
        ebid2.set_slice(SLICE_2, slice2).unwrap();
        ebid2.set_slice(SLICE_3, slice3).unwrap();
        ebid2.set_slice(SLICE_XOR, xor).unwrap();
        assert_eq!(ebid2.reconstruct(), Reconstruction::Complete);
        assert_eq!(ebid2.get_slice(SLICE_1).unwrap(), slice1);

        let mut expected_full = [0u8; 32];
        expected_full[0..12].copy_from_slice(&slice1);
        expected_full[12..24].copy_from_slice(&slice2);
        expected_full[24..32].copy_from_slice(&slice3[..8]);
        assert_eq!(ebid.get_full().unwrap(), expected_full);
    }

    #[test]
    fn slice3_trailing_bytes_are_not_meaningful() {
        let (pk, ebid) = keypair_ebid();
        let s3 = ebid.get_slice(SLICE_3).unwrap();
        assert_eq!(&s3[..SLICE3_MEANINGFUL_LEN], &pk[24..32]);
        assert_eq!(&s3[SLICE3_MEANINGFUL_LEN..], &[0u8; 4]);
    }

    #[test]
    fn incomplete_ebid_reports_need_more() {
        let mut ebid = Ebid::new();
        ebid.set_slice(SLICE_1, [1u8; 12]).unwrap();
        assert_eq!(ebid.reconstruct(), Reconstruction::NeedMore);
        assert!(!ebid.is_complete());
        assert!(ebid.get_full().is_none());
    }
}

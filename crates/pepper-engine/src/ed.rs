//! Encounter Data (ED) list (C5): the per-peer accumulator that reconstructs
//! a peer's EBID from scanned slices and aggregates BLE/UWB samples across
//! one epoch.
//!
//! Grounded on the reference firmware's `ed_process_slice`/
//! `ed_process_scan_sample`/`ed_process_rng_result`/`ed_finalise` operation
//! set, reworked onto the shared [`crate::arena::Arena`] rather than an
//! intrusive list, and guarded by a single `parking_lot::RwLock` per
//! collection rather than per-entry locking, mirroring `gossipd`'s
//! `Scheduler`'s collection-level locks.

use pepper_core::ebid::{Ebid, Reconstruction, SLICE_3};
use pepper_core::types::{short_addr, BleSummary, Bytes32, ContactRecord, PetPair, UwbSummary};
use thiserror::Error;

use crate::arena::{Arena, ArenaError};

/// Default arena capacity for encounter data.
pub const DEFAULT_MAX_EDS: usize = 10;
/// RSSI values at or above this threshold (dBm) are clipped to it before
/// linear accumulation; erroneous positive spikes are not physical.
pub const RSSI_CLIPPING_THRESH_DBM: i16 = 0;
/// Minimum UWB request count for a surviving ED to be considered valid.
pub const MIN_REQUEST_COUNT: u32 = 1;
/// Maximum plausible average distance (cm) for a valid UWB exposure.
pub const MAX_DISTANCE_CM: f64 = 200.0;

/// Errors from ED-list operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EdError {
    #[error("ED arena exhausted")]
    ArenaFull,
    #[error("no ED found for the given key")]
    NotFound,
}

impl From<ArenaError> for EdError {
    fn from(err: ArenaError) -> Self {
        match err {
            ArenaError::Full(_) => EdError::ArenaFull,
            ArenaError::InvalidIndex(_) => EdError::NotFound,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct BleAccum {
    cumulative_linear: f64,
    sample_count: u32,
    first_s: Option<u64>,
    last_s: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default)]
struct UwbAccum {
    cumulative_distance_cm: f64,
    cumulative_los_pct: f64,
    req_count: u32,
    first_s: Option<u64>,
    last_s: Option<u64>,
}

/// One per-peer accumulation entry for the current epoch.
#[derive(Debug, Clone)]
pub struct Ed {
    cid: u32,
    ebid: Ebid,
    ble: BleAccum,
    uwb: UwbAccum,
    last_seen_s: u64,
    /// BLE-RSSI obfuscation salt, stamped once the peer EBID completes.
    obf_salt: Option<u16>,
}

impl Ed {
    fn new(cid: u32, t_s: u64) -> Self {
        Self {
            cid,
            ebid: Ebid::new(),
            ble: BleAccum::default(),
            uwb: UwbAccum::default(),
            last_seen_s: t_s,
            obf_salt: None,
        }
    }

    pub fn cid(&self) -> u32 {
        self.cid
    }

    pub fn is_ebid_complete(&self) -> bool {
        self.ebid.is_complete()
    }

    pub fn ebid_bytes(&self) -> Option<Bytes32> {
        self.ebid.get_full()
    }

    pub fn last_seen_s(&self) -> u64 {
        self.last_seen_s
    }

    /// `max(ble_exposure, uwb_exposure)` in whole seconds, used by top-K
    /// selection. EDs with no samples on a channel contribute 0 for it.
    pub fn exposure_s(&self) -> u64 {
        let ble_exposure = match (self.ble.first_s, self.ble.last_s) {
            (Some(first), Some(last)) => last.saturating_sub(first),
            _ => 0,
        };
        let uwb_exposure = match (self.uwb.first_s, self.uwb.last_s) {
            (Some(first), Some(last)) => last.saturating_sub(first),
            _ => 0,
        };
        ble_exposure.max(uwb_exposure)
    }
}

/// Finalised per-ED validity and averages, produced by [`EdList::finalise`].
#[derive(Debug, Clone)]
struct Finalised {
    ebid: Bytes32,
    ble: Option<BleSummary>,
    uwb: Option<UwbSummary>,
}

/// The arena-backed ED list for one epoch.
pub struct EdList {
    arena: Arena<Ed>,
    /// Optional receiver-gain compensation subtracted from RSSI alongside
    /// the obfuscation salt; runtime tunable, default 0.
    pub rx_gain_comp_db: i16,
    /// Whether the obfuscation salt is applied at all (on by default).
    pub obfuscation_enabled: bool,
    /// Minimum UWB request count for a surviving ED to be considered valid.
    pub min_request_count: u32,
    /// Maximum plausible average distance (cm) for a valid UWB exposure.
    pub max_distance_cm: f64,
}

impl EdList {
    pub fn new(capacity: usize) -> Self {
        Self {
            arena: Arena::with_capacity(capacity),
            rx_gain_comp_db: 0,
            obfuscation_enabled: true,
            min_request_count: MIN_REQUEST_COUNT,
            max_distance_cm: MAX_DISTANCE_CM,
        }
    }

    fn find_index_by_cid(&self, cid: u32) -> Option<u16> {
        self.arena.iter().find(|(_, ed)| ed.cid == cid).map(|(i, _)| i)
    }

    fn find_index_by_short_addr(&self, short: u16) -> Option<u16> {
        self.arena
            .iter()
            .find(|(_, ed)| short_addr(ed.cid) == short)
            .map(|(i, _)| i)
    }

    /// Locate or create the ED for `cid`, apply the given slice, and bump
    /// `last_seen_s`. `slice_bytes` is in wire form (front-padded for slice
    /// 3); un-padding into storage form happens here.
    pub fn process_slice(
        &mut self,
        cid: u32,
        t_s: u64,
        sid: u8,
        slice_bytes: [u8; 12],
        local_ebid: &Bytes32,
    ) -> Result<u16, EdError> {
        let index = match self.find_index_by_cid(cid) {
            Some(index) => index,
            None => self.arena.insert(Ed::new(cid, t_s))?,
        };

        let ed = self.arena.get_mut(index).expect("just located or inserted");
        ed.last_seen_s = t_s;

        let storage_bytes = if sid == SLICE_3 {
            unpad_slice3_wire(slice_bytes)
        } else {
            slice_bytes
        };
        ed.ebid
            .set_slice(sid, storage_bytes)
            .map_err(|_| EdError::NotFound)?;

        let was_incomplete = !ed.ebid.is_complete();
        if was_incomplete {
            ed.ebid.reconstruct();
        }

        if ed.ebid.is_complete() && ed.obf_salt.is_none() {
            ed.ble.first_s = Some(t_s);
            ed.ble.last_s = Some(t_s);
            ed.uwb.first_s = Some(t_s);
            ed.uwb.last_s = Some(t_s);
            let peer_ebid = ed.ebid.get_full().expect("complete");
            ed.obf_salt = Some(obfuscation_salt(&peer_ebid, local_ebid));
        }

        Ok(index)
    }

    /// Accumulate one RSSI observation. Ignored if the ED's EBID has not
    /// completed yet (no salt to apply, and no meaningful peer identity).
    pub fn process_scan_sample(&mut self, cid: u32, t_s: u64, rssi_dbm: i16) {
        let Some(index) = self.find_index_by_cid(cid) else {
            return;
        };
        let Some(ed) = self.arena.get_mut(index) else {
            return;
        };
        if !ed.ebid.is_complete() {
            return;
        }

        let clipped = rssi_dbm.min(RSSI_CLIPPING_THRESH_DBM);
        let salt = if self.obfuscation_enabled {
            ed.obf_salt.unwrap_or(0) as i16
        } else {
            0
        };
        let corrected = (clipped - salt - self.rx_gain_comp_db) as f64;
        ed.ble.cumulative_linear += 10f64.powf(corrected / 10.0);
        ed.ble.sample_count += 1;
        ed.ble.first_s.get_or_insert(t_s);
        ed.ble.last_s = Some(t_s);
        ed.last_seen_s = t_s;
    }

    /// Accumulate one UWB ranging result, located by `short_addr` (the low
    /// 16 bits of the peer's CID).
    pub fn process_rng_result(&mut self, short: u16, t_s: u64, distance_cm: f64, los_pct: f64) {
        let Some(index) = self.find_index_by_short_addr(short) else {
            return;
        };
        let Some(ed) = self.arena.get_mut(index) else {
            return;
        };

        ed.uwb.cumulative_distance_cm += distance_cm;
        ed.uwb.cumulative_los_pct += los_pct;
        ed.uwb.req_count += 1;
        ed.uwb.first_s.get_or_insert(t_s);
        ed.uwb.last_s = Some(t_s);
        ed.last_seen_s = t_s;
    }

    /// All currently tracked EDs, for TWR scheduling and top-K selection.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &Ed)> {
        self.arena.iter()
    }

    pub fn get(&self, index: u16) -> Option<&Ed> {
        self.arena.get(index)
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Compute validity/averages for every ED, evict those with neither
    /// `valid_ble` nor `valid_uwb`, and return the survivors. Does not
    /// derive PETs; that is the epoch engine's job once it has local keys.
    fn finalise_internal(&mut self, min_exposure_s: u64) -> Vec<(u16, Finalised)> {
        let mut survivors = Vec::new();
        let mut evict = Vec::new();

        for (index, ed) in self.arena.iter() {
            let Some(ebid) = ed.ebid.get_full() else {
                evict.push(index);
                continue;
            };

            let ble_exposure = match (ed.ble.first_s, ed.ble.last_s) {
                (Some(first), Some(last)) => last.saturating_sub(first),
                _ => 0,
            };
            let valid_ble = ed.ble.sample_count > 0 && ble_exposure >= min_exposure_s;

            let uwb_exposure = match (ed.uwb.first_s, ed.uwb.last_s) {
                (Some(first), Some(last)) => last.saturating_sub(first),
                _ => 0,
            };
            let avg_d_cm = if ed.uwb.req_count > 0 {
                ed.uwb.cumulative_distance_cm / ed.uwb.req_count as f64
            } else {
                0.0
            };
            let valid_uwb = ed.uwb.req_count >= self.min_request_count
                && uwb_exposure >= min_exposure_s
                && avg_d_cm <= self.max_distance_cm;

            if !valid_ble && !valid_uwb {
                evict.push(index);
                continue;
            }

            let ble = valid_ble.then(|| BleSummary {
                exposure_s: ble_exposure as u32,
                scan_count: ed.ble.sample_count,
                avg_rssi_dbm: 10.0 * (ed.ble.cumulative_linear / ed.ble.sample_count as f64).log10(),
            });

            let uwb = valid_uwb.then(|| UwbSummary {
                exposure_s: uwb_exposure as u32,
                req_count: ed.uwb.req_count,
                avg_d_cm: avg_d_cm as f32,
                avg_los_pct: (ed.uwb.cumulative_los_pct / ed.uwb.req_count as f64) as f32,
            });

            survivors.push((index, Finalised { ebid, ble, uwb }));
        }

        for index in evict {
            let _ = self.arena.remove(index);
        }

        survivors
    }

    /// Finalise the epoch: compute validity/averages, evict invalid EDs,
    /// keep the `top_k` survivors by `exposure_s`, derive a PET pair for
    /// each from `local_keys`, and emit contact records. Replaces the
    /// current minimum as larger arrivals come in, so the result does not
    /// depend on insertion order.
    pub fn finalise(
        &mut self,
        min_exposure_s: u64,
        top_k: usize,
        local_keys: &pepper_core::crypto::Keys,
    ) -> Vec<ContactRecord> {
        let mut survivors = self.finalise_internal(min_exposure_s);

        survivors.sort_by(|a, b| {
            let a_exp = exposure_of(&a.1);
            let b_exp = exposure_of(&b.1);
            b_exp.cmp(&a_exp)
        });
        survivors.truncate(top_k);

        let mut records = Vec::with_capacity(survivors.len());
        for (index, finalised) in &survivors {
            if let Ok(pet) = pepper_core::crypto::gen_pet_pair(local_keys, &finalised.ebid) {
                records.push(ContactRecord {
                    pet,
                    ble: finalised.ble,
                    uwb: finalised.uwb,
                });
            }
            let _ = self.arena.remove(*index);
        }

        self.clear();
        records
    }

    /// Drop every entry, releasing all arena slots.
    pub fn clear(&mut self) {
        self.arena.clear();
    }
}

fn exposure_of(finalised: &Finalised) -> u32 {
    let ble = finalised.ble.map(|b| b.exposure_s).unwrap_or(0);
    let uwb = finalised.uwb.map(|u| u.exposure_s).unwrap_or(0);
    ble.max(uwb)
}

/// Un-pad a wire-form slice-3 observation (4 leading zero bytes, 8
/// meaningful trailing bytes) into storage form (8 meaningful bytes
/// followed by 4 trailing zero bytes).
fn unpad_slice3_wire(wire: [u8; 12]) -> [u8; 12] {
    let mut storage = [0u8; 12];
    storage[0..8].copy_from_slice(&wire[4..12]);
    storage
}

/// `obf_salt = (larger_ebid[0] << 8 | larger_ebid[1]) mod 100`, where
/// "larger" is chosen by lexicographic comparison of the two EBIDs so both
/// endpoints derive the same salt for the pair.
fn obfuscation_salt(peer_ebid: &Bytes32, local_ebid: &Bytes32) -> u16 {
    let larger = if peer_ebid > local_ebid { peer_ebid } else { local_ebid };
    (((larger[0] as u16) << 8) | larger[1] as u16) % 100
}

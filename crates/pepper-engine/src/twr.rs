//! TWR bridge (C6): translates advertiser/scanner events into
//! EBID-offset-scheduled UWB ranging requests and listens, via a small pool
//! of pre-allocated scheduling slots.
//!
//! Grounded on `prober/src/scheduler.rs`'s `ScheduledProbe`/queue-pool shape
//! (here a flat pool rather than three priority queues, since TWR schedule
//! entries carry no priority distinction of their own) and the reference
//! firmware's `_twr_cb`/`_scan_cb`/`_adv_cb`/`_get_twr_offset` for the offset
//! formula and the adv-complete-schedules-request /
//! slice-complete-schedules-listen wiring.

use pepper_core::types::Bytes32;
use tracing::{debug, warn};

use crate::arena::{Arena, ArenaError};

/// Default number of pre-allocated TWR scheduling slots.
pub const DEFAULT_POOL_SIZE: usize = 40;
/// Default minimum EBID-derived offset, in milliseconds, added before any
/// request/listen offset tuning. Overridable per `TwrPool` via
/// `EpochParams::min_offset_ms`.
pub const MIN_OFFSET_MS: u32 = 100;
/// PEPPER never finds a peer who has been silent longer than this without
/// dropping the TWR-request attempt for them.
pub const MIA_TIMEOUT_S: u64 = 5;

/// `offset_ms = (ebid[0] + (ebid[1] << 8)) mod adv_interval_ms + min_offset_ms`.
pub fn ebid_offset_ms(ebid: &Bytes32, adv_interval_ms: u32, min_offset_ms: u32) -> u32 {
    let raw = ebid[0] as u32 + ((ebid[1] as u32) << 8);
    raw % adv_interval_ms + min_offset_ms
}

/// What a scheduled slot will do when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwrAction {
    /// Initiate a ranging request to `dst_short_addr`.
    Request { dst_short_addr: u16 },
    /// Listen for an inbound ranging request.
    Listen,
}

/// One scheduled TWR operation.
#[derive(Debug, Clone, Copy)]
pub struct ScheduledTwr {
    pub action: TwrAction,
    pub fire_at_ms: u64,
}

/// The UWB device's non-blocking busy flag. Requests/listens are abandoned,
/// never queued, when it is held.
#[derive(Debug, Default)]
pub struct UwbSemaphore {
    busy: bool,
}

impl UwbSemaphore {
    pub fn try_acquire(&mut self) -> bool {
        if self.busy {
            false
        } else {
            self.busy = true;
            true
        }
    }

    pub fn release(&mut self) {
        self.busy = false;
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }
}

/// Result of one completed ranging exchange, as reported by the (external,
/// out of scope) UWB stack's completion callback.
#[derive(Debug, Clone, Copy)]
pub struct RangingResult {
    pub src_short_addr: u16,
    pub dst_short_addr: u16,
    pub distance_cm: f64,
    pub los_pct: f64,
}

/// The TWR scheduling-slot pool.
pub struct TwrPool {
    slots: Arena<ScheduledTwr>,
    pub rx_offset_ms: i32,
    pub tx_offset_ms: i32,
    pub min_offset_ms: u32,
}

impl TwrPool {
    pub fn new(capacity: usize, min_offset_ms: u32) -> Self {
        Self {
            slots: Arena::with_capacity(capacity),
            rx_offset_ms: 0,
            tx_offset_ms: 0,
            min_offset_ms,
        }
    }

    /// Set the request-side offset tweak. Negative values are allowed
    /// provided `offset_ms + tx_offset_ms` stays positive for realistic
    /// `offset_ms` values; the caller is expected to assert this at the
    /// controller boundary (spec's "sign-violating offset" debug assertion).
    pub fn set_tx_offset(&mut self, ticks: i32) {
        self.tx_offset_ms = ticks;
    }

    pub fn set_rx_offset(&mut self, ticks: i32) {
        self.rx_offset_ms = ticks;
    }

    /// Schedule a ranging request to `peer_ebid`'s owner, fired relative to
    /// `now_ms` (the local advertisement-complete time).
    pub fn schedule_request(
        &mut self,
        now_ms: u64,
        peer_ebid: &Bytes32,
        adv_interval_ms: u32,
        dst_short_addr: u16,
    ) -> bool {
        let fire_at_ms = (now_ms as i64
            + ebid_offset_ms(peer_ebid, adv_interval_ms, self.min_offset_ms) as i64
            + self.tx_offset_ms as i64)
            .max(0) as u64;
        self.push(ScheduledTwr {
            action: TwrAction::Request { dst_short_addr },
            fire_at_ms,
        })
    }

    /// Schedule a listen window, fired relative to `now_ms` (the time the
    /// peer's EBID finished reconstructing via the scanner).
    pub fn schedule_listen(&mut self, now_ms: u64, local_ebid: &Bytes32, adv_interval_ms: u32) -> bool {
        let fire_at_ms = (now_ms as i64
            + ebid_offset_ms(local_ebid, adv_interval_ms, self.min_offset_ms) as i64
            + self.rx_offset_ms as i64)
            .max(0) as u64;
        self.push(ScheduledTwr {
            action: TwrAction::Listen,
            fire_at_ms,
        })
    }

    fn push(&mut self, scheduled: ScheduledTwr) -> bool {
        match self.slots.insert(scheduled) {
            Ok(_) => true,
            Err(ArenaError::Full(cap)) => {
                warn!(capacity = cap, "TWR schedule pool exhausted, dropping attempt");
                false
            }
            Err(other) => {
                warn!(?other, "unexpected TWR pool error");
                false
            }
        }
    }

    /// Fire every slot due at or before `now_ms`, consulting `semaphore`
    /// before invoking the (caller-supplied) primitive. Slots whose
    /// primitive is abandoned because the semaphore is busy are still
    /// removed from the pool (the reference firmware does not retry).
    ///
    /// `on_fire` receives the action and must itself call
    /// `semaphore.try_acquire()` style primitives if it actually invokes the
    /// radio; this function only handles pool bookkeeping and logging.
    pub fn fire_due(&mut self, now_ms: u64, semaphore: &mut UwbSemaphore, mut on_fire: impl FnMut(TwrAction)) {
        let due: Vec<u16> = self
            .slots
            .iter()
            .filter(|(_, s)| s.fire_at_ms <= now_ms)
            .map(|(i, _)| i)
            .collect();

        for index in due {
            let Ok(scheduled) = self.slots.remove(index) else {
                continue;
            };
            if semaphore.is_busy() {
                warn!("UWB semaphore busy, abandoning TWR attempt");
                continue;
            }
            let action = scheduled.action;
            debug!(?action, "firing TWR slot");
            on_fire(action);
        }
    }

    /// Cancel every pending slot (used by `stop`).
    pub fn cancel_all(&mut self) {
        self.slots.clear();
    }

    pub fn pending_count(&self) -> usize {
        self.slots.len()
    }
}

/// Convert a time-of-flight measurement (in picoseconds, per the UWB
/// stack's `rng_request`/`rng_listen` convention) to a distance in
/// centimetres, using the speed of light.
pub fn time_of_flight_to_cm(tof_ps: u64) -> f64 {
    const SPEED_OF_LIGHT_CM_PER_S: f64 = 29_979_245_800.0;
    (tof_ps as f64 / 1_000_000_000_000.0) * SPEED_OF_LIGHT_CM_PER_S
}

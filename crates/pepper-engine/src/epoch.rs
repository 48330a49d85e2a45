//! Epoch engine (C7): the aligned epoch state machine, top-K selection, and
//! PET-tagged contact-record emission at finalisation.
//!
//! Grounded on the reference firmware's `epoch.c` (`_add_to_top_list`'s
//! running-minimum top-K and `epoch_finish`'s finalisation order) and
//! `gossipd`'s `EventLog`/`Server` append-then-hand-off shape
//! (`gossipd/src/event_log.rs`, `gossipd/src/server.rs`) for the Rust idiom:
//! an owned state struct with `Result`-returning mutators instead of the
//! source's void-returning side-effecting functions.

use pepper_core::crypto::Keys;
use pepper_core::ebid::Ebid;
use pepper_core::types::EpochSummary;
use thiserror::Error;
use tracing::{debug, info};

use crate::ed::EdList;

/// Default epoch duration, in seconds.
pub const DEFAULT_DURATION_S: u64 = 900;
/// Default minimum exposure, in seconds, for an ED to survive finalisation.
pub const DEFAULT_MIN_EXPOSURE_S: u64 = 30;
/// Default number of contact records kept per epoch.
pub const DEFAULT_TOP_K: usize = 8;

/// The epoch state machine's states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochState {
    Idle,
    SetUp,
    Active,
    Finalising,
    Paused,
}

/// Parameters for one `start`.
#[derive(Debug, Clone, Copy)]
pub struct EpochParams {
    pub duration_s: u64,
    pub min_exposure_s: u64,
    pub top_k: usize,
    pub max_eds: usize,
    pub adv_interval_ms: u32,
    /// Number of advertisement events spent on each EBID slice before
    /// rotating to the next.
    pub advs_per_slice: u32,
    /// Seconds since last seen before a peer is dropped from TWR scheduling.
    pub mia_timeout_s: u64,
    /// Number of pre-allocated TWR scheduling slots.
    pub twr_slot_pool: usize,
    /// Minimum EBID-derived offset, in milliseconds, added before any
    /// request/listen offset tuning.
    pub min_offset_ms: u32,
    /// Minimum UWB request count for a surviving ED to be considered valid.
    pub min_request_count: u32,
    /// Maximum plausible average distance (cm) for a valid UWB exposure.
    pub max_distance_cm: f64,
    /// Number of epoch iterations to run before returning to `Idle`; `None`
    /// runs forever until `stop`.
    pub iterations: Option<u32>,
}

impl Default for EpochParams {
    fn default() -> Self {
        Self {
            duration_s: DEFAULT_DURATION_S,
            min_exposure_s: DEFAULT_MIN_EXPOSURE_S,
            top_k: DEFAULT_TOP_K,
            max_eds: crate::ed::DEFAULT_MAX_EDS,
            adv_interval_ms: 200,
            advs_per_slice: 1,
            mia_timeout_s: crate::twr::MIA_TIMEOUT_S,
            twr_slot_pool: crate::twr::DEFAULT_POOL_SIZE,
            min_offset_ms: crate::twr::MIN_OFFSET_MS,
            min_request_count: crate::ed::MIN_REQUEST_COUNT,
            max_distance_cm: crate::ed::MAX_DISTANCE_CM,
            iterations: None,
        }
    }
}

/// Epoch-engine errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EpochError {
    #[error("operation requires state {expected:?}, found {actual:?}")]
    WrongState {
        expected: &'static str,
        actual: EpochState,
    },
}

/// The result of one `end_of_epoch` call: the finalised summary and whether
/// another iteration should begin.
pub struct EndOfEpochOutcome {
    pub summary: EpochSummary,
    pub continue_running: bool,
}

/// Owns per-epoch key material, the local EBID, the ED list, and the state
/// machine that sequences them.
pub struct EpochEngine {
    state: EpochState,
    params: EpochParams,
    keys: Option<Keys>,
    local_ebid: Option<Ebid>,
    ed_list: EdList,
    start_time_s: u64,
    timestamp: u64,
    iterations_remaining: Option<u32>,
}

impl EpochEngine {
    pub fn new(params: EpochParams) -> Self {
        let mut ed_list = EdList::new(params.max_eds);
        ed_list.min_request_count = params.min_request_count;
        ed_list.max_distance_cm = params.max_distance_cm;
        Self {
            state: EpochState::Idle,
            ed_list,
            iterations_remaining: params.iterations,
            params,
            keys: None,
            local_ebid: None,
            start_time_s: 0,
            timestamp: 0,
        }
    }

    pub fn state(&self) -> EpochState {
        self.state
    }

    pub fn params(&self) -> &EpochParams {
        &self.params
    }

    pub fn local_keys(&self) -> Option<&Keys> {
        self.keys.as_ref()
    }

    pub fn local_ebid(&self) -> Option<&Ebid> {
        self.local_ebid.as_ref()
    }

    pub fn ed_list(&self) -> &EdList {
        &self.ed_list
    }

    pub fn ed_list_mut(&mut self) -> &mut EdList {
        &mut self.ed_list
    }

    /// If `align` was requested, the delay in seconds before the first
    /// epoch's `end_of_epoch` so boundaries land on a global grid:
    /// `duration_s - (wall_clock_epoch_s mod duration_s)`.
    pub fn alignment_delay_s(duration_s: u64, wall_clock_epoch_s: u64) -> u64 {
        duration_s - (wall_clock_epoch_s % duration_s)
    }

    /// `[Idle] --start--> [SetUp]`: stamp start time, generate fresh keys
    /// and local EBID, reset the ED list.
    pub fn setup(&mut self, now_s: u64, wall_clock_epoch_s: u64) -> Result<(), EpochError> {
        if self.state != EpochState::Idle {
            return Err(EpochError::WrongState {
                expected: "Idle",
                actual: self.state,
            });
        }
        self.start_time_s = now_s;
        self.timestamp = wall_clock_epoch_s;
        let keys = Keys::generate();
        self.local_ebid = Some(Ebid::generate_from(&keys.public_bytes()));
        self.keys = Some(keys);
        self.ed_list.clear();
        self.state = EpochState::SetUp;
        debug!(now_s, wall_clock_epoch_s, "epoch setup complete");
        Ok(())
    }

    /// `[SetUp] --bootstrap done--> [Active]`.
    pub fn mark_active(&mut self) -> Result<(), EpochError> {
        if self.state != EpochState::SetUp {
            return Err(EpochError::WrongState {
                expected: "SetUp",
                actual: self.state,
            });
        }
        self.state = EpochState::Active;
        Ok(())
    }

    /// Number of BLE advertisement events for a bounded run of one epoch.
    pub fn advs_max(&self) -> u32 {
        ((self.params.duration_s * 1000) / self.params.adv_interval_ms.max(1) as u64) as u32
    }

    /// `[Active] --pause--> [Paused]`.
    pub fn pause(&mut self) -> Result<(), EpochError> {
        if self.state != EpochState::Active {
            return Err(EpochError::WrongState {
                expected: "Active",
                actual: self.state,
            });
        }
        self.state = EpochState::Paused;
        Ok(())
    }

    /// `[Paused] --resume--> [Active]`. Alignment, if requested, is the
    /// caller's responsibility (sleeping `alignment_delay_s` before calling
    /// this) since the engine itself has no notion of wall-clock sleep.
    pub fn resume(&mut self) -> Result<(), EpochError> {
        if self.state != EpochState::Paused {
            return Err(EpochError::WrongState {
                expected: "Paused",
                actual: self.state,
            });
        }
        self.state = EpochState::Active;
        Ok(())
    }

    /// `[Active] --end-of-epoch timer--> [Finalising] --> [Active' | Idle]`:
    /// finalise the ED list (validity, top-K, PET derivation), emit the
    /// epoch summary, and decide whether to re-enter `setup`.
    pub fn end_of_epoch(&mut self, wall_clock_epoch_s: u64) -> Result<EndOfEpochOutcome, EpochError> {
        if self.state != EpochState::Active {
            return Err(EpochError::WrongState {
                expected: "Active",
                actual: self.state,
            });
        }
        self.state = EpochState::Finalising;

        let keys = self.keys.as_ref().expect("keys set during setup");
        let contacts = self
            .ed_list
            .finalise(self.params.min_exposure_s, self.params.top_k, keys);

        info!(contact_count = contacts.len(), "epoch finalised");

        let summary = EpochSummary {
            timestamp: wall_clock_epoch_s,
            contacts,
        };

        if let Some(remaining) = self.iterations_remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
        let continue_running = !matches!(self.iterations_remaining, Some(0));

        // Re-entering `setup` for the next iteration is the controller's
        // job (it decides scheduling); the engine itself always lands back
        // in `Idle` here and expects `setup` to be called again if
        // `continue_running` is true.
        self.state = EpochState::Idle;

        Ok(EndOfEpochOutcome {
            summary,
            continue_running,
        })
    }

    /// `any --stop--> [Idle]`.
    pub fn stop(&mut self) {
        self.ed_list.clear();
        self.keys = None;
        self.local_ebid = None;
        self.state = EpochState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_lifecycle_transitions() {
        let mut engine = EpochEngine::new(EpochParams {
            duration_s: 10,
            ..Default::default()
        });
        assert_eq!(engine.state(), EpochState::Idle);

        engine.setup(0, 1000).unwrap();
        assert_eq!(engine.state(), EpochState::SetUp);
        assert!(engine.local_ebid().is_some());

        engine.mark_active().unwrap();
        assert_eq!(engine.state(), EpochState::Active);

        engine.pause().unwrap();
        assert_eq!(engine.state(), EpochState::Paused);
        engine.resume().unwrap();
        assert_eq!(engine.state(), EpochState::Active);

        let outcome = engine.end_of_epoch(1010).unwrap();
        assert_eq!(outcome.summary.timestamp, 1010);
        assert_eq!(engine.state(), EpochState::Idle);
    }

    #[test]
    fn wrong_state_transitions_are_rejected() {
        let mut engine = EpochEngine::new(EpochParams::default());
        assert_eq!(
            engine.mark_active(),
            Err(EpochError::WrongState {
                expected: "SetUp",
                actual: EpochState::Idle,
            })
        );
    }

    #[test]
    fn alignment_delay_matches_formula() {
        assert_eq!(EpochEngine::alignment_delay_s(900, 1800), 900);
        assert_eq!(EpochEngine::alignment_delay_s(900, 1850), 850);
    }

    #[test]
    fn iterations_exhausted_stops_continuation() {
        let mut engine = EpochEngine::new(EpochParams {
            duration_s: 10,
            iterations: Some(1),
            ..Default::default()
        });
        engine.setup(0, 0).unwrap();
        engine.mark_active().unwrap();
        let outcome = engine.end_of_epoch(10).unwrap();
        assert!(!outcome.continue_running);
    }

    #[test]
    fn advs_max_matches_duration_and_interval() {
        let engine = EpochEngine::new(EpochParams {
            duration_s: 900,
            adv_interval_ms: 200,
            ..Default::default()
        });
        assert_eq!(engine.advs_max(), 900 * 1000 / 200);
    }
}

//! Rotating-slice BLE advertiser (C3).
//!
//! Emits one advertisement every `itvl_ms`, rotating through the EBID slice
//! carousel `{slice1, slice2, slice3, xor}` every `advs_per_slice` events.
//! The host's extended-advertising stack itself is out of scope; this is
//! the re-arming scheduling layer the reference firmware drives it with,
//! reworked from `_ebid_mgr_tick`/`_tick_event_handler`'s self-re-arming
//! timeout into a `tokio` task that re-arms on its own interval and
//! broadcasts one event per tick, in the idiom of `gossipd`'s
//! `spawn_sync_task` background loop.

use pepper_core::ebid::{Ebid, SLICE_1, SLICE_2, SLICE_3, SLICE_XOR};
use pepper_core::types::pack_sid_cid;
use rand::RngCore;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::framing::AdPayload;

/// How a tick's 16-bit seed field is populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedMode {
    /// A fresh random value on every advertisement.
    Random,
    /// The advertiser's own event counter, truncated to 16 bits.
    EventCounter,
}

/// One advertiser run's configuration.
#[derive(Debug, Clone, Copy)]
pub struct AdvertiserConfig {
    pub itvl_ms: u32,
    /// Number of advertisement events before stopping; `u32::MAX` is unbounded.
    pub advs_max: u32,
    pub advs_per_slice: u32,
    pub tx_power: i8,
    pub seed_mode: SeedMode,
}

impl Default for AdvertiserConfig {
    fn default() -> Self {
        Self {
            itvl_ms: 200,
            advs_max: u32::MAX,
            advs_per_slice: 1,
            tx_power: 0,
            seed_mode: SeedMode::Random,
        }
    }
}

/// One emitted advertisement, handed to `on_advertisement` listeners.
#[derive(Debug, Clone, Copy)]
pub struct AdvertisementEvent {
    pub event_count: u32,
    pub seed: u16,
    pub payload: AdPayload,
}

const SLICE_CAROUSEL: [u8; 4] = [SLICE_1, SLICE_2, SLICE_3, SLICE_XOR];

/// Rotating-slice advertiser.
///
/// `start` spawns a background task that ticks every `itvl_ms` and sends an
/// [`AdvertisementEvent`] to every receiver cloned from [`Advertiser::subscribe`]
/// beforehand; `stop` aborts it. Only one run may be active at a time.
pub struct Advertiser {
    cid: u32,
    ebid: Ebid,
    config: AdvertiserConfig,
    event_count: Arc<AtomicU32>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    tx: mpsc::Sender<AdvertisementEvent>,
    rx: Option<mpsc::Receiver<AdvertisementEvent>>,
}

impl Advertiser {
    /// Create a stopped advertiser for one epoch's EBID, generating a fresh
    /// random CID held constant until `stop`.
    pub fn new(ebid: Ebid, config: AdvertiserConfig) -> Self {
        let cid = rand::thread_rng().next_u32() & 0x3FFF_FFFF;
        let (tx, rx) = mpsc::channel(32);
        Self {
            cid,
            ebid,
            config,
            event_count: Arc::new(AtomicU32::new(0)),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
            tx,
            rx: Some(rx),
        }
    }

    /// The connection id this advertiser was started with.
    pub fn cid(&self) -> u32 {
        self.cid
    }

    /// Pin the connection id, masked to its 30-bit range. Takes effect on
    /// the next `start`; does not affect a run already in flight.
    pub fn set_cid(&mut self, cid: u32) {
        self.cid = cid & 0x3FFF_FFFF;
    }

    /// Take the receiving half of the advertisement-event channel. Must be
    /// called before [`Advertiser::start`]; returns `None` on a second call.
    pub fn subscribe(&mut self) -> Option<mpsc::Receiver<AdvertisementEvent>> {
        self.rx.take()
    }

    /// Begin advertising. Stops any in-flight run first and resets the
    /// event counter.
    pub fn start(&mut self) {
        self.stop();
        self.event_count.store(0, AtomicOrdering::SeqCst);
        self.running.store(true, AtomicOrdering::SeqCst);

        let cid = self.cid;
        let ebid = self.ebid.clone();
        let config = self.config;
        let event_count = self.event_count.clone();
        let running = self.running.clone();
        let tx = self.tx.clone();

        self.handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(config.itvl_ms as u64));
            loop {
                ticker.tick().await;
                if !running.load(AtomicOrdering::SeqCst) {
                    break;
                }

                let count = event_count.fetch_add(1, AtomicOrdering::SeqCst);
                if count >= config.advs_max {
                    running.store(false, AtomicOrdering::SeqCst);
                    break;
                }

                let carousel_pos = (count / config.advs_per_slice.max(1)) as usize % SLICE_CAROUSEL.len();
                let sid = SLICE_CAROUSEL[carousel_pos];
                let Some(slice) = ebid.get_slice(sid) else {
                    trace!(sid, "advertiser: slice not yet available, skipping tick");
                    continue;
                };

                let seed = match config.seed_mode {
                    SeedMode::Random => (rand::thread_rng().next_u32() & 0xFFFF) as u16,
                    SeedMode::EventCounter => (count & 0xFFFF) as u16,
                };

                let payload = AdPayload {
                    sid,
                    cid,
                    slice,
                    tx_power: config.tx_power,
                    seed,
                };
                debug_assert_eq!(pack_sid_cid(sid, cid) >> 30, sid as u32);

                let event = AdvertisementEvent {
                    event_count: count,
                    seed,
                    payload,
                };
                if tx.send(event).await.is_err() {
                    break;
                }
                debug!(sid, count, "advertiser tick emitted");
            }
        }));
    }

    /// Stop any in-flight advertising run. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, AtomicOrdering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(AtomicOrdering::SeqCst)
    }

    pub fn event_count(&self) -> u32 {
        self.event_count.load(AtomicOrdering::SeqCst)
    }
}

impl Drop for Advertiser {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pepper_core::crypto::Keys;

    fn test_ebid() -> Ebid {
        let keys = Keys::generate();
        Ebid::generate_from(&keys.public_bytes())
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_emit_rotating_slices_until_advs_max() {
        let ebid = test_ebid();
        let config = AdvertiserConfig {
            itvl_ms: 10,
            advs_max: 4,
            advs_per_slice: 1,
            tx_power: -4,
            seed_mode: SeedMode::EventCounter,
        };
        let mut adv = Advertiser::new(ebid, config);
        let mut rx = adv.subscribe().unwrap();
        adv.start();

        let mut sids = Vec::new();
        for _ in 0..4 {
            tokio::time::advance(Duration::from_millis(10)).await;
            let event = rx.recv().await.expect("event");
            sids.push(event.payload.sid);
        }
        assert_eq!(sids, vec![SLICE_1, SLICE_2, SLICE_3, SLICE_XOR]);

        tokio::time::advance(Duration::from_millis(10)).await;
        assert!(rx.recv().await.is_none() || !adv.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_further_ticks() {
        let ebid = test_ebid();
        let config = AdvertiserConfig {
            itvl_ms: 10,
            advs_max: u32::MAX,
            advs_per_slice: 1,
            tx_power: 0,
            seed_mode: SeedMode::Random,
        };
        let mut adv = Advertiser::new(ebid, config);
        let _rx = adv.subscribe().unwrap();
        adv.start();
        tokio::time::advance(Duration::from_millis(10)).await;
        assert!(adv.is_running());
        adv.stop();
        assert!(!adv.is_running());
    }
}

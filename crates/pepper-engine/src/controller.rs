//! Controller (C8): owns every component instance and the mutex guarding
//! epoch-state transitions; brokers time-adjust and end-of-epoch events.
//!
//! Grounded on the reference firmware's `controller.c` (`_twr_cb`/`_scan_cb`/
//! `_adv_cb` wiring, `_align_end_of_epoch`, `pepper_twr_set_rx_offset`'s sign
//! assertion) and `gossipd`'s `Server` (`gossipd/src/server.rs`): a single
//! owning struct, a `broadcast::Sender` for shutdown, `tokio::select!` run
//! loops spawned per background concern. All public operations acquire the
//! controller mutex; the radio callbacks that feed this controller run
//! fast and never take it, consistent with the concurrency model's "radio
//! callbacks never block" rule — here they only forward onto channels.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pepper_core::ebid::Ebid;
use pepper_core::types::short_addr;
use pepper_radio::{AdvertiserConfig, Scanner};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::current_time::{classify_offset, PreHookDecision};
use crate::epoch::{EpochEngine, EpochError, EpochParams, EpochState};
use crate::sink::{Sink, SinkError};
use crate::twr::{RangingResult, TwrAction, TwrPool, UwbSemaphore};

/// Controller errors.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("epoch engine error: {0}")]
    Epoch(#[from] EpochError),
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),
    #[error("controller already running")]
    AlreadyRunning,
    #[error("controller is not running")]
    NotRunning,
}

/// Overall run status, distinct from the epoch engine's finer-grained
/// states (`SetUp`/`Finalising` are transient and not separately surfaced
/// here).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Stopped,
    Running,
    Paused,
}

struct Inner {
    engine: EpochEngine,
    twr_pool: TwrPool,
    semaphore: UwbSemaphore,
}

/// Owns the epoch engine, TWR pool, and UWB semaphore behind one mutex, and
/// the background tasks that drive the radio-event-to-ED-list-to-TWR
/// pipeline for one running epoch.
pub struct Controller {
    inner: Mutex<Inner>,
    sink: Arc<dyn Sink>,
    started_at: Instant,
    run_status: Mutex<RunStatus>,
    shutdown_tx: broadcast::Sender<()>,
    align_requested: std::sync::atomic::AtomicBool,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    ranging_request_count: AtomicU64,
}

impl Controller {
    pub fn new(params: EpochParams, sink: Arc<dyn Sink>) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(4);
        let twr_slot_pool = params.twr_slot_pool;
        let min_offset_ms = params.min_offset_ms;
        Arc::new(Self {
            inner: Mutex::new(Inner {
                engine: EpochEngine::new(params),
                twr_pool: TwrPool::new(twr_slot_pool, min_offset_ms),
                semaphore: UwbSemaphore::default(),
            }),
            sink,
            started_at: Instant::now(),
            run_status: Mutex::new(RunStatus::Stopped),
            shutdown_tx,
            align_requested: std::sync::atomic::AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
            ranging_request_count: AtomicU64::new(0),
        })
    }

    fn now_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    fn now_s(&self) -> u64 {
        self.now_ms() / 1000
    }

    pub fn status(&self) -> RunStatus {
        *self.run_status.lock()
    }

    pub fn epoch_state(&self) -> EpochState {
        self.inner.lock().engine.state()
    }

    /// Configure the ED list's RSSI obfuscation; takes effect on the next
    /// `setup`, or immediately for one already running (the ED list itself
    /// is not recreated between epochs, only cleared).
    pub fn set_obfuscation(&self, enabled: bool, rx_gain_comp_db: i16) {
        let mut inner = self.inner.lock();
        let ed_list = inner.engine.ed_list_mut();
        ed_list.obfuscation_enabled = enabled;
        ed_list.rx_gain_comp_db = rx_gain_comp_db;
    }

    /// `twr_set_rx_offset`: the sum of this offset and the pool's configured
    /// `min_offset_ms` must stay positive for realistic EBID-derived offsets.
    pub fn twr_set_rx_offset(&self, ticks: i16) {
        let mut inner = self.inner.lock();
        debug_assert!(
            ticks as i64 + inner.twr_pool.min_offset_ms as i64 > 0,
            "rx_offset {ticks} would make the scheduled fire time negative"
        );
        inner.twr_pool.set_rx_offset(ticks as i32);
    }

    pub fn twr_set_tx_offset(&self, ticks: i16) {
        let mut inner = self.inner.lock();
        debug_assert!(
            ticks as i64 + inner.twr_pool.min_offset_ms as i64 > 0,
            "tx_offset {ticks} would make the scheduled fire time negative"
        );
        inner.twr_pool.set_tx_offset(ticks as i32);
    }

    /// Report one completed ranging exchange, as delivered by the (external)
    /// UWB stack's completion callback. Releases the semaphore and updates
    /// the ED list.
    pub fn complete_ranging(&self, result: RangingResult) {
        let t_s = self.now_s();
        let mut inner = self.inner.lock();
        inner.semaphore.release();
        inner
            .engine
            .ed_list_mut()
            .process_rng_result(result.src_short_addr, t_s, result.distance_cm, result.los_pct);
    }

    /// Pre-hook: if the pending wall-clock adjustment is large, pause the
    /// controller before it applies.
    pub async fn on_time_pre_hook(self: &Arc<Self>, offset_s: i64) {
        let duration_s = self.inner.lock().engine.params().duration_s;
        if classify_offset(offset_s, duration_s) == PreHookDecision::PauseController {
            info!(offset_s, "large clock adjustment, pausing controller");
            self.align_requested.store(true, AtomicOrdering::SeqCst);
            let _ = self.pause().await;
        }
    }

    /// Post-hook: resume with alignment if the pre-hook paused us.
    pub async fn on_time_post_hook(self: &Arc<Self>) {
        if self.align_requested.swap(false, AtomicOrdering::SeqCst) {
            let _ = self.resume(true).await;
        }
    }

    /// `init()` followed by `start(params)`: run epochs until `stop` is
    /// called or the configured iteration count is exhausted.
    pub async fn start(self: &Arc<Self>, align: bool) -> Result<(), ControllerError> {
        {
            let mut status = self.run_status.lock();
            if *status != RunStatus::Stopped {
                return Err(ControllerError::AlreadyRunning);
            }
            *status = RunStatus::Running;
        }

        if align {
            let duration_s = self.inner.lock().engine.params().duration_s;
            let delay = EpochEngine::alignment_delay_s(duration_s, self.now_s());
            debug!(delay, "sleeping to align first epoch boundary");
            tokio::time::sleep(Duration::from_secs(delay)).await;
        }

        let controller = self.clone_arc();
        let handle = tokio::spawn(async move { controller.run_epoch_loop().await });
        self.tasks.lock().push(handle);
        Ok(())
    }

    fn clone_arc(self: &Arc<Self>) -> Arc<Self> {
        self.clone()
    }

    async fn run_epoch_loop(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            let duration_s = {
                let mut inner = self.inner.lock();
                if inner.engine.setup(self.now_s(), self.now_s()).is_err() {
                    break;
                }
                inner.engine.mark_active().expect("setup just completed");
                inner.engine.params().duration_s
            };

            let radio_handles = self.spawn_radio_tasks();

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(duration_s)) => {}
                _ = shutdown_rx.recv() => {
                    for h in radio_handles {
                        h.abort();
                    }
                    break;
                }
            }

            for h in radio_handles {
                h.abort();
            }

            let outcome = {
                let mut inner = self.inner.lock();
                inner.twr_pool.cancel_all();
                match inner.engine.end_of_epoch(self.now_s()) {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        warn!(?err, "end_of_epoch failed, stopping");
                        break;
                    }
                }
            };

            if let Err(err) = self.sink.emit(&outcome.summary) {
                warn!(?err, "sink failed to emit epoch summary");
            }

            if !outcome.continue_running {
                break;
            }
        }

        *self.run_status.lock() = RunStatus::Stopped;
    }

    /// Spawn the advertiser/scanner-driven background tasks for one active
    /// epoch: advertisement ticks schedule TWR requests for known peers,
    /// scanner detections feed the ED list and schedule TWR listens once a
    /// peer EBID completes.
    fn spawn_radio_tasks(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let (local_ebid, adv_interval_ms, advs_per_slice) = {
            let inner = self.inner.lock();
            let ebid = inner.engine.local_ebid().cloned().unwrap_or_else(Ebid::new);
            (ebid, inner.engine.params().adv_interval_ms, inner.engine.params().advs_per_slice)
        };

        let mut advertiser_config = AdvertiserConfig::default();
        advertiser_config.itvl_ms = adv_interval_ms;
        advertiser_config.advs_per_slice = advs_per_slice;
        advertiser_config.advs_max = self.inner.lock().engine.advs_max();

        let mut advertiser = pepper_radio::Advertiser::new(local_ebid, advertiser_config);
        let mut adv_rx = advertiser.subscribe().expect("fresh advertiser");
        advertiser.start();

        let scanner = Arc::new(Scanner::new());
        let (_listener_id, mut detection_rx) = scanner.register();

        let adv_task = {
            let controller = self.clone();
            tokio::spawn(async move {
                let _advertiser = advertiser;
                while let Some(_tick) = adv_rx.recv().await {
                    controller.on_local_adv_complete();
                }
            })
        };

        let scan_task = {
            let controller = self.clone();
            tokio::spawn(async move {
                let _scanner = scanner;
                while let Some(detection) = detection_rx.recv().await {
                    controller.on_detection(detection);
                }
            })
        };

        let fire_task = {
            let controller = self.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_millis(50));
                loop {
                    ticker.tick().await;
                    controller.fire_due_twr();
                }
            })
        };

        vec![adv_task, scan_task, fire_task]
    }

    /// On local advertisement completion: schedule a TWR request to every
    /// ED with a complete EBID seen recently enough.
    fn on_local_adv_complete(self: &Arc<Self>) {
        let now_ms = self.now_ms();
        let now_s = self.now_s();
        let mut inner = self.inner.lock();
        let adv_interval_ms = inner.engine.params().adv_interval_ms;
        let mia_timeout_s = inner.engine.params().mia_timeout_s;

        let candidates: Vec<(u32, pepper_core::types::Bytes32)> = inner
            .engine
            .ed_list()
            .iter()
            .filter(|(_, ed)| {
                ed.is_ebid_complete() && now_s.saturating_sub(ed.last_seen_s()) < mia_timeout_s
            })
            .filter_map(|(_, ed)| ed.ebid_bytes().map(|bytes| (ed.cid(), bytes)))
            .collect();

        for (cid, peer_ebid) in candidates {
            inner
                .twr_pool
                .schedule_request(now_ms, &peer_ebid, adv_interval_ms, short_addr(cid));
        }
    }

    /// On a decoded inbound advertisement: feed the slice into the ED list;
    /// schedule a listen once the peer's EBID completes.
    fn on_detection(self: &Arc<Self>, detection: pepper_radio::Detection) {
        let now_ms = self.now_ms();
        let now_s = self.now_s();
        let mut inner = self.inner.lock();
        let adv_interval_ms = inner.engine.params().adv_interval_ms;
        let local_ebid = match inner.engine.local_ebid() {
            Some(ebid) => ebid.get_full(),
            None => None,
        };
        let Some(local_ebid) = local_ebid else {
            return;
        };

        let payload = detection.payload;
        let was_complete_before = inner
            .engine
            .ed_list()
            .iter()
            .find(|(_, ed)| ed.cid() == payload.cid)
            .map(|(_, ed)| ed.is_ebid_complete())
            .unwrap_or(false);

        let Ok(_) = inner.engine.ed_list_mut().process_slice(
            payload.cid,
            now_s,
            payload.sid,
            payload.slice,
            &local_ebid,
        ) else {
            return;
        };
        inner
            .engine
            .ed_list_mut()
            .process_scan_sample(payload.cid, now_s, detection.rssi as i16);

        let now_complete = inner
            .engine
            .ed_list()
            .iter()
            .find(|(_, ed)| ed.cid() == payload.cid)
            .map(|(_, ed)| ed.is_ebid_complete())
            .unwrap_or(false);

        if now_complete && !was_complete_before {
            inner.twr_pool.schedule_listen(now_ms, &local_ebid, adv_interval_ms);
        }
    }

    /// Fire due TWR slots. The actual `rng_request`/`rng_listen` primitives
    /// are an external collaborator (§1 non-goals); this only manages the
    /// semaphore and schedule-pool bookkeeping and counts attempted fires.
    fn fire_due_twr(self: &Arc<Self>) {
        let now_ms = self.now_ms();
        let mut inner = self.inner.lock();
        let count = &self.ranging_request_count;
        let Inner { twr_pool, semaphore, .. } = &mut *inner;
        twr_pool.fire_due(now_ms, semaphore, |action| {
            if matches!(action, TwrAction::Request { .. }) {
                count.fetch_add(1, AtomicOrdering::SeqCst);
            }
        });
    }

    /// `stop()`: cancels the end-of-epoch timer and any pending TWR slots,
    /// and returns the controller to `Idle`/`Stopped`.
    pub async fn stop(self: &Arc<Self>) {
        let _ = self.shutdown_tx.send(());
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
        let mut inner = self.inner.lock();
        inner.engine.stop();
        inner.twr_pool.cancel_all();
        *self.run_status.lock() = RunStatus::Stopped;
    }

    pub async fn pause(self: &Arc<Self>) -> Result<(), ControllerError> {
        {
            let mut status = self.run_status.lock();
            if *status != RunStatus::Running {
                return Err(ControllerError::NotRunning);
            }
            *status = RunStatus::Paused;
        }
        self.inner.lock().engine.pause()?;
        Ok(())
    }

    pub async fn resume(self: &Arc<Self>, align: bool) -> Result<(), ControllerError> {
        {
            let mut status = self.run_status.lock();
            if *status != RunStatus::Paused {
                return Err(ControllerError::NotRunning);
            }
        }
        if align {
            let duration_s = self.inner.lock().engine.params().duration_s;
            let delay = EpochEngine::alignment_delay_s(duration_s, self.now_s());
            tokio::time::sleep(Duration::from_secs(delay)).await;
        }
        self.inner.lock().engine.resume()?;
        *self.run_status.lock() = RunStatus::Running;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::StdoutSink;
    use crate::sink::Format;

    fn test_controller() -> Arc<Controller> {
        let params = EpochParams {
            duration_s: 1,
            ..Default::default()
        };
        Controller::new(params, Arc::new(StdoutSink::new(Format::Json)))
    }

    #[tokio::test]
    async fn start_then_stop_returns_to_stopped() {
        let controller = test_controller();
        controller.start(false).await.unwrap();
        assert_eq!(controller.status(), RunStatus::Running);
        controller.stop().await;
        assert_eq!(controller.status(), RunStatus::Stopped);
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let controller = test_controller();
        controller.start(false).await.unwrap();
        assert!(matches!(
            controller.start(false).await,
            Err(ControllerError::AlreadyRunning)
        ));
        controller.stop().await;
    }

    #[tokio::test]
    async fn pause_requires_running_state() {
        let controller = test_controller();
        assert!(matches!(controller.pause().await, Err(ControllerError::NotRunning)));
    }
}

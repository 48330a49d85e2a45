//! BLE advertisement scanner/decoder (C4).
//!
//! Decodes inbound NONCONN_IND service-data payloads and fans detections out
//! to every registered listener, in the spirit of `Transport::broadcast`
//! (`terrain-gossip-net::transport`) but built on a ref-counted
//! start/stop so the underlying host scanner (out of scope here) is armed
//! only while at least one listener is registered.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::framing::AdPayload;

/// One decoded detection event, handed to every registered listener.
#[derive(Debug, Clone, Copy)]
pub struct Detection {
    pub timestamp_ms: u64,
    pub peer_addr: [u8; 6],
    pub rssi: i8,
    pub payload: AdPayload,
}

/// A raw inbound advertisement, as delivered by the (out of scope) host
/// scanner, before service-data filtering and decode.
#[derive(Debug, Clone)]
pub struct RawAdvertisement {
    pub timestamp_ms: u64,
    pub peer_addr: [u8; 6],
    pub rssi: i8,
    pub service_data: Vec<u8>,
}

struct ListenerSlot {
    id: u64,
    tx: mpsc::Sender<Detection>,
}

/// Multiplexable scanner: any number of listeners may subscribe, and
/// starting/stopping the underlying host scanner is idempotent, ref-counted
/// by the current listener-set size.
#[derive(Default)]
pub struct Scanner {
    listeners: Mutex<Vec<ListenerSlot>>,
    next_id: AtomicU64,
    enabled: Arc<std::sync::atomic::AtomicBool>,
}

impl Scanner {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            enabled: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    /// Register a new listener, starting the underlying scanner if this is
    /// the first one. Returns a receiver plus the id needed to
    /// [`Scanner::unregister`] later.
    pub fn register(&self) -> (u64, mpsc::Receiver<Detection>) {
        let (tx, rx) = mpsc::channel(64);
        let id = self.next_id.fetch_add(1, AtomicOrdering::SeqCst);
        let mut listeners = self.listeners.lock();
        let was_empty = listeners.is_empty();
        listeners.push(ListenerSlot { id, tx });
        if was_empty {
            self.enabled.store(true, AtomicOrdering::SeqCst);
            debug!("scanner: first listener registered, starting host scanner");
        }
        (id, rx)
    }

    /// Unregister a listener, stopping the underlying scanner if this was
    /// the last one. A no-op if `id` is not currently registered.
    pub fn unregister(&self, id: u64) {
        let mut listeners = self.listeners.lock();
        listeners.retain(|l| l.id != id);
        if listeners.is_empty() {
            self.enabled.store(false, AtomicOrdering::SeqCst);
            debug!("scanner: last listener unregistered, stopping host scanner");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(AtomicOrdering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Feed one raw advertisement in from the host stack. Packets that fail
    /// the length/UUID/version checks are dropped silently (logged at
    /// DEBUG); everything else is decoded once and broadcast to every
    /// listener.
    pub async fn on_advertisement(&self, raw: RawAdvertisement) {
        if !self.is_enabled() {
            return;
        }

        let payload = match AdPayload::decode(&raw.service_data) {
            Ok(payload) => payload,
            Err(err) => {
                debug!(?err, "scanner: dropping malformed advertisement");
                return;
            }
        };

        let detection = Detection {
            timestamp_ms: raw.timestamp_ms,
            peer_addr: raw.peer_addr,
            rssi: raw.rssi,
            payload,
        };

        let senders: Vec<_> = self.listeners.lock().iter().map(|l| l.tx.clone()).collect();
        for tx in senders {
            let _ = tx.send(detection).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pepper_core::ebid::SLICE_LEN;

    fn valid_service_data(sid: u8, cid: u32) -> Vec<u8> {
        AdPayload {
            sid,
            cid,
            slice: [0x11; SLICE_LEN],
            tx_power: 0,
            seed: 7,
        }
        .encode()
        .to_vec()
    }

    #[tokio::test]
    async fn start_stop_is_ref_counted_by_listener_set() {
        let scanner = Scanner::new();
        assert!(!scanner.is_enabled());

        let (id_a, _rx_a) = scanner.register();
        assert!(scanner.is_enabled());
        let (id_b, _rx_b) = scanner.register();
        assert_eq!(scanner.listener_count(), 2);

        scanner.unregister(id_a);
        assert!(scanner.is_enabled());
        scanner.unregister(id_b);
        assert!(!scanner.is_enabled());
    }

    #[tokio::test]
    async fn every_listener_receives_every_matching_event() {
        let scanner = Scanner::new();
        let (_id_a, mut rx_a) = scanner.register();
        let (_id_b, mut rx_b) = scanner.register();

        scanner
            .on_advertisement(RawAdvertisement {
                timestamp_ms: 1000,
                peer_addr: [1, 2, 3, 4, 5, 6],
                rssi: -40,
                service_data: valid_service_data(0, 42),
            })
            .await;

        let a = rx_a.recv().await.unwrap();
        let b = rx_b.recv().await.unwrap();
        assert_eq!(a.payload.cid, 42);
        assert_eq!(b.payload.cid, 42);
    }

    #[tokio::test]
    async fn malformed_advertisement_is_dropped_silently() {
        let scanner = Scanner::new();
        let (_id, mut rx) = scanner.register();

        scanner
            .on_advertisement(RawAdvertisement {
                timestamp_ms: 0,
                peer_addr: [0; 6],
                rssi: 0,
                service_data: vec![0u8; 5],
            })
            .await;

        // Nothing was sent; the channel should remain empty.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn disabled_scanner_ignores_advertisements() {
        let scanner = Scanner::new();
        let (id, mut rx) = scanner.register();
        scanner.unregister(id);

        scanner
            .on_advertisement(RawAdvertisement {
                timestamp_ms: 0,
                peer_addr: [0; 6],
                rssi: 0,
                service_data: valid_service_data(0, 1),
            })
            .await;

        assert!(rx.try_recv().is_err());
    }
}

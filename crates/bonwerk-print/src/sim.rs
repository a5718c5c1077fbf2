// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-process printer for tests, benchmarks and the headless demo.
//
// Records every acknowledged byte and lets the caller inject the failures a
// flaky BLE link produces: failed writes, acknowledgements lost after the
// bytes were delivered, rejected writes, stalled writes, failed connects and
// host-side disconnects (immediate or after a number of chunks).

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bonwerk_core::config::DEFAULT_HEARTBEAT_PROBE;
use tokio::sync::broadcast;
use tracing::debug;

use crate::transport::{LinkEvent, Transport, TransportError};

/// How long a stalled write hangs; callers are expected to time out first.
const STALL: Duration = Duration::from_secs(3600);

#[derive(Debug, Default)]
struct SimState {
    connected: bool,
    received: Vec<u8>,
    chunk_sizes: Vec<usize>,
    probes: u64,
    connects: u64,
    write_latency: Duration,
    fail_writes: u32,
    drop_acks: u32,
    reject_writes: u32,
    stall_writes: u32,
    fail_connects: u32,
    drop_link_after: Option<u32>,
    flap_every: Option<u32>,
}

/// A printer that lives in memory.
///
/// Writes equal to the heartbeat probe are counted as probes and not added
/// to [`SimulatedPrinter::received`].
pub struct SimulatedPrinter {
    name: String,
    probe: Vec<u8>,
    state: Mutex<SimState>,
    events: broadcast::Sender<LinkEvent>,
}

impl Default for SimulatedPrinter {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPrinter {
    /// A disconnected printer using the default status probe.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            name: "simulated printer".into(),
            probe: DEFAULT_HEARTBEAT_PROBE.to_vec(),
            state: Mutex::new(SimState::default()),
            events,
        }
    }

    pub fn with_probe(mut self, probe: impl Into<Vec<u8>>) -> Self {
        self.probe = probe.into();
        self
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -- inspection --

    /// Every chunk byte acknowledged so far, in order.
    pub fn received(&self) -> Vec<u8> {
        self.state().received.clone()
    }

    /// Size of every delivered chunk, in order.
    pub fn chunk_sizes(&self) -> Vec<usize> {
        self.state().chunk_sizes.clone()
    }

    pub fn probe_count(&self) -> u64 {
        self.state().probes
    }

    pub fn connect_count(&self) -> u64 {
        self.state().connects
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    // -- failure injection --

    /// The next `n` writes fail without delivering anything.
    pub fn fail_next_writes(&self, n: u32) {
        self.state().fail_writes = n;
    }

    /// The next `n` writes are delivered but report a timeout.
    pub fn drop_next_acks(&self, n: u32) {
        self.state().drop_acks = n;
    }

    /// The next `n` writes are refused by the device.
    pub fn reject_next_writes(&self, n: u32) {
        self.state().reject_writes = n;
    }

    /// The next `n` writes hang until the caller gives up.
    pub fn stall_next_writes(&self, n: u32) {
        self.state().stall_writes = n;
    }

    /// The next `n` connect attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.state().fail_connects = n;
    }

    /// Acknowledge `n` more chunks, then drop the link from the host side.
    pub fn disconnect_after_writes(&self, n: u32) {
        let mut s = self.state();
        s.flap_every = None;
        s.drop_link_after = Some(n);
    }

    /// Drop the link after every `n` acknowledged chunks, for good.
    pub fn disconnect_every_writes(&self, n: u32) {
        let mut s = self.state();
        s.flap_every = Some(n);
        s.drop_link_after = Some(n);
    }

    /// Time every write takes before it is acknowledged.
    pub fn set_write_latency(&self, latency: Duration) {
        self.state().write_latency = latency;
    }

    /// Drop the link from the host side.
    pub fn disconnect(&self) {
        self.state().connected = false;
        let _ = self.events.send(LinkEvent::Disconnected);
    }

    /// Host re-established the link on its own.
    pub fn host_reconnect(&self) {
        {
            let mut s = self.state();
            s.connected = true;
            s.connects += 1;
        }
        let _ = self.events.send(LinkEvent::Connected);
    }
}

fn take(counter: &mut u32) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

#[async_trait]
impl Transport for SimulatedPrinter {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut s = self.state();
        if take(&mut s.fail_connects) {
            debug!("simulated connect failure");
            return Err(TransportError::Failed("simulated connect failure".into()));
        }
        s.connected = true;
        s.connects += 1;
        Ok(())
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let (latency, stall) = {
            let mut s = self.state();
            if !s.connected {
                return Err(TransportError::NotConnected);
            }
            (s.write_latency, take(&mut s.stall_writes))
        };
        if stall {
            tokio::time::sleep(STALL).await;
            return Err(TransportError::Timeout);
        }
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut s = self.state();
        if !s.connected {
            return Err(TransportError::NotConnected);
        }
        if take(&mut s.reject_writes) {
            return Err(TransportError::Rejected("simulated rejection".into()));
        }
        if take(&mut s.fail_writes) {
            return Err(TransportError::Failed("simulated write failure".into()));
        }

        if bytes == self.probe.as_slice() {
            s.probes += 1;
            return Ok(());
        }
        s.received.extend_from_slice(bytes);
        s.chunk_sizes.push(bytes.len());

        if let Some(left) = s.drop_link_after.as_mut() {
            *left = left.saturating_sub(1);
            if *left == 0 {
                s.drop_link_after = s.flap_every;
                s.connected = false;
                debug!(delivered = s.received.len(), "simulated link drop");
                let _ = self.events.send(LinkEvent::Disconnected);
            }
        }

        if take(&mut s.drop_acks) {
            return Err(TransportError::Timeout);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_require_connection() {
        let sim = SimulatedPrinter::new();
        assert_eq!(sim.write(b"x").await, Err(TransportError::NotConnected));
        sim.connect().await.expect("connect");
        sim.write(b"ab").await.expect("write");
        sim.write(b"c").await.expect("write");
        assert_eq!(sim.received(), b"abc".to_vec());
        assert_eq!(sim.chunk_sizes(), vec![2, 1]);
    }

    #[tokio::test]
    async fn lost_ack_still_delivers() {
        let sim = SimulatedPrinter::new();
        sim.connect().await.expect("connect");
        sim.drop_next_acks(1);
        assert_eq!(sim.write(b"hi").await, Err(TransportError::Timeout));
        assert_eq!(sim.received(), b"hi".to_vec());
    }

    #[tokio::test]
    async fn failures_are_consumed_in_order() {
        let sim = SimulatedPrinter::new();
        sim.fail_next_connects(1);
        assert!(sim.connect().await.is_err());
        sim.connect().await.expect("second connect");

        sim.reject_next_writes(1);
        sim.fail_next_writes(1);
        assert!(matches!(sim.write(b"a").await, Err(TransportError::Rejected(_))));
        assert!(matches!(sim.write(b"a").await, Err(TransportError::Failed(_))));
        sim.write(b"a").await.expect("third write");
        assert_eq!(sim.received(), b"a".to_vec());
    }

    #[tokio::test]
    async fn probes_are_counted_separately() {
        let sim = SimulatedPrinter::new();
        sim.connect().await.expect("connect");
        sim.write(&DEFAULT_HEARTBEAT_PROBE).await.expect("probe");
        assert_eq!(sim.probe_count(), 1);
        assert!(sim.received().is_empty());
    }

    #[tokio::test]
    async fn link_drops_after_counted_writes() {
        let sim = SimulatedPrinter::new();
        let mut events = sim.subscribe();
        sim.connect().await.expect("connect");
        sim.disconnect_after_writes(2);
        sim.write(b"a").await.expect("first");
        sim.write(b"b").await.expect("second is still acknowledged");
        assert_eq!(sim.write(b"c").await, Err(TransportError::NotConnected));
        assert_eq!(sim.received(), b"ab".to_vec());
        assert_eq!(events.recv().await.expect("event"), LinkEvent::Disconnected);
    }

    #[tokio::test]
    async fn flapping_link_drops_repeatedly() {
        let sim = SimulatedPrinter::new();
        sim.disconnect_every_writes(1);
        for chunk in [b"a", b"b", b"c"] {
            sim.connect().await.expect("connect");
            sim.write(chunk).await.expect("acknowledged");
            assert!(!sim.is_connected());
        }
        assert_eq!(sim.received(), b"abc".to_vec());
        assert_eq!(sim.connect_count(), 3);
    }

    #[tokio::test]
    async fn host_disconnect_is_broadcast() {
        let sim = SimulatedPrinter::new();
        let mut events = sim.subscribe();
        sim.connect().await.expect("connect");
        sim.disconnect();
        assert_eq!(events.recv().await.expect("event"), LinkEvent::Disconnected);
        assert!(!sim.is_connected());
        sim.host_reconnect();
        assert_eq!(events.recv().await.expect("event"), LinkEvent::Connected);
    }
}

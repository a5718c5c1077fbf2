// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Connection manager: link state machine, paced chunk writes, reconnect
// backoff and heartbeat for one printer.
//
// ```text
//   Disconnected ──connect──▶ Connecting ──ok──▶ Connected
//        ▲                        │                 │ chunk retries exhausted,
//        │                      fail                │ heartbeat miss, host drop
//        └────────────────────────┘                 ▼
//        ▲                                       Degraded
//        │ budget exhausted                         │ recover()
//        └──────────────── Reconnecting ◀───────────┘
//                               │ ok
//                               ▼
//                           Connected
// ```
//
// The manager owns the transport parameters (chunk size, inter-chunk delay,
// retry budgets).  Chunk writes and heartbeat probes share one write lane,
// so a probe can land between two chunks but never inside one.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bonwerk_core::config::LinkConfig;
use bonwerk_core::error::{BonwerkError, Result};
use bonwerk_core::types::ConnectionState;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, error, info, instrument, warn};

use crate::backoff::BackoffPolicy;
use crate::pacing::{Pacing, PacingSnapshot};
use crate::transport::{LinkEvent, Transport, TransportError};

/// What one heartbeat tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Link not connected, recently active, or busy with a chunk.
    Skipped,
    /// Probe acknowledged.
    Alive,
    /// Probe failed or timed out; link marked degraded.
    Missed,
}

/// Single owner of one printer link.
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    config: LinkConfig,
    reconnect: BackoffPolicy,
    pacing: Mutex<Pacing>,
    state: watch::Sender<ConnectionState>,
    /// Serializes chunk writes and heartbeat probes.
    lane: tokio::sync::Mutex<()>,
    last_activity: Mutex<Instant>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, config: LinkConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            reconnect: BackoffPolicy::new(config.reconnect.clone()),
            pacing: Mutex::new(Pacing::new(config.pacing.clone())),
            transport,
            config,
            state,
            lane: tokio::sync::Mutex::new(()),
            last_activity: Mutex::new(Instant::now()),
        }
    }

    // -----------------------------------------------------------------------
    // Observation
    // -----------------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state changes.  The receiver starts at the current state.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Current adaptive chunk size in bytes.
    pub fn chunk_size(&self) -> usize {
        self.lock_pacing().chunk_size()
    }

    pub fn pacing(&self) -> PacingSnapshot {
        self.lock_pacing().snapshot()
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    fn lock_pacing(&self) -> MutexGuard<'_, Pacing> {
        self.pacing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn touch(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            info!(device = self.transport.name(), from = ?*current, to = ?next, "link state changed");
            *current = next;
            true
        });
    }

    /// Move to `next` only from one of `from`.  Returns whether it moved.
    fn transition(&self, from: &[ConnectionState], next: ConnectionState) -> bool {
        self.state.send_if_modified(|current| {
            if !from.contains(current) || *current == next {
                return false;
            }
            info!(device = self.transport.name(), from = ?*current, to = ?next, "link state changed");
            *current = next;
            true
        })
    }

    // -----------------------------------------------------------------------
    // Connect / recover
    // -----------------------------------------------------------------------

    /// Bring the link up once, bounded by `connect_timeout`.
    #[instrument(skip(self), fields(device = self.transport.name()))]
    pub async fn connect(&self) -> Result<()> {
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }
        self.set_state(ConnectionState::Connecting);
        match self.try_connect().await {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                self.touch();
                Ok(())
            }
            Err(reason) => {
                self.set_state(ConnectionState::Disconnected);
                warn!(%reason, "connect failed");
                Err(BonwerkError::ConnectionFailed(reason))
            }
        }
    }

    async fn try_connect(&self) -> std::result::Result<(), String> {
        let limit = self.config.connect_timeout();
        match timeout(limit, self.transport.connect()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("no connection within {} ms", limit.as_millis())),
        }
    }

    /// Reconnect a degraded link with exponential backoff.
    ///
    /// Returns as soon as the link is connected, whether by this loop or by
    /// the host.  When the reconnect budget runs out the link goes to
    /// `Disconnected` and `ConnectionLost` is returned.
    #[instrument(skip(self), fields(device = self.transport.name()))]
    pub async fn recover(&self) -> Result<()> {
        let attempts = self.reconnect.max_attempts().max(1);
        for attempt in 0..attempts {
            if self.state() == ConnectionState::Connected {
                return Ok(());
            }
            let delay = self.reconnect.delay_for(attempt);
            debug!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "waiting before reconnect"
            );
            sleep(delay).await;
            if self.state() == ConnectionState::Connected {
                return Ok(());
            }

            self.set_state(ConnectionState::Reconnecting);
            match self.try_connect().await {
                Ok(()) => {
                    self.set_state(ConnectionState::Connected);
                    self.touch();
                    info!(attempt = attempt + 1, "link recovered");
                    return Ok(());
                }
                Err(reason) => warn!(attempt = attempt + 1, %reason, "reconnect attempt failed"),
            }
        }

        self.set_state(ConnectionState::Disconnected);
        error!(attempts, "reconnect budget exhausted");
        Err(BonwerkError::ConnectionLost { attempts })
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Write one chunk and wait for its acknowledgement.
    ///
    /// Waits the current chunk delay first, then makes up to
    /// `chunk_attempts` tries, each bounded by `write_timeout`.  Exhausting
    /// the tries halves the chunk size, doubles the delay, marks the link
    /// `Degraded` and returns `ConnectionDegraded`.  A device rejection is
    /// returned at once as `PayloadRejected`.
    ///
    /// Delivery is at-least-once: if the device received a chunk but its
    /// acknowledgement was lost, the retry sends it again.
    pub async fn write(&self, chunk: &[u8]) -> Result<()> {
        let _lane = self.lane.lock().await;
        self.require_connected()?;

        let delay = self.lock_pacing().chunk_delay();
        if !delay.is_zero() {
            sleep(delay).await;
        }

        let attempts = self.config.chunk_attempts.max(1);
        let limit = self.config.write_timeout();
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if attempt > 1 {
                // Short, growing gap between tries of the same chunk.
                sleep(delay.max(Duration::from_millis(1)) * (1 << (attempt - 2).min(8))).await;
                self.require_connected()?;
            }

            match timeout(limit, self.transport.write(chunk)).await {
                Ok(Ok(())) => {
                    self.lock_pacing().record_success();
                    self.touch();
                    return Ok(());
                }
                Ok(Err(TransportError::Rejected(reason))) => {
                    warn!(len = chunk.len(), %reason, "printer rejected chunk");
                    return Err(BonwerkError::PayloadRejected(reason));
                }
                Ok(Err(TransportError::NotConnected)) => {
                    self.transition(&[ConnectionState::Connected], ConnectionState::Degraded);
                    return Err(BonwerkError::ConnectionDegraded(
                        "transport reports no connection".into(),
                    ));
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => last_error = format!("no ack within {} ms", limit.as_millis()),
            }
            debug!(
                attempt,
                len = chunk.len(),
                error = %last_error,
                "chunk write failed"
            );
        }

        self.lock_pacing().record_failure();
        self.transition(&[ConnectionState::Connected], ConnectionState::Degraded);
        Err(BonwerkError::ConnectionDegraded(format!(
            "{attempts} consecutive chunk write failures, last: {last_error}"
        )))
    }

    fn require_connected(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Connected => Ok(()),
            other => Err(BonwerkError::ConnectionDegraded(format!("link is {other:?}"))),
        }
    }

    // -----------------------------------------------------------------------
    // Heartbeat
    // -----------------------------------------------------------------------

    /// Send one probe if the link is connected and has been idle for the
    /// heartbeat interval.
    pub async fn heartbeat_once(&self) -> HeartbeatOutcome {
        let hb = &self.config.heartbeat;
        if self.state() != ConnectionState::Connected || self.idle_for() < hb.interval() {
            return HeartbeatOutcome::Skipped;
        }
        // A chunk in progress is proof of life already.
        let Ok(_lane) = self.lane.try_lock() else {
            return HeartbeatOutcome::Skipped;
        };

        let result = timeout(hb.timeout(), self.transport.write(&hb.probe)).await;
        match result {
            Ok(Ok(())) => {
                self.touch();
                debug!("heartbeat acknowledged");
                HeartbeatOutcome::Alive
            }
            Ok(Err(e)) => {
                warn!(error = %e, "heartbeat failed");
                self.transition(&[ConnectionState::Connected], ConnectionState::Degraded);
                HeartbeatOutcome::Missed
            }
            Err(_) => {
                warn!(timeout_ms = hb.timeout_ms, "heartbeat timed out");
                self.transition(&[ConnectionState::Connected], ConnectionState::Degraded);
                HeartbeatOutcome::Missed
            }
        }
    }

    /// Run [`ConnectionManager::heartbeat_once`] every interval until the
    /// manager is dropped.  `None` when heartbeats are disabled.
    pub fn spawn_heartbeat(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let hb = &self.config.heartbeat;
        if !hb.enabled {
            return None;
        }
        let period = hb.interval().max(Duration::from_millis(1));
        let weak = Arc::downgrade(self);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                manager.heartbeat_once().await;
            }
            debug!("heartbeat task stopped");
        }))
    }

    // -----------------------------------------------------------------------
    // Host link events
    // -----------------------------------------------------------------------

    /// Apply a host-reported link change.
    pub fn on_link_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::Disconnected => {
                if self.transition(&[ConnectionState::Connected], ConnectionState::Degraded) {
                    warn!("host reported disconnect");
                }
            }
            LinkEvent::Connected => {
                if self.transition(
                    &[ConnectionState::Disconnected, ConnectionState::Degraded],
                    ConnectionState::Connected,
                ) {
                    self.touch();
                    info!("host reported reconnect");
                }
            }
        }
    }

    /// Forward host link events to [`ConnectionManager::on_link_event`]
    /// until the manager or the transport goes away.
    pub fn spawn_event_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events = self.transport.subscribe();
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "link events lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                manager.on_link_event(event);
            }
            debug!("link event listener stopped");
        })
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Priority print queue for one printer.
//
// Jobs are persisted in the offline store on enqueue and dispatched by a
// single background task: a job left in flight by an interrupted transfer
// first, then Pending jobs by priority (Urgent > High > Normal > Low) and
// FIFO within a priority.  At most one job is in flight at a time.
//
// Failure handling stacks three independent budgets: the connection
// manager's chunk retries, its reconnect backoff, and the job-level backoff
// kept here.  A link drop mid-job spends none of the job budget: the job
// stays InFlight at its persisted cursor and resumes once the link is back.
// Only job-level failures (a dispatch running past the job timeout, a store
// error mid-transfer) count.  A job that runs out of job-level attempts is
// marked Failed and kept in the store until it is retried, deleted or
// expires.
//
// When the reconnect budget runs out the queue reports `ConnectionLost` once
// and stops touching the link until the caller calls `reconnect`/`resume`
// or the host reports the printer back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use bonwerk_codec::{encode_ops, validate_barcode};
use bonwerk_core::config::{BonwerkConfig, TextEncoding};
use bonwerk_core::error::{BonwerkError, Result};
use bonwerk_core::ops::Op;
use bonwerk_core::types::{
    ConnectionState, JobId, JobState, Payload, PrintJob, Priority, ReasonCode,
};

use crate::backoff::{BackoffPolicy, RetryDecision};
use crate::connection::ConnectionManager;
use crate::integrity::{check_resume, fingerprint};
use crate::store::{self, OfflineJobStore};
use crate::transfer::{HaltReason, ResumableTransfer, TransferControl, TransferOutcome};

/// How long an idle or blocked dispatcher sleeps before looking again
/// (expiry purge, reconnect after a lost link) without being woken.
const IDLE_RECHECK: Duration = Duration::from_secs(5);

const EVENT_CAPACITY: usize = 256;

/// Notifications from the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    /// Every job state change, with the reason.
    JobStateChanged {
        job_id: JobId,
        state: JobState,
        reason: ReasonCode,
    },
    /// Nothing left to dispatch after at least one dispatch.
    QueueDrained,
    ConnectionStateChanged(ConnectionState),
    /// Reconnect budget exhausted.  Stored jobs wait for the link to return.
    ConnectionLost { attempts: u32 },
    /// Job purged because its time-to-live passed.
    JobExpired(JobId),
}

/// The job currently owned by the dispatcher.
struct ActiveJob {
    id: JobId,
    control: Arc<TransferControl>,
}

struct Claim {
    job: PrintJob,
    control: Arc<TransferControl>,
    /// Job-level attempt this run belongs to, starting at 1.  Resuming after
    /// a link drop continues the same attempt.
    attempt: u32,
    /// This run follows a job-level failure and waits the job backoff first.
    retrying: bool,
}

enum Peek {
    Nothing,
    Paused,
    Job(PrintJob),
}

enum Step {
    /// A job was dispatched and settled.
    Ran,
    /// Nothing to dispatch.
    Idle,
    /// Work exists but cannot run now (paused, link down).
    Blocked,
}

struct Shared {
    connection: Arc<ConnectionManager>,
    store: Mutex<OfflineJobStore>,
    events: broadcast::Sender<QueueEvent>,
    wake: Notify,
    shutdown: watch::Sender<bool>,
    paused: AtomicBool,
    /// Exclusive "a job is on the wire" flag.
    working: AtomicBool,
    /// Dispatch registration and cancel both happen under this lock.
    active: Mutex<Option<ActiveJob>>,
    /// Set on `ConnectionLost`; no reconnects until it is cleared.
    link_lost: AtomicBool,
    /// In-flight job whose last run failed at job level.
    retry_due: Mutex<Option<JobId>>,
    job_retry: BackoffPolicy,
    job_timeout: Duration,
    ttl: chrono::Duration,
    encoding: TextEncoding,
}

/// Persistent priority queue feeding one connection manager.
pub struct PrintQueue {
    shared: Arc<Shared>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl PrintQueue {
    /// Build a queue over `store`.  Nothing is dispatched until
    /// [`PrintQueue::start`].
    pub fn new(
        connection: Arc<ConnectionManager>,
        store: OfflineJobStore,
        config: &BonwerkConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                connection,
                store: Mutex::new(store),
                events,
                wake: Notify::new(),
                shutdown,
                paused: AtomicBool::new(false),
                working: AtomicBool::new(false),
                active: Mutex::new(None),
                link_lost: AtomicBool::new(false),
                retry_due: Mutex::new(None),
                job_retry: BackoffPolicy::new(config.queue.job_retry.clone()),
                job_timeout: config.queue.job_timeout(),
                ttl: config.store.job_ttl(),
                encoding: config.text_encoding,
            }),
            dispatcher: Mutex::new(None),
            forwarder: Mutex::new(None),
        }
    }

    /// Spawn the dispatcher and the connection-state forwarder.  Calling it
    /// again while running does nothing.
    pub fn start(&self) {
        let mut dispatcher = lock(&self.dispatcher);
        if dispatcher.is_some() || self.shared.is_shutdown() {
            return;
        }
        *dispatcher = Some(tokio::spawn(run_dispatcher(self.shared.clone())));
        *lock(&self.forwarder) = Some(spawn_state_forwarder(&self.shared));
        info!("print queue started");
    }

    /// Stop dispatching.  An in-flight transfer halts at the next chunk
    /// boundary and stays in the store for the next session.
    pub async fn shutdown(&self) {
        self.shared.shutdown.send_replace(true);
        if let Some(active) = self.shared.lock_active().as_ref() {
            active.control.stop();
        }
        self.shared.wake.notify_one();

        if let Some(forwarder) = lock(&self.forwarder).take() {
            forwarder.abort();
        }
        let dispatcher = lock(&self.dispatcher).take();
        if let Some(dispatcher) = dispatcher {
            if let Err(e) = dispatcher.await {
                warn!(error = %e, "dispatcher ended abnormally");
            }
        }
        info!("print queue shut down");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.shared.events.subscribe()
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.shared.connection
    }

    // -----------------------------------------------------------------------
    // Submission API
    // -----------------------------------------------------------------------

    /// Validate, encode, fingerprint and persist a job.
    ///
    /// Barcode operations are validated (and normalized) here, so bad
    /// content fails synchronously with `InvalidContent` and nothing is
    /// stored.
    #[instrument(skip(self, payload))]
    pub fn enqueue(&self, payload: Payload, priority: Priority) -> Result<JobId> {
        if self.shared.is_shutdown() {
            return Err(BonwerkError::Shutdown);
        }
        let payload = normalize_payload(payload)?;
        let bytes = encode_payload(&payload, self.shared.encoding);
        let job = PrintJob::new(
            payload,
            priority,
            bytes.len() as u64,
            fingerprint(&bytes),
            self.shared.ttl,
        );

        store::lock(&self.shared.store)?.insert_job(&job)?;
        info!(job_id = %job.id, ?priority, bytes = bytes.len(), "job enqueued");
        self.shared
            .job_event(job.id, JobState::Pending, ReasonCode::Enqueued);
        self.shared.wake.notify_one();
        Ok(job.id)
    }

    /// Cancel a Pending or InFlight job.
    ///
    /// A Pending job is removed at once.  An InFlight job that is on the wire
    /// finishes its current chunk and then stops; its Cancelled event follows
    /// from the dispatcher.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub fn cancel(&self, job_id: JobId) -> Result<()> {
        let active = self.shared.lock_active();
        if let Some(current) = active.as_ref() {
            if current.id == job_id {
                current.control.cancel();
                info!("cancel requested for in-flight job");
                return Ok(());
            }
        }

        let store = store::lock(&self.shared.store)?;
        let job = store
            .get_job(&job_id)?
            .ok_or(BonwerkError::JobNotFound(job_id))?;
        if !job.state.is_cancellable() {
            return Err(BonwerkError::IllegalTransition {
                job_id,
                from: job.state,
                to: JobState::Cancelled,
            });
        }
        store.evict(&job_id, JobState::Cancelled)?;
        drop(store);
        drop(active);

        info!("job cancelled");
        self.shared
            .job_event(job_id, JobState::Cancelled, ReasonCode::CancelledByCaller);
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Stop dispatching new jobs.  A job already in flight carries on.
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
        info!("print queue paused");
    }

    /// Restart dispatch.  Also lifts a `ConnectionLost` hold.
    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
        self.shared.link_lost.store(false, Ordering::SeqCst);
        info!("print queue resumed");
        self.shared.wake.notify_one();
    }

    /// Try the printer again with a fresh reconnect budget after
    /// `ConnectionLost`.
    pub fn reconnect(&self) {
        if self.shared.link_lost.swap(false, Ordering::SeqCst) {
            info!("reconnect requested");
        }
        self.shared.wake.notify_one();
    }

    /// Whether dispatch is held after the reconnect budget ran out.
    pub fn is_link_lost(&self) -> bool {
        self.shared.link_lost.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Whether a job is on the wire right now.
    pub fn is_working(&self) -> bool {
        self.shared.working.load(Ordering::SeqCst)
    }

    /// Remove every Pending job.  In-flight and Failed jobs are untouched.
    pub fn clear(&self) -> Result<usize> {
        let cleared = {
            let _active = self.shared.lock_active();
            store::lock(&self.shared.store)?.clear_pending()?
        };
        for job_id in &cleared {
            self.shared
                .job_event(*job_id, JobState::Cancelled, ReasonCode::Cleared);
        }
        Ok(cleared.len())
    }

    /// Put a Failed job back in line with a fresh attempt budget.  Already
    /// acknowledged bytes are not sent again.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub fn retry(&self, job_id: JobId) -> Result<()> {
        store::lock(&self.shared.store)?.reset_for_retry(&job_id)?;
        self.shared
            .job_event(job_id, JobState::Pending, ReasonCode::ManualRetry);
        self.shared.wake.notify_one();
        Ok(())
    }

    pub fn job(&self, job_id: JobId) -> Result<Option<PrintJob>> {
        store::lock(&self.shared.store)?.get_job(&job_id)
    }

    /// Every stored job in dispatch order, Failed jobs included.
    pub fn jobs(&self) -> Result<Vec<PrintJob>> {
        store::lock(&self.shared.store)?.all_jobs()
    }
}

impl Drop for PrintQueue {
    fn drop(&mut self) {
        self.shared.shutdown.send_replace(true);
        for task in [&self.dispatcher, &self.forwarder] {
            if let Some(handle) = lock(task).take() {
                handle.abort();
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Validate barcode operations, replacing them with their normalized form.
fn normalize_payload(payload: Payload) -> Result<Payload> {
    match payload {
        Payload::Ops(ops) => ops
            .into_iter()
            .map(|op| match op {
                Op::Barcode(spec) => validate_barcode(&spec).map(Op::Barcode),
                other => Ok(other),
            })
            .collect::<Result<Vec<_>>>()
            .map(Payload::Ops),
        raw @ Payload::Raw(_) => Ok(raw),
    }
}

/// The exact bytes a job sends.  Deterministic, so it can be recomputed at
/// every dispatch and checked against the fingerprint taken at enqueue.
fn encode_payload(payload: &Payload, encoding: TextEncoding) -> Vec<u8> {
    match payload {
        Payload::Ops(ops) => encode_ops(ops, &encoding),
        Payload::Raw(bytes) => bytes.clone(),
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

async fn run_dispatcher(shared: Arc<Shared>) {
    info!("dispatcher started");
    let mut dispatched = false;
    while !shared.is_shutdown() {
        let step = match shared.dispatch_next().await {
            Ok(step) => step,
            Err(e) => {
                error!(error = %e, "dispatch failed");
                Step::Blocked
            }
        };
        match step {
            Step::Ran => {
                dispatched = true;
                continue;
            }
            Step::Idle => {
                if std::mem::take(&mut dispatched) {
                    info!("queue drained");
                    shared.emit(QueueEvent::QueueDrained);
                }
            }
            Step::Blocked => {}
        }
        shared.wait_for_work().await;
    }
    info!("dispatcher stopped");
}

fn spawn_state_forwarder(shared: &Arc<Shared>) -> JoinHandle<()> {
    let mut states = shared.connection.subscribe_state();
    let weak = Arc::downgrade(shared);
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            let Some(shared) = weak.upgrade() else {
                break;
            };
            shared.emit(QueueEvent::ConnectionStateChanged(state));
            if state == ConnectionState::Connected {
                shared.link_lost.store(false, Ordering::SeqCst);
                shared.wake.notify_one();
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

impl Shared {
    fn emit(&self, event: QueueEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn job_event(&self, job_id: JobId, state: JobState, reason: ReasonCode) {
        debug!(job_id = %job_id, ?state, ?reason, "job state changed");
        self.emit(QueueEvent::JobStateChanged {
            job_id,
            state,
            reason,
        });
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveJob>> {
        lock(&self.active)
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn wait_for_work(&self) {
        let mut shutdown = self.shutdown.subscribe();
        tokio::select! {
            _ = self.wake.notified() => {}
            _ = tokio::time::sleep(IDLE_RECHECK) => {}
            _ = shutdown.wait_for(|stop| *stop) => {}
        }
    }

    /// Sleep unless the queue shuts down first.
    async fn pause_for(&self, delay: Duration) {
        let mut shutdown = self.shutdown.subscribe();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.wait_for(|stop| *stop) => {}
        }
    }

    async fn dispatch_next(&self) -> Result<Step> {
        self.purge_expired()?;

        let next = match self.peek()? {
            Peek::Nothing => return Ok(Step::Idle),
            Peek::Paused => return Ok(Step::Blocked),
            Peek::Job(job) => job,
        };

        if self.link_lost.load(Ordering::SeqCst) {
            if self.connection.state() != ConnectionState::Connected {
                debug!("link lost, waiting for a reconnect request");
                return Ok(Step::Blocked);
            }
            self.link_lost.store(false, Ordering::SeqCst);
        }

        if let Err(e) = self.ensure_link().await {
            match e {
                BonwerkError::ConnectionLost { attempts } => {
                    self.link_lost.store(true, Ordering::SeqCst);
                    error!(attempts, "printer unreachable, dispatch held until reconnect");
                    self.emit(QueueEvent::ConnectionLost { attempts });
                    self.job_event(next.id, next.state, ReasonCode::ConnectionLost);
                }
                other => warn!(error = %other, "printer not reachable, holding queue"),
            }
            return Ok(Step::Blocked);
        }

        let Some(claim) = self.claim()? else {
            return Ok(Step::Blocked);
        };
        let result = self.execute(&claim).await;
        let settled = self.settle(&claim, result);
        self.release();
        settled?;
        Ok(Step::Ran)
    }

    fn purge_expired(&self) -> Result<()> {
        let expired = store::lock(&self.store)?.purge_expired(Utc::now())?;
        for job_id in expired {
            warn!(job_id = %job_id, "job expired before it could print");
            self.emit(QueueEvent::JobExpired(job_id));
        }
        Ok(())
    }

    fn peek(&self) -> Result<Peek> {
        let store = store::lock(&self.store)?;
        let now = Utc::now();
        if let Some(job) = store.in_flight(now)? {
            return Ok(Peek::Job(job));
        }
        match store.next_pending(now)? {
            None => Ok(Peek::Nothing),
            Some(_) if self.paused.load(Ordering::SeqCst) => Ok(Peek::Paused),
            Some(job) => Ok(Peek::Job(job)),
        }
    }

    /// Bring the link up before a dispatch: connect when disconnected,
    /// reconnect with backoff when degraded.
    async fn ensure_link(&self) -> Result<()> {
        match self.connection.state() {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Disconnected => {
                if self.connection.connect().await.is_ok() {
                    return Ok(());
                }
                self.connection.recover().await
            }
            ConnectionState::Degraded => self.connection.recover().await,
            busy @ (ConnectionState::Connecting | ConnectionState::Reconnecting) => Err(
                BonwerkError::ConnectionDegraded(format!("link is {busy:?}")),
            ),
        }
    }

    /// Select the next job and register it as active, all under the active
    /// lock so a concurrent cancel sees either "not started" or "active".
    fn claim(&self) -> Result<Option<Claim>> {
        let mut active = self.lock_active();
        if self.working.load(Ordering::SeqCst) {
            warn!("dispatch attempted while a job is on the wire");
            return Ok(None);
        }

        let store = store::lock(&self.store)?;
        let now = Utc::now();
        let (mut job, reason, retrying) = if let Some(job) = store.in_flight(now)? {
            let retrying = {
                let mut due = lock(&self.retry_due);
                let hit = *due == Some(job.id);
                if hit {
                    *due = None;
                }
                hit
            };
            (job, ReasonCode::Resumed, retrying)
        } else if self.paused.load(Ordering::SeqCst) {
            return Ok(None);
        } else if let Some(job) = store.next_pending(now)? {
            store.update_state(&job.id, JobState::InFlight, None)?;
            (job, ReasonCode::Dispatched, false)
        } else {
            return Ok(None);
        };

        // A fresh dispatch or a retry opens a new attempt; resuming after a
        // link drop or a restart continues the current one.
        let attempt = if reason == ReasonCode::Dispatched || retrying {
            store.record_attempt(&job.id)?
        } else {
            job.attempt.max(1)
        };
        let control = Arc::new(TransferControl::new());
        *active = Some(ActiveJob {
            id: job.id,
            control: control.clone(),
        });
        self.working.store(true, Ordering::SeqCst);
        drop(store);
        drop(active);

        job.state = JobState::InFlight;
        job.attempt = attempt;
        info!(
            job_id = %job.id,
            attempt,
            offset = job.bytes_sent,
            remaining = job.remaining_bytes(),
            ?reason,
            "job dispatched"
        );
        self.job_event(job.id, JobState::InFlight, reason);
        Ok(Some(Claim {
            job,
            control,
            attempt,
            retrying,
        }))
    }

    #[instrument(skip(self, claim), fields(job_id = %claim.job.id, attempt = claim.attempt))]
    async fn execute(&self, claim: &Claim) -> Result<TransferOutcome> {
        let job = &claim.job;
        if claim.retrying {
            let delay = self.job_retry.delay_for(claim.attempt.saturating_sub(2));
            debug!(delay_ms = delay.as_millis() as u64, "job backoff");
            self.pause_for(delay).await;
        }

        let bytes = encode_payload(&job.payload, self.encoding);
        check_resume(job, &bytes)?;

        let transfer = ResumableTransfer::new(&self.connection, &self.store);
        match tokio::time::timeout(
            self.job_timeout,
            transfer.run(job.cursor(), &bytes, &claim.control),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(BonwerkError::JobTimedOut {
                job_id: job.id,
                after_ms: self.job_timeout.as_millis() as u64,
            }),
        }
    }

    /// Record the end of one dispatch in the store and announce it.
    fn settle(&self, claim: &Claim, result: Result<TransferOutcome>) -> Result<()> {
        let job_id = claim.job.id;
        let result = match result {
            Ok(TransferOutcome::Completed) => Ok(TransferOutcome::Completed),
            _ if claim.control.is_cancelled() => Ok(TransferOutcome::Cancelled),
            other => other,
        };

        match result {
            Ok(TransferOutcome::Completed) => {
                store::lock(&self.store)?.update_state(&job_id, JobState::Done, None)?;
                info!(job_id = %job_id, "job printed");
                self.job_event(job_id, JobState::Done, ReasonCode::Completed);
            }
            Ok(TransferOutcome::Cancelled) => {
                store::lock(&self.store)?.update_state(&job_id, JobState::Cancelled, None)?;
                info!(job_id = %job_id, "in-flight job cancelled");
                self.job_event(job_id, JobState::Cancelled, ReasonCode::CancelledByCaller);
            }
            Ok(TransferOutcome::Halted(HaltReason::Stopped)) => {
                info!(job_id = %job_id, "transfer stopped, job kept for next session");
            }
            Ok(TransferOutcome::Halted(HaltReason::LinkDown)) => {
                store::lock(&self.store)?.set_last_error(&job_id, "link dropped mid-transfer")?;
                info!(job_id = %job_id, "link dropped, job stays in flight for resume");
                self.job_event(job_id, JobState::InFlight, ReasonCode::LinkDegraded);
            }
            Err(e) => self.after_failure(claim, &e)?,
        }
        Ok(())
    }

    fn after_failure(&self, claim: &Claim, err: &BonwerkError) -> Result<()> {
        let job_id = claim.job.id;
        let store = store::lock(&self.store)?;
        match self.job_retry.should_retry(err, claim.attempt - 1) {
            RetryDecision::RetryAfter(_) => {
                store.set_last_error(&job_id, &err.to_string())?;
                *lock(&self.retry_due) = Some(job_id);
                drop(store);
                warn!(job_id = %job_id, attempt = claim.attempt, error = %err, "job attempt failed, will retry");
                self.job_event(job_id, JobState::InFlight, ReasonCode::RetryScheduled);
            }
            RetryDecision::Exhausted => {
                let reason = BonwerkError::JobRetryExhausted {
                    job_id,
                    attempts: claim.attempt,
                };
                store.update_state(&job_id, JobState::Failed, Some(&reason.to_string()))?;
                drop(store);
                error!(job_id = %job_id, error = %err, "job failed: {reason}");
                self.job_event(job_id, JobState::Failed, ReasonCode::RetryExhausted);
            }
            RetryDecision::GiveUp(_) => {
                if matches!(err, BonwerkError::JobNotFound(_)) {
                    warn!(job_id = %job_id, "job vanished during transfer");
                    return Ok(());
                }
                let reason = match err {
                    BonwerkError::IntegrityMismatch { .. }
                    | BonwerkError::CursorRegression { .. } => ReasonCode::IntegrityMismatch,
                    _ => ReasonCode::PrinterRejected,
                };
                store.update_state(&job_id, JobState::Failed, Some(&err.to_string()))?;
                drop(store);
                error!(job_id = %job_id, error = %err, "job failed permanently");
                self.job_event(job_id, JobState::Failed, reason);
            }
        }
        Ok(())
    }

    fn release(&self) {
        let mut active = self.lock_active();
        *active = None;
        self.working.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use bonwerk_core::config::BackoffConfig;
    use bonwerk_core::ops::{BarcodeFormat, BarcodeSpec};
    use bonwerk_core::types::TransferCursor;
    use tokio::time::{sleep, timeout};

    use super::*;
    use crate::sim::SimulatedPrinter;

    fn config() -> BonwerkConfig {
        let mut config = BonwerkConfig::default();
        config.link.write_timeout_ms = 50;
        config.link.connect_timeout_ms = 50;
        config.link.pacing.initial_chunk_size = 8;
        config.link.pacing.min_chunk_size = 4;
        config.link.pacing.initial_delay_ms = 0;
        config.link.pacing.min_delay_ms = 0;
        config.link.pacing.max_delay_ms = 2;
        config.link.heartbeat.enabled = false;
        config.link.reconnect = BackoffConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
            jitter: false,
        };
        config.queue.job_retry = BackoffConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
            jitter: false,
        };
        config
    }

    fn queue_with(
        sim: &Arc<SimulatedPrinter>,
        store: OfflineJobStore,
        config: &BonwerkConfig,
    ) -> PrintQueue {
        let connection = Arc::new(ConnectionManager::new(sim.clone(), config.link.clone()));
        PrintQueue::new(connection, store, config)
    }

    fn queue(sim: &Arc<SimulatedPrinter>) -> PrintQueue {
        queue_with(sim, OfflineJobStore::open_in_memory().expect("store"), &config())
    }

    fn raw(tag: u8, len: usize) -> Payload {
        Payload::Raw(vec![tag; len])
    }

    async fn next_event(rx: &mut broadcast::Receiver<QueueEvent>) -> QueueEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event in time")
            .expect("event channel open")
    }

    /// Collect events up to and including the first one matching `until`.
    async fn events_until(
        rx: &mut broadcast::Receiver<QueueEvent>,
        until: impl Fn(&QueueEvent) -> bool,
    ) -> Vec<QueueEvent> {
        let mut seen = Vec::new();
        loop {
            let event = next_event(rx).await;
            let done = until(&event);
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    fn drained(event: &QueueEvent) -> bool {
        *event == QueueEvent::QueueDrained
    }

    fn dispatch_order(events: &[QueueEvent]) -> Vec<JobId> {
        events
            .iter()
            .filter_map(|e| match e {
                QueueEvent::JobStateChanged {
                    job_id,
                    reason: ReasonCode::Dispatched,
                    ..
                } => Some(*job_id),
                _ => None,
            })
            .collect()
    }

    fn has_state(events: &[QueueEvent], id: JobId, want: JobState, why: ReasonCode) -> bool {
        events.iter().any(|e| {
            *e == QueueEvent::JobStateChanged {
                job_id: id,
                state: want,
                reason: why,
            }
        })
    }

    #[tokio::test]
    async fn dispatches_by_priority_then_fifo() {
        let sim = Arc::new(SimulatedPrinter::new());
        let queue = queue(&sim);
        let mut rx = queue.subscribe();

        let low = queue.enqueue(raw(1, 10), Priority::Low).expect("enqueue");
        let normal_a = queue.enqueue(raw(2, 10), Priority::Normal).expect("enqueue");
        let urgent = queue.enqueue(raw(3, 10), Priority::Urgent).expect("enqueue");
        let high = queue.enqueue(raw(4, 10), Priority::High).expect("enqueue");
        let normal_b = queue.enqueue(raw(5, 10), Priority::Normal).expect("enqueue");

        queue.start();
        let events = events_until(&mut rx, drained).await;
        assert_eq!(
            dispatch_order(&events),
            vec![urgent, high, normal_a, normal_b, low]
        );

        let mut expected = Vec::new();
        for tag in [3u8, 4, 2, 5, 1] {
            expected.extend(std::iter::repeat_n(tag, 10));
        }
        assert_eq!(sim.received(), expected);
        assert!(queue.jobs().expect("jobs").is_empty());
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn at_most_one_job_in_flight() {
        let sim = Arc::new(SimulatedPrinter::new());
        sim.set_write_latency(Duration::from_millis(1));
        let queue = queue(&sim);
        let mut rx = queue.subscribe();
        for i in 0..4u8 {
            queue.enqueue(raw(i, 24), Priority::Normal).expect("enqueue");
        }
        queue.start();

        let mut in_flight: HashSet<JobId> = HashSet::new();
        loop {
            match next_event(&mut rx).await {
                QueueEvent::JobStateChanged {
                    job_id,
                    state: JobState::InFlight,
                    ..
                } => {
                    in_flight.insert(job_id);
                    assert_eq!(in_flight.len(), 1, "two jobs in flight");
                }
                QueueEvent::JobStateChanged { job_id, state, .. } if state.is_terminal() => {
                    in_flight.remove(&job_id);
                }
                QueueEvent::QueueDrained => break,
                _ => {}
            }
            let stored = queue.jobs().expect("jobs");
            assert!(stored.iter().filter(|j| j.state == JobState::InFlight).count() <= 1);
        }
        assert!(!queue.is_working());
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn resumes_after_link_drop_with_exact_bytes() {
        let sim = Arc::new(SimulatedPrinter::new());
        let queue = queue(&sim);
        let mut rx = queue.subscribe();
        let payload: Vec<u8> = (0..64u8).collect();
        sim.disconnect_after_writes(3);

        let id = queue
            .enqueue(Payload::Raw(payload.clone()), Priority::Normal)
            .expect("enqueue");
        queue.start();
        let events = events_until(&mut rx, drained).await;

        assert!(has_state(&events, id, JobState::InFlight, ReasonCode::LinkDegraded));
        assert!(has_state(&events, id, JobState::InFlight, ReasonCode::Resumed));
        assert!(has_state(&events, id, JobState::Done, ReasonCode::Completed));
        assert_eq!(sim.received(), payload);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn cancel_pending_job_skips_it() {
        let sim = Arc::new(SimulatedPrinter::new());
        let queue = queue(&sim);
        let mut rx = queue.subscribe();
        let keep = queue.enqueue(raw(1, 8), Priority::Normal).expect("enqueue");
        let drop_me = queue.enqueue(raw(2, 8), Priority::Normal).expect("enqueue");

        queue.cancel(drop_me).expect("cancel");
        assert!(queue.job(drop_me).expect("job").is_none());

        queue.start();
        let events = events_until(&mut rx, drained).await;
        assert_eq!(dispatch_order(&events), vec![keep]);
        assert!(has_state(
            &events,
            drop_me,
            JobState::Cancelled,
            ReasonCode::CancelledByCaller
        ));
        assert_eq!(sim.received(), vec![1u8; 8]);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn cancel_in_flight_stops_after_current_chunk() {
        let sim = Arc::new(SimulatedPrinter::new());
        sim.set_write_latency(Duration::from_millis(15));
        let queue = queue(&sim);
        let mut rx = queue.subscribe();
        let payload: Vec<u8> = (0..=255u8).collect();
        let id = queue
            .enqueue(Payload::Raw(payload.clone()), Priority::Normal)
            .expect("enqueue");
        queue.start();

        events_until(&mut rx, |e| {
            matches!(e, QueueEvent::JobStateChanged { state: JobState::InFlight, .. })
        })
        .await;
        sleep(Duration::from_millis(40)).await;
        queue.cancel(id).expect("cancel");
        events_until(&mut rx, |e| {
            matches!(e, QueueEvent::JobStateChanged { state: JobState::Cancelled, .. })
        })
        .await;

        let sent = sim.received();
        sleep(Duration::from_millis(60)).await;
        assert_eq!(sim.received(), sent, "bytes sent after cancel");
        assert!(!sent.is_empty() && sent.len() < payload.len());
        assert_eq!(sent.as_slice(), &payload[..sent.len()]);
        assert!(queue.job(id).expect("job").is_none());
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn cancel_unknown_job_fails() {
        let sim = Arc::new(SimulatedPrinter::new());
        let queue = queue(&sim);
        assert!(matches!(
            queue.cancel(JobId::new()),
            Err(BonwerkError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn pause_holds_new_jobs() {
        let sim = Arc::new(SimulatedPrinter::new());
        let queue = queue(&sim);
        let mut rx = queue.subscribe();
        queue.pause();
        let id = queue.enqueue(raw(9, 8), Priority::Urgent).expect("enqueue");
        queue.start();

        sleep(Duration::from_millis(50)).await;
        assert!(sim.received().is_empty());
        assert_eq!(
            queue.job(id).expect("job").expect("stored").state,
            JobState::Pending
        );

        queue.resume();
        events_until(&mut rx, drained).await;
        assert_eq!(sim.received(), vec![9u8; 8]);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn clear_removes_pending_jobs() {
        let sim = Arc::new(SimulatedPrinter::new());
        let queue = queue(&sim);
        let mut rx = queue.subscribe();
        let ids: Vec<JobId> = (0..3u8)
            .map(|i| queue.enqueue(raw(i, 4), Priority::Normal).expect("enqueue"))
            .collect();
        for _ in &ids {
            next_event(&mut rx).await;
        }

        assert_eq!(queue.clear().expect("clear"), 3);
        assert!(queue.jobs().expect("jobs").is_empty());
        for id in ids {
            assert_eq!(
                next_event(&mut rx).await,
                QueueEvent::JobStateChanged {
                    job_id: id,
                    state: JobState::Cancelled,
                    reason: ReasonCode::Cleared,
                }
            );
        }
    }

    #[tokio::test]
    async fn exhausted_job_fails_and_is_retained() {
        let sim = Arc::new(SimulatedPrinter::new());
        sim.set_write_latency(Duration::from_millis(30));
        let mut config = config();
        config.queue.job_retry.max_attempts = 2;
        config.queue.job_timeout_ms = 50;
        let queue = queue_with(
            &sim,
            OfflineJobStore::open_in_memory().expect("store"),
            &config,
        );
        let mut rx = queue.subscribe();
        let id = queue.enqueue(raw(1, 64), Priority::Normal).expect("enqueue");
        queue.start();

        let events = events_until(&mut rx, drained).await;
        assert!(has_state(&events, id, JobState::InFlight, ReasonCode::RetryScheduled));
        assert!(has_state(&events, id, JobState::Failed, ReasonCode::RetryExhausted));
        let job = queue.job(id).expect("job").expect("retained");
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempt, 2);
        assert!(job.last_error.is_some());
        assert!(sim.received().len() < 64);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn link_drops_do_not_spend_job_budget() {
        let sim = Arc::new(SimulatedPrinter::new());
        let mut config = config();
        config.queue.job_retry.max_attempts = 1;
        let queue = queue_with(
            &sim,
            OfflineJobStore::open_in_memory().expect("store"),
            &config,
        );
        let mut rx = queue.subscribe();
        let payload: Vec<u8> = (0..64u8).collect();
        sim.disconnect_every_writes(1);

        let id = queue
            .enqueue(Payload::Raw(payload.clone()), Priority::Normal)
            .expect("enqueue");
        queue.start();
        let events = events_until(&mut rx, drained).await;

        let drops = events
            .iter()
            .filter(|e| {
                matches!(e, QueueEvent::JobStateChanged {
                    reason: ReasonCode::LinkDegraded,
                    ..
                })
            })
            .count();
        assert!(drops > 1, "only {drops} link drops seen");
        assert_eq!(dispatch_order(&events), vec![id]);
        assert!(!has_state(&events, id, JobState::InFlight, ReasonCode::RetryScheduled));
        assert!(has_state(&events, id, JobState::Done, ReasonCode::Completed));
        assert_eq!(sim.received(), payload);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn rejected_job_can_be_retried_manually() {
        let sim = Arc::new(SimulatedPrinter::new());
        sim.reject_next_writes(1);
        let queue = queue(&sim);
        let mut rx = queue.subscribe();
        let id = queue.enqueue(raw(7, 8), Priority::Normal).expect("enqueue");
        queue.start();

        let events = events_until(&mut rx, drained).await;
        assert!(has_state(&events, id, JobState::Failed, ReasonCode::PrinterRejected));
        assert!(matches!(
            queue.cancel(id),
            Err(BonwerkError::IllegalTransition { .. })
        ));

        queue.retry(id).expect("retry");
        let events = events_until(&mut rx, drained).await;
        assert!(has_state(&events, id, JobState::Pending, ReasonCode::ManualRetry));
        assert!(has_state(&events, id, JobState::Done, ReasonCode::Completed));
        assert_eq!(sim.received(), vec![7u8; 8]);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn integrity_mismatch_fails_without_sending() {
        let sim = Arc::new(SimulatedPrinter::new());
        let store = OfflineJobStore::open_in_memory().expect("store");
        let job = PrintJob::new(
            Payload::Raw(b"abc".to_vec()),
            Priority::Normal,
            3,
            fingerprint(b"abd"),
            chrono::Duration::hours(1),
        );
        store.insert_job(&job).expect("insert");
        let queue = queue_with(&sim, store, &config());
        let mut rx = queue.subscribe();
        queue.start();

        let events = events_until(&mut rx, drained).await;
        assert!(has_state(&events, job.id, JobState::Failed, ReasonCode::IntegrityMismatch));
        assert!(sim.received().is_empty());
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn expired_jobs_are_purged_not_printed() {
        let sim = Arc::new(SimulatedPrinter::new());
        let store = OfflineJobStore::open_in_memory().expect("store");
        let mut stale = PrintJob::new(
            Payload::Raw(b"old".to_vec()),
            Priority::Urgent,
            3,
            fingerprint(b"old"),
            chrono::Duration::hours(1),
        );
        stale.expires_at = Utc::now() - chrono::Duration::seconds(1);
        store.insert_job(&stale).expect("insert");
        let queue = queue_with(&sim, store, &config());
        let mut rx = queue.subscribe();
        queue.start();

        assert_eq!(next_event(&mut rx).await, QueueEvent::JobExpired(stale.id));
        assert!(queue.jobs().expect("jobs").is_empty());
        assert!(sim.received().is_empty());
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn interrupted_job_resumes_before_pending_work() {
        let sim = Arc::new(SimulatedPrinter::new());
        let store = OfflineJobStore::open_in_memory().expect("store");
        let leftover: Vec<u8> = (10..30u8).collect();
        let old = PrintJob::new(
            Payload::Raw(leftover.clone()),
            Priority::Low,
            leftover.len() as u64,
            fingerprint(&leftover),
            chrono::Duration::hours(1),
        );
        store.insert_job(&old).expect("insert");
        store
            .update_state(&old.id, JobState::InFlight, None)
            .expect("in flight");
        store
            .advance_cursor(TransferCursor::new(old.id, 12))
            .expect("cursor");

        let queue = queue_with(&sim, store, &config());
        let mut rx = queue.subscribe();
        queue.enqueue(raw(0xee, 4), Priority::Urgent).expect("enqueue");
        queue.start();
        let events = events_until(&mut rx, drained).await;

        assert!(has_state(&events, old.id, JobState::InFlight, ReasonCode::Resumed));
        let mut expected = leftover[12..].to_vec();
        expected.extend([0xee; 4]);
        assert_eq!(sim.received(), expected);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn connection_lost_keeps_job_stored() {
        let sim = Arc::new(SimulatedPrinter::new());
        sim.fail_next_connects(u32::MAX);
        let queue = queue(&sim);
        let mut rx = queue.subscribe();
        let id = queue.enqueue(raw(1, 8), Priority::Normal).expect("enqueue");
        queue.start();

        let events = events_until(&mut rx, |e| {
            matches!(e, QueueEvent::ConnectionLost { .. })
        })
        .await;
        assert!(events.contains(&QueueEvent::ConnectionLost { attempts: 3 }));
        assert_eq!(
            queue.job(id).expect("job").expect("stored").state,
            JobState::Pending
        );
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn connection_lost_holds_until_reconnect() {
        let sim = Arc::new(SimulatedPrinter::new());
        sim.fail_next_connects(u32::MAX);
        let queue = queue(&sim);
        let mut rx = queue.subscribe();
        let first = queue.enqueue(raw(1, 8), Priority::Normal).expect("enqueue");
        queue.start();

        let mut events = events_until(&mut rx, |e| {
            matches!(e, QueueEvent::ConnectionLost { .. })
        })
        .await;
        assert!(queue.is_link_lost());
        let connects_tried = sim.connect_count();

        // An enqueue wakes the dispatcher; the hold must survive it.
        let second = queue.enqueue(raw(2, 8), Priority::Normal).expect("enqueue");
        sleep(Duration::from_millis(100)).await;
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(queue.is_link_lost());
        assert_eq!(sim.connect_count(), connects_tried);
        let lost = events
            .iter()
            .filter(|e| matches!(e, QueueEvent::ConnectionLost { .. }))
            .count();
        let lost_jobs = events
            .iter()
            .filter(|e| {
                matches!(e, QueueEvent::JobStateChanged {
                    reason: ReasonCode::ConnectionLost,
                    ..
                })
            })
            .count();
        assert_eq!((lost, lost_jobs), (1, 1));

        sim.fail_next_connects(0);
        queue.reconnect();
        let events = events_until(&mut rx, drained).await;
        assert!(!queue.is_link_lost());
        assert!(has_state(&events, first, JobState::Done, ReasonCode::Completed));
        assert!(has_state(&events, second, JobState::Done, ReasonCode::Completed));
        assert_eq!(sim.received(), [vec![1u8; 8], vec![2u8; 8]].concat());
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn host_reconnect_lifts_connection_lost() {
        let sim = Arc::new(SimulatedPrinter::new());
        sim.fail_next_connects(u32::MAX);
        let queue = queue(&sim);
        let _listener = queue.connection().spawn_event_listener();
        let mut rx = queue.subscribe();
        let id = queue.enqueue(raw(5, 8), Priority::Normal).expect("enqueue");
        queue.start();

        events_until(&mut rx, |e| {
            matches!(e, QueueEvent::ConnectionLost { .. })
        })
        .await;
        assert!(queue.is_link_lost());

        sim.fail_next_connects(0);
        sim.host_reconnect();
        let events = events_until(&mut rx, drained).await;
        assert!(has_state(&events, id, JobState::Done, ReasonCode::Completed));
        assert!(!queue.is_link_lost());
        assert_eq!(sim.received(), vec![5u8; 8]);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn invalid_barcode_is_rejected_at_enqueue() {
        let sim = Arc::new(SimulatedPrinter::new());
        let queue = queue(&sim);
        let spec = BarcodeSpec::new(BarcodeFormat::Ean13, "6901234567890");
        let err = queue
            .enqueue(Payload::Ops(vec![Op::Barcode(spec)]), Priority::Normal)
            .unwrap_err();
        assert!(matches!(err, BonwerkError::InvalidContent { .. }));
        assert!(queue.jobs().expect("jobs").is_empty());
    }

    #[tokio::test]
    async fn enqueue_after_shutdown_fails() {
        let sim = Arc::new(SimulatedPrinter::new());
        let queue = queue(&sim);
        queue.start();
        queue.shutdown().await;
        assert!(matches!(
            queue.enqueue(raw(1, 1), Priority::Low),
            Err(BonwerkError::Shutdown)
        ));
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Spooler: owns the print pipeline for one printer.
//
// The job database lives in the data directory.  When it cannot be opened
// the spooler keeps running on an in-memory store, so jobs still print but
// do not survive a restart.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bonwerk_core::error::{BonwerkError, Result};
use bonwerk_core::types::{JobId, JobState, Payload, Priority};
use bonwerk_core::BonwerkConfig;
use bonwerk_print::{ConnectionManager, OfflineJobStore, PrintQueue, QueueEvent, SimulatedPrinter};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub struct Spooler {
    printer: Arc<SimulatedPrinter>,
    queue: PrintQueue,
    tasks: Vec<JoinHandle<()>>,
}

impl Spooler {
    /// Open the job store under `dir`, connect the printer link and start
    /// dispatching.  Jobs left over from an earlier session resume first.
    pub fn init(config: &BonwerkConfig, dir: &Path) -> Result<Self> {
        let db_path = dir.join("jobs.db");
        let store = match OfflineJobStore::open(&db_path) {
            Ok(store) => store,
            Err(e) => {
                error!(path = %db_path.display(), error = %e, "job store unavailable, using memory");
                OfflineJobStore::open_in_memory()?
            }
        };

        let printer = Arc::new(
            SimulatedPrinter::new().with_probe(config.link.heartbeat.probe.clone()),
        );
        let connection = Arc::new(ConnectionManager::new(printer.clone(), config.link.clone()));

        let mut tasks = vec![connection.spawn_event_listener()];
        tasks.extend(connection.spawn_heartbeat());

        let queue = PrintQueue::new(connection, store, config);
        queue.start();
        info!("spooler ready");

        Ok(Self {
            printer,
            queue,
            tasks,
        })
    }

    pub fn printer(&self) -> &Arc<SimulatedPrinter> {
        &self.printer
    }

    pub fn queue(&self) -> &PrintQueue {
        &self.queue
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.queue.subscribe()
    }

    pub fn submit(&self, payload: Payload, priority: Priority) -> Result<JobId> {
        let id = self.queue.enqueue(payload, priority)?;
        info!(job_id = %id, ?priority, "job submitted");
        Ok(id)
    }

    /// Stop the queue and the link tasks.  Unfinished jobs stay stored.
    pub async fn shutdown(self) {
        self.queue.shutdown().await;
        for task in self.tasks {
            task.abort();
        }
        info!("spooler stopped");
    }
}

/// Wait until `job_id` reaches a terminal state.  `Ok(None)` when `limit`
/// passes first.
///
/// Subscribe before submitting, or early events are missed.
pub async fn wait_for_job(
    events: &mut broadcast::Receiver<QueueEvent>,
    job_id: JobId,
    limit: Duration,
) -> Result<Option<JobState>> {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(QueueEvent::JobStateChanged { job_id: id, state, reason }) if id == job_id => {
                    info!(?state, ?reason, "job update");
                    if state.is_terminal() {
                        return Ok(state);
                    }
                }
                Ok(QueueEvent::JobExpired(id)) if id == job_id => {
                    return Err(BonwerkError::JobNotFound(id));
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return Err(BonwerkError::Shutdown),
            }
        }
    };
    match tokio::time::timeout(limit, wait).await {
        Ok(result) => result.map(Some),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> BonwerkConfig {
        let mut config = BonwerkConfig::default();
        config.link.pacing.initial_delay_ms = 0;
        config.link.pacing.min_delay_ms = 0;
        config.link.reconnect.base_delay_ms = 1;
        config.link.reconnect.max_delay_ms = 5;
        config.queue.job_retry.base_delay_ms = 1;
        config.queue.job_retry.max_delay_ms = 5;
        config.link.heartbeat.enabled = false;
        config
    }

    #[tokio::test]
    async fn prints_and_persists_across_sessions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = fast_config();

        let spooler = Spooler::init(&config, dir.path()).expect("init");
        let mut events = spooler.subscribe();
        let id = spooler
            .submit(Payload::Raw(b"hello\n".to_vec()), Priority::Normal)
            .expect("submit");
        let state = wait_for_job(&mut events, id, Duration::from_secs(5))
            .await
            .expect("wait");
        assert_eq!(state, Some(JobState::Done));
        assert_eq!(spooler.printer().received(), b"hello\n");
        spooler.shutdown().await;

        assert!(dir.path().join("jobs.db").exists());
        let spooler = Spooler::init(&config, dir.path()).expect("reopen");
        assert!(spooler.queue().jobs().expect("jobs").is_empty());
        spooler.shutdown().await;
    }

    #[tokio::test]
    async fn missing_directory_falls_back_to_memory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("no").join("such").join("dir");
        let spooler = Spooler::init(&fast_config(), &missing).expect("init");
        assert!(spooler.queue().jobs().expect("jobs").is_empty());
        spooler.shutdown().await;
    }
}

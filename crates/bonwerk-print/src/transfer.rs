// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Resumable transfer: sends one job's encoded bytes from its persisted
// cursor, one adaptive chunk at a time.
//
// The cursor is written to the store after every acknowledged chunk and
// before the next chunk goes out.  A crash or disconnect therefore never
// re-sends acknowledged bytes; the only possible duplicate is a chunk whose
// acknowledgement was lost in flight.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use bonwerk_core::error::{BonwerkError, Result};
use bonwerk_core::types::{ConnectionState, TransferCursor};
use tracing::{debug, info, instrument};

use crate::connection::ConnectionManager;
use crate::store::{self, OfflineJobStore};

/// Cooperative stop signals for the job being transferred.
///
/// Both flags are only looked at between chunks, never mid-write.
#[derive(Debug, Default)]
pub struct TransferControl {
    cancelled: AtomicBool,
    stopped: AtomicBool,
}

impl TransferControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// The job was cancelled: send no further bytes of it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// The queue is shutting down: halt, keep the job for later.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    /// Link left `Connected`; resume once it is back.
    LinkDown,
    /// Stopped by the caller.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Every byte acknowledged.
    Completed,
    /// Cancel observed at a chunk boundary.
    Cancelled,
    /// Interrupted with the cursor persisted.
    Halted(HaltReason),
}

/// Sends job bytes through a connection manager, persisting progress.
pub struct ResumableTransfer<'a> {
    connection: &'a ConnectionManager,
    store: &'a Mutex<OfflineJobStore>,
}

impl<'a> ResumableTransfer<'a> {
    pub fn new(connection: &'a ConnectionManager, store: &'a Mutex<OfflineJobStore>) -> Self {
        Self { connection, store }
    }

    /// Send `bytes[cursor.offset..]` for `cursor.job_id`.
    ///
    /// Chunk size is re-read from the connection manager before every chunk
    /// so the adaptive pacing applies mid-job.  Errors other than a degraded
    /// link (a device rejection, a store failure) are returned as-is.
    #[instrument(skip(self, bytes, control), fields(job_id = %cursor.job_id, total = bytes.len()))]
    pub async fn run(
        &self,
        mut cursor: TransferCursor,
        bytes: &[u8],
        control: &TransferControl,
    ) -> Result<TransferOutcome> {
        let total = bytes.len();
        let mut offset = usize::try_from(cursor.offset).unwrap_or(usize::MAX);
        if offset > total {
            return Err(BonwerkError::IntegrityMismatch {
                job_id: cursor.job_id,
                offset: cursor.offset,
                expected: format!("cursor within {total} bytes"),
                actual: format!("cursor at {}", cursor.offset),
            });
        }
        if offset > 0 {
            info!(offset, "resuming transfer");
        }

        while offset < total {
            if control.is_cancelled() {
                info!(offset, "transfer cancelled");
                return Ok(TransferOutcome::Cancelled);
            }
            if control.is_stopped() {
                return Ok(TransferOutcome::Halted(HaltReason::Stopped));
            }
            if self.connection.state() != ConnectionState::Connected {
                debug!(offset, state = ?self.connection.state(), "link not connected, halting");
                return Ok(TransferOutcome::Halted(HaltReason::LinkDown));
            }

            let end = offset
                .saturating_add(self.connection.chunk_size().max(1))
                .min(total);
            match self.connection.write(&bytes[offset..end]).await {
                Ok(()) => {}
                Err(BonwerkError::ConnectionDegraded(reason)) => {
                    info!(offset, %reason, "link degraded mid-transfer");
                    return Ok(TransferOutcome::Halted(HaltReason::LinkDown));
                }
                Err(e) => return Err(e),
            }

            cursor = cursor.advanced_by(end - offset);
            store::lock(self.store)?.advance_cursor(cursor)?;
            debug!(offset = end, total, "chunk acknowledged");
            offset = end;
        }

        Ok(TransferOutcome::Completed)
    }
}

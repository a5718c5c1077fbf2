// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Bonwerk print pipeline.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ops::Op;

/// Unique identifier for a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Dispatch priority. Ordering is `Low < Normal < High < Urgent`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    /// Numeric rank used for ordering in the store (higher dispatches first).
    pub fn rank(self) -> i64 {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::High => 2,
            Self::Urgent => 3,
        }
    }

    pub fn from_rank(rank: i64) -> Option<Self> {
        match rank {
            0 => Some(Self::Low),
            1 => Some(Self::Normal),
            2 => Some(Self::High),
            3 => Some(Self::Urgent),
            _ => None,
        }
    }
}

/// Lifecycle states of a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    /// Queued, waiting to be dispatched.
    Pending,
    /// Being transmitted (or halted mid-transfer awaiting reconnect).
    InFlight,
    /// Retry budget exhausted or permanent error; retained for inspection.
    Failed,
    /// Every byte acknowledged by the printer.
    Done,
    /// Cancelled by the caller or cleared from the queue.
    Cancelled,
}

impl JobState {
    /// Done and Cancelled jobs are evicted; Failed jobs are retained.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Done | Self::Cancelled)
    }

    /// Whether `cancel` is legal in this state.
    pub fn is_cancellable(self) -> bool {
        matches!(self, Self::Pending | Self::InFlight)
    }

    /// Legal lifecycle moves.  `Failed -> Pending` is a manual retry.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InFlight | Self::Cancelled | Self::Failed)
                | (Self::InFlight, Self::Done | Self::Failed | Self::Cancelled)
                | (Self::Failed, Self::Pending)
        )
    }
}

/// Transport connection state, owned by the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Degraded,
    Reconnecting,
}

/// Classification of errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Link blips, timeouts and lost acks; safe to retry automatically.
    Transient,
    /// Bad content or an integrity failure; retrying cannot help.
    Permanent,
}

/// Why a job changed state. Carried by every job-state event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReasonCode {
    Enqueued,
    Dispatched,
    Resumed,
    Completed,
    CancelledByCaller,
    Cleared,
    /// Link dropped mid-transfer; the job stays in flight for resume.
    LinkDegraded,
    /// Reconnect budget exhausted; the job stays stored for a later session.
    ConnectionLost,
    PrinterRejected,
    /// Job-level failure with budget left; the job is retried after backoff.
    RetryScheduled,
    RetryExhausted,
    IntegrityMismatch,
    ManualRetry,
}

/// Job content: either codec operations or an already-encoded byte stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Ops(Vec<Op>),
    Raw(#[serde(with = "crate::ops::hex_bytes")] Vec<u8>),
}

/// A complete print job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintJob {
    pub id: JobId,
    pub priority: Priority,
    pub payload: Payload,
    pub state: JobState,
    /// Number of dispatches so far.
    pub attempt: u32,
    /// Resume cursor: bytes acknowledged by the printer.
    pub bytes_sent: u64,
    /// Length of the encoded byte stream.
    pub total_bytes: u64,
    /// SHA-256 of the encoded byte stream, fixed at enqueue.
    pub payload_sha256: String,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PrintJob {
    pub fn new(
        payload: Payload,
        priority: Priority,
        total_bytes: u64,
        payload_sha256: String,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            priority,
            payload,
            state: JobState::Pending,
            attempt: 0,
            bytes_sent: 0,
            total_bytes,
            payload_sha256,
            last_error: None,
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn cursor(&self) -> TransferCursor {
        TransferCursor {
            job_id: self.id,
            offset: self.bytes_sent,
        }
    }

    pub fn remaining_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.bytes_sent)
    }
}

/// Byte-offset progress of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCursor {
    pub job_id: JobId,
    pub offset: u64,
}

impl TransferCursor {
    pub fn new(job_id: JobId, offset: u64) -> Self {
        Self { job_id, offset }
    }

    /// The same job, `len` bytes further on.
    pub fn advanced_by(self, len: usize) -> Self {
        Self {
            offset: self.offset.saturating_add(len as u64),
            ..self
        }
    }
}

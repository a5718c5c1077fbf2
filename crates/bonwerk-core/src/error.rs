// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Bonwerk.

use thiserror::Error;

use crate::ops::BarcodeFormat;
use crate::types::{JobId, JobState};

/// Top-level error type for all Bonwerk operations.
#[derive(Debug, Error)]
pub enum BonwerkError {
    // -- Validation errors (never retried) --
    #[error("invalid {format:?} barcode content: {reason}")]
    InvalidContent {
        format: BarcodeFormat,
        reason: String,
    },

    #[error("invalid template: {0}")]
    InvalidTemplate(String),

    // -- Transport errors --
    #[error("chunk write failed: {0}")]
    TransientWrite(String),

    #[error("connection degraded: {0}")]
    ConnectionDegraded(String),

    #[error("connection attempt failed: {0}")]
    ConnectionFailed(String),

    #[error("connection lost after {attempts} reconnect attempts")]
    ConnectionLost { attempts: u32 },

    #[error("printer rejected payload: {0}")]
    PayloadRejected(String),

    // -- Job lifecycle --
    #[error("job {job_id} exhausted its retry budget after {attempts} attempts")]
    JobRetryExhausted { job_id: JobId, attempts: u32 },

    #[error("job {job_id} did not finish within {after_ms} ms")]
    JobTimedOut { job_id: JobId, after_ms: u64 },

    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("job {job_id} cannot move from {from:?} to {to:?}")]
    IllegalTransition {
        job_id: JobId,
        from: JobState,
        to: JobState,
    },

    #[error("cursor for job {job_id} cannot move back from {stored} to {attempted}")]
    CursorRegression {
        job_id: JobId,
        stored: u64,
        attempted: u64,
    },

    #[error("job {job_id} failed its integrity check at byte {offset}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        job_id: JobId,
        offset: u64,
        expected: String,
        actual: String,
    },

    #[error("print queue has shut down")]
    Shutdown,

    // -- Storage / persistence --
    #[error("database error: {0}")]
    Database(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // -- Preview / configuration --
    #[error("image processing failed: {0}")]
    Image(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BonwerkError>;

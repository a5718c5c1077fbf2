// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job stream integrity.
//
// Every job's encoded stream is fingerprinted at enqueue.  Before a dispatch
// sends anything the stream is rebuilt from the stored payload and checked
// against the record, so the bytes sent from a resume cursor always continue
// the same stream the printer already holds the head of.

use bonwerk_core::error::{BonwerkError, Result};
use bonwerk_core::types::PrintJob;
use sha2::{Digest, Sha256};
use tracing::warn;

/// Lowercase hex SHA-256 of an encoded job stream.
pub fn fingerprint(stream: &[u8]) -> String {
    hex::encode(Sha256::digest(stream))
}

/// Check a rebuilt stream against its job record before sending from the
/// job's cursor: same length, cursor inside the stream, same fingerprint.
pub fn check_resume(job: &PrintJob, stream: &[u8]) -> Result<()> {
    let cursor = job.cursor();
    let len = stream.len() as u64;

    if len != job.total_bytes {
        return Err(mismatch(
            job,
            format!("{} bytes", job.total_bytes),
            format!("{len} bytes"),
        ));
    }
    if cursor.offset > len {
        return Err(mismatch(
            job,
            format!("cursor within {len} bytes"),
            format!("cursor at {}", cursor.offset),
        ));
    }
    let actual = fingerprint(stream);
    if !actual.eq_ignore_ascii_case(&job.payload_sha256) {
        return Err(mismatch(job, job.payload_sha256.clone(), actual));
    }
    Ok(())
}

fn mismatch(job: &PrintJob, expected: String, actual: String) -> BonwerkError {
    warn!(
        job_id = %job.id,
        offset = job.bytes_sent,
        %expected,
        %actual,
        "job stream does not match its record"
    );
    BonwerkError::IntegrityMismatch {
        job_id: job.id,
        offset: job.bytes_sent,
        expected,
        actual,
    }
}

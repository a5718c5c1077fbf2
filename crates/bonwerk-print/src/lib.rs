// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bonwerk Print: the fault-tolerant side of the pipeline.  A connection
// manager paces chunk writes over the host transport, the offline store keeps
// jobs and resume cursors in SQLite, and the print queue dispatches jobs one
// at a time through a resumable transfer.

pub mod backoff;
pub mod connection;
pub mod integrity;
pub mod pacing;
pub mod queue;
pub mod sim;
pub mod store;
pub mod transfer;
pub mod transport;

pub use backoff::{BackoffPolicy, RetryDecision, classify_error};
pub use connection::{ConnectionManager, HeartbeatOutcome};
pub use pacing::{Pacing, PacingSnapshot};
pub use queue::{PrintQueue, QueueEvent};
pub use sim::SimulatedPrinter;
pub use store::OfflineJobStore;
pub use transfer::{HaltReason, ResumableTransfer, TransferControl, TransferOutcome};
pub use transport::{LinkEvent, Transport, TransportError};

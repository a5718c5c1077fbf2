// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Host transport capability.
//
// The host owns the radio: discovery, pairing, MTU negotiation and platform
// quirks all happen on its side.  Bonwerk only needs an already-selected
// device handle that can connect, write one chunk and report link changes.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

/// Failure of a single transport operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No acknowledgement arrived in time.
    #[error("write timed out")]
    Timeout,

    /// The write failed on the link; retrying may help.
    #[error("transport failure: {0}")]
    Failed(String),

    /// The device refused the bytes; retrying the same chunk cannot help.
    #[error("device rejected write: {0}")]
    Rejected(String),

    #[error("not connected")]
    NotConnected,
}

/// Link changes reported by the host, independent of any write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Disconnected,
}

/// Write capability for one printer.
///
/// `write` resolves once the device acknowledged the whole chunk (for BLE:
/// a write-with-response completed).  Implementations must not split or
/// reorder the bytes they are handed.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish (or re-establish) the link.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Write one chunk and wait for its acknowledgement.
    async fn write(&self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Host-initiated connect / disconnect notifications.
    fn subscribe(&self) -> broadcast::Receiver<LinkEvent>;

    /// Human-readable device name for logs.
    fn name(&self) -> &str {
        "printer"
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Adaptive chunk pacing (AIMD).
//
// A healthy link earns bigger chunks and shorter gaps one small step at a
// time; a failing link loses half its chunk size and doubles its gap at
// once.  The tracker only counts: the connection manager decides what a
// success or a failure is.

use std::time::Duration;

use bonwerk_core::config::PacingConfig;
use tracing::{debug, warn};

/// Current transport parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingSnapshot {
    pub chunk_size: usize,
    pub chunk_delay: Duration,
    /// Successes since the last step-up or decrease.
    pub consecutive_successes: u32,
}

/// Additive-increase / multiplicative-decrease state.
#[derive(Debug, Clone)]
pub struct Pacing {
    config: PacingConfig,
    chunk_size: usize,
    delay_ms: u64,
    successes: u32,
}

impl Pacing {
    pub fn new(config: PacingConfig) -> Self {
        // min/max (not clamp) so an unvalidated config cannot panic here.
        let chunk_size = config
            .initial_chunk_size
            .min(config.max_chunk_size)
            .max(config.min_chunk_size)
            .max(1);
        let delay_ms = config
            .initial_delay_ms
            .min(config.max_delay_ms)
            .max(config.min_delay_ms);
        Self {
            config,
            chunk_size,
            delay_ms,
            successes: 0,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn snapshot(&self) -> PacingSnapshot {
        PacingSnapshot {
            chunk_size: self.chunk_size,
            chunk_delay: self.chunk_delay(),
            consecutive_successes: self.successes,
        }
    }

    /// One acknowledged chunk.  Every `successes_per_step` in a row grows the
    /// chunk by `chunk_step` and shrinks the delay by `delay_step_ms`.
    pub fn record_success(&mut self) {
        self.successes += 1;
        if self.successes < self.config.successes_per_step.max(1) {
            return;
        }
        self.successes = 0;

        let max = self.config.max_chunk_size.max(1);
        let grown = self.chunk_size.saturating_add(self.config.chunk_step).min(max);
        let shorter = self
            .delay_ms
            .saturating_sub(self.config.delay_step_ms)
            .max(self.config.min_delay_ms);

        if grown != self.chunk_size || shorter != self.delay_ms {
            debug!(
                chunk_size = grown,
                chunk_delay_ms = shorter,
                "link healthy, stepping pacing up"
            );
        }
        self.chunk_size = grown;
        self.delay_ms = shorter;
    }

    /// One escalated failure: halve the chunk, double the delay.
    pub fn record_failure(&mut self) {
        self.successes = 0;
        let min = self.config.min_chunk_size.max(1);
        self.chunk_size = (self.chunk_size / 2).max(min);
        self.delay_ms = self
            .delay_ms
            .saturating_mul(2)
            .max(self.config.min_delay_ms.max(1))
            .min(self.config.max_delay_ms.max(self.config.min_delay_ms));
        warn!(
            chunk_size = self.chunk_size,
            chunk_delay_ms = self.delay_ms,
            "link failing, backing pacing off"
        );
    }
}

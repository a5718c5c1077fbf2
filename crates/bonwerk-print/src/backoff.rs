// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Exponential backoff with cap and jitter, and error classification.
//
// Used twice with independent budgets: the connection manager's reconnect
// loop and the print queue's job-level retries.  Chunk-level retries are
// counted and spaced by the connection manager itself.

use std::time::Duration;

use bonwerk_core::config::BackoffConfig;
use bonwerk_core::error::BonwerkError;
use bonwerk_core::types::ErrorClass;
use rand::Rng;
use tracing::{debug, info, warn};

/// Result of evaluating whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after this delay.
    RetryAfter(Duration),
    /// Do not retry; retrying cannot help.
    GiveUp(ErrorClass),
    /// Maximum attempts used up.
    Exhausted,
}

/// Classify an error for retry decisions.
pub fn classify_error(err: &BonwerkError) -> ErrorClass {
    match err {
        // Link trouble: the same bytes may well go through later.
        BonwerkError::TransientWrite(_)
        | BonwerkError::ConnectionDegraded(_)
        | BonwerkError::ConnectionFailed(_)
        | BonwerkError::ConnectionLost { .. }
        | BonwerkError::JobTimedOut { .. }
        | BonwerkError::Database(_)
        | BonwerkError::Io(_) => ErrorClass::Transient,

        // Bad content or a bad record: resending changes nothing.
        BonwerkError::InvalidContent { .. }
        | BonwerkError::InvalidTemplate(_)
        | BonwerkError::PayloadRejected(_)
        | BonwerkError::JobRetryExhausted { .. }
        | BonwerkError::JobNotFound(_)
        | BonwerkError::IllegalTransition { .. }
        | BonwerkError::CursorRegression { .. }
        | BonwerkError::IntegrityMismatch { .. }
        | BonwerkError::Shutdown
        | BonwerkError::Serialization(_)
        | BonwerkError::Image(_)
        | BonwerkError::Config(_) => ErrorClass::Permanent,
    }
}

/// Backoff schedule for one retry budget.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    config: BackoffConfig,
}

impl BackoffPolicy {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Delay before retry number `attempt` (0-based).
    ///
    /// `min(base * 2^attempt + jitter, max_delay)`, jitter uniform in
    /// `[0, base)` when enabled.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay();
        let exp = base.saturating_mul(1u32 << attempt.min(20));
        let jitter = if self.config.jitter && !base.is_zero() {
            Duration::from_millis(rand::rng().random_range(0..self.config.base_delay_ms))
        } else {
            Duration::ZERO
        };
        exp.saturating_add(jitter).min(self.config.max_delay())
    }

    /// Decide whether a failure on attempt `attempt` (0-based) is retried.
    pub fn should_retry(&self, err: &BonwerkError, attempt: u32) -> RetryDecision {
        match classify_error(err) {
            ErrorClass::Permanent => {
                info!(error = %err, "permanent error, not retrying");
                RetryDecision::GiveUp(ErrorClass::Permanent)
            }
            ErrorClass::Transient => {
                if attempt + 1 >= self.config.max_attempts {
                    warn!(attempt, max = self.config.max_attempts, "retry limit exhausted");
                    RetryDecision::Exhausted
                } else {
                    let delay = self.delay_for(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, "scheduling retry");
                    RetryDecision::RetryAfter(delay)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: bool) -> BackoffPolicy {
        BackoffPolicy::new(BackoffConfig {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            jitter,
        })
    }

    #[test]
    fn link_errors_are_transient() {
        let err = BonwerkError::ConnectionDegraded("3 failed writes".into());
        assert_eq!(classify_error(&err), ErrorClass::Transient);
        assert_eq!(
            classify_error(&BonwerkError::ConnectionLost { attempts: 6 }),
            ErrorClass::Transient
        );
    }

    #[test]
    fn content_errors_are_permanent() {
        let err = BonwerkError::PayloadRejected("paper out".into());
        assert_eq!(classify_error(&err), ErrorClass::Permanent);
        let err = BonwerkError::IntegrityMismatch {
            job_id: bonwerk_core::types::JobId::new(),
            offset: 0,
            expected: "a".into(),
            actual: "b".into(),
        };
        assert_eq!(classify_error(&err), ErrorClass::Permanent);
    }

    #[test]
    fn job_timeout_is_retried() {
        let err = BonwerkError::JobTimedOut {
            job_id: bonwerk_core::types::JobId::new(),
            after_ms: 50,
        };
        assert_eq!(classify_error(&err), ErrorClass::Transient);
    }

    #[test]
    fn delay_doubles_without_jitter() {
        let p = policy(false);
        assert_eq!(p.delay_for(0), Duration::from_millis(100));
        assert_eq!(p.delay_for(1), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(800));
    }

    #[test]
    fn delay_is_capped() {
        assert_eq!(policy(false).delay_for(10), Duration::from_millis(1_000));
        assert!(policy(true).delay_for(40) <= Duration::from_millis(1_000));
    }

    #[test]
    fn jitter_stays_below_base() {
        let p = policy(true);
        for _ in 0..50 {
            let d = p.delay_for(1);
            assert!(d >= Duration::from_millis(200));
            assert!(d < Duration::from_millis(300));
        }
    }

    #[test]
    fn retry_respects_budget() {
        let p = policy(false);
        let err = BonwerkError::TransientWrite("timeout".into());
        assert_eq!(
            p.should_retry(&err, 0),
            RetryDecision::RetryAfter(Duration::from_millis(100))
        );
        assert_eq!(p.should_retry(&err, 2), RetryDecision::Exhausted);
    }

    #[test]
    fn permanent_error_never_retries() {
        let err = BonwerkError::InvalidTemplate("unclosed section".into());
        assert_eq!(
            policy(false).should_retry(&err, 0),
            RetryDecision::GiveUp(ErrorClass::Permanent)
        );
    }
}

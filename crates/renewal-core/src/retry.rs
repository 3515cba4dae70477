//! Bounded retry for notification delivery.

use crate::notify::DeliveryError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_multiplier() -> u32 {
    2
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            multiplier: default_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: 0,
            multiplier: 1,
            max_backoff_ms: 0,
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` is 1-based.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = u64::from(self.multiplier.max(1)).saturating_pow(attempt.saturating_sub(1));
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Result of a delivery step, as recorded in the run journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    Missed { attempts: u32, reason: String },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

/// Call `send` until it succeeds, fails permanently, or the attempt budget
/// runs out. Never returns an error: giving up is an outcome.
pub fn deliver_with_retry<F>(policy: &RetryPolicy, mut send: F) -> DeliveryOutcome
where
    F: FnMut() -> Result<(), DeliveryError>,
{
    let max = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match send() {
            Ok(()) => return DeliveryOutcome::Delivered { attempts: attempt },
            Err(err @ DeliveryError::Permanent(_)) => {
                return DeliveryOutcome::Missed {
                    attempts: attempt,
                    reason: err.to_string(),
                };
            }
            Err(err) if attempt >= max => {
                return DeliveryOutcome::Missed {
                    attempts: attempt,
                    reason: format!("gave up after {attempt} attempts: {err}"),
                };
            }
            Err(err) => {
                let delay = policy.backoff(attempt);
                warn!(
                    attempt,
                    max,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "delivery failed, retrying"
                );
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff(1), Duration::from_secs(1));
        assert_eq!(p.backoff(2), Duration::from_secs(2));
        assert_eq!(p.backoff(3), Duration::from_secs(4));
        assert_eq!(p.backoff(10), Duration::from_secs(30));
        assert_eq!(p.backoff(200), Duration::from_secs(30));
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let mut calls = 0;
        let outcome = deliver_with_retry(&RetryPolicy::immediate(3), || {
            calls += 1;
            if calls < 3 {
                Err(DeliveryError::Transient("smtp timeout".into()))
            } else {
                Ok(())
            }
        });
        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 3 });
    }

    #[test]
    fn gives_up_after_budget() {
        let mut calls = 0;
        let outcome = deliver_with_retry(&RetryPolicy::immediate(3), || {
            calls += 1;
            Err(DeliveryError::Transient("connection reset".into()))
        });
        assert_eq!(calls, 3);
        match outcome {
            DeliveryOutcome::Missed { attempts, reason } => {
                assert_eq!(attempts, 3);
                assert!(reason.contains("connection reset"), "{reason}");
            }
            other => panic!("expected Missed, got {other:?}"),
        }
    }

    #[test]
    fn permanent_failure_is_not_retried() {
        let mut calls = 0;
        let outcome = deliver_with_retry(&RetryPolicy::immediate(3), || {
            calls += 1;
            Err(DeliveryError::Permanent("mailbox does not exist".into()))
        });
        assert_eq!(calls, 1);
        assert!(!outcome.is_delivered());
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let mut calls = 0;
        deliver_with_retry(&RetryPolicy::immediate(0), || {
            calls += 1;
            Ok(())
        });
        assert_eq!(calls, 1);
    }
}

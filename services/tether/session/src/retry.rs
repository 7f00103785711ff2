//! Reconnect policy: exponential backoff with a consecutive-failure cap.
//!
//! A failure before anything was ever received is treated as the peer being
//! unreachable and is not retried. Once a session has received at least one
//! message, failed attempts back off exponentially until a session ends
//! cleanly or the cap on consecutive failures is hit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::RetryError;
use crate::session::{Session, SessionConfig};

/// Reconnect tuning parameters.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Consecutive failures tolerated since the last successful receive.
    pub max_consecutive_failures: u32,
    /// First backoff delay; doubles per consecutive failure.
    pub base_backoff: Duration,
    /// Upper bound on the backoff delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 10,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before the next attempt, given the number of
    /// consecutive failures recorded so far (1-based).
    pub fn backoff_delay(&self, consecutive_failures: u32) -> Duration {
        let doublings = consecutive_failures.saturating_sub(1).min(31);
        self.base_backoff
            .saturating_mul(1u32 << doublings)
            .min(self.max_backoff)
    }
}

/// What to do after a failed attempt.
#[derive(Debug, PartialEq, Eq)]
enum RetryDecision {
    /// Wait this long, then attempt again.
    RetryAfter(Duration),
    /// The first attempt ever failed; do not retry.
    GiveUpNeverConnected,
    /// The failure cap was hit; do not retry.
    GiveUpExhausted,
}

/// Failure history carried between attempts.
#[derive(Debug, Default)]
struct RetryState {
    consecutive_failures: u32,
    has_ever_succeeded: bool,
}

impl RetryState {
    /// A message was received on the attempt's connection.
    fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.has_ever_succeeded = true;
    }

    /// The attempt ended with an error; decide whether to try again.
    fn record_failure(&mut self, policy: &RetryPolicy) -> RetryDecision {
        if self.consecutive_failures == policy.max_consecutive_failures {
            return RetryDecision::GiveUpExhausted;
        }
        if !self.has_ever_succeeded {
            return RetryDecision::GiveUpNeverConnected;
        }
        self.consecutive_failures += 1;
        RetryDecision::RetryAfter(policy.backoff_delay(self.consecutive_failures))
    }
}

/// Run sessions against `url` until one ends cleanly or policy gives up.
///
/// Attempts are strictly sequential. Returns `Ok(())` when a session ends
/// because `shutdown` fired (including while waiting between attempts);
/// otherwise the terminal policy outcome.
pub async fn run_with_retry(
    url: &str,
    config: SessionConfig,
    policy: RetryPolicy,
    shutdown: CancellationToken,
) -> Result<(), RetryError> {
    let session = Session::new(config);
    let mut state = RetryState::default();

    loop {
        let received = Arc::new(AtomicBool::new(false));
        let flag = received.clone();
        let result = session
            .run(url, shutdown.clone(), move || {
                flag.store(true, Ordering::SeqCst);
            })
            .await;

        if received.load(Ordering::SeqCst) {
            state.record_success();
        }

        let last = match result {
            Ok(()) => {
                info!("session closed cleanly");
                return Ok(());
            }
            Err(e) => e,
        };
        warn!("session ended: {}", last);

        match state.record_failure(&policy) {
            RetryDecision::GiveUpNeverConnected => {
                return Err(RetryError::NeverConnected(last));
            }
            RetryDecision::GiveUpExhausted => {
                return Err(RetryError::Exhausted {
                    failures: state.consecutive_failures,
                    last,
                });
            }
            RetryDecision::RetryAfter(delay) => {
                info!(
                    "reconnecting in {:?} (consecutive failures: {})",
                    delay, state.consecutive_failures
                );
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("shutdown while waiting to reconnect");
                        return Ok(());
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

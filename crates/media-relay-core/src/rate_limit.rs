//! Rate-limit handling
//!
//! Every outbound transport call goes through [`RateLimitGuard::call`]. A
//! required wait at or below the threshold is slept off and the same
//! operation retried; a longer one aborts the run with a failover.

use crate::config::RATE_LIMIT_BUFFER_SECS;
use crate::scan::{RunControl, ScanError};
use crate::transport::TransportError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Rate-limit waits tolerated for one operation before giving up on it
const MAX_RATE_LIMIT_WAITS: usize = 8;

/// Outcome of a rate-limit signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// Sleep this long, then retry the same operation
    Wait(Duration),
    /// Abort the run and continue on the next credential
    Failover {
        /// Wait the service asked for
        wait_secs: u64,
    },
}

/// Classifies rate-limit signals and wraps calls in a bounded retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitGuard {
    threshold_secs: u64,
    buffer: Duration,
    auto_failover: bool,
    has_alternates: bool,
}

impl RateLimitGuard {
    /// Create a guard
    #[must_use]
    pub const fn new(threshold_secs: u64, auto_failover: bool, has_alternates: bool) -> Self {
        Self {
            threshold_secs,
            buffer: Duration::from_secs(RATE_LIMIT_BUFFER_SECS),
            auto_failover,
            has_alternates,
        }
    }

    /// Decide how to react to a required wait
    #[must_use]
    pub const fn classify(&self, wait_secs: u64) -> RateLimitDecision {
        if self.auto_failover && self.has_alternates && wait_secs > self.threshold_secs {
            RateLimitDecision::Failover { wait_secs }
        } else {
            RateLimitDecision::Wait(Duration::from_secs(
                wait_secs.saturating_add(self.buffer.as_secs()),
            ))
        }
    }

    /// Run `op`, retrying after short rate limits and once after a network error
    ///
    /// # Errors
    ///
    /// - [`ScanError::Failover`] when the wait exceeds the threshold
    /// - [`ScanError::Cancelled`] when the run is cancelled while waiting
    /// - [`ScanError::Transport`] for any other failure, including a rate
    ///   limit that persists past the retry bound or a stop during a wait
    pub async fn call<T, F, Fut>(
        &self,
        control: &RunControl,
        label: &str,
        mut op: F,
    ) -> Result<T, ScanError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut waits = 0usize;
        let mut retried = false;

        loop {
            control.check_cancelled()?;

            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            match error {
                TransportError::RateLimited { wait_secs } => match self.classify(wait_secs) {
                    RateLimitDecision::Failover { wait_secs } => {
                        warn!(operation = label, wait_secs, "Rate limit above threshold, failing over");
                        return Err(ScanError::Failover { wait_secs });
                    }
                    RateLimitDecision::Wait(delay) => {
                        waits += 1;
                        if waits > MAX_RATE_LIMIT_WAITS || control.stop_requested() {
                            return Err(ScanError::Transport(error));
                        }
                        warn!(
                            operation = label,
                            wait_secs,
                            sleep_secs = delay.as_secs(),
                            "Rate limited, waiting before retry"
                        );
                        control.sleep(delay).await?;
                        if control.stop_requested() {
                            return Err(ScanError::Transport(error));
                        }
                    }
                },
                e if e.is_transient() && !retried => {
                    warn!(operation = label, error = %e, "Transient transport error, retrying once");
                    retried = true;
                }
                e => return Err(ScanError::Transport(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn classify_routes_by_threshold() {
        let guard = RateLimitGuard::new(3600, true, true);
        assert_eq!(
            guard.classify(3600),
            RateLimitDecision::Wait(Duration::from_secs(3605))
        );
        assert_eq!(
            guard.classify(3601),
            RateLimitDecision::Failover { wait_secs: 3601 }
        );

        let single = RateLimitGuard::new(3600, true, false);
        assert!(matches!(single.classify(9000), RateLimitDecision::Wait(_)));

        let disabled = RateLimitGuard::new(3600, false, true);
        assert!(matches!(disabled.classify(9000), RateLimitDecision::Wait(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn short_wait_sleeps_and_retries_same_operation() {
        let guard = RateLimitGuard::new(60, true, true);
        let control = RunControl::new();
        let calls = AtomicUsize::new(0);

        let started = tokio::time::Instant::now();
        let result = guard
            .call(&control, "test", || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(TransportError::RateLimited { wait_secs: 10 })
                } else {
                    Ok(7)
                }
            })
            .await;

        assert!(matches!(result, Ok(7)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn long_wait_fails_over_without_sleeping() {
        let guard = RateLimitGuard::new(60, true, true);
        let control = RunControl::new();

        let started = tokio::time::Instant::now();
        let result: Result<(), ScanError> = guard
            .call(&control, "test", || async {
                Err(TransportError::RateLimited { wait_secs: 61 })
            })
            .await;

        assert!(matches!(result, Err(ScanError::Failover { wait_secs: 61 })));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn network_error_is_retried_once() {
        let guard = RateLimitGuard::new(60, true, true);
        let control = RunControl::new();
        let calls = AtomicUsize::new(0);

        let result: Result<(), ScanError> = guard
            .call(&control, "test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TransportError::Network("reset".to_string()))
            })
            .await;

        assert!(matches!(
            result,
            Err(ScanError::Transport(TransportError::Network(_)))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_wait() {
        let guard = RateLimitGuard::new(60, true, true);
        let control = RunControl::new();
        let canceller = control.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            canceller.cancel();
        });

        let result: Result<(), ScanError> = guard
            .call(&control, "test", || async {
                Err(TransportError::RateLimited { wait_secs: 30 })
            })
            .await;
        assert!(matches!(result, Err(ScanError::Cancelled)));
    }
}

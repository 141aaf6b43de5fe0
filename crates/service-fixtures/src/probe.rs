//! Protocol-agnostic readiness probing.
//!
//! A freshly started container is not a reachable service: the process
//! inside may still be booting. [`wait_until_ready`] drives a
//! protocol-specific [`Prober`] under a [`ReadinessPolicy`] until the
//! service answers or the budget runs out.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{FixtureError, Result};

/// Timing policy for a readiness wait.
///
/// `initial_delay` covers the known minimum service boot time and avoids
/// wasted early attempts. The timeout clock starts after the initial delay;
/// probing stops at the timeout boundary regardless of how many attempts
/// are still notionally "due".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessPolicy {
    /// Delay before the first check
    pub initial_delay: Duration,
    /// Fixed inter-check interval
    pub interval: Duration,
    /// Total probing budget, counted from the end of the initial delay
    pub timeout: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            interval: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
        }
    }
}

impl ReadinessPolicy {
    /// Policy with the given initial delay and timeout, default interval
    pub fn new(initial_delay: Duration, timeout: Duration) -> Self {
        Self {
            initial_delay,
            timeout,
            ..Default::default()
        }
    }

    /// Override the inter-check interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// A protocol-specific reachability check.
///
/// Implementations perform exactly one attempt per call and carry their own
/// short per-attempt timeouts; the retry loop and budget live in
/// [`wait_until_ready`].
#[async_trait]
pub trait Prober: Send + Sync {
    /// Attempt one reachability check against the backing service
    async fn attempt(&self) -> anyhow::Result<()>;
}

/// Block until `prober` succeeds once, the policy's budget is exhausted, or
/// `cancel` fires.
///
/// Attempt failures are logged at debug and swallowed until the budget is
/// gone; the final [`FixtureError::ReadinessTimeout`] carries the last
/// failure as context. Each attempt additionally races the remaining
/// budget, so a hung attempt cannot push the wait past the timeout
/// boundary. Cancellation is observed at every sleep and attempt boundary
/// and surfaces as [`FixtureError::Cancelled`], never as a timeout.
pub async fn wait_until_ready(
    prober: &dyn Prober,
    policy: &ReadinessPolicy,
    cancel: &CancellationToken,
) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => return Err(FixtureError::Cancelled),
        _ = sleep(policy.initial_delay) => {}
    }

    let started = Instant::now();
    let mut last_failure: Option<anyhow::Error> = None;
    let mut attempts = 0u32;

    while started.elapsed() < policy.timeout {
        tokio::select! {
            _ = cancel.cancelled() => return Err(FixtureError::Cancelled),
            _ = sleep(policy.interval) => {}
        }
        if started.elapsed() >= policy.timeout {
            break;
        }

        attempts += 1;
        // An in-flight attempt may not outlive the budget: it races the
        // remaining time, and an overrun ends the wait at the boundary.
        let remaining = policy.timeout.saturating_sub(started.elapsed());
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(FixtureError::Cancelled),
            outcome = tokio::time::timeout(remaining, prober.attempt()) => outcome,
        };

        match outcome {
            Ok(Ok(())) => {
                debug!(attempts, elapsed = ?started.elapsed(), "service ready");
                return Ok(());
            }
            Ok(Err(err)) => {
                debug!(attempt = attempts, error = %err, "probe attempt failed");
                last_failure = Some(err);
            }
            Err(_) => {
                debug!(attempt = attempts, "probe attempt outlived the remaining budget");
                last_failure
                    .get_or_insert_with(|| anyhow::anyhow!("probe attempt ran past the timeout boundary"));
                break;
            }
        }
    }

    warn!(attempts, elapsed = ?started.elapsed(), "readiness budget exhausted");
    Err(FixtureError::ReadinessTimeout {
        elapsed: started.elapsed(),
        last_failure: last_failure.map(Into::into),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct AlwaysFails;

    #[async_trait]
    impl Prober for AlwaysFails {
        async fn attempt(&self) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }
    }

    struct ReadyAfter {
        ready_at: Instant,
        attempts: AtomicU32,
    }

    impl ReadyAfter {
        fn new(delay: Duration) -> Self {
            Self {
                ready_at: Instant::now() + delay,
                attempts: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Prober for ReadyAfter {
        async fn attempt(&self) -> anyhow::Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if Instant::now() >= self.ready_at {
                Ok(())
            } else {
                anyhow::bail!("still booting")
            }
        }
    }

    struct HangingProber;

    #[async_trait]
    impl Prober for HangingProber {
        async fn attempt(&self) -> anyhow::Result<()> {
            // A dropped SYN looks like this: the connect neither succeeds
            // nor fails.
            sleep(Duration::from_secs(600)).await;
            anyhow::bail!("woke up")
        }
    }

    struct CountingProber(AtomicU32);

    #[async_trait]
    impl Prober for CountingProber {
        async fn attempt(&self) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("never ready")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_probe_times_out_at_budget() {
        let policy = ReadinessPolicy {
            initial_delay: Duration::from_secs(1),
            interval: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
        };

        let started = Instant::now();
        let err = wait_until_ready(&AlwaysFails, &policy, &CancellationToken::new())
            .await
            .expect_err("probe can never succeed");
        let total = started.elapsed();

        // initial delay + budget, with at most one interval of slack
        assert!(total >= Duration::from_secs(31), "returned early: {total:?}");
        assert!(
            total <= Duration::from_secs(31) + Duration::from_millis(600),
            "overran the budget: {total:?}"
        );

        match err {
            FixtureError::ReadinessTimeout { last_failure, .. } => {
                let last = last_failure.expect("timeout carries the last probe failure");
                assert!(last.to_string().contains("connection refused"));
            }
            other => panic!("expected ReadinessTimeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_first_attempt_after_service_comes_up() {
        let policy = ReadinessPolicy {
            initial_delay: Duration::from_secs(1),
            interval: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
        };
        let prober = ReadyAfter::new(Duration::from_secs(5));

        let started = Instant::now();
        wait_until_ready(&prober, &policy, &CancellationToken::new())
            .await
            .expect("service came up at 5s");
        let total = started.elapsed();

        assert!(total >= Duration::from_secs(5), "ready too early: {total:?}");
        assert!(
            total <= Duration::from_secs(5) + Duration::from_millis(600),
            "missed the first post-5s attempt: {total:?}"
        );
        // attempts at 1.5s, 2.0s, ..., 5.0s: seven failures, success on the
        // eighth
        assert_eq!(prober.attempts.load(Ordering::SeqCst), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_is_distinct_from_timeout() {
        let policy = ReadinessPolicy::default();
        let cancel = CancellationToken::new();
        let child = cancel.clone();

        let wait = tokio::spawn(async move {
            wait_until_ready(&AlwaysFails, &ReadinessPolicy::default(), &child).await
        });

        sleep(Duration::from_secs(3)).await;
        cancel.cancel();

        let err = wait
            .await
            .expect("wait task")
            .expect_err("cancelled before success");
        assert!(matches!(err, FixtureError::Cancelled));
        // well inside the budget
        assert!(policy.timeout > Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_attempt_cannot_outlive_the_budget() {
        let policy = ReadinessPolicy {
            initial_delay: Duration::ZERO,
            interval: Duration::from_millis(500),
            timeout: Duration::from_secs(2),
        };

        let started = Instant::now();
        let err = wait_until_ready(&HangingProber, &policy, &CancellationToken::new())
            .await
            .expect_err("hung probe never succeeds");
        let total = started.elapsed();

        assert!(
            total >= Duration::from_secs(2),
            "returned before the budget: {total:?}"
        );
        assert!(
            total <= Duration::from_millis(2600),
            "hung past the readiness budget: {total:?}"
        );
        match err {
            FixtureError::ReadinessTimeout { last_failure, .. } => {
                assert!(last_failure.is_some(), "timeout must carry a diagnostic");
            }
            other => panic!("expected ReadinessTimeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn no_attempt_runs_past_the_budget() {
        // Budget smaller than one interval: the wait must stop at the
        // boundary without ever probing.
        let policy = ReadinessPolicy {
            initial_delay: Duration::ZERO,
            interval: Duration::from_millis(500),
            timeout: Duration::from_millis(200),
        };
        let prober = CountingProber(AtomicU32::new(0));

        let err = wait_until_ready(&prober, &policy, &CancellationToken::new())
            .await
            .expect_err("budget exhausted");

        assert!(matches!(err, FixtureError::ReadinessTimeout { .. }));
        assert_eq!(prober.0.load(Ordering::SeqCst), 0);
    }
}

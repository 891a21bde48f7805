//! Beam/condition checkers.
//!
//! A [`Checker`] decides whether the conditions for a valid measurement are
//! met (beam present, intensity above threshold, ...). Scans wait for an ok
//! before acquiring and re-check afterwards.

use async_trait::async_trait;
use eco_core::EcoError;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

/// Default interval between checker polls.
pub const CHECKER_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default time to wait for good conditions.
pub const CHECKER_TIMEOUT: Duration = Duration::from_secs(600);

/// Capability: judge measurement conditions.
#[async_trait]
pub trait Checker: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// True if conditions are currently ok.
    async fn check_now(&self) -> anyhow::Result<bool>;
}

/// Poll `checker` until it reports ok.
///
/// Fails with [`EcoError::Timeout`] if conditions stay bad for `timeout`.
pub async fn wait_for_ok(
    checker: &dyn Checker,
    poll_interval: Duration,
    timeout: Duration,
) -> anyhow::Result<()> {
    let deadline = Instant::now() + timeout;
    let mut warned = false;
    loop {
        if checker.check_now().await? {
            if warned {
                debug!(checker = %checker.name(), "Conditions ok again");
            }
            return Ok(());
        }
        if !warned {
            warn!(checker = %checker.name(), "Conditions not ok, waiting");
            warned = true;
        }
        if Instant::now() >= deadline {
            return Err(EcoError::Timeout {
                operation: format!("waiting for checker '{}'", checker.name()),
                timeout,
            }
            .into());
        }
        sleep(poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        bad_polls: AtomicU32,
    }

    #[async_trait]
    impl Checker for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn check_now(&self) -> anyhow::Result<bool> {
            let left = self.bad_polls.load(Ordering::SeqCst);
            if left == 0 {
                return Ok(true);
            }
            self.bad_polls.store(left - 1, Ordering::SeqCst);
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_wait_for_ok_after_bad_polls() {
        let checker = Flaky {
            bad_polls: AtomicU32::new(3),
        };
        wait_for_ok(&checker, Duration::from_millis(1), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(checker.bad_polls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_wait_for_ok_times_out() {
        let checker = Flaky {
            bad_polls: AtomicU32::new(u32::MAX),
        };
        let err = wait_for_ok(&checker, Duration::from_millis(1), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EcoError>(),
            Some(EcoError::Timeout { .. })
        ));
    }
}

//! Mock checker.
//!
//! Reports good or bad conditions on demand. Can start out failing a fixed
//! number of checks (beam coming back) and drop randomly at a configured
//! rate (flaky beam).

use crate::common::{MockRng, parse_config};
use anyhow::Result;
use async_trait::async_trait;
use eco_scan::{BuildContext, Capability, Checker, DeviceComponents, DriverFactory};
use futures::future::BoxFuture;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::trace;

// =============================================================================
// MockCheckerFactory - DriverFactory implementation
// =============================================================================

/// Configuration for MockChecker driver
#[derive(Debug, Clone, Deserialize)]
pub struct MockCheckerConfig {
    /// Verdict once the initial failures are used up (default: true)
    #[serde(default = "default_ok")]
    pub ok: bool,
    /// Checks answered `false` before anything else (default: 0)
    #[serde(default)]
    pub fail_first: u32,
    /// Probability of a random bad check (default: 0.0)
    #[serde(default)]
    pub drop_rate: f64,
    /// Seed for the random drops
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_ok() -> bool {
    true
}

impl Default for MockCheckerConfig {
    fn default() -> Self {
        Self {
            ok: true,
            fail_first: 0,
            drop_rate: 0.0,
            seed: None,
        }
    }
}

/// Factory for creating MockChecker instances.
pub struct MockCheckerFactory;

static MOCK_CHECKER_CAPABILITIES: &[Capability] = &[Capability::Checker];

impl DriverFactory for MockCheckerFactory {
    fn driver_type(&self) -> &'static str {
        "mock_checker"
    }

    fn name(&self) -> &'static str {
        "Mock Checker"
    }

    fn capabilities(&self) -> &'static [Capability] {
        MOCK_CHECKER_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: MockCheckerConfig = parse_config(self.driver_type(), config.clone())?;
        anyhow::ensure!(
            (0.0..=1.0).contains(&cfg.drop_rate),
            "drop_rate must lie in [0, 1]"
        );
        Ok(())
    }

    fn build(
        &self,
        ctx: BuildContext,
        config: toml::Value,
    ) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: MockCheckerConfig = parse_config("mock_checker", config)?;
            Ok(DeviceComponents {
                checker: Some(Arc::new(MockChecker::with_config(ctx.alias, cfg))),
                ..Default::default()
            })
        })
    }
}

// =============================================================================
// MockChecker
// =============================================================================

/// Simulated beam/condition checker.
#[derive(Debug)]
pub struct MockChecker {
    name: String,
    ok: AtomicBool,
    fail_remaining: AtomicU32,
    drop_rate: f64,
    rng: MockRng,
    checks: AtomicU32,
}

impl MockChecker {
    /// Checker always answering `ok`.
    pub fn new(name: impl Into<String>, ok: bool) -> Self {
        Self::with_config(
            name,
            MockCheckerConfig {
                ok,
                ..Default::default()
            },
        )
    }

    /// Checker from a parsed configuration.
    pub fn with_config(name: impl Into<String>, cfg: MockCheckerConfig) -> Self {
        Self {
            name: name.into(),
            ok: AtomicBool::new(cfg.ok),
            fail_remaining: AtomicU32::new(cfg.fail_first),
            drop_rate: cfg.drop_rate,
            rng: MockRng::new(cfg.seed),
            checks: AtomicU32::new(0),
        }
    }

    /// Answer `false` for the next `n` checks.
    #[must_use]
    pub fn failing_first(self, n: u32) -> Self {
        self.fail_remaining.store(n, Ordering::SeqCst);
        self
    }

    /// Change the steady-state verdict.
    pub fn set_ok(&self, ok: bool) {
        self.ok.store(ok, Ordering::SeqCst);
    }

    /// Checks answered so far.
    pub fn check_count(&self) -> u32 {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Checker for MockChecker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check_now(&self) -> Result<bool> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        let forced_bad = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let verdict = !forced_bad
            && self.ok.load(Ordering::SeqCst)
            && !self.rng.should_fail(self.drop_rate);
        trace!(checker = %self.name, verdict, "Checked");
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fails_first_then_ok() {
        let checker = MockChecker::new("beam", true).failing_first(2);
        assert!(!checker.check_now().await.unwrap());
        assert!(!checker.check_now().await.unwrap());
        assert!(checker.check_now().await.unwrap());
        assert_eq!(checker.check_count(), 3);
    }

    #[tokio::test]
    async fn test_set_ok_toggles() {
        let checker = MockChecker::new("beam", false);
        assert!(!checker.check_now().await.unwrap());
        checker.set_ok(true);
        assert!(checker.check_now().await.unwrap());
    }

    #[test]
    fn test_validate_drop_rate() {
        let bad: toml::Value = toml::from_str("drop_rate = 1.5").unwrap();
        assert!(MockCheckerFactory.validate(&bad).is_err());
        let good: toml::Value = toml::from_str("drop_rate = 0.2\nseed = 1").unwrap();
        assert!(MockCheckerFactory.validate(&good).is_ok());
    }
}

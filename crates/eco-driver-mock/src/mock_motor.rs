//! Mock motor.
//!
//! Moves at a constant speed; the position reads back interpolated while in
//! motion, and `stop()` freezes it wherever the motor currently is.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use eco_core::{Adjustable, Detector, Limits};
use eco_scan::{BuildContext, Capability, DeviceComponents, DriverFactory};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::{Duration, Instant, sleep};
use tracing::{debug, warn};

use crate::common::parse_config;

// =============================================================================
// MockMotorFactory - DriverFactory implementation
// =============================================================================

/// Configuration for MockMotor driver
#[derive(Debug, Clone, Deserialize)]
pub struct MockMotorConfig {
    /// Initial position (default: 0.0)
    #[serde(default)]
    pub initial_position: f64,

    /// Speed in units/sec; zero or negative moves instantly (default: 10.0)
    #[serde(default = "default_speed")]
    pub speed: f64,

    /// Lower soft limit
    #[serde(default)]
    pub low_limit: Option<f64>,

    /// Upper soft limit
    #[serde(default)]
    pub high_limit: Option<f64>,

    /// Engineering units
    #[serde(default)]
    pub units: Option<String>,
}

fn default_speed() -> f64 {
    10.0
}

impl Default for MockMotorConfig {
    fn default() -> Self {
        Self {
            initial_position: 0.0,
            speed: default_speed(),
            low_limit: None,
            high_limit: None,
            units: None,
        }
    }
}

/// Factory for creating MockMotor instances.
pub struct MockMotorFactory;

static MOCK_MOTOR_CAPABILITIES: &[Capability] = &[Capability::Adjustable, Capability::Detector];

impl DriverFactory for MockMotorFactory {
    fn driver_type(&self) -> &'static str {
        "mock_motor"
    }

    fn name(&self) -> &'static str {
        "Mock Motor"
    }

    fn capabilities(&self) -> &'static [Capability] {
        MOCK_MOTOR_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: MockMotorConfig = parse_config(self.driver_type(), config.clone())?;
        if let (Some(l), Some(h)) = (cfg.low_limit, cfg.high_limit) {
            if l > h {
                return Err(anyhow!("low_limit {l} above high_limit {h}"));
            }
        }
        Ok(())
    }

    fn build(
        &self,
        ctx: BuildContext,
        config: toml::Value,
    ) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: MockMotorConfig = parse_config("mock_motor", config)?;
            let motor = Arc::new(MockMotor::with_config(ctx.alias, cfg));
            Ok(DeviceComponents {
                adjustable: Some(motor.clone()),
                detector: Some(motor),
                ..Default::default()
            })
        })
    }
}

// =============================================================================
// Internal State
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Motion {
    id: u64,
    from: f64,
    to: f64,
    started: Instant,
    duration: Duration,
}

impl Motion {
    fn position_at(&self, now: Instant) -> f64 {
        if self.duration.is_zero() {
            return self.to;
        }
        let fraction = (now.saturating_duration_since(self.started).as_secs_f64()
            / self.duration.as_secs_f64())
        .min(1.0);
        self.from + (self.to - self.from) * fraction
    }
}

#[derive(Debug)]
struct MotorState {
    position: f64,
    motion: Option<Motion>,
    next_id: u64,
}

impl MotorState {
    fn current(&self) -> f64 {
        match &self.motion {
            Some(m) => m.position_at(Instant::now()),
            None => self.position,
        }
    }
}

// =============================================================================
// MockMotor
// =============================================================================

/// Simulated motor axis.
///
/// # Example
///
/// ```rust,ignore
/// let motor: Arc<dyn Adjustable> = Arc::new(MockMotor::new("xrd_gamma").with_speed(5.0));
/// motor.umv(10.0).await?;
/// assert_eq!(motor.wm().await?, 10.0);
/// ```
pub struct MockMotor {
    name: String,
    units: Option<String>,
    speed: f64,
    limits: Option<Limits>,
    state: Mutex<MotorState>,
    stop_signal: Notify,
}

impl MockMotor {
    /// Motor at 0.0 with default speed and no limits.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, MockMotorConfig::default())
    }

    /// Motor from a parsed configuration.
    pub fn with_config(name: impl Into<String>, cfg: MockMotorConfig) -> Self {
        let limits = match (cfg.low_limit, cfg.high_limit) {
            (None, None) => None,
            (l, h) => Some(Limits::new(
                l.unwrap_or(f64::NEG_INFINITY),
                h.unwrap_or(f64::INFINITY),
            )),
        };
        Self {
            name: name.into(),
            units: cfg.units,
            speed: cfg.speed,
            limits,
            state: Mutex::new(MotorState {
                position: cfg.initial_position,
                motion: None,
                next_id: 0,
            }),
            stop_signal: Notify::new(),
        }
    }

    /// Set speed in units/sec.
    #[must_use]
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    /// Set soft limits.
    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// True while a move is in progress.
    pub fn is_moving(&self) -> bool {
        self.state.lock().motion.is_some()
    }

    fn travel_time(&self, distance: f64) -> Result<Duration> {
        if self.speed <= 0.0 || !self.speed.is_finite() {
            return Ok(Duration::ZERO);
        }
        Duration::try_from_secs_f64(distance.abs() / self.speed).map_err(|e| {
            anyhow!(
                "'{}' cannot travel {distance} at speed {}: {e}",
                self.name,
                self.speed
            )
        })
    }
}

#[async_trait]
impl Detector for MockMotor {
    fn name(&self) -> &str {
        &self.name
    }

    fn units(&self) -> Option<&str> {
        self.units.as_deref()
    }

    async fn get_current_value(&self) -> Result<f64> {
        Ok(self.state.lock().current())
    }
}

#[async_trait]
impl Adjustable for MockMotor {
    async fn move_to(&self, value: f64) -> Result<()> {
        if let Some(limits) = &self.limits {
            limits.check(&self.name, value)?;
        }

        // Register interest before the motion becomes visible to `stop()`.
        let stopped = self.stop_signal.notified();
        tokio::pin!(stopped);
        stopped.as_mut().enable();

        let motion = {
            let mut state = self.state.lock();
            let from = state.current();
            let duration = self.travel_time(value - from)?;
            state.next_id += 1;
            let motion = Motion {
                id: state.next_id,
                from,
                to: value,
                started: Instant::now(),
                duration,
            };
            state.motion = Some(motion);
            motion
        };
        debug!(motor = %self.name, from = motion.from, to = value, ?motion.duration, "Moving");

        tokio::select! {
            () = sleep(motion.duration) => {
                let mut state = self.state.lock();
                if state.motion.map(|m| m.id) == Some(motion.id) {
                    state.position = value;
                    state.motion = None;
                }
                Ok(())
            }
            () = &mut stopped => {
                let at = self.state.lock().position;
                warn!(motor = %self.name, target = value, position = at, "Motion stopped");
                Err(anyhow!(
                    "motion of '{}' stopped at {at} before reaching {value}",
                    self.name
                ))
            }
        }
    }

    async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            let Some(motion) = state.motion.take() else {
                return Ok(());
            };
            state.position = motion.position_at(Instant::now());
        }
        self.stop_signal.notify_waiters();
        Ok(())
    }

    fn limits(&self) -> Option<Limits> {
        self.limits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eco_core::{AdjustableExt, EcoError, TaskStatus};

    #[tokio::test(start_paused = true)]
    async fn test_move_takes_distance_over_speed() {
        let motor: Arc<dyn Adjustable> = Arc::new(MockMotor::new("m").with_speed(2.0));
        let started = Instant::now();
        motor.umv(4.0).await.unwrap();
        assert_eq!(motor.wm().await.unwrap(), 4.0);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_millis(2100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_position_interpolates_and_stop_freezes() {
        let motor = Arc::new(MockMotor::new("m").with_speed(1.0));
        let adj: Arc<dyn Adjustable> = motor.clone();
        let mut changer = adj.set_target_value(10.0).unwrap();

        sleep(Duration::from_secs(4)).await;
        assert_eq!(changer.status(), TaskStatus::Changing);
        assert!(motor.is_moving());
        let mid = adj.get_current_value().await.unwrap();
        assert!((mid - 4.0).abs() < 1e-6, "mid = {mid}");

        changer.stop().await.unwrap();
        assert!(changer.wait().await.is_err());
        let frozen = adj.get_current_value().await.unwrap();
        assert!((frozen - 4.0).abs() < 1e-6);
        assert!(!motor.is_moving());
    }

    #[tokio::test]
    async fn test_unreachable_target_is_an_error() {
        let motor = Arc::new(MockMotor::new("free").with_speed(1.0));
        let adj: Arc<dyn Adjustable> = motor.clone();

        for target in [f64::INFINITY, f64::NAN, 1e30] {
            let err = adj.umv(target).await.unwrap_err();
            assert!(
                !matches!(err.downcast_ref::<EcoError>(), Some(EcoError::TaskPanicked { .. })),
                "{target}: {err}"
            );
            assert!(err.to_string().contains("cannot travel"), "{err}");
        }
        assert!(!motor.is_moving());
        assert_eq!(adj.wm().await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_limits_from_config() {
        let cfg = MockMotorConfig {
            low_limit: Some(-1.0),
            high_limit: Some(1.0),
            speed: 0.0,
            ..Default::default()
        };
        let motor: Arc<dyn Adjustable> = Arc::new(MockMotor::with_config("lim", cfg));
        let err = motor.set_target_value(5.0).err().unwrap();
        assert!(matches!(err, EcoError::LimitViolation { .. }));
        motor.umv(0.5).await.unwrap();
        assert_eq!(motor.wm().await.unwrap(), 0.5);
    }

    #[tokio::test]
    async fn test_factory_builds_from_toml() {
        let factory = MockMotorFactory;
        let cfg: toml::Value = toml::from_str("initial_position = 3.0\nspeed = 0.0").unwrap();
        factory.validate(&cfg).unwrap();
        let bad: toml::Value = toml::from_str("low_limit = 2.0\nhigh_limit = 1.0").unwrap();
        assert!(factory.validate(&bad).is_err());

        let device = factory.build(BuildContext::new("gamma"), cfg).await.unwrap();
        let adj = device.adjustable.unwrap();
        assert_eq!(adj.name(), "gamma");
        assert_eq!(adj.wm().await.unwrap(), 3.0);
        assert!(device.detector.is_some());
    }
}

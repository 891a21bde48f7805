//! Detector and Adjustable capabilities.
//!
//! Devices expose two small traits instead of one monolithic interface:
//!
//! - [`Detector`]: anything that can be read (`get_current_value`)
//! - [`Adjustable`]: a detector that can also be driven to a value
//!
//! Implementations only provide the blocking operations (`move_to` returns
//! when the device arrived). The asynchronous surface every beamline user
//! expects (`set_target_value` returning a [`Changer`], `mv`, `mvr`, `umv`,
//! `wm`) is provided once for all devices by [`AdjustableExt`].
//!
//! # Example
//!
//! ```rust,ignore
//! let motor: Arc<dyn Adjustable> = Arc::new(MockMotor::new("gamma"));
//!
//! let mut changer = motor.set_target_value(12.0)?;
//! // ... do other things while the motor moves ...
//! changer.wait().await?;
//!
//! motor.umvr(-0.5).await?;
//! println!("{}", motor.wm().await?);
//! ```

use crate::changer::Changer;
use crate::error::{EcoError, EcoResult};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Soft limits of an adjustable (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    /// Lower bound
    pub low: f64,
    /// Upper bound
    pub high: f64,
}

impl Limits {
    /// Create limits, ordering the bounds if given reversed.
    pub fn new(a: f64, b: f64) -> Self {
        Self {
            low: a.min(b),
            high: a.max(b),
        }
    }

    /// True if `value` lies within the bounds.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.low && value <= self.high
    }

    /// Reject values outside the bounds.
    pub fn check(&self, name: &str, value: f64) -> EcoResult<()> {
        if self.contains(value) {
            Ok(())
        } else {
            Err(EcoError::LimitViolation {
                name: name.to_string(),
                value,
                low: self.low,
                high: self.high,
            })
        }
    }
}

/// Capability: read a value.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Alias of the device.
    fn name(&self) -> &str;

    /// Engineering units of the value.
    fn units(&self) -> Option<&str> {
        None
    }

    /// Current value of the device.
    async fn get_current_value(&self) -> Result<f64>;
}

/// Capability: drive to a value.
///
/// # Contract
/// - `move_to` returns once the device reached the target (or failed)
/// - `stop` interrupts a running `move_to`; the default does nothing
/// - `limits` are soft limits enforced before any motion starts
#[async_trait]
pub trait Adjustable: Detector {
    /// Drive the device to `value` and return when done.
    async fn move_to(&self, value: f64) -> Result<()>;

    /// Interrupt a change in progress.
    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    /// Soft limits, if any.
    fn limits(&self) -> Option<Limits> {
        None
    }
}

/// Convenience operations on shared adjustables.
#[async_trait]
pub trait AdjustableExt {
    /// Start a change and return its handle.
    ///
    /// Fails immediately with [`EcoError::LimitViolation`] when the target is
    /// outside the soft limits.
    fn set_target_value(&self, value: f64) -> EcoResult<Changer>;

    /// Alias of [`set_target_value`](Self::set_target_value).
    fn mv(&self, value: f64) -> EcoResult<Changer> {
        self.set_target_value(value)
    }

    /// Start a change relative to the current value.
    async fn mvr(&self, delta: f64) -> Result<Changer>;

    /// Move and wait.
    async fn umv(&self, value: f64) -> Result<()>;

    /// Relative move and wait.
    async fn umvr(&self, delta: f64) -> Result<()>;

    /// Where is it: the current value.
    async fn wm(&self) -> Result<f64>;
}

#[async_trait]
impl AdjustableExt for Arc<dyn Adjustable> {
    fn set_target_value(&self, value: f64) -> EcoResult<Changer> {
        if let Some(limits) = self.limits() {
            limits.check(self.name(), value)?;
        }
        debug!(adjustable = %self.name(), target = value, "Setting target value");

        let mover = Arc::clone(self);
        let stopper = Arc::clone(self);
        Ok(
            Changer::spawn(self.name(), value, async move { mover.move_to(value).await })
                .with_stopper(Box::new(move || {
                    let device = Arc::clone(&stopper);
                    Box::pin(async move { device.stop().await })
                })),
        )
    }

    async fn mvr(&self, delta: f64) -> Result<Changer> {
        let current = self.get_current_value().await?;
        Ok(self.set_target_value(current + delta)?)
    }

    #[instrument(skip(self), fields(adjustable = %self.name()), err)]
    async fn umv(&self, value: f64) -> Result<()> {
        self.set_target_value(value)?.wait().await
    }

    #[instrument(skip(self), fields(adjustable = %self.name()), err)]
    async fn umvr(&self, delta: f64) -> Result<()> {
        self.mvr(delta).await?.wait().await
    }

    async fn wm(&self) -> Result<f64> {
        self.get_current_value().await
    }
}

/// Checked reads for detectors.
#[async_trait]
pub trait DetectorExt {
    /// Read and reject NaN or infinite values.
    async fn read_checked(&self) -> Result<f64>;
}

#[async_trait]
impl<D: Detector + ?Sized> DetectorExt for D {
    async fn read_checked(&self) -> Result<f64> {
        let value = self.get_current_value().await?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(EcoError::InvalidReading {
                name: self.name().to_string(),
                value,
            }
            .into())
        }
    }
}

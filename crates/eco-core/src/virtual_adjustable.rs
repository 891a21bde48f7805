//! Adjustables without hardware of their own.
//!
//! - [`AdjustableMemory`]: a value kept in memory (bookkeeping parameters)
//! - [`AdjustableFs`]: a value persisted to a small JSON file, surviving
//!   restarts (e.g. calibration offsets)
//! - [`AdjustableVirtual`]: a value computed from, and driving, several
//!   other adjustables
//! - [`DetectorVirtual`]: a value computed from several detectors

use crate::adjustable::{Adjustable, AdjustableExt, Detector, Limits};
use crate::changer::{Changer, wait_changers};
use crate::error::EcoError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::try_join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

// =============================================================================
// AdjustableMemory
// =============================================================================

/// Adjustable holding its value in memory.
#[derive(Debug)]
pub struct AdjustableMemory {
    name: String,
    value: RwLock<f64>,
    limits: Option<Limits>,
}

impl AdjustableMemory {
    /// Create with an initial value.
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value: RwLock::new(value),
            limits: None,
        }
    }

    /// Restrict accepted values.
    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = Some(limits);
        self
    }
}

#[async_trait]
impl Detector for AdjustableMemory {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_current_value(&self) -> Result<f64> {
        Ok(*self.value.read())
    }
}

#[async_trait]
impl Adjustable for AdjustableMemory {
    async fn move_to(&self, value: f64) -> Result<()> {
        *self.value.write() = value;
        Ok(())
    }

    fn limits(&self) -> Option<Limits> {
        self.limits
    }
}

// =============================================================================
// AdjustableFs
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct StoredValue {
    value: f64,
}

/// Adjustable persisted as `{"value": ...}` in a JSON file.
#[derive(Debug)]
pub struct AdjustableFs {
    name: String,
    path: PathBuf,
    limits: Option<Limits>,
}

impl AdjustableFs {
    /// Open the file, creating it with `default` if it does not exist.
    pub async fn open(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        default: f64,
    ) -> Result<Self> {
        let adjustable = Self {
            name: name.into(),
            path: path.into(),
            limits: None,
        };
        if !tokio::fs::try_exists(&adjustable.path).await? {
            info!(
                adjustable = %adjustable.name,
                path = %adjustable.path.display(),
                default,
                "Creating value file"
            );
            if let Some(parent) = adjustable.path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            adjustable.write_value(default).await?;
        }
        Ok(adjustable)
    }

    /// Restrict accepted values.
    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_value(&self) -> Result<f64> {
        let raw = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        let stored: StoredValue = serde_json::from_slice(&raw).map_err(EcoError::from)?;
        Ok(stored.value)
    }

    async fn write_value(&self, value: f64) -> Result<()> {
        let body = serde_json::to_vec_pretty(&StoredValue { value }).map_err(EcoError::from)?;
        tokio::fs::write(&self.path, body)
            .await
            .with_context(|| format!("writing {}", self.path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl Detector for AdjustableFs {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_current_value(&self) -> Result<f64> {
        self.read_value().await
    }
}

#[async_trait]
impl Adjustable for AdjustableFs {
    async fn move_to(&self, value: f64) -> Result<()> {
        debug!(adjustable = %self.name, value, "Persisting value");
        self.write_value(value).await
    }

    fn limits(&self) -> Option<Limits> {
        self.limits
    }
}

// =============================================================================
// AdjustableVirtual / DetectorVirtual
// =============================================================================

/// Maps input readbacks to the virtual value.
pub type ForwardFn = Box<dyn Fn(&[f64]) -> f64 + Send + Sync>;
/// Maps a virtual target to one target per input.
pub type BackwardFn = Box<dyn Fn(f64) -> Vec<f64> + Send + Sync>;

/// Adjustable composed of other adjustables.
///
/// A two-motor pseudo axis, for instance: `forward` averages the motors,
/// `backward` returns the same target for both.
pub struct AdjustableVirtual {
    name: String,
    inputs: Vec<Arc<dyn Adjustable>>,
    forward: ForwardFn,
    backward: BackwardFn,
    change_simultaneously: bool,
    limits: Option<Limits>,
}

impl AdjustableVirtual {
    /// Compose `inputs` through `forward` and `backward`.
    pub fn new(
        name: impl Into<String>,
        inputs: Vec<Arc<dyn Adjustable>>,
        forward: ForwardFn,
        backward: BackwardFn,
    ) -> Self {
        Self {
            name: name.into(),
            inputs,
            forward,
            backward,
            change_simultaneously: true,
            limits: None,
        }
    }

    /// Move inputs one after the other instead of all at once.
    #[must_use]
    pub fn sequential(mut self) -> Self {
        self.change_simultaneously = false;
        self
    }

    /// Restrict accepted virtual values.
    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Composed adjustables.
    pub fn inputs(&self) -> &[Arc<dyn Adjustable>] {
        &self.inputs
    }

    fn targets_for(&self, value: f64) -> Result<Vec<f64>> {
        let targets = (self.backward)(value);
        if targets.len() != self.inputs.len() {
            return Err(EcoError::Configuration(format!(
                "'{}' backward function returned {} targets for {} inputs",
                self.name,
                targets.len(),
                self.inputs.len()
            ))
            .into());
        }
        Ok(targets)
    }
}

#[async_trait]
impl Detector for AdjustableVirtual {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_current_value(&self) -> Result<f64> {
        let values = try_join_all(self.inputs.iter().map(|a| a.get_current_value())).await?;
        Ok((self.forward)(&values))
    }
}

#[async_trait]
impl Adjustable for AdjustableVirtual {
    async fn move_to(&self, value: f64) -> Result<()> {
        let targets = self.targets_for(value)?;
        if self.change_simultaneously {
            let mut changers = self
                .inputs
                .iter()
                .zip(&targets)
                .map(|(input, target)| input.set_target_value(*target))
                .collect::<Result<Vec<Changer>, EcoError>>()?;
            wait_changers(&mut changers).await
        } else {
            for (input, target) in self.inputs.iter().zip(targets) {
                input.set_target_value(target)?.wait().await?;
            }
            Ok(())
        }
    }

    async fn stop(&self) -> Result<()> {
        for input in &self.inputs {
            if let Err(e) = input.stop().await {
                warn!(adjustable = %input.name(), error = %e, "Stop failed");
            }
        }
        Ok(())
    }

    fn limits(&self) -> Option<Limits> {
        self.limits
    }
}

/// Detector composed of other detectors.
pub struct DetectorVirtual {
    name: String,
    inputs: Vec<Arc<dyn Detector>>,
    forward: ForwardFn,
}

impl DetectorVirtual {
    /// Compose `inputs` through `forward`.
    pub fn new(name: impl Into<String>, inputs: Vec<Arc<dyn Detector>>, forward: ForwardFn) -> Self {
        Self {
            name: name.into(),
            inputs,
            forward,
        }
    }
}

#[async_trait]
impl Detector for DetectorVirtual {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_current_value(&self) -> Result<f64> {
        let values = try_join_all(self.inputs.iter().map(|d| d.get_current_value())).await?;
        Ok((self.forward)(&values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (Arc<dyn Adjustable>, Arc<dyn Adjustable>) {
        (
            Arc::new(AdjustableMemory::new("up", 1.0)),
            Arc::new(AdjustableMemory::new("down", 3.0)),
        )
    }

    fn gap(inputs: Vec<Arc<dyn Adjustable>>) -> AdjustableVirtual {
        AdjustableVirtual::new(
            "gap",
            inputs,
            Box::new(|v: &[f64]| v[1] - v[0]),
            Box::new(|gap: f64| vec![-gap / 2.0, gap / 2.0]),
        )
    }

    #[tokio::test]
    async fn test_memory_respects_limits() {
        let mem: Arc<dyn Adjustable> =
            Arc::new(AdjustableMemory::new("n", 0.0).with_limits(Limits::new(0.0, 10.0)));
        mem.umv(4.0).await.unwrap();
        assert_eq!(mem.wm().await.unwrap(), 4.0);
        assert!(mem.set_target_value(11.0).is_err());
    }

    #[tokio::test]
    async fn test_fs_value_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offsets").join("delay.json");

        let first: Arc<dyn Adjustable> =
            Arc::new(AdjustableFs::open("delay", &path, 0.25).await.unwrap());
        assert_eq!(first.wm().await.unwrap(), 0.25);
        first.umv(1.75).await.unwrap();

        let second = AdjustableFs::open("delay", &path, 0.0).await.unwrap();
        assert_eq!(second.get_current_value().await.unwrap(), 1.75);
    }

    #[tokio::test]
    async fn test_virtual_reads_through_forward() {
        let (a, b) = pair();
        let v = gap(vec![a, b]);
        assert_eq!(v.get_current_value().await.unwrap(), 2.0);
    }

    #[tokio::test]
    async fn test_virtual_moves_inputs() {
        let (a, b) = pair();
        let v: Arc<dyn Adjustable> = Arc::new(gap(vec![a.clone(), b.clone()]));
        v.umv(6.0).await.unwrap();
        assert_eq!(a.wm().await.unwrap(), -3.0);
        assert_eq!(b.wm().await.unwrap(), 3.0);
        assert_eq!(v.wm().await.unwrap(), 6.0);
    }

    #[tokio::test]
    async fn test_virtual_sequential_mode() {
        let (a, b) = pair();
        let v: Arc<dyn Adjustable> = Arc::new(gap(vec![a, b]).sequential());
        v.umv(2.0).await.unwrap();
        assert_eq!(v.wm().await.unwrap(), 2.0);
    }

    #[tokio::test]
    async fn test_virtual_backward_arity_checked() {
        let (a, b) = pair();
        let v: Arc<dyn Adjustable> = Arc::new(AdjustableVirtual::new(
            "bad",
            vec![a, b],
            Box::new(|v: &[f64]| v[0]),
            Box::new(|x: f64| vec![x]),
        ));
        let err = v.umv(1.0).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EcoError>(),
            Some(EcoError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_detector_virtual() {
        let det = DetectorVirtual::new(
            "sum",
            vec![
                Arc::new(AdjustableMemory::new("a", 2.0)) as Arc<dyn Detector>,
                Arc::new(AdjustableMemory::new("b", 5.0)) as Arc<dyn Detector>,
            ],
            Box::new(|v: &[f64]| v.iter().sum()),
        );
        assert_eq!(det.get_current_value().await.unwrap(), 7.0);
    }
}

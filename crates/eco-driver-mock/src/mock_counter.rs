//! Mock counter.
//!
//! Samples a set of detectors once per pulse and writes the samples to
//! `<file_name>_<counter>.json`.

use crate::common::parse_config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use eco_core::Detector;
use eco_scan::{AcquisitionRequest, BuildContext, Capability, Counter, DeviceComponents, DriverFactory};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::{Duration, sleep};
use tracing::{debug, info};

// =============================================================================
// MockCounterFactory - DriverFactory implementation
// =============================================================================

/// Configuration for MockCounter driver
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MockCounterConfig {
    /// Aliases of the detectors sampled each pulse
    #[serde(default)]
    pub detectors: Vec<String>,
    /// Time between pulses in milliseconds (default: 0)
    #[serde(default)]
    pub pulse_period_ms: u64,
}

/// Factory for creating MockCounter instances.
pub struct MockCounterFactory;

static MOCK_COUNTER_CAPABILITIES: &[Capability] = &[Capability::Counter];

impl DriverFactory for MockCounterFactory {
    fn driver_type(&self) -> &'static str {
        "mock_counter"
    }

    fn name(&self) -> &'static str {
        "Mock Counter"
    }

    fn capabilities(&self) -> &'static [Capability] {
        MOCK_COUNTER_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let _: MockCounterConfig = parse_config(self.driver_type(), config.clone())?;
        Ok(())
    }

    fn build(
        &self,
        ctx: BuildContext,
        config: toml::Value,
    ) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: MockCounterConfig = parse_config("mock_counter", config)?;
            let detectors = cfg
                .detectors
                .iter()
                .map(|alias| ctx.detector(alias))
                .collect::<Result<Vec<_>>>()?;
            let counter = MockCounter::new(ctx.alias, detectors)
                .with_pulse_period(Duration::from_millis(cfg.pulse_period_ms));
            Ok(DeviceComponents {
                counter: Some(Arc::new(counter)),
                ..Default::default()
            })
        })
    }
}

// =============================================================================
// MockCounter
// =============================================================================

/// Contents of a file written by [`MockCounter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterFile {
    /// Counter alias
    pub counter: String,
    /// Pulses recorded
    pub n_pulses: u32,
    /// One sample per pulse per detector
    pub samples: BTreeMap<String, Vec<f64>>,
}

/// Simulated data acquisition system.
pub struct MockCounter {
    name: String,
    detectors: Vec<Arc<dyn Detector>>,
    pulse_period: Duration,
    acquisitions: AtomicU64,
}

impl MockCounter {
    /// Counter sampling `detectors`.
    pub fn new(name: impl Into<String>, detectors: Vec<Arc<dyn Detector>>) -> Self {
        Self {
            name: name.into(),
            detectors,
            pulse_period: Duration::ZERO,
            acquisitions: AtomicU64::new(0),
        }
    }

    /// Wait this long per pulse.
    #[must_use]
    pub fn with_pulse_period(mut self, period: Duration) -> Self {
        self.pulse_period = period;
        self
    }

    /// Acquisitions completed so far.
    pub fn acquisition_count(&self) -> u64 {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

/// `<base>_<counter>.json`, so counters sharing a step base never collide.
fn json_path(base: PathBuf, counter: &str) -> PathBuf {
    let mut name = base.into_os_string();
    name.push(format!("_{counter}.json"));
    PathBuf::from(name)
}

#[async_trait]
impl Counter for MockCounter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn acquire(&self, request: AcquisitionRequest) -> Result<Vec<PathBuf>> {
        let mut samples: BTreeMap<String, Vec<f64>> = self
            .detectors
            .iter()
            .map(|d| (d.name().to_string(), Vec::with_capacity(request.n_pulses as usize)))
            .collect();

        for _ in 0..request.n_pulses {
            if !self.pulse_period.is_zero() {
                sleep(self.pulse_period).await;
            }
            for detector in &self.detectors {
                let v = detector
                    .get_current_value()
                    .await
                    .with_context(|| format!("sampling '{}'", detector.name()))?;
                if let Some(column) = samples.get_mut(detector.name()) {
                    column.push(v);
                }
            }
        }
        self.acquisitions.fetch_add(1, Ordering::SeqCst);

        let Some(base) = request.file_name else {
            debug!(counter = %self.name, pulses = request.n_pulses, "Acquired without saving");
            return Ok(Vec::new());
        };
        let path = json_path(base, &self.name);
        let file = CounterFile {
            counter: self.name.clone(),
            n_pulses: request.n_pulses,
            samples,
        };
        tokio::fs::write(&path, serde_json::to_vec_pretty(&file)?)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        info!(counter = %self.name, path = %path.display(), pulses = request.n_pulses, "Acquisition written");
        Ok(vec![path])
    }
}

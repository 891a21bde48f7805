//! Mock detector.
//!
//! Reads a constant baseline, optionally plus a gaussian peak that follows
//! another device (a motor being scanned), plus uniform noise. Scanning the
//! linked motor across `center` produces a recognisable peak in the data.

use crate::common::{MockRng, parse_config};
use anyhow::Result;
use async_trait::async_trait;
use eco_core::Detector;
use eco_scan::{BuildContext, Capability, DeviceComponents, DriverFactory};
use futures::future::BoxFuture;
use serde::Deserialize;
use std::sync::Arc;

// =============================================================================
// MockDetectorFactory - DriverFactory implementation
// =============================================================================

/// Gaussian response to a linked device.
#[derive(Debug, Clone, Deserialize)]
pub struct PeakConfig {
    /// Alias of the device whose value drives the peak
    pub follows: String,
    /// Peak position
    #[serde(default)]
    pub center: f64,
    /// Standard deviation
    #[serde(default = "default_width")]
    pub width: f64,
    /// Height above the baseline
    #[serde(default = "default_amplitude")]
    pub amplitude: f64,
}

fn default_width() -> f64 {
    1.0
}

fn default_amplitude() -> f64 {
    1.0
}

/// Configuration for MockDetector driver
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MockDetectorConfig {
    /// Baseline reading (default: 0.0)
    #[serde(default)]
    pub baseline: f64,
    /// Uniform noise amplitude (default: 0.0)
    #[serde(default)]
    pub noise: f64,
    /// Seed for reproducible noise
    #[serde(default)]
    pub seed: Option<u64>,
    /// Engineering units
    #[serde(default)]
    pub units: Option<String>,
    /// Optional peak
    #[serde(default)]
    pub peak: Option<PeakConfig>,
}

/// Factory for creating MockDetector instances.
pub struct MockDetectorFactory;

static MOCK_DETECTOR_CAPABILITIES: &[Capability] = &[Capability::Detector];

impl DriverFactory for MockDetectorFactory {
    fn driver_type(&self) -> &'static str {
        "mock_detector"
    }

    fn name(&self) -> &'static str {
        "Mock Detector"
    }

    fn capabilities(&self) -> &'static [Capability] {
        MOCK_DETECTOR_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: MockDetectorConfig = parse_config(self.driver_type(), config.clone())?;
        if let Some(peak) = &cfg.peak {
            anyhow::ensure!(peak.width > 0.0, "peak width must be positive");
        }
        anyhow::ensure!(cfg.noise >= 0.0, "noise must not be negative");
        Ok(())
    }

    fn build(
        &self,
        ctx: BuildContext,
        config: toml::Value,
    ) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: MockDetectorConfig = parse_config("mock_detector", config)?;
            let mut detector = MockDetector::new(&ctx.alias, cfg.baseline)
                .with_noise(cfg.noise, cfg.seed);
            detector.units = cfg.units;
            if let Some(peak) = cfg.peak {
                let source = ctx.detector(&peak.follows)?;
                detector = detector.with_peak(
                    Peak {
                        center: peak.center,
                        width: peak.width,
                        amplitude: peak.amplitude,
                    },
                    source,
                );
            }
            Ok(DeviceComponents {
                detector: Some(Arc::new(detector)),
                ..Default::default()
            })
        })
    }
}

// =============================================================================
// MockDetector
// =============================================================================

/// Gaussian peak shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    /// Peak position
    pub center: f64,
    /// Standard deviation
    pub width: f64,
    /// Height
    pub amplitude: f64,
}

impl Peak {
    /// Peak value at `x`.
    pub fn at(&self, x: f64) -> f64 {
        let z = (x - self.center) / self.width;
        self.amplitude * (-0.5 * z * z).exp()
    }
}

/// Simulated scalar detector.
pub struct MockDetector {
    name: String,
    units: Option<String>,
    baseline: f64,
    noise: f64,
    rng: MockRng,
    peak: Option<(Peak, Arc<dyn Detector>)>,
}

impl MockDetector {
    /// Noise-free detector reading `baseline`.
    pub fn new(name: impl Into<String>, baseline: f64) -> Self {
        Self {
            name: name.into(),
            units: None,
            baseline,
            noise: 0.0,
            rng: MockRng::new(None),
            peak: None,
        }
    }

    /// Add uniform noise of the given amplitude.
    #[must_use]
    pub fn with_noise(mut self, amplitude: f64, seed: Option<u64>) -> Self {
        self.noise = amplitude;
        self.rng = MockRng::new(seed);
        self
    }

    /// Add a peak driven by `source`.
    #[must_use]
    pub fn with_peak(mut self, peak: Peak, source: Arc<dyn Detector>) -> Self {
        self.peak = Some((peak, source));
        self
    }
}

#[async_trait]
impl Detector for MockDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn units(&self) -> Option<&str> {
        self.units.as_deref()
    }

    async fn get_current_value(&self) -> Result<f64> {
        let mut value = self.baseline + self.rng.noise(self.noise);
        if let Some((peak, source)) = &self.peak {
            value += peak.at(source.get_current_value().await?);
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eco_core::{Adjustable, AdjustableExt, AdjustableMemory};

    #[tokio::test]
    async fn test_constant_reading() {
        let det = MockDetector::new("i0", 2.5);
        assert_eq!(det.get_current_value().await.unwrap(), 2.5);
    }

    #[tokio::test]
    async fn test_noise_stays_in_band() {
        let det = MockDetector::new("diode", 1.0).with_noise(0.1, Some(3));
        for _ in 0..100 {
            let v = det.get_current_value().await.unwrap();
            assert!((0.9..=1.1).contains(&v), "{v}");
        }
    }

    #[tokio::test]
    async fn test_peak_follows_motor() {
        let motor = Arc::new(AdjustableMemory::new("theta", 0.0));
        let peak = Peak {
            center: 5.0,
            width: 0.5,
            amplitude: 10.0,
        };
        let det = MockDetector::new("apd", 1.0).with_peak(peak, motor.clone());

        let off_peak = det.get_current_value().await.unwrap();
        assert!((off_peak - 1.0).abs() < 1e-6);

        let adj: Arc<dyn Adjustable> = motor;
        adj.umv(5.0).await.unwrap();
        assert!((det.get_current_value().await.unwrap() - 11.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_factory_resolves_linked_device() {
        let factory = MockDetectorFactory;
        let cfg: toml::Value = toml::from_str(
            r#"
            baseline = 0.5
            [peak]
            follows = "theta"
            center = 1.0
            "#,
        )
        .unwrap();
        factory.validate(&cfg).unwrap();

        let err = factory
            .build(BuildContext::new("apd"), cfg.clone())
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("theta"));

        let mut ctx = BuildContext::new("apd");
        ctx.detectors
            .insert("theta".into(), Arc::new(AdjustableMemory::new("theta", 1.0)));
        let det = factory.build(ctx, cfg).await.unwrap().detector.unwrap();
        assert!((det.get_current_value().await.unwrap() - 1.5).abs() < 1e-12);
    }
}

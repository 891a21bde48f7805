//! Driver factories.
//!
//! A [`DriverFactory`] turns a TOML device table into the capabilities the
//! device offers. A session looks factories up by the device `type` string
//! of its configuration and builds devices in configuration order, so a
//! device may refer to any device defined before it.

use crate::acquisition::Counter;
use crate::checker::Checker;
use anyhow::{Result, anyhow};
use eco_core::{Adjustable, AdjustableFs, AdjustableMemory, Detector, Limits};
use futures::future::BoxFuture;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Capability tags a factory advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Can be moved
    Adjustable,
    /// Can be read
    Detector,
    /// Records data files
    Counter,
    /// Judges measurement conditions
    Checker,
}

/// Capabilities of one built device. Unset fields are not supported.
#[derive(Default, Clone)]
pub struct DeviceComponents {
    /// Movable interface
    pub adjustable: Option<Arc<dyn Adjustable>>,
    /// Readable interface
    pub detector: Option<Arc<dyn Detector>>,
    /// Acquisition interface
    pub counter: Option<Arc<dyn Counter>>,
    /// Condition interface
    pub checker: Option<Arc<dyn Checker>>,
}

impl DeviceComponents {
    /// Capabilities actually present.
    pub fn capabilities(&self) -> Vec<Capability> {
        let mut caps = Vec::new();
        if self.adjustable.is_some() {
            caps.push(Capability::Adjustable);
        }
        if self.detector.is_some() {
            caps.push(Capability::Detector);
        }
        if self.counter.is_some() {
            caps.push(Capability::Counter);
        }
        if self.checker.is_some() {
            caps.push(Capability::Checker);
        }
        caps
    }
}

impl fmt::Debug for DeviceComponents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceComponents")
            .field("capabilities", &self.capabilities())
            .finish()
    }
}

/// What a factory gets to know about the device it builds.
#[derive(Clone, Default)]
pub struct BuildContext {
    /// Alias of the device being built
    pub alias: String,
    /// Readable devices built so far, by alias
    pub detectors: BTreeMap<String, Arc<dyn Detector>>,
}

impl BuildContext {
    /// Context for `alias` with no other devices.
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            detectors: BTreeMap::new(),
        }
    }

    /// A previously built readable device.
    pub fn detector(&self, alias: &str) -> Result<Arc<dyn Detector>> {
        self.detectors.get(alias).cloned().ok_or_else(|| {
            anyhow!(
                "device '{}' refers to unknown detector '{}'",
                self.alias,
                alias
            )
        })
    }
}

/// Builds devices of one type from configuration.
pub trait DriverFactory: Send + Sync {
    /// `type` string this factory answers to.
    fn driver_type(&self) -> &'static str;

    /// Human readable name.
    fn name(&self) -> &'static str;

    /// What the built devices can do.
    fn capabilities(&self) -> &'static [Capability];

    /// Reject a configuration without building anything.
    fn validate(&self, config: &toml::Value) -> Result<()>;

    /// Build the device described by `config`.
    fn build(
        &self,
        ctx: BuildContext,
        config: toml::Value,
    ) -> BoxFuture<'static, Result<DeviceComponents>>;
}

/// Factories keyed by driver type.
#[derive(Default)]
pub struct DriverRegistry {
    factories: HashMap<&'static str, Box<dyn DriverFactory>>,
}

impl DriverRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry knowing the `memory` and `file` adjustables.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register_factory(Box::new(MemoryAdjustableFactory));
        registry.register_factory(Box::new(FileAdjustableFactory));
        registry
    }

    /// Add a factory; a later factory replaces one with the same type.
    pub fn register_factory(&mut self, factory: Box<dyn DriverFactory>) {
        debug!(driver_type = factory.driver_type(), "Registered driver factory");
        self.factories.insert(factory.driver_type(), factory);
    }

    /// Factory for `driver_type`.
    pub fn get(&self, driver_type: &str) -> Option<&dyn DriverFactory> {
        self.factories.get(driver_type).map(|f| f.as_ref())
    }

    /// Known driver types, sorted.
    pub fn driver_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.factories.keys().copied().collect();
        types.sort_unstable();
        types
    }
}

// =============================================================================
// Built-in factories
// =============================================================================

fn limits(low: Option<f64>, high: Option<f64>) -> Option<Limits> {
    match (low, high) {
        (Some(l), Some(h)) => Some(Limits::new(l, h)),
        (Some(l), None) => Some(Limits::new(l, f64::INFINITY)),
        (None, Some(h)) => Some(Limits::new(f64::NEG_INFINITY, h)),
        (None, None) => None,
    }
}

/// Configuration of a `memory` adjustable.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryAdjustableConfig {
    /// Starting value
    #[serde(default)]
    pub value: f64,
    /// Lower limit
    #[serde(default)]
    pub low_limit: Option<f64>,
    /// Upper limit
    #[serde(default)]
    pub high_limit: Option<f64>,
}

/// Factory for in-memory adjustables.
pub struct MemoryAdjustableFactory;

static SETTABLE_CAPABILITIES: &[Capability] = &[Capability::Adjustable, Capability::Detector];

impl DriverFactory for MemoryAdjustableFactory {
    fn driver_type(&self) -> &'static str {
        "memory"
    }

    fn name(&self) -> &'static str {
        "Memory adjustable"
    }

    fn capabilities(&self) -> &'static [Capability] {
        SETTABLE_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let _: MemoryAdjustableConfig = config.clone().try_into()?;
        Ok(())
    }

    fn build(
        &self,
        ctx: BuildContext,
        config: toml::Value,
    ) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: MemoryAdjustableConfig = config.try_into()?;
            let mut adj = AdjustableMemory::new(ctx.alias, cfg.value);
            if let Some(l) = limits(cfg.low_limit, cfg.high_limit) {
                adj = adj.with_limits(l);
            }
            let adj = Arc::new(adj);
            Ok(DeviceComponents {
                adjustable: Some(adj.clone()),
                detector: Some(adj),
                ..Default::default()
            })
        })
    }
}

/// Configuration of a `file` adjustable.
#[derive(Debug, Clone, Deserialize)]
pub struct FileAdjustableConfig {
    /// JSON file holding the value
    pub path: PathBuf,
    /// Value written when the file does not exist yet
    #[serde(default)]
    pub default_value: f64,
    /// Lower limit
    #[serde(default)]
    pub low_limit: Option<f64>,
    /// Upper limit
    #[serde(default)]
    pub high_limit: Option<f64>,
}

/// Factory for file-backed adjustables.
pub struct FileAdjustableFactory;

impl DriverFactory for FileAdjustableFactory {
    fn driver_type(&self) -> &'static str {
        "file"
    }

    fn name(&self) -> &'static str {
        "File adjustable"
    }

    fn capabilities(&self) -> &'static [Capability] {
        SETTABLE_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let _: FileAdjustableConfig = config.clone().try_into()?;
        Ok(())
    }

    fn build(
        &self,
        ctx: BuildContext,
        config: toml::Value,
    ) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: FileAdjustableConfig = config.try_into()?;
            let mut adj = AdjustableFs::open(ctx.alias, cfg.path, cfg.default_value).await?;
            if let Some(l) = limits(cfg.low_limit, cfg.high_limit) {
                adj = adj.with_limits(l);
            }
            let adj = Arc::new(adj);
            Ok(DeviceComponents {
                adjustable: Some(adj.clone()),
                detector: Some(adj),
                ..Default::default()
            })
        })
    }
}

//! Session: devices built from configuration.
//!
//! A [`Session`] is what a beamline user works with: every configured
//! device, addressable by alias, plus a [`Scans`] factory preloaded with
//! the session's counters, checker and directories.

use crate::config::{DeviceDefinition, EcoConfig};
use anyhow::{Context, Result};
use eco_core::{
    Adjustable, Alias, Assembly, Detector, EcoError, EcoResult, MemberRole, Namespace,
    StatusSnapshot,
};
use eco_scan::{
    BuildContext, Checker, Counter, DeviceComponents, DriverRegistry, ScanAbort, Scans,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Registry with the built-in adjustables and every mock driver.
pub fn default_registry() -> DriverRegistry {
    let mut registry = DriverRegistry::with_builtin();
    eco_driver_mock::register_all(&mut registry);
    registry
}

struct SessionDevice {
    definition: DeviceDefinition,
    components: DeviceComponents,
}

/// Devices and scan defaults of one experiment.
pub struct Session {
    config: EcoConfig,
    namespace: Namespace,
    devices: Vec<SessionDevice>,
    index: BTreeMap<String, usize>,
    scans: Scans,
    abort: ScanAbort,
}

impl Session {
    /// Build every enabled device with the default registry.
    pub async fn from_config(config: EcoConfig) -> Result<Self> {
        Self::with_registry(config, &default_registry()).await
    }

    /// Build every enabled device with the given factories.
    #[instrument(skip_all, fields(session = %config.application.name), err)]
    pub async fn with_registry(config: EcoConfig, registry: &DriverRegistry) -> Result<Self> {
        config.validate()?;

        let mut namespace = Namespace::new();
        let mut devices = Vec::new();
        let mut index = BTreeMap::new();
        let mut detectors: BTreeMap<String, Arc<dyn Detector>> = BTreeMap::new();

        for definition in config.enabled_devices() {
            let factory = registry.get(&definition.r#type).ok_or_else(|| {
                EcoError::Configuration(format!(
                    "device '{}' has unknown type '{}' (known: {})",
                    definition.alias,
                    definition.r#type,
                    registry.driver_types().join(", ")
                ))
            })?;
            factory
                .validate(&definition.config)
                .with_context(|| format!("validating device '{}'", definition.alias))?;

            let mut alias = Alias::new(&definition.alias);
            if let Some(channel) = &definition.channel {
                alias = alias.with_channel(channel, definition.channeltype.as_deref());
            }
            namespace.register(&alias)?;

            let ctx = BuildContext {
                alias: definition.alias.clone(),
                detectors: detectors.clone(),
            };
            let components = factory
                .build(ctx, definition.config.clone())
                .await
                .with_context(|| format!("building device '{}'", definition.alias))?;
            debug!(
                alias = %definition.alias,
                driver = factory.driver_type(),
                capabilities = ?components.capabilities(),
                "Device built"
            );

            if let Some(detector) = &components.detector {
                detectors.insert(definition.alias.clone(), Arc::clone(detector));
            }
            index.insert(definition.alias.clone(), devices.len());
            devices.push(SessionDevice {
                definition: definition.clone(),
                components,
            });
        }

        let abort = ScanAbort::new();
        let scans = build_scans(&config, &devices, &index, abort.clone())?;
        info!(
            devices = devices.len(),
            counters = scans.counters().len(),
            "Session ready"
        );

        Ok(Self {
            config,
            namespace,
            devices,
            index,
            scans,
            abort,
        })
    }

    /// Configuration the session was built from.
    pub fn config(&self) -> &EcoConfig {
        &self.config
    }

    /// Every registered alias.
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Aliases in configuration order.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.devices.iter().map(|d| d.definition.alias.as_str())
    }

    fn device(&self, alias: &str) -> EcoResult<&SessionDevice> {
        self.index
            .get(alias)
            .map(|&i| &self.devices[i])
            .ok_or_else(|| EcoError::Configuration(format!("no device named '{alias}'")))
    }

    /// Movable device by alias.
    pub fn adjustable(&self, alias: &str) -> EcoResult<Arc<dyn Adjustable>> {
        self.device(alias)?
            .components
            .adjustable
            .clone()
            .ok_or_else(|| EcoError::Configuration(format!("'{alias}' cannot be moved")))
    }

    /// Readable device by alias.
    pub fn detector(&self, alias: &str) -> EcoResult<Arc<dyn Detector>> {
        self.device(alias)?
            .components
            .detector
            .clone()
            .ok_or_else(|| EcoError::Configuration(format!("'{alias}' cannot be read")))
    }

    /// Counters used by default.
    pub fn counters(&self) -> &[Arc<dyn Counter>] {
        self.scans.counters()
    }

    /// Scan factory with the session defaults.
    pub fn scans(&self) -> &Scans {
        &self.scans
    }

    /// Handle aborting the scan currently run through [`scans`](Self::scans).
    pub fn abort_handle(&self) -> ScanAbort {
        self.abort.clone()
    }

    /// Read every adjustable (as settings) and every read-only detector (as
    /// status).
    pub async fn status(&self) -> EcoResult<StatusSnapshot> {
        let mut assembly = Assembly::new("");
        for device in &self.devices {
            let alias = &device.definition.alias;
            let channel = device.definition.channel.as_deref();
            match (&device.components.adjustable, &device.components.detector) {
                (Some(adj), _) => {
                    assembly.append_adjustable(alias, Arc::clone(adj), channel, MemberRole::Setting)?
                }
                (None, Some(det)) => {
                    assembly.append_detector(alias, Arc::clone(det), channel, MemberRole::Status)?
                }
                (None, None) => {}
            }
        }
        Ok(assembly.get_status().await)
    }
}

fn build_scans(
    config: &EcoConfig,
    devices: &[SessionDevice],
    index: &BTreeMap<String, usize>,
    abort: ScanAbort,
) -> EcoResult<Scans> {
    let lookup = |alias: &str| -> EcoResult<&DeviceComponents> {
        index
            .get(alias)
            .map(|&i| &devices[i].components)
            .ok_or_else(|| EcoError::Configuration(format!("no device named '{alias}'")))
    };

    let mut scans = Scans::new(&config.scan.data_base_dir, &config.scan.scan_info_dir)
        .with_default_pulses(config.scan.default_pulses)
        .with_return_at_end(config.scan.return_at_end)
        .with_max_acquisition_repeats(config.scan.max_acquisition_repeats)
        .with_abort(abort);

    let counters: Vec<Arc<dyn Counter>> = match &config.scan.counters {
        Some(aliases) => aliases
            .iter()
            .map(|a| {
                lookup(a)?.counter.clone().ok_or_else(|| {
                    EcoError::Configuration(format!("'{a}' is not a counter"))
                })
            })
            .collect::<EcoResult<_>>()?,
        None => devices
            .iter()
            .filter_map(|d| d.components.counter.clone())
            .collect(),
    };
    for counter in counters {
        scans = scans.with_counter(counter);
    }

    for alias in &config.scan.monitors {
        let detector = lookup(alias)?.detector.clone().ok_or_else(|| {
            EcoError::Configuration(format!("monitor '{alias}' cannot be read"))
        })?;
        scans = scans.with_monitor(detector);
    }

    if let Some(alias) = &config.scan.checker {
        let checker: Arc<dyn Checker> = lookup(alias)?.checker.clone().ok_or_else(|| {
            EcoError::Configuration(format!("'{alias}' is not a checker"))
        })?;
        scans = scans.with_checker(checker);
    }

    Ok(scans)
}

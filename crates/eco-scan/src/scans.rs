//! Scan presets.
//!
//! [`Scans`] holds the session-wide scan defaults (counters, directories,
//! checker, pulses) and turns the usual beamline commands into configured
//! [`ScanSimple`] instances:
//!
//! - `ascan`: absolute, linearly spaced
//! - `dscan`: like `ascan` but relative to the current value
//! - `a2scan`: two adjustables in lockstep
//! - `ascan_list` / `rscan`: explicit (relative) value lists

use crate::acquisition::Counter;
use crate::checker::Checker;
use crate::scan_simple::{
    DEFAULT_MAX_ACQUISITION_REPEATS, ScanAbort, ScanSimple, ScanSimpleBuilder,
};
use eco_core::{Adjustable, EcoError, EcoResult};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Per-call options shared by every preset.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Scan name; generated from the adjustable names if absent
    pub file_name: Option<String>,
    /// Pulses per step; the session default if absent
    pub n_pulses: Option<u32>,
}

impl ScanOptions {
    /// Options with an explicit scan name.
    pub fn named(file_name: impl Into<String>) -> Self {
        Self {
            file_name: Some(file_name.into()),
            n_pulses: None,
        }
    }

    /// Override the pulse count.
    #[must_use]
    pub fn pulses(mut self, n_pulses: u32) -> Self {
        self.n_pulses = Some(n_pulses);
        self
    }
}

/// One scanned axis of a multi-axis preset.
#[derive(Clone)]
pub struct ScanAxis {
    /// Adjustable to drive
    pub adjustable: Arc<dyn Adjustable>,
    /// First value
    pub start: f64,
    /// Last value
    pub end: f64,
}

impl ScanAxis {
    /// Axis from `start` to `end`.
    pub fn new(adjustable: Arc<dyn Adjustable>, start: f64, end: f64) -> Self {
        Self {
            adjustable,
            start,
            end,
        }
    }
}

/// Session-wide scan factory.
#[derive(Clone)]
pub struct Scans {
    data_base_dir: PathBuf,
    scan_info_dir: PathBuf,
    default_counters: Vec<Arc<dyn Counter>>,
    monitors: Vec<Arc<dyn eco_core::Detector>>,
    checker: Option<Arc<dyn Checker>>,
    default_pulses: u32,
    return_at_end: bool,
    max_repeats: u32,
    abort: Option<ScanAbort>,
}

impl Scans {
    /// Factory writing data and logs into the given directories.
    pub fn new(data_base_dir: impl Into<PathBuf>, scan_info_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_base_dir: data_base_dir.into(),
            scan_info_dir: scan_info_dir.into(),
            default_counters: Vec::new(),
            monitors: Vec::new(),
            checker: None,
            default_pulses: 100,
            return_at_end: false,
            max_repeats: DEFAULT_MAX_ACQUISITION_REPEATS,
            abort: None,
        }
    }

    /// Record with this counter in every scan.
    #[must_use]
    pub fn with_counter(mut self, counter: Arc<dyn Counter>) -> Self {
        self.default_counters.push(counter);
        self
    }

    /// Log this detector in every step.
    #[must_use]
    pub fn with_monitor(mut self, detector: Arc<dyn eco_core::Detector>) -> Self {
        self.monitors.push(detector);
        self
    }

    /// Gate acquisitions on this checker.
    #[must_use]
    pub fn with_checker(mut self, checker: Arc<dyn Checker>) -> Self {
        self.checker = Some(checker);
        self
    }

    /// Pulses per step when a call does not specify any.
    #[must_use]
    pub fn with_default_pulses(mut self, n_pulses: u32) -> Self {
        self.default_pulses = n_pulses;
        self
    }

    /// Return adjustables to their start values after each scan.
    #[must_use]
    pub fn with_return_at_end(mut self, enabled: bool) -> Self {
        self.return_at_end = enabled;
        self
    }

    /// Acquisitions per step before failing on a bad checker.
    #[must_use]
    pub fn with_max_acquisition_repeats(mut self, repeats: u32) -> Self {
        self.max_repeats = repeats;
        self
    }

    /// Let every scan built here be aborted through `abort`.
    #[must_use]
    pub fn with_abort(mut self, abort: ScanAbort) -> Self {
        self.abort = Some(abort);
        self
    }

    /// Default counters.
    pub fn counters(&self) -> &[Arc<dyn Counter>] {
        &self.default_counters
    }

    fn builder(
        &self,
        adjustables: &[&Arc<dyn Adjustable>],
        values: Vec<Vec<f64>>,
        options: ScanOptions,
        kind: &str,
    ) -> ScanSimpleBuilder {
        let file_name = options.file_name.unwrap_or_else(|| {
            let names: Vec<&str> = adjustables.iter().map(|a| a.name()).collect();
            format!("{kind}_{}", names.join("_"))
        });
        debug!(scan = %file_name, kind, steps = values.len(), "Building scan");

        let mut builder = ScanSimple::builder(file_name)
            .values(values)
            .counters(self.default_counters.iter().cloned())
            .pulses(options.n_pulses.unwrap_or(self.default_pulses))
            .data_dir(&self.data_base_dir)
            .scan_info_dir(&self.scan_info_dir)
            .return_at_end(self.return_at_end)
            .max_acquisition_repeats(self.max_repeats);
        for adjustable in adjustables {
            builder = builder.adjustable(Arc::clone(adjustable));
        }
        for monitor in &self.monitors {
            builder = builder.monitor(Arc::clone(monitor));
        }
        if let Some(checker) = &self.checker {
            builder = builder.checker(Arc::clone(checker));
        }
        if let Some(abort) = &self.abort {
            builder = builder.abort_on(abort.clone());
        }
        builder
    }

    /// Absolute scan from `start` to `end` in `n_intervals` equal steps.
    pub async fn ascan(
        &self,
        adjustable: &Arc<dyn Adjustable>,
        start: f64,
        end: f64,
        n_intervals: usize,
        options: ScanOptions,
    ) -> EcoResult<ScanSimple> {
        let values = linspace(start, end, n_intervals)?
            .into_iter()
            .map(|v| vec![v])
            .collect();
        self.builder(&[adjustable], values, options, "ascan")
            .build()
            .await
    }

    /// Scan relative to the current value.
    pub async fn dscan(
        &self,
        adjustable: &Arc<dyn Adjustable>,
        start: f64,
        end: f64,
        n_intervals: usize,
        options: ScanOptions,
    ) -> anyhow::Result<ScanSimple> {
        let current = adjustable.get_current_value().await?;
        let values = linspace(current + start, current + end, n_intervals)?
            .into_iter()
            .map(|v| vec![v])
            .collect();
        Ok(self
            .builder(&[adjustable], values, options, "dscan")
            .build()
            .await?)
    }

    /// Two adjustables moved together, both in `n_intervals` steps.
    pub async fn a2scan(
        &self,
        first: &ScanAxis,
        second: &ScanAxis,
        n_intervals: usize,
        options: ScanOptions,
    ) -> EcoResult<ScanSimple> {
        let a = linspace(first.start, first.end, n_intervals)?;
        let b = linspace(second.start, second.end, n_intervals)?;
        let values = a.into_iter().zip(b).map(|(x, y)| vec![x, y]).collect();
        self.builder(
            &[&first.adjustable, &second.adjustable],
            values,
            options,
            "a2scan",
        )
        .build()
        .await
    }

    /// Scan through explicit absolute values.
    pub async fn ascan_list(
        &self,
        adjustable: &Arc<dyn Adjustable>,
        values: &[f64],
        options: ScanOptions,
    ) -> EcoResult<ScanSimple> {
        if values.is_empty() {
            return Err(EcoError::Configuration("empty value list".into()));
        }
        let rows = values.iter().map(|v| vec![*v]).collect();
        self.builder(&[adjustable], rows, options, "ascan_list")
            .build()
            .await
    }

    /// Scan through values relative to the current value.
    pub async fn rscan(
        &self,
        adjustable: &Arc<dyn Adjustable>,
        relative_values: &[f64],
        options: ScanOptions,
    ) -> anyhow::Result<ScanSimple> {
        let current = adjustable.get_current_value().await?;
        let absolute: Vec<f64> = relative_values.iter().map(|v| current + v).collect();
        Ok(self.ascan_list(adjustable, &absolute, options).await?)
    }
}

/// `n_intervals + 1` evenly spaced values, both ends included.
pub fn linspace(start: f64, end: f64, n_intervals: usize) -> EcoResult<Vec<f64>> {
    if n_intervals == 0 {
        return Err(EcoError::Configuration(
            "a scan needs at least one interval".into(),
        ));
    }
    let step = (end - start) / n_intervals as f64;
    Ok((0..=n_intervals)
        .map(|i| {
            if i == n_intervals {
                end
            } else {
                start + step * i as f64
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use eco_core::AdjustableMemory;

    #[test]
    fn test_linspace_includes_endpoints() {
        let v = linspace(0.0, 1.0, 4).unwrap();
        assert_eq!(v, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        let down = linspace(2.0, -2.0, 2).unwrap();
        assert_eq!(down, vec![2.0, 0.0, -2.0]);
        assert!(linspace(0.0, 1.0, 0).is_err());
    }

    #[tokio::test]
    async fn test_dscan_is_relative() {
        let dir = tempfile::tempdir().unwrap();
        let scans = Scans::new(dir.path().join("raw"), dir.path().join("scan_info"));
        let adj: Arc<dyn Adjustable> = Arc::new(AdjustableMemory::new("mono", 10.0));
        let scan = scans
            .dscan(&adj, -1.0, 1.0, 2, ScanOptions::default())
            .await
            .unwrap();
        assert_eq!(scan.file_name(), "dscan_mono");
        assert_eq!(scan.total_steps(), 3);
    }

    #[tokio::test]
    async fn test_a2scan_rows() {
        let dir = tempfile::tempdir().unwrap();
        let scans = Scans::new(dir.path(), dir.path());
        let x: Arc<dyn Adjustable> = Arc::new(AdjustableMemory::new("x", 0.0));
        let y: Arc<dyn Adjustable> = Arc::new(AdjustableMemory::new("y", 0.0));
        let mut scan = scans
            .a2scan(
                &ScanAxis::new(x.clone(), 0.0, 1.0),
                &ScanAxis::new(y.clone(), 10.0, 20.0),
                1,
                ScanOptions::named("xy"),
            )
            .await
            .unwrap();
        scan.scan_all().await.unwrap();
        assert_eq!(
            scan.scan_info().scan_values(),
            &[vec![0.0, 10.0], vec![1.0, 20.0]]
        );
        assert_eq!(scan.scan_info().scan_parameters().name, vec!["x", "y"]);
    }

    #[tokio::test]
    async fn test_ascan_list_rejects_empty() {
        let dir = tempfile::tempdir().unwrap();
        let scans = Scans::new(dir.path(), dir.path());
        let adj: Arc<dyn Adjustable> = Arc::new(AdjustableMemory::new("x", 0.0));
        assert!(scans
            .ascan_list(&adj, &[], ScanOptions::default())
            .await
            .is_err());
    }
}

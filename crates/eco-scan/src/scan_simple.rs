//! Step scan driver.
//!
//! A [`ScanSimple`] drives a list of adjustables through a table of target
//! rows. Each step:
//!
//! ```text
//!  move all adjustables ──▶ read back ──▶ checker ok? ──▶ acquire (all counters)
//!        ▲                                                      │
//!        │                       checker still ok? ◀────────────┘
//!        │                          │ no: repeat acquisition
//!        │                          ▼ yes
//!  next step ◀── callbacks ◀── write scan info ◀── read monitors
//! ```
//!
//! The scan log ([`ScanInfo`]) is rewritten after every step.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut scan = ScanSimple::builder("delay_scan")
//!     .adjustable(delay)
//!     .values((0..=10).map(|i| vec![i as f64 * 0.1]).collect())
//!     .counter(jungfrau)
//!     .pulses(200)
//!     .data_dir("/sf/bernina/data/raw")
//!     .scan_info_dir("/sf/bernina/data/res/scan_info")
//!     .build()
//!     .await?;
//!
//! scan.scan_all().await?;
//! ```

use crate::acquisition::{Acquisition, AcquisitionRequest, Counter, CounterExt};
use crate::checker::{CHECKER_POLL_INTERVAL, CHECKER_TIMEOUT, Checker, wait_for_ok};
use crate::scan_info::{ScanInfo, ScanParameters, StepInfo};
use anyhow::Context;
use chrono::Utc;
use eco_core::{
    Adjustable, AdjustableExt, Changer, Detector, DetectorExt, EcoError, EcoResult, wait_changers,
};
use futures::future::try_join_all;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Default number of acquisitions per step before giving up on the checker.
pub const DEFAULT_MAX_ACQUISITION_REPEATS: u32 = 10;

/// Callback receiving the scan log.
pub type ScanCallback = Arc<dyn Fn(&ScanInfo) -> anyhow::Result<()> + Send + Sync>;

/// Hooks run at the start of a scan, after each step and at the end.
#[derive(Clone, Default)]
pub struct ScanCallbacks {
    start_scan: Vec<ScanCallback>,
    end_step: Vec<ScanCallback>,
    end_scan: Vec<ScanCallback>,
}

/// Cloneable handle to abort a running scan between steps.
#[derive(Debug, Clone, Default)]
pub struct ScanAbort(Arc<AtomicBool>);

impl ScanAbort {
    /// Fresh, not yet requested.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the abort.
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// True once requested.
    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear a request so the handle can serve the next scan.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Builder for [`ScanSimple`].
pub struct ScanSimpleBuilder {
    file_name: String,
    adjustables: Vec<Arc<dyn Adjustable>>,
    channels: Vec<Option<String>>,
    values: Vec<Vec<f64>>,
    counters: Vec<Arc<dyn Counter>>,
    monitors: Vec<Arc<dyn Detector>>,
    n_pulses: u32,
    data_base_dir: PathBuf,
    scan_info_dir: PathBuf,
    checker: Option<Arc<dyn Checker>>,
    checker_poll: Duration,
    checker_timeout: Duration,
    max_repeats: u32,
    return_at_end: bool,
    callbacks: ScanCallbacks,
    abort: ScanAbort,
}

impl ScanSimpleBuilder {
    fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            adjustables: Vec::new(),
            channels: Vec::new(),
            values: Vec::new(),
            counters: Vec::new(),
            monitors: Vec::new(),
            n_pulses: 1,
            data_base_dir: PathBuf::from("."),
            scan_info_dir: PathBuf::from("."),
            checker: None,
            checker_poll: CHECKER_POLL_INTERVAL,
            checker_timeout: CHECKER_TIMEOUT,
            max_repeats: DEFAULT_MAX_ACQUISITION_REPEATS,
            return_at_end: false,
            callbacks: ScanCallbacks::default(),
            abort: ScanAbort::default(),
        }
    }

    /// Scan this adjustable (order matches the value rows).
    #[must_use]
    pub fn adjustable(self, adjustable: Arc<dyn Adjustable>) -> Self {
        self.adjustable_with_channel(adjustable, None)
    }

    /// Scan this adjustable and record its channel in the log.
    #[must_use]
    pub fn adjustable_with_channel(
        mut self,
        adjustable: Arc<dyn Adjustable>,
        channel: Option<String>,
    ) -> Self {
        self.adjustables.push(adjustable);
        self.channels.push(channel);
        self
    }

    /// Target rows, one per step, one value per adjustable.
    #[must_use]
    pub fn values(mut self, values: Vec<Vec<f64>>) -> Self {
        self.values = values;
        self
    }

    /// Record with this counter at every step.
    #[must_use]
    pub fn counter(mut self, counter: Arc<dyn Counter>) -> Self {
        self.counters.push(counter);
        self
    }

    /// Record with all of these counters.
    #[must_use]
    pub fn counters(mut self, counters: impl IntoIterator<Item = Arc<dyn Counter>>) -> Self {
        self.counters.extend(counters);
        self
    }

    /// Read this detector into the step info after each acquisition.
    #[must_use]
    pub fn monitor(mut self, detector: Arc<dyn Detector>) -> Self {
        self.monitors.push(detector);
        self
    }

    /// Pulses per step.
    #[must_use]
    pub fn pulses(mut self, n_pulses: u32) -> Self {
        self.n_pulses = n_pulses;
        self
    }

    /// Directory receiving the counters' files.
    #[must_use]
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_base_dir = dir.into();
        self
    }

    /// Directory receiving the scan log.
    #[must_use]
    pub fn scan_info_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scan_info_dir = dir.into();
        self
    }

    /// Gate acquisitions on this checker.
    #[must_use]
    pub fn checker(mut self, checker: Arc<dyn Checker>) -> Self {
        self.checker = Some(checker);
        self
    }

    /// Poll interval and timeout used while waiting for the checker.
    #[must_use]
    pub fn checker_timing(mut self, poll: Duration, timeout: Duration) -> Self {
        self.checker_poll = poll;
        self.checker_timeout = timeout;
        self
    }

    /// Acquisitions per step before failing on a bad checker.
    #[must_use]
    pub fn max_acquisition_repeats(mut self, repeats: u32) -> Self {
        self.max_repeats = repeats.max(1);
        self
    }

    /// Move adjustables back to their starting values after the scan.
    #[must_use]
    pub fn return_at_end(mut self, enabled: bool) -> Self {
        self.return_at_end = enabled;
        self
    }

    /// Run before the first step.
    #[must_use]
    pub fn on_start_scan(mut self, callback: ScanCallback) -> Self {
        self.callbacks.start_scan.push(callback);
        self
    }

    /// Run after each step.
    #[must_use]
    pub fn on_end_step(mut self, callback: ScanCallback) -> Self {
        self.callbacks.end_step.push(callback);
        self
    }

    /// Run after the last step (also after an abort).
    #[must_use]
    pub fn on_end_scan(mut self, callback: ScanCallback) -> Self {
        self.callbacks.end_scan.push(callback);
        self
    }

    /// Abort through an existing handle (shared with a signal handler,
    /// a callback, another scan).
    #[must_use]
    pub fn abort_on(mut self, abort: ScanAbort) -> Self {
        self.abort = abort;
        self
    }

    /// Validate and create the scan.
    ///
    /// Creates the data and scan-info directories. Refuses to reuse a file
    /// name whose scan log already exists.
    pub async fn build(self) -> EcoResult<ScanSimple> {
        if self.file_name.is_empty()
            || self.file_name.contains(std::path::MAIN_SEPARATOR)
            || self.file_name.contains('/')
        {
            return Err(EcoError::Configuration(format!(
                "invalid scan file name '{}'",
                self.file_name
            )));
        }
        if self.adjustables.is_empty() {
            return Err(EcoError::Configuration(
                "scan needs at least one adjustable".into(),
            ));
        }
        if let Some((i, row)) = self
            .values
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != self.adjustables.len())
        {
            return Err(EcoError::Configuration(format!(
                "step {i} has {} values for {} adjustables",
                row.len(),
                self.adjustables.len()
            )));
        }

        let scan_info_path = self
            .scan_info_dir
            .join(format!("{}_scan_info.json", self.file_name));
        if tokio::fs::try_exists(&scan_info_path).await? {
            return Err(EcoError::FileExists {
                path: scan_info_path,
            });
        }
        tokio::fs::create_dir_all(&self.scan_info_dir).await?;
        tokio::fs::create_dir_all(&self.data_base_dir).await?;

        let parameters = ScanParameters {
            name: self.adjustables.iter().map(|a| a.name().to_string()).collect(),
            id: self.channels,
        };
        info!(
            scan = %self.file_name,
            adjustables = ?parameters.name,
            steps = self.values.len(),
            counters = self.counters.len(),
            "Scan prepared"
        );

        Ok(ScanSimple {
            file_name: self.file_name,
            adjustables: self.adjustables,
            values: self.values,
            counters: self.counters,
            monitors: self.monitors,
            n_pulses: self.n_pulses,
            data_base_dir: self.data_base_dir,
            scan_info_path,
            checker: self.checker,
            checker_poll: self.checker_poll,
            checker_timeout: self.checker_timeout,
            max_repeats: self.max_repeats,
            return_at_end: self.return_at_end,
            callbacks: self.callbacks,
            scan_info: ScanInfo::new(parameters),
            next_step: 0,
            initial_values: None,
            abort: self.abort,
        })
    }
}

/// Step scan over one or more adjustables.
pub struct ScanSimple {
    file_name: String,
    adjustables: Vec<Arc<dyn Adjustable>>,
    values: Vec<Vec<f64>>,
    counters: Vec<Arc<dyn Counter>>,
    monitors: Vec<Arc<dyn Detector>>,
    n_pulses: u32,
    data_base_dir: PathBuf,
    scan_info_path: PathBuf,
    checker: Option<Arc<dyn Checker>>,
    checker_poll: Duration,
    checker_timeout: Duration,
    max_repeats: u32,
    return_at_end: bool,
    callbacks: ScanCallbacks,
    scan_info: ScanInfo,
    next_step: usize,
    initial_values: Option<Vec<f64>>,
    abort: ScanAbort,
}

impl ScanSimple {
    /// Start configuring a scan named `file_name`.
    pub fn builder(file_name: impl Into<String>) -> ScanSimpleBuilder {
        ScanSimpleBuilder::new(file_name)
    }

    /// Scan name, used for data and log file names.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Log written so far.
    pub fn scan_info(&self) -> &ScanInfo {
        &self.scan_info
    }

    /// Where the log is written.
    pub fn scan_info_path(&self) -> &Path {
        &self.scan_info_path
    }

    /// Steps not yet executed.
    pub fn remaining_steps(&self) -> usize {
        self.values.len().saturating_sub(self.next_step)
    }

    /// Total number of steps.
    pub fn total_steps(&self) -> usize {
        self.values.len()
    }

    /// Handle to abort this scan from another task.
    pub fn abort_handle(&self) -> ScanAbort {
        self.abort.clone()
    }

    fn step_base_name(&self, step: usize) -> PathBuf {
        self.data_base_dir
            .join(format!("{}_step{:04}", self.file_name, step))
    }

    /// Execute the next step. Returns `false` when no step is left.
    #[instrument(skip(self), fields(scan = %self.file_name, step = self.next_step), err)]
    pub async fn do_next_step(&mut self) -> anyhow::Result<bool> {
        let step = self.next_step;
        let Some(values) = self.values.get(step).cloned() else {
            debug!("No steps left");
            return Ok(false);
        };

        let mut changers = self
            .adjustables
            .iter()
            .zip(&values)
            .map(|(adj, value)| adj.set_target_value(*value))
            .collect::<EcoResult<Vec<Changer>>>()?;
        wait_changers(&mut changers)
            .await
            .with_context(|| format!("moving adjustables for step {step}"))?;

        let readbacks = try_join_all(self.adjustables.iter().map(|a| a.read_checked()))
            .await
            .context("reading back adjustables")?;

        let (files, repeats) = self.acquire_step(step).await?;
        let monitors = self.read_monitors().await;

        self.scan_info.push_step(
            values.clone(),
            readbacks.clone(),
            files,
            StepInfo {
                step,
                timestamp: Utc::now(),
                acquisition_repeats: repeats,
                monitors,
            },
        );
        self.scan_info.write_to(&self.scan_info_path).await?;
        self.next_step += 1;

        for callback in &self.callbacks.end_step {
            if let Err(e) = callback(&self.scan_info) {
                warn!(error = %e, "End-of-step callback failed");
            }
        }

        info!(
            values = ?values,
            readbacks = ?readbacks,
            remaining = self.remaining_steps(),
            "Step done"
        );
        Ok(true)
    }

    async fn acquire_step(&self, step: usize) -> anyhow::Result<(Vec<PathBuf>, u32)> {
        let base = self.step_base_name(step);
        let mut repeats = 0;
        loop {
            repeats += 1;
            if let Some(checker) = &self.checker {
                wait_for_ok(checker.as_ref(), self.checker_poll, self.checker_timeout).await?;
            }

            let mut acquisitions: Vec<Acquisition> = self
                .counters
                .iter()
                .map(|c| c.start_acquisition(AcquisitionRequest::new(base.clone(), self.n_pulses)))
                .collect();

            let mut files = Vec::new();
            let mut first_err = None;
            for acquisition in &mut acquisitions {
                let outcome = acquisition.wait().await;
                match outcome {
                    Ok(written) => files.extend(written),
                    Err(e) => {
                        error!(counter = %acquisition.name(), error = %e, "Acquisition failed");
                        first_err.get_or_insert(e);
                    }
                }
            }
            if let Some(e) = first_err {
                return Err(e.context(format!("acquisition for step {step}")));
            }
            if let Some(path) = first_duplicate(&files) {
                return Err(EcoError::DuplicateFile { step, path }.into());
            }

            let ok = match &self.checker {
                Some(checker) => checker.check_now().await?,
                None => true,
            };
            if ok {
                return Ok((files, repeats));
            }
            if repeats >= self.max_repeats {
                return Err(EcoError::CheckerFailed { step, repeats }.into());
            }
            warn!(step, repeats, "Conditions dropped during acquisition, repeating");
        }
    }

    async fn read_monitors(&self) -> BTreeMap<String, f64> {
        let mut readings = BTreeMap::new();
        for monitor in &self.monitors {
            match monitor.read_checked().await {
                Ok(v) => {
                    readings.insert(monitor.name().to_string(), v);
                }
                Err(e) => warn!(monitor = %monitor.name(), error = %e, "Monitor read failed"),
            }
        }
        readings
    }

    /// Run every remaining step.
    ///
    /// Start-scan callbacks run first (a failing one cancels the scan), the
    /// starting values are remembered, then steps run until done or
    /// aborted. End-scan callbacks and the optional return to the start
    /// values run in every case.
    #[instrument(skip(self), fields(scan = %self.file_name), err)]
    pub async fn scan_all(&mut self) -> anyhow::Result<()> {
        let initial = try_join_all(self.adjustables.iter().map(|a| a.get_current_value()))
            .await
            .context("reading starting values")?;
        self.initial_values = Some(initial);

        for callback in &self.callbacks.start_scan {
            callback(&self.scan_info).context("start-of-scan callback")?;
        }

        info!(steps = self.remaining_steps(), "Scan started");
        let result = self.run_steps().await;

        for callback in &self.callbacks.end_scan {
            if let Err(e) = callback(&self.scan_info) {
                warn!(error = %e, "End-of-scan callback failed");
            }
        }

        if self.return_at_end {
            if let Err(e) = self.return_to_start().await {
                error!(error = %e, "Could not return adjustables to starting values");
                if result.is_ok() {
                    return Err(e);
                }
            }
        }

        match &result {
            Ok(()) => info!(steps = self.scan_info.len(), "Scan finished"),
            Err(e) => warn!(steps = self.scan_info.len(), error = %e, "Scan ended early"),
        }
        result
    }

    async fn run_steps(&mut self) -> anyhow::Result<()> {
        loop {
            if self.abort.is_aborted() {
                self.stop_all().await;
                return Err(EcoError::ScanAborted {
                    file_name: self.file_name.clone(),
                    completed_steps: self.scan_info.len(),
                }
                .into());
            }
            if !self.do_next_step().await? {
                return Ok(());
            }
        }
    }

    /// Ask every adjustable to stop.
    pub async fn stop_all(&self) {
        for adjustable in &self.adjustables {
            if let Err(e) = adjustable.stop().await {
                warn!(adjustable = %adjustable.name(), error = %e, "Stop failed");
            }
        }
    }

    /// Move adjustables back to the values read when the scan started.
    pub async fn return_to_start(&self) -> anyhow::Result<()> {
        let Some(initial) = &self.initial_values else {
            return Ok(());
        };
        info!(values = ?initial, "Returning to starting values");
        let mut changers = self
            .adjustables
            .iter()
            .zip(initial)
            .map(|(adj, value)| adj.set_target_value(*value))
            .collect::<EcoResult<Vec<Changer>>>()?;
        wait_changers(&mut changers).await
    }
}

fn first_duplicate(files: &[PathBuf]) -> Option<PathBuf> {
    let mut seen = HashSet::new();
    files.iter().find(|p| !seen.insert(*p)).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use eco_core::AdjustableMemory;

    fn memory(name: &str, v: f64) -> Arc<dyn Adjustable> {
        Arc::new(AdjustableMemory::new(name, v))
    }

    /// Moves fine but reads back a fixed value.
    struct StuckReadback(f64);

    #[async_trait::async_trait]
    impl Detector for StuckReadback {
        fn name(&self) -> &str {
            "stuck"
        }

        async fn get_current_value(&self) -> anyhow::Result<f64> {
            Ok(self.0)
        }
    }

    #[async_trait::async_trait]
    impl Adjustable for StuckReadback {
        async fn move_to(&self, _value: f64) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_non_finite_readback_fails_step() {
        let dir = tempfile::tempdir().unwrap();
        let mut scan = ScanSimple::builder("nan_axis")
            .adjustable(Arc::new(StuckReadback(f64::NAN)))
            .values(vec![vec![1.0]])
            .scan_info_dir(dir.path())
            .data_dir(dir.path())
            .build()
            .await
            .unwrap();

        let err = scan.do_next_step().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EcoError>(),
            Some(EcoError::InvalidReading { name, .. }) if name == "stuck"
        ));
        assert!(scan.scan_info().is_empty());
        assert_eq!(scan.remaining_steps(), 1);
        assert!(!scan.scan_info_path().exists());
    }

    #[tokio::test]
    async fn test_non_finite_monitor_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut scan = ScanSimple::builder("monitored")
            .adjustable(memory("x", 0.0))
            .values(vec![vec![1.0]])
            .monitor(Arc::new(StuckReadback(f64::INFINITY)))
            .monitor(Arc::new(AdjustableMemory::new("i0", 42.0)))
            .scan_info_dir(dir.path())
            .data_dir(dir.path())
            .build()
            .await
            .unwrap();

        assert!(scan.do_next_step().await.unwrap());
        let monitors = &scan.scan_info().scan_step_info()[0].monitors;
        assert_eq!(monitors.get("i0"), Some(&42.0));
        assert!(!monitors.contains_key("stuck"));

        let reloaded = ScanInfo::read_from(scan.scan_info_path()).await.unwrap();
        assert_eq!(&reloaded, scan.scan_info());
    }

    #[tokio::test]
    async fn test_build_rejects_short_rows() {
        let dir = tempfile::tempdir().unwrap();
        let result = ScanSimple::builder("bad")
            .adjustable(memory("a", 0.0))
            .adjustable(memory("b", 0.0))
            .values(vec![vec![1.0, 2.0], vec![3.0]])
            .scan_info_dir(dir.path())
            .data_dir(dir.path())
            .build()
            .await;
        assert!(matches!(result, Err(EcoError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_build_rejects_missing_adjustables_and_bad_names() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ScanSimple::builder("empty")
            .scan_info_dir(dir.path())
            .build()
            .await
            .is_err());
        assert!(ScanSimple::builder("a/b")
            .adjustable(memory("a", 0.0))
            .scan_info_dir(dir.path())
            .build()
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_steps_without_counters() {
        let dir = tempfile::tempdir().unwrap();
        let adj = memory("delay", 0.0);
        let mut scan = ScanSimple::builder("plain")
            .adjustable(adj.clone())
            .values(vec![vec![1.0], vec![2.0]])
            .scan_info_dir(dir.path())
            .data_dir(dir.path())
            .build()
            .await
            .unwrap();

        assert!(scan.do_next_step().await.unwrap());
        assert_eq!(adj.wm().await.unwrap(), 1.0);
        assert!(scan.do_next_step().await.unwrap());
        assert!(!scan.do_next_step().await.unwrap());
        assert_eq!(scan.scan_info().len(), 2);
        assert!(scan.scan_info().scan_files().iter().all(Vec::is_empty));
    }

    #[tokio::test]
    async fn test_abort_before_first_step() {
        let dir = tempfile::tempdir().unwrap();
        let mut scan = ScanSimple::builder("aborted")
            .adjustable(memory("x", 0.0))
            .values(vec![vec![1.0]])
            .scan_info_dir(dir.path())
            .data_dir(dir.path())
            .build()
            .await
            .unwrap();
        scan.abort_handle().abort();
        let err = scan.scan_all().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EcoError>(),
            Some(EcoError::ScanAborted {
                completed_steps: 0,
                ..
            })
        ));
        assert_eq!(scan.remaining_steps(), 1);
    }
}

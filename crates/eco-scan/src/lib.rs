//! Scanning for eco.
//!
//! Builds on the adjustables of `eco-core`:
//!
//! - [`acquisition`]: the [`Counter`] capability and acquisition handles
//! - [`checker`]: measurement-condition gates
//! - [`scan_info`]: the per-scan JSON log
//! - [`scan_simple`]: the step scan driver
//! - [`scans`]: `ascan`/`dscan`/... presets
//! - [`driver`]: factories building devices from TOML

pub mod acquisition;
pub mod checker;
pub mod driver;
pub mod scan_info;
pub mod scan_simple;
pub mod scans;

pub use acquisition::{Acquisition, AcquisitionRequest, Counter, CounterExt};
pub use checker::{CHECKER_POLL_INTERVAL, CHECKER_TIMEOUT, Checker, wait_for_ok};
pub use driver::{BuildContext, Capability, DeviceComponents, DriverFactory, DriverRegistry};
pub use scan_info::{ScanInfo, ScanParameters, StepInfo};
pub use scan_simple::{ScanAbort, ScanCallback, ScanSimple, ScanSimpleBuilder};
pub use scans::{ScanAxis, ScanOptions, Scans, linspace};

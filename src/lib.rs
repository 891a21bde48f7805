//! eco: experiment control for photon-science beamlines
//!
//! This crate ties the workspace together:
//!
//! - [`config`]: Figment-based configuration (`config/eco.toml` + `ECO_*`)
//! - [`logging`]: tracing-subscriber setup
//! - [`session`]: devices built from configuration, scan defaults
//!
//! The building blocks live in the member crates and are re-exported here:
//! [`eco_core`] (adjustables, aliases, assemblies), [`eco_scan`] (counters,
//! checkers, scans) and [`eco_driver_mock`] (simulated devices).

pub mod config;
pub mod logging;
pub mod session;

pub use eco_core;
pub use eco_driver_mock;
pub use eco_scan;

pub use config::EcoConfig;
pub use session::Session;

//! Mock devices for eco
//!
//! Simulated hardware for running sessions and scans without a beamline.
//! All mock devices use async-safe operations (`tokio::time::sleep`, not
//! `std::thread::sleep`).
//!
//! # Available Mock Drivers
//!
//! - [`MockMotor`] - constant-speed axis with limits and stop
//! - [`MockDetector`] - baseline, optional gaussian peak following another
//!   device, uniform noise
//! - [`MockCounter`] - samples detectors per pulse into a JSON file
//! - [`MockChecker`] - scripted or randomly dropping conditions
//!
//! # Driver Factory Pattern
//!
//! ```rust,ignore
//! use eco_scan::DriverRegistry;
//!
//! let mut registry = DriverRegistry::with_builtin();
//! eco_driver_mock::register_all(&mut registry);
//! ```

pub mod common;
mod mock_checker;
mod mock_counter;
mod mock_detector;
mod mock_motor;

pub use common::MockRng;

pub use mock_checker::{MockChecker, MockCheckerConfig, MockCheckerFactory};
pub use mock_counter::{CounterFile, MockCounter, MockCounterConfig, MockCounterFactory};
pub use mock_detector::{MockDetector, MockDetectorConfig, MockDetectorFactory, Peak, PeakConfig};
pub use mock_motor::{MockMotor, MockMotorConfig, MockMotorFactory};

use eco_scan::DriverRegistry;

/// Register every mock factory.
pub fn register_all(registry: &mut DriverRegistry) {
    registry.register_factory(Box::new(MockMotorFactory));
    registry.register_factory(Box::new(MockDetectorFactory));
    registry.register_factory(Box::new(MockCounterFactory));
    registry.register_factory(Box::new(MockCheckerFactory));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_all() {
        let mut registry = DriverRegistry::with_builtin();
        register_all(&mut registry);
        assert_eq!(
            registry.driver_types(),
            vec![
                "file",
                "memory",
                "mock_checker",
                "mock_counter",
                "mock_detector",
                "mock_motor"
            ]
        );
    }
}

//! Shared pieces of the mock devices.

pub mod rng;

pub use rng::MockRng;

/// Pull a typed config out of a TOML table, naming the device on failure.
pub(crate) fn parse_config<T: serde::de::DeserializeOwned>(
    driver_type: &str,
    config: toml::Value,
) -> anyhow::Result<T> {
    config
        .try_into()
        .map_err(|e| anyhow::anyhow!("invalid {driver_type} configuration: {e}"))
}

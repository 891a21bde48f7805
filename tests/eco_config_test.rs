//! Loading session configuration from files and the environment.

use eco::config::EcoConfig;
use figment::providers::{Format, Toml};
use figment::{Figment, Jail};

const SESSION_TOML: &str = r#"
[application]
name = "jail-session"
log_level = "debug"

[scan]
default_pulses = 50
checker = "beam"

[[devices]]
alias = "theta"
type = "mock_motor"
channel = "SIM:THETA"
channeltype = "CA"

[[devices]]
alias = "beam"
type = "mock_checker"
"#;

#[test]
fn test_load_from_file() {
    Jail::expect_with(|jail| {
        jail.create_file("eco.toml", SESSION_TOML)?;

        let config = EcoConfig::load_from("eco.toml")?;
        assert_eq!(config.application.name, "jail-session");
        assert_eq!(config.application.log_format, "pretty");
        assert_eq!(config.scan.default_pulses, 50);
        assert_eq!(config.scan.max_acquisition_repeats, 10);
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.devices[0].channel.as_deref(), Some("SIM:THETA"));
        assert!(config.devices[1].config.as_table().is_some_and(|t| t.is_empty()));
        assert!(config.validate().is_ok());
        Ok(())
    });
}

#[test]
fn test_environment_overrides_file() {
    Jail::expect_with(|jail| {
        jail.create_file("eco.toml", SESSION_TOML)?;
        jail.set_env("ECO_SCAN__DEFAULT_PULSES", "500");
        jail.set_env("ECO_APPLICATION__LOG_LEVEL", "warn");

        let config = EcoConfig::load_from("eco.toml")?;
        assert_eq!(config.scan.default_pulses, 500);
        assert_eq!(config.application.log_level, "warn");
        assert_eq!(config.scan.checker.as_deref(), Some("beam"));
        Ok(())
    });
}

#[test]
fn test_missing_application_section_fails() {
    Jail::expect_with(|jail| {
        jail.create_file("eco.toml", "[scan]\ndefault_pulses = 10\n")?;
        assert!(EcoConfig::load_from("eco.toml").is_err());
        Ok(())
    });
}

#[test]
fn test_unknown_checker_fails_validation() {
    Jail::expect_with(|jail| {
        jail.create_file("eco.toml", SESSION_TOML)?;
        jail.set_env("ECO_SCAN__CHECKER", "nobody");

        let config = EcoConfig::load_from("eco.toml")?;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("nobody"));
        Ok(())
    });
}

#[test]
fn test_shipped_config_is_valid() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/eco.toml");
    let config: EcoConfig = Figment::new()
        .merge(Toml::file(path))
        .extract()
        .unwrap();

    config.validate().unwrap();
    assert_eq!(config.scan.checker.as_deref(), Some("beam_ok"));
    let enabled: Vec<_> = config.enabled_devices().map(|d| d.alias.as_str()).collect();
    assert!(enabled.contains(&"theta"));
    assert!(!enabled.contains(&"camera"));
}

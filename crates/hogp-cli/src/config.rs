//! HOGP bridge configuration management
//!
//! Configuration is layered with figment, lowest priority first:
//! - Built-in defaults
//! - A TOML file (`--config`, or `hogp-bridge.toml` in the working directory)
//! - Environment variables prefixed `HOGP_`, nested with `__`
//!   (e.g. `HOGP_BRIDGE__LOCAL_NAME`)
//! - Command line flags

use std::path::Path;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use hogp_ble::{BlueZConfig, PairingMode};
use hogp_core::{AdvertisingPolicy, BridgeConfig, DeviceInfo, PnpId};

/// File merged when no `--config` is given
pub const DEFAULT_CONFIG_FILE: &str = "hogp-bridge.toml";

// ----------------------------------------------------------------------------
// Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the bridge binary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Bridge behaviour and GATT-visible device information
    pub bridge: BridgeConfig,
    /// BlueZ adapter and pairing settings
    pub bluez: BlueZConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `RUST_LOG`-style filter used when no `-v` flag is given
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Values given as command line flags
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub adapter_id: Option<String>,
    pub local_name: Option<String>,
}

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Layered figment for `path` (or the default file) and the environment
    pub fn figment(path: Option<&Path>) -> Figment {
        let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed("HOGP_").split("__"))
    }

    /// Load and validate the configuration
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::Loading(format!(
                    "Configuration file {} not found",
                    path.display()
                )));
            }
        }

        let mut figment = Self::figment(path);
        if let Some(adapter_id) = &overrides.adapter_id {
            figment = figment.merge(("bluez.adapter_id", adapter_id));
        }
        if let Some(local_name) = &overrides.local_name {
            figment = figment.merge(("bridge.local_name", local_name));
        }

        let config: AppConfig = figment
            .extract()
            .map_err(|e| ConfigError::Loading(format!("Failed to load configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bridge
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        self.bluez
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        EnvFilter::try_new(&self.logging.level).map_err(|e| {
            ConfigError::Validation(format!("Invalid log level '{}': {}", self.logging.level, e))
        })?;
        Ok(())
    }

    /// Create example configuration file content
    pub fn example_config() -> Result<String, toml::ser::Error> {
        let example = AppConfig {
            bridge: BridgeConfig::new()
                .with_local_name("Desk Keyboard")
                .with_advertising_policy(AdvertisingPolicy::ResumeOnDisconnect)
                .with_device_info(DeviceInfo {
                    manufacturer: "Example Labs".to_string(),
                    model: "hogp-bridge".to_string(),
                    firmware_revision: env!("CARGO_PKG_VERSION").to_string(),
                    pnp_id: PnpId {
                        vendor_id: 0x1209,
                        product_id: 0x0001,
                        ..Default::default()
                    },
                }),
            bluez: BlueZConfig::new()
                .with_adapter_id("hci0")
                .with_pairing_mode(PairingMode::Interactive),
            logging: LoggingConfig::default(),
        };
        toml::to_string_pretty(&example)
    }
}

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration loading error: {0}")]
    Loading(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use hogp_core::ReportSecurity;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bluez.adapter_id, "hci0");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.bridge.local_name = String::new();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let mut config = AppConfig::default();
        config.bridge.advertising_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.logging.level = "hogp=loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_env_and_flags_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "bridge.toml",
                r#"
                [bridge]
                local_name = "From File"
                advertising_timeout_secs = 120
                report_security = "encrypted"

                [bluez]
                adapter_id = "hci1"
                pairing_mode = "no_input_no_output"
                "#,
            )?;
            jail.set_env("HOGP_BRIDGE__ADVERTISING_TIMEOUT_SECS", "30");
            jail.set_env("HOGP_LOGGING__LEVEL", "debug");

            let overrides = Overrides {
                adapter_id: Some("hci2".to_string()),
                local_name: None,
            };
            let config = AppConfig::load(Some(Path::new("bridge.toml")), &overrides)
                .map_err(|e| e.to_string())?;

            assert_eq!(config.bridge.local_name, "From File");
            assert_eq!(config.bridge.advertising_timeout_secs, 30);
            assert_eq!(config.bridge.report_security, ReportSecurity::Encrypted);
            assert_eq!(config.bluez.adapter_id, "hci2");
            assert_eq!(config.bluez.pairing_mode, PairingMode::NoInputNoOutput);
            assert_eq!(config.logging.level, "debug");
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        Jail::expect_with(|_jail| {
            let result = AppConfig::load(Some(Path::new("absent.toml")), &Overrides::default());
            assert!(matches!(result, Err(ConfigError::Loading(_))));
            Ok(())
        });
    }

    #[test]
    fn test_default_file_is_optional() {
        Jail::expect_with(|_jail| {
            let config = AppConfig::load(None, &Overrides::default()).map_err(|e| e.to_string())?;
            assert_eq!(config, AppConfig::default());
            Ok(())
        });
    }

    #[test]
    fn test_example_config_round_trips() {
        let example = AppConfig::example_config().unwrap();
        assert!(example.contains("[bridge]"));
        assert!(example.contains("[bluez]"));
        assert!(example.contains("[logging]"));

        let parsed: AppConfig = toml::from_str(&example).unwrap();
        assert_eq!(parsed.bridge.local_name, "Desk Keyboard");
        assert_eq!(parsed.bridge.device_info.pnp_id.vendor_id, 0x1209);
        assert!(parsed.validate().is_ok());
    }
}

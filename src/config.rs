//! Configuration using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. built-in defaults
//! 2. an optional TOML file (e.g. `config/default.toml`)
//! 3. environment variables prefixed with `SIGGEN_`
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated with a double underscore:
//!
//! ```text
//! SIGGEN_LOG_LEVEL=debug
//! SIGGEN_TRANSPORT__RESOURCE="TCPIP0::192.168.1.100::INSTR"
//! SIGGEN_DISPATCH__DEBOUNCE_MS=250
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigGenConfig {
    /// Logging level (trace, debug, info, warn, error) or a full filter directive.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Transport session settings.
    #[serde(default)]
    pub transport: TransportConfig,
    /// Debounced dispatcher settings.
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

/// Transport session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Resource to connect to when none is given explicitly.
    #[serde(default)]
    pub resource: Option<String>,
    /// Appended to every command.
    #[serde(default = "default_line_terminator")]
    pub line_terminator: String,
    /// Maximum response size in bytes.
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// I/O timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Discovery filter.
    #[serde(default = "default_resource_filter")]
    pub resource_filter: String,
    /// Number of output channels on the instrument.
    #[serde(default = "default_channel_count")]
    pub channel_count: u8,
}

/// Debounced dispatcher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Quiet period after the last edit before a field is applied.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl DispatchConfig {
    /// Debounce delay as a duration.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_line_terminator() -> String {
    "\n".to_string()
}

fn default_read_buffer_size() -> usize {
    1024
}

fn default_timeout_ms() -> u64 {
    2000
}

fn default_resource_filter() -> String {
    "?*INSTR".to_string()
}

fn default_channel_count() -> u8 {
    2
}

fn default_debounce_ms() -> u64 {
    500
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            resource: None,
            line_terminator: default_line_terminator(),
            read_buffer_size: default_read_buffer_size(),
            timeout_ms: default_timeout_ms(),
            resource_filter: default_resource_filter(),
            channel_count: default_channel_count(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl Default for SigGenConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            transport: TransportConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl SigGenConfig {
    /// Prefix of environment overrides.
    pub const ENV_PREFIX: &'static str = "SIGGEN_";

    /// Load defaults overlaid with the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::figment(None).extract::<Self>()?.validated()
    }

    /// Load defaults, then `path`, then the environment.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::figment(Some(path.as_ref()))
            .extract::<Self>()?
            .validated()
    }

    /// Render the configuration as a TOML document `load_from` accepts.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::new();
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(Self::ENV_PREFIX).split("__"))
    }

    fn validated(self) -> Result<Self, ConfigError> {
        self.validate()?;
        Ok(self)
    }

    /// Check semantic constraints that parsing cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transport.read_buffer_size == 0 {
            return Err(ConfigError::Validation(
                "transport.read_buffer_size must be greater than zero".to_string(),
            ));
        }
        if self.transport.line_terminator.is_empty() {
            return Err(ConfigError::Validation(
                "transport.line_terminator must not be empty".to_string(),
            ));
        }
        if self.transport.channel_count == 0 {
            return Err(ConfigError::Validation(
                "transport.channel_count must be at least 1".to_string(),
            ));
        }
        if self.dispatch.debounce_ms == 0 {
            return Err(ConfigError::Validation(
                "dispatch.debounce_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        let config = SigGenConfig::default();
        assert_eq!(config.transport.read_buffer_size, 1024);
        assert_eq!(config.dispatch.debounce(), Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "siggen.toml",
                r#"
log_level = "debug"

[transport]
resource = "TCPIP0::192.168.1.100::INSTR"
timeout_ms = 500

[dispatch]
debounce_ms = 250
"#,
            )?;

            let config = SigGenConfig::load_from("siggen.toml").unwrap();
            assert_eq!(config.log_level, "debug");
            assert_eq!(
                config.transport.resource.as_deref(),
                Some("TCPIP0::192.168.1.100::INSTR")
            );
            assert_eq!(config.transport.timeout_ms, 500);
            assert_eq!(config.transport.line_terminator, "\n");
            assert_eq!(config.dispatch.debounce_ms, 250);
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("siggen.toml", "[dispatch]\ndebounce_ms = 250\n")?;
            jail.set_env("SIGGEN_DISPATCH__DEBOUNCE_MS", "75");
            jail.set_env("SIGGEN_TRANSPORT__CHANNEL_COUNT", "4");

            let config = SigGenConfig::load_from("siggen.toml").unwrap();
            assert_eq!(config.dispatch.debounce_ms, 75);
            assert_eq!(config.transport.channel_count, 4);
            Ok(())
        });
    }

    #[test]
    fn test_effective_config_round_trips_through_toml() {
        Jail::expect_with(|jail| {
            jail.set_env("SIGGEN_DISPATCH__DEBOUNCE_MS", "250");
            jail.set_env("SIGGEN_TRANSPORT__RESOURCE", "TCPIP0::10.0.0.7::INSTR");

            let config = SigGenConfig::load().unwrap();
            let text = config.to_toml().unwrap();
            assert!(text.contains("[transport]"));
            assert!(text.contains("debounce_ms = 250"));
            assert!(text.contains("resource = \"TCPIP0::10.0.0.7::INSTR\""));

            jail.create_file("effective.toml", &text)?;
            assert_eq!(SigGenConfig::load_from("effective.toml").unwrap(), config);
            Ok(())
        });
    }

    #[test]
    fn test_validation_rejects_zero_buffer() {
        let mut config = SigGenConfig::default();
        config.transport.read_buffer_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(msg)) if msg.contains("read_buffer_size")
        ));
    }
}

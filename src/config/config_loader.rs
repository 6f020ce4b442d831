/// Configuration file loader for uart_bridge
use std::path::{Path, PathBuf};

use ::config::{Config, Environment, File, FileFormat};
use tracing::info;

use crate::config::{BridgeServerConfig, ConfigError};

/// Prefix of environment variable overrides, e.g. `UART_BRIDGE__SERVER__COMMAND_ADDR`
const ENV_PREFIX: &str = "UART_BRIDGE";

/// Configuration loader responsible for loading and parsing configuration files
pub struct ConfigLoader;

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self
    }

    /// Load configuration from a file layered with environment overrides.
    ///
    /// An explicit path must exist. Without one, `config.toml` in the
    /// working directory is used when present and defaults otherwise.
    pub fn load_config(&self, config_path: Option<&Path>) -> Result<BridgeServerConfig, ConfigError> {
        let mut builder = Config::builder();

        match config_path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::FileNotFound(path.display().to_string()));
                }
                info!("Loading configuration from file: {:?}", path);
                builder = builder.add_source(File::from(path.to_path_buf()).format(FileFormat::Toml));
            }
            None => match default_config_path() {
                Some(path) if path.exists() => {
                    info!("Using default configuration file path: {:?}", path);
                    builder = builder.add_source(File::from(path).format(FileFormat::Toml));
                }
                _ => info!("No configuration file found, using defaults"),
            },
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<BridgeServerConfig>()?;

        self.validate(config)
    }

    /// Parse configuration from string content
    pub fn parse_config(&self, content: &str) -> Result<BridgeServerConfig, ConfigError> {
        let config = toml::from_str::<BridgeServerConfig>(content)?;
        info!("Configuration parsed successfully");
        self.validate(config)
    }

    fn validate(&self, config: BridgeServerConfig) -> Result<BridgeServerConfig, ConfigError> {
        if config.uart.device_count == 0 {
            return Err(ConfigError::InvalidStructure(
                "uart.device_count must be at least 1".to_string(),
            ));
        }
        if config.bridge.frame_capacity < 2 {
            return Err(ConfigError::InvalidStructure(
                "bridge.frame_capacity must hold the marker byte and payload".to_string(),
            ));
        }
        if config.bridge.inbound_capacity == 0 {
            return Err(ConfigError::InvalidStructure(
                "bridge.inbound_capacity must be at least 1".to_string(),
            ));
        }
        if config.bridge.receive_timeout_ms <= config.bridge.dead_transport_threshold_ms {
            // Otherwise every genuine timeout would look like a dead socket
            return Err(ConfigError::InvalidStructure(
                "bridge.receive_timeout_ms must exceed bridge.dead_transport_threshold_ms"
                    .to_string(),
            ));
        }
        Ok(config)
    }
}

/// Default configuration path
pub fn default_config_path() -> Option<PathBuf> {
    // 使用当前工作目录作为默认配置文件目录
    std::env::current_dir().ok().map(|dir| dir.join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;

    #[test]
    fn empty_document_yields_defaults() {
        let config = ConfigLoader::new().parse_config("").unwrap();
        assert_eq!(config.uart.device_count, 4);
        assert_eq!(config.uart.backend, BackendKind::Memory);
        assert_eq!(config.bridge.marker_byte, b'+');
        assert_eq!(config.bridge.poll_interval_ms, 5000);
        assert_eq!(config.bridge.settle_delay_ms, 90);
        assert_eq!(config.server.command_addr, "0.0.0.0:5000");
    }

    #[test]
    fn sections_override_defaults() {
        let content = r#"
            [uart]
            device_count = 2
            backend = "serial"
            ports = [{ device = 0, path = "/dev/ttyS1" }]

            [bridge]
            poll_interval_ms = 100
            receive_timeout_ms = 50

            [logging]
            json = true
        "#;
        let config = ConfigLoader::new().parse_config(content).unwrap();
        assert_eq!(config.uart.device_count, 2);
        assert_eq!(config.uart.backend, BackendKind::Serial);
        assert_eq!(config.uart.ports[0].path, "/dev/ttyS1");
        assert_eq!(config.bridge.poll_interval_ms, 100);
        assert_eq!(config.bridge.settle_delay_ms, 90);
        assert!(config.logging.json);
    }

    #[test]
    fn malformed_document_is_a_parse_error() {
        let result = ConfigLoader::new().parse_config("[uart\ndevice_count = ");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn threshold_must_stay_below_receive_timeout() {
        let content = r#"
            [bridge]
            receive_timeout_ms = 5
            dead_transport_threshold_ms = 5
        "#;
        let result = ConfigLoader::new().parse_config(content);
        assert!(matches!(result, Err(ConfigError::InvalidStructure(_))));
    }

    #[test]
    fn missing_explicit_file_is_reported() {
        let result = ConfigLoader::new().load_config(Some(Path::new("/nonexistent/bridge.toml")));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }
}

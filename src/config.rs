//! # Configuration Management
//!
//! Centralized configuration for the connection engine.
//!
//! This module provides structured configuration for the engine (listener,
//! pool sizes, timeouts) and for logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()` (`PEERLINK_*` variables)
//!
//! ## Defaults
//! - Handshake inactivity timeout of 1000 ms closes frozen handshakes
//! - Poll timeout of 1 ms keeps `process` responsive
//! - 4096 registry buckets

use crate::core::message::{DEFAULT_MESSAGE_CAPACITY, DEFAULT_POOL_SIZE};
use crate::core::registry::DEFAULT_BUCKET_COUNT;
use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default listen port
pub const DEFAULT_LISTEN_PORT: u16 = 3823;

/// Default connection pool size
pub const DEFAULT_MAX_OPEN: usize = 64;

/// Default inactivity limit for connections that are not yet open
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default readiness poll timeout
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(1);

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(port) = std::env::var("PEERLINK_LISTEN_PORT") {
            config.engine.listen_port = port.parse::<u16>().map_err(|e| {
                ProtocolError::ConfigError(format!("Invalid PEERLINK_LISTEN_PORT '{port}': {e}"))
            })?;
        }

        if let Ok(addr) = std::env::var("PEERLINK_BIND_ADDRESS") {
            config.engine.bind_address = addr;
        }

        if let Ok(name) = std::env::var("PEERLINK_SOCKET_NAME") {
            config.engine.socket_name = name;
        }

        if let Ok(max_open) = std::env::var("PEERLINK_MAX_OPEN") {
            if let Ok(val) = max_open.parse::<usize>() {
                config.engine.max_open = val;
            }
        }

        if let Ok(timeout) = std::env::var("PEERLINK_HANDSHAKE_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.engine.handshake_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(timeout) = std::env::var("PEERLINK_POLL_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.engine.poll_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(level) = std::env::var("PEERLINK_LOG_LEVEL") {
            config.logging.log_level = level.parse::<Level>().map_err(|_| {
                ProtocolError::ConfigError(format!("Invalid PEERLINK_LOG_LEVEL '{level}'"))
            })?;
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.engine.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Port to listen on (0 picks an ephemeral port)
    pub listen_port: u16,

    /// Address the listener binds to
    pub bind_address: String,

    /// Human-readable socket name; also seeds the identity when none is given
    pub socket_name: String,

    /// Connection pool size
    pub max_open: usize,

    /// Number of pooled messages
    pub message_pool_size: usize,

    /// Payload capacity of each pooled message
    pub message_capacity: usize,

    /// Inactivity limit for connections that are not yet open
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,

    /// Readiness poll timeout per `process` call
    #[serde(with = "duration_serde")]
    pub poll_timeout: Duration,

    /// Maximum readiness events handled per poll
    pub poll_capacity: usize,

    /// Address registry bucket count (power of two)
    pub registry_buckets: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_LISTEN_PORT,
            bind_address: String::from("0.0.0.0"),
            socket_name: String::from("peerlink"),
            max_open: DEFAULT_MAX_OPEN,
            message_pool_size: DEFAULT_POOL_SIZE,
            message_capacity: DEFAULT_MESSAGE_CAPACITY,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            poll_capacity: 256,
            registry_buckets: DEFAULT_BUCKET_COUNT,
        }
    }
}

impl EngineConfig {
    /// Capacity bounds the engine cannot run without: room for one identity
    /// message, and a payload length that fits the 32-bit frame header.
    pub fn message_capacity_problem(&self) -> Option<String> {
        let minimum = crate::protocol::handshake::HANDSHAKE_PAYLOAD_SIZE;
        if self.message_capacity < minimum {
            Some(format!(
                "Message capacity too small: {} bytes (minimum: {})",
                self.message_capacity, minimum
            ))
        } else if u32::try_from(self.message_capacity).is_err() {
            Some("Message capacity cannot exceed the 32-bit frame length".to_string())
        } else {
            None
        }
    }

    /// Validate engine configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        // Validate bind address
        if self.bind_address.is_empty() {
            errors.push("Bind address cannot be empty".to_string());
        } else if self.bind_address.parse::<std::net::IpAddr>().is_err() {
            errors.push(format!(
                "Invalid bind address: '{}' (expected an IP such as '0.0.0.0')",
                self.bind_address
            ));
        }

        if self.socket_name.is_empty() {
            errors.push("Socket name cannot be empty".to_string());
        }

        // Validate pool sizes
        if self.max_open == 0 {
            errors.push("Max open connections must be greater than 0".to_string());
        } else if self.max_open > 100_000 {
            errors.push(format!(
                "Max open connections very high: {} (ensure system resources can support this)",
                self.max_open
            ));
        }

        if self.message_pool_size < self.max_open {
            errors.push(format!(
                "Message pool size ({}) must be at least max_open ({})",
                self.message_pool_size, self.max_open
            ));
        }

        errors.extend(self.message_capacity_problem());

        // Validate timeouts
        if self.handshake_timeout.as_millis() < 10 {
            errors.push("Handshake timeout too short (minimum: 10ms)".to_string());
        } else if self.handshake_timeout.as_secs() > 300 {
            errors.push("Handshake timeout too long (maximum: 300s)".to_string());
        }

        if self.poll_timeout.as_millis() > 1000 {
            errors.push("Poll timeout too long (maximum: 1s)".to_string());
        }

        if self.poll_capacity == 0 {
            errors.push("Poll capacity must be greater than 0".to_string());
        }

        if !self.registry_buckets.is_power_of_two() {
            errors.push(format!(
                "Registry bucket count must be a power of two (got {})",
                self.registry_buckets
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("peerlink"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        // Validate app name
        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        // Validate file logging configuration
        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        // Validate at least one output is enabled
        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}

//! # Configuration Management
//!
//! Centralized configuration for servers and clients using this protocol core.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()` (`PROTOCOL_SESSION_*`)
//!
//! ## Wire Limits
//! - Frames are capped at 2 097 151 bytes, the largest length a 3-byte VarInt
//!   can express
//! - Decompressed frames are capped at 8 MiB to stop decompression bombs
//! - A negative compression threshold disables the compression stage

use crate::error::{ProtocolError, Result};
use crate::utils::compression::CompressionKind;
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Max allowed frame body (largest 3-byte VarInt)
pub const MAX_FRAME_SIZE: usize = 2_097_151;

/// Max size a compressed frame may inflate to
pub const MAX_UNCOMPRESSED_SIZE: usize = 8 * 1024 * 1024;

/// Bodies at or above this size are compressed once compression is enabled
pub const DEFAULT_COMPRESSION_THRESHOLD: i32 = 256;

/// Max characters in a protocol string
pub const MAX_STRING_LENGTH: usize = 32_767;

/// Main network configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Pipeline configuration
    #[serde(default)]
    pub transport: TransportConfig,

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

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("PROTOCOL_SESSION_SERVER_ADDRESS") {
            config.server.address = addr;
        }

        if let Ok(max) = std::env::var("PROTOCOL_SESSION_MAX_CONNECTIONS") {
            if let Ok(val) = max.parse::<usize>() {
                config.server.max_connections = val;
            }
        }

        if let Ok(interval) = std::env::var("PROTOCOL_SESSION_KEEPALIVE_INTERVAL_MS") {
            if let Ok(val) = interval.parse::<u64>() {
                config.server.keepalive_interval = Duration::from_millis(val);
            }
        }

        if let Ok(timeout) = std::env::var("PROTOCOL_SESSION_KEEPALIVE_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.server.keepalive_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(threshold) = std::env::var("PROTOCOL_SESSION_COMPRESSION_THRESHOLD") {
            if let Ok(val) = threshold.parse::<i32>() {
                config.transport.compression_threshold = val;
            }
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
        errors.extend(self.server.validate());
        errors.extend(self.transport.validate());
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

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Server listen address (e.g., "0.0.0.0:25565")
    pub address: String,

    /// Maximum number of concurrent connections
    pub max_connections: usize,

    /// Interval between keepalive probes while in `Play`
    #[serde(with = "duration_serde")]
    pub keepalive_interval: Duration,

    /// Silence after which a session is closed
    #[serde(with = "duration_serde")]
    pub keepalive_timeout: Duration,

    /// Timeout for graceful server shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:25565"),
            max_connections: 1000,
            keepalive_interval: timeout::KEEPALIVE_INTERVAL,
            keepalive_timeout: timeout::KEEPALIVE_TIMEOUT,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:25565')",
                self.address
            ));
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        if self.keepalive_interval.as_millis() < 100 {
            errors.push("Keepalive interval too short (minimum: 100ms)".to_string());
        } else if self.keepalive_interval.as_secs() > 3600 {
            errors.push("Keepalive interval too long (maximum: 1 hour)".to_string());
        }

        if self.keepalive_timeout <= self.keepalive_interval {
            errors.push("Keepalive timeout must be longer than the keepalive interval".to_string());
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Compression threshold applied when compression is switched on.
    /// Negative disables compression.
    pub compression_threshold: i32,

    /// Compression algorithm for the compression stage
    pub compression_kind: CompressionKind,

    /// Compression level (algorithm specific)
    pub compression_level: i32,

    /// Maximum frame body size in bytes
    pub max_frame_size: usize,

    /// Maximum size a compressed frame may inflate to
    pub max_uncompressed_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            compression_kind: CompressionKind::Zlib,
            compression_level: 6,
            max_frame_size: MAX_FRAME_SIZE,
            max_uncompressed_size: MAX_UNCOMPRESSED_SIZE,
        }
    }
}

impl TransportConfig {
    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_frame_size == 0 {
            errors.push("Max frame size cannot be 0".to_string());
        } else if self.max_frame_size > MAX_FRAME_SIZE {
            errors.push(format!(
                "Max frame size too large: {} bytes (maximum: {MAX_FRAME_SIZE})",
                self.max_frame_size
            ));
        }

        if self.max_uncompressed_size < self.max_frame_size {
            errors.push("Max uncompressed size cannot be smaller than max frame size".to_string());
        }

        if self.compression_threshold >= 0 {
            let (min, max) = self.compression_kind.level_range();
            if self.compression_level < min || self.compression_level > max {
                errors.push(format!(
                    "Invalid compression level: {} (valid range for {}: {min}-{max})",
                    self.compression_level,
                    self.compression_kind.name()
                ));
            }

            if self.compression_threshold as usize > self.max_frame_size {
                errors.push(
                    "Compression threshold cannot be larger than max frame size".to_string(),
                );
            }
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

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("protocol-session"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
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

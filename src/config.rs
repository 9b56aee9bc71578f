//! Bridge configuration loading and validation.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use crate::mapping::{MappingError, TopicMapping, TopicMappingTable};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Mapping(#[from] MappingError),
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Tag source (Modbus TCP) settings.
    pub source: SourceConfig,

    /// Message sink (MQTT broker) settings.
    pub sink: SinkConfig,

    /// Ordered deployment segments forming the topic namespace prefix,
    /// e.g. `["v1", "acme", "plant1", "bottling", "line4"]`.
    pub namespace: Vec<String>,

    /// Static tag-to-topic mapping table.
    pub mappings: Vec<TopicMapping>,

    /// Publish period in seconds.
    #[serde(default = "default_publish_period")]
    pub publish_period_secs: u64,

    /// How long shutdown waits for an in-flight cycle before giving up.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_publish_period() -> u64 {
    3
}

fn default_shutdown_grace() -> u64 {
    5
}

/// Connection settings for the Modbus tag source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Device host (IP or hostname resolvable to a socket address).
    pub host: String,

    /// Modbus TCP port.
    #[serde(default = "default_modbus_port")]
    pub port: u16,

    /// Modbus unit/slave ID (1-247).
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Connect and per-read timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Trust posture towards the device.
    #[serde(default)]
    pub security: SecurityConfig,

    /// Registered tags, fixed for the lifetime of the session.
    pub tags: Vec<TagConfig>,
}

impl SourceConfig {
    /// Endpoint address as `host:port`.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_modbus_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    1000
}

/// Trust posture towards the tag source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Modbus TCP carries no peer authentication. Connecting is refused
    /// unless this is explicitly set, and the choice is logged at startup so
    /// it stays an auditable decision rather than a hidden default.
    #[serde(default)]
    pub allow_unauthenticated: bool,
}

/// Connection settings for the MQTT message sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Broker host.
    pub host: String,

    /// Broker port.
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Client identifier presented to the broker.
    pub client_id: String,

    /// MQTT keep-alive interval in seconds (minimum 5).
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// How long to wait for the broker's connection acknowledgement.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl SinkConfig {
    /// Broker address as `host:port`.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    30
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

/// Configuration for a single registered tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagConfig {
    /// Tag identifier, unique within the registered set.
    pub id: String,

    /// Register type backing this tag.
    #[serde(rename = "type", default)]
    pub register: RegisterKind,

    /// Register address (0-based).
    pub address: u16,

    /// Data type interpretation for input/holding registers.
    #[serde(default)]
    pub data_type: DataKind,

    /// Number of registers, only meaningful for `ascii` tags
    /// (two characters per register).
    #[serde(default = "default_count")]
    pub count: u16,

    /// Scaling factor applied to numeric readings (value * scale + offset).
    #[serde(default = "default_scale")]
    pub scale: f64,

    /// Offset applied to numeric readings.
    #[serde(default)]
    pub offset: f64,
}

fn default_count() -> u16 {
    1
}

fn default_scale() -> f64 {
    1.0
}

impl TagConfig {
    /// Whether this tag leaves readings unscaled.
    pub fn is_unscaled(&self) -> bool {
        self.scale == 1.0 && self.offset == 0.0
    }
}

/// Modbus register types.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterKind {
    /// Discrete output coil (1-bit).
    Coil,
    /// Discrete input contact (1-bit, read-only).
    Discrete,
    /// Input register (16-bit, read-only).
    Input,
    /// Holding register (16-bit).
    #[default]
    Holding,
}

/// Data type interpretation for 16-bit registers. Multi-register values use
/// big-endian word order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    /// Unsigned 16-bit integer (default).
    #[default]
    U16,
    /// Signed 16-bit integer.
    I16,
    /// Unsigned 32-bit integer (2 registers).
    U32,
    /// Signed 32-bit integer (2 registers).
    I32,
    /// 32-bit float (2 registers).
    F32,
    /// ASCII text packed two characters per register.
    Ascii,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl BridgeConfig {
    /// Load configuration from a JSON5 file and validate it.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: BridgeConfig = json5::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration. Runs before any connection attempt, so
    /// every error here is a load-time failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Validation(msg));

        if self.source.host.is_empty() {
            return invalid("source host must not be empty".to_string());
        }
        if self.source.unit_id == 0 || self.source.unit_id > 247 {
            return invalid(format!(
                "source unit_id must be 1-247, got {}",
                self.source.unit_id
            ));
        }
        if self.source.tags.is_empty() {
            return invalid("at least one tag must be registered".to_string());
        }

        let mut ids = HashSet::new();
        for tag in &self.source.tags {
            if tag.id.is_empty() {
                return invalid("tag id must not be empty".to_string());
            }
            if !ids.insert(tag.id.as_str()) {
                return invalid(format!("duplicate tag id '{}'", tag.id));
            }
            if tag.data_type == DataKind::Ascii {
                if tag.count == 0 {
                    return invalid(format!("tag '{}': ascii count must be at least 1", tag.id));
                }
                if !tag.is_unscaled() {
                    return invalid(format!(
                        "tag '{}': scale/offset do not apply to ascii tags",
                        tag.id
                    ));
                }
            } else if tag.count != 1 {
                return invalid(format!(
                    "tag '{}': count is only meaningful for ascii tags",
                    tag.id
                ));
            }
        }

        if self.sink.host.is_empty() {
            return invalid("sink host must not be empty".to_string());
        }
        if self.sink.client_id.is_empty() {
            return invalid("sink client_id must not be empty".to_string());
        }
        if self.sink.keep_alive_secs < 5 {
            return invalid(format!(
                "sink keep_alive_secs must be at least 5, got {}",
                self.sink.keep_alive_secs
            ));
        }

        if self.publish_period_secs == 0 {
            return invalid("publish_period_secs must be at least 1".to_string());
        }

        for mapping in &self.mappings {
            if !ids.contains(mapping.tag.as_str()) {
                return invalid(format!(
                    "mapping references unregistered tag '{}'",
                    mapping.tag
                ));
            }
        }

        // Builds and discards the table: suffix uniqueness and topic shape
        // are rejected here, before any connect happens.
        TopicMappingTable::new(&self.namespace, self.mappings.clone())?;

        Ok(())
    }
}

//! Modbus to MQTT Unified Namespace bridge.
//!
//! This bridge polls a fixed set of named tags from a Modbus TCP device on a
//! fixed period and publishes each value to an MQTT broker under a
//! Unified-Namespace-style topic hierarchy.
//!
//! # Topics
//!
//! ```text
//! <version>/<organization>/<site>/<area>/<line>/<topic suffix>
//! ```
//!
//! The prefix segments come from deployment configuration; the suffix comes
//! from the static tag-to-topic mapping table.
//!
//! # Payloads
//!
//! Each publish carries a JSON envelope with the cycle's capture timestamp
//! and the tag's value:
//!
//! ```text
//! {"timestamp": "2026-08-07T09:12:03.418Z", "value": 120}
//! ```

pub mod bridge;
pub mod config;
pub mod cycle;
pub mod error;
pub mod mapping;
pub mod scheduler;
pub mod sink;
pub mod source;
pub mod telemetry;

use config::{LogFormat, LoggingConfig};

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - [`LogFormat::Text`] (default): human-readable text format
/// - [`LogFormat::Json`]: structured JSON format for log aggregation systems
///
/// The `RUST_LOG` environment variable takes precedence over the configured
/// level when set.
pub fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
    }

    Ok(())
}

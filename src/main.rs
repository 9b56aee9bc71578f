//! Modbus to MQTT Unified Namespace bridge.
//!
//! Polls a fixed set of named tags from a Modbus TCP device and publishes
//! each value to an MQTT broker under a Unified-Namespace topic hierarchy.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use uns_bridge_modbus::bridge;
use uns_bridge_modbus::config::{BridgeConfig, LoggingConfig};
use uns_bridge_modbus::init_tracing;

/// Modbus to MQTT Unified Namespace bridge.
#[derive(Parser, Debug)]
#[command(name = "uns-bridge-modbus")]
#[command(about = "Polls Modbus tags and publishes them to an MQTT Unified Namespace")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format)
    #[arg(short, long, default_value = "bridge.json5")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = BridgeConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let log_config = LoggingConfig {
        level: args
            .log_level
            .clone()
            .unwrap_or_else(|| config.logging.level.clone()),
        format: config.logging.format,
    };
    init_tracing(&log_config)?;

    info!("Starting uns-bridge-modbus");
    info!("Loaded configuration from {:?}", args.config);

    bridge::run(config).await
}

//! Command-line interface for piothub.

use clap::Parser;
use std::path::PathBuf;

/// IoT telemetry ingestion and routing hub.
#[derive(Parser, Debug)]
#[command(name = "piothub")]
#[command(about = "MQTT + HTTP ingestion hub with thing registry and InfluxDB/SQL fan-out")]
#[command(version)]
pub struct Args {
    /// Path to configuration file (YAML format)
    #[arg(short = 'c', long = "config", required = true)]
    pub config: PathBuf,

    /// Enable debug logging
    #[arg(short = 'D', long = "debug")]
    pub debug: bool,

    /// Validate configuration without running
    #[arg(short = 't', long = "test")]
    pub test: bool,

    /// Daemon mode: retry on error instead of exiting
    #[arg(short = 'd', long = "daemon")]
    pub daemon: bool,
}

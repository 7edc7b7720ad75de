//! Configuration types for piothub.

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub influxdb: InfluxDbConfig,
    pub sql: SqlConfig,
    pub registry: RegistryConfig,
    pub http: HttpConfig,
    #[serde(default)]
    pub dos: DosConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// MQTT broker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// InfluxDB line-protocol-over-HTTP sink configuration.
///
/// The shared write identity (`username`/`password`) is used for every
/// org's write; the per-org database name comes from the org record,
/// not from here.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct InfluxDbConfig {
    /// Base URI, e.g. "http://localhost:8086"
    pub uri: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    5
}

/// SQL sink configuration: the shared MySQL server address. Credentials and
/// database name are per-org.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SqlConfig {
    pub host: String,
    #[serde(default = "default_mysql_port")]
    pub port: u16,
}

fn default_mysql_port() -> u16 {
    3306
}

/// Registry persistence configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    /// SQLite DSN, e.g. "sqlite://piothub.db" or "sqlite::memory:"
    pub dsn: String,
}

/// HTTP packet-ingestion endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    pub listen_addr: String,
}

/// DoS gate configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DosConfig {
    #[serde(default = "default_dos_interval_ms")]
    pub min_interval_ms: u64,
}

impl Default for DosConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_dos_interval_ms(),
        }
    }
}

fn default_dos_interval_ms() -> u64 {
    1000
}

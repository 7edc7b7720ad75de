//! Integration tests for configuration loading and validation.

use piothub::config::Config;
use piothub::error::ConfigError;
use piothub::load_config;
use std::io::Write;
use tempfile::NamedTempFile;

fn load_yaml_config(yaml: &str) -> Result<Config, ConfigError> {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    load_config(file.path())
}

#[test]
fn test_minimal_valid_config_loads() {
    let config = load_yaml_config(
        r#"
mqtt:
  host: localhost
  port: 1883
influxdb:
  uri: "http://localhost:8086"
  username: writer
  password: secret
sql:
  host: localhost
registry:
  dsn: "sqlite::memory:"
http:
  listen_addr: "0.0.0.0:8080"
"#,
    )
    .unwrap();

    assert_eq!(config.mqtt.host, "localhost");
    assert_eq!(config.mqtt.port, 1883);
    assert!(config.mqtt.username.is_none());
    assert_eq!(config.influxdb.timeout_secs, 5);
    assert_eq!(config.sql.port, 3306);
    assert_eq!(config.dos.min_interval_ms, 1000);
    assert_eq!(config.log_level, "info");
}

#[test]
fn test_full_config_overrides_defaults() {
    let config = load_yaml_config(
        r#"
mqtt:
  host: mqtt.example.com
  port: 8883
  username: user
  password: secret
influxdb:
  uri: "http://influx.example.com:8086"
  username: writer
  password: secret
  timeout_secs: 10
sql:
  host: sql.example.com
  port: 3307
registry:
  dsn: "sqlite:///var/lib/piothub.db"
http:
  listen_addr: "0.0.0.0:9090"
dos:
  min_interval_ms: 2000
log_level: debug
"#,
    )
    .unwrap();

    assert_eq!(config.mqtt.host, "mqtt.example.com");
    assert_eq!(config.mqtt.username.as_deref(), Some("user"));
    assert_eq!(config.influxdb.timeout_secs, 10);
    assert_eq!(config.sql.port, 3307);
    assert_eq!(config.dos.min_interval_ms, 2000);
    assert_eq!(config.log_level, "debug");
}

#[test]
fn test_rejects_unknown_field() {
    let result = load_yaml_config(
        r#"
mqtt:
  host: localhost
  port: 1883
  bogus_field: true
influxdb:
  uri: "http://localhost:8086"
  username: writer
  password: secret
sql:
  host: localhost
registry:
  dsn: "sqlite::memory:"
http:
  listen_addr: "0.0.0.0:8080"
"#,
    );
    assert!(result.is_err());
}

#[test]
fn test_rejects_bad_listen_addr() {
    let result = load_yaml_config(
        r#"
mqtt:
  host: localhost
  port: 1883
influxdb:
  uri: "http://localhost:8086"
  username: writer
  password: secret
sql:
  host: localhost
registry:
  dsn: "sqlite::memory:"
http:
  listen_addr: "not-an-address"
"#,
    );
    assert!(result.is_err());
}

#[test]
fn test_env_var_expansion_with_default() {
    let config = load_yaml_config(
        r#"
mqtt:
  host: "${MQTT_HOST:localhost}"
  port: 1883
influxdb:
  uri: "http://localhost:8086"
  username: "${INFLUX_USER:writer}"
  password: secret
sql:
  host: localhost
registry:
  dsn: "sqlite::memory:"
http:
  listen_addr: "0.0.0.0:8080"
"#,
    )
    .unwrap();

    assert_eq!(config.mqtt.host, "localhost");
    assert_eq!(config.influxdb.username, "writer");
}

#[test]
fn test_env_var_expansion_missing_without_default_errors() {
    let result = load_yaml_config(
        r#"
mqtt:
  host: "${SOME_VAR_NOT_SET_XYZ}"
  port: 1883
influxdb:
  uri: "http://localhost:8086"
  username: writer
  password: secret
sql:
  host: localhost
registry:
  dsn: "sqlite::memory:"
http:
  listen_addr: "0.0.0.0:8080"
"#,
    );
    assert!(result.is_err());
}

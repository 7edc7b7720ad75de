//! Configuration validation.

use super::types::Config;
use crate::error::ConfigError;

/// Validate the configuration.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.mqtt.host.is_empty() {
        return Err(ConfigError::Validation("MQTT host cannot be empty".into()));
    }

    if config.influxdb.uri.is_empty() {
        return Err(ConfigError::Validation(
            "InfluxDB uri cannot be empty".into(),
        ));
    }
    if config.influxdb.username.is_empty() {
        return Err(ConfigError::Validation(
            "InfluxDB username cannot be empty".into(),
        ));
    }

    if config.sql.host.is_empty() {
        return Err(ConfigError::Validation("SQL host cannot be empty".into()));
    }

    if config.registry.dsn.is_empty() {
        return Err(ConfigError::Validation(
            "registry DSN cannot be empty".into(),
        ));
    }

    if config.http.listen_addr.is_empty() {
        return Err(ConfigError::Validation(
            "HTTP listen address cannot be empty".into(),
        ));
    }
    if config.http.listen_addr.parse::<std::net::SocketAddr>().is_err() {
        return Err(ConfigError::Validation(format!(
            "invalid HTTP listen address: {}",
            config.http.listen_addr
        )));
    }

    if config.dos.min_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "dos.min_interval_ms must be greater than zero".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::*;

    fn valid_config() -> Config {
        Config {
            mqtt: MqttConfig {
                host: "localhost".into(),
                port: 1883,
                username: None,
                password: None,
            },
            influxdb: InfluxDbConfig {
                uri: "http://localhost:8086".into(),
                username: "writer".into(),
                password: "secret".into(),
                timeout_secs: 5,
            },
            sql: SqlConfig {
                host: "localhost".into(),
                port: 3306,
            },
            registry: RegistryConfig {
                dsn: "sqlite::memory:".into(),
            },
            http: HttpConfig {
                listen_addr: "0.0.0.0:8080".into(),
            },
            dos: DosConfig::default(),
            log_level: "info".into(),
        }
    }

    #[test]
    fn test_validate_accepts_valid_config() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_mqtt_host() {
        let mut cfg = valid_config();
        cfg.mqtt.host = String::new();
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_listen_addr() {
        let mut cfg = valid_config();
        cfg.http.listen_addr = "not-an-address".into();
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_dos_interval() {
        let mut cfg = valid_config();
        cfg.dos.min_interval_ms = 0;
        assert!(validate_config(&cfg).is_err());
    }
}

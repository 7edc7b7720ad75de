//! Error types for piothub.

use thiserror::Error;

/// Top-level error type threaded through registry, sinks, dispatcher and
/// the HTTP packet processor.
#[derive(Error, Debug)]
pub enum HubError {
    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("too many requests")]
    TooManyRequests,

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("invalid metric: {0}")]
    InvalidMetric(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<sqlx::Error> for HubError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(dbe) if dbe.is_unique_violation() => {
                HubError::Conflict(dbe.message().to_string())
            }
            sqlx::Error::RowNotFound => HubError::NotFound,
            other => HubError::Internal(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for HubError {
    fn from(err: reqwest::Error) -> Self {
        HubError::TransportFailure(err.to_string())
    }
}

impl From<rumqttc::ClientError> for HubError {
    fn from(err: rumqttc::ClientError) -> Self {
        HubError::TransportFailure(err.to_string())
    }
}

/// Configuration parsing and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("environment variable '{0}' is not set")]
    MissingEnvVar(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub mod bridge;
pub mod cli;
pub mod config;
pub mod error;
pub mod registry;

pub use config::{Config, load_config};
pub use error::{ConfigError, HubError};

//! Configuration management for the lantern retrieval core
//!
//! Supports loading configuration from:
//! - TOML/YAML files (`config/default`, then an environment overlay)
//! - Environment variables (LANTERN__ prefix, `__` separator)
//!
//! All tuning constants live in [`constants`]; `Settings` carries the
//! deployment-facing knobs and rejects unknown fields so config typos
//! fail at startup.

pub mod constants;
pub mod settings;

pub use settings::{
    load_settings, CragSettings, LimitSettings, RerankSettings, RetrievalSettings,
    RetrieverSettings, RouterSettings, Settings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

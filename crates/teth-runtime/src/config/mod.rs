//! Configuration module for the Teth runtime.
//!
//! This module provides layered configuration loading (defaults, TOML files,
//! environment variables, programmatic overrides) and validation for logging
//! and dispatch settings.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    DispatchConfig, LogFormat, LogLevel, LogOutput, LoggingConfig, SpanEventConfig, TethConfig,
};
pub use validation::validate_config;

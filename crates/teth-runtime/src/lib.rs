//! Teth Runtime - Bootstrap layer for Teth applications.
//!
//! This crate provides:
//! - Layered configuration loading and validation (`ConfigLoader`, `TethConfig`)
//! - Logging configuration (`LoggingBuilder`, `SpanEvents`)
//! - Runtime bootstrap (`TethRuntime`) owning the context registry
//!
//! ```ignore
//! use teth_runtime::TethRuntime;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = TethRuntime::builder().profile("production").build()?;
//!
//!     let bus = runtime.context("bus");
//!     bus.handle("type: ping", |_: Message| json!("pong"))?;
//!
//!     let reply = bus.send("type: ping").await?;
//!     Ok(())
//! }
//! ```
//!
//! # Configuration Sources
//!
//! Later sources override earlier ones:
//!
//! 1. Built-in defaults
//! 2. `teth.{profile}.toml`, then `teth.toml` in the search paths
//! 3. `TETH_` environment variables (`TETH_LOGGING__LEVEL=debug`)
//! 4. Programmatic overrides (`RuntimeBuilder::merge`)

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

// Re-exports
pub use config::{ConfigError, ConfigLoader, ConfigResult, DispatchConfig, TethConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{RuntimeBuilder, TethRuntime};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// This provides all the commonly used logging macros:
/// - `trace!`, `debug!`, `info!`, `warn!`, `error!`
/// - `span`, `event`
/// - `instrument` attribute
/// - `Level` for span creation
pub mod prelude {
    pub use tracing::{Level, debug, error, event, info, instrument, span, trace, warn};
}

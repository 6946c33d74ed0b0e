//! Runtime bootstrap.
//!
//! [`TethRuntime`] is the composition root of a Teth application: it loads
//! and validates configuration, installs logging and owns the context
//! [`Registry`] whose contexts follow the configured dispatch settings.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use teth_runtime::TethRuntime;
//!
//! // Loads teth.toml from the current directory, falling back to defaults
//! let runtime = TethRuntime::new();
//!
//! let todos = runtime.context("todos");
//! todos.handle("cmd: add", add_todo)?;
//! let reply = todos.send("cmd: add, title: milk").await?;
//!
//! // Custom configuration
//! let runtime = TethRuntime::builder()
//!     .config_file("config/teth.toml")
//!     .profile("production")
//!     .build()?;
//! ```

use std::path::Path;

use teth_framework::{Context, ContextSettings, ContextStore, MemoryStore, Registry};
use tracing::{info, warn};

use crate::config::{ConfigLoader, TethConfig, validate_config};
use crate::error::RuntimeResult;
use crate::logging;

/// The Teth runtime: configuration, logging and the context registry.
#[derive(Debug, Clone)]
pub struct TethRuntime {
    config: TethConfig,
    registry: Registry,
}

impl TethRuntime {
    /// Creates a runtime with automatic configuration loading.
    ///
    /// Searches the current directory for `teth.toml`. If loading or
    /// validation fails, default settings are used.
    pub fn new() -> Self {
        let config = ConfigLoader::new()
            .with_current_dir()
            .load()
            .unwrap_or_else(|e| {
                eprintln!("Warning: Failed to load config ({e}), using defaults");
                TethConfig::default()
            });

        Self::from_config(&config).unwrap_or_else(|e| {
            eprintln!("Warning: Invalid config ({e}), using defaults");
            Self::assemble(TethConfig::default(), MemoryStore::new())
        })
    }

    /// Creates a runtime builder for custom configuration.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from configuration, backed by an in-memory store.
    pub fn from_config(config: &TethConfig) -> RuntimeResult<Self> {
        Self::with_store(config, MemoryStore::new())
    }

    /// Creates a runtime from configuration with custom context storage.
    pub fn with_store(config: &TethConfig, store: impl ContextStore) -> RuntimeResult<Self> {
        validate_config(config)?;
        Ok(Self::assemble(config.clone(), store))
    }

    fn assemble(config: TethConfig, store: impl ContextStore) -> Self {
        logging::init_from_config(&config.logging);

        let settings = ContextSettings::from(&config.dispatch);
        if !settings.catch_panics {
            warn!("Handler panics will not be caught during dispatch");
        }
        info!(
            log_level = %config.logging.level,
            duplicate_policy = ?settings.duplicate_policy,
            "Teth runtime initialized"
        );

        Self {
            registry: Registry::with_store(store).with_settings(settings),
            config,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &TethConfig {
        &self.config
    }

    /// Returns the context registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Returns the context named `name`, creating it on first use.
    pub fn context(&self, name: &str) -> Context {
        self.registry.get_or_create(name)
    }

    /// Creates an anonymous context with the runtime's dispatch settings.
    pub fn anonymous(&self) -> Context {
        self.registry.anonymous()
    }
}

impl Default for TethRuntime {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for [`TethRuntime`].
///
/// ```rust,ignore
/// let runtime = TethRuntime::builder()
///     .config_file("config/teth.toml")
///     .profile("production")
///     .build()?;
/// ```
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    store: Option<Box<dyn FnOnce(&TethConfig) -> RuntimeResult<TethRuntime>>>,
}

impl RuntimeBuilder {
    /// Creates a new runtime builder.
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
            store: None,
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g., "development", "production").
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Enables loading environment variables (enabled by default).
    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges additional configuration programmatically.
    pub fn merge(mut self, config: TethConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Uses `store` for named contexts instead of an in-memory map.
    pub fn store(mut self, store: impl ContextStore) -> Self {
        self.store = Some(Box::new(move |config| TethRuntime::with_store(config, store)));
        self
    }

    /// Loads configuration and builds the runtime.
    pub fn build(self) -> RuntimeResult<TethRuntime> {
        let config = self.config_loader.load()?;
        match self.store {
            Some(with_store) => with_store(&config),
            None => TethRuntime::from_config(&config),
        }
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigError, DispatchConfig, LogLevel};
    use crate::error::RuntimeError;
    use figment::Jail;
    use serde_json::json;
    use teth_core::{DuplicatePolicy, Message};

    fn stacking() -> TethConfig {
        TethConfig {
            dispatch: DispatchConfig {
                duplicate_policy: DuplicatePolicy::Stack,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_dispatch_settings_reach_contexts() {
        let runtime = TethRuntime::from_config(&stacking()).unwrap();
        let bus = runtime.context("bus");
        bus.handle("type: did-change", |_: Message| json!(1)).unwrap();
        bus.handle("type: did-change", |_: Message| json!(2)).unwrap();
        assert_eq!(bus.len(), 2);
        assert_eq!(
            runtime.anonymous().settings().duplicate_policy,
            DuplicatePolicy::Stack
        );
        assert!(runtime.registry().get("bus").is_some());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = TethConfig::default();
        config
            .logging
            .filters
            .insert("bad target".to_string(), LogLevel::Debug);
        let err = TethRuntime::from_config(&config).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Config(ConfigError::InvalidDirective { .. })
        ));
    }

    #[test]
    fn test_builder_loads_file() {
        Jail::expect_with(|jail| {
            jail.create_file("teth.toml", "[dispatch]\nduplicate_policy = \"replace\"\n")?;
            let runtime = TethRuntime::builder()
                .search_path(jail.directory())
                .without_env()
                .store(MemoryStore::new())
                .build()
                .map_err(|e| e.to_string())?;
            assert_eq!(
                runtime.config().dispatch.duplicate_policy,
                DuplicatePolicy::Replace
            );

            let ctx = runtime.context("replace");
            ctx.handle("a: 1", |_: Message| json!("old"))
                .map_err(|e| e.to_string())?;
            ctx.handle("a: 1", |_: Message| json!("new"))
                .map_err(|e| e.to_string())?;
            let reply = ctx.send_sync("a: 1").map_err(|e| e.to_string())?;
            assert_eq!(reply.value(), Some(&json!("new")));
            Ok(())
        });
    }
}

//! Named context registry.
//!
//! A [`Registry`] maps names to [`Context`]s, creating each context on first
//! reference. Entries are never removed. Applications normally own one
//! registry at their composition root; [`Registry::global`] exists for code
//! that wants the process-wide default.
//!
//! Storage sits behind [`ContextStore`], so tests can isolate themselves
//! with a fresh [`MemoryStore`] or plug in their own.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use tracing::debug;

use crate::context::{Context, ContextSettings, RegistryHandle};

/// Storage for named contexts.
pub trait ContextStore: Send + Sync + 'static {
    /// Returns the context stored under `name`.
    fn get(&self, name: &str) -> Option<Context>;

    /// Returns the context stored under `name`, storing `create()` first if
    /// there is none.
    fn get_or_insert_with(&self, name: &str, create: &dyn Fn() -> Context) -> Context;

    /// Names of all stored contexts.
    fn names(&self) -> Vec<String>;
}

/// In-memory [`ContextStore`].
#[derive(Default)]
pub struct MemoryStore {
    contexts: RwLock<HashMap<String, Context>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContextStore for MemoryStore {
    fn get(&self, name: &str) -> Option<Context> {
        self.contexts.read().get(name).cloned()
    }

    fn get_or_insert_with(&self, name: &str, create: &dyn Fn() -> Context) -> Context {
        if let Some(context) = self.get(name) {
            return context;
        }
        self.contexts
            .write()
            .entry(name.to_string())
            .or_insert_with(create)
            .clone()
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.contexts.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("contexts", &self.contexts.read().len())
            .finish()
    }
}

static GLOBAL: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Name → context registry.
///
/// Cloning is cheap; clones share the same store.
#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn ContextStore>,
    settings: ContextSettings,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Creates a registry backed by a fresh [`MemoryStore`].
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    /// Creates a registry backed by `store`.
    pub fn with_store(store: impl ContextStore) -> Self {
        Self::from_parts(Arc::new(store), ContextSettings::default())
    }

    pub(crate) fn from_parts(store: Arc<dyn ContextStore>, settings: ContextSettings) -> Self {
        Self { store, settings }
    }

    /// Sets the settings used for contexts created from now on.
    pub fn with_settings(mut self, settings: ContextSettings) -> Self {
        self.settings = settings;
        self
    }

    /// The process-wide default registry.
    pub fn global() -> &'static Registry {
        &GLOBAL
    }

    /// Settings applied to newly created contexts.
    pub fn settings(&self) -> ContextSettings {
        self.settings
    }

    /// Returns the context named `name`, creating it on first use.
    pub fn get_or_create(&self, name: &str) -> Context {
        self.store.get_or_insert_with(name, &|| {
            debug!(name, "Creating context");
            Context::build(Some(name.to_string()), self.settings, Some(self.handle()))
        })
    }

    /// Returns the context named `name` if it exists.
    pub fn get(&self, name: &str) -> Option<Context> {
        self.store.get(name)
    }

    /// Creates an unregistered context that still resolves names here.
    pub fn anonymous(&self) -> Context {
        Context::build(None, self.settings, Some(self.handle()))
    }

    /// Names of all registered contexts.
    pub fn names(&self) -> Vec<String> {
        self.store.names()
    }

    fn handle(&self) -> RegistryHandle {
        RegistryHandle {
            store: Arc::downgrade(&self.store),
            settings: self.settings,
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("names", &self.names())
            .field("settings", &self.settings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use teth_core::{DuplicatePolicy, Message};

    #[test]
    fn test_get_or_create_returns_same_context() {
        let registry = Registry::new();
        let first = registry.get_or_create("bus");
        let second = registry.get_or_create("bus");
        assert!(first.ptr_eq(&second));
        assert_eq!(first.name(), Some("bus"));
        assert_eq!(registry.names(), vec!["bus".to_string()]);
    }

    #[test]
    fn test_anonymous_is_unregistered() {
        let registry = Registry::new();
        let ctx = registry.anonymous();
        assert_eq!(ctx.name(), None);
        assert!(registry.names().is_empty());
    }

    #[test]
    fn test_registries_are_isolated() {
        let a = Registry::new();
        let b = Registry::new();
        a.get_or_create("shared")
            .handle("x: 1", |_: Message| json!(1))
            .unwrap();
        assert!(b.get_or_create("shared").is_empty());
        assert!(b.get("other").is_none());
    }

    #[test]
    fn test_context_resolves_names_in_own_registry() {
        let registry = Registry::new();
        let ctx = registry.anonymous();
        let named = ctx.context("state");
        assert!(named.ptr_eq(&registry.get_or_create("state")));
        assert!(named.context("state").ptr_eq(&named));
    }

    #[test]
    fn test_settings_apply_to_new_contexts() {
        let settings = ContextSettings {
            duplicate_policy: DuplicatePolicy::Stack,
            catch_panics: false,
        };
        let registry = Registry::new().with_settings(settings);
        let ctx = registry.get_or_create("stacked");
        assert_eq!(ctx.settings(), settings);
        ctx.handle("a: 1", |_: Message| json!(1)).unwrap();
        ctx.handle("a: 1", |_: Message| json!(2)).unwrap();
        assert_eq!(ctx.len(), 2);
    }

    #[test]
    fn test_global_registry() {
        let ctx = Registry::global().get_or_create("registry-test-global");
        let standalone = Context::new();
        assert!(standalone.context("registry-test-global").ptr_eq(&ctx));
    }

    #[test]
    fn test_custom_store() {
        #[derive(Default)]
        struct Prefilled(MemoryStore);

        impl ContextStore for Prefilled {
            fn get(&self, name: &str) -> Option<Context> {
                self.0.get(name)
            }
            fn get_or_insert_with(&self, name: &str, create: &dyn Fn() -> Context) -> Context {
                self.0.get_or_insert_with(name, create)
            }
            fn names(&self) -> Vec<String> {
                self.0.names()
            }
        }

        let registry = Registry::with_store(Prefilled::default());
        registry.get_or_create("one");
        assert_eq!(registry.names(), vec!["one".to_string()]);
    }
}

//! Dispatch contexts.
//!
//! A [`Context`] is a namespace of pattern → chain bindings with three
//! dispatch entry points:
//!
//! - [`send`](Context::send): single dispatch, always returns a [`Pipe`]
//! - [`send_sync`](Context::send_sync): single dispatch, returns the raw reply
//! - [`circular`](Context::circular): multicast dispatch to every matching
//!   chain, aggregated into one pipe
//!
//! Dispatch never fails synchronously through `send` or `circular`: lookup
//! failures, handler errors and (by default) handler panics all surface as
//! a REJECT on the returned pipe.
//!
//! ```text
//! Dispatched ─▶ Matched ─▶ Invoking ─▶ Resolved | Rejected
//!     │
//!     └──────▶ Unmatched ─▶ FallbackInvoked | Failed
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use teth_framework::Context;
//!
//! let ctx = Context::new();
//! ctx.handle("say: Hello", |msg: Message| json!(format!("Hello, {}", msg.get("to")...)))?;
//!
//! let greeting = ctx.send("say: Hello, to: Mr. Smith").await?;
//! ```

use std::any::Any;
use std::fmt;
use std::future::IntoFuture;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::task::{Context as TaskContext, Poll};

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock, const_mutex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use teth_core::{
    DispatchResult, DuplicatePolicy, Error, IntoMessage, Message, PatternMatcher, Pipe, Reply,
};
use tower::Service;
use tracing::{Level, debug, span, trace};

use crate::procedure::{BoxedProcedure, Chain, IntoProcedure};
use crate::registry::{ContextStore, Registry};

/// Serializes [`Context::nest`] so the cycle check and the link it guards
/// happen as one step across all contexts.
static NESTING: Mutex<()> = const_mutex(());

/// Per-context dispatch behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    /// What `define` does with an identical pattern.
    pub duplicate_policy: DuplicatePolicy,
    /// Convert handler panics into REJECTs in `send` and `circular`.
    pub catch_panics: bool,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            duplicate_policy: DuplicatePolicy::default(),
            catch_panics: true,
        }
    }
}

/// Weak link back to the registry that created a context.
#[derive(Clone)]
pub(crate) struct RegistryHandle {
    pub(crate) store: Weak<dyn ContextStore>,
    pub(crate) settings: ContextSettings,
}

impl RegistryHandle {
    fn upgrade(&self) -> Option<Registry> {
        let store = self.store.upgrade()?;
        Some(Registry::from_parts(store, self.settings))
    }
}

struct Inner {
    name: Option<String>,
    settings: ContextSettings,
    matcher: RwLock<PatternMatcher<Chain>>,
    children: RwLock<Vec<Context>>,
    registry: Option<RegistryHandle>,
}

/// A namespace owning a pattern matcher and its dispatch entry points.
///
/// Cloning is cheap; clones share the same bindings.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Creates an anonymous context with default settings.
    ///
    /// Named lookups from it go to [`Registry::global`].
    pub fn new() -> Self {
        Self::with_settings(ContextSettings::default())
    }

    /// Creates an anonymous context with the given settings.
    pub fn with_settings(settings: ContextSettings) -> Self {
        Self::build(None, settings, None)
    }

    pub(crate) fn build(
        name: Option<String>,
        settings: ContextSettings,
        registry: Option<RegistryHandle>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                settings,
                matcher: RwLock::new(PatternMatcher::with_policy(settings.duplicate_policy)),
                children: RwLock::new(Vec::new()),
                registry,
            }),
        }
    }

    /// The registered name, `None` for anonymous contexts.
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// The settings this context was created with.
    pub fn settings(&self) -> ContextSettings {
        self.inner.settings
    }

    /// Returns `true` if both handles refer to the same context.
    pub fn ptr_eq(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of patterns defined directly on this context.
    pub fn len(&self) -> usize {
        self.inner.matcher.read().len()
    }

    /// Returns `true` if no pattern is defined directly on this context.
    pub fn is_empty(&self) -> bool {
        self.inner.matcher.read().is_empty()
    }

    fn label(&self) -> &str {
        self.name().unwrap_or("<anonymous>")
    }

    // ========================================================================
    // Definition
    // ========================================================================

    /// Binds `pattern` to the chain formed by `procedures`.
    ///
    /// Fails with [`Error::NoProcedure`] if `procedures` is empty, and with
    /// [`Error::DuplicatePattern`] when the pattern exists and the context
    /// rejects duplicates. Returns `self` for chaining.
    pub fn define(
        &self,
        pattern: impl IntoMessage,
        procedures: Vec<BoxedProcedure>,
    ) -> DispatchResult<&Self> {
        let chain = Chain::new(procedures)?;
        let stages = chain.len();
        self.inner.matcher.write().define(pattern, chain)?;
        trace!(context = self.label(), stages, "Defined pattern");
        Ok(self)
    }

    /// Binds `pattern` to a single handler.
    pub fn handle<M>(
        &self,
        pattern: impl IntoMessage,
        handler: impl IntoProcedure<M>,
    ) -> DispatchResult<&Self> {
        self.define(pattern, vec![handler.into_procedure()])
    }

    /// Sets the fallback handler for unmatched messages.
    pub fn unknown<M>(&self, handler: impl IntoProcedure<M>) -> &Self {
        self.inner
            .matcher
            .write()
            .unknown(Chain::single(handler.into_procedure()));
        self
    }

    /// Makes this context consult `child`'s patterns after its own and
    /// before its fallback.
    ///
    /// Fails with [`Error::NestingCycle`] if `child` is this context or
    /// already consults it.
    pub fn nest(&self, child: &Context) -> DispatchResult<&Self> {
        let _nesting = NESTING.lock();
        if child.reaches(self) {
            return Err(Error::NestingCycle);
        }
        self.inner.children.write().push(child.clone());
        debug!(
            parent = self.label(),
            child = child.label(),
            "Nested context"
        );
        Ok(self)
    }

    fn reaches(&self, target: &Context) -> bool {
        self.ptr_eq(target)
            || self
                .inner
                .children
                .read()
                .iter()
                .any(|child| child.reaches(target))
    }

    // ========================================================================
    // Named contexts
    // ========================================================================

    /// Returns the context registered as `name`, creating it on first use.
    ///
    /// Looks in the registry that created this context, or in
    /// [`Registry::global`] for standalone contexts.
    pub fn context(&self, name: &str) -> Context {
        match self.registry() {
            Some(registry) => registry.get_or_create(name),
            None => Registry::global().get_or_create(name),
        }
    }

    /// Creates a new anonymous context in the same registry.
    pub fn anonymous(&self) -> Context {
        match self.registry() {
            Some(registry) => registry.anonymous(),
            None => Registry::global().anonymous(),
        }
    }

    fn registry(&self) -> Option<Registry> {
        self.inner.registry.as_ref().and_then(RegistryHandle::upgrade)
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    fn find(&self, message: &Message) -> Option<Chain> {
        if let Some(chain) = self.inner.matcher.read().find(message) {
            return Some(chain.clone());
        }
        self.inner
            .children
            .read()
            .iter()
            .find_map(|child| child.find(message))
    }

    fn find_all(&self, message: &Message, found: &mut Vec<Chain>) {
        found.extend(
            self.inner
                .matcher
                .read()
                .find_all(message)
                .into_iter()
                .cloned(),
        );
        for child in self.inner.children.read().iter() {
            child.find_all(message, found);
        }
    }

    fn resolve(&self, message: &Message) -> DispatchResult<Chain> {
        if let Some(chain) = self.find(message) {
            return Ok(chain);
        }
        match self.inner.matcher.read().fallback() {
            Some(fallback) => Ok(fallback.clone()),
            None => Err(Error::no_match(message.clone(), false)),
        }
    }

    fn resolve_all(&self, message: &Message) -> DispatchResult<Vec<Chain>> {
        let mut found = Vec::new();
        self.find_all(message, &mut found);
        if !found.is_empty() {
            return Ok(found);
        }
        match self.inner.matcher.read().fallback() {
            Some(fallback) => Ok(vec![fallback.clone()]),
            None => Err(Error::no_match(message.clone(), true)),
        }
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Dispatches to the best matching chain and returns its raw reply.
    ///
    /// Errors are returned directly and panics are not caught.
    pub fn send_sync(&self, message: impl IntoMessage) -> DispatchResult<Reply> {
        let message = message.into_message()?;
        let chain = self.resolve(&message)?;
        chain.invoke(message)
    }

    /// Dispatches to the best matching chain.
    ///
    /// Plain replies are wrapped in a resolved pipe; failures of any kind
    /// become a rejected one.
    pub fn send(&self, message: impl IntoMessage) -> Pipe<Value> {
        let span = span!(Level::DEBUG, "send", context = self.label());
        let _enter = span.enter();

        match self.guard(|| self.send_sync(message)) {
            Ok(reply) => reply.into_pipe(),
            Err(error) => {
                debug!(%error, "Dispatch rejected");
                Pipe::reject(error)
            }
        }
    }

    /// Dispatches to every matching chain, most recently defined first.
    ///
    /// Resolves with all replies in that order once every one resolves, or
    /// rejects with the first rejection. An unmatched message goes to the
    /// fallback, whose reply is the only element.
    pub fn circular(&self, message: impl IntoMessage) -> Pipe<Value> {
        let span = span!(Level::DEBUG, "circular", context = self.label());
        let _enter = span.enter();

        let replies = self.guard(|| {
            let message = message.into_message()?;
            let chains = self.resolve_all(&message)?;
            debug!(handlers = chains.len(), "Broadcasting");
            Ok(chains
                .iter()
                .map(|chain| {
                    chain
                        .invoke(message.clone())
                        .unwrap_or_else(|error| Reply::Deferred(Pipe::reject(error)))
                })
                .collect::<Vec<_>>())
        });

        match replies {
            Ok(replies) => {
                let (pipe, emit) = Pipe::channel();
                Pipe::all(replies).on_settle(move |outcome| match outcome {
                    Ok(values) => emit.resolve(Value::Array(values)),
                    Err(error) => emit.reject(error),
                });
                pipe
            }
            Err(error) => {
                debug!(%error, "Broadcast rejected");
                Pipe::reject(error)
            }
        }
    }

    fn guard<T>(&self, dispatch: impl FnOnce() -> DispatchResult<T>) -> DispatchResult<T> {
        if !self.inner.settings.catch_panics {
            return dispatch();
        }
        panic::catch_unwind(AssertUnwindSafe(dispatch))
            .unwrap_or_else(|payload| Err(Error::Panicked(panic_message(payload))))
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.inner.name)
            .field("patterns", &self.len())
            .field("children", &self.inner.children.read().len())
            .field("settings", &self.inner.settings)
            .finish()
    }
}

// ============================================================================
// Tower integration
// ============================================================================

/// `send` as a tower service, so transports can stack layers around dispatch.
impl Service<Message> for Context {
    type Response = Value;
    type Error = Error;
    type Future = BoxFuture<'static, Result<Value, Error>>;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, message: Message) -> Self::Future {
        self.send(message).into_future()
    }
}

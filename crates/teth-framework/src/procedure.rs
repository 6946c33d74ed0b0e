//! Procedure chains.
//!
//! A chain is an ordered list of procedures. Invoking it calls the first
//! procedure with the message and a [`Next`] continuation; each procedure may
//! run `next` zero or more times, with whatever arguments it likes, and
//! returns its own reply. The chain's reply is the first procedure's reply.
//! Running `next` past the last procedure returns the arguments it was given
//! as a JSON array `[message, extra...]`.
//!
//! Procedures are usually plain functions, converted through
//! [`IntoProcedure`]:
//!
//! ```rust,ignore
//! use teth_framework::{Args, Next, chain};
//!
//! fn add_111(args: Args, next: Next) -> Result<Value, Error> {
//!     let payload = args.message.get("payload").and_then(Value::as_i64).unwrap_or(0);
//!     let inner = next.run(Args::new(args.message.with("payload", payload + 111)))?;
//!     Ok(json!(inner.value().and_then(Value::as_i64).unwrap_or(0) + 5))
//! }
//!
//! fn payload(message: Message) -> Value {
//!     message.get("payload").cloned().unwrap_or_default()
//! }
//!
//! ctx.define("check: mw", chain![add_111, add_111, payload])?;
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::Value;
use teth_core::{DispatchResult, Error, IntoReply, Message, Reply};

// ============================================================================
// Args
// ============================================================================

/// Arguments travelling along a chain: the message plus any extra values a
/// middleware chose to append.
#[derive(Debug, Clone, PartialEq)]
pub struct Args {
    /// The message being dispatched, possibly rewritten by a middleware.
    pub message: Message,
    /// Additional positional arguments.
    pub extra: Vec<Value>,
}

impl Args {
    /// Arguments holding only `message`.
    pub fn new(message: Message) -> Self {
        Self {
            message,
            extra: Vec::new(),
        }
    }

    /// Appends an extra argument.
    pub fn with_extra(mut self, value: impl Into<Value>) -> Self {
        self.extra.push(value.into());
        self
    }

    /// Returns the `index`-th extra argument.
    pub fn extra(&self, index: usize) -> Option<&Value> {
        self.extra.get(index)
    }

    /// `[message, extra...]`
    pub fn into_value(self) -> Value {
        let mut items = Vec::with_capacity(self.extra.len() + 1);
        items.push(self.message.to_value());
        items.extend(self.extra);
        Value::Array(items)
    }
}

impl From<Message> for Args {
    fn from(message: Message) -> Self {
        Self::new(message)
    }
}

// ============================================================================
// Procedure
// ============================================================================

/// One stage of a chain.
pub trait Procedure: Send + Sync + 'static {
    /// Handles `args`, optionally continuing with `next`.
    fn call(&self, args: Args, next: Next) -> DispatchResult<Reply>;
}

/// A shareable, type-erased procedure.
pub type BoxedProcedure = Arc<dyn Procedure>;

/// Continuation into the rest of a chain.
#[derive(Clone)]
pub struct Next {
    stages: Arc<[BoxedProcedure]>,
    position: usize,
}

impl Next {
    /// Runs the remaining stages with `args`.
    ///
    /// Past the last stage this returns `args` as `[message, extra...]`.
    pub fn run(&self, args: impl Into<Args>) -> DispatchResult<Reply> {
        let args = args.into();
        match self.stages.get(self.position) {
            Some(stage) => stage.call(
                args,
                Next {
                    stages: Arc::clone(&self.stages),
                    position: self.position + 1,
                },
            ),
            None => Ok(Reply::Value(args.into_value())),
        }
    }

    /// Returns `true` if no stages remain.
    pub fn is_terminal(&self) -> bool {
        self.position >= self.stages.len()
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.stages.len().saturating_sub(self.position))
            .finish()
    }
}

// ============================================================================
// IntoProcedure - function conversions
// ============================================================================

/// Conversion of functions into procedures.
///
/// Implemented for:
/// - `Fn(Message) -> R`, a plain handler that ignores extra arguments
/// - `Fn(Args) -> R`, a handler that reads extra arguments
/// - `Fn(Args, Next) -> R`, a middleware
/// - any [`Procedure`]
///
/// where `R` implements [`IntoReply`]. The marker parameter only keeps the
/// implementations apart.
pub trait IntoProcedure<M>: Send + Sync + 'static {
    /// Performs the conversion.
    fn into_procedure(self) -> BoxedProcedure;
}

/// Converts `f` into a [`BoxedProcedure`].
pub fn into_procedure<M, P>(f: P) -> BoxedProcedure
where
    P: IntoProcedure<M>,
{
    f.into_procedure()
}

#[doc(hidden)]
pub struct MessageMarker;
#[doc(hidden)]
pub struct ArgsMarker;
#[doc(hidden)]
pub struct MiddlewareMarker;
#[doc(hidden)]
pub struct ProcedureMarker;

struct FnProcedure<F, M, R> {
    f: F,
    _marker: PhantomData<fn() -> (M, R)>,
}

impl<F, M, R> FnProcedure<F, M, R> {
    fn boxed(f: F) -> BoxedProcedure
    where
        Self: Procedure,
    {
        Arc::new(Self {
            f,
            _marker: PhantomData,
        })
    }
}

impl<F, R> Procedure for FnProcedure<F, MessageMarker, R>
where
    F: Fn(Message) -> R + Send + Sync + 'static,
    R: IntoReply<Value> + 'static,
{
    fn call(&self, args: Args, _next: Next) -> DispatchResult<Reply> {
        (self.f)(args.message).into_reply()
    }
}

impl<F, R> Procedure for FnProcedure<F, ArgsMarker, R>
where
    F: Fn(Args) -> R + Send + Sync + 'static,
    R: IntoReply<Value> + 'static,
{
    fn call(&self, args: Args, _next: Next) -> DispatchResult<Reply> {
        (self.f)(args).into_reply()
    }
}

impl<F, R> Procedure for FnProcedure<F, MiddlewareMarker, R>
where
    F: Fn(Args, Next) -> R + Send + Sync + 'static,
    R: IntoReply<Value> + 'static,
{
    fn call(&self, args: Args, next: Next) -> DispatchResult<Reply> {
        (self.f)(args, next).into_reply()
    }
}

impl<F, R> IntoProcedure<(MessageMarker, R)> for F
where
    F: Fn(Message) -> R + Send + Sync + 'static,
    R: IntoReply<Value> + 'static,
{
    fn into_procedure(self) -> BoxedProcedure {
        FnProcedure::<F, MessageMarker, R>::boxed(self)
    }
}

impl<F, R> IntoProcedure<(ArgsMarker, R)> for F
where
    F: Fn(Args) -> R + Send + Sync + 'static,
    R: IntoReply<Value> + 'static,
{
    fn into_procedure(self) -> BoxedProcedure {
        FnProcedure::<F, ArgsMarker, R>::boxed(self)
    }
}

impl<F, R> IntoProcedure<(MiddlewareMarker, R)> for F
where
    F: Fn(Args, Next) -> R + Send + Sync + 'static,
    R: IntoReply<Value> + 'static,
{
    fn into_procedure(self) -> BoxedProcedure {
        FnProcedure::<F, MiddlewareMarker, R>::boxed(self)
    }
}

impl<P: Procedure> IntoProcedure<ProcedureMarker> for P {
    fn into_procedure(self) -> BoxedProcedure {
        Arc::new(self)
    }
}

/// Builds a `Vec<BoxedProcedure>` from functions and procedures.
///
/// ```rust,ignore
/// ctx.define("check: mw", chain![log, authorize, handler])?;
/// ```
#[macro_export]
macro_rules! chain {
    ($($procedure:expr),* $(,)?) => {
        vec![$($crate::into_procedure($procedure)),*]
    };
}

// ============================================================================
// Chain
// ============================================================================

/// A composed, non-empty list of procedures stored under one pattern.
#[derive(Clone)]
pub struct Chain {
    stages: Arc<[BoxedProcedure]>,
}

impl Chain {
    /// Composes `stages` in order.
    ///
    /// Fails with [`Error::NoProcedure`] if `stages` is empty.
    pub fn new(stages: Vec<BoxedProcedure>) -> DispatchResult<Self> {
        if stages.is_empty() {
            return Err(Error::NoProcedure);
        }
        Ok(Self {
            stages: stages.into(),
        })
    }

    /// A chain made of a single procedure.
    pub fn single(procedure: BoxedProcedure) -> Self {
        Self {
            stages: Arc::from(vec![procedure]),
        }
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Always `false`; chains have at least one stage.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Runs the chain with `message` as its only argument.
    pub fn invoke(&self, message: Message) -> DispatchResult<Reply> {
        self.run(Args::new(message))
    }

    /// Runs the chain with `args`.
    pub fn run(&self, args: Args) -> DispatchResult<Reply> {
        Next {
            stages: Arc::clone(&self.stages),
            position: 0,
        }
        .run(args)
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("stages", &self.stages.len())
            .finish()
    }
}

/// A chain nested inside another chain ignores the outer continuation.
impl Procedure for Chain {
    fn call(&self, args: Args, _next: Next) -> DispatchResult<Reply> {
        self.run(args)
    }
}

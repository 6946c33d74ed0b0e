//! # Teth
//!
//! Pattern-matched message dispatch with a minimal promise/stream primitive.
//!
//! ## Overview
//!
//! Application code binds message *patterns* to handler chains on a
//! [`Context`](framework::Context). Messages sent into the context are
//! matched by specificity, run through any middleware, and their results
//! come back as a [`Pipe`](core::Pipe): a value that can be awaited, streamed
//! or transformed with operators.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────────────────┐     ┌───────────────────────┐
//! │   Runtime   │────▶│ Registry (name → Context)│────▶│ Context               │
//! │  (config,   │     └──────────────────────────┘     │  PatternMatcher       │──▶ Chain ──▶ Reply
//! │   logging)  │                                      │  nested children      │
//! └─────────────┘                                      └───────────────────────┘
//! ```
//!
//! - **Runtime**: loads configuration, installs logging, owns the registry
//! - **Context**: a namespace of pattern → chain bindings with `send`,
//!   `send_sync` and `circular` dispatch
//! - **Chain**: middleware stages threading a typed continuation ([`Next`](framework::Next))
//! - **Pipe**: PUSH/RESOLVE/REJECT carrier with `map`, `filter`, `reduce`,
//!   `debounce`, `then`, `all`, `race` and friends
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use teth::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = TethRuntime::new();
//!     let math = runtime.context("math");
//!
//!     math.handle("op: double", |msg: Message| {
//!         json!(msg.get("n").and_then(|n| n.as_i64()).unwrap_or(0) * 2)
//!     })?;
//!
//!     let doubled = math.send("op: double, n: 21").await?;
//!     assert_eq!(doubled, json!(42));
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: Load `teth.toml` configuration files (default)
//! - `json-log`: JSON log output format

pub use teth_core as core;
pub use teth_framework as framework;
pub use teth_runtime as runtime;

pub use teth_framework::chain;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use teth::prelude::*;
/// ```
pub mod prelude {
    // Runtime - composition root
    pub use teth_runtime::{RuntimeBuilder, TethConfig, TethRuntime};

    // Dispatch
    pub use teth_framework::{
        Args, Chain, Context, ContextSettings, IntoProcedure, Next, Procedure, Registry,
        into_procedure,
    };

    // Messages, matching and pipes
    pub use teth_core::{
        DispatchResult, DuplicatePolicy, Emitter, Error, IntoMessage, IntoReply, Message,
        PatternMatcher, Pipe, Reply, Signal,
    };
}

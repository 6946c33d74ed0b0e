//! # Teth Framework
//!
//! Dispatch components built on top of `teth-core`.
//!
//! This layer provides:
//! - Procedure chains with typed continuations ([`Chain`], [`Next`], [`chain!`])
//! - Contexts binding patterns to chains, with `send`, `send_sync` and
//!   `circular` dispatch ([`Context`])
//! - A name → context registry with pluggable storage ([`Registry`])
//! - A `tower::Service` adapter so transports can wrap dispatch in layers

pub mod context;
pub mod procedure;
pub mod registry;

pub use context::{Context, ContextSettings};
pub use procedure::{
    Args, BoxedProcedure, Chain, IntoProcedure, Next, Procedure, into_procedure,
};
pub use registry::{ContextStore, MemoryStore, Registry};

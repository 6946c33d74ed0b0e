//! # Teth Core
//!
//! The leaf layer of the Teth dispatch runtime.
//!
//! This crate provides the building blocks every other Teth crate threads
//! values through:
//!
//! - **Messages**: immutable keyed values ([`Message`]) written as JSON or in
//!   a compact literal grammar ([`literal`])
//! - **Pattern Matcher**: specificity-ranked structural lookup
//!   ([`PatternMatcher`], [`DuplicatePolicy`])
//! - **Pipe**: a promise-compatible value/stream carrier ([`Pipe`],
//!   [`Emitter`], [`Signal`]) and the plain-or-deferred [`Reply`]
//! - **Errors**: the shared [`Error`] type carried by REJECT signals
//!
//! ## Example
//!
//! ```rust,ignore
//! use teth_core::{IntoMessage, PatternMatcher};
//!
//! let mut matcher = PatternMatcher::new();
//! matcher.define("say: Hello", "greeting")?;
//! matcher.define("say: Hello, to: Mr. Smith", "formal greeting")?;
//!
//! let message = "say: Hello, to: Mr. Smith, from: me".into_message()?;
//! assert_eq!(matcher.lookup(&message)?, &"formal greeting");
//! ```

pub mod error;
pub mod literal;
pub mod matcher;
pub mod message;
pub mod pipe;

pub use error::{DispatchResult, Error};
pub use matcher::{DuplicatePolicy, PatternMatcher};
pub use message::{IntoMessage, Message};
pub use pipe::{Completion, Emitter, IntoReply, Pipe, Reply, Signal};

/// Prelude for common imports.
pub mod prelude {
    pub use super::error::{DispatchResult, Error};
    pub use super::matcher::{DuplicatePolicy, PatternMatcher};
    pub use super::message::{IntoMessage, Message};
    pub use super::pipe::{Completion, Emitter, IntoReply, Pipe, Reply, Signal};
}

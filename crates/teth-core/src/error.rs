//! Unified error type for the Teth core.
//!
//! Every fallible operation in the core reports an [`Error`]. Inside a
//! [`Pipe`](crate::Pipe) the same type travels as the payload of a REJECT
//! signal, which is why it is cheap to clone.

use thiserror::Error;

use crate::message::Message;

// =============================================================================
// Dispatch Errors
// =============================================================================

/// Errors produced by matching, dispatching and pipeline evaluation.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// No registered pattern matched and no fallback was defined.
    #[error("no match found for {message} in this context")]
    NoMatch {
        /// The message that could not be matched.
        message: Message,
        /// Whether the failed lookup was a multicast (`lookup_all`) lookup.
        multicast: bool,
    },

    /// `define` was called without any handler or middleware.
    #[error("no procedure(s) provided")]
    NoProcedure,

    /// An identical pattern is already registered and the matcher rejects duplicates.
    #[error("pattern {pattern} is already defined in this context")]
    DuplicatePattern {
        /// The offending pattern.
        pattern: Message,
    },

    /// A compact message literal could not be parsed.
    #[error("invalid message literal `{input}` at offset {position}: {reason}")]
    Literal {
        /// The literal as given.
        input: String,
        /// Byte offset at which parsing failed.
        position: usize,
        /// What the parser expected.
        reason: String,
    },

    /// A value used as a message or pattern is not a keyed value.
    #[error("expected a keyed value, found {found}")]
    NotKeyed {
        /// Short description of the value that was supplied.
        found: String,
    },

    /// Every emitter of a pipe was dropped before it resolved or rejected.
    #[error("pipe was dropped before it settled")]
    Abandoned,

    /// An operator needed an async runtime (for timers) and none was running.
    #[error("no async runtime available: {0}")]
    Runtime(String),

    /// A handler panicked while being dispatched.
    #[error("handler panicked: {0}")]
    Panicked(String),

    /// Nesting a context would make it consult itself.
    #[error("nesting this context would create a cycle")]
    NestingCycle,

    /// Application-defined failure raised by a handler or operator.
    #[error("{0}")]
    Custom(String),
}

impl Error {
    /// Creates a custom error from any displayable message.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Creates a no-match error for the given message.
    pub fn no_match(message: Message, multicast: bool) -> Self {
        Self::NoMatch { message, multicast }
    }

    /// Numeric code carried by dispatch failures.
    ///
    /// Transport collaborators embed this code in their error responses.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::NoMatch {
                multicast: false, ..
            } => Some(-1),
            Self::NoMatch {
                multicast: true, ..
            } => Some(-2),
            Self::NoProcedure => Some(-4),
            _ => None,
        }
    }

    /// Returns `true` if this error means nothing handled the message.
    pub fn is_no_match(&self) -> bool {
        matches!(self, Self::NoMatch { .. })
    }
}

/// Result type for core operations.
pub type DispatchResult<T> = Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_no_match_display() {
        let message = Message::try_from(json!({"greet": "the-king"})).unwrap();
        let err = Error::no_match(message, false);
        assert_eq!(
            err.to_string(),
            r#"no match found for {"greet":"the-king"} in this context"#
        );
    }

    #[test]
    fn test_codes() {
        let message = Message::default();
        assert_eq!(Error::no_match(message.clone(), false).code(), Some(-1));
        assert_eq!(Error::no_match(message, true).code(), Some(-2));
        assert_eq!(Error::NoProcedure.code(), Some(-4));
        assert_eq!(Error::custom("boom").code(), None);
    }
}

//! Plain-or-deferred results.

use serde_json::Value;

use super::Pipe;
use crate::error::Error;
use crate::message::Message;

/// The result of a handler or operator callback.
///
/// Either the value is available right away, or it will be supplied by a
/// [`Pipe`]. Dispatch code matches on the variant instead of probing shapes.
#[derive(Debug)]
pub enum Reply<T = Value> {
    /// An immediate value.
    Value(T),
    /// A value supplied later by a pipe.
    Deferred(Pipe<T>),
}

impl<T: Send + 'static> Reply<T> {
    /// Returns the immediate value, if there is one.
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Value(value) => Some(value),
            Self::Deferred(_) => None,
        }
    }

    /// Returns `true` if the value is supplied by a pipe.
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred(_))
    }

    /// Normalizes the reply into a pipe, wrapping immediate values in a
    /// resolved one.
    pub fn into_pipe(self) -> Pipe<T> {
        match self {
            Self::Value(value) => Pipe::resolve(value),
            Self::Deferred(pipe) => pipe,
        }
    }

    /// Waits for the value.
    pub async fn into_value(self) -> Result<T, Error> {
        match self {
            Self::Value(value) => Ok(value),
            Self::Deferred(pipe) => pipe.await,
        }
    }
}

impl<T> From<Pipe<T>> for Reply<T> {
    fn from(pipe: Pipe<T>) -> Self {
        Self::Deferred(pipe)
    }
}

// =============================================================================
// IntoReply
// =============================================================================

/// Conversion of callback return values into a [`Reply`].
///
/// Returning `Err` is how handlers and operator callbacks fail; it becomes a
/// REJECT at the nearest pipe or dispatch boundary.
///
/// Standard scalars, strings and [`Value`] convert into a reply of their own
/// type, so `pipe.map(|n: i64| n + 1)` needs no wrapping. Other types return
/// [`Reply::Value`] or implement this trait. Handlers reply with [`Value`],
/// [`Message`] or `()`.
pub trait IntoReply<T> {
    /// Performs the conversion.
    fn into_reply(self) -> Result<Reply<T>, Error>;
}

impl<T> IntoReply<T> for Reply<T> {
    fn into_reply(self) -> Result<Reply<T>, Error> {
        Ok(self)
    }
}

impl<T> IntoReply<T> for Pipe<T> {
    fn into_reply(self) -> Result<Reply<T>, Error> {
        Ok(Reply::Deferred(self))
    }
}

impl<T, R> IntoReply<T> for Result<R, Error>
where
    R: IntoReply<T>,
{
    fn into_reply(self) -> Result<Reply<T>, Error> {
        self?.into_reply()
    }
}

impl IntoReply<Value> for () {
    fn into_reply(self) -> Result<Reply<Value>, Error> {
        Ok(Reply::Value(Value::Null))
    }
}

impl IntoReply<Value> for Message {
    fn into_reply(self) -> Result<Reply<Value>, Error> {
        Ok(Reply::Value(self.to_value()))
    }
}

macro_rules! impl_into_reply_plain {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoReply<$ty> for $ty {
                fn into_reply(self) -> Result<Reply<$ty>, Error> {
                    Ok(Reply::Value(self))
                }
            }
        )*
    };
}

impl_into_reply_plain!(
    Value,
    Vec<Value>,
    bool,
    char,
    String,
    &'static str,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
);

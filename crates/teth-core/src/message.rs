//! Immutable keyed messages.
//!
//! A [`Message`] is what gets dispatched through a context, and a pattern is
//! simply a message used as a partial template. Both can be written as plain
//! JSON objects or in the compact literal grammar handled by
//! [`literal`](crate::literal):
//!
//! ```rust,ignore
//! let a: Message = "say: Hello, to: Mr. Smith".into_message()?;
//! let b: Message = json!({"say": "Hello", "to": "Mr. Smith"}).into_message()?;
//! assert_eq!(a, b);
//! ```

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DispatchResult, Error};
use crate::literal;

/// An immutable, cheaply clonable keyed value.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(Arc<Map<String, Value>>);

impl Message {
    /// Wraps a JSON object.
    pub fn new(map: Map<String, Value>) -> Self {
        Self(Arc::new(map))
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns the number of top-level keys.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the message has no keys.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the top-level entries in key order.
    pub fn iter(&self) -> serde_json::map::Iter<'_> {
        self.0.iter()
    }

    /// Returns the underlying object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Returns `true` if every key of `pattern` exists here with an equal value.
    ///
    /// Extra keys in `self` are ignored, so the empty pattern matches every
    /// message.
    pub fn matches(&self, pattern: &Message) -> bool {
        pattern
            .iter()
            .all(|(key, value)| self.0.get(key) == Some(value))
    }

    /// Returns a copy of this message with `key` set to `value`.
    pub fn with(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut map = (*self.0).clone();
        map.insert(key.into(), value.into());
        Self::new(map)
    }

    /// Returns a copy of this message with every entry of `other` applied on top.
    pub fn merge(&self, other: &Message) -> Self {
        let mut map = (*self.0).clone();
        for (key, value) in other.iter() {
            map.insert(key.clone(), value.clone());
        }
        Self::new(map)
    }

    /// Converts the message into a JSON object value.
    pub fn to_value(&self) -> Value {
        Value::Object((*self.0).clone())
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Message({self})")
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(&*self.0).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

impl From<Map<String, Value>> for Message {
    fn from(map: Map<String, Value>) -> Self {
        Self::new(map)
    }
}

impl TryFrom<Value> for Message {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self::new(map)),
            other => Err(Error::NotKeyed {
                found: describe(&other).to_string(),
            }),
        }
    }
}

impl From<Message> for Value {
    fn from(message: Message) -> Self {
        message.to_value()
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// =============================================================================
// IntoMessage
// =============================================================================

/// Conversion into a normalized, immutable [`Message`].
///
/// Strings are parsed with the compact literal grammar; JSON values must be
/// objects.
pub trait IntoMessage {
    /// Performs the conversion.
    fn into_message(self) -> DispatchResult<Message>;
}

impl IntoMessage for Message {
    fn into_message(self) -> DispatchResult<Message> {
        Ok(self)
    }
}

impl IntoMessage for &Message {
    fn into_message(self) -> DispatchResult<Message> {
        Ok(self.clone())
    }
}

impl IntoMessage for &str {
    fn into_message(self) -> DispatchResult<Message> {
        literal::parse(self).map(Message::new)
    }
}

impl IntoMessage for String {
    fn into_message(self) -> DispatchResult<Message> {
        self.as_str().into_message()
    }
}

impl IntoMessage for &String {
    fn into_message(self) -> DispatchResult<Message> {
        self.as_str().into_message()
    }
}

impl IntoMessage for Value {
    fn into_message(self) -> DispatchResult<Message> {
        Message::try_from(self)
    }
}

impl IntoMessage for Map<String, Value> {
    fn into_message(self) -> DispatchResult<Message> {
        Ok(Message::new(self))
    }
}

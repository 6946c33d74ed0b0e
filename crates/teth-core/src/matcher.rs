//! Pattern matcher for the Teth runtime.
//!
//! A [`PatternMatcher`] stores handlers under partial-value patterns and
//! finds the handlers whose pattern is a subset of a given [`Message`].
//!
//! # Selection Rules
//!
//! - A pattern matches when every one of its keys exists in the message with
//!   an equal value. Extra keys in the message are ignored.
//! - [`lookup`](PatternMatcher::lookup) returns the most specific match (the
//!   pattern with the most keys). Ties go to the most recently registered.
//! - [`lookup_all`](PatternMatcher::lookup_all) returns every match, most
//!   recently registered first.
//!
//! # Index
//!
//! Each registered pattern is decomposed into `(key, value)` pairs and
//! listed under every pair in an inverted index. A lookup walks the pairs of
//! the incoming message, counts hits per pattern, and keeps the patterns
//! whose hit count equals their size. Patterns never sharing a pair with the
//! message are never visited.
//!
//! ```rust,ignore
//! let mut matcher = PatternMatcher::new();
//! matcher.define("say: Hello", 1)?;
//! matcher.define("say: Hello, to: Mr. Smith", 2)?;
//!
//! let message = "say: Hello, to: Mr. Smith, from: me".into_message()?;
//! assert_eq!(matcher.lookup(&message)?, &2);
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{DispatchResult, Error};
use crate::message::{IntoMessage, Message};

/// What [`PatternMatcher::define`] does when an identical pattern already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Fail with [`Error::DuplicatePattern`].
    #[default]
    Reject,
    /// Replace the existing handler; the pattern counts as newly registered.
    Replace,
    /// Keep both. Single lookups prefer the newer one, multicast sees all.
    Stack,
}

/// A registered pattern.
#[derive(Debug, Clone)]
struct Entry<H> {
    pattern: Message,
    handler: H,
    /// Number of keys in the pattern, fixed at definition time.
    specificity: usize,
    /// Registration sequence number; higher means more recent.
    seq: u64,
}

/// `(key, canonical JSON of value)`.
type Pair = (String, String);

fn pair(key: &str, value: &serde_json::Value) -> Pair {
    (key.to_string(), value.to_string())
}

/// Matches messages against registered patterns.
#[derive(Debug, Clone)]
pub struct PatternMatcher<H> {
    entries: Vec<Entry<H>>,
    index: HashMap<Pair, Vec<usize>>,
    /// Entries with an empty pattern; they match everything.
    universal: Vec<usize>,
    fallback: Option<H>,
    policy: DuplicatePolicy,
    next_seq: u64,
}

impl<H> Default for PatternMatcher<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> PatternMatcher<H> {
    /// Creates an empty matcher that rejects duplicate patterns.
    pub fn new() -> Self {
        Self::with_policy(DuplicatePolicy::default())
    }

    /// Creates an empty matcher with the given duplicate policy.
    pub fn with_policy(policy: DuplicatePolicy) -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            universal: Vec::new(),
            fallback: None,
            policy,
            next_seq: 0,
        }
    }

    /// Returns the duplicate policy.
    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Returns the number of registered patterns.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no pattern is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the registered patterns in registration order.
    pub fn patterns(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().map(|e| &e.pattern)
    }

    /// Registers `handler` under `pattern`.
    ///
    /// String patterns are parsed with the compact literal grammar.
    pub fn define(&mut self, pattern: impl IntoMessage, handler: H) -> DispatchResult<&mut Self> {
        let pattern = pattern.into_message()?;
        let seq = self.bump_seq();

        if let Some(existing) = self.entries.iter().position(|e| e.pattern == pattern) {
            match self.policy {
                DuplicatePolicy::Reject => {
                    return Err(Error::DuplicatePattern { pattern });
                }
                DuplicatePolicy::Replace => {
                    trace!(%pattern, "Replacing handler for existing pattern");
                    let entry = &mut self.entries[existing];
                    entry.handler = handler;
                    entry.seq = seq;
                    return Ok(self);
                }
                DuplicatePolicy::Stack => {}
            }
        }

        let idx = self.entries.len();
        if pattern.is_empty() {
            self.universal.push(idx);
        } else {
            for (key, value) in pattern.iter() {
                self.index.entry(pair(key, value)).or_default().push(idx);
            }
        }

        debug!(%pattern, patterns = idx + 1, "Pattern defined");
        self.entries.push(Entry {
            specificity: pattern.len(),
            pattern,
            handler,
            seq,
        });
        Ok(self)
    }

    /// Sets the handler used when no pattern matches.
    pub fn unknown(&mut self, handler: H) -> &mut Self {
        self.fallback = Some(handler);
        self
    }

    /// Returns the fallback handler, if any.
    pub fn fallback(&self) -> Option<&H> {
        self.fallback.as_ref()
    }

    fn bump_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Indices of every entry whose pattern is a subset of `message`.
    fn candidates(&self, message: &Message) -> Vec<usize> {
        let mut hits: HashMap<usize, usize> = HashMap::new();
        for (key, value) in message.iter() {
            if let Some(indices) = self.index.get(&pair(key, value)) {
                for &idx in indices {
                    *hits.entry(idx).or_default() += 1;
                }
            }
        }

        let mut matched: Vec<usize> = hits
            .into_iter()
            .filter(|&(idx, count)| count == self.entries[idx].specificity)
            .map(|(idx, _)| idx)
            .collect();
        matched.extend(self.universal.iter().copied());
        matched
    }

    /// Returns the most specific matching handler, ignoring the fallback.
    pub fn find(&self, message: &Message) -> Option<&H> {
        self.candidates(message)
            .into_iter()
            .map(|idx| &self.entries[idx])
            .max_by_key(|e| (e.specificity, e.seq))
            .map(|e| &e.handler)
    }

    /// Returns every matching handler, most recently registered first,
    /// ignoring the fallback.
    pub fn find_all(&self, message: &Message) -> Vec<&H> {
        let mut entries: Vec<&Entry<H>> = self
            .candidates(message)
            .into_iter()
            .map(|idx| &self.entries[idx])
            .collect();
        entries.sort_by(|a, b| b.seq.cmp(&a.seq));
        entries.into_iter().map(|e| &e.handler).collect()
    }

    /// Returns the best handler for `message`, or the fallback.
    pub fn lookup(&self, message: &Message) -> DispatchResult<&H> {
        self.find(message)
            .or(self.fallback.as_ref())
            .ok_or_else(|| Error::no_match(message.clone(), false))
    }

    /// Returns the best handler for `message`, or `override_handler` when
    /// nothing matches. The fallback is not consulted.
    pub fn lookup_or<'a>(&'a self, message: &Message, override_handler: &'a H) -> &'a H {
        self.find(message).unwrap_or(override_handler)
    }

    /// Returns every matching handler, or just the fallback when nothing matches.
    pub fn lookup_all(&self, message: &Message) -> DispatchResult<Vec<&H>> {
        let found = self.find_all(message);
        if !found.is_empty() {
            return Ok(found);
        }
        match &self.fallback {
            Some(fallback) => Ok(vec![fallback]),
            None => Err(Error::no_match(message.clone(), true)),
        }
    }
}

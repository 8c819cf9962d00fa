//! Error taxonomy.
//!
//! - [`CorpusError`] is fatal at load time: a corpus that fails to parse or
//!   compile is never handed out.
//! - [`EngineError`] is raised by `respond` for authoring defects (redirect
//!   loops, rules with nothing to say) and for variable store failures.
//!
//! "No match" is not an error; it is routed to the fallback hook.

use std::path::PathBuf;
use thiserror::Error;

/// Where in the corpus input a definition came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    /// Zero-based index of the input unit (block or file).
    pub unit: usize,
    /// One-based line number inside that unit.
    pub line: usize,
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unit {} line {}", self.unit, self.line)
    }
}

/// Errors raised while loading or compiling a corpus.
#[derive(Debug, Error)]
pub enum CorpusError {
    /// A line or block could not be parsed, or violates a structural rule.
    #[error("malformed corpus at {at}: {reason}")]
    Malformed { at: Location, reason: String },

    /// A trigger references an array that was never declared.
    #[error("trigger `{trigger}` at {at} references undeclared array `@{name}`")]
    UnknownArray { name: String, trigger: String, at: Location },

    /// A topic includes or inherits a topic that has no rules.
    #[error("topic `{topic}` references unknown topic `{target}`")]
    UnknownTopic { topic: String, target: String },

    /// Reading corpus files failed.
    #[error("failed to read corpus from {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CorpusError {
    pub(crate) fn malformed(at: Location, reason: impl Into<String>) -> Self {
        CorpusError::Malformed { at, reason: reason.into() }
    }
}

/// Failure reported by a [`VariableStore`](crate::VariableStore) backend.
#[derive(Debug, Error)]
#[error("variable store error: {message}")]
pub struct StoreError {
    pub message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        StoreError { message: message.into() }
    }
}

/// Errors raised while answering an utterance.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A chain of redirects or inline redirects went deeper than allowed.
    #[error("redirect depth {depth} exceeded while resolving `{trigger}`")]
    RedirectLoop { depth: usize, trigger: String },

    /// A matched rule had no usable reply (every condition false, no
    /// redirect, no positively weighted reply).
    #[error("rule `{trigger}` produced no reply")]
    NoReply { trigger: String },

    /// The variable store hook failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Another `respond` call for the same session is still in flight.
    #[error("session `{0}` is busy")]
    SessionBusy(String),
}

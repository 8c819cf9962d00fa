//! Rule-driven dialogue engine.
//!
//! A corpus of topic-scoped triggers and replies is compiled once into an
//! immutable [`CompiledCorpus`]. Each [`Session`] then feeds utterances through
//! [`respond`]: the matcher picks the most specific trigger in the session's
//! active topic, the resolver walks conditions and redirects, picks a weighted
//! reply and expands its tags.
//!
//! ```
//! use colloquy::{Options, Session, load_corpus, respond};
//!
//! let corpus = load_corpus(["+ hello\n- Hi there!"]).unwrap();
//! let mut session = Session::new("user", &Options::default());
//! assert_eq!(respond(&corpus, &mut session, "Hello!").unwrap(), "Hi there!");
//! ```

#[macro_use]
mod macros;
mod api;
mod engine;
mod error;
mod session;

pub use api::{
    DEFAULT_DEPTH, DefaultFallback, Fallback, INITIAL_TOPIC, Options, Reply, ReplyDetails, ReplyVerbose, load_corpus,
    load_corpus_dir, load_corpus_paths, respond, respond_verbose_with, respond_with,
};
pub use engine::{CompiledCorpus, MatchMetrics, StepKind, TraceStep};
pub use error::{CorpusError, EngineError, Location, StoreError};
pub use session::{MemoryStore, Session, SessionRegistry, UNDEFINED, VariableStore};

// --- Internal types ---------------------------------------------------------

/// Which tokens a wildcard element accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum WildcardKind {
    /// `*`: one or more tokens of any kind.
    Any,
    /// `#`: exactly one numeric token.
    Number,
    /// `_`: exactly one alphabetic token.
    Alpha,
}

/// One element of a compiled trigger.
///
/// Alternatives and array entries are stored pre-tokenized so matching never
/// re-reads trigger syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Element {
    Literal(String),
    Wildcard(WildcardKind),
    /// `@name`: any entry of the named array. Captures the matched entry.
    Array { name: String, entries: Vec<Vec<String>> },
    /// `(a|b c)`: exactly one alternative. Captures the matched alternative.
    Alternation(Vec<Vec<String>>),
    /// `[a|b c]`: zero or one alternative. Never captures.
    Optional(Vec<Vec<String>>),
}

impl Element {
    /// Smallest number of input tokens this element can consume.
    pub(crate) fn min_tokens(&self) -> usize {
        match self {
            Element::Literal(_) | Element::Wildcard(_) => 1,
            Element::Array { entries, .. } | Element::Alternation(entries) => {
                entries.iter().map(Vec::len).min().unwrap_or(0)
            }
            Element::Optional(_) => 0,
        }
    }
}

/// Condition operator of a `*` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CondOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CondOp {
    pub(crate) fn parse(op: &str) -> Option<Self> {
        match op {
            "==" | "eq" => Some(CondOp::Eq),
            "!=" | "ne" | "<>" => Some(CondOp::Ne),
            "<" => Some(CondOp::Lt),
            "<=" => Some(CondOp::Le),
            ">" => Some(CondOp::Gt),
            ">=" => Some(CondOp::Ge),
            _ => None,
        }
    }

    /// Compare two tag-expanded operands. Ordering operators only hold for
    /// integer operands.
    pub(crate) fn holds(self, left: &str, right: &str) -> bool {
        match self {
            CondOp::Eq => left == right,
            CondOp::Ne => left != right,
            _ => match (left.trim().parse::<i64>(), right.trim().parse::<i64>()) {
                (Ok(l), Ok(r)) => match self {
                    CondOp::Lt => l < r,
                    CondOp::Le => l <= r,
                    CondOp::Gt => l > r,
                    CondOp::Ge => l >= r,
                    CondOp::Eq | CondOp::Ne => false,
                },
                _ => false,
            },
        }
    }
}

/// `* left OP right => text`
#[derive(Debug, Clone)]
pub(crate) struct Condition {
    pub left: String,
    pub op: CondOp,
    pub right: String,
    pub text: String,
}

/// One `-` line with its selection weight.
#[derive(Debug, Clone)]
pub(crate) struct ReplyAlt {
    pub text: String,
    pub weight: u32,
}

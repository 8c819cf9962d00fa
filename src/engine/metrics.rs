//! Reply metrics and trace.
//!
//! Collected by the resolver on every call; the plain `respond` path simply
//! drops them, `respond_verbose_with` hands them to the caller.
//!
//! ## Design notes
//!
//! - `TraceStep::depth` is the redirect depth the step ran at (0 for the
//!   user's utterance).
//! - Matching counters are summed across every match attempted while
//!   producing one reply, redirects included.

use std::time::Duration;

/// What a trace step records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// A trigger matched the text in `detail`.
    Match,
    /// Nothing matched `detail`; the fallback supplied the reply.
    NoMatch,
    /// A condition held; `detail` is its text.
    Condition,
    /// The rule redirected to `detail`.
    Redirect,
    /// A `{@...}` tag redirected to `detail`.
    InlineRedirect,
    /// A reply alternative was chosen; `detail` is its raw text.
    Reply,
}

/// One step of a reply's resolution.
#[derive(Debug, Clone)]
pub struct TraceStep {
    pub depth: usize,
    pub kind: StepKind,
    /// Source of the trigger involved (empty for `NoMatch`).
    pub trigger: String,
    pub detail: String,
}

/// Counters for the matching phase.
#[derive(Debug, Default, Clone)]
pub struct MatchMetrics {
    /// Candidates in scan order across all match attempts.
    pub candidates: usize,
    /// Candidates skipped because a required word was missing.
    pub gated: usize,
    /// Candidates whose pattern was actually run.
    pub attempted: usize,
    /// Time spent in the matcher.
    pub elapsed: Duration,
}

impl MatchMetrics {
    pub(crate) fn absorb(&mut self, other: &MatchMetrics) {
        self.candidates += other.candidates;
        self.gated += other.gated;
        self.attempted += other.attempted;
        self.elapsed += other.elapsed;
    }
}

/// Everything observed while producing one reply.
#[derive(Debug, Default, Clone)]
pub struct ReplyMetrics {
    /// Total elapsed time, scan to committed reply.
    pub total: Duration,
    pub matching: MatchMetrics,
    /// Deepest redirect depth reached.
    pub max_depth: usize,
    pub trace: Vec<TraceStep>,
}

//! Matching and resolution engine.
//!
//! The engine is split into focused submodules under `src/engine/`; this file
//! wires them together and re-exports what the rest of the crate uses.
//!
//! ## How the parts work together
//!
//! Building a corpus and answering an utterance are two separate pipelines:
//!
//! ```text
//! corpus text ── load_units ──────────▶ RawCorpus          (loader.rs)
//!                                          │
//!                 CompiledCorpus::compile  │  TriggerPattern::compile (pattern.rs)
//!                                          v
//!                                    CompiledCorpus        (compiled_rules.rs)
//!                                          │  immutable, shared
//!                                          │
//! utterance ── Utterance::scan ───────────┼─ (utterance.rs)
//!                                          v
//!                               Matcher::find              (matcher.rs)
//!                                 - `%` rules first
//!                                 - required-word gate
//!                                 - backtracking match
//!                                          │
//!                                          v
//!                               Resolver::resolve          (resolve.rs)
//!                                 - conditions, redirects
//!                                 - weighted choice
//!                                 - tag expansion          (tags.rs)
//!                                 - inline redirects
//!                                          │
//!                                          v
//!                                 reply text + pending topic + metrics
//! ```
//!
//! ## Responsibilities by module
//!
//! - `loader.rs`: line grammar, topic blocks and definitions.
//! - `pattern.rs`: trigger syntax → elements, specificity key.
//! - `compiled_rules.rs`: the immutable corpus and per-topic scan order.
//! - `utterance.rs`: input normalization and substitutions.
//! - `matcher.rs`: first full match in scan order.
//! - `resolve.rs`: rule → reply text, depth guard.
//! - `tags.rs`: `<...>` and `{...}` tag expansion.
//! - `metrics.rs`: timings, counters and the step trace.
//!
//! ## Debugging
//!
//! Every stage logs through `tracing` at `debug` level (`COLLOQUY_LOG=colloquy=debug`
//! with the bundled binary).

#[path = "engine/compiled_rules.rs"]
mod compiled_rules;
#[path = "engine/loader.rs"]
mod loader;
#[path = "engine/matcher.rs"]
mod matcher;
#[path = "engine/metrics.rs"]
mod metrics;
#[path = "engine/pattern.rs"]
mod pattern;
#[path = "engine/resolve.rs"]
mod resolve;
#[path = "engine/tags.rs"]
mod tags;
#[path = "engine/utterance.rs"]
mod utterance;

pub use compiled_rules::CompiledCorpus;
pub(crate) use loader::{DEFAULT_TOPIC, load_units};
pub use metrics::{MatchMetrics, ReplyMetrics, StepKind, TraceStep};
pub(crate) use resolve::Resolver;
pub(crate) use utterance::Utterance;

use crate::engine::{self, CompiledCorpus, MatchMetrics, ReplyMetrics, Resolver, TraceStep, Utterance};
use crate::error::{CorpusError, EngineError};
use crate::session::Session;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Redirect depth used when neither [`Options::depth`] nor the corpus
/// (`! global depth = N`) sets one.
pub const DEFAULT_DEPTH: usize = 50;

/// Topic new sessions start in by default. Corpora without it answer from
/// `random` instead.
pub const INITIAL_TOPIC: &str = "welcome";

/// Options that affect session creation and reply resolution.
#[derive(Debug, Clone)]
pub struct Options {
    /// Topic new sessions start in.
    pub initial_topic: String,
    /// Maximum redirect depth. Overrides the corpus `depth` global.
    pub depth: Option<usize>,
    /// Seed for the per-session RNG; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for Options {
    fn default() -> Self {
        Options { initial_topic: INITIAL_TOPIC.to_string(), depth: None, seed: None }
    }
}

/// Produces the reply when nothing matches.
///
/// Implemented for any `Fn(&str) -> String`; the argument is the raw text
/// that failed to match (the utterance, or a redirect target).
pub trait Fallback {
    fn reply(&self, utterance: &str) -> String;
}

impl<F> Fallback for F
where
    F: Fn(&str) -> String,
{
    fn reply(&self, utterance: &str) -> String {
        self(utterance)
    }
}

/// Answers every unmatched utterance with `ERR: No Reply Matched`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFallback;

impl Fallback for DefaultFallback {
    fn reply(&self, _utterance: &str) -> String {
        "ERR: No Reply Matched".to_string()
    }
}

/// Result from [`respond_with`].
#[derive(Debug, Clone)]
pub struct Reply {
    /// The utterance as received.
    pub input: String,
    pub text: String,
    /// Whether a trigger matched the utterance (false: the fallback answered).
    pub matched: bool,
    /// The session's topic after this reply.
    pub topic: String,
    pub elapsed: Duration,
}

/// Additional details returned by [`respond_verbose_with`].
#[derive(Debug, Clone)]
pub struct ReplyDetails {
    /// Normalized form of the utterance, as the matcher saw it.
    pub normalized: String,
    /// Topic the utterance was matched in.
    pub topic_before: String,
    pub total: Duration,
    /// Matcher counters, summed over redirects.
    pub matching: MatchMetrics,
    pub max_depth: usize,
    /// Captures bound by the matched trigger.
    pub stars: Vec<String>,
    pub trace: Vec<TraceStep>,
}

/// Result from [`respond_verbose_with`].
#[derive(Debug, Clone)]
pub struct ReplyVerbose {
    pub input: String,
    pub text: String,
    pub matched: bool,
    pub topic: String,
    pub elapsed: Duration,
    pub details: ReplyDetails,
}

/// Compile a corpus from text units (one per file or block).
///
/// # Example
/// ```
/// use colloquy::load_corpus;
///
/// let corpus = load_corpus(["! array hi = hello hey\n+ @hi\n- Hi!"]).unwrap();
/// assert_eq!(corpus.rule_count(), 1);
/// ```
pub fn load_corpus<I, S>(units: I) -> Result<CompiledCorpus, CorpusError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let start = Instant::now();
    let corpus = CompiledCorpus::compile(engine::load_units(units)?)?;
    tracing::debug!(rules = corpus.rule_count(), topics = corpus.topics().len(), elapsed = ?start.elapsed(), "corpus compiled");
    Ok(corpus)
}

/// Compile a corpus from files. Directories contribute their `*.rive` files
/// sorted by name; files are read as given.
pub fn load_corpus_paths<I, P>(paths: I) -> Result<CompiledCorpus, CorpusError>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut files = Vec::new();
    for path in paths {
        let path = path.as_ref();
        if path.is_dir() {
            files.extend(rive_files(path)?);
        } else {
            files.push(path.to_path_buf());
        }
    }

    let mut units = Vec::with_capacity(files.len());
    for file in &files {
        let text = std::fs::read_to_string(file).map_err(|source| CorpusError::Io { path: file.clone(), source })?;
        tracing::debug!(file = %file.display(), "read corpus file");
        units.push(text);
    }
    load_corpus(units)
}

/// Compile every `*.rive` file in `dir`.
pub fn load_corpus_dir(dir: impl AsRef<Path>) -> Result<CompiledCorpus, CorpusError> {
    load_corpus_paths([dir])
}

fn rive_files(dir: &Path) -> Result<Vec<PathBuf>, CorpusError> {
    let io = |source| CorpusError::Io { path: dir.to_path_buf(), source };
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io)? {
        let path = entry.map_err(io)?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("rive")) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Answer `utterance` with default options and the default fallback.
///
/// # Example
/// ```
/// use colloquy::{Options, Session, load_corpus, respond};
///
/// let corpus = load_corpus(["+ my name is *\n- <set name=<formal>>Nice to meet you, <get name>."]).unwrap();
/// let mut session = Session::new("user", &Options::default());
/// let reply = respond(&corpus, &mut session, "my name is sam").unwrap();
/// assert_eq!(reply, "Nice to meet you, Sam.");
/// ```
pub fn respond(corpus: &CompiledCorpus, session: &mut Session, utterance: &str) -> Result<String, EngineError> {
    respond_with(corpus, session, utterance, &Options::default(), &DefaultFallback).map(|r| r.text)
}

/// Answer `utterance` for `session`.
///
/// On success the session's topic, last reply and captures are updated. On
/// error they are left as they were; variable writes already made by tags
/// are not rolled back.
pub fn respond_with(
    corpus: &CompiledCorpus,
    session: &mut Session,
    utterance: &str,
    options: &Options,
    fallback: &dyn Fallback,
) -> Result<Reply, EngineError> {
    let run = run(corpus, session, utterance, options, fallback)?;
    Ok(Reply {
        input: utterance.to_string(),
        text: run.text,
        matched: run.matched,
        topic: session.topic.clone(),
        elapsed: run.metrics.total,
    })
}

/// Like [`respond_with`] but also returns the match trace and metrics.
pub fn respond_verbose_with(
    corpus: &CompiledCorpus,
    session: &mut Session,
    utterance: &str,
    options: &Options,
    fallback: &dyn Fallback,
) -> Result<ReplyVerbose, EngineError> {
    let run = run(corpus, session, utterance, options, fallback)?;
    let details = ReplyDetails {
        normalized: run.normalized,
        topic_before: run.topic_before,
        total: run.metrics.total,
        matching: run.metrics.matching,
        max_depth: run.metrics.max_depth,
        stars: session.stars.clone(),
        trace: run.metrics.trace,
    };
    Ok(ReplyVerbose {
        input: utterance.to_string(),
        text: run.text,
        matched: run.matched,
        topic: session.topic.clone(),
        elapsed: details.total,
        details,
    })
}

struct Run {
    text: String,
    matched: bool,
    normalized: String,
    topic_before: String,
    metrics: ReplyMetrics,
}

fn run(
    corpus: &CompiledCorpus,
    session: &mut Session,
    utterance: &str,
    options: &Options,
    fallback: &dyn Fallback,
) -> Result<Run, EngineError> {
    let start = Instant::now();
    let scanned = Utterance::scan(utterance, &corpus.subs);
    let topic_before = session.topic.clone();
    let depth = max_depth(corpus, options);

    let topic = if corpus.has_topic(&topic_before) {
        topic_before.as_str()
    } else {
        tracing::warn!(topic = %topic_before, "active topic has no rules; answering from `{}`", engine::DEFAULT_TOPIC);
        engine::DEFAULT_TOPIC
    };
    let resolution = Resolver::new(corpus, session, fallback, depth).resolve(topic, &scanned)?;

    let next = match resolution.pending_topic {
        Some(next) => {
            if !corpus.has_topic(&next) {
                tracing::warn!(topic = %next, "switching to a topic with no rules");
            }
            next
        }
        None => topic.to_string(),
    };
    if next != topic_before {
        tracing::debug!(from = %topic_before, to = %next, "topic change");
        session.topic = next;
    }
    session.last_reply = Some(resolution.text.clone());
    session.stars = resolution.stars;
    session.touch();

    let mut metrics = resolution.metrics;
    metrics.total = start.elapsed();
    Ok(Run { text: resolution.text, matched: resolution.matched, normalized: scanned.normalized(), topic_before, metrics })
}

fn max_depth(corpus: &CompiledCorpus, options: &Options) -> usize {
    options
        .depth
        .or_else(|| corpus.global("depth").and_then(|v| v.trim().parse().ok()))
        .unwrap_or(DEFAULT_DEPTH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StepKind;

    fn seeded() -> Options {
        Options { seed: Some(11), ..Options::default() }
    }

    #[test]
    fn respond_with_returns_reply_and_commits_state() {
        let corpus = load_corpus(["+ hello\n- Hi there.\n"]).unwrap();
        let mut session = Session::new("u", &seeded());
        let reply = respond_with(&corpus, &mut session, "Hello!", &seeded(), &DefaultFallback).unwrap();

        assert_eq!(reply.input, "Hello!");
        assert_eq!(reply.text, "Hi there.");
        assert!(reply.matched);
        assert_eq!(reply.topic, "random");
        assert_eq!(session.last_reply(), Some("Hi there."));
    }

    #[test]
    fn closures_are_fallbacks() {
        let corpus = load_corpus(["+ hello\n- Hi.\n"]).unwrap();
        let mut session = Session::new("u", &seeded());
        let fallback = |text: &str| format!("I don't understand \"{text}\".");
        let reply = respond_with(&corpus, &mut session, "what now", &seeded(), &fallback).unwrap();
        assert!(!reply.matched);
        assert_eq!(reply.text, "I don't understand \"what now\".");
    }

    #[test]
    fn topic_change_applies_after_reply() {
        let corpus = load_corpus([
            "+ play\n- Let's play.{topic=game}\n+ *\n- Random.\n",
            "> topic game\n+ stop\n- Stopped.{topic=random}\n+ *\n- In game.\n< topic\n",
        ])
        .unwrap();
        let mut session = Session::new("u", &seeded());
        assert_eq!(respond(&corpus, &mut session, "play").unwrap(), "Let's play.");
        assert_eq!(session.topic(), "game");
        assert_eq!(respond(&corpus, &mut session, "anything").unwrap(), "In game.");
        assert_eq!(respond(&corpus, &mut session, "stop").unwrap(), "Stopped.");
        assert_eq!(respond(&corpus, &mut session, "anything").unwrap(), "Random.");
    }

    #[test]
    fn failed_reply_leaves_session_untouched() {
        let corpus = load_corpus(["+ a\n@ b\n+ b\n@ a\n"]).unwrap();
        let mut session = Session::new("u", &seeded());
        let options = Options { depth: Some(5), ..seeded() };
        let err = respond_with(&corpus, &mut session, "a", &options, &DefaultFallback).unwrap_err();
        assert!(matches!(err, EngineError::RedirectLoop { depth: 5, .. }));
        assert_eq!(session.last_reply(), None);
    }

    #[test]
    fn corpus_global_sets_depth() {
        let corpus = load_corpus(["! global depth = 3\n+ a\n@ b\n+ b\n@ a\n"]).unwrap();
        assert_eq!(max_depth(&corpus, &Options::default()), 3);
        assert_eq!(max_depth(&corpus, &Options { depth: Some(8), ..Options::default() }), 8);
        let empty = load_corpus(["+ a\n- A.\n"]).unwrap();
        assert_eq!(max_depth(&empty, &Options::default()), DEFAULT_DEPTH);
    }

    #[test]
    fn verbose_includes_trace_and_metrics() {
        let corpus = load_corpus(["+ hello\n- Hi.\n+ hey *\n@ hello\n"]).unwrap();
        let mut session = Session::new("u", &seeded());
        let res = respond_verbose_with(&corpus, &mut session, "Hey, you!", &seeded(), &DefaultFallback).unwrap();

        assert_eq!(res.text, "Hi.");
        assert_eq!(res.elapsed, res.details.total);
        assert_eq!(res.details.normalized, "hey you");
        assert_eq!(res.details.stars, vec!["you"]);
        assert_eq!(res.details.max_depth, 1);
        let kinds: Vec<StepKind> = res.details.trace.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![StepKind::Match, StepKind::Redirect, StepKind::Match, StepKind::Reply]);
        assert!(res.details.matching.elapsed <= res.details.total);
    }

    #[test]
    fn default_sessions_start_in_welcome_when_the_corpus_has_it() {
        let corpus = load_corpus([
            "+ hello\n- Hello.\n",
            "> topic welcome\n+ *\n- Who's this?{topic=random}\n< topic\n",
        ])
        .unwrap();
        let mut session = Session::new("u", &Options::default());
        assert_eq!(session.topic(), INITIAL_TOPIC);
        assert_eq!(respond(&corpus, &mut session, "hello").unwrap(), "Who's this?");
        assert_eq!(respond(&corpus, &mut session, "hello").unwrap(), "Hello.");
    }

    #[test]
    fn missing_initial_topic_answers_from_random() {
        let corpus = load_corpus(["+ hello\n- Hello.\n"]).unwrap();
        let mut session = Session::new("u", &Options::default());
        let reply = respond_with(&corpus, &mut session, "hello", &seeded(), &DefaultFallback).unwrap();
        assert_eq!(reply.text, "Hello.");
        assert_eq!(reply.topic, "random");
    }

    #[test]
    fn previous_reply_gates_percent_rules() {
        let corpus = load_corpus([
            "+ knock knock\n- Who's there?\n+ *\n% who is there\n- <star> who?\n+ *\n- Say knock knock.\n",
            "! sub who's = who is\n",
        ])
        .unwrap();
        let mut session = Session::new("u", &seeded());
        assert_eq!(respond(&corpus, &mut session, "banana").unwrap(), "Say knock knock.");
        assert_eq!(respond(&corpus, &mut session, "knock knock").unwrap(), "Who's there?");
        assert_eq!(respond(&corpus, &mut session, "banana").unwrap(), "banana who?");
    }
}

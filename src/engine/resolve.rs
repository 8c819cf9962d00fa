//! Reply resolution.
//!
//! Turns a matched rule into reply text. For one rule:
//!
//! ```text
//! conditions (in order) ── first true ──────────────┐
//!   │ none true                                     │
//!   v                                               v
//! redirect? ── yes ─▶ expand target, re-match ─▶ (recurse, depth + 1)
//!   │ no                                            │
//!   v                                               v
//! weighted choice among `-` replies ──────────▶ expand tags once
//!                                                   │
//!                                                   v
//!                                   `{@...}` inline redirects (depth + 1)
//! ```
//!
//! Redirects and inline redirects share one depth counter. Going past the
//! configured depth fails the whole call with `EngineError::RedirectLoop`;
//! nothing is truncated silently.
//!
//! A redirect (or inline redirect) whose target matches nothing is answered
//! by the fallback hook with the target text.
//!
//! `{topic=...}` is never applied here: the last one seen is returned as the
//! pending topic and the caller commits it once the whole reply succeeded.

use super::compiled_rules::{CompiledCorpus, Rule};
use super::matcher::{Match, Matcher};
use super::metrics::{ReplyMetrics, StepKind, TraceStep};
use super::tags::{self, Expanded, TagContext};
use super::utterance::Utterance;
use crate::api::Fallback;
use crate::error::{EngineError, StoreError};
use crate::session::{Session, UNDEFINED};
use rand::distributions::{Distribution, WeightedIndex};

/// Outcome of resolving one utterance.
#[derive(Debug)]
pub(crate) struct Resolution {
    pub text: String,
    /// Whether the utterance itself (depth 0) matched a trigger.
    pub matched: bool,
    pub stars: Vec<String>,
    pub pending_topic: Option<String>,
    pub metrics: ReplyMetrics,
}

pub(crate) struct Resolver<'a> {
    corpus: &'a CompiledCorpus,
    session: &'a mut Session,
    fallback: &'a dyn Fallback,
    max_depth: usize,
    /// The session's previous reply, scanned once for `%` rules.
    last_reply: Option<Utterance>,
    matched: bool,
    stars: Vec<String>,
    pending_topic: Option<String>,
    metrics: ReplyMetrics,
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(
        corpus: &'a CompiledCorpus,
        session: &'a mut Session,
        fallback: &'a dyn Fallback,
        max_depth: usize,
    ) -> Self {
        let last_reply = session.last_reply.as_deref().map(|text| Utterance::scan(text, &corpus.subs));
        Resolver {
            corpus,
            session,
            fallback,
            max_depth,
            last_reply,
            matched: false,
            stars: Vec::new(),
            pending_topic: None,
            metrics: ReplyMetrics::default(),
        }
    }

    /// Resolve `utterance` in `topic`.
    pub(crate) fn resolve(mut self, topic: &str, utterance: &Utterance) -> Result<Resolution, EngineError> {
        let text = self.reply_to(topic, utterance, 0)?;
        Ok(Resolution {
            text,
            matched: self.matched,
            stars: self.stars,
            pending_topic: self.pending_topic,
            metrics: self.metrics,
        })
    }

    fn reply_to(&mut self, topic: &str, utterance: &Utterance, depth: usize) -> Result<String, EngineError> {
        if depth > self.max_depth {
            tracing::warn!(depth, input = %utterance.normalized(), "redirect depth exceeded");
            return Err(EngineError::RedirectLoop { depth: self.max_depth, trigger: utterance.normalized() });
        }
        self.metrics.max_depth = self.metrics.max_depth.max(depth);

        let outcome = Matcher::new(self.corpus).find(topic, utterance, self.last_reply.as_ref());
        self.metrics.matching.absorb(&outcome.metrics);

        let Some(found) = outcome.found else {
            self.step(depth, StepKind::NoMatch, "", &utterance.raw);
            return Ok(self.fallback.reply(&utterance.raw));
        };

        if depth == 0 {
            self.matched = true;
            self.stars = found.stars.clone();
        }
        self.step(depth, StepKind::Match, &found.rule.trigger.source, &utterance.normalized());
        self.reply_for(topic, &found, utterance, depth)
    }

    fn reply_for(
        &mut self,
        topic: &str,
        found: &Match<'a>,
        utterance: &Utterance,
        depth: usize,
    ) -> Result<String, EngineError> {
        let rule = found.rule;
        let trigger = rule.trigger.source.as_str();

        let mut chosen = None;
        for condition in &rule.conditions {
            let left = self.expand(&condition.left, found, utterance)?.text;
            let right = self.expand(&condition.right, found, utterance)?.text;
            if condition.op.holds(&left, &right) {
                self.step(depth, StepKind::Condition, trigger, &condition.text);
                chosen = Some(condition.text.as_str());
                break;
            }
        }

        if chosen.is_none() {
            if let Some(target) = &rule.redirect {
                let expanded = self.expand(target, found, utterance)?;
                self.note_topic(expanded.topic);
                self.step(depth, StepKind::Redirect, trigger, &expanded.text);
                let next = Utterance::scan(&expanded.text, &self.corpus.subs);
                return self.reply_to(topic, &next, depth + 1);
            }
        }

        let text = match chosen {
            Some(text) => text,
            None => {
                let text = self.pick_reply(rule)?;
                self.step(depth, StepKind::Reply, trigger, text);
                text
            }
        };

        let expanded = self.expand(text, found, utterance)?;
        self.note_topic(expanded.topic);
        self.inline_redirects(topic, trigger, &expanded.text, depth)
    }

    fn pick_reply(&mut self, rule: &'a Rule) -> Result<&'a str, EngineError> {
        let no_reply = || EngineError::NoReply { trigger: rule.trigger.source.clone() };
        let weights = WeightedIndex::<u32>::new(rule.replies.iter().map(|r| r.weight)).map_err(|_| no_reply())?;
        let idx = weights.sample(&mut self.session.rng);
        rule.replies.get(idx).map(|r| r.text.as_str()).ok_or_else(no_reply)
    }

    /// Replace each `{@target}` with the reply for `target`, left to right.
    /// Replacement text is not rescanned.
    fn inline_redirects(&mut self, topic: &str, trigger: &str, text: &str, depth: usize) -> Result<String, EngineError> {
        let re = regex!(r"\{@([^}]*)\}");
        if !re.is_match(text) {
            return Ok(text.to_string());
        }

        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for caps in re.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&text[last..whole.start()]);
            let target = caps[1].trim();
            self.step(depth, StepKind::InlineRedirect, trigger, target);
            let next = Utterance::scan(target, &self.corpus.subs);
            out.push_str(&self.reply_to(topic, &next, depth + 1)?);
            last = whole.end();
        }
        out.push_str(&text[last..]);
        Ok(out)
    }

    fn expand(&mut self, text: &str, found: &Match<'_>, utterance: &Utterance) -> Result<Expanded, StoreError> {
        let input = utterance.normalized();
        let session = &mut *self.session;
        let mut ctx = TagContext {
            corpus: self.corpus,
            store: session.store.as_mut(),
            rng: &mut session.rng,
            session_id: &session.id,
            stars: &found.stars,
            botstars: &found.botstars,
            input: &input,
            last_reply: session.last_reply.as_deref().unwrap_or(UNDEFINED),
        };
        tags::expand(text, &mut ctx)
    }

    fn note_topic(&mut self, topic: Option<String>) {
        if topic.is_some() {
            self.pending_topic = topic;
        }
    }

    fn step(&mut self, depth: usize, kind: StepKind, trigger: &str, detail: &str) {
        self.metrics.trace.push(TraceStep { depth, kind, trigger: trigger.to_string(), detail: detail.to_string() });
    }
}

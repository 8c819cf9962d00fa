//! Trigger matching.
//!
//! Given a scanned [`Utterance`] and the session's active topic, walk the
//! topic's pre-sorted candidate list and return the first rule whose trigger
//! matches the *whole* utterance.
//!
//! ```text
//! candidates(topic) ──┬─ pass 1: rules with `%`, only if the last reply matches
//!                     └─ pass 2: every other rule
//!                          │  required-word gate (cheap, set lookups)
//!                          v
//!                     match_pattern (stack DFS, backtracking)
//! ```
//!
//! ## Matching semantics
//!
//! - `*` consumes one or more tokens, longest first, never more than the rest
//!   of the pattern leaves room for (`min_suffix`).
//! - `#` takes one all-digit token, `_` one all-letter token.
//! - Arrays and alternations try their entries in declaration order and
//!   capture the entry matched; optionals try each alternative, then nothing,
//!   and never capture.
//! - The first complete match found wins. Since alternatives are pushed in
//!   reverse, the stack pops them in preference order.
//! - Each `(element, position)` state is expanded at most once, so a match
//!   costs at most elements x tokens expansions.

use super::compiled_rules::{CompiledCorpus, PatternFlags, Rule};
use super::loader::DEFAULT_TOPIC;
use super::metrics::MatchMetrics;
use super::pattern::TriggerPattern;
use super::utterance::Utterance;
use crate::{Element, WildcardKind};
use std::collections::HashSet;
use std::time::Instant;

/// A partially matched pattern. `position` is the index of the next unread
/// token; `stars` holds the captures so far.
///
/// ```text
/// pattern: [Alternation(i am|my name is), Wildcard(Any)]
///                                         ^ next_idx = 1
/// tokens:  [my, name, is, sam]
///                         ^ position = 3
/// stars:   ["my name is"]
/// ```
struct PartialMatch {
    next_idx: usize,
    position: usize,
    stars: Vec<String>,
}

/// Match `pattern` against the whole of `tokens`. Returns the captures in
/// left-to-right order.
pub(crate) fn match_pattern(pattern: &TriggerPattern, tokens: &[String]) -> Option<Vec<String>> {
    if tokens.len() < pattern.min_suffix[0] {
        return None;
    }
    if pattern.flags == PatternFlags::LITERAL {
        let exact = tokens.len() == pattern.elements.len()
            && pattern.elements.iter().zip(tokens).all(|(e, t)| matches!(e, Element::Literal(w) if w == t));
        return exact.then(Vec::new);
    }

    let mut stack = vec![PartialMatch { next_idx: 0, position: 0, stars: Vec::new() }];
    // `(next_idx, position)` states already expanded. The first success
    // returns, so a state seen again has a fully failed subtree.
    let mut expanded: HashSet<(usize, usize)> = HashSet::new();

    while let Some(m) = stack.pop() {
        if m.next_idx == pattern.elements.len() {
            if m.position == tokens.len() {
                return Some(m.stars);
            }
            continue;
        }
        if !expanded.insert((m.next_idx, m.position)) {
            continue;
        }

        let steps = element_steps(pattern, m.next_idx, m.position, tokens);
        for (end, capture) in steps.into_iter().rev() {
            if expanded.contains(&(m.next_idx + 1, end)) {
                continue;
            }
            let mut stars = m.stars.clone();
            if let Some(capture) = capture {
                stars.push(capture);
            }
            stack.push(PartialMatch { next_idx: m.next_idx + 1, position: end, stars });
        }
    }

    None
}

/// Every way element `idx` can consume tokens starting at `position`, in
/// preference order: `(end position, capture)`.
fn element_steps(
    pattern: &TriggerPattern,
    idx: usize,
    position: usize,
    tokens: &[String],
) -> Vec<(usize, Option<String>)> {
    let rest = &tokens[position..];
    // Tokens that must be left for the elements after this one.
    let reserve = pattern.min_suffix[idx + 1];
    if rest.len() < reserve {
        return Vec::new();
    }
    let available = rest.len() - reserve;

    match &pattern.elements[idx] {
        Element::Literal(word) => match rest.first() {
            Some(token) if token == word => vec![(position + 1, None)],
            _ => Vec::new(),
        },
        Element::Wildcard(WildcardKind::Any) => {
            (1..=available).rev().map(|n| (position + n, Some(rest[..n].join(" ")))).collect()
        }
        Element::Wildcard(kind) => match rest.first() {
            Some(token) if available >= 1 && single_token_fits(*kind, token) => {
                vec![(position + 1, Some(token.clone()))]
            }
            _ => Vec::new(),
        },
        Element::Array { entries, .. } | Element::Alternation(entries) => entries
            .iter()
            .filter(|entry| entry.len() <= available && rest.starts_with(entry))
            .map(|entry| (position + entry.len(), Some(entry.join(" "))))
            .collect(),
        Element::Optional(alternatives) => alternatives
            .iter()
            .filter(|alt| alt.len() <= available && rest.starts_with(alt))
            .map(|alt| (position + alt.len(), None))
            .chain(std::iter::once((position, None)))
            .collect(),
    }
}

fn single_token_fits(kind: WildcardKind, token: &str) -> bool {
    match kind {
        WildcardKind::Number => token.chars().all(|c| c.is_ascii_digit()),
        WildcardKind::Alpha => token.chars().all(char::is_alphabetic),
        WildcardKind::Any => true,
    }
}

/// A successful match.
#[derive(Debug)]
pub(crate) struct Match<'c> {
    pub rule: &'c Rule,
    pub stars: Vec<String>,
    /// Captures of the `%` pattern against the last reply.
    pub botstars: Vec<String>,
}

/// Result of one matcher run.
#[derive(Debug)]
pub(crate) struct MatchOutcome<'c> {
    pub found: Option<Match<'c>>,
    pub metrics: MatchMetrics,
}

/// Scans a compiled corpus on behalf of one session.
pub(crate) struct Matcher<'c> {
    corpus: &'c CompiledCorpus,
}

impl<'c> Matcher<'c> {
    pub(crate) fn new(corpus: &'c CompiledCorpus) -> Self {
        Matcher { corpus }
    }

    /// Find the best rule for `utterance` in `topic`. `last_reply` enables
    /// `%` rules.
    pub(crate) fn find(&self, topic: &str, utterance: &Utterance, last_reply: Option<&Utterance>) -> MatchOutcome<'c> {
        let start = Instant::now();
        let mut metrics = MatchMetrics::default();

        let candidates = match self.corpus.candidates(topic) {
            Some(ids) => ids,
            None => {
                tracing::warn!(topic, "active topic has no rules; falling back to `{DEFAULT_TOPIC}`");
                self.corpus.candidates(DEFAULT_TOPIC).unwrap_or_default()
            }
        };
        metrics.candidates = candidates.len();

        let mut found = None;

        if let Some(last) = last_reply {
            for rule in candidates.iter().map(|&id| self.corpus.rule(id)) {
                let Some(previous) = &rule.previous else { continue };
                let Some(stars) = self.try_rule(rule, utterance, &mut metrics) else { continue };
                if let Some(botstars) = match_pattern(previous, &last.tokens) {
                    found = Some(Match { rule, stars, botstars });
                    break;
                }
            }
        }

        if found.is_none() {
            for rule in candidates.iter().map(|&id| self.corpus.rule(id)) {
                if rule.previous.is_some() {
                    continue;
                }
                if let Some(stars) = self.try_rule(rule, utterance, &mut metrics) {
                    found = Some(Match { rule, stars, botstars: Vec::new() });
                    break;
                }
            }
        }

        metrics.elapsed = start.elapsed();
        if let Some(m) = &found {
            tracing::debug!(topic, input = %utterance.normalized(), trigger = %m.rule.trigger.source, "matched");
        } else {
            tracing::debug!(topic, input = %utterance.normalized(), "no trigger matched");
        }
        MatchOutcome { found, metrics }
    }

    fn try_rule(&self, rule: &Rule, utterance: &Utterance, metrics: &mut MatchMetrics) -> Option<Vec<String>> {
        if !utterance.contains_all(&rule.trigger.required) {
            metrics.gated += 1;
            return None;
        }
        metrics.attempted += 1;
        match_pattern(&rule.trigger, &utterance.tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::loader::load_units;
    use crate::engine::utterance::Substitutions;
    use crate::error::Location;
    use std::collections::BTreeMap;

    const AT: Location = Location { unit: 0, line: 1 };

    fn pattern(source: &str) -> TriggerPattern {
        let mut arrays = BTreeMap::new();
        arrays.insert("colors".to_string(), vec![vec!["red".to_string()], vec!["light".to_string(), "blue".to_string()]]);
        TriggerPattern::compile(source, 1, &arrays, AT).unwrap()
    }

    fn tokens(text: &str) -> Vec<String> {
        Utterance::scan(text, &Substitutions::default()).tokens
    }

    fn stars(source: &str, input: &str) -> Option<Vec<String>> {
        match_pattern(&pattern(source), &tokens(input))
    }

    #[test]
    fn literal_match_is_whole_string() {
        assert_eq!(stars("hello bot", "Hello, bot!"), Some(vec![]));
        assert_eq!(stars("hello bot", "hello bot again"), None);
        assert_eq!(stars("hello bot", "hello"), None);
    }

    #[test]
    fn wildcards_are_greedy_and_need_one_token() {
        assert_eq!(stars("* *", "john smith"), Some(vec!["john".into(), "smith".into()]));
        assert_eq!(stars("* *", "a b c"), Some(vec!["a b".into(), "c".into()]));
        assert_eq!(stars("hello *", "hello"), None);
        assert_eq!(stars("* is *", "the sky is blue"), Some(vec!["the sky".into(), "blue".into()]));
    }

    #[test]
    fn alternations_capture_and_optionals_do_not() {
        assert_eq!(
            stars("(i am|my name is|call me) *", "My name is Sam"),
            Some(vec!["my name is".into(), "sam".into()])
        );
        assert_eq!(stars("what is [your|the] name", "what is your name"), Some(vec![]));
        assert_eq!(stars("what is [your|the] name", "what is name"), Some(vec![]));
        assert_eq!(stars("what is [your|the] name", "what is my name"), None);
    }

    #[test]
    fn arrays_capture_multiword_entries() {
        assert_eq!(stars("i like @colors", "I like light blue"), Some(vec!["light blue".into()]));
        assert_eq!(stars("i like @colors", "I like green"), None);
    }

    #[test]
    fn typed_wildcards() {
        assert_eq!(stars("i am # years old", "I am 42 years old"), Some(vec!["42".into()]));
        assert_eq!(stars("i am # years old", "I am forty years old"), None);
        assert_eq!(stars("call me _", "call me Sam"), Some(vec!["sam".into()]));
        assert_eq!(stars("call me _", "call me r2d2"), None);
    }

    #[test]
    fn backtracks_out_of_greedy_choice() {
        assert_eq!(stars("* red *", "a red b red c"), Some(vec!["a red b".into(), "c".into()]));
    }

    #[test]
    fn failed_splits_are_not_retried() {
        let trigger = "* and * and * and * and * and * or *";
        let input = format!("{} or", vec!["and"; 70].join(" "));

        let start = Instant::now();
        assert_eq!(stars(trigger, &input), None);
        assert!(start.elapsed() < std::time::Duration::from_secs(2), "took {:?}", start.elapsed());

        let found = stars(trigger, &format!("{input} tail")).unwrap();
        assert_eq!(found.len(), 7);
        assert_eq!(found[6], "tail");
    }

    fn corpus(text: &str) -> CompiledCorpus {
        CompiledCorpus::compile(load_units([text]).unwrap()).unwrap()
    }

    fn find_trigger(corpus: &CompiledCorpus, topic: &str, input: &str, last: Option<&str>) -> Option<String> {
        let subs = Substitutions::default();
        let utterance = Utterance::scan(input, &subs);
        let last = last.map(|l| Utterance::scan(l, &subs));
        Matcher::new(corpus).find(topic, &utterance, last.as_ref()).found.map(|m| m.rule.trigger.source.clone())
    }

    #[test]
    fn most_specific_candidate_wins() {
        let c = corpus("+ *\n- any\n+ * *\n- two\n+ (i am|my name is|call me) *\n- name\n+ my name is sam\n- sam\n");
        assert_eq!(find_trigger(&c, "random", "my name is sam", None).as_deref(), Some("my name is sam"));
        assert_eq!(find_trigger(&c, "random", "call me bob", None).as_deref(), Some("(i am|my name is|call me) *"));
        assert_eq!(find_trigger(&c, "random", "john smith", None).as_deref(), Some("* *"));
        assert_eq!(find_trigger(&c, "random", "hi", None).as_deref(), Some("*"));
    }

    #[test]
    fn previous_rules_need_matching_last_reply() {
        let c = corpus("+ yes\n% do you like cheese\n- Cheese it is.\n+ yes\n- Yes what?\n");
        assert_eq!(find_trigger(&c, "random", "yes", None).as_deref(), Some("yes"));
        let m = {
            let subs = Substitutions::default();
            let last = Utterance::scan("Do you like cheese?", &subs);
            Matcher::new(&c).find("random", &Utterance::scan("yes", &subs), Some(&last)).found.unwrap()
        };
        assert!(m.rule.previous.is_some());
        let m2 = {
            let subs = Substitutions::default();
            let last = Utterance::scan("Something else.", &subs);
            Matcher::new(&c).find("random", &Utterance::scan("yes", &subs), Some(&last)).found.unwrap()
        };
        assert!(m2.rule.previous.is_none());
    }

    #[test]
    fn unknown_topic_falls_back_to_random() {
        let c = corpus("+ hello\n- Hi.\n");
        assert_eq!(find_trigger(&c, "nowhere", "hello", None).as_deref(), Some("hello"));
    }

    #[test]
    fn required_words_gate_candidates() {
        let c = corpus("+ hello there\n- a\n+ good morning\n- b\n+ *\n- c\n");
        let subs = Substitutions::default();
        let outcome = Matcher::new(&c).find("random", &Utterance::scan("hey", &subs), None);
        assert_eq!(outcome.metrics.candidates, 3);
        assert_eq!(outcome.metrics.gated, 2);
        assert_eq!(outcome.metrics.attempted, 1);
    }

    #[test]
    fn no_match_is_not_an_error() {
        let c = corpus("+ hello\n- Hi.\n");
        assert_eq!(find_trigger(&c, "random", "goodbye", None), None);
    }
}

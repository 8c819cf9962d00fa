//! Corpus compilation and indexing.
//!
//! This module holds the *static* side of the engine: the immutable
//! [`CompiledCorpus`] derived from a [`RawCorpus`](super::loader::RawCorpus).
//! Answering an utterance is split in two phases:
//!
//! 1. **Compile/index** (this module): compile every trigger, resolve array
//!    references, and pre-sort each topic's candidate rules by specificity.
//! 2. **Run** (see `matcher.rs` and `resolve.rs`): scan the input, walk the
//!    active topic's candidate list in order, resolve the winning rule.
//!
//! ## Candidate lists
//!
//! For topic `T` the list is built once:
//!
//! ```text
//! own rules + rules of every `includes` topic (transitively)   sorted together
//! ++ candidates(I) for each `inherits` topic I, in order        appended, deduplicated
//! ```
//!
//! so an inheriting topic's rules always outrank the rules it inherits.
//!
//! ## Invariants
//!
//! - `RuleId` is an index into `CompiledCorpus::rules`; ids follow declaration
//!   order, which is the final tie-breaker of the specificity sort.
//! - Candidate lists are fixed after compilation; the corpus is shared
//!   read-only between sessions.

use super::loader::{RawCorpus, RawTopic};
use super::pattern::{TriggerPattern, phrase_words};
use super::utterance::Substitutions;
use crate::error::CorpusError;
use crate::{Condition, ReplyAlt};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Rule identifier (index into the rules vector).
pub(crate) type RuleId = usize;

bitflags::bitflags! {
    /// Kinds of elements present in a compiled trigger.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PatternFlags: u8 {
        const LITERAL     = 1 << 0;
        const WILDCARD    = 1 << 1;
        const NUMBER      = 1 << 2;
        const ALPHA       = 1 << 3;
        const ARRAY       = 1 << 4;
        const ALTERNATION = 1 << 5;
        const OPTIONAL    = 1 << 6;
    }
}

impl PatternFlags {
    const ANY_WILDCARD: PatternFlags =
        PatternFlags::WILDCARD.union(PatternFlags::NUMBER).union(PatternFlags::ALPHA);
    const GROUPS: PatternFlags = PatternFlags::ARRAY.union(PatternFlags::ALTERNATION).union(PatternFlags::OPTIONAL);

    /// Coarse specificity tier (lower is more specific).
    pub(crate) fn tier(self) -> u8 {
        let wild = self.intersects(Self::ANY_WILDCARD);
        let groups = self.intersects(Self::GROUPS);
        if !wild && !self.intersects(PatternFlags::ARRAY | PatternFlags::OPTIONAL) {
            0
        } else if !wild {
            1
        } else if groups {
            2
        } else {
            3
        }
    }
}

/// A compiled rule.
#[derive(Debug, Clone)]
pub(crate) struct Rule {
    pub id: RuleId,
    pub topic: String,
    pub trigger: TriggerPattern,
    /// `%` pattern matched against the session's previous reply.
    pub previous: Option<TriggerPattern>,
    pub conditions: Vec<Condition>,
    pub replies: Vec<ReplyAlt>,
    pub redirect: Option<String>,
}

/// An immutable, shareable compiled corpus.
///
/// Built by [`load_corpus`](crate::load_corpus); read concurrently by any
/// number of sessions.
#[derive(Debug)]
pub struct CompiledCorpus {
    pub(crate) rules: Vec<Rule>,
    /// Topic name → rule ids in scan order.
    pub(crate) topics: HashMap<String, Vec<RuleId>>,
    pub(crate) arrays: BTreeMap<String, Vec<Vec<String>>>,
    pub(crate) bot_vars: BTreeMap<String, String>,
    pub(crate) globals: BTreeMap<String, String>,
    pub(crate) subs: Substitutions,
    pub(crate) persons: Substitutions,
}

impl CompiledCorpus {
    pub(crate) fn compile(raw: RawCorpus) -> Result<Self, CorpusError> {
        let arrays: BTreeMap<String, Vec<Vec<String>>> = raw
            .arrays
            .iter()
            .map(|(name, phrases)| {
                let entries = phrases.iter().map(|p| phrase_words(p)).filter(|e| !e.is_empty()).collect();
                (name.clone(), entries)
            })
            .collect();

        let mut rules = Vec::new();
        for topic in &raw.topics {
            for raw_rule in &topic.rules {
                let trigger = TriggerPattern::compile(&raw_rule.trigger, raw_rule.weight, &arrays, raw_rule.at)?;
                let previous = raw_rule
                    .previous
                    .as_deref()
                    .map(|p| TriggerPattern::compile(p, 1, &arrays, raw_rule.at))
                    .transpose()?;
                rules.push(Rule {
                    id: rules.len(),
                    topic: topic.name.clone(),
                    trigger,
                    previous,
                    conditions: raw_rule.conditions.clone(),
                    replies: raw_rule.replies.clone(),
                    redirect: raw_rule.redirect.clone(),
                });
            }
        }

        let by_name: HashMap<&str, &RawTopic> = raw.topics.iter().map(|t| (t.name.as_str(), t)).collect();
        for topic in &raw.topics {
            for target in topic.includes.iter().chain(&topic.inherits) {
                if !by_name.contains_key(target.as_str()) {
                    return Err(CorpusError::UnknownTopic { topic: topic.name.clone(), target: target.clone() });
                }
            }
        }

        let mut topics = HashMap::new();
        for topic in &raw.topics {
            let candidates = candidate_list(&topic.name, &by_name, &rules, &mut Vec::new());
            tracing::debug!(topic = %topic.name, candidates = candidates.len(), "indexed topic");
            topics.insert(topic.name.clone(), candidates);
        }

        Ok(CompiledCorpus {
            rules,
            topics,
            arrays,
            bot_vars: raw.bot_vars,
            globals: raw.globals,
            subs: Substitutions::new(&raw.subs),
            persons: Substitutions::new(&raw.persons),
        })
    }

    /// Names of every topic, sorted.
    pub fn topics(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.topics.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn has_topic(&self, name: &str) -> bool {
        self.topics.contains_key(name)
    }

    /// Number of compiled rules across all topics.
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Entries of a declared array, as normalized phrases.
    pub fn array(&self, name: &str) -> Option<Vec<String>> {
        self.arrays.get(&name.to_lowercase()).map(|entries| entries.iter().map(|e| e.join(" ")).collect())
    }

    /// A bot variable declared with `! var`.
    pub fn bot_var(&self, name: &str) -> Option<&str> {
        self.bot_vars.get(name).map(String::as_str)
    }

    /// A global declared with `! global`.
    pub fn global(&self, name: &str) -> Option<&str> {
        self.globals.get(name).map(String::as_str)
    }

    /// Trigger sources of `topic` in the order the matcher scans them.
    pub fn scan_order(&self, topic: &str) -> Option<Vec<&str>> {
        self.topics
            .get(topic)
            .map(|ids| ids.iter().map(|&id| self.rules[id].trigger.source.as_str()).collect())
    }

    pub(crate) fn candidates(&self, topic: &str) -> Option<&[RuleId]> {
        self.topics.get(topic).map(Vec::as_slice)
    }

    pub(crate) fn rule(&self, id: RuleId) -> &Rule {
        &self.rules[id]
    }
}

/// Build the scan order for `name`. `stack` guards against include/inherit
/// cycles.
fn candidate_list(name: &str, by_name: &HashMap<&str, &RawTopic>, rules: &[Rule], stack: &mut Vec<String>) -> Vec<RuleId> {
    if stack.iter().any(|s| s == name) {
        tracing::warn!(topic = name, "topic inheritance cycle; ignoring back edge");
        return Vec::new();
    }
    stack.push(name.to_string());

    let mut pool = Vec::new();
    collect_included(name, by_name, &mut pool, &mut HashSet::new());
    let mut own: Vec<RuleId> = rules.iter().filter(|r| pool.contains(&r.topic)).map(|r| r.id).collect();
    own.sort_by_key(|&id| (rules[id].trigger.specificity, id));

    let mut seen: HashSet<RuleId> = own.iter().copied().collect();
    if let Some(topic) = by_name.get(name) {
        for parent in &topic.inherits {
            for id in candidate_list(parent, by_name, rules, stack) {
                if seen.insert(id) {
                    own.push(id);
                }
            }
        }
    }

    stack.pop();
    own
}

fn collect_included(name: &str, by_name: &HashMap<&str, &RawTopic>, pool: &mut Vec<String>, seen: &mut HashSet<String>) {
    if !seen.insert(name.to_string()) {
        return;
    }
    pool.push(name.to_string());
    if let Some(topic) = by_name.get(name) {
        for inc in &topic.includes {
            collect_included(inc, by_name, pool, seen);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::loader::load_units;

    fn compile(units: &[&str]) -> Result<CompiledCorpus, CorpusError> {
        CompiledCorpus::compile(load_units(units)?)
    }

    #[test]
    fn tiers_follow_element_kinds() {
        assert_eq!(PatternFlags::LITERAL.tier(), 0);
        assert_eq!((PatternFlags::LITERAL | PatternFlags::ALTERNATION).tier(), 0);
        assert_eq!((PatternFlags::LITERAL | PatternFlags::ARRAY).tier(), 1);
        assert_eq!((PatternFlags::ALTERNATION | PatternFlags::WILDCARD).tier(), 2);
        assert_eq!((PatternFlags::LITERAL | PatternFlags::WILDCARD).tier(), 3);
    }

    #[test]
    fn scan_order_is_specificity_then_declaration() {
        let corpus = compile(&["+ *\n- a\n+ * *\n- b\n+ hello *\n- c\n+ hello there\n- d\n+ hello there\n- e\n"]).unwrap();
        assert_eq!(corpus.scan_order("random").unwrap(), vec!["hello there", "hello there", "hello *", "* *", "*"]);
        let ids = corpus.candidates("random").unwrap();
        assert!(ids[0] < ids[1]);
    }

    #[test]
    fn includes_merge_and_inherits_append() {
        let corpus = compile(&[
            "> topic common\n+ help\n- Help.\n< topic\n",
            "> topic base\n+ *\n- Base.\n< topic\n",
            "> topic game includes common inherits base\n+ move *\n- Move.\n< topic\n",
        ])
        .unwrap();
        assert_eq!(corpus.scan_order("game").unwrap(), vec!["help", "move *", "*"]);
    }

    #[test]
    fn unknown_included_topic_is_an_error() {
        let err = compile(&["> topic game includes nowhere\n+ hi\n- Hi.\n< topic\n"]).unwrap_err();
        assert!(matches!(err, CorpusError::UnknownTopic { ref target, .. } if target == "nowhere"));
    }

    #[test]
    fn inheritance_cycles_terminate() {
        let corpus = compile(&[
            "> topic a inherits b\n+ x\n- X.\n< topic\n",
            "> topic b inherits a\n+ y\n- Y.\n< topic\n",
        ])
        .unwrap();
        assert_eq!(corpus.scan_order("a").unwrap(), vec!["x", "y"]);
    }

    #[test]
    fn arrays_may_be_declared_after_use() {
        let corpus = compile(&["+ @greet\n- Hi.\n", "! array greet = hi|hello|good day\n"]).unwrap();
        assert_eq!(corpus.array("greet").unwrap(), vec!["hi", "hello", "good day"]);
    }
}

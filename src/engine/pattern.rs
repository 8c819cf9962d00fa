//! Trigger compilation.
//!
//! Turns a raw trigger string into a [`TriggerPattern`]: an immutable sequence
//! of tagged [`Element`]s plus the metadata the matcher needs at runtime
//! (specificity key, element flags, required words, per-suffix minimum token
//! counts). Compilation happens once per rule; matching never re-parses
//! trigger syntax.
//!
//! ```text
//! "(i am|my name is) *"  ──▶  [Alternation([[i, am], [my, name, is]]), Wildcard(Any)]
//! "@hello *"             ──▶  [Array { hello, entries.. }, Wildcard(Any)]
//! "what is [the] name"   ──▶  [Literal(what), Literal(is), Optional([[the]]), Literal(name)]
//! ```
//!
//! ## Specificity
//!
//! Candidates are scanned most-specific first. The key is, in priority order:
//!
//! 1. declared `{weight=N}` (higher first)
//! 2. tier: literals/alternations only, then arrays/optionals, then wildcards
//!    alongside arrays/alternations, then bare wildcards
//! 3. word count: literal words plus the shortest alternative of each
//!    alternation or array (more first)
//! 4. element count (more first)
//!
//! Declaration order breaks the remaining ties (see `compiled_rules.rs`).

use super::compiled_rules::PatternFlags;
use super::utterance::normalize_word;
use crate::error::{CorpusError, Location};
use crate::{Element, WildcardKind};
use std::cmp::Reverse;
use std::collections::BTreeMap;

/// Ordering key; smaller sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Specificity {
    weight: Reverse<u32>,
    tier: u8,
    words: Reverse<usize>,
    elements: Reverse<usize>,
}

#[derive(Debug, Clone)]
pub(crate) struct TriggerPattern {
    /// Trigger text as written (weight tag removed).
    pub source: String,
    pub elements: Vec<Element>,
    pub flags: PatternFlags,
    pub specificity: Specificity,
    /// Literal words every matching input must contain.
    pub required: Vec<String>,
    /// `min_suffix[i]`: fewest tokens `elements[i..]` can consume.
    pub min_suffix: Vec<usize>,
}

impl TriggerPattern {
    /// Compile `source` against the declared arrays.
    pub(crate) fn compile(
        source: &str,
        weight: u32,
        arrays: &BTreeMap<String, Vec<Vec<String>>>,
        at: Location,
    ) -> Result<Self, CorpusError> {
        let elements = parse_elements(source, arrays, at)?;
        if elements.is_empty() {
            return Err(CorpusError::malformed(at, format!("trigger `{source}` has no matchable words")));
        }

        let mut flags = PatternFlags::empty();
        let mut required = Vec::new();
        let mut words = 0;
        for element in &elements {
            match element {
                Element::Literal(w) => {
                    flags |= PatternFlags::LITERAL;
                    required.push(w.clone());
                    words += 1;
                }
                Element::Wildcard(WildcardKind::Any) => flags |= PatternFlags::WILDCARD,
                Element::Wildcard(WildcardKind::Number) => flags |= PatternFlags::NUMBER,
                Element::Wildcard(WildcardKind::Alpha) => flags |= PatternFlags::ALPHA,
                Element::Array { name, entries } => {
                    if entries.is_empty() {
                        tracing::warn!(array = %name, trigger = source, %at, "array has no entries; trigger can never match");
                    }
                    flags |= PatternFlags::ARRAY;
                    words += element.min_tokens();
                }
                Element::Alternation(_) => {
                    flags |= PatternFlags::ALTERNATION;
                    words += element.min_tokens();
                }
                Element::Optional(_) => flags |= PatternFlags::OPTIONAL,
            }
        }

        let mut min_suffix = vec![0; elements.len() + 1];
        for i in (0..elements.len()).rev() {
            min_suffix[i] = min_suffix[i + 1] + elements[i].min_tokens();
        }

        let specificity = Specificity {
            weight: Reverse(weight),
            tier: flags.tier(),
            words: Reverse(words),
            elements: Reverse(elements.len()),
        };

        Ok(TriggerPattern { source: source.to_string(), elements, flags, specificity, required, min_suffix })
    }
}

/// Split a phrase into normalized words, dropping anything that normalizes to
/// nothing (bare punctuation).
pub(crate) fn phrase_words(phrase: &str) -> Vec<String> {
    phrase.split_whitespace().map(normalize_word).filter(|w| !w.is_empty()).collect()
}

fn parse_elements(
    source: &str,
    arrays: &BTreeMap<String, Vec<Vec<String>>>,
    at: Location,
) -> Result<Vec<Element>, CorpusError> {
    let mut elements = Vec::new();
    let mut rest = source.trim();

    while !rest.is_empty() {
        let first = rest.chars().next().unwrap_or(' ');
        if first == '(' || first == '[' {
            let close = if first == '(' { ')' } else { ']' };
            let Some(end) = rest.find(close) else {
                return Err(CorpusError::malformed(at, format!("unbalanced `{first}` in trigger `{source}`")));
            };
            let inner = &rest[1..end];
            if inner.contains(['(', '[']) {
                return Err(CorpusError::malformed(at, format!("nested groups are not supported in `{source}`")));
            }
            if inner.contains([')', ']']) {
                return Err(CorpusError::malformed(at, format!("mismatched brackets in trigger `{source}`")));
            }
            let alternatives = group_alternatives(inner, arrays, source, at)?;
            if alternatives.is_empty() {
                return Err(CorpusError::malformed(at, format!("empty group in trigger `{source}`")));
            }
            elements.push(if first == '(' {
                Element::Alternation(alternatives)
            } else {
                Element::Optional(alternatives)
            });
            rest = rest[end + 1..].trim_start();
            continue;
        }

        let end = rest.find(|c: char| c.is_whitespace() || c == '(' || c == '[').unwrap_or(rest.len());
        let word = &rest[..end];
        rest = rest[end..].trim_start();

        if word.contains([')', ']']) {
            return Err(CorpusError::malformed(at, format!("unbalanced closing bracket in trigger `{source}`")));
        }

        match word {
            "*" => elements.push(Element::Wildcard(WildcardKind::Any)),
            "#" => elements.push(Element::Wildcard(WildcardKind::Number)),
            "_" => elements.push(Element::Wildcard(WildcardKind::Alpha)),
            _ if word.starts_with('@') => {
                let name = word[1..].to_lowercase();
                let entries = lookup_array(&name, arrays, source, at)?;
                elements.push(Element::Array { name, entries });
            }
            _ => {
                let literal = normalize_word(word);
                if !literal.is_empty() {
                    elements.push(Element::Literal(literal));
                }
            }
        }
    }

    Ok(elements)
}

fn group_alternatives(
    inner: &str,
    arrays: &BTreeMap<String, Vec<Vec<String>>>,
    source: &str,
    at: Location,
) -> Result<Vec<Vec<String>>, CorpusError> {
    let mut alternatives = Vec::new();
    for alt in inner.split('|').map(str::trim) {
        if let Some(name) = alt.strip_prefix('@') {
            alternatives.extend(lookup_array(&name.to_lowercase(), arrays, source, at)?);
            continue;
        }
        if alt.split_whitespace().any(|w| matches!(w, "*" | "#" | "_")) {
            return Err(CorpusError::malformed(at, format!("wildcards inside groups are not supported in `{source}`")));
        }
        let words = phrase_words(alt);
        if !words.is_empty() {
            alternatives.push(words);
        }
    }
    Ok(alternatives)
}

fn lookup_array(
    name: &str,
    arrays: &BTreeMap<String, Vec<Vec<String>>>,
    source: &str,
    at: Location,
) -> Result<Vec<Vec<String>>, CorpusError> {
    arrays.get(name).cloned().ok_or_else(|| CorpusError::UnknownArray {
        name: name.to_string(),
        trigger: source.to_string(),
        at,
    })
}

//! Utterance scanning (input normalization).
//!
//! Every string the matcher sees goes through [`Utterance::scan`] first: user
//! input, redirect targets, inline redirect targets and the session's previous
//! reply (for `%` rules). The scan is the only place where input text is
//! normalized, so compiled literals and scanned tokens always agree.
//!
//! ```text
//! "What's  your NAME?"
//!   │ lowercase + split on whitespace      ["what's", "your", "name?"]
//!   │ substitutions (longest key first)    ["what", "is", "your", "name?"]
//!   │ strip punctuation, drop empties      ["what", "is", "your", "name"]
//!   v
//! tokens + word set (for required-word gating)
//! ```
//!
//! Substitution keys are compared both against the raw lowercased word and
//! its punctuation-stripped form, so keys like `what's` and `;)` both work.

use std::collections::HashSet;

/// Lowercase `word` and drop every non-alphanumeric character.
pub(crate) fn normalize_word(word: &str) -> String {
    word.chars().filter(|c| c.is_alphanumeric()).flat_map(char::to_lowercase).collect()
}

#[derive(Debug, Clone)]
struct SubEntry {
    key: Vec<String>,
    /// `key` with each word normalized; empty words compare raw only.
    key_normalized: Vec<String>,
    replacement: Vec<String>,
}

/// An ordered word-substitution table (`! sub` or `! person`).
#[derive(Debug, Clone, Default)]
pub(crate) struct Substitutions {
    entries: Vec<SubEntry>,
}

impl Substitutions {
    pub(crate) fn new(pairs: &[(String, String)]) -> Self {
        let mut entries: Vec<SubEntry> = pairs
            .iter()
            .filter_map(|(key, replacement)| {
                let key: Vec<String> = key.split_whitespace().map(str::to_lowercase).collect();
                if key.is_empty() {
                    return None;
                }
                let key_normalized = key.iter().map(|w| normalize_word(w)).collect();
                let replacement = replacement.split_whitespace().map(str::to_string).collect();
                Some(SubEntry { key, key_normalized, replacement })
            })
            .collect();
        // Longest key first: "i am" must win over "i".
        entries.sort_by(|a, b| {
            b.key.len().cmp(&a.key.len()).then_with(|| b.key.concat().len().cmp(&a.key.concat().len()))
        });
        Substitutions { entries }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Single left-to-right pass; substituted words are never rescanned.
    pub(crate) fn apply(&self, words: &[String]) -> Vec<String> {
        if self.entries.is_empty() {
            return words.to_vec();
        }
        let mut out = Vec::with_capacity(words.len());
        let mut i = 0;
        'outer: while i < words.len() {
            for entry in &self.entries {
                if entry.matches_at(&words[i..]) {
                    out.extend(entry.replacement.iter().cloned());
                    i += entry.key.len();
                    continue 'outer;
                }
            }
            out.push(words[i].clone());
            i += 1;
        }
        out
    }

    /// [`apply`](Self::apply) over whitespace-separated text.
    pub(crate) fn apply_text(&self, text: &str) -> String {
        let words: Vec<String> = text.split_whitespace().map(str::to_lowercase).collect();
        self.apply(&words).join(" ")
    }
}

impl SubEntry {
    fn matches_at(&self, words: &[String]) -> bool {
        if words.len() < self.key.len() {
            return false;
        }
        self.key.iter().zip(&self.key_normalized).zip(words).all(|((raw, normalized), word)| {
            word == raw || (!normalized.is_empty() && normalize_word(word) == *normalized)
        })
    }
}

/// A normalized input ready for matching.
#[derive(Debug, Clone)]
pub(crate) struct Utterance {
    /// Text as received.
    pub raw: String,
    pub tokens: Vec<String>,
    /// Distinct tokens, for required-word gating.
    pub words: HashSet<String>,
}

impl Utterance {
    pub(crate) fn scan(input: &str, subs: &Substitutions) -> Self {
        let lowered: Vec<String> = input.split_whitespace().map(str::to_lowercase).collect();
        let substituted = subs.apply(&lowered);
        let tokens: Vec<String> =
            substituted.iter().map(|w| normalize_word(w)).filter(|w| !w.is_empty()).collect();
        let words = tokens.iter().cloned().collect();
        Utterance { raw: input.to_string(), tokens, words }
    }

    /// Tokens joined by single spaces.
    pub(crate) fn normalized(&self) -> String {
        self.tokens.join(" ")
    }

    pub(crate) fn contains_all(&self, required: &[String]) -> bool {
        required.iter().all(|w| self.words.contains(w))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subs(pairs: &[(&str, &str)]) -> Substitutions {
        let owned: Vec<(String, String)> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Substitutions::new(&owned)
    }

    #[test]
    fn normalize_strips_punctuation_and_case() {
        assert_eq!(normalize_word("Hello,"), "hello");
        assert_eq!(normalize_word("What's"), "whats");
        assert_eq!(normalize_word("?!"), "");
        assert_eq!(normalize_word("42."), "42");
    }

    #[test]
    fn scan_tokenizes_and_collects_words() {
        let u = Utterance::scan("  Hello,   World!  ", &Substitutions::default());
        assert_eq!(u.tokens, vec!["hello", "world"]);
        assert_eq!(u.normalized(), "hello world");
        assert!(u.contains_all(&["world".to_string()]));
        assert!(!u.contains_all(&["there".to_string()]));
    }

    #[test]
    fn punctuation_only_input_is_empty() {
        let u = Utterance::scan("?!? ...", &Substitutions::default());
        assert!(u.tokens.is_empty());
    }

    #[test]
    fn substitutions_prefer_longest_key() {
        let table = subs(&[("i", "you"), ("i am", "you are"), ("what's", "what is")]);
        let u = Utterance::scan("What's up? I am here and I know", &table);
        assert_eq!(u.normalized(), "what is up you are here and you know");
    }

    #[test]
    fn substitutions_do_not_rescan_output() {
        let table = subs(&[("i", "you"), ("you", "me")]);
        assert_eq!(table.apply_text("i like you"), "you like me");
    }

    #[test]
    fn punctuation_keys_match_raw_words() {
        let table = subs(&[(";)", "wink")]);
        let u = Utterance::scan("hi ;)", &table);
        assert_eq!(u.tokens, vec!["hi", "wink"]);
    }
}

//! Reply tag expansion.
//!
//! Expands one chosen text (reply, condition text, condition operand or
//! redirect target) exactly once. Inline redirects (`{@...}`) are left in
//! place for the resolver, which owns matching and the depth guard.
//!
//! ## Order
//!
//! ```text
//! (1) shorthands         <@> <person> <formal> ...  → long forms on <star>
//! (2) captures/context   <star> <starN> <botstar> <botstarN> <input> <reply> <id>
//! (3) {random}a|b{/random}
//! (4) loop until stable:
//!       innermost modifier   {formal} {sentence} {uppercase} {lowercase} {person}
//!       else leftmost var    <set> <get> <bot> <add> <sub> <mult> <div>
//! (5) {topic=NAME}       removed, recorded as pending
//! ```
//!
//! A modifier or variable tag only fires once its body is tag-free, so nested
//! tags always expand inside-out. Missing captures and unset variables read
//! as [`UNDEFINED`].

use super::compiled_rules::CompiledCorpus;
use crate::error::StoreError;
use crate::session::{UNDEFINED, VariableStore};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Upper bound on step (4), for store values that themselves contain tags.
const MAX_TAG_STEPS: usize = 1024;

/// Everything tag expansion may read or write.
pub(crate) struct TagContext<'a> {
    pub corpus: &'a CompiledCorpus,
    pub store: &'a mut dyn VariableStore,
    pub rng: &'a mut StdRng,
    pub session_id: &'a str,
    pub stars: &'a [String],
    pub botstars: &'a [String],
    /// Normalized text being answered.
    pub input: &'a str,
    /// The session's previous reply.
    pub last_reply: &'a str,
}

/// Result of expanding one text.
#[derive(Debug, Default)]
pub(crate) struct Expanded {
    pub text: String,
    /// Last `{topic=...}` seen, if any.
    pub topic: Option<String>,
}

pub(crate) fn expand(text: &str, ctx: &mut TagContext<'_>) -> Result<Expanded, StoreError> {
    let text = expand_shorthands(text);
    let text = expand_captures(&text, ctx);
    let text = expand_random(&text, ctx.rng);
    let text = expand_nested(text, ctx)?;

    let mut topic = None;
    for caps in regex!(r"\{topic=([^}]*)\}").captures_iter(&text) {
        topic = Some(caps[1].trim().to_lowercase());
    }
    let text = regex!(r"\{topic=[^}]*\}").replace_all(&text, "").into_owned();

    Ok(Expanded { text, topic })
}

fn expand_shorthands(text: &str) -> String {
    let text = text.replace("<@>", "{@<star>}");
    regex!(r"<(person|formal|sentence|uppercase|lowercase)>")
        .replace_all(&text, "{$1}<star>{/$1}")
        .into_owned()
}

fn expand_captures(text: &str, ctx: &TagContext<'_>) -> String {
    regex!(r"<(star|botstar|input|reply)(\d*)>|<id>")
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let Some(kind) = caps.get(1) else {
                return ctx.session_id.to_string();
            };
            let index: usize = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(1);
            let value = match kind.as_str() {
                "star" => nth(ctx.stars, index),
                "botstar" => nth(ctx.botstars, index),
                "input" if index == 1 => Some(ctx.input),
                "reply" if index == 1 => Some(ctx.last_reply),
                _ => None,
            };
            value.unwrap_or(UNDEFINED).to_string()
        })
        .into_owned()
}

fn nth(captures: &[String], index: usize) -> Option<&str> {
    index.checked_sub(1).and_then(|i| captures.get(i)).map(String::as_str)
}

fn expand_random(text: &str, rng: &mut StdRng) -> String {
    let mut out = text.to_string();
    while let Some(caps) = regex!(r"(?s)\{random\}(.*?)\{/random\}").captures(&out) {
        let whole = caps.get(0).map(|m| m.range()).unwrap_or_default();
        let body = &caps[1];
        let choices: Vec<&str> = if body.contains('|') {
            body.split('|').collect()
        } else {
            body.split_whitespace().collect()
        };
        let pick = choices.choose(rng).map(|s| s.trim().to_string()).unwrap_or_default();
        out.replace_range(whole, &pick);
    }
    out
}

fn expand_nested(mut text: String, ctx: &mut TagContext<'_>) -> Result<String, StoreError> {
    for _ in 0..MAX_TAG_STEPS {
        if let Some((range, replacement)) = innermost_modifier(&text, ctx.corpus) {
            text.replace_range(range, &replacement);
            continue;
        }
        let Some(caps) = regex!(r"<(set|get|bot|add|sub|mult|div)\s+([^<>{}]*)>").captures(&text) else {
            return Ok(text);
        };
        let range = caps.get(0).map(|m| m.range()).unwrap_or_default();
        let replacement = variable_tag(&caps[1], caps[2].trim(), ctx)?;
        text.replace_range(range, &replacement);
    }
    tracing::warn!(text = %text, "tag expansion did not settle; leaving remaining tags");
    Ok(text)
}

fn innermost_modifier(text: &str, corpus: &CompiledCorpus) -> Option<(std::ops::Range<usize>, String)> {
    regex!(r"\{(formal|sentence|uppercase|lowercase|person)\}([^<>{}]*)\{/(\w+)\}")
        .captures_iter(text)
        .find(|caps| caps[1] == caps[3])
        .map(|caps| {
            let range = caps.get(0).map(|m| m.range()).unwrap_or_default();
            (range, apply_modifier(&caps[1], &caps[2], corpus))
        })
}

fn apply_modifier(name: &str, body: &str, corpus: &CompiledCorpus) -> String {
    match name {
        "formal" => body.split(' ').map(title_case).collect::<Vec<_>>().join(" "),
        "sentence" => {
            let lower = body.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        }
        "uppercase" => body.to_uppercase(),
        "lowercase" => body.to_lowercase(),
        "person" if !corpus.persons.is_empty() => corpus.persons.apply_text(body),
        _ => body.to_string(),
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn variable_tag(tag: &str, body: &str, ctx: &mut TagContext<'_>) -> Result<String, StoreError> {
    match tag {
        "get" => Ok(ctx.store.get(body)?.unwrap_or_else(|| UNDEFINED.to_string())),
        "bot" => Ok(ctx.corpus.bot_var(body).unwrap_or(UNDEFINED).to_string()),
        "set" => {
            let (name, value) = split_assignment(body);
            if value == UNDEFINED {
                ctx.store.set(name, None)?;
            } else {
                ctx.store.set(name, Some(value))?;
            }
            Ok(String::new())
        }
        op => {
            let (name, value) = split_assignment(body);
            let Ok(operand) = value.parse::<i64>() else {
                return Ok(format!("[ERR: Math can't \"{op}\" non-numeric value \"{value}\"]"));
            };
            let current = match ctx.store.get(name)? {
                None => 0,
                Some(v) if v == UNDEFINED => 0,
                Some(v) => match v.trim().parse::<i64>() {
                    Ok(n) => n,
                    Err(_) => return Ok(format!("[ERR: Math can't \"{op}\" non-numeric user variable \"{name}\"]")),
                },
            };
            let result = match op {
                "add" => current.checked_add(operand),
                "sub" => current.checked_sub(operand),
                "mult" => current.checked_mul(operand),
                _ if operand == 0 => return Ok("[ERR: Can't Divide By Zero]".to_string()),
                _ => current.checked_div(operand),
            };
            match result {
                Some(n) => {
                    ctx.store.set(name, Some(&n.to_string()))?;
                    Ok(String::new())
                }
                None => Ok(format!("[ERR: Math overflow in \"{op}\" on \"{name}\"]")),
            }
        }
    }
}

fn split_assignment(body: &str) -> (&str, &str) {
    match body.split_once('=') {
        Some((name, value)) => (name.trim(), value.trim()),
        None => (body.trim(), ""),
    }
}

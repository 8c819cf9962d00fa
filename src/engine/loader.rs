//! Corpus loading (line grammar → raw definitions).
//!
//! This is the first half of the build step. It reads rule-definition units
//! (one string per file or block) and produces a [`RawCorpus`]: topics with
//! their raw rules, arrays, bot variables, globals and substitution tables.
//! Nothing is compiled here; trigger syntax and array references are checked by
//! `compiled_rules.rs` once every unit has been read, so arrays may be declared
//! after (or in a later unit than) the triggers that use them.
//!
//! ## Line grammar
//!
//! ```text
//! ! version = 2.0                 informational
//! ! array colors = red blue       definitions (array, var, global, sub, person)
//! > topic NAME [includes A] [inherits B]
//! + trigger{weight=N}             starts a rule
//! % previous reply pattern
//! - reply{weight=N}
//! * <get x> == y => conditional reply
//! @ redirect target
//! ^ continuation of the previous line
//! < topic
//! ```
//!
//! Comments are `// line`, trailing ` // text` and `/* block */`.
//!
//! ## Invariants
//!
//! - Topic blocks are closed within the unit that opens them.
//! - Blocks with the same topic name (across units) merge in input order.
//! - Every finished rule has a non-empty trigger and at least one reply or a
//!   redirect.

use crate::error::{CorpusError, Location};
use crate::{CondOp, Condition, ReplyAlt};
use std::collections::BTreeMap;

/// Topic that owns rules declared outside any `> topic` block.
pub(crate) const DEFAULT_TOPIC: &str = "random";

#[derive(Debug, Clone)]
pub(crate) struct RawRule {
    pub trigger: String,
    pub weight: u32,
    pub previous: Option<String>,
    pub conditions: Vec<Condition>,
    pub replies: Vec<ReplyAlt>,
    pub redirect: Option<String>,
    pub at: Location,
}

#[derive(Debug, Clone)]
pub(crate) struct RawTopic {
    pub name: String,
    pub includes: Vec<String>,
    pub inherits: Vec<String>,
    pub rules: Vec<RawRule>,
}

/// Everything read from the corpus input, before compilation.
#[derive(Debug, Default)]
pub(crate) struct RawCorpus {
    /// Topics in first-declaration order, names unique.
    pub topics: Vec<RawTopic>,
    /// Array name → raw phrases.
    pub arrays: BTreeMap<String, Vec<String>>,
    pub bot_vars: BTreeMap<String, String>,
    pub globals: BTreeMap<String, String>,
    /// `! sub` pairs in declaration order.
    pub subs: Vec<(String, String)>,
    /// `! person` pairs in declaration order.
    pub persons: Vec<(String, String)>,
}

impl RawCorpus {
    fn topic_mut(&mut self, name: &str) -> &mut RawTopic {
        let idx = match self.topics.iter().position(|t| t.name == name) {
            Some(idx) => idx,
            None => {
                self.topics.push(RawTopic {
                    name: name.to_string(),
                    includes: Vec::new(),
                    inherits: Vec::new(),
                    rules: Vec::new(),
                });
                self.topics.len() - 1
            }
        };
        &mut self.topics[idx]
    }
}

/// A command line with its continuations folded in.
#[derive(Debug)]
struct LogicalLine {
    line: usize,
    command: char,
    /// The command's own text first, then one entry per `^` line.
    segments: Vec<String>,
}

impl LogicalLine {
    fn joined(&self) -> String {
        self.segments.concat()
    }
}

#[derive(Debug)]
enum Block {
    Topic(String),
    /// `> object` / `> begin` bodies are not interpreted.
    Skipped(String),
}

/// Read every unit into a single [`RawCorpus`].
pub(crate) fn load_units<I, S>(units: I) -> Result<RawCorpus, CorpusError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut corpus = RawCorpus::default();
    for (unit, text) in units.into_iter().enumerate() {
        load_unit(&mut corpus, unit, text.as_ref())?;
    }
    Ok(corpus)
}

fn load_unit(corpus: &mut RawCorpus, unit: usize, text: &str) -> Result<(), CorpusError> {
    let lines = logical_lines(unit, text)?;

    let mut block: Option<(Block, Location)> = None;
    let mut rule: Option<RawRule> = None;

    for logical in lines {
        let at = Location { unit, line: logical.line };

        if let Some((Block::Skipped(kind), _)) = &block {
            if logical.command == '<' {
                tracing::debug!(block = %kind, %at, "skipped uninterpreted block");
                block = None;
            }
            continue;
        }

        match logical.command {
            '!' => {
                flush_rule(corpus, &block, &mut rule)?;
                define(corpus, at, &logical)?;
            }
            '>' => {
                flush_rule(corpus, &block, &mut rule)?;
                if block.is_some() {
                    return Err(CorpusError::malformed(at, "nested `>` block"));
                }
                block = Some((open_block(corpus, at, &logical.joined())?, at));
            }
            '<' => {
                flush_rule(corpus, &block, &mut rule)?;
                if block.take().is_none() {
                    return Err(CorpusError::malformed(at, "`<` closes a block that was never opened"));
                }
            }
            '+' => {
                flush_rule(corpus, &block, &mut rule)?;
                let (trigger, weight) = take_weight(at, &unescape(&logical.joined()))?;
                let trigger = trigger.trim().to_string();
                if trigger.is_empty() {
                    return Err(CorpusError::malformed(at, "empty trigger"));
                }
                rule = Some(RawRule {
                    trigger,
                    weight,
                    previous: None,
                    conditions: Vec::new(),
                    replies: Vec::new(),
                    redirect: None,
                    at,
                });
            }
            '%' => {
                let current = rule.as_mut().ok_or_else(|| no_trigger(at, "`%` previous"))?;
                current.previous = Some(unescape(&logical.joined()).trim().to_string());
            }
            '-' => {
                let current = rule.as_mut().ok_or_else(|| no_trigger(at, "`-` reply"))?;
                let (text, weight) = take_weight(at, &unescape(&logical.joined()))?;
                current.replies.push(ReplyAlt { text, weight });
            }
            '*' => {
                let current = rule.as_mut().ok_or_else(|| no_trigger(at, "`*` condition"))?;
                current.conditions.push(parse_condition(at, &unescape(&logical.joined()))?);
            }
            '@' => {
                let current = rule.as_mut().ok_or_else(|| no_trigger(at, "`@` redirect"))?;
                current.redirect = Some(unescape(&logical.joined()).trim().to_string());
            }
            other => return Err(CorpusError::malformed(at, format!("unknown command `{other}`"))),
        }
    }

    flush_rule(corpus, &block, &mut rule)?;

    if let Some((kind, at)) = block {
        let name = match kind {
            Block::Topic(name) => name,
            Block::Skipped(kind) => kind,
        };
        return Err(CorpusError::malformed(at, format!("block `{name}` is never closed")));
    }

    Ok(())
}

fn no_trigger(at: Location, what: &str) -> CorpusError {
    CorpusError::malformed(at, format!("{what} has no preceding `+` trigger"))
}

/// Strip comments and fold `^` continuations into their command line.
fn logical_lines(unit: usize, text: &str) -> Result<Vec<LogicalLine>, CorpusError> {
    let mut out: Vec<LogicalLine> = Vec::new();
    let mut in_comment = false;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let mut line = raw.trim();

        if in_comment {
            if let Some(end) = line.find("*/") {
                in_comment = false;
                line = line[end + 2..].trim();
            } else {
                continue;
            }
        }
        if line.starts_with("/*") {
            match line.find("*/") {
                Some(end) => line = line[end + 2..].trim(),
                None => {
                    in_comment = true;
                    continue;
                }
            }
        }
        if line.starts_with("//") {
            continue;
        }
        let line = strip_inline_comment(line);
        if line.is_empty() {
            continue;
        }

        let mut chars = line.chars();
        let command = chars.next().unwrap_or(' ');
        let body = chars.as_str().trim();

        if command == '^' {
            let Some(prev) = out.last_mut() else {
                return Err(CorpusError::malformed(
                    Location { unit, line: line_no },
                    "`^` continuation with nothing to continue",
                ));
            };
            prev.segments.push(body.to_string());
            continue;
        }

        out.push(LogicalLine { line: line_no, command, segments: vec![body.to_string()] });
    }

    Ok(out)
}

fn strip_inline_comment(line: &str) -> &str {
    match regex!(r"\s+//").find(line) {
        Some(m) => line[..m.start()].trim_end(),
        None => line,
    }
}

/// `\s` is an explicit space (useful at the end of a continued line); `\n` a
/// newline.
fn unescape(text: &str) -> String {
    text.replace("\\s", " ").replace("\\n", "\n")
}

/// Remove a `{weight=N}` tag and return the remaining text plus the weight
/// (default 1).
fn take_weight(at: Location, text: &str) -> Result<(String, u32), CorpusError> {
    let Some(start) = text.find("{weight=") else {
        return Ok((text.to_string(), 1));
    };
    let Some(caps) = regex!(r"\{weight=(\d+)\}").captures(&text[start..]) else {
        return Err(CorpusError::malformed(at, "invalid `{weight=N}` tag"));
    };
    let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
    let weight: u32 = caps[1].parse().map_err(|_| CorpusError::malformed(at, "weight out of range"))?;
    if weight == 0 {
        return Err(CorpusError::malformed(at, "weight must be at least 1"));
    }
    Ok((text.replacen(whole, "", 1), weight))
}

fn parse_condition(at: Location, text: &str) -> Result<Condition, CorpusError> {
    let Some((test, reply)) = text.split_once("=>") else {
        return Err(CorpusError::malformed(at, "condition is missing `=>`"));
    };
    let caps = regex!(r"^(.+?)\s+(==|eq|!=|ne|<>|<=|>=|<|>)\s+(.*)$")
        .captures(test.trim())
        .ok_or_else(|| CorpusError::malformed(at, format!("cannot parse condition `{}`", test.trim())))?;
    let op = CondOp::parse(&caps[2]).ok_or_else(|| CorpusError::malformed(at, "unknown condition operator"))?;
    Ok(Condition {
        left: caps[1].trim().to_string(),
        op,
        right: caps[3].trim().to_string(),
        text: reply.trim().to_string(),
    })
}

fn open_block(corpus: &mut RawCorpus, at: Location, header: &str) -> Result<Block, CorpusError> {
    let mut words = header.split_whitespace();
    let kind = words.next().unwrap_or_default().to_lowercase();
    match kind.as_str() {
        "topic" => {
            let name = words.next().ok_or_else(|| CorpusError::malformed(at, "topic without a name"))?.to_lowercase();
            let mut includes = Vec::new();
            let mut inherits = Vec::new();
            let mut mode: Option<&str> = None;
            for word in words {
                match word {
                    "includes" => mode = Some("includes"),
                    "inherits" => mode = Some("inherits"),
                    other => match mode {
                        Some("includes") => includes.push(other.to_lowercase()),
                        Some(_) => inherits.push(other.to_lowercase()),
                        None => {
                            return Err(CorpusError::malformed(
                                at,
                                format!("unexpected `{other}` in topic header (expected includes/inherits)"),
                            ));
                        }
                    },
                }
            }
            let topic = corpus.topic_mut(&name);
            for inc in includes {
                if !topic.includes.contains(&inc) {
                    topic.includes.push(inc);
                }
            }
            for inh in inherits {
                if !topic.inherits.contains(&inh) {
                    topic.inherits.push(inh);
                }
            }
            Ok(Block::Topic(name))
        }
        "object" | "begin" => {
            tracing::warn!(block = %kind, %at, "block type is not interpreted; skipping");
            Ok(Block::Skipped(kind))
        }
        "" => Err(CorpusError::malformed(at, "`>` without a block type")),
        other => Err(CorpusError::malformed(at, format!("unknown block type `{other}`"))),
    }
}

fn flush_rule(corpus: &mut RawCorpus, block: &Option<(Block, Location)>, rule: &mut Option<RawRule>) -> Result<(), CorpusError> {
    let Some(done) = rule.take() else {
        return Ok(());
    };
    if done.replies.is_empty() && done.redirect.is_none() {
        return Err(CorpusError::malformed(done.at, format!("rule `{}` has neither a reply nor a redirect", done.trigger)));
    }
    let topic = match block {
        Some((Block::Topic(name), _)) => name.as_str(),
        _ => DEFAULT_TOPIC,
    };
    corpus.topic_mut(topic).rules.push(done);
    Ok(())
}

fn define(corpus: &mut RawCorpus, at: Location, logical: &LogicalLine) -> Result<(), CorpusError> {
    let head = logical.segments.first().map(String::as_str).unwrap_or_default();
    let Some((lhs, value)) = head.split_once('=') else {
        return Err(CorpusError::malformed(at, "definition is missing `=`"));
    };
    let mut lhs = lhs.split_whitespace();
    let kind = lhs.next().unwrap_or_default().to_lowercase();
    let name = lhs.next().map(str::to_string);
    let value = value.trim();

    if kind == "version" {
        tracing::debug!(version = value, %at, "corpus version");
        return Ok(());
    }
    if kind == "local" {
        tracing::debug!(option = ?name, %at, "ignoring file-local option");
        return Ok(());
    }

    let name = name.ok_or_else(|| CorpusError::malformed(at, format!("`! {kind}` without a name")))?;
    let continued = logical.segments.iter().skip(1).map(String::as_str);

    match kind.as_str() {
        "array" => {
            let name = name.to_lowercase();
            if value == "undef" {
                corpus.arrays.remove(&name);
                return Ok(());
            }
            let mut phrases = Vec::new();
            for segment in std::iter::once(value).chain(continued) {
                if segment.contains('|') {
                    phrases.extend(segment.split('|').map(str::trim).filter(|p| !p.is_empty()).map(str::to_string));
                } else {
                    phrases.extend(segment.split_whitespace().map(str::to_string));
                }
            }
            corpus.arrays.insert(name, phrases);
        }
        "var" | "global" => {
            let table = if kind == "var" { &mut corpus.bot_vars } else { &mut corpus.globals };
            let full = std::iter::once(value).chain(continued).collect::<Vec<_>>().join(" ");
            if full == "undef" {
                table.remove(&name);
            } else {
                table.insert(name, full);
            }
        }
        "sub" | "person" => {
            let table = if kind == "sub" { &mut corpus.subs } else { &mut corpus.persons };
            table.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
            if value != "undef" {
                table.push((name.to_lowercase(), value.to_lowercase()));
            }
        }
        other => return Err(CorpusError::malformed(at, format!("unknown definition type `{other}`"))),
    }

    Ok(())
}

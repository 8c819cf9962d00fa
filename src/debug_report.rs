use colloquy::{ReplyVerbose, StepKind, TraceStep};

/// Colors used by the report; ignored when color is off.
#[derive(Clone, Copy)]
enum Tone {
    Strong,
    Faint,
    Ok,
    Warn,
    Topic,
    Accent,
    Rule,
}

impl Tone {
    fn code(self) -> &'static str {
        match self {
            Tone::Strong => "\x1b[1;36m",
            Tone::Faint => "\x1b[2m",
            Tone::Ok => "\x1b[32m",
            Tone::Warn => "\x1b[33m",
            Tone::Topic => "\x1b[34m",
            Tone::Accent => "\x1b[36m",
            Tone::Rule => "\x1b[90m",
        }
    }
}

struct Palette {
    enabled: bool,
}

impl Palette {
    fn paint(&self, text: impl AsRef<str>, tone: Tone) -> String {
        if self.enabled {
            format!("{}{}\x1b[0m", tone.code(), text.as_ref())
        } else {
            text.as_ref().to_string()
        }
    }

    fn faint(&self, text: impl AsRef<str>) -> String {
        self.paint(text, Tone::Faint)
    }
}

pub fn print_reply(reply: &ReplyVerbose, color: bool) {
    let palette = Palette { enabled: color };
    let details = &reply.details;
    println!(
        "\n{}",
        palette.paint(format!("⚙  Input: \"{}\" → \"{}\"", reply.input, details.normalized), Tone::Strong)
    );

    println!("\n{}", palette.paint("━━━ Trace ━━━", Tone::Rule));
    for step in &details.trace {
        println!("  {}", fmt_step(step, &palette));
    }
    if !reply.matched {
        println!("\n{}", palette.paint("No trigger matched:", Tone::Warn));
        println!("  • Check the active topic ({})", details.topic_before);
        println!("  • Required words must all appear in the input");
        println!("\n{}", palette.faint("  Tip: Set COLLOQUY_LOG=colloquy=debug to see matcher logs"));
    }

    println!("\n{}", palette.paint("━━━ State ━━━", Tone::Rule));
    let stars = if details.stars.is_empty() { "-".to_string() } else { details.stars.join(" | ") };
    println!(
        "  {} {} → {}  {} {}",
        palette.faint("topic:"),
        palette.paint(&details.topic_before, Tone::Topic),
        palette.paint(&reply.topic, Tone::Topic),
        palette.faint("│ stars:"),
        palette.paint(stars, Tone::Warn)
    );

    println!("\n{}", palette.paint("━━━ Timing ━━━", Tone::Rule));
    println!(
        "  Total: {}  │  Matching: {}  │  Candidates: {} ({} gated, {} tried)  │  Depth: {}",
        palette.paint(format!("{:?}", details.total), Tone::Ok),
        palette.paint(format!("{:?}", details.matching.elapsed), Tone::Accent),
        details.matching.candidates,
        palette.faint(details.matching.gated.to_string()),
        details.matching.attempted,
        details.max_depth,
    );
    println!();
}

fn fmt_step(step: &TraceStep, palette: &Palette) -> String {
    let (label, color) = match step.kind {
        StepKind::Match => ("match", Tone::Ok),
        StepKind::NoMatch => ("no match", Tone::Warn),
        StepKind::Condition => ("condition", Tone::Topic),
        StepKind::Redirect => ("redirect", Tone::Accent),
        StepKind::InlineRedirect => ("inline", Tone::Accent),
        StepKind::Reply => ("reply", Tone::Ok),
    };
    format!(
        "{}{} {} {}",
        "  ".repeat(step.depth),
        palette.paint(format!("[{label}]"), color),
        palette.paint(&step.trigger, Tone::Topic),
        palette.faint(format!("→ {}", step.detail))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_indent_by_depth_and_skip_color_when_disabled() {
        let step = TraceStep { depth: 1, kind: StepKind::Redirect, trigger: "* *".into(), detail: "my name is john".into() };
        assert_eq!(fmt_step(&step, &Palette { enabled: false }), "  [redirect] * * → my name is john");
        assert!(fmt_step(&step, &Palette { enabled: true }).contains("\x1b[36m[redirect]\x1b[0m"));
    }
}

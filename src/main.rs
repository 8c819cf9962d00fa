mod debug_report;

use clap::Parser;
use colloquy::{
    CompiledCorpus, DefaultFallback, INITIAL_TOPIC, Options, Session, load_corpus_paths, respond_verbose_with,
};
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;

/// Chat with a rule corpus from the terminal.
///
/// Reads `*.rive` files from the given files or directories, then answers
/// either one `--input` or every line typed at the prompt.
#[derive(Parser, Debug)]
#[command(name = "colloquy")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Corpus files or directories of `*.rive` files.
    #[arg(required = true)]
    corpus: Vec<PathBuf>,

    /// Topic the session starts in (`random` when the corpus lacks it).
    #[arg(short, long, default_value = INITIAL_TOPIC)]
    topic: String,

    /// Seed for reply selection (repeatable runs).
    #[arg(short, long)]
    seed: Option<u64>,

    /// Maximum redirect depth.
    #[arg(short, long)]
    depth: Option<usize>,

    /// Print the match trace and timings after each reply.
    #[arg(short, long)]
    verbose: bool,

    /// Answer a single utterance and exit.
    #[arg(short, long)]
    input: Option<String>,

    /// Force ANSI color output.
    #[arg(long, conflicts_with = "no_color")]
    color: bool,

    /// Disable ANSI color output.
    #[arg(long)]
    no_color: bool,
}

fn main() {
    let filter =
        tracing_subscriber::EnvFilter::try_from_env("COLLOQUY_LOG").unwrap_or_else(|_| "colloquy=warn".into());
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();

    let cli = Cli::parse();
    let color = if cli.color {
        true
    } else if cli.no_color {
        false
    } else {
        io::stdout().is_terminal()
    };

    let corpus = match load_corpus_paths(&cli.corpus) {
        Ok(corpus) => corpus,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    };

    let options = Options { initial_topic: cli.topic.to_lowercase(), depth: cli.depth, seed: cli.seed };
    let mut session = Session::new("local-user", &options);

    let result = match &cli.input {
        Some(input) => answer(&corpus, &mut session, input, &options, &cli, color),
        None => repl(&corpus, &mut session, &options, &cli, color),
    };
    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn repl(corpus: &CompiledCorpus, session: &mut Session, options: &Options, cli: &Cli, color: bool) -> io::Result<()> {
    let interactive = io::stdin().is_terminal();
    if interactive {
        println!(
            "colloquy {}: {} rules in {} topics. Type /quit to exit.",
            env!("CARGO_PKG_VERSION"),
            corpus.rule_count(),
            corpus.topics().len()
        );
    }

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        if interactive {
            print!("You> ");
            io::stdout().flush()?;
        }
        let Some(line) = lines.next().transpose()? else {
            return Ok(());
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => return Ok(()),
            "/topic" => {
                println!("topic: {}", session.topic());
                continue;
            }
            _ => {}
        }
        if let Some(topic) = line.strip_prefix("/topic ") {
            session.set_topic(topic.trim());
            continue;
        }
        answer(corpus, session, line, options, cli, color)?;
    }
}

fn answer(
    corpus: &CompiledCorpus,
    session: &mut Session,
    input: &str,
    options: &Options,
    cli: &Cli,
    color: bool,
) -> io::Result<()> {
    match respond_verbose_with(corpus, session, input, options, &DefaultFallback) {
        Ok(reply) => {
            println!("Bot> {}", reply.text);
            if cli.verbose {
                debug_report::print_reply(&reply, color);
            }
        }
        Err(err) => eprintln!("Bot> [error: {err}]"),
    }
    Ok(())
}

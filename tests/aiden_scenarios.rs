use colloquy::{
    CompiledCorpus, DefaultFallback, EngineError, Options, Session, SessionRegistry, load_corpus, load_corpus_dir,
    respond, respond_with,
};
use std::collections::HashMap;
use std::sync::Arc;

const FIXTURES: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/aiden");

fn aiden() -> CompiledCorpus {
    load_corpus_dir(FIXTURES).unwrap()
}

fn options(topic: &str, seed: u64) -> Options {
    Options { initial_topic: topic.to_string(), seed: Some(seed), ..Options::default() }
}

#[test]
fn fixture_directory_loads_every_file() {
    let corpus = aiden();
    assert_eq!(corpus.topics(), vec!["random", "welcome", "welcome2"]);
    assert_eq!(corpus.bot_var("name"), Some("Aiden"));
    assert!(corpus.array("bye").unwrap().contains(&"see you later".to_string()));
}

#[test]
fn welcome_greets_and_moves_to_welcome2() {
    let corpus = aiden();
    let opts = options("welcome", 1);
    let mut session = Session::new("new-user", &opts);

    let reply = respond_with(&corpus, &mut session, "hello", &opts, &DefaultFallback).unwrap();
    assert!(["Hi... who's this?", "Hey.. who's this?"].contains(&reply.text.as_str()));
    assert_eq!(reply.topic, "welcome2");
    assert_eq!(session.variable("met").unwrap().as_deref(), Some("true"));
}

#[test]
fn default_options_start_new_users_in_welcome() {
    let corpus = aiden();
    let mut session = Session::new("fresh", &Options::default());
    let reply = respond(&corpus, &mut session, "hello").unwrap();
    assert!(["Hi... who's this?", "Hey.. who's this?"].contains(&reply.as_str()), "{reply}");
    assert_eq!(session.topic(), "welcome2");
}

#[test]
fn canonical_name_rule_sets_formal_name() {
    let corpus = aiden();
    let opts = options("welcome2", 1);
    let mut session = Session::new("u", &opts);

    let reply = respond_with(&corpus, &mut session, "my name is Sam", &opts, &DefaultFallback).unwrap();
    assert_eq!(reply.text, "Nice to meet you, I am Aiden.");
    assert_eq!(reply.topic, "random");
    assert_eq!(session.variable("name").unwrap().as_deref(), Some("Sam"));
    assert_eq!(session.variable("met").unwrap().as_deref(), Some("true"));
}

#[test]
fn full_name_redirects_through_first_name() {
    let corpus = aiden();
    let opts = options("welcome2", 1);
    let mut session = Session::new("u", &opts);

    let reply = respond_with(&corpus, &mut session, "john smith", &opts, &DefaultFallback).unwrap();
    assert_eq!(reply.text, "Nice to meet you, I am Aiden.");
    assert_eq!(session.variable("name").unwrap().as_deref(), Some("John"));
    assert_eq!(session.topic(), "random");
}

#[test]
fn single_word_is_taken_as_a_name() {
    let corpus = aiden();
    let opts = options("welcome2", 1);
    let mut session = Session::new("u", &opts);

    respond_with(&corpus, &mut session, "Bob", &opts, &DefaultFallback).unwrap();
    assert_eq!(session.variable("name").unwrap().as_deref(), Some("Bob"));
}

#[test]
fn difficult_user_walks_the_conditions() {
    let corpus = aiden();
    let opts = options("welcome2", 1);
    let mut session = Session::new("u", &opts);

    let first = respond_with(&corpus, &mut session, "I am not telling", &opts, &DefaultFallback).unwrap();
    assert_eq!(first.text, "Okay, but what's your name?");
    assert_eq!(first.topic, "welcome2");

    let second = respond_with(&corpus, &mut session, "none of your business", &opts, &DefaultFallback).unwrap();
    assert_eq!(second.text, "My name is Aiden, who are you?");

    let third = respond_with(&corpus, &mut session, "i said no way", &opts, &DefaultFallback).unwrap();
    assert_eq!(third.text, "Fine, don't tell me your name.");
    assert_eq!(third.topic, "random");
}

#[test]
fn array_alias_answers_like_hello() {
    let corpus = aiden();
    let generic = ["Hi there!", "Hello!", "Hey!", "Hey.", "Hello."];
    for (seed, input) in ["aloha", "good day", "hey there", "well hello"].iter().enumerate() {
        let mut session = Session::new("u", &options("random", seed as u64));
        let text = respond(&corpus, &mut session, input).unwrap();
        assert!(generic.contains(&text.as_str()), "{input:?} answered {text:?}");
    }
}

#[test]
fn redirects_consume_the_same_random_choice() {
    let corpus = aiden();
    for seed in 0..20 {
        let mut direct = Session::new("a", &options("random", seed));
        let mut aliased = Session::new("b", &options("random", seed));
        assert_eq!(
            respond(&corpus, &mut direct, "hello").unwrap(),
            respond(&corpus, &mut aliased, "aloha").unwrap()
        );
    }
}

#[test]
fn true_condition_beats_plain_replies() {
    let corpus = aiden();
    let mut session = Session::new("u", &options("random", 5));
    assert_eq!(respond(&corpus, &mut session, "good evening").unwrap(), "Good evening, how are you tonight?");

    session.set_variable("name", Some("Sam")).unwrap();
    assert_eq!(respond(&corpus, &mut session, "good evening").unwrap(), "Good evening, Sam, how are you tonight?");

    let named = ["Hello, Sam.", "Hi, Sam!", "Hey Sam!", "Hi there!", "Hello!", "Hey."];
    for _ in 0..10 {
        let text = respond(&corpus, &mut session, "hello").unwrap();
        assert!(named.contains(&text.as_str()), "unexpected {text:?}");
    }
}

#[test]
fn weighted_replies_follow_their_weights() {
    let corpus = load_corpus(["+ flip\n- heads{weight=3}\n- tails\n"]).unwrap();
    let mut session = Session::new("u", &options("random", 42));
    let mut counts: HashMap<String, usize> = HashMap::new();
    for _ in 0..4000 {
        *counts.entry(respond(&corpus, &mut session, "flip").unwrap()).or_default() += 1;
    }
    let heads = counts["heads"] as f64 / 4000.0;
    assert!((0.70..0.80).contains(&heads), "heads ratio {heads}");
    assert_eq!(counts.len(), 2);
}

#[test]
fn get_does_not_change_the_store() {
    let corpus = load_corpus(["+ what is my name\n- Your name is <get name>.\n"]).unwrap();
    let mut session = Session::new("u", &options("random", 1));
    session.set_variable("name", Some("Sam")).unwrap();
    let before = session.variables().unwrap();
    assert_eq!(respond(&corpus, &mut session, "what is my name").unwrap(), "Your name is Sam.");
    assert_eq!(respond(&corpus, &mut session, "what is my name").unwrap(), "Your name is Sam.");
    assert_eq!(session.variables().unwrap(), before);
}

#[test]
fn redirect_loops_are_errors() {
    let corpus = load_corpus(["+ test recurse\n@ do recurse testing\n\n+ do recurse testing\n@ test recurse\n"]).unwrap();
    let mut session = Session::new("u", &options("random", 1));
    let err = respond(&corpus, &mut session, "test recurse").unwrap_err();
    assert!(matches!(err, EngineError::RedirectLoop { depth: 50, .. }), "{err}");
}

#[test]
fn prefixes_and_inline_redirects() {
    let corpus = aiden();
    let mut session = Session::new("u", &options("random", 9));

    let reply = respond(&corpus, &mut session, "hello or something").unwrap();
    assert!(reply.starts_with("Or something. "), "{reply}");

    // `(do you know) *` outranks `do you know *` and redirects to `what is *`.
    let what_is = [
        "Do you think somebody else might know?",
        "A person, place or thing.",
        "I'm not sure.",
        "Have you asked somebody else?",
        "Maybe you should ask someone else.",
    ];
    let reply = respond(&corpus, &mut session, "do you know bob marley").unwrap();
    assert!(what_is.contains(&reply.as_str()), "{reply}");
}

#[test]
fn unmatched_input_uses_the_fallback() {
    let corpus = load_corpus(["+ hello\n- Hi.\n"]).unwrap();
    let mut session = Session::new("u", &options("random", 1));
    assert_eq!(respond(&corpus, &mut session, "???").unwrap(), "ERR: No Reply Matched");
    let custom = |text: &str| format!("Sorry, \"{text}\"?");
    let reply = respond_with(&corpus, &mut session, "huh", &options("random", 1), &custom).unwrap();
    assert_eq!(reply.text, "Sorry, \"huh\"?");
}

#[test]
fn registry_keeps_users_apart() {
    let registry = SessionRegistry::new(Arc::new(aiden()), options("welcome2", 3));
    registry.respond("alice", "my name is alice").unwrap();
    registry.respond("bob", "call me bob").unwrap();

    let alice = registry.with_session("alice", |s| s.variable("name").unwrap());
    let bob = registry.with_session("bob", |s| s.variable("name").unwrap());
    assert_eq!(alice.as_deref(), Some("Alice"));
    assert_eq!(bob.as_deref(), Some("Bob"));
    assert_eq!(registry.len(), 2);
}

#[test]
fn registry_answers_concurrent_sessions() {
    let registry = Arc::new(SessionRegistry::new(Arc::new(aiden()), options("random", 3)));
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                let id = format!("user-{i}");
                for _ in 0..20 {
                    registry.respond(&id, "good morning").unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(registry.len(), 8);
}

//! Command-line assistant for the Anthropic API.
//!
//! One-shot prompts, piped stdin, and an interactive REPL share the same
//! conversation store, so any exchange can be resumed later by id.
//!
//! # Usage
//!
//! ```bash
//! # One-shot prompt
//! parley "Explain the borrow checker"
//!
//! # Stream the reply as it is generated
//! parley --stream "Write a limerick about lifetimes"
//!
//! # Pipe a prompt in
//! git diff | parley "Review this change"
//!
//! # Start or resume an interactive session
//! parley --interactive
//! parley --conversation-id 20260829120000
//! parley --continue-latest
//!
//! # Housekeeping
//! parley --list
//! parley --models
//! parley --setup
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arrrg::CommandLine;
use rustyline::DefaultEditor;

use parley::chat::{
    ChatArgs, ChatConfig, ChatSession, PlainTextRenderer, Renderer, Settings, config_dir,
    describe_error, resolve_api_key,
};
use parley::types::KnownModel;
use parley::{Anthropic, ConversationStore, ResponseCache};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (args, free) = ChatArgs::from_command_line_relaxed("parley [OPTIONS] [PROMPT]");
    let dir = config_dir();

    let mut renderer = PlainTextRenderer::with_color(!args.no_color);
    let settings = match Settings::load(&dir) {
        Ok(settings) => settings,
        Err(err) => {
            renderer.print_warning(&format!("ignoring settings: {err}"));
            Settings::default()
        }
    };

    if args.setup {
        return setup(&mut renderer, settings);
    }
    if args.models {
        for (model, description) in KnownModel::catalog() {
            println!("{:<32} {}", model.to_string(), description);
        }
        return Ok(());
    }

    let store = ConversationStore::new(dir.join("conversations"));
    if args.list {
        return list_conversations(&store, &mut renderer);
    }

    let api_key = resolve_api_key(args.api_key.clone(), &settings);
    let config = ChatConfig::resolve(&args, &settings);
    let mut client = match Anthropic::new(api_key) {
        Ok(client) => client,
        Err(err) => {
            renderer.print_error(&describe_error(&err, args.debug));
            return Ok(());
        }
    };
    if config.use_cache {
        client = client.with_cache(ResponseCache::new(dir.join("cache")));
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })?;

    let prompt = free.join(" ");
    let mut session = ChatSession::new(client, store, config);
    // Runtime failures are reported as messages, not exit codes: the
    // session renders them, interrupts are a normal way to end a run,
    // and only argument parsing above terminates non-zero.
    let _ = session.run(&prompt, &mut renderer, &interrupted).await;
    Ok(())
}

/// Prompts for an API key and stores it in the settings file.
fn setup(
    renderer: &mut PlainTextRenderer,
    mut settings: Settings,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut rl = DefaultEditor::new()?;
    let key = rl.readline("Anthropic API key: ")?;
    let key = key.trim();
    if key.is_empty() {
        renderer.print_error("no key entered; settings unchanged");
        return Ok(());
    }
    settings.api_key = Some(key.to_string());
    settings.save(&config_dir())?;
    renderer.print_info("API key saved.");
    Ok(())
}

fn list_conversations(
    store: &ConversationStore,
    renderer: &mut PlainTextRenderer,
) -> Result<(), Box<dyn std::error::Error>> {
    let listing = store.list()?;
    if listing.summaries.is_empty() {
        renderer.print_info("(no saved conversations)");
    }
    for summary in &listing.summaries {
        println!(
            "{}  {} ({} messages)",
            summary.id, summary.title, summary.message_count
        );
    }
    for id in &listing.malformed {
        renderer.print_warning(&format!("skipping malformed conversation {id}"));
    }
    Ok(())
}

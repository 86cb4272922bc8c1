//! Implementations of the `herb` subcommands that print to stdout.

use anyhow::Result;
use std::sync::Arc;

use crate::chat::ChatEngine;
use crate::config::Config;
use crate::embedding;
use crate::index;
use crate::models::{Constitution, IndexMatch};
use crate::prompt::format_herb;
use crate::records;
use crate::repl;
use crate::secrets::Secrets;

/// `herb search`: embed and query only, then print the candidates.
pub async fn run_search(
    config: &Config,
    secrets: &Secrets,
    query: &str,
    top_k: Option<usize>,
) -> Result<()> {
    let embedder = embedding::create_provider(&config.embedding, secrets)?;
    let index = index::create_index(&config.index, secrets)?;

    let vector = embedder.embed(query).await?;
    let matches = index
        .query(&vector, top_k.unwrap_or(config.chat.top_k))
        .await?;

    print_matches(&matches, &config.chat.default_category);
    Ok(())
}

fn print_matches(matches: &[IndexMatch], default_category: &str) {
    if matches.is_empty() {
        println!("No matching herbs.");
        return;
    }
    for (i, m) in matches.iter().enumerate() {
        println!("{}. [{:.4}] {}", i + 1, m.score, m.id);
        println!("{}", format_herb(&m.herb, default_category));
        println!();
    }
}

/// `herb ask`: run one turn and print the reply.
pub async fn run_ask(
    config: &Config,
    secrets: &Secrets,
    user: &str,
    constitution: Option<Constitution>,
    symptom: &str,
) -> Result<()> {
    let engine = ChatEngine::from_config(config, secrets).await?;
    let mut session = engine.start_session(user).await?;
    if let Some(c) = constitution {
        if session.constitution != Some(c) {
            engine.set_constitution(&mut session, c).await?;
        }
    }

    let outcome = engine.ask(&mut session, symptom).await?;
    println!("{}", outcome.reply);
    for w in &outcome.warnings {
        eprintln!("note: {} unavailable: {}", w.stage, w.message);
    }
    Ok(())
}

/// `herb chat`: interactive loop on stdin/stdout.
pub async fn run_chat(config: &Config, secrets: &Secrets, user: Option<String>) -> Result<()> {
    let engine = ChatEngine::from_config(config, secrets).await?;
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    repl::run(&engine, user, stdin, &mut stdout).await
}

/// `herb register`: save a constitution for a user.
pub async fn run_register(
    config: &Config,
    secrets: &Secrets,
    user: &str,
    constitution: Constitution,
) -> Result<()> {
    let store = records::open_store(&config.records, secrets).await?;
    if store.register_user(user.trim(), constitution).await? {
        println!("Registered {} as {}.", user.trim(), constitution);
    } else {
        let saved = store.get_user_constitution(user.trim()).await?;
        println!(
            "{} is already registered ({}); record left unchanged.",
            user.trim(),
            saved.map(|c| c.label()).unwrap_or("unknown")
        );
    }
    Ok(())
}

/// `herb history`: print a user's prior diagnoses.
pub async fn run_history(config: &Config, secrets: &Secrets, user: &str, limit: usize) -> Result<()> {
    let store = records::open_store(&config.records, secrets).await?;
    let history = store.history(user.trim(), limit).await?;
    println!("{}", repl::format_history(&history));
    Ok(())
}

/// `herb serve`: start the HTTP API.
pub async fn run_serve(config: &Config, secrets: &Secrets) -> Result<()> {
    let engine = Arc::new(ChatEngine::from_config(config, secrets).await?);
    crate::server::run_server(config, engine).await
}

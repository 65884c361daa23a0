pub mod commands;

use anyhow::{bail, Context};
use futures_util::StreamExt;
use std::io::{self, Write};
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

use crate::chat::ChatEvent;
use crate::cli::commands::{Commands, SessionAction};
use crate::config::AppConfig;
use crate::db::{DuckDbStore, MessageStore, SessionStore};
use crate::state::AppState;

/// Runs every subcommand except `serve`, which `main` handles.
pub async fn run_cli(command: Commands, config_path: &str) -> anyhow::Result<()> {
    let config = AppConfig::load(config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path))?;

    match command {
        Commands::Serve => bail!("serve is handled by the server entry point"),
        Commands::Session { action } => {
            // Store only; no provider section required
            let store = DuckDbStore::open(&config.database).context("failed to initialize database")?;
            run_session_action(&store, &store, action).await
        }
        Commands::Chat { session } => {
            let state = AppState::from_config(&config)?;
            run_repl(&state, session).await
        }
    }
}

async fn run_session_action(
    sessions: &dyn SessionStore,
    messages: &dyn MessageStore,
    action: SessionAction,
) -> anyhow::Result<()> {
    match action {
        SessionAction::Create { name } => {
            let session = sessions.create(name).await?;
            println!("Created session: {} ({})", session.name, session.id);
        }
        SessionAction::List => {
            let sessions = sessions.list().await?;
            if sessions.is_empty() {
                println!("No sessions found.");
            } else {
                println!("{:<36} | {:<27} | {:>5} | Name", "ID", "Updated At", "Msgs");
                println!("{:-<36}-+-{:-<27}-+-{:-<5}-+-{:-<20}", "", "", "", "");
                for s in sessions {
                    println!(
                        "{:<36} | {:<27} | {:>5} | {}",
                        s.session.id,
                        s.session.updated_at.to_rfc3339(),
                        s.message_count,
                        s.session.name
                    );
                }
            }
        }
        SessionAction::Show { id } => {
            let session = sessions.get(id).await?;
            let messages = messages.list(id).await?;
            println!("Session: {}", session.name);
            println!("ID: {}", session.id);
            println!("Created At: {}", session.created_at.to_rfc3339());
            println!("---");
            for m in messages {
                println!("[{}] {}: {}", m.sequence, m.role.as_str().to_uppercase(), m.content);
                println!("---");
            }
        }
        SessionAction::Rename { id, name } => {
            let session = sessions.rename(id, name).await?;
            println!("Renamed session {} to {}", session.id, session.name);
        }
        SessionAction::Delete { id } => {
            sessions.delete(id).await?;
            println!("Deleted session {}", id);
        }
    }
    Ok(())
}

async fn run_repl(state: &AppState, mut session_id: Option<Uuid>) -> anyhow::Result<()> {
    if let Some(id) = session_id {
        let session = state.sessions.get(id).await?;
        println!("Connected to session: {} ({})", session.name, session.id);
    }

    println!("--- TalkGPT Terminal Chat ---");
    println!("Type /exit to quit.");
    println!("-----------------------------");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("\nUser> ");
        io::stdout().flush()?;

        let Some(input) = lines.next_line().await? else {
            break;
        };
        let text = input.trim();

        if text.is_empty() {
            continue;
        }
        if text == "/exit" || text == "/quit" {
            break;
        }

        let reply = match state.orchestrator.stream_turn(session_id, text).await {
            Ok(reply) => reply,
            Err(e) => {
                eprintln!("Error: {}", e);
                continue;
            }
        };

        if session_id.is_none() {
            println!("(session {})", reply.session_id);
        }
        session_id = Some(reply.session_id);

        print!("Assistant> ");
        io::stdout().flush()?;

        let mut events = reply.events;
        while let Some(event) = events.next().await {
            match event {
                ChatEvent::Fragment(text) => {
                    print!("{}", text);
                    io::stdout().flush()?;
                }
                ChatEvent::Done(_) => break,
                ChatEvent::Failed(e) => {
                    eprintln!("\nError: {}", e);
                    break;
                }
            }
        }
        println!();
    }

    Ok(())
}

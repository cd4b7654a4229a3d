//! Sotto CLI — one-shot messages, an interactive REPL, and session
//! housekeeping. Channel adapters and dashboards live elsewhere; this
//! binary only drives the engine directly.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::EnvFilter;

use sotto_agent::agent_loop::{AgentLoop, AgentLoopDeps};
use sotto_core::bus::MessageBus;
use sotto_core::config::{load_config, Config};
use sotto_core::session::SessionManager;
use sotto_providers::HttpProvider;

#[derive(Parser)]
#[command(name = "sotto", about = "Sotto — a quiet conversational agent", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send one message and print the reply.
    Message {
        /// The message text.
        text: String,
    },
    /// Start an interactive REPL.
    Repl,
    /// List stored sessions.
    Sessions,
    /// Delete a session by key (e.g. "cli:direct").
    DeleteSession { key: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let config = load_config(None);

    match cli.command {
        Command::Message { text } => {
            let agent = build_agent(&config)?;
            let reply = agent.process_direct(&text).await?;
            println!("{reply}");
        }
        Command::Repl => {
            let agent = build_agent(&config)?;
            run_repl(agent).await?;
        }
        Command::Sessions => {
            let sessions = SessionManager::new(None)?;
            for summary in sessions.list_sessions() {
                println!(
                    "{}  {}",
                    summary.key.bold(),
                    summary
                        .updated_at
                        .format("%Y-%m-%d %H:%M")
                        .to_string()
                        .dimmed()
                );
            }
        }
        Command::DeleteSession { key } => {
            let sessions = SessionManager::new(None)?;
            if sessions.delete(&key) {
                println!("Deleted session {key}");
            } else {
                println!("No session named {key}");
            }
        }
    }

    Ok(())
}

fn build_agent(config: &Config) -> Result<AgentLoop> {
    if !config.provider.is_configured() {
        anyhow::bail!("No API key configured. Set SOTTO_API_KEY or edit ~/.sotto/config.json");
    }

    let provider = Arc::new(HttpProvider::new(&config.provider, &config.agent.model));
    let workspace = sotto_core::utils::expand_home(&config.agent.workspace);
    std::fs::create_dir_all(&workspace)?;

    let bus = Arc::new(MessageBus::new(64));
    Ok(AgentLoop::new(
        bus,
        provider,
        workspace,
        config,
        AgentLoopDeps::default(),
    ))
}

async fn run_repl(agent: AgentLoop) -> Result<()> {
    println!("{}", "Sotto REPL — /quit to exit".dimmed());
    let mut editor = DefaultEditor::new()?;

    loop {
        match editor.readline(&"you> ".green().to_string()) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "/quit" || line == "/exit" {
                    break;
                }
                let _ = editor.add_history_entry(line);

                match agent.process_direct(line).await {
                    Ok(reply) => println!("{} {reply}", "sotto>".cyan()),
                    Err(e) => eprintln!("{} {e}", "error:".red()),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{} {e}", "error:".red());
                break;
            }
        }
    }

    agent.stop().await;
    Ok(())
}

//! Terminal chat client for a zams relay.
//!
//! # Examples
//!
//! ```sh
//! # One question, streamed to stdout
//! zams --user "How many CSV datasources are there?"
//!
//! # Interactive session with detailed answers
//! zams --detailed
//!
//! # Upload a file first, then ask about it
//! zams --attach report.pdf --user "Summarize the datasource table"
//!
//! # Render code fences once the reply has finished
//! zams --pretty --user "Show a SQL query that counts PDFs"
//!
//! # Keep the conversation across runs
//! zams --history ~/.zams/history.json
//! ```
//!
//! In interactive mode, `/detailed` and `/concise` switch the response mode,
//! `/suggest` lists starter questions and `/suggest <n>` asks one, `/clear`
//! starts a new conversation, and `/quit` exits.

use std::io::Write;
use std::path::{Path, PathBuf};

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use zams_rs::chat::SessionObserver;
use zams_rs::prelude::*;

/// Chat with the zams assistant through a running relay.
#[derive(Parser)]
#[command(name = "zams")]
struct Cli {
    /// Relay base URL.
    #[arg(long, default_value = "http://127.0.0.1:3001")]
    server: String,

    /// Send one message and exit. Without this, reads messages from stdin.
    #[arg(long)]
    user: Option<String>,

    /// Ask for thorough answers with examples.
    #[arg(long)]
    detailed: bool,

    /// Do not ground answers in the datasource table.
    #[arg(long)]
    no_datasources: bool,

    /// Files to upload before the first message is sent.
    #[arg(long)]
    attach: Vec<PathBuf>,

    /// Print each finished reply with code fences framed, instead of
    /// streaming raw text.
    #[arg(long)]
    pretty: bool,

    /// JSON file the conversation is restored from on start and saved to
    /// after every turn.
    #[arg(long)]
    history: Option<PathBuf>,
}

/// Echoes fragments to stdout while feeding them to the session.
struct TerminalObserver<'a> {
    inner: SessionObserver<'a>,
    echo: bool,
}

impl StreamObserver for TerminalObserver<'_> {
    fn on_token(&mut self, fragment: &str) {
        if self.echo {
            print!("{fragment}");
            std::io::stdout().flush().ok();
        }
        self.inner.on_token(fragment);
    }

    fn on_done(&mut self) {
        self.inner.on_done();
    }

    fn on_error(&mut self, message: &str) {
        self.inner.on_error(message);
    }
}

async fn save_history(session: &ChatSession, path: Option<&Path>) {
    if let Some(path) = path
        && let Err(e) = session.save_to(path).await
    {
        warn!("Failed to save history to {}: {e}", path.display());
    }
}

fn print_suggestions(session: &ChatSession) {
    let suggestions = session.suggestions();
    if suggestions.is_empty() {
        eprintln!("(suggestions are offered before the first message; /clear starts over)");
        return;
    }
    eprintln!("Try asking about your datasources:");
    for (i, suggestion) in suggestions.iter().enumerate() {
        eprintln!("  {}. {suggestion}", i + 1);
    }
}

async fn run_turn(
    relay: &RelayClient,
    session: &mut ChatSession,
    input: &str,
    pretty: bool,
    history: Option<&Path>,
) -> Result<(), String> {
    let turn = session.submit(input).map_err(|e| e.to_string())?;

    let sent = {
        let mut observer = TerminalObserver {
            inner: session.observer(turn.id),
            echo: !pretty,
        };
        relay.send(&turn.request, &mut observer).await
    };

    let outcome = match sent {
        Ok(outcome) => outcome,
        Err(e) => {
            session.cancel();
            save_history(session, history).await;
            return Err(e.to_string());
        }
    };
    save_history(session, history).await;

    let last = session.messages().len().saturating_sub(1);
    let reply = session
        .messages()
        .last()
        .filter(|m| m.role == MessageRole::Assistant);

    if pretty && let Some(reply) = reply {
        print!("{}", to_terminal(&render(&reply.content)));
    }
    println!();

    match outcome {
        StreamOutcome::Completed => Ok(()),
        StreamOutcome::Failed(message) => {
            if reply.is_some() && session.is_incomplete(last) {
                eprintln!("[reply incomplete]");
            }
            Err(message)
        }
    }
}

async fn upload_attachments(relay: &RelayClient, paths: &[PathBuf]) -> Result<(), String> {
    for path in paths {
        let receipt = relay
            .upload(path)
            .await
            .map_err(|e| format!("failed to upload '{}': {e}", path.display()))?;
        eprintln!(
            "Uploaded {} ({} bytes, {})",
            receipt.filename, receipt.size, receipt.content_type
        );
    }
    Ok(())
}

async fn repl(
    relay: &RelayClient,
    session: &mut ChatSession,
    pretty: bool,
    history: Option<&Path>,
) -> Result<(), String> {
    if !session.suggestions().is_empty() {
        print_suggestions(session);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| format!("failed to read stdin: {e}"))?
        else {
            return Ok(());
        };

        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => return Ok(()),
            "/clear" => {
                session.clear();
                save_history(session, history).await;
                eprintln!("(conversation cleared)");
            }
            "/detailed" => session.set_mode(ResponseMode::Detailed),
            "/concise" => session.set_mode(ResponseMode::Concise),
            "/suggest" => print_suggestions(session),
            command if command.starts_with("/suggest ") => {
                let pick = command
                    .strip_prefix("/suggest ")
                    .and_then(|n| n.trim().parse::<usize>().ok())
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|i| session.suggestions().get(i).copied());
                let Some(question) = pick else {
                    eprintln!("No such suggestion; /suggest lists them");
                    continue;
                };
                println!("> {question}");
                if let Err(e) = run_turn(relay, session, question, pretty, history).await {
                    eprintln!("Error: {e}");
                }
            }
            input => {
                if let Err(e) = run_turn(relay, session, input, pretty, history).await {
                    eprintln!("Error: {e}");
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let relay = RelayClient::new(&cli.server).map_err(|e| e.to_string())?;

    let history = cli.history.as_deref();
    let mut session = match history {
        Some(path) => ChatSession::load_from(path)
            .await
            .map_err(|e| format!("{}: {e}", path.display()))?,
        None => ChatSession::new(),
    };
    if cli.detailed {
        session.set_mode(ResponseMode::Detailed);
    }
    session.set_include_datasources(!cli.no_datasources);

    upload_attachments(&relay, &cli.attach).await?;

    match cli.user {
        Some(input) => run_turn(&relay, &mut session, &input, cli.pretty, history).await,
        None => repl(&relay, &mut session, cli.pretty, history).await,
    }
}

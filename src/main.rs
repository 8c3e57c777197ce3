mod app;
mod client;
mod commands;
mod config;
mod confirm;
mod error;
mod notify;
mod protocol;
mod render;
mod session;
mod stream;
mod turn;
mod ui;
mod view;

use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use app::App;
use client::{ChatApi, ChatClient};
use config::{ConnectionArgs, UiConfig};
use error::Result;
use render::MarkdownRenderer;
use turn::TurnOutcome;

/// Terminal client for the AskDB natural-language database assistant
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open the full-screen chat client (the default)
    Chat {
        /// Conversation to open instead of the most recent one
        #[arg(long)]
        session: Option<String>,
    },

    /// List conversations
    Sessions,

    /// Print every message of a conversation
    History {
        #[arg(value_name = "SESSION_ID")]
        session_id: String,
    },

    /// Ask one question and stream the answer to stdout
    Ask {
        question: String,

        /// Conversation to ask in (a new one is created when omitted)
        #[arg(long)]
        session: Option<String>,
    },

    /// Delete a conversation
    Delete {
        #[arg(value_name = "SESSION_ID")]
        session_id: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Remove every message from a conversation
    Clear {
        #[arg(value_name = "SESSION_ID")]
        session_id: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Inspect or clear the server's query cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Show hit and miss counters
    Stats,

    /// Drop every cached query
    Clear {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let full_screen = matches!(cli.command, None | Some(Command::Chat { .. }));
    let traced = if full_screen {
        init_file_tracing(&cli.connection.log_path())
    } else {
        init_tracing();
        Ok(())
    };
    if let Err(e) = traced {
        eprintln!("Error: {e}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let client = ChatClient::new(&cli.connection.client_config())?;
    debug!(base_url = client.base_url(), "chat service");
    let api: Arc<dyn ChatApi> = Arc::new(client);
    let mut stdout = io::stdout();

    match cli.command.unwrap_or(Command::Chat { session: None }) {
        Command::Chat { session } => {
            let mut app = App::new(api, Arc::new(MarkdownRenderer), UiConfig::default());
            match session {
                Some(id) => app.start_with(&id),
                None => app.start(),
            }
            ui::run_tui(app).await?;
        }
        Command::Sessions => commands::list_sessions(api.as_ref(), &mut stdout).await?,
        Command::History { session_id } => {
            commands::history(api.as_ref(), &session_id, &mut stdout).await?
        }
        Command::Ask { question, session } => {
            let interrupt = async {
                let _ = tokio::signal::ctrl_c().await;
            };
            let turn = commands::ask(
                api,
                &question,
                session,
                &mut stdout,
                &mut io::stderr(),
                interrupt,
            )
            .await?;
            if turn.outcome == Some(TurnOutcome::Errored) {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Delete { session_id, yes } => {
            let ops = commands::session_ops(api, yes);
            commands::delete(&ops, &session_id, &mut stdout).await?
        }
        Command::Clear { session_id, yes } => {
            let ops = commands::session_ops(api, yes);
            commands::clear(&ops, &session_id, &mut stdout).await?
        }
        Command::Cache { action } => match action {
            CacheAction::Stats => {
                let ops = commands::session_ops(api, false);
                commands::cache_stats(&ops, &mut stdout).await?
            }
            CacheAction::Clear { yes } => {
                let ops = commands::session_ops(api, yes);
                commands::cache_clear(&ops, &mut stdout).await?
            }
        },
    }

    Ok(ExitCode::SUCCESS)
}

/// One-shot commands log warnings to stderr so stdout stays clean.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

/// The full-screen client owns the terminal, so its log goes to a file.
fn init_file_tracing(path: &Path) -> Result<()> {
    let log_file = OpenOptions::new().create(true).append(true).open(path)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Mutex::new(log_file))
        .try_init();
    Ok(())
}

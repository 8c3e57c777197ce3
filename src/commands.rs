//! One-shot subcommands. Each talks to the service once, prints plain text
//! and exits; none of them touch the terminal beyond stdin and stdout.

use std::future::Future;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info};

use crate::client::ChatApi;
use crate::confirm::{AutoConfirm, Confirmer};
use crate::error::Result;
use crate::protocol::Role;
use crate::render::MarkdownRenderer;
use crate::session::{SessionOps, SessionOutcome};
use crate::stream::event_batches;
use crate::turn::{Turn, TurnController, TurnOutcome};
use crate::view::{STOPPED_MARKER, Transcript};

/// Asks on the controlling terminal and waits for a `y` or `yes`.
pub struct TerminalPrompt;

#[async_trait]
impl Confirmer for TerminalPrompt {
    async fn confirm(&self, message: &str, note: Option<&str>) -> bool {
        let prompt = match note {
            Some(note) => format!("{message} ({note}) [y/N]: "),
            None => format!("{message} [y/N]: "),
        };
        let answer = tokio::task::spawn_blocking(move || -> io::Result<String> {
            let mut stderr = io::stderr();
            write!(stderr, "{prompt}")?;
            stderr.flush()?;
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            Ok(line)
        })
        .await;

        match answer {
            Ok(Ok(line)) => matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            _ => false,
        }
    }
}

/// Session operations for a one-shot command; `--yes` answers every prompt.
pub fn session_ops(api: Arc<dyn ChatApi>, assume_yes: bool) -> SessionOps {
    let gate: Arc<dyn Confirmer> = if assume_yes {
        Arc::new(AutoConfirm::accept())
    } else {
        Arc::new(TerminalPrompt)
    };
    SessionOps::new(api, gate)
}

pub async fn list_sessions(api: &dyn ChatApi, out: &mut impl Write) -> Result<()> {
    let sessions = api.list_sessions().await?;
    if sessions.is_empty() {
        writeln!(out, "No conversations yet.")?;
    }
    for session in sessions {
        writeln!(
            out,
            "{}  {}  ({} messages)",
            session.session_id, session.title, session.message_count
        )?;
    }
    Ok(())
}

pub async fn history(api: &dyn ChatApi, session_id: &str, out: &mut impl Write) -> Result<()> {
    let messages = api.session_messages(session_id).await?;
    for message in messages {
        let speaker = match message.role {
            Role::User => "You",
            Role::Assistant => "Assistant",
        };
        writeln!(out, "{speaker}:")?;
        for line in message.content.lines() {
            writeln!(out, "  {line}")?;
        }
        writeln!(out)?;
    }
    Ok(())
}

pub async fn delete(ops: &SessionOps, session_id: &str, out: &mut impl Write) -> Result<()> {
    match ops.delete(session_id.to_string(), true).await? {
        SessionOutcome::Declined => writeln!(out, "Cancelled.")?,
        _ => writeln!(out, "Deleted session {session_id}")?,
    }
    Ok(())
}

pub async fn clear(ops: &SessionOps, session_id: &str, out: &mut impl Write) -> Result<()> {
    match ops.clear(session_id.to_string(), true).await? {
        SessionOutcome::Cleared { message, .. } => writeln!(out, "{message}")?,
        _ => writeln!(out, "Cancelled.")?,
    }
    Ok(())
}

pub async fn cache_stats(ops: &SessionOps, out: &mut impl Write) -> Result<()> {
    let stats = ops.cache_stats().await?;
    for (label, value) in stats.summary_rows() {
        writeln!(out, "{label:<15}{value}")?;
    }
    Ok(())
}

pub async fn cache_clear(ops: &SessionOps, out: &mut impl Write) -> Result<()> {
    match ops.clear_cache(true).await? {
        Some(message) => writeln!(out, "{message}")?,
        None => writeln!(out, "Cancelled.")?,
    }
    Ok(())
}

/// Ask one question and stream the answer to `out` as it arrives. Status
/// updates go to `err`. When `interrupt` resolves first the turn is stopped
/// and whatever arrived so far is kept.
pub async fn ask(
    api: Arc<dyn ChatApi>,
    question: &str,
    session_id: Option<String>,
    out: &mut impl Write,
    err: &mut impl Write,
    interrupt: impl Future<Output = ()>,
) -> Result<Turn> {
    let session_id = match session_id {
        Some(id) => id,
        None => {
            let created = api.create_session().await?;
            writeln!(err, "Created session {}", created.session_id)?;
            created.session_id
        }
    };

    let mut view = Transcript::new(Arc::new(MarkdownRenderer));
    let mut turns = TurnController::new(0);
    let start = turns.submit(question, &session_id, &mut view)?;
    let id = start.id;
    let mut echo = Echo::default();
    echo.update(turns.active(), out, err)?;

    futures::pin_mut!(interrupt);

    let opened = tokio::select! {
        biased;
        _ = &mut interrupt => None,
        opened = api.open_stream(&start.request) => Some(opened),
    };

    let finished = match opened {
        None => {
            debug!(turn = %id, "interrupted before the stream opened");
            turns.cancel(&mut view)
        }
        Some(Err(cause)) => turns.fail(id, &cause.to_string(), &mut view),
        Some(Ok(fragments)) => {
            turns.stream_opened(id);
            let batches = event_batches(fragments);
            futures::pin_mut!(batches);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut interrupt => {
                        debug!(turn = %id, "interrupted");
                        break turns.cancel(&mut view);
                    }
                    next = batches.next() => match next {
                        Some(Ok(events)) => {
                            let effects = turns.apply_batch(id, events, &mut view);
                            if let Some(turn) = effects.finished {
                                break Some(turn);
                            }
                            echo.update(turns.active(), out, err)?;
                        }
                        Some(Err(cause)) => break turns.fail(id, &cause.to_string(), &mut view),
                        None => break turns.stream_closed(id, &mut view),
                    },
                }
            }
        }
    };

    let turn = finished.or_else(|| turns.last().cloned()).unwrap_or_else(|| Turn {
        id,
        session_id: session_id.clone(),
        text: String::new(),
        cache_hit: false,
        status: None,
        error: None,
        outcome: None,
    });

    echo.update(Some(&turn), out, err)?;
    if !turn.text.is_empty() {
        writeln!(out)?;
    }
    match turn.outcome {
        Some(TurnOutcome::Aborted) => writeln!(out, "{STOPPED_MARKER}")?,
        Some(TurnOutcome::Errored) => {
            writeln!(err, "{}", turn.error.as_deref().unwrap_or("Request failed"))?
        }
        _ => {}
    }
    out.flush()?;
    info!(session_id = %session_id, outcome = ?turn.outcome, "question answered");
    Ok(turn)
}

/// Prints only what is new since the last update.
#[derive(Default)]
struct Echo {
    printed: usize,
    status: Option<String>,
}

impl Echo {
    fn update(
        &mut self,
        turn: Option<&Turn>,
        out: &mut impl Write,
        err: &mut impl Write,
    ) -> io::Result<()> {
        let Some(turn) = turn else {
            return Ok(());
        };
        if let Some(status) = &turn.status {
            if self.status.as_ref() != Some(status) {
                writeln!(err, "{status}")?;
            }
        }
        self.status = turn.status.clone();

        if let Some(fresh) = turn.text.get(self.printed..) {
            if !fresh.is_empty() {
                write!(out, "{fresh}")?;
                out.flush()?;
            }
        }
        self.printed = turn.text.len();
        Ok(())
    }
}

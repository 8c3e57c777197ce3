//! Lifecycle of one question/answer exchange.
//!
//! At most one turn is active at a time. The controller is driven by the
//! coordinator: `submit` hands back what the stream task needs, the task's
//! event batches come back through `apply_batch`, and every terminal path
//! funnels into the same finalization.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::SubmitError;
use crate::protocol::{ChatRequest, StreamEvent};
use crate::view::Transcript;

pub const CONNECTING_STATUS: &str = "Connecting...";
pub const CACHED_STATUS: &str = "Using cached query";
pub const SQL_READY_STATUS: &str = "Query ready, generating response...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TurnId(pub u64);

impl std::fmt::Display for TurnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "turn-{}", self.0)
    }
}

/// Where the active turn is. A finished turn's outcome lives on `Turn`;
/// the controller itself goes straight back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Submitting,
    Awaiting,
    Streaming,
}

impl TurnState {
    pub fn is_active(self) -> bool {
        matches!(
            self,
            TurnState::Submitting | TurnState::Awaiting | TurnState::Streaming
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Aborted,
    Errored,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub id: TurnId,
    pub session_id: String,
    pub text: String,
    pub cache_hit: bool,
    pub status: Option<String>,
    pub error: Option<String>,
    pub outcome: Option<TurnOutcome>,
}

impl Turn {
    fn new(id: TurnId, session_id: &str) -> Self {
        Self {
            id,
            session_id: session_id.to_string(),
            text: String::new(),
            cache_hit: false,
            status: Some(CONNECTING_STATUS.to_string()),
            error: None,
            outcome: None,
        }
    }

    fn mark_cache_hit(&mut self, value: bool) {
        self.cache_hit |= value;
    }
}

/// Everything the stream task needs to run a submitted turn.
#[derive(Debug, Clone)]
pub struct TurnStart {
    pub id: TurnId,
    pub request: ChatRequest,
    pub cancel: CancellationToken,
}

/// Result of feeding a batch into the controller.
#[derive(Debug, Default, PartialEq)]
pub struct BatchEffects {
    /// Message counts changed server-side.
    pub refresh_sessions: bool,
    pub finished: Option<Turn>,
}

struct ActiveTurn {
    turn: Turn,
    cancel: CancellationToken,
}

pub struct TurnController {
    state: TurnState,
    active: Option<ActiveTurn>,
    last: Option<Turn>,
    next_id: u64,
    scroll_proximity: usize,
}

impl TurnController {
    pub fn new(scroll_proximity: usize) -> Self {
        Self {
            state: TurnState::Idle,
            active: None,
            last: None,
            next_id: 1,
            scroll_proximity,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    pub fn active(&self) -> Option<&Turn> {
        self.active.as_ref().map(|active| &active.turn)
    }

    /// The most recently finished turn.
    pub fn last(&self) -> Option<&Turn> {
        self.last.as_ref()
    }

    pub fn submit(
        &mut self,
        question: &str,
        session_id: &str,
        view: &mut Transcript,
    ) -> Result<TurnStart, SubmitError> {
        if self.active.is_some() {
            return Err(SubmitError::Busy);
        }
        let question = question.trim();
        if question.is_empty() {
            return Err(SubmitError::EmptyQuestion);
        }

        let id = TurnId(self.next_id);
        self.next_id += 1;

        let cancel = CancellationToken::new();
        self.active = Some(ActiveTurn {
            turn: Turn::new(id, session_id),
            cancel: cancel.clone(),
        });
        self.state = TurnState::Submitting;

        view.push_user(question);
        view.open_turn(id, CONNECTING_STATUS);
        info!(turn = %id, session_id, "turn submitted");

        Ok(TurnStart {
            id,
            request: ChatRequest {
                question: question.to_string(),
                session_id: session_id.to_string(),
            },
            cancel,
        })
    }

    /// The stream request was accepted and its body is being read.
    pub fn stream_opened(&mut self, id: TurnId) {
        if self.is_current(id) && self.state == TurnState::Submitting {
            self.state = TurnState::Awaiting;
        }
    }

    /// Apply the events decoded from one transport fragment, in order.
    pub fn apply_batch(
        &mut self,
        id: TurnId,
        events: Vec<StreamEvent>,
        view: &mut Transcript,
    ) -> BatchEffects {
        let mut effects = BatchEffects::default();
        if !self.is_current(id) {
            debug!(turn = %id, events = events.len(), "dropping events for inactive turn");
            return effects;
        }

        let follow = view.scroll.near_end(self.scroll_proximity);
        let mut outcome = None;

        for event in events {
            outcome = self.dispatch(event, view, &mut effects);
            if outcome.is_some() {
                break;
            }
        }

        if follow {
            view.scroll.to_end();
        }

        if let Some(outcome) = outcome {
            effects.finished = self.finalize(outcome, view);
        }
        effects
    }

    fn dispatch(
        &mut self,
        event: StreamEvent,
        view: &mut Transcript,
        effects: &mut BatchEffects,
    ) -> Option<TurnOutcome> {
        let active = self.active.as_mut()?;
        let turn = &mut active.turn;
        let id = turn.id;

        match event {
            StreamEvent::Status { message } => {
                set_status(view, id, &message);
                turn.status = Some(message);
                None
            }
            StreamEvent::CacheHit { value } => {
                turn.mark_cache_hit(value);
                if value {
                    set_status(view, id, CACHED_STATUS);
                    turn.status = Some(CACHED_STATUS.to_string());
                }
                None
            }
            StreamEvent::SqlReady { .. } => {
                set_status(view, id, SQL_READY_STATUS);
                turn.status = Some(SQL_READY_STATUS.to_string());
                None
            }
            StreamEvent::Chunk { content } => {
                turn.text.push_str(&content);
                turn.status = None;
                self.state = TurnState::Streaming;
                view.render_turn_text(id, &turn.text);
                if let Some(entry) = view.turn_entry_mut(id) {
                    entry.status = None;
                }
                None
            }
            StreamEvent::Done => {
                if turn.cache_hit {
                    if let Some(entry) = view.turn_entry_mut(id) {
                        entry.cached = true;
                        view.set_cache_indicator(true);
                    }
                }
                effects.refresh_sessions = true;
                Some(TurnOutcome::Completed)
            }
            StreamEvent::Error { message } => {
                if let Some(entry) = view.turn_entry_mut(id) {
                    entry.status = None;
                    entry.error = Some(message.clone());
                }
                turn.error = Some(message);
                Some(TurnOutcome::Errored)
            }
        }
    }

    /// The transport failed for a reason other than cancellation.
    pub fn fail(&mut self, id: TurnId, cause: &str, view: &mut Transcript) -> Option<Turn> {
        if !self.is_current(id) {
            return None;
        }
        let message = format!("Connection error: {}", cause);
        if let Some(entry) = view.turn_entry_mut(id) {
            entry.status = None;
            entry.error = Some(message.clone());
        }
        if let Some(active) = self.active.as_mut() {
            active.turn.error = Some(message);
        }
        self.finalize(TurnOutcome::Errored, view)
    }

    /// The transport closed without a terminal event.
    pub fn stream_closed(&mut self, id: TurnId, view: &mut Transcript) -> Option<Turn> {
        if !self.is_current(id) {
            return None;
        }
        debug!(turn = %id, "stream closed without a terminal event");
        self.finalize(TurnOutcome::Completed, view)
    }

    /// Stop the active turn at the user's request. Text received so far stays;
    /// the stopped marker is added after it.
    pub fn cancel(&mut self, view: &mut Transcript) -> Option<Turn> {
        if !self.state.is_active() {
            return None;
        }
        let active = self.active.as_ref()?;
        active.cancel.cancel();
        let id = active.turn.id;

        if let Some(entry) = view.turn_entry_mut(id) {
            entry.status = None;
            entry.stopped = true;
        }
        self.finalize(TurnOutcome::Aborted, view)
    }

    fn finalize(&mut self, outcome: TurnOutcome, view: &mut Transcript) -> Option<Turn> {
        let ActiveTurn { mut turn, .. } = self.active.take()?;
        self.state = TurnState::Idle;
        turn.outcome = Some(outcome);
        turn.status = None;
        view.seal_turn(turn.id);
        info!(
            turn = %turn.id,
            outcome = ?outcome,
            chars = turn.text.len(),
            cache_hit = turn.cache_hit,
            "turn finished"
        );

        self.last = Some(turn.clone());
        Some(turn)
    }

    fn is_current(&self, id: TurnId) -> bool {
        self.active.as_ref().is_some_and(|active| active.turn.id == id)
    }
}

fn set_status(view: &mut Transcript, id: TurnId, message: &str) {
    if let Some(entry) = view.turn_entry_mut(id) {
        entry.status = Some(message.to_string());
    }
}

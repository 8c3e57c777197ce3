//! The coordinator: sole owner of session, turn, view and notification state.
//!
//! Background tasks never touch that state. They report back over the event
//! channel and `App::handle` applies their results one at a time, which keeps
//! every mutation in one place on one thread.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::client::ChatApi;
use crate::config::UiConfig;
use crate::confirm::{ConfirmRequest, Confirmer, DialogGate};
use crate::error::Result;
use crate::notify::{NoticeKind, Notifications};
use crate::protocol::{CacheStats, StreamEvent};
use crate::render::Renderer;
use crate::session::{Followup, SessionOps, SessionOutcome, SessionStore};
use crate::stream::event_batches;
use crate::turn::{Turn, TurnController, TurnId, TurnStart};
use crate::view::Transcript;

const EVENT_BUFFER: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    Load,
    Create,
    Select,
    Delete,
    Clear,
}

impl SessionAction {
    fn describe(self) -> &'static str {
        match self {
            SessionAction::Load => "load sessions",
            SessionAction::Create => "create session",
            SessionAction::Select => "load messages",
            SessionAction::Delete => "delete session",
            SessionAction::Clear => "clear chat",
        }
    }
}

#[derive(Debug)]
pub enum UiEvent {
    Session {
        action: SessionAction,
        result: Result<SessionOutcome>,
    },
    StreamOpened(TurnId),
    StreamBatch(TurnId, Vec<StreamEvent>),
    StreamFailed(TurnId, String),
    StreamClosed(TurnId),
    CacheStats(Result<CacheStats>),
    CacheCleared(Result<Option<String>>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CachePanel {
    Loading,
    Loaded(CacheStats),
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Input,
    Sidebar,
}

pub struct App {
    pub config: UiConfig,
    api: Arc<dyn ChatApi>,
    ops: SessionOps,
    pub store: SessionStore,
    pub turns: TurnController,
    pub view: Transcript,
    pub notices: Notifications,
    pub dialog: Option<ConfirmRequest>,
    dialogs: mpsc::UnboundedReceiver<ConfirmRequest>,
    pub cache_panel: Option<CachePanel>,
    pub focus: Focus,
    pub sidebar_cursor: usize,
    pending_question: Option<String>,
    sender: mpsc::Sender<UiEvent>,
    receiver: mpsc::Receiver<UiEvent>,
}

impl App {
    pub fn new(api: Arc<dyn ChatApi>, renderer: Arc<dyn Renderer>, config: UiConfig) -> Self {
        let (gate, dialogs) = DialogGate::channel();
        let gate: Arc<dyn Confirmer> = Arc::new(gate);
        let (sender, receiver) = mpsc::channel(EVENT_BUFFER);

        Self {
            config,
            ops: SessionOps::new(api.clone(), gate),
            api,
            store: SessionStore::new(),
            turns: TurnController::new(config.scroll_proximity),
            view: Transcript::new(renderer),
            notices: Notifications::new(&config),
            dialog: None,
            dialogs,
            cache_panel: None,
            focus: Focus::Input,
            sidebar_cursor: 0,
            pending_question: None,
            sender,
            receiver,
        }
    }

    /// Load the session list; the first session (or a fresh one) becomes active.
    pub fn start(&mut self) {
        let ops = self.ops.clone();
        self.spawn_session(SessionAction::Load, async move { ops.list().await });
    }

    /// Open a specific session at startup instead of the first listed one.
    pub fn start_with(&mut self, session_id: &str) {
        self.select_session(session_id);
        self.start();
    }

    pub fn input_enabled(&self) -> bool {
        !self.turns.is_busy()
    }

    /// Submit the composed question. Returns whether the input was consumed.
    pub fn submit(&mut self, question: &str) -> bool {
        if question.trim().is_empty() || self.turns.is_busy() || self.pending_question.is_some()
        {
            return false;
        }

        let Some(session_id) = self.store.active().map(str::to_string) else {
            self.pending_question = Some(question.to_string());
            self.new_session();
            return true;
        };

        match self.turns.submit(question, &session_id, &mut self.view) {
            Ok(start) => {
                self.spawn_turn(start);
                true
            }
            Err(err) => {
                debug!(error = %err, "submission refused");
                false
            }
        }
    }

    pub fn cancel_turn(&mut self) {
        if let Some(turn) = self.turns.cancel(&mut self.view) {
            self.turn_finished(turn);
        }
    }

    pub fn new_session(&mut self) {
        let ops = self.ops.clone();
        self.spawn_session(SessionAction::Create, async move { ops.create().await });
    }

    pub fn select_session(&mut self, session_id: &str) {
        self.store.begin_select(session_id);
        let ops = self.ops.clone();
        let session_id = session_id.to_string();
        self.spawn_session(SessionAction::Select, async move {
            ops.select(session_id).await
        });
    }

    pub fn delete_session(&mut self, session_id: &str) {
        let ops = self.ops.clone();
        let session_id = session_id.to_string();
        self.spawn_session(SessionAction::Delete, async move {
            ops.delete(session_id, true).await
        });
    }

    pub fn delete_active(&mut self) {
        match self.store.active().map(str::to_string) {
            Some(id) => self.delete_session(&id),
            None => self.notify_error("No active session selected"),
        }
    }

    pub fn clear_active(&mut self) {
        let Some(session_id) = self.store.active().map(str::to_string) else {
            return;
        };
        let ops = self.ops.clone();
        self.spawn_session(SessionAction::Clear, async move {
            ops.clear(session_id, true).await
        });
    }

    pub fn open_cache_panel(&mut self) {
        self.cache_panel = Some(CachePanel::Loading);
        let ops = self.ops.clone();
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let _ = sender.send(UiEvent::CacheStats(ops.cache_stats().await)).await;
        });
    }

    pub fn close_cache_panel(&mut self) {
        self.cache_panel = None;
    }

    pub fn clear_cache(&mut self) {
        let ops = self.ops.clone();
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let _ = sender
                .send(UiEvent::CacheCleared(ops.clear_cache(true).await))
                .await;
        });
    }

    /// Answer the confirmation currently on screen.
    pub fn answer_dialog(&mut self, accepted: bool) {
        if let Some(request) = self.dialog.take() {
            request.resolve(accepted);
        }
        self.promote_dialog();
    }

    /// Apply everything that has arrived without waiting. Called once per frame.
    pub fn drain(&mut self) {
        while let Ok(event) = self.receiver.try_recv() {
            self.handle(event);
        }
        self.promote_dialog();
        self.notices.prune(Instant::now());
    }

    /// Wait for the next event or confirmation request and apply it.
    pub async fn pump(&mut self) {
        if self.dialog.is_none() {
            tokio::select! {
                Some(event) = self.receiver.recv() => self.handle(event),
                Some(request) = self.dialogs.recv() => self.dialog = Some(request),
                else => {}
            }
        } else if let Some(event) = self.receiver.recv().await {
            self.handle(event);
        }
    }

    pub fn handle(&mut self, event: UiEvent) {
        match event {
            UiEvent::Session { action, result } => match result {
                Ok(outcome) => self.apply_session(outcome),
                Err(err) => {
                    warn!(action = action.describe(), error = %err, "session operation failed");
                    if action == SessionAction::Create {
                        self.pending_question = None;
                    }
                    self.notify_error(format!("Failed to {}: {}", action.describe(), err));
                }
            },
            UiEvent::StreamOpened(id) => self.turns.stream_opened(id),
            UiEvent::StreamBatch(id, events) => {
                let effects = self.turns.apply_batch(id, events, &mut self.view);
                if effects.refresh_sessions {
                    self.refresh_sessions();
                }
                if let Some(turn) = effects.finished {
                    self.turn_finished(turn);
                }
            }
            UiEvent::StreamFailed(id, cause) => {
                if let Some(turn) = self.turns.fail(id, &cause, &mut self.view) {
                    self.turn_finished(turn);
                }
            }
            UiEvent::StreamClosed(id) => {
                if let Some(turn) = self.turns.stream_closed(id, &mut self.view) {
                    self.turn_finished(turn);
                }
            }
            UiEvent::CacheStats(result) => {
                // Ignore results for a panel the user already closed.
                if self.cache_panel.is_some() {
                    self.cache_panel = Some(match result {
                        Ok(stats) => CachePanel::Loaded(stats),
                        Err(err) => CachePanel::Failed(format!("Failed to load cache stats: {err}")),
                    });
                }
            }
            UiEvent::CacheCleared(result) => match result {
                Ok(Some(message)) => {
                    self.notify_info(message);
                    if self.cache_panel.is_some() {
                        self.open_cache_panel();
                    }
                }
                Ok(None) => {}
                Err(err) => self.notify_error(format!("Failed to clear cache: {err}")),
            },
        }
    }

    fn apply_session(&mut self, outcome: SessionOutcome) {
        let created = matches!(outcome, SessionOutcome::Created { .. });
        if let Some(err) = outcome.refresh_error() {
            self.notify_error(format!("Failed to {}: {}", SessionAction::Load.describe(), err));
        }
        let followup = self.store.apply(outcome, &mut self.view);
        self.clamp_sidebar_cursor();

        match followup {
            Followup::None => {}
            Followup::Load(session_id) => {
                let ops = self.ops.clone();
                self.spawn_session(SessionAction::Select, async move {
                    ops.select(session_id).await
                });
            }
            Followup::Provision => self.new_session(),
            Followup::Notify(message) => self.notify_info(message),
        }

        if created {
            if let Some(question) = self.pending_question.take() {
                self.submit(&question);
            }
        }
    }

    fn turn_finished(&mut self, turn: Turn) {
        debug!(turn = %turn.id, outcome = ?turn.outcome, "re-enabling input");
        self.focus = Focus::Input;
    }

    fn refresh_sessions(&mut self) {
        let ops = self.ops.clone();
        self.spawn_session(SessionAction::Load, async move { ops.list().await });
    }

    fn promote_dialog(&mut self) {
        if self.dialog.is_none() {
            if let Ok(request) = self.dialogs.try_recv() {
                self.dialog = Some(request);
            }
        }
    }

    fn clamp_sidebar_cursor(&mut self) {
        let len = self.store.sessions().len();
        self.sidebar_cursor = self.sidebar_cursor.min(len.saturating_sub(1));
    }

    fn notify_info(&mut self, message: impl Into<String>) {
        self.notices.notify(message, NoticeKind::Info, Instant::now());
    }

    fn notify_error(&mut self, message: impl Into<String>) {
        self.notices.notify(message, NoticeKind::Error, Instant::now());
    }

    fn spawn_session<F>(&self, action: SessionAction, work: F)
    where
        F: std::future::Future<Output = Result<SessionOutcome>> + Send + 'static,
    {
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let result = work.await;
            let _ = sender.send(UiEvent::Session { action, result }).await;
        });
    }

    fn spawn_turn(&self, start: TurnStart) {
        let api = Arc::clone(&self.api);
        let sender = self.sender.clone();

        tokio::spawn(async move {
            let TurnStart {
                id,
                request,
                cancel,
            } = start;

            let opened = tokio::select! {
                _ = cancel.cancelled() => return,
                opened = api.open_stream(&request) => opened,
            };
            let fragments = match opened {
                Ok(fragments) => fragments,
                Err(err) => {
                    let _ = sender.send(UiEvent::StreamFailed(id, err.to_string())).await;
                    return;
                }
            };
            if sender.send(UiEvent::StreamOpened(id)).await.is_err() {
                return;
            }

            let batches = event_batches(fragments);
            futures::pin_mut!(batches);

            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(turn = %id, "stream task stopped by cancellation");
                        return;
                    }
                    next = batches.next() => next,
                };

                let event = match next {
                    Some(Ok(events)) => UiEvent::StreamBatch(id, events),
                    Some(Err(err)) => UiEvent::StreamFailed(id, err.to_string()),
                    None => UiEvent::StreamClosed(id),
                };
                let last = !matches!(event, UiEvent::StreamBatch(..));
                if sender.send(event).await.is_err() || last {
                    return;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Message;
    use crate::render::MarkdownRenderer;
    use crate::session::fake::FakeApi;
    use crate::turn::TurnState;
    use crate::view::{Entry, STOPPED_MARKER};
    use serde_json::json;

    fn app_with(api: &Arc<FakeApi>) -> App {
        App::new(api.clone(), Arc::new(MarkdownRenderer), UiConfig::default())
    }

    fn line(value: serde_json::Value) -> Vec<u8> {
        format!("data: {}\n\n", value).into_bytes()
    }

    async fn settle(app: &mut App) {
        while app.store.active().is_none() || app.view.session_id() != app.store.active() {
            app.pump().await;
        }
    }

    async fn run_turn(app: &mut App) {
        while app.turns.is_busy() {
            app.pump().await;
        }
    }

    fn assistant_lines(app: &App) -> Vec<String> {
        match app.view.entries().last() {
            Some(Entry::Assistant(entry)) => entry.plain_lines(),
            other => panic!("expected assistant entry, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn answer_streams_into_the_view() {
        let api = Arc::new(FakeApi::with_sessions(&["s1"]));
        let mut body = Vec::new();
        body.extend(line(json!({"type": "status", "message": "Thinking"})));
        body.extend(line(json!({"type": "chunk", "content": "There"})));
        body.extend(line(json!({"type": "chunk", "content": " are 12."})));
        body.extend(line(json!({"type": "done"})));
        api.script_stream(body.chunks(9).map(|piece| Ok(piece.to_vec())).collect());

        let mut app = app_with(&api);
        app.start();
        settle(&mut app).await;

        assert!(app.submit("How many orders today?"));
        assert!(!app.input_enabled());
        run_turn(&mut app).await;

        assert!(app.input_enabled());
        assert_eq!(app.focus, Focus::Input);
        assert_eq!(assistant_lines(&app), vec!["There are 12."]);
        assert!(!app.view.cache_indicator());
        let requests = api.state.lock().unwrap().requests.clone();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].session_id, "s1");
        assert_eq!(requests[0].question, "How many orders today?");
    }

    #[tokio::test]
    async fn cached_answer_shows_the_indicator() {
        let api = Arc::new(FakeApi::with_sessions(&["s1"]));
        api.script_stream(vec![
            Ok(line(json!({"type": "cache_hit", "value": true}))),
            Ok(line(json!({"type": "chunk", "content": "There are 12."}))),
            Ok(line(json!({"type": "done"}))),
        ]);

        let mut app = app_with(&api);
        app.start();
        settle(&mut app).await;
        app.submit("How many orders today?");
        run_turn(&mut app).await;

        assert!(app.view.cache_indicator());
        match app.view.entries().last() {
            Some(Entry::Assistant(entry)) => assert!(entry.cached),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(app.turns.last().map(|t| t.cache_hit), Some(true));
    }

    #[tokio::test]
    async fn second_submission_is_rejected_while_streaming() {
        let api = Arc::new(FakeApi::with_sessions(&["s1"]));
        api.script_stream(vec![Ok(line(json!({"type": "chunk", "content": "one"})))]);

        let mut app = app_with(&api);
        app.start();
        settle(&mut app).await;
        assert!(app.submit("first"));
        assert!(!app.submit("second"));
        assert_eq!(app.view.entries().len(), 2);
        run_turn(&mut app).await;
        assert_eq!(api.state.lock().unwrap().requests.len(), 1);
    }

    #[tokio::test]
    async fn cancel_after_two_chunks_keeps_them() {
        let api = Arc::new(FakeApi::with_sessions(&["s1"]));
        api.script_stream(vec![
            Ok(line(json!({"type": "chunk", "content": "There"}))),
            Ok(line(json!({"type": "chunk", "content": " are"}))),
            Ok(line(json!({"type": "chunk", "content": " 12."}))),
            Ok(line(json!({"type": "done"}))),
        ]);

        let mut app = app_with(&api);
        app.start();
        settle(&mut app).await;
        app.submit("How many orders today?");

        while app.turns.active().map(|t| t.text.as_str()) != Some("There are") {
            app.pump().await;
        }
        app.cancel_turn();

        assert_eq!(app.turns.state(), TurnState::Idle);
        assert!(app.input_enabled());
        let last = app.turns.last().unwrap();
        assert_eq!(last.text, "There are");
        assert_eq!(
            assistant_lines(&app),
            vec!["There are".to_string(), STOPPED_MARKER.to_string()]
        );
    }

    #[tokio::test]
    async fn transport_error_is_rendered_inline() {
        let api = Arc::new(FakeApi::with_sessions(&["s1"]));
        api.script_stream(vec![
            Ok(line(json!({"type": "chunk", "content": "Part"}))),
            Err(crate::error::ClientError::api(502, "upstream reset")),
        ]);

        let mut app = app_with(&api);
        app.start();
        settle(&mut app).await;
        app.submit("q");
        run_turn(&mut app).await;

        assert_eq!(
            assistant_lines(&app),
            vec![
                "Part".to_string(),
                "Connection error: api error (502): upstream reset".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn submitting_without_a_session_creates_one_first() {
        let api = Arc::new(FakeApi::default());
        api.script_stream(vec![Ok(line(json!({"type": "done"})))]);
        let mut app = app_with(&api);

        assert!(app.submit("hello"));
        while api.state.lock().unwrap().requests.is_empty() || app.turns.is_busy() {
            app.pump().await;
        }
        let requests = api.state.lock().unwrap().requests.clone();
        assert_eq!(requests[0].session_id, "new-1");
        assert_eq!(app.store.active(), Some("new-1"));
    }

    #[tokio::test]
    async fn deleting_the_only_session_ends_on_a_fresh_welcome_view() {
        let api = Arc::new(FakeApi::with_sessions(&["only"]));
        api.set_history("only", vec![Message::user("q"), Message::assistant("a")]);
        let mut app = app_with(&api);
        app.start();
        settle(&mut app).await;
        assert_eq!(app.view.entries().len(), 2);

        app.delete_active();
        while app.dialog.is_none() {
            app.pump().await;
        }
        app.answer_dialog(true);

        while app.store.active() != Some("new-1") || app.view.session_id() != Some("new-1") {
            app.pump().await;
        }
        assert!(app.view.shows_welcome());
        assert_eq!(api.ids(), vec!["new-1".to_string()]);
    }

    #[tokio::test]
    async fn declined_delete_leaves_everything_alone() {
        let api = Arc::new(FakeApi::with_sessions(&["a"]));
        let mut app = app_with(&api);
        app.start();
        settle(&mut app).await;

        app.delete_active();
        while app.dialog.is_none() {
            app.pump().await;
        }
        app.answer_dialog(false);
        app.pump().await;

        assert_eq!(app.store.active(), Some("a"));
        assert_eq!(api.ids(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn failed_delete_notifies_and_keeps_state() {
        let api = Arc::new(FakeApi::with_sessions(&["a"]));
        api.state.lock().unwrap().fail_delete = true;
        let mut app = app_with(&api);
        app.start();
        settle(&mut app).await;

        app.delete_active();
        while app.dialog.is_none() {
            app.pump().await;
        }
        app.answer_dialog(true);
        while app.notices.is_empty() {
            app.pump().await;
        }

        let now = Instant::now();
        let notice = app.notices.visible(now).next().unwrap().0.clone();
        assert_eq!(notice.kind, NoticeKind::Error);
        assert_eq!(
            notice.message,
            "Failed to delete session: api error (500): database locked"
        );
        assert_eq!(app.store.active(), Some("a"));
    }

    #[tokio::test]
    async fn delete_completes_even_when_the_list_refresh_fails() {
        let api = Arc::new(FakeApi::with_sessions(&["only"]));
        let mut app = app_with(&api);
        app.start();
        settle(&mut app).await;
        api.state.lock().unwrap().fail_list = true;

        app.delete_active();
        while app.dialog.is_none() {
            app.pump().await;
        }
        app.answer_dialog(true);
        while app.store.active() != Some("new-1") || app.view.session_id() != Some("new-1") {
            app.pump().await;
        }

        let active = app.store.active().unwrap().to_string();
        assert!(api.ids().contains(&active));
        assert!(app.view.shows_welcome());
        assert_eq!(app.store.sessions()[0].session_id, "new-1");
        let messages: Vec<String> = app
            .notices
            .visible(Instant::now())
            .map(|(notice, _)| notice.message.clone())
            .collect();
        assert!(
            messages
                .iter()
                .all(|m| m.starts_with("Failed to load sessions"))
        );
        assert!(!messages.is_empty());
    }

    #[tokio::test]
    async fn cache_panel_loads_stats() {
        let api = Arc::new(FakeApi::default());
        let mut app = app_with(&api);
        app.open_cache_panel();
        assert_eq!(app.cache_panel, Some(CachePanel::Loading));
        while app.cache_panel == Some(CachePanel::Loading) {
            app.pump().await;
        }
        match &app.cache_panel {
            Some(CachePanel::Loaded(stats)) => assert_eq!(stats.cache_hits, 3),
            other => panic!("unexpected {other:?}"),
        }
    }
}

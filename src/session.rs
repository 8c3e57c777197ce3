//! Conversations known to the client and which one is active.
//!
//! Network work runs in `SessionOps` (cheap to clone into a task); its
//! results come back as `SessionOutcome`s that only `SessionStore::apply`
//! turns into state changes. `apply` may ask for a follow-up operation, which
//! is how deleting the active session ends with another active session.

use std::sync::Arc;

use tracing::{info, warn};

use crate::client::ChatApi;
use crate::confirm::Confirmer;
use crate::error::Result;
use crate::protocol::{CacheStats, Message, SessionSummary};
use crate::view::Transcript;

pub const DELETE_PROMPT: &str = "Are you sure you want to delete this conversation?";
pub const CLEAR_PROMPT: &str = "Clear all messages in this conversation?";
pub const NEW_SESSION_TITLE: &str = "New Chat";
pub const CLEAR_CACHE_PROMPT: &str = "Are you sure you want to clear the system cache?";

/// A session list fetched after a mutation. The mutation already happened on
/// the server, so a failed fetch carries its error text instead of failing
/// the whole operation.
pub type Refreshed = std::result::Result<Vec<SessionSummary>, String>;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Listed(Vec<SessionSummary>),
    Created {
        session_id: String,
        title: String,
        sessions: Refreshed,
    },
    Selected {
        session_id: String,
        messages: Vec<Message>,
    },
    Deleted {
        session_id: String,
        sessions: Refreshed,
    },
    Cleared {
        session_id: String,
        message: String,
        messages: Vec<Message>,
        sessions: Refreshed,
    },
    /// The user declined the confirmation; nothing changed.
    Declined,
}

impl SessionOutcome {
    /// Why the list refresh after a successful mutation failed, if it did.
    pub fn refresh_error(&self) -> Option<&str> {
        match self {
            SessionOutcome::Created { sessions, .. }
            | SessionOutcome::Deleted { sessions, .. }
            | SessionOutcome::Cleared { sessions, .. } => {
                sessions.as_ref().err().map(String::as_str)
            }
            _ => None,
        }
    }
}

/// Work `apply` wants done next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Followup {
    None,
    /// Fetch and show the history of this (already active) session.
    Load(String),
    /// No session is active and none exist: create one.
    Provision,
    /// Tell the user something went through.
    Notify(String),
}

#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Vec<SessionSummary>,
    active: Option<String>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sessions in the order the server listed them.
    pub fn sessions(&self) -> &[SessionSummary] {
        &self.sessions
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Make `session_id` active right away; its history arrives later as a
    /// `Selected` outcome.
    pub fn begin_select(&mut self, session_id: &str) {
        self.active = Some(session_id.to_string());
    }

    pub fn apply(&mut self, outcome: SessionOutcome, view: &mut Transcript) -> Followup {
        match outcome {
            SessionOutcome::Listed(sessions) => {
                self.sessions = sessions;
                if self.active.is_some() {
                    return Followup::None;
                }
                self.adopt_first()
            }
            SessionOutcome::Created {
                session_id,
                title,
                sessions,
            } => {
                info!(session_id = %session_id, "session created");
                match sessions {
                    Ok(sessions) => self.sessions = sessions,
                    Err(_) => self.sessions.insert(
                        0,
                        SessionSummary {
                            session_id: session_id.clone(),
                            title,
                            message_count: 0,
                        },
                    ),
                }
                view.reset_welcome(&session_id);
                self.active = Some(session_id);
                Followup::None
            }
            SessionOutcome::Selected {
                session_id,
                messages,
            } => {
                // A later selection may have overtaken this one.
                if self.active.as_deref() == Some(session_id.as_str()) {
                    view.load_history(&session_id, &messages);
                }
                Followup::None
            }
            SessionOutcome::Deleted {
                session_id,
                sessions,
            } => {
                info!(session_id = %session_id, "session deleted");
                match sessions {
                    Ok(sessions) => self.sessions = sessions,
                    Err(_) => self.sessions.retain(|s| s.session_id != session_id),
                }
                if self.active.as_deref() == Some(session_id.as_str()) {
                    self.active = None;
                }
                if self.active.is_some() {
                    return Followup::None;
                }
                self.adopt_first()
            }
            SessionOutcome::Cleared {
                session_id,
                message,
                messages,
                sessions,
            } => {
                match sessions {
                    Ok(sessions) => self.sessions = sessions,
                    Err(_) => {
                        for summary in &mut self.sessions {
                            if summary.session_id == session_id {
                                summary.message_count = 0;
                            }
                        }
                    }
                }
                if self.active.as_deref() == Some(session_id.as_str()) {
                    view.load_history(&session_id, &messages);
                }
                Followup::Notify(message)
            }
            SessionOutcome::Declined => Followup::None,
        }
    }

    fn adopt_first(&mut self) -> Followup {
        match self.sessions.first() {
            Some(first) => {
                let id = first.session_id.clone();
                self.active = Some(id.clone());
                Followup::Load(id)
            }
            None => Followup::Provision,
        }
    }
}

/// The network half of the session operations.
#[derive(Clone)]
pub struct SessionOps {
    api: Arc<dyn ChatApi>,
    gate: Arc<dyn Confirmer>,
}

impl SessionOps {
    pub fn new(api: Arc<dyn ChatApi>, gate: Arc<dyn Confirmer>) -> Self {
        Self { api, gate }
    }

    pub async fn list(&self) -> Result<SessionOutcome> {
        Ok(SessionOutcome::Listed(self.api.list_sessions().await?))
    }

    pub async fn create(&self) -> Result<SessionOutcome> {
        let created = self.api.create_session().await?;
        Ok(SessionOutcome::Created {
            title: created.title.unwrap_or_else(|| NEW_SESSION_TITLE.to_string()),
            sessions: self.refresh().await,
            session_id: created.session_id,
        })
    }

    pub async fn select(&self, session_id: String) -> Result<SessionOutcome> {
        let messages = self.api.session_messages(&session_id).await?;
        Ok(SessionOutcome::Selected {
            session_id,
            messages,
        })
    }

    pub async fn delete(&self, session_id: String, confirm: bool) -> Result<SessionOutcome> {
        if confirm && !self.gate.confirm(DELETE_PROMPT, None).await {
            info!(session_id = %session_id, "delete declined");
            return Ok(SessionOutcome::Declined);
        }

        self.api.delete_session(&session_id).await.inspect_err(|err| {
            warn!(session_id = %session_id, error = %err, "delete failed");
        })?;
        Ok(SessionOutcome::Deleted {
            session_id,
            sessions: self.refresh().await,
        })
    }

    pub async fn clear(&self, session_id: String, confirm: bool) -> Result<SessionOutcome> {
        if confirm && !self.gate.confirm(CLEAR_PROMPT, None).await {
            return Ok(SessionOutcome::Declined);
        }

        let ack = self.api.clear_session(&session_id).await?;
        let messages = self
            .api
            .session_messages(&session_id)
            .await
            .unwrap_or_else(|err| {
                warn!(session_id = %session_id, error = %err, "history reload after clear failed");
                Vec::new()
            });
        Ok(SessionOutcome::Cleared {
            message: ack.message,
            messages,
            sessions: self.refresh().await,
            session_id,
        })
    }

    async fn refresh(&self) -> Refreshed {
        self.api.list_sessions().await.map_err(|err| {
            warn!(error = %err, "session list refresh failed");
            err.to_string()
        })
    }

    pub async fn cache_stats(&self) -> Result<CacheStats> {
        self.api.cache_stats().await
    }

    /// Clear the server's query cache. `None` means the user declined.
    pub async fn clear_cache(&self, confirm: bool) -> Result<Option<String>> {
        if confirm && !self.gate.confirm(CLEAR_CACHE_PROMPT, None).await {
            return Ok(None);
        }
        Ok(Some(self.api.clear_cache().await?.message))
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use futures::StreamExt;

    use crate::client::{ChatApi, FragmentStream};
    use crate::error::{ClientError, Result};
    use crate::protocol::{
        CacheStats, ChatRequest, Message, ServerMessage, SessionCreateResponse, SessionSummary,
    };

    /// In-memory chat service. Stream bodies are scripted per call.
    #[derive(Default)]
    pub struct FakeApi {
        pub state: Mutex<FakeState>,
    }

    #[derive(Default)]
    pub struct FakeState {
        pub sessions: Vec<(SessionSummary, Vec<Message>)>,
        pub next_id: u64,
        pub fail_delete: bool,
        pub fail_list: bool,
        pub streams: VecDeque<Vec<Result<Vec<u8>>>>,
        pub requests: Vec<ChatRequest>,
        pub cache_cleared: bool,
    }

    impl FakeApi {
        pub fn with_sessions(ids: &[&str]) -> Self {
            let api = Self::default();
            {
                let mut state = api.state.lock().unwrap();
                for id in ids {
                    state.sessions.push((summary(id, 0), Vec::new()));
                }
            }
            api
        }

        pub fn script_stream(&self, fragments: Vec<Result<Vec<u8>>>) {
            self.state.lock().unwrap().streams.push_back(fragments);
        }

        pub fn set_history(&self, id: &str, messages: Vec<Message>) {
            let mut state = self.state.lock().unwrap();
            if let Some((summary, history)) =
                state.sessions.iter_mut().find(|(s, _)| s.session_id == id)
            {
                summary.message_count = messages.len() as u64;
                *history = messages;
            }
        }

        pub fn ids(&self) -> Vec<String> {
            self.state
                .lock()
                .unwrap()
                .sessions
                .iter()
                .map(|(s, _)| s.session_id.clone())
                .collect()
        }
    }

    fn summary(id: &str, count: u64) -> SessionSummary {
        SessionSummary {
            session_id: id.to_string(),
            title: "New Chat".to_string(),
            message_count: count,
        }
    }

    #[async_trait]
    impl ChatApi for FakeApi {
        async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
            let state = self.state.lock().unwrap();
            if state.fail_list {
                return Err(ClientError::api(500, "list unavailable"));
            }
            Ok(state.sessions.iter().map(|(s, _)| s.clone()).collect())
        }

        async fn create_session(&self) -> Result<SessionCreateResponse> {
            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            let id = format!("new-{}", state.next_id);
            state.sessions.insert(0, (summary(&id, 0), Vec::new()));
            Ok(SessionCreateResponse {
                session_id: id,
                title: Some("New Chat".to_string()),
            })
        }

        async fn session_messages(&self, session_id: &str) -> Result<Vec<Message>> {
            let state = self.state.lock().unwrap();
            Ok(state
                .sessions
                .iter()
                .find(|(s, _)| s.session_id == session_id)
                .map(|(_, messages)| messages.clone())
                .unwrap_or_default())
        }

        async fn delete_session(&self, session_id: &str) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            if state.fail_delete {
                return Err(ClientError::api(500, "database locked"));
            }
            state.sessions.retain(|(s, _)| s.session_id != session_id);
            Ok(())
        }

        async fn clear_session(&self, session_id: &str) -> Result<ServerMessage> {
            let mut state = self.state.lock().unwrap();
            for (summary, messages) in state.sessions.iter_mut() {
                if summary.session_id == session_id {
                    summary.message_count = 0;
                    messages.clear();
                }
            }
            Ok(ServerMessage {
                message: format!("Session {} cleared", session_id),
            })
        }

        async fn open_stream(&self, request: &ChatRequest) -> Result<FragmentStream> {
            let mut state = self.state.lock().unwrap();
            state.requests.push(request.clone());
            let fragments = state.streams.pop_front().unwrap_or_default();
            Ok(futures::stream::iter(fragments).boxed())
        }

        async fn cache_stats(&self) -> Result<CacheStats> {
            Ok(CacheStats {
                enabled: true,
                total_entries: 2,
                cache_hits: 3,
                cache_misses: 1,
                hit_rate: 75.0,
                similarity_threshold: 0.85,
            })
        }

        async fn clear_cache(&self) -> Result<ServerMessage> {
            self.state.lock().unwrap().cache_cleared = true;
            Ok(ServerMessage {
                message: "Cache cleared".to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeApi;
    use super::*;
    use crate::confirm::AutoConfirm;
    use crate::render::MarkdownRenderer;

    fn view() -> Transcript {
        Transcript::new(Arc::new(MarkdownRenderer))
    }

    fn ops(api: &Arc<FakeApi>, gate: AutoConfirm) -> SessionOps {
        SessionOps::new(api.clone(), Arc::new(gate))
    }

    /// Run an operation and every follow-up it triggers, the way the
    /// coordinator does.
    async fn drive(
        store: &mut SessionStore,
        view: &mut Transcript,
        ops: &SessionOps,
        outcome: SessionOutcome,
    ) -> Vec<Followup> {
        let mut seen = Vec::new();
        let mut next = store.apply(outcome, view);
        loop {
            seen.push(next.clone());
            let outcome = match next {
                Followup::Load(id) => ops.select(id).await.unwrap(),
                Followup::Provision => ops.create().await.unwrap(),
                Followup::None | Followup::Notify(_) => return seen,
            };
            next = store.apply(outcome, view);
        }
    }

    #[tokio::test]
    async fn startup_adopts_first_listed_session() {
        let api = Arc::new(FakeApi::with_sessions(&["a", "b"]));
        api.set_history("a", vec![Message::user("hi"), Message::assistant("hello")]);
        let ops = ops(&api, AutoConfirm::accept());
        let (mut store, mut view) = (SessionStore::new(), view());

        let outcome = ops.list().await.unwrap();
        drive(&mut store, &mut view, &ops, outcome).await;

        assert_eq!(store.active(), Some("a"));
        assert_eq!(store.sessions().len(), 2);
        assert_eq!(view.session_id(), Some("a"));
        assert_eq!(view.entries().len(), 2);
    }

    #[tokio::test]
    async fn startup_with_no_sessions_provisions_one() {
        let api = Arc::new(FakeApi::default());
        let ops = ops(&api, AutoConfirm::accept());
        let (mut store, mut view) = (SessionStore::new(), view());

        let outcome = ops.list().await.unwrap();
        let followups = drive(&mut store, &mut view, &ops, outcome).await;

        assert_eq!(followups, vec![Followup::Provision, Followup::None]);
        assert_eq!(store.active(), Some("new-1"));
        assert!(view.shows_welcome());
    }

    #[tokio::test]
    async fn create_activates_new_session_with_welcome_view() {
        let api = Arc::new(FakeApi::with_sessions(&["a"]));
        let ops = ops(&api, AutoConfirm::accept());
        let (mut store, mut view) = (SessionStore::new(), view());
        store.begin_select("a");
        view.push_user("old question");

        let outcome = ops.create().await.unwrap();
        drive(&mut store, &mut view, &ops, outcome).await;

        assert_eq!(store.active(), Some("new-1"));
        assert_eq!(store.sessions()[0].session_id, "new-1");
        assert!(view.shows_welcome());
        assert!(view.entries().is_empty());
    }

    #[tokio::test]
    async fn stale_selection_does_not_replace_the_view() {
        let api = Arc::new(FakeApi::with_sessions(&["a", "b"]));
        api.set_history("a", vec![Message::user("from a")]);
        let ops = ops(&api, AutoConfirm::accept());
        let (mut store, mut view) = (SessionStore::new(), view());

        store.begin_select("a");
        let slow = ops.select("a".to_string()).await.unwrap();
        store.begin_select("b");
        let fast = ops.select("b".to_string()).await.unwrap();

        store.apply(fast, &mut view);
        store.apply(slow, &mut view);
        assert_eq!(store.active(), Some("b"));
        assert_eq!(view.session_id(), Some("b"));
        assert!(view.entries().is_empty());
    }

    #[tokio::test]
    async fn deleting_the_only_active_session_provisions_a_new_one() {
        let api = Arc::new(FakeApi::with_sessions(&["only"]));
        let gate = AutoConfirm::accept();
        let ops = ops(&api, gate);
        let (mut store, mut view) = (SessionStore::new(), view());
        let outcome = ops.list().await.unwrap();
        drive(&mut store, &mut view, &ops, outcome).await;
        assert_eq!(store.active(), Some("only"));

        let outcome = ops.delete("only".to_string(), true).await.unwrap();
        let followups = drive(&mut store, &mut view, &ops, outcome).await;

        assert_eq!(followups[0], Followup::Provision);
        assert_eq!(store.active(), Some("new-1"));
        assert_eq!(api.ids(), vec!["new-1".to_string()]);
        assert!(view.shows_welcome());
    }

    #[tokio::test]
    async fn deleting_the_active_session_always_leaves_one_active() {
        for existing in [vec!["x"], vec!["x", "y"], vec!["y", "x", "z"]] {
            let api = Arc::new(FakeApi::with_sessions(&existing));
            let ops = ops(&api, AutoConfirm::accept());
            let (mut store, mut view) = (SessionStore::new(), view());
            let outcome = ops.list().await.unwrap();
            drive(&mut store, &mut view, &ops, outcome).await;
            store.begin_select("x");

            let outcome = ops.delete("x".to_string(), true).await.unwrap();
            drive(&mut store, &mut view, &ops, outcome).await;

            let active = store.active().expect("an active session");
            assert_ne!(active, "x");
            assert!(api.ids().iter().any(|id| id == active));
        }
    }

    #[tokio::test]
    async fn deleting_another_session_keeps_the_active_one() {
        let api = Arc::new(FakeApi::with_sessions(&["a", "b"]));
        let ops = ops(&api, AutoConfirm::accept());
        let (mut store, mut view) = (SessionStore::new(), view());
        store.begin_select("a");

        let outcome = ops.delete("b".to_string(), true).await.unwrap();
        let followups = drive(&mut store, &mut view, &ops, outcome).await;
        assert_eq!(followups, vec![Followup::None]);
        assert_eq!(store.active(), Some("a"));
        assert_eq!(store.sessions().len(), 1);
    }

    #[tokio::test]
    async fn declined_delete_changes_nothing() {
        let api = Arc::new(FakeApi::with_sessions(&["a"]));
        let gate = Arc::new(AutoConfirm::decline());
        let ops = SessionOps::new(api.clone(), gate.clone());

        let outcome = ops.delete("a".to_string(), true).await.unwrap();
        assert_eq!(outcome, SessionOutcome::Declined);
        assert_eq!(api.ids(), vec!["a".to_string()]);
        assert_eq!(gate.asked(), vec![DELETE_PROMPT.to_string()]);
    }

    #[tokio::test]
    async fn bypassed_confirmation_is_not_asked() {
        let api = Arc::new(FakeApi::with_sessions(&["a"]));
        let gate = Arc::new(AutoConfirm::decline());
        let ops = SessionOps::new(api.clone(), gate.clone());

        let outcome = ops.delete("a".to_string(), false).await.unwrap();
        assert!(matches!(outcome, SessionOutcome::Deleted { .. }));
        assert!(gate.asked().is_empty());
    }

    #[tokio::test]
    async fn failed_delete_surfaces_the_error() {
        let api = Arc::new(FakeApi::with_sessions(&["a"]));
        api.state.lock().unwrap().fail_delete = true;
        let ops = ops(&api, AutoConfirm::accept());

        let err = ops.delete("a".to_string(), true).await.unwrap_err();
        assert_eq!(err.to_string(), "api error (500): database locked");
        assert_eq!(api.ids(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn clear_reloads_empty_view_and_refreshes_counts() {
        let api = Arc::new(FakeApi::with_sessions(&["a"]));
        api.set_history("a", vec![Message::user("q"), Message::assistant("a")]);
        let ops = ops(&api, AutoConfirm::accept());
        let (mut store, mut view) = (SessionStore::new(), view());
        let outcome = ops.list().await.unwrap();
        drive(&mut store, &mut view, &ops, outcome).await;
        assert_eq!(store.sessions()[0].message_count, 2);
        assert_eq!(view.entries().len(), 2);

        let outcome = ops.clear("a".to_string(), true).await.unwrap();
        let followups = drive(&mut store, &mut view, &ops, outcome).await;

        assert_eq!(
            followups,
            vec![Followup::Notify("Session a cleared".to_string())]
        );
        assert_eq!(store.sessions()[0].message_count, 0);
        assert!(view.entries().is_empty());
        assert!(view.shows_welcome());
    }

    #[tokio::test]
    async fn delete_survives_a_failed_list_refresh() {
        let api = Arc::new(FakeApi::with_sessions(&["a", "b"]));
        let ops = ops(&api, AutoConfirm::accept());
        let (mut store, mut view) = (SessionStore::new(), view());
        let outcome = ops.list().await.unwrap();
        drive(&mut store, &mut view, &ops, outcome).await;
        api.state.lock().unwrap().fail_list = true;

        let outcome = ops.delete("a".to_string(), true).await.unwrap();
        assert_eq!(
            outcome.refresh_error(),
            Some("api error (500): list unavailable")
        );
        let followups = drive(&mut store, &mut view, &ops, outcome).await;

        assert_eq!(followups[0], Followup::Load("b".to_string()));
        assert_eq!(store.active(), Some("b"));
        assert_eq!(store.sessions().len(), 1);
        assert_eq!(api.ids(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn clear_survives_a_failed_list_refresh() {
        let api = Arc::new(FakeApi::with_sessions(&["a"]));
        api.set_history("a", vec![Message::user("q"), Message::assistant("a")]);
        let ops = ops(&api, AutoConfirm::accept());
        let (mut store, mut view) = (SessionStore::new(), view());
        let outcome = ops.list().await.unwrap();
        drive(&mut store, &mut view, &ops, outcome).await;
        api.state.lock().unwrap().fail_list = true;

        let outcome = ops.clear("a".to_string(), true).await.unwrap();
        assert!(outcome.refresh_error().is_some());
        store.apply(outcome, &mut view);

        assert_eq!(store.sessions()[0].message_count, 0);
        assert!(view.entries().is_empty());
    }

    #[tokio::test]
    async fn clear_cache_respects_the_gate() {
        let api = Arc::new(FakeApi::default());
        let declined = ops(&api, AutoConfirm::decline());
        assert_eq!(declined.clear_cache(true).await.unwrap(), None);
        assert!(!api.state.lock().unwrap().cache_cleared);

        let accepted = ops(&api, AutoConfirm::accept());
        assert_eq!(
            accepted.clear_cache(true).await.unwrap().as_deref(),
            Some("Cache cleared")
        );
        assert!(api.state.lock().unwrap().cache_cleared);
    }
}

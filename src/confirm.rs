//! Accept/decline prompts that suspend the asking task, not the UI.
//!
//! `DialogGate` forwards each prompt to the UI as a `ConfirmRequest` and waits
//! on a one-shot reply. Prompts from concurrent callers queue behind each
//! other so only one dialog is ever on screen.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

#[async_trait]
pub trait Confirmer: Send + Sync {
    /// Resolves `true` only when the user accepts; declining or dismissing
    /// both resolve `false`.
    async fn confirm(&self, message: &str, note: Option<&str>) -> bool;
}

/// A prompt waiting for the user's answer.
#[derive(Debug)]
pub struct ConfirmRequest {
    pub message: String,
    pub note: Option<String>,
    reply: oneshot::Sender<bool>,
}

impl ConfirmRequest {
    pub fn resolve(self, accepted: bool) {
        let _ = self.reply.send(accepted);
    }
}

#[derive(Clone)]
pub struct DialogGate {
    requests: mpsc::UnboundedSender<ConfirmRequest>,
    turnstile: Arc<tokio::sync::Mutex<()>>,
}

impl DialogGate {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ConfirmRequest>) {
        let (requests, receiver) = mpsc::unbounded_channel();
        (
            Self {
                requests,
                turnstile: Arc::new(tokio::sync::Mutex::new(())),
            },
            receiver,
        )
    }
}

#[async_trait]
impl Confirmer for DialogGate {
    async fn confirm(&self, message: &str, note: Option<&str>) -> bool {
        let _turn = self.turnstile.lock().await;
        let (reply, answer) = oneshot::channel();
        let request = ConfirmRequest {
            message: message.to_string(),
            note: note.map(str::to_string),
            reply,
        };

        if self.requests.send(request).is_err() {
            debug!("confirmation requested after the dialog surface closed");
            return false;
        }

        // A dropped request counts as dismissed.
        answer.await.unwrap_or(false)
    }
}

/// Answers every prompt with a fixed value and remembers what was asked.
#[derive(Debug, Default)]
pub struct AutoConfirm {
    answer: bool,
    asked: Mutex<Vec<String>>,
}

impl AutoConfirm {
    pub fn accept() -> Self {
        Self {
            answer: true,
            asked: Mutex::default(),
        }
    }

    pub fn decline() -> Self {
        Self {
            answer: false,
            asked: Mutex::default(),
        }
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().map(|asked| asked.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Confirmer for AutoConfirm {
    async fn confirm(&self, message: &str, _note: Option<&str>) -> bool {
        if let Ok(mut asked) = self.asked.lock() {
            asked.push(message.to_string());
        }
        self.answer
    }
}

//! What the conversation pane shows: the transcript of the active session and
//! its scroll position. The view is replaced wholesale on session switches;
//! live turn output is addressed by turn id so a replaced view simply stops
//! receiving it.

use std::sync::Arc;

use crate::protocol::{Message, Role};
use crate::render::{MarkupBlock, Renderer, render_for_view};
use crate::turn::TurnId;

pub const STOPPED_MARKER: &str = "(Stopped by user)";

#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    User(String),
    Assistant(AssistantEntry),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AssistantEntry {
    /// Set while this entry belongs to a turn that may still receive output.
    pub turn: Option<TurnId>,
    pub status: Option<String>,
    pub text: String,
    pub blocks: Vec<MarkupBlock>,
    pub cached: bool,
    pub stopped: bool,
    pub error: Option<String>,
}

impl AssistantEntry {
    /// Lines as they read on screen, without styling.
    pub fn plain_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .blocks
            .iter()
            .flat_map(MarkupBlock::plain_lines)
            .collect();
        if self.stopped {
            lines.push(STOPPED_MARKER.to_string());
        }
        if let Some(error) = &self.error {
            lines.push(error.clone());
        }
        lines
    }
}

/// Vertical scroll state of the transcript, measured in rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scroll {
    offset: usize,
    content: usize,
    viewport: usize,
    pending_end: bool,
}

impl Scroll {
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Rows below the bottom edge of the viewport.
    pub fn rows_below(&self) -> usize {
        self.content.saturating_sub(self.offset + self.viewport)
    }

    pub fn near_end(&self, proximity: usize) -> bool {
        self.pending_end || self.rows_below() <= proximity
    }

    /// Jump to the end at the next layout, once the new content height is known.
    pub fn to_end(&mut self) {
        self.pending_end = true;
    }

    pub fn layout(&mut self, content: usize, viewport: usize) {
        self.content = content;
        self.viewport = viewport;
        let max = content.saturating_sub(viewport);
        if self.pending_end {
            self.offset = max;
            self.pending_end = false;
        } else {
            self.offset = self.offset.min(max);
        }
    }

    pub fn up(&mut self, rows: usize) {
        self.pending_end = false;
        self.offset = self.offset.saturating_sub(rows);
    }

    pub fn down(&mut self, rows: usize) {
        let max = self.content.saturating_sub(self.viewport);
        self.offset = (self.offset + rows).min(max);
    }
}

pub struct Transcript {
    renderer: Arc<dyn Renderer>,
    session_id: Option<String>,
    entries: Vec<Entry>,
    welcome: bool,
    cache_indicator: bool,
    pub scroll: Scroll,
    pub table_offset: u16,
}

impl Transcript {
    pub fn new(renderer: Arc<dyn Renderer>) -> Self {
        Self {
            renderer,
            session_id: None,
            entries: Vec::new(),
            welcome: true,
            cache_indicator: false,
            scroll: Scroll::default(),
            table_offset: 0,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn shows_welcome(&self) -> bool {
        self.welcome
    }

    pub fn cache_indicator(&self) -> bool {
        self.cache_indicator
    }

    pub fn set_cache_indicator(&mut self, visible: bool) {
        self.cache_indicator = visible;
    }

    /// Replace the view with the empty welcome state of `session_id`.
    pub fn reset_welcome(&mut self, session_id: &str) {
        self.session_id = Some(session_id.to_string());
        self.entries.clear();
        self.welcome = true;
        self.cache_indicator = false;
        self.scroll = Scroll::default();
        self.table_offset = 0;
    }

    /// Replace the view with the full history of `session_id`.
    pub fn load_history(&mut self, session_id: &str, messages: &[Message]) {
        self.reset_welcome(session_id);
        self.welcome = messages.is_empty();
        for message in messages {
            let entry = match message.role {
                Role::User => Entry::User(message.content.clone()),
                Role::Assistant => Entry::Assistant(AssistantEntry {
                    text: message.content.clone(),
                    blocks: render_for_view(self.renderer.as_ref(), &message.content),
                    ..AssistantEntry::default()
                }),
            };
            self.entries.push(entry);
        }
        self.scroll.to_end();
    }

    pub fn push_user(&mut self, text: &str) {
        self.welcome = false;
        self.entries.push(Entry::User(text.to_string()));
        self.scroll.to_end();
    }

    /// Append the placeholder an in-flight turn streams into.
    pub fn open_turn(&mut self, turn: TurnId, status: &str) {
        self.welcome = false;
        self.cache_indicator = false;
        self.entries.push(Entry::Assistant(AssistantEntry {
            turn: Some(turn),
            status: Some(status.to_string()),
            ..AssistantEntry::default()
        }));
        self.scroll.to_end();
    }

    pub fn turn_entry_mut(&mut self, turn: TurnId) -> Option<&mut AssistantEntry> {
        self.entries.iter_mut().rev().find_map(|entry| match entry {
            Entry::Assistant(assistant) if assistant.turn == Some(turn) => Some(assistant),
            _ => None,
        })
    }

    /// Re-render the cumulative text of a live turn.
    pub fn render_turn_text(&mut self, turn: TurnId, text: &str) {
        let blocks = render_for_view(self.renderer.as_ref(), text);
        if let Some(entry) = self.turn_entry_mut(turn) {
            entry.text = text.to_string();
            entry.blocks = blocks;
        }
    }

    /// Detach a finished turn's entry so nothing else can write to it.
    pub fn seal_turn(&mut self, turn: TurnId) {
        if let Some(entry) = self.turn_entry_mut(turn) {
            entry.turn = None;
            entry.status = None;
        }
    }
}
